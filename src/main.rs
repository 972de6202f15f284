//! # docsync CLI
//!
//! The `docsync` binary drives configured connectors and prints their output
//! as NDJSON on stdout. Logs and progress go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! docsync --config ./config/docsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsync sources` | List configured connectors and their capabilities |
//! | `docsync validate <name>` | Check credentials and settings of a connector |
//! | `docsync sync <name> --mode <mode>` | Run a sync and print documents |
//!
//! Tokens are read from `WIKI_API_TOKEN_ID` and `WIKI_API_TOKEN_SECRET`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docsync::progress::ProgressMode;
use docsync::sync::SyncMode;
use docsync::{config, sources, sync};

/// docsync: pull documents from external sources through connectors.
#[derive(Parser)]
#[command(name = "docsync", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docsync.toml")]
    config: PathBuf,

    /// More log output (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured connectors and the sync modes they support.
    Sources,

    /// Load credentials and make one cheap authenticated call.
    ///
    /// Exits non-zero with a message that tells credential and permission
    /// problems apart from other failures.
    Validate {
        /// Connector instance name, e.g. `handbook`.
        name: String,
    },

    /// Sync a connector and print NDJSON to stdout.
    Sync {
        /// Connector instance name, e.g. `handbook`.
        name: String,

        #[arg(long, value_enum, default_value = "load")]
        mode: SyncMode,

        /// Only items updated on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only items updated on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Progress on stderr. Defaults to human on a TTY, off otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match verbose {
        0 => "docsync=info",
        1 => "docsync=debug",
        _ => "docsync=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Validate { name } => {
            sync::validate_source(&cfg, &name).await?;
        }
        Commands::Sync {
            name,
            mode,
            since,
            until,
            progress,
        } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            sync::run_sync(&cfg, &name, mode, since, until, progress).await?;
        }
    }

    Ok(())
}
