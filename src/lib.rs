//! # docsync
//!
//! A connector synchronization framework: capability contracts that every
//! source connector implements, a pagination engine for paged,
//! time-filterable REST listings, resumable checkpointed syncs, and a
//! BookStack-style wiki connector built on top of them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Wiki REST    │──▶│  Connector   │──▶│    Driver    │──▶ NDJSON
//! │ API (client) │   │ paginate+map │   │ (sync modes) │
//! └──────────────┘   └──────┬───────┘   └──────┬───────┘
//!                           │                  │
//!                    redaction, pacing    checkpoint blobs
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export WIKI_API_TOKEN_ID=... WIKI_API_TOKEN_SECRET=...
//! docsync sources                           # list configured connectors
//! docsync validate handbook                 # check credentials
//! docsync sync handbook --mode load         # full sync to stdout
//! docsync sync handbook --mode poll --since 2024-01-01
//! docsync sync handbook --mode checkpoint   # resumable
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Documents, sections, slim documents, failures |
//! | [`traits`] | Capability traits and the connector registry |
//! | [`checkpoint`] | Checkpoint envelopes and two-phase checkpoint output |
//! | [`error`] | Error taxonomy and validation classifier |
//! | [`paginate`] | Offset pagination over time-filtered listings |
//! | [`rate_limit`] | Injectable request pacing |
//! | [`client`] | Authenticated wiki API client |
//! | [`html`] | HTML to text |
//! | [`connector_wiki`] | Wiki connector |
//! | [`progress`] | Progress reporting |
//! | [`config`] | TOML configuration parsing |
//! | [`sync`] | Sync driver |
//! | [`sources`] | Connector listing |

pub mod checkpoint;
pub mod client;
pub mod config;
pub mod connector_wiki;
pub mod error;
pub mod html;
pub mod models;
pub mod paginate;
pub mod progress;
pub mod rate_limit;
pub mod sources;
pub mod sync;
pub mod traits;
