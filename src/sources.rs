use anyhow::Result;

use crate::config::Config;
use crate::traits::ConnectorRegistry;

pub fn list_sources(config: &Config) -> Result<()> {
    let registry = ConnectorRegistry::from_config(config);

    println!("{:<20} {:<8} CAPABILITIES", "CONNECTOR", "SOURCE");
    if registry.is_empty() {
        println!("(no connectors configured)");
        return Ok(());
    }

    for connector in registry.connectors() {
        let capabilities: Vec<&str> = connector
            .capabilities()
            .iter()
            .map(|c| c.as_str())
            .collect();
        println!(
            "{:<20} {:<8} {}",
            connector.name(),
            connector.source(),
            capabilities.join(",")
        );
    }

    Ok(())
}
