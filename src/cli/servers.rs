use anyhow::Result;

use crate::config::Config;
use crate::instrument::InstrumentRegistry;

pub fn list_servers(config: &Config) -> Result<()> {
    let server = &config.observatory.server;
    let directory = config.service_directory();
    let Some(registry) = InstrumentRegistry::resolve(&directory, server) else {
        println!("No services configured for {}", server);
        println!("Add a [directory.\"{}\"] table to the config file", server);
        return Ok(());
    };

    println!("{}:", registry.server());
    for (key, endpoint) in registry.entries() {
        println!("  {:<12} {}", key.to_string(), endpoint);
    }

    let mut others: Vec<_> = directory
        .servers()
        .filter(|name| *name != server.as_str())
        .collect();
    others.sort_unstable();
    if !others.is_empty() {
        println!();
        println!("Other servers:");
        for name in others {
            println!("  {}", name);
        }
    }

    Ok(())
}
