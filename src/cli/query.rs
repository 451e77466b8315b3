use anyhow::{Context, Result};

use crate::config::Config;
use crate::instrument::{InstrumentRegistry, Mode, Reply, Role, ServiceClient};
use crate::net::TcpTransport;

use super::{connector, progress_printer};

async fn open(config: &Config, role: Role, mode: Mode) -> Result<ServiceClient<TcpTransport>> {
    let server = &config.observatory.server;
    let registry = InstrumentRegistry::resolve(&config.service_directory(), server)
        .with_context(|| format!("No services configured for {}", server))?;

    let mut client = registry
        .client(role, mode, config.timeouts.client())
        .with_context(|| format!("{} has no {} {} service", server, role, mode))?;
    client.set_verbose(Some(progress_printer()));
    client
        .connect(&connector(config))
        .await
        .with_context(|| format!("Failed to connect to {} {}", role, mode))?;
    Ok(client)
}

fn print_reply(role: Role, property: &str, reply: &Reply) -> Result<()> {
    match reply {
        Reply::Value(value) => {
            println!("{} {} = {}", role, property, value);
            Ok(())
        }
        Reply::Error => anyhow::bail!("{} refused {}", role, property),
    }
}

pub async fn get_property(config: &Config, role: Role, property: &str, mode: Mode) -> Result<()> {
    let mut client = open(config, role, mode).await?;
    let reply = client.get_status(property).await;
    client.disconnect().await;
    print_reply(role, property, &reply?)
}

pub async fn set_property(config: &Config, role: Role, property: &str, value: &str) -> Result<()> {
    let mut client = open(config, role, Mode::Control).await?;
    let reply = client.set_status(property, value).await;
    client.disconnect().await;

    match reply? {
        Reply::Value(_) => {
            println!("{} {} set to {}", role, property, value);
            Ok(())
        }
        Reply::Error => anyhow::bail!("{} rejected {} = {}", role, property, value),
    }
}

/// Block until the role pushes a change of `property`
pub async fn notify_property(config: &Config, role: Role, property: &str) -> Result<()> {
    let mut client = open(config, role, Mode::Status).await?;
    println!("Waiting for {} {} to change...", role, property);
    let reply = client.notify(property).await;
    client.disconnect().await;
    print_reply(role, property, &reply?)
}
