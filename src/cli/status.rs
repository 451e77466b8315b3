use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::ObservationError;
use crate::instrument::StaticDirectory;
use crate::net::TcpConnector;
use crate::observe::{ObservatoryStatus, PollerSettings, StatusPoller};

use super::connector;

fn poller(config: &Config) -> StatusPoller<TcpConnector, StaticDirectory> {
    StatusPoller::new(
        connector(config),
        config.service_directory(),
        PollerSettings::from_config(config),
    )
}

pub(super) fn print_status(status: &ObservatoryStatus) {
    let state = |busy: bool| if busy { "busy" } else { "idle" };

    println!(
        "[{}] {}: telescope {}, camera {}",
        status.checked_at.format("%H:%M:%S"),
        status.server,
        state(status.telescope_busy),
        state(status.ccd_busy)
    );

    if let (Some(count), Some(seconds)) = (status.exposure_count, status.exposure_seconds) {
        print!("  {} x {}s exposures", count, seconds);
        match status.estimated_secs {
            Some(total) => println!(", about {}s in total", total),
            None => println!(),
        }
    }
}

pub async fn show_status(config: &Config, json: bool) -> Result<()> {
    let status = match poller(config).snapshot().await {
        Ok(status) => status,
        Err(ObservationError::ObservatoryUnavailable(reason)) => {
            if json {
                println!("{}", serde_json::json!({ "available": false, "reason": reason }));
            } else {
                println!("Observatory unavailable: {}", reason);
            }
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
        if !status.is_busy() {
            println!("Ready for a new observation");
        }
    }
    Ok(())
}

pub async fn watch(config: &Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let result = poller(config).wait_until_idle(&cancel, print_status).await;
    interrupt.abort();

    match result {
        Ok(_) => {
            println!("Instrument idle, image ready to archive");
            Ok(())
        }
        Err(ObservationError::Cancelled) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
