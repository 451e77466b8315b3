use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::error::ObservationError;
use crate::observe::{
    CoordinatorSettings, ObservationCoordinator, ObservationReceipt, ObservationRequest,
    PollerSettings, StatusPoller,
};

use super::connector;
use super::status::print_status;

pub async fn observe(config: &Config, request: ObservationRequest, wait: bool) -> Result<()> {
    let coordinator = Arc::new(ObservationCoordinator::new(
        connector(config),
        config.service_directory(),
        CoordinatorSettings::from_config(config),
    ));

    println!(
        "Pointing {} to RA {} DEC {} ({})",
        config.observatory.server, request.right_ascension, request.declination, request.epoch
    );

    let handle = coordinator.spawn(request);
    let cancel = handle.cancellation_token();
    let interrupt = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let result = handle.wait().await;
    interrupt.abort();

    let receipt = started(result)?;

    println!("Exposure started");
    println!("  Run: {}", receipt.run_id);
    println!("  Images: {}*", receipt.base_filename);
    println!("  Slew took {:.0}s", receipt.slew_secs);
    println!(
        "  Expected done at {} (~{}s)",
        receipt.estimated_completion.format("%H:%M:%S UTC"),
        receipt.estimated_secs
    );

    if wait {
        let poller = StatusPoller::new(
            connector(config),
            config.service_directory(),
            PollerSettings::from_config(config),
        );
        let cancel = CancellationToken::new();
        let interrupt = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
        let result = poller.wait_until_idle(&cancel, print_status).await;
        interrupt.abort();

        match result {
            Ok(_) => println!("Image ready: {}", receipt.base_filename),
            Err(ObservationError::Cancelled) => println!("Stopped waiting; exposure continues"),
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

/// Refusals fail the command so scripts can tell them from a started run.
fn started(
    result: Result<ObservationReceipt, ObservationError>,
) -> Result<ObservationReceipt> {
    match result {
        Ok(receipt) => Ok(receipt),
        Err(ObservationError::ObservationInProgress) => anyhow::bail!(
            "The telescope is busy with another observation. Try again later \
             (check progress with: utslink status)"
        ),
        Err(ObservationError::ObservatoryUnavailable(reason)) => {
            anyhow::bail!("Observatory unavailable ({}). Try again later.", reason)
        }
        Err(e) => Err(e.into()),
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Interrupted, cancelling");
        cancel.cancel();
    }
}
