use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ClientError, ObservationError};
use crate::instrument::{
    ClientTimeouts, InstrumentRegistry, Mode, Reply, Role, RoleKey, ServiceClient,
    ServiceDirectory,
};
use crate::net::{Connector, Transport};

use super::request::{ObservationRequest, estimate_duration};

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub server: String,
    pub data_dir: PathBuf,
    pub client_timeouts: ClientTimeouts,
    pub slew_poll: Duration,
    pub slew_timeout: Duration,
    pub slew_io_retries: u32,
    pub recheck_after_claim: bool,
    pub pointing_time: Duration,
    pub ccd_read_time: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        let obs = &config.observation;
        Self {
            server: config.observatory.server.clone(),
            data_dir: config.observatory.data_dir.clone(),
            client_timeouts: config.timeouts.client(),
            slew_poll: Duration::from_millis(obs.slew_poll_ms),
            slew_timeout: Duration::from_secs(obs.slew_timeout_secs),
            slew_io_retries: obs.slew_io_retries,
            recheck_after_claim: obs.recheck_after_claim,
            pointing_time: Duration::from_secs(obs.pointing_time_secs),
            ccd_read_time: Duration::from_secs(obs.ccd_read_time_secs),
        }
    }
}

/// What a successful run handed to the instrument
#[derive(Debug, Clone, Serialize)]
pub struct ObservationReceipt {
    pub run_id: Uuid,
    pub base_filename: String,
    pub started_at: DateTime<Utc>,
    pub slew_secs: f64,
    pub estimated_secs: u64,
    pub estimated_completion: DateTime<Utc>,
}

/// Open a client for `role` in `mode`, mapping every failure to unavailability.
pub(crate) async fn open_client<C: Connector>(
    connector: &C,
    registry: &InstrumentRegistry,
    key: RoleKey,
    timeouts: ClientTimeouts,
) -> Result<ServiceClient<C::Transport>, ObservationError> {
    let mut client = registry
        .client(key.role, key.mode, timeouts)
        .ok_or_else(|| {
            ObservationError::ObservatoryUnavailable(format!(
                "{} has no {} service",
                registry.server(),
                key
            ))
        })?;

    if let Err(e) = client.connect(connector).await {
        warn!("Could not open {} at {}: {}", key, client.endpoint(), e);
        return Err(ObservationError::ObservatoryUnavailable(format!(
            "{}: {}",
            key, e
        )));
    }
    Ok(client)
}

/// Control connections held for the duration of a run
struct Claim<T: Transport> {
    sync: ServiceClient<T>,
    ccd: ServiceClient<T>,
    telescope: ServiceClient<T>,
}

impl<T: Transport> Claim<T> {
    async fn release(&mut self) {
        self.telescope.disconnect().await;
        self.ccd.disconnect().await;
        self.sync.disconnect().await;
    }
}

/// Runs point-and-expose sequences against the shared instrument.
///
/// Exclusion between clients is advisory: a run only starts when both the
/// telescope and the camera report an idle state, and nothing stops two
/// coordinators that check at the same moment.
pub struct ObservationCoordinator<C, D> {
    connector: C,
    directory: D,
    settings: CoordinatorSettings,
}

impl<C, D> ObservationCoordinator<C, D>
where
    C: Connector,
    D: ServiceDirectory,
{
    pub fn new(connector: C, directory: D, settings: CoordinatorSettings) -> Self {
        Self {
            connector,
            directory,
            settings,
        }
    }

    /// Stage the request, slew, and trigger the exposure.
    ///
    /// Returns once the exposure has started; completion is observed
    /// separately through the status poller.
    pub async fn point_and_expose(
        &self,
        request: &ObservationRequest,
        cancel: &CancellationToken,
    ) -> Result<ObservationReceipt, ObservationError> {
        request.validate()?;

        let run_id = Uuid::now_v7();
        info!(
            "Observation {}: {} at RA {} DEC {}",
            run_id,
            request.label(),
            request.right_ascension,
            request.declination
        );

        let registry = InstrumentRegistry::resolve(&self.directory, &self.settings.server)
            .ok_or_else(|| {
                ObservationError::ObservatoryUnavailable(format!(
                    "no services registered for {}",
                    self.settings.server
                ))
            })?;

        self.ensure_idle(&registry).await?;

        let mut claim = self.claim(&registry).await?;
        let result = self.run(&mut claim, request, run_id, cancel).await;
        claim.release().await;

        match &result {
            Ok(receipt) => info!(
                "Observation {} exposing, expected done at {}",
                run_id, receipt.estimated_completion
            ),
            Err(e) => warn!("Observation {} aborted: {}", run_id, e),
        }
        result
    }

    async fn open(
        &self,
        registry: &InstrumentRegistry,
        role: Role,
        mode: Mode,
    ) -> Result<ServiceClient<C::Transport>, ObservationError> {
        open_client(
            &self.connector,
            registry,
            RoleKey::new(role, mode),
            self.settings.client_timeouts,
        )
        .await
    }

    /// Busy check on fresh status connections, released before returning.
    async fn ensure_idle(&self, registry: &InstrumentRegistry) -> Result<(), ObservationError> {
        let mut ccd = self.open(registry, Role::Ccd, Mode::Status).await?;
        let mut telescope = match self.open(registry, Role::Telescope, Mode::Status).await {
            Ok(client) => client,
            Err(e) => {
                ccd.disconnect().await;
                return Err(e);
            }
        };

        let ccd_busy = ccd.is_busy().await;
        let telescope_busy = telescope.is_busy().await;
        ccd.disconnect().await;
        telescope.disconnect().await;

        match (ccd_busy, telescope_busy) {
            (Ok(false), Ok(false)) => Ok(()),
            (Ok(_), Ok(_)) => {
                info!("Instrument busy, refusing to start");
                Err(ObservationError::ObservationInProgress)
            }
            (Err(e), _) | (_, Err(e)) => Err(ObservationError::ObservatoryUnavailable(
                format!("busy check failed: {}", e),
            )),
        }
    }

    async fn claim(
        &self,
        registry: &InstrumentRegistry,
    ) -> Result<Claim<C::Transport>, ObservationError> {
        let mut sync = self.open(registry, Role::Sync, Mode::Control).await?;

        let mut ccd = match self.open(registry, Role::Ccd, Mode::Control).await {
            Ok(client) => client,
            Err(e) => {
                sync.disconnect().await;
                return Err(e);
            }
        };

        let telescope = match self.open(registry, Role::Telescope, Mode::Control).await {
            Ok(client) => client,
            Err(e) => {
                ccd.disconnect().await;
                sync.disconnect().await;
                return Err(e);
            }
        };

        Ok(Claim {
            sync,
            ccd,
            telescope,
        })
    }

    async fn run(
        &self,
        claim: &mut Claim<C::Transport>,
        request: &ObservationRequest,
        run_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<ObservationReceipt, ObservationError> {
        // Another client may have started between the status check and the claim
        if self.settings.recheck_after_claim {
            let ccd_busy = claim.ccd.is_busy().await?;
            let telescope_busy = claim.telescope.is_busy().await?;
            if ccd_busy || telescope_busy {
                warn!("Instrument became busy while claiming it");
                return Err(ObservationError::ObservationInProgress);
            }
        }

        let estimate = estimate_duration(
            self.settings.pointing_time,
            self.settings.ccd_read_time,
            u64::from(request.exposure_seconds),
            u64::from(request.exposure_count),
        );
        let started_at = Utc::now();
        let base_filename = request.base_filename(&self.settings.data_dir, &Local::now());
        for (property, value) in request.parameters(&base_filename) {
            stage(&mut claim.sync, property, &value).await?;
        }

        if cancel.is_cancelled() {
            return Err(ObservationError::Cancelled);
        }
        stage(&mut claim.sync, "TELSTART", "NOW").await?;

        let slew = self.wait_for_slew(&mut claim.telescope, cancel).await?;
        info!("Slew finished after {:.1}s", slew.as_secs_f64());

        if cancel.is_cancelled() {
            return Err(ObservationError::Cancelled);
        }
        stage(&mut claim.sync, "CAMSTART", "NOW").await?;

        let estimated_completion = chrono::Duration::from_std(estimate)
            .ok()
            .and_then(|d| started_at.checked_add_signed(d))
            .unwrap_or(started_at);

        Ok(ObservationReceipt {
            run_id,
            base_filename,
            started_at,
            slew_secs: slew.as_secs_f64(),
            estimated_secs: estimate.as_secs(),
            estimated_completion,
        })
    }

    /// Poll the telescope until it stops moving.
    ///
    /// `slew_io_retries` bounds consecutive failed polls; a dropped
    /// connection is reopened before the next poll.
    async fn wait_for_slew(
        &self,
        telescope: &mut ServiceClient<C::Transport>,
        cancel: &CancellationToken,
    ) -> Result<Duration, ObservationError> {
        let started = Instant::now();
        let mut failures = 0u32;

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => return Err(ObservationError::Cancelled),
                polled = self.poll_telescope(telescope) => polled,
            };

            match polled {
                Ok(false) => return Ok(started.elapsed()),
                Ok(true) => {
                    failures = 0;
                    debug!("Telescope still slewing");
                }
                Err(e) if e.is_transient() && failures < self.settings.slew_io_retries => {
                    failures += 1;
                    warn!(
                        "Telescope poll failed ({}/{}): {}",
                        failures, self.settings.slew_io_retries, e
                    );
                }
                Err(e) if e.is_transient() => {
                    warn!("Giving up on telescope after {} failures: {}", failures, e);
                    return Err(ObservationError::SlewTimeout {
                        waited: started.elapsed(),
                    });
                }
                Err(e) => return Err(e.into()),
            }

            if started.elapsed() >= self.settings.slew_timeout {
                return Err(ObservationError::SlewTimeout {
                    waited: started.elapsed(),
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ObservationError::Cancelled),
                _ = tokio::time::sleep(self.settings.slew_poll) => {}
            }
        }
    }

    async fn poll_telescope(
        &self,
        telescope: &mut ServiceClient<C::Transport>,
    ) -> Result<bool, ClientError> {
        if !telescope.is_connected() {
            debug!("Reopening telescope control at {}", telescope.endpoint());
            telescope.connect(&self.connector).await?;
        }
        telescope.is_busy().await
    }
}

impl<C, D> ObservationCoordinator<C, D>
where
    C: Connector + 'static,
    C::Transport: 'static,
    D: ServiceDirectory + 'static,
{
    /// Run the sequence on a background task.
    pub fn spawn(self: Arc<Self>, request: ObservationRequest) -> ObservationHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.point_and_expose(&request, &token).await });
        ObservationHandle { cancel, task }
    }
}

/// A run executing in the background
pub struct ObservationHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<ObservationReceipt, ObservationError>>,
}

impl ObservationHandle {
    /// Ask the run to stop; its connections are still released.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> Result<ObservationReceipt, ObservationError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(ObservationError::Cancelled),
            Err(e) => {
                error!("Observation task failed: {}", e);
                Err(ObservationError::ObservatoryUnavailable(format!(
                    "observation task failed: {}",
                    e
                )))
            }
        }
    }
}

async fn stage<T: Transport>(
    sync: &mut ServiceClient<T>,
    property: &str,
    value: &str,
) -> Result<(), ObservationError> {
    match sync.set_status(property, value).await? {
        Reply::Value(_) => Ok(()),
        Reply::Error => Err(ObservationError::CommandRejected {
            role: Role::Sync,
            property: property.to_string(),
            value: value.to_string(),
        }),
    }
}
