use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ObservationError;
use crate::instrument::{
    ClientTimeouts, InstrumentRegistry, Mode, Reply, Role, RoleKey, ServiceClient,
    ServiceDirectory,
};
use crate::net::{Connector, Transport};

use super::coordinator::open_client;
use super::request::estimate_duration;

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub server: String,
    pub client_timeouts: ClientTimeouts,
    pub interval: Duration,
    pub pointing_time: Duration,
    pub ccd_read_time: Duration,
}

impl PollerSettings {
    pub fn from_config(config: &Config) -> Self {
        let obs = &config.observation;
        Self {
            server: config.observatory.server.clone(),
            client_timeouts: config.timeouts.client(),
            interval: Duration::from_secs(obs.status_interval_secs),
            pointing_time: Duration::from_secs(obs.pointing_time_secs),
            ccd_read_time: Duration::from_secs(obs.ccd_read_time_secs),
        }
    }
}

/// One reading of the instrument's busy state
#[derive(Debug, Clone, Serialize)]
pub struct ObservatoryStatus {
    pub server: String,
    pub telescope_busy: bool,
    pub ccd_busy: bool,
    pub exposure_count: Option<u32>,
    pub exposure_seconds: Option<u32>,
    pub estimated_secs: Option<u64>,
    pub checked_at: DateTime<Utc>,
}

impl ObservatoryStatus {
    pub fn is_busy(&self) -> bool {
        self.telescope_busy || self.ccd_busy
    }
}

/// Reads instrument state on fresh status connections.
pub struct StatusPoller<C, D> {
    connector: C,
    directory: D,
    settings: PollerSettings,
}

impl<C, D> StatusPoller<C, D>
where
    C: Connector,
    D: ServiceDirectory,
{
    pub fn new(connector: C, directory: D, settings: PollerSettings) -> Self {
        Self {
            connector,
            directory,
            settings,
        }
    }

    pub async fn snapshot(&self) -> Result<ObservatoryStatus, ObservationError> {
        let registry = InstrumentRegistry::resolve(&self.directory, &self.settings.server)
            .ok_or_else(|| {
                ObservationError::ObservatoryUnavailable(format!(
                    "no services registered for {}",
                    self.settings.server
                ))
            })?;

        let telescope_busy = self.read_busy(&registry, Role::Telescope).await?;
        let ccd_busy = self.read_busy(&registry, Role::Ccd).await?;

        let mut status = ObservatoryStatus {
            server: registry.server().to_string(),
            telescope_busy,
            ccd_busy,
            exposure_count: None,
            exposure_seconds: None,
            estimated_secs: None,
            checked_at: Utc::now(),
        };

        if status.is_busy() {
            self.read_exposure(&registry, &mut status).await;
        }
        Ok(status)
    }

    /// Snapshot every interval until both roles are idle.
    ///
    /// Cancellation is honored between snapshots so that every status
    /// connection is closed with QUIT; a snapshot is bounded by read timeouts.
    pub async fn wait_until_idle<F>(
        &self,
        cancel: &CancellationToken,
        mut on_update: F,
    ) -> Result<ObservatoryStatus, ObservationError>
    where
        F: FnMut(&ObservatoryStatus),
    {
        loop {
            if cancel.is_cancelled() {
                return Err(ObservationError::Cancelled);
            }
            let status = self.snapshot().await?;
            on_update(&status);

            if !status.is_busy() {
                info!("Instrument idle, image ready to archive");
                return Ok(status);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ObservationError::Cancelled),
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }
    }

    async fn read_busy(
        &self,
        registry: &InstrumentRegistry,
        role: Role,
    ) -> Result<bool, ObservationError> {
        let mut client = self.open(registry, role).await?;
        let busy = client.is_busy().await;
        client.disconnect().await;
        busy.map_err(|e| {
            ObservationError::ObservatoryUnavailable(format!("{} busy check failed: {}", role, e))
        })
    }

    /// Best effort: a missing sync service only drops the estimate.
    async fn read_exposure(&self, registry: &InstrumentRegistry, status: &mut ObservatoryStatus) {
        let mut sync = match self.open(registry, Role::Sync).await {
            Ok(client) => client,
            Err(e) => {
                debug!("No exposure details: {}", e);
                return;
            }
        };

        status.exposure_count = read_number(&mut sync, "NEXP").await;
        status.exposure_seconds = read_number(&mut sync, "EXPTIME").await;
        sync.disconnect().await;

        if let (Some(count), Some(seconds)) = (status.exposure_count, status.exposure_seconds) {
            let estimate = estimate_duration(
                self.settings.pointing_time,
                self.settings.ccd_read_time,
                u64::from(seconds),
                u64::from(count),
            );
            status.estimated_secs = Some(estimate.as_secs());
        }
    }

    async fn open(
        &self,
        registry: &InstrumentRegistry,
        role: Role,
    ) -> Result<ServiceClient<C::Transport>, ObservationError> {
        open_client(
            &self.connector,
            registry,
            RoleKey::new(role, Mode::Status),
            self.settings.client_timeouts,
        )
        .await
    }
}

async fn read_number<T: Transport>(client: &mut ServiceClient<T>, property: &str) -> Option<u32> {
    match client.get_status(property).await {
        Ok(Reply::Value(value)) => match value.trim().parse() {
            Ok(n) => Some(n),
            Err(_) => {
                warn!("{} is not a number: {:?}", property, value);
                None
            }
        },
        Ok(Reply::Error) => None,
        Err(e) => {
            debug!("Reading {} failed: {}", property, e);
            None
        }
    }
}
