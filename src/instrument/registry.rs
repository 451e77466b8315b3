use std::collections::HashMap;

use tracing::debug;

use crate::net::{Endpoint, Transport};

use super::client::{ClientTimeouts, ServiceClient};
use super::directory::ServiceDirectory;
use super::role::{Mode, Role, RoleKey};

/// The instrument services of one server, looked up by role and mode
#[derive(Debug, Clone)]
pub struct InstrumentRegistry {
    server: String,
    endpoints: HashMap<RoleKey, Endpoint>,
}

impl InstrumentRegistry {
    /// Resolve `server` through the directory. `None` when it is offline.
    pub fn resolve<D>(directory: &D, server: &str) -> Option<Self>
    where
        D: ServiceDirectory + ?Sized,
    {
        let entries = directory.resolve(server)?;

        let endpoints: HashMap<RoleKey, Endpoint> = entries
            .into_iter()
            .filter_map(|(key, endpoint)| match RoleKey::parse(&key) {
                Some(role_key) => Some((role_key, endpoint)),
                None => {
                    debug!("Ignoring unknown directory entry {} for {}", key, server);
                    None
                }
            })
            .collect();

        if endpoints.is_empty() {
            return None;
        }

        Some(Self {
            server: server.to_string(),
            endpoints,
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn endpoint(&self, role: Role, mode: Mode) -> Option<&Endpoint> {
        self.endpoints.get(&RoleKey::new(role, mode))
    }

    /// A disconnected client for the role, if the server exposes it
    pub fn client<T: Transport>(
        &self,
        role: Role,
        mode: Mode,
        timeouts: ClientTimeouts,
    ) -> Option<ServiceClient<T>> {
        let endpoint = self.endpoint(role, mode)?.clone();
        Some(ServiceClient::new(role, endpoint, timeouts))
    }

    /// All entries, ordered by role key
    pub fn entries(&self) -> Vec<(RoleKey, &Endpoint)> {
        let mut entries: Vec<_> = self.endpoints.iter().map(|(k, v)| (*k, v)).collect();
        entries.sort_by_key(|(key, _)| key.to_string());
        entries
    }
}
