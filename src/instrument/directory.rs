use std::collections::{BTreeMap, HashMap};

use crate::net::Endpoint;

/// Role key (`TELstatus`, `SYNCcontrol`, ...) to endpoint for one server
pub type ServerMap = BTreeMap<String, Endpoint>;

/// Looks up where each instrument service of a server listens.
///
/// `None` means the observatory is offline.
pub trait ServiceDirectory: Send + Sync {
    fn resolve(&self, server: &str) -> Option<ServerMap>;
}

/// Directory backed by a fixed table, usually from the config file
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    servers: HashMap<String, ServerMap>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, server: &str, key: &str, endpoint: Endpoint) {
        self.servers
            .entry(server.to_string())
            .or_default()
            .insert(key.to_string(), endpoint);
    }

    pub fn with_server(mut self, server: &str, entries: ServerMap) -> Self {
        self.servers.insert(server.to_string(), entries);
        self
    }

    pub fn servers(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }
}

impl From<&HashMap<String, ServerMap>> for StaticDirectory {
    fn from(servers: &HashMap<String, ServerMap>) -> Self {
        Self {
            servers: servers.clone(),
        }
    }
}

impl ServiceDirectory for StaticDirectory {
    fn resolve(&self, server: &str) -> Option<ServerMap> {
        self.servers
            .get(server)
            .filter(|entries| !entries.is_empty())
            .cloned()
    }
}
