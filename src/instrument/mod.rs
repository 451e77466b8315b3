mod client;
mod directory;
mod registry;
mod role;

pub use client::{ClientState, ClientTimeouts, ProgressSink, Reply, ServiceClient};
pub use directory::{ServerMap, ServiceDirectory, StaticDirectory};
pub use registry::InstrumentRegistry;
pub use role::{Mode, Role, RoleDescriptor, RoleKey, is_busy_state};
