mod observe;
mod query;
mod servers;
mod status;

pub use observe::observe;
pub use query::{get_property, notify_property, set_property};
pub use servers::list_servers;
pub use status::{show_status, watch};

use std::sync::Arc;

use crate::config::Config;
use crate::instrument::ProgressSink;
use crate::net::TcpConnector;

fn connector(config: &Config) -> TcpConnector {
    TcpConnector::new(config.timeouts.connect())
}

/// Echo each protocol exchange to stdout
fn progress_printer() -> ProgressSink {
    Arc::new(|line: &str| println!("  {}", line))
}
