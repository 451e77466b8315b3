pub mod cli;
pub mod config;
pub mod error;
pub mod instrument;
pub mod net;
pub mod observe;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{ClientError, ObservationError};
