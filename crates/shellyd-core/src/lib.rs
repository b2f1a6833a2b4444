//! Core configuration and filesystem layout for the shellyd daemon.
//!
//! This crate owns the `~/.shellyd/` directory layout, the persisted
//! daemon configuration (including the security profile the mobile client
//! can update), and logging initialization. It contains no networking.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, DEFAULT_HOST, DEFAULT_PORT};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
