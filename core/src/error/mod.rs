#[allow(clippy::module_inception)]
pub mod error;
pub mod config;

pub use config::ConfigError;
pub use error::CoordinatorError;
