use buildtree_core::api::{ConfigError, CoordinatorError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("scenario error: {0}")]
    Scenario(String),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error("command failed: {0}")]
    Command(String),
}
