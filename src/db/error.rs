use std::time::Duration;
use thiserror::Error;

use super::config::ConfigError;

/// Boxed native error from an engine's client library.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while acquiring connections and models
#[derive(Error, Debug)]
pub enum DbError {
    #[error("A connection for the key '{0}' is not found")]
    ConnectionNotFound(String),
    #[error("Driver '{0}' is not registered")]
    DriverNotRegistered(String),
    #[error("{engine} {action} failed: {source}")]
    Operation {
        engine: &'static str,
        action: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("{0} is not implemented")]
    Unimplemented(&'static str),
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),
    #[error("Driver not available: {0} (not compiled)")]
    DriverNotAvailable(&'static str),
    #[error("Unknown connector '{0}'")]
    UnknownConnector(String),
    #[error("Driver '{key}' is not a {expected} connector")]
    DriverTypeMismatch { key: String, expected: &'static str },
    #[error("Model '{0}' is cached with a different native type")]
    ModelTypeMismatch(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DbError {
    /// Wrap a native client error raised while performing `action`.
    pub fn operation(
        engine: &'static str,
        action: &'static str,
        source: impl Into<BoxError>,
    ) -> Self {
        DbError::Operation {
            engine,
            action,
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
