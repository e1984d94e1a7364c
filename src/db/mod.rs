pub mod config;
pub mod connector;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod manager;
pub mod model;
pub mod uri;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, ConnectorKind, DbConfig};
pub use connector::Connector;
pub use driver::{CloseOutcome, CloseReport, Driver, Engine, DEFAULT_CONNECTION};
pub use error::{DbError, Result};
pub use manager::DriverManager;
pub use model::{Binding, Model, ModelCache, ModelHandle, ModelKey};
