use async_trait::async_trait;
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::Arc;

use super::config::{ConnectorKind, DbConfig};
use super::connector::Connector;
use super::error::{DbError, Result};

/// Name of the connection opened by `connect()`.
pub const DEFAULT_CONNECTION: &str = "default";

/// Thin adapter over a database client library.
///
/// An engine knows how to open, probe and close a single physical handle.
/// Naming, caching and lifecycle live in [`Connector`].
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// Physical connection handle. Clones must refer to the same connection.
    type Handle: Clone + Send + Sync + 'static;

    /// Human readable engine name, used in errors and logs.
    fn name(&self) -> &'static str;

    /// URI scheme used when synthesizing a connection string.
    fn scheme(&self) -> &'static str;

    /// Options applied before any user supplied options.
    fn default_options(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Open a physical connection to `uri`.
    async fn open(&self, uri: &str) -> Result<Self::Handle>;

    /// Close a physical connection.
    async fn close(&self, handle: Self::Handle) -> Result<()>;

    /// Round-trip to the server.
    /// Engines without a health probe return `Unimplemented`.
    async fn ping(&self, handle: &Self::Handle) -> Result<()> {
        let _ = handle;
        Err(DbError::Unimplemented("ping"))
    }
}

/// Outcome of closing one named connection
#[derive(Debug)]
pub struct CloseOutcome {
    pub name: String,
    pub result: Result<()>,
}

/// Aggregated outcome of `close_connections`
#[derive(Debug, Default)]
pub struct CloseReport {
    pub outcomes: Vec<CloseOutcome>,
}

impl CloseReport {
    pub fn is_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Names of connections that closed cleanly.
    pub fn closed(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| o.name.as_str())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &DbError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.name.as_str(), e)))
    }

    /// Number of closed connections, or the first failure.
    pub fn into_result(self) -> Result<usize> {
        let count = self.outcomes.len();
        for outcome in self.outcomes {
            outcome.result?;
        }
        Ok(count)
    }
}

/// Engine-independent view of a connector, as stored in the registry
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Engine name of the underlying connector.
    fn engine(&self) -> &'static str;

    /// Open a connection under `name`, replacing any existing one.
    async fn create_connection(&self, name: &str, uri: Option<&str>) -> Result<()>;

    /// Open the default connection from configuration.
    async fn connect(&self) -> Result<()> {
        self.create_connection(DEFAULT_CONNECTION, None).await
    }

    /// Health probe on a cached connection.
    async fn ping(&self, name: Option<&str>) -> Result<()>;

    fn has_connection(&self, name: &str) -> bool;

    fn connection_names(&self) -> Vec<String>;

    /// URI that `create_connection` would use, with options merged.
    fn uri_for(&self, uri: Option<&str>) -> Result<String>;

    /// Close every cached connection.
    async fn close_connections(&self) -> CloseReport;

    /// Upcast for typed lookups.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Factory function - creates the right connector based on the configured kind
pub fn create_driver(config: Arc<DbConfig>) -> Result<Arc<dyn Driver>> {
    if !config.connector.is_available() {
        return Err(DbError::DriverNotAvailable(config.connector.feature_name()));
    }

    match config.connector {
        #[cfg(feature = "mongodb")]
        ConnectorKind::DocumentStore => Ok(Arc::new(Connector::new(
            super::drivers::mongo::MongoEngine::new(),
            config,
        )?)),

        #[cfg(feature = "postgres")]
        ConnectorKind::Relational => Ok(Arc::new(Connector::new(
            super::drivers::postgres::PostgresEngine::new(),
            config,
        )?)),

        // Fallback for when feature not compiled
        #[allow(unreachable_patterns)]
        _ => Err(DbError::DriverNotAvailable(config.connector.feature_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_report_aggregates() {
        let report = CloseReport {
            outcomes: vec![
                CloseOutcome {
                    name: "default".to_string(),
                    result: Ok(()),
                },
                CloseOutcome {
                    name: "replica".to_string(),
                    result: Err(DbError::Timeout(std::time::Duration::from_secs(1))),
                },
            ],
        };

        assert!(!report.is_ok());
        assert_eq!(report.closed().collect::<Vec<_>>(), vec!["default"]);
        assert_eq!(report.failures().count(), 1);
        assert!(matches!(report.into_result(), Err(DbError::Timeout(_))));
    }

    #[test]
    fn test_empty_report_is_ok() {
        let report = CloseReport::default();
        assert!(report.is_ok());
        assert_eq!(report.into_result().unwrap(), 0);
    }

    #[cfg(feature = "mongodb")]
    #[test]
    fn test_factory_builds_configured_engine() {
        let config = DbConfig::new(ConnectorKind::DocumentStore, "localhost", 27017, "app");
        let driver = create_driver(Arc::new(config)).unwrap();
        assert_eq!(driver.engine(), "MongoDB");
        assert!(driver.connection_names().is_empty());
    }
}
