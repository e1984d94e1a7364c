//! Connector registry.
//!
//! The [`DriverManager`] maps connector keys to connectors. By default only
//! the connector named in the configuration is registered; others can be
//! added at runtime under their own keys. The manager also owns the native
//! model cache so models share it through explicit injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::config::{ConnectorKind, DbConfig};
use super::connector::Connector;
use super::driver::{create_driver, CloseReport, Driver, Engine};
use super::error::{DbError, Result};
use super::model::{Model, ModelCache, ModelHandle};

pub struct DriverManager {
    config: Arc<DbConfig>,
    default_driver: String,
    drivers: RwLock<HashMap<String, Arc<dyn Driver>>>,
    /// Replaced connectors that still held connections, closed by `close_all`.
    retired: Mutex<Vec<(String, Arc<dyn Driver>)>>,
    models: ModelCache,
}

impl DriverManager {
    /// Create an empty manager. The configured connector becomes the default
    /// key but is not registered until `register_config_connector`.
    pub fn new(config: DbConfig) -> Self {
        let default_driver = config.connector.key().to_string();
        Self {
            config: Arc::new(config),
            default_driver,
            drivers: RwLock::new(HashMap::new()),
            retired: Mutex::new(Vec::new()),
            models: ModelCache::default(),
        }
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Key of the configured connector.
    pub fn default_driver(&self) -> &str {
        &self.default_driver
    }

    /// Register the connector named in the configuration.
    pub fn register_config_connector(&self) -> Result<()> {
        let key = self.default_driver.clone();
        self.register_connector(&key)
    }

    /// Register the engine named by `key` against this manager's configuration.
    ///
    /// `key` must name a known engine (`"mongodb"`, `"postgres"`, ...). The
    /// connector is stored under `key` as given.
    pub fn register_connector(&self, key: &str) -> Result<()> {
        let kind: ConnectorKind = key
            .parse()
            .map_err(|_| DbError::UnknownConnector(key.to_string()))?;

        let config = if kind == self.config.connector {
            Arc::clone(&self.config)
        } else {
            Arc::new(DbConfig {
                connector: kind,
                ..(*self.config).clone()
            })
        };

        let driver = create_driver(config)?;
        self.register_driver(key, driver);
        Ok(())
    }

    /// Register a secondary connector with its own configuration.
    pub fn register_connector_with(&self, key: &str, config: DbConfig) -> Result<()> {
        config.validate()?;
        let driver = create_driver(Arc::new(config))?;
        self.register_driver(key, driver);
        Ok(())
    }

    /// Store a driver under `key`, replacing any previous registration.
    ///
    /// The replaced driver is returned. If it still holds connections it is
    /// also kept aside so `close_all` closes them.
    pub fn register_driver(&self, key: &str, driver: Arc<dyn Driver>) -> Option<Arc<dyn Driver>> {
        let engine = driver.engine();
        let previous = self
            .drivers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), driver);

        if let Some(previous) = &previous {
            let open = previous.connection_names();
            if !open.is_empty() {
                warn!(connector = %key, connections = ?open, "Replaced connector still has open connections");
                self.retired
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((key.to_string(), Arc::clone(previous)));
            }
            self.models.evict_connector(key);
        }

        info!(connector = %key, engine, "Connector registered");
        previous
    }

    /// Connector registered under `key`.
    pub fn get_driver(&self, key: &str) -> Result<Arc<dyn Driver>> {
        self.drivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| DbError::DriverNotRegistered(key.to_string()))
    }

    /// Connector registered under the configured key.
    pub fn default_connector(&self) -> Result<Arc<dyn Driver>> {
        self.get_driver(&self.default_driver)
    }

    /// Typed connector registered under `key`.
    pub fn connector<E: Engine>(&self, key: &str) -> Result<Arc<Connector<E>>> {
        self.get_driver(key)?
            .as_any()
            .downcast::<Connector<E>>()
            .map_err(|_| DbError::DriverTypeMismatch {
                key: key.to_string(),
                expected: std::any::type_name::<E>(),
            })
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.drivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn driver_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .drivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Bind a model to this manager.
    pub fn model<M: Model>(self: &Arc<Self>, model: M) -> ModelHandle<M> {
        ModelHandle::new(Arc::clone(self), model)
    }

    pub fn models(&self) -> &ModelCache {
        &self.models
    }

    /// Close the connections of every registered connector and drop all
    /// cached models.
    ///
    /// Connectors replaced while they still held connections are closed too;
    /// their outcomes are reported under the key they were registered with.
    pub async fn close_all(&self) -> Vec<(String, CloseReport)> {
        let retired = std::mem::take(&mut *self.retired.lock().unwrap_or_else(PoisonError::into_inner));
        let current: Vec<(String, Arc<dyn Driver>)> = self
            .drivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(key, driver)| (key.clone(), Arc::clone(driver)))
            .collect();

        let closes = retired.into_iter().chain(current).map(|(key, driver)| async move {
            let report = driver.close_connections().await;
            (key, report)
        });

        let mut reports: BTreeMap<String, CloseReport> = BTreeMap::new();
        for (key, report) in join_all(closes).await {
            reports.entry(key).or_default().outcomes.extend(report.outcomes);
        }

        self.models.clear();
        debug!(connectors = reports.len(), "All connectors closed");
        reports.into_iter().collect()
    }
}

impl std::fmt::Debug for DriverManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverManager")
            .field("default_driver", &self.default_driver)
            .field("drivers", &self.driver_keys())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::MemoryEngine;

    fn config() -> DbConfig {
        DbConfig::new(ConnectorKind::DocumentStore, "localhost", 27017, "app")
    }

    fn memory_driver(engine: &MemoryEngine) -> Arc<dyn Driver> {
        Arc::new(Connector::new(engine.clone(), config()).unwrap())
    }

    #[test]
    fn test_unregistered_key_fails() {
        let manager = DriverManager::new(config());
        manager.register_driver("primary", memory_driver(&MemoryEngine::default()));

        let err = manager.get_driver("secondary").err().unwrap();
        assert!(matches!(err, DbError::DriverNotRegistered(ref key) if key == "secondary"));
        assert!(manager.get_driver("primary").is_ok());
    }

    #[test]
    fn test_default_not_registered_until_asked() {
        let manager = DriverManager::new(config());
        assert_eq!(manager.default_driver(), "mongodb");
        assert!(matches!(
            manager.default_connector(),
            Err(DbError::DriverNotRegistered(_))
        ));
    }

    #[test]
    fn test_unknown_engine_key() {
        let manager = DriverManager::new(config());
        assert!(matches!(
            manager.register_connector("cassandra"),
            Err(DbError::UnknownConnector(_))
        ));
        assert!(manager.driver_keys().is_empty());
    }

    #[test]
    fn test_register_replaces() {
        let manager = DriverManager::new(config());
        let first = MemoryEngine::default();
        assert!(manager.register_driver("primary", memory_driver(&first)).is_none());
        assert!(manager.register_driver("primary", memory_driver(&first)).is_some());
        assert_eq!(manager.driver_keys(), vec!["primary"]);
    }

    #[tokio::test]
    async fn test_replaced_connector_is_closed_by_close_all() {
        let manager = DriverManager::new(config());
        let engine = MemoryEngine::default();

        let old = memory_driver(&engine);
        manager.register_driver("docs", Arc::clone(&old));
        old.connect().await.unwrap();
        old.create_connection("replica", None).await.unwrap();

        let new = memory_driver(&engine);
        manager.register_driver("docs", Arc::clone(&new));
        new.connect().await.unwrap();
        assert_eq!(engine.live(), 3);

        let reports = manager.close_all().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "docs");
        assert_eq!(reports[0].1.len(), 3);
        assert!(reports[0].1.is_ok());
        assert_eq!(engine.live(), 0);
        assert!(old.connection_names().is_empty());

        // Nothing is closed twice.
        assert!(manager.close_all().await[0].1.is_empty());
        assert_eq!(engine.closed(), 3);
    }

    #[test]
    fn test_idle_replaced_connector_is_not_retained() {
        let manager = DriverManager::new(config());
        let engine = MemoryEngine::default();
        manager.register_driver("docs", memory_driver(&engine));
        manager.register_driver("docs", memory_driver(&engine));

        assert!(manager.retired.lock().unwrap().is_empty());
    }

    #[test]
    fn test_typed_lookup() {
        let manager = DriverManager::new(config());
        manager.register_driver("primary", memory_driver(&MemoryEngine::default()));

        let connector = manager.connector::<MemoryEngine>("primary").unwrap();
        assert_eq!(connector.config().database, "app");

        assert!(matches!(
            manager.connector::<MemoryEngine>("missing"),
            Err(DbError::DriverNotRegistered(_))
        ));
    }

    #[cfg(feature = "mongodb")]
    #[test]
    fn test_register_config_connector() {
        let manager = DriverManager::new(config());
        manager.register_config_connector().unwrap();

        assert!(manager.is_registered("mongodb"));
        assert_eq!(manager.default_connector().unwrap().engine(), "MongoDB");
        assert!(matches!(
            manager.connector::<MemoryEngine>("mongodb"),
            Err(DbError::DriverTypeMismatch { .. })
        ));
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn test_register_secondary_connector() {
        let manager = DriverManager::new(config());
        let analytics = DbConfig::new(ConnectorKind::Relational, "warehouse", 5432, "events");
        manager.register_connector_with("analytics", analytics).unwrap();

        let driver = manager.get_driver("analytics").unwrap();
        assert_eq!(driver.engine(), "PostgreSQL");
        assert!(driver
            .uri_for(None)
            .unwrap()
            .starts_with("postgres://warehouse:5432/events"));
    }

    #[tokio::test]
    async fn test_close_all() {
        let manager = DriverManager::new(config());
        let engine = MemoryEngine::default();
        manager.register_driver("a", memory_driver(&engine));
        manager.register_driver("b", memory_driver(&engine));

        manager.get_driver("a").unwrap().connect().await.unwrap();
        let b = manager.get_driver("b").unwrap();
        b.connect().await.unwrap();
        b.create_connection("replica", None).await.unwrap();

        let reports = manager.close_all().await;
        let keys: Vec<_> = reports.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(reports[1].1.len(), 2);
        assert!(reports.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(engine.live(), 0);
    }
}
