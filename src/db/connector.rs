//! Named connection cache over a single engine.
//!
//! A [`Connector`] creates physical connections lazily under logical names,
//! hands out the cached handle on lookup and closes everything in bulk on
//! shutdown. Creation for a given name is serialized so two concurrent
//! callers can never leave an orphaned handle behind.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::config::DbConfig;
use super::driver::{CloseOutcome, CloseReport, Driver, Engine, DEFAULT_CONNECTION};
use super::error::{DbError, Result};
use super::uri::{merge_options, synthesize};

type Gate = Arc<tokio::sync::Mutex<()>>;

/// A cached connection and the generation it was opened in.
struct Slot<H> {
    handle: H,
    generation: u64,
}

pub struct Connector<E: Engine> {
    engine: E,
    config: Arc<DbConfig>,
    timeout: Duration,
    connections: RwLock<HashMap<String, Slot<E::Handle>>>,
    /// Per-name creation gates, present only while someone holds them.
    gates: Mutex<HashMap<String, Gate>>,
    next_generation: AtomicU64,
}

impl<E: Engine> Connector<E> {
    /// Create a connector. Fails if the configured timeout is invalid.
    pub fn new(engine: E, config: impl Into<Arc<DbConfig>>) -> Result<Self> {
        let config = config.into();
        let timeout = config.timeout()?;

        Ok(Self {
            engine,
            config,
            timeout,
            connections: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open a connection and cache it under `name`.
    ///
    /// Without a `uri` one is built from the configuration. An existing
    /// connection under the same name is closed once its replacement is open.
    pub async fn create_connection(&self, name: &str, uri: Option<&str>) -> Result<E::Handle> {
        let gate = self.gate(name);
        let result = {
            let _guard = gate.lock().await;
            self.open_and_swap(name, uri).await
        };
        self.release_gate(name, gate);
        result
    }

    /// Open the `"default"` connection from configuration.
    pub async fn connect(&self) -> Result<E::Handle> {
        self.create_connection(DEFAULT_CONNECTION, None).await
    }

    /// Cached connection for `name`, or `"default"` when `None`.
    pub fn connection<'a>(&self, name: impl Into<Option<&'a str>>) -> Result<E::Handle> {
        self.connection_entry(name).map(|(handle, _)| handle)
    }

    /// Cached connection together with its generation. The generation
    /// changes every time the name is bound to a newly opened connection.
    pub fn connection_entry<'a>(&self, name: impl Into<Option<&'a str>>) -> Result<(E::Handle, u64)> {
        let name = name.into().unwrap_or(DEFAULT_CONNECTION);
        self.read()
            .get(name)
            .map(|slot| (slot.handle.clone(), slot.generation))
            .ok_or_else(|| DbError::ConnectionNotFound(name.to_string()))
    }

    pub fn has_connection(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Names of all cached connections, sorted.
    pub fn connection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Round-trip to the server over a cached connection.
    pub async fn ping<'a>(&self, name: impl Into<Option<&'a str>>) -> Result<()> {
        let handle = self.connection(name)?;
        self.bounded(self.engine.ping(&handle)).await
    }

    /// The URI `create_connection` would open, with options merged.
    pub fn uri_for(&self, uri: Option<&str>) -> Result<String> {
        let base = match uri {
            Some(uri) => uri.to_string(),
            None => synthesize(self.engine.scheme(), &self.config)?,
        };
        Ok(merge_options(
            &base,
            &self.engine.default_options(),
            &self.config.options,
        ))
    }

    /// Close every cached connection concurrently.
    ///
    /// Creations already in flight finish first and are closed with the
    /// rest. The cache is emptied before any close starts. One failing close
    /// never stops the others.
    pub async fn close_connections(&self) -> CloseReport {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.extend(self.lock_gates().keys().cloned());
        names.sort();
        names.dedup();

        let gates: Vec<Gate> = names.iter().map(|name| self.gate(name)).collect();
        let mut guards = Vec::with_capacity(gates.len());
        for gate in &gates {
            guards.push(gate.lock().await);
        }
        let mut drained: Vec<(String, E::Handle)> = self
            .write()
            .drain()
            .map(|(name, slot)| (name, slot.handle))
            .collect();
        drop(guards);
        for (name, gate) in names.iter().zip(gates) {
            self.release_gate(name, gate);
        }

        if drained.is_empty() {
            return CloseReport::default();
        }
        drained.sort_by(|a, b| a.0.cmp(&b.0));

        let closes = drained.into_iter().map(|(name, handle)| async move {
            let result = self.bounded(self.engine.close(handle)).await;
            CloseOutcome { name, result }
        });
        let report = CloseReport {
            outcomes: join_all(closes).await,
        };

        for (name, error) in report.failures() {
            warn!(engine = self.engine.name(), connection = %name, error = %error, "Failed to close connection");
        }
        info!(
            engine = self.engine.name(),
            closed = report.closed().count(),
            failed = report.failures().count(),
            "Connections closed"
        );
        report
    }

    // --- Private helpers ---

    /// Open a connection and swap it in. Callers hold the gate for `name`.
    async fn open_and_swap(&self, name: &str, uri: Option<&str>) -> Result<E::Handle> {
        let uri = self.uri_for(uri)?;
        debug!(engine = self.engine.name(), connection = %name, "Opening connection");

        let handle = self.bounded(self.engine.open(&uri)).await?;
        let slot = Slot {
            handle: handle.clone(),
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
        };
        let previous = self.write().insert(name.to_string(), slot);

        if let Some(previous) = previous {
            debug!(engine = self.engine.name(), connection = %name, "Closing replaced connection");
            if let Err(e) = self.bounded(self.engine.close(previous.handle)).await {
                warn!(
                    engine = self.engine.name(),
                    connection = %name,
                    error = %e,
                    "Failed to close replaced connection"
                );
            }
        }

        info!(engine = self.engine.name(), connection = %name, "Connection created");
        Ok(handle)
    }

    fn gate(&self, name: &str) -> Gate {
        Arc::clone(self.lock_gates().entry(name.to_string()).or_default())
    }

    /// Drop the caller's gate and forget it once nobody else holds it.
    fn release_gate(&self, name: &str, gate: Gate) {
        drop(gate);
        let mut gates = self.lock_gates();
        if gates.get(name).is_some_and(|gate| Arc::strong_count(gate) == 1) {
            gates.remove(name);
        }
    }

    fn lock_gates(&self) -> MutexGuard<'_, HashMap<String, Gate>> {
        self.gates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn bounded<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| DbError::Timeout(self.timeout))?
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Slot<E::Handle>>> {
        self.connections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Slot<E::Handle>>> {
        self.connections.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: Engine> std::fmt::Debug for Connector<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("engine", &self.engine.name())
            .field("connections", &self.connection_names())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<E: Engine> Driver for Connector<E> {
    fn engine(&self) -> &'static str {
        self.engine.name()
    }

    async fn create_connection(&self, name: &str, uri: Option<&str>) -> Result<()> {
        Connector::create_connection(self, name, uri).await.map(|_| ())
    }

    async fn ping(&self, name: Option<&str>) -> Result<()> {
        Connector::ping(self, name).await
    }

    fn has_connection(&self, name: &str) -> bool {
        Connector::has_connection(self, name)
    }

    fn connection_names(&self) -> Vec<String> {
        Connector::connection_names(self)
    }

    fn uri_for(&self, uri: Option<&str>) -> Result<String> {
        Connector::uri_for(self, uri)
    }

    async fn close_connections(&self) -> CloseReport {
        Connector::close_connections(self).await
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
