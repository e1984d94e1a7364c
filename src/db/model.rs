//! Models bound to a named connection.
//!
//! A concrete model implements [`Model`]: it names its connector, describes
//! its schema and knows how to build the engine's native model object. A
//! [`ModelHandle`] ties the model to a [`DriverManager`] and a connection
//! name, and builds the native object lazily on first use.
//!
//! Native objects are cached in the manager per
//! `(connector, connection, model name)`, so every handle of one model on
//! one connection shares a single native object and different models never
//! collide.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use convert_case::{Case, Casing};
use tracing::debug;

use super::connector::Connector;
use super::driver::{Engine, DEFAULT_CONNECTION};
use super::error::{DbError, Result};
use super::manager::DriverManager;

/// A logical entity type backed by one connector.
pub trait Model: Send + Sync + Sized + 'static {
    /// Engine of the connector this model uses.
    type Engine: Engine;

    /// Native model object produced by the engine's client library.
    type Native: Clone + Send + Sync + 'static;

    /// Schema description handed to `create_model`.
    type Schema;

    /// Key of the connector in the [`DriverManager`].
    fn db_connector(&self) -> &str;

    fn schema(&self) -> Self::Schema;

    /// Build the native model against a live connection.
    fn create_model(&self, binding: &Binding<'_, Self>) -> Result<Self::Native>;

    /// Explicit model name. Defaults to the type name.
    fn model_name(&self) -> Option<&str> {
        None
    }

    /// Explicit collection or table name. Defaults to the pluralized
    /// snake_case model name.
    fn db_name(&self) -> Option<&str> {
        None
    }
}

/// Everything `create_model` needs to bind a schema to a connection
pub struct Binding<'a, M: Model> {
    pub connection: &'a <M::Engine as Engine>::Handle,
    pub connection_name: &'a str,
    pub model_name: &'a str,
    pub db_name: &'a str,
}

/// Cache key for a native model
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub connector: String,
    pub connection: String,
    pub model: String,
}

struct CachedModel {
    /// Generation of the connection the native model was built on.
    generation: u64,
    native: Box<dyn Any + Send + Sync>,
}

/// Native model objects shared across handles
///
/// Each entry remembers the connection generation it was built against.
/// Once the connection is replaced the entry no longer matches and the
/// next caller rebuilds it.
#[derive(Default)]
pub struct ModelCache {
    entries: RwLock<HashMap<ModelKey, CachedModel>>,
}

impl ModelCache {
    /// Cached native model for `key` built on connection `generation`, if any.
    pub fn get<T: Clone + 'static>(&self, key: &ModelKey, generation: u64) -> Result<Option<T>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) if entry.generation == generation => entry
                .native
                .downcast_ref::<T>()
                .cloned()
                .map(Some)
                .ok_or_else(|| DbError::ModelTypeMismatch(key.model.clone())),
            _ => Ok(None),
        }
    }

    /// Store `value` unless another caller already cached a model for the
    /// same generation, and return whichever value is cached. Entries from
    /// older generations are replaced; a value from an older generation than
    /// the cached one is returned without being stored.
    pub fn insert_or_get<T: Clone + Send + Sync + 'static>(
        &self,
        key: ModelKey,
        generation: u64,
        value: T,
    ) -> Result<T> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&key) {
            Some(entry) if entry.generation == generation => {
                return entry
                    .native
                    .downcast_ref::<T>()
                    .cloned()
                    .ok_or(DbError::ModelTypeMismatch(key.model));
            }
            Some(entry) if entry.generation > generation => return Ok(value),
            _ => {}
        }

        entries.insert(
            key,
            CachedModel {
                generation,
                native: Box::new(value.clone()),
            },
        );
        Ok(value)
    }

    pub fn remove(&self, key: &ModelKey) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Drop every model bound to a connector.
    pub fn evict_connector(&self, connector: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key, _| key.connector != connector);
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A model bound to a [`DriverManager`] and a connection name
pub struct ModelHandle<M: Model> {
    manager: Arc<DriverManager>,
    model: M,
    connection: String,
    model_name: String,
    db_name: String,
}

impl<M: Model> ModelHandle<M> {
    pub fn new(manager: Arc<DriverManager>, model: M) -> Self {
        let model_name = model
            .model_name()
            .map(str::to_string)
            .unwrap_or_else(type_name::<M>);
        let db_name = model
            .db_name()
            .map(str::to_string)
            .unwrap_or_else(|| pluralize(&model_name.to_case(Case::Snake)));

        Self {
            manager,
            model,
            connection: DEFAULT_CONNECTION.to_string(),
            model_name,
            db_name,
        }
    }

    pub fn inner(&self) -> &M {
        &self.model
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn connection_name(&self) -> &str {
        &self.connection
    }

    /// Connector registered under the model's `db_connector` key.
    pub fn connector(&self) -> Result<Arc<Connector<M::Engine>>> {
        self.manager.connector::<M::Engine>(self.model.db_connector())
    }

    /// The connection this model is bound to.
    pub fn connection(&self) -> Result<<M::Engine as Engine>::Handle> {
        self.connector()?.connection(self.connection.as_str())
    }

    /// Native model object, built on first use and cached.
    ///
    /// A model cached against a connection that has since been replaced is
    /// rebuilt on the live one.
    pub fn model(&self) -> Result<M::Native> {
        let (connection, generation) = self.connector()?.connection_entry(self.connection.as_str())?;
        let key = self.cache_key();
        if let Some(native) = self.manager.models().get::<M::Native>(&key, generation)? {
            return Ok(native);
        }

        let binding: Binding<'_, M> = Binding {
            connection: &connection,
            connection_name: &self.connection,
            model_name: &self.model_name,
            db_name: &self.db_name,
        };
        let native = self.model.create_model(&binding)?;
        debug!(
            model = %self.model_name,
            connector = %key.connector,
            connection = %self.connection,
            generation,
            "Native model created"
        );

        self.manager.models().insert_or_get(key, generation, native)
    }

    /// Switch to another connection. The next `model()` call rebuilds the
    /// native model on it.
    pub fn set_connection(&mut self, name: impl Into<String>) -> &mut Self {
        self.connection = name.into();
        self.reset_model()
    }

    /// Drop the cached native model for the current connection.
    pub fn reset_model(&mut self) -> &mut Self {
        let key = self.cache_key();
        self.manager.models().remove(&key);
        self
    }

    fn cache_key(&self) -> ModelKey {
        ModelKey {
            connector: self.model.db_connector().to_string(),
            connection: self.connection.clone(),
            model: self.model_name.clone(),
        }
    }
}

impl<M: Model> std::fmt::Debug for ModelHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model", &self.model_name)
            .field("db_name", &self.db_name)
            .field("connector", &self.model.db_connector())
            .field("connection", &self.connection)
            .finish()
    }
}

/// Last path segment of a type name, without generic arguments.
fn type_name<T>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// English plural of a snake_case name, applied to its last word.
pub fn pluralize(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    let lower = name.to_ascii_lowercase();

    if let Some(stem) = lower.strip_suffix('y') {
        let before = stem.chars().last();
        if before.is_some_and(|c| !"aeiou".contains(c)) {
            return format!("{}ies", &name[..name.len() - 1]);
        }
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        return format!("{name}es");
    }
    format!("{name}s")
}
