//! PostgreSQL engine

use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};
use tracing::error;

use crate::db::driver::Engine;
use crate::db::error::{DbError, Result};
use crate::db::model::{Binding, Model};
use crate::db::uri::query_param;

const ENGINE: &str = "PostgreSQL";

/// Registry key used by relational models.
pub const POSTGRES_KEY: &str = "postgres";

/// An open PostgreSQL session and the task driving it
pub struct PgConnection {
    client: Client,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PgConnection {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

impl Deref for PgConnection {
    type Target = Client;

    fn deref(&self) -> &Client {
        &self.client
    }
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostgresEngine;

impl PostgresEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Engine for PostgresEngine {
    type Handle = Arc<PgConnection>;

    fn name(&self) -> &'static str {
        ENGINE
    }

    fn scheme(&self) -> &'static str {
        "postgres"
    }

    fn default_options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert("application_name".to_string(), json!(env!("CARGO_PKG_NAME")));
        options
    }

    async fn open(&self, uri: &str) -> Result<Self::Handle> {
        if !uri.starts_with("postgres://") && !uri.starts_with("postgresql://") {
            return Err(DbError::InvalidConnectionString(
                "PostgreSQL connection string must start with postgres:// or postgresql://".into(),
            ));
        }

        let config: tokio_postgres::Config = uri
            .parse()
            .map_err(|e: tokio_postgres::Error| DbError::operation(ENGINE, "connect", e))?;

        let (client, task) = if query_param(uri, "sslmode").as_deref() == Some("require") {
            let tls = TlsConnector::new().map_err(|e| DbError::operation(ENGINE, "connect", e))?;
            let (client, connection) = config
                .connect(MakeTlsConnector::new(tls))
                .await
                .map_err(|e| DbError::operation(ENGINE, "connect", e))?;
            (client, drive(connection))
        } else {
            let (client, connection) = config
                .connect(NoTls)
                .await
                .map_err(|e| DbError::operation(ENGINE, "connect", e))?;
            (client, drive(connection))
        };

        Ok(Arc::new(PgConnection {
            client,
            task: Mutex::new(Some(task)),
        }))
    }

    async fn close(&self, handle: Self::Handle) -> Result<()> {
        let task = handle
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(task) = task {
            task.abort();
            match task.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => return Err(DbError::operation(ENGINE, "close", e)),
            }
        }
        Ok(())
    }

    async fn ping(&self, handle: &Self::Handle) -> Result<()> {
        handle
            .client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| DbError::operation(ENGINE, "ping", e))?;
        Ok(())
    }
}

/// Spawn the task that drives a connection (required by tokio-postgres).
fn drive<F>(connection: F) -> JoinHandle<()>
where
    F: Future<Output = std::result::Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, "PostgreSQL connection error");
        }
    })
}

/// A model's table on a live connection
#[derive(Debug, Clone)]
pub struct Table {
    connection: Arc<PgConnection>,
    name: String,
}

impl Table {
    pub fn new(connection: Arc<PgConnection>, name: impl Into<String>) -> Self {
        Self {
            connection,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table name as a quoted identifier, schema-qualified when it has a dot.
    pub fn quoted_name(&self) -> String {
        quote_identifier(&self.name)
    }

    pub fn client(&self) -> &Client {
        self.connection.client()
    }

    pub fn connection(&self) -> &Arc<PgConnection> {
        &self.connection
    }
}

/// Bind a model to its table. The table name is the model's `db_name`.
pub fn bind_table<M>(binding: &Binding<'_, M>) -> Result<Table>
where
    M: Model<Engine = PostgresEngine>,
{
    if binding.connection.is_closed() {
        return Err(DbError::operation(
            ENGINE,
            "bind",
            format!("connection '{}' is closed", binding.connection_name),
        ));
    }
    Ok(Table::new(Arc::clone(binding.connection), binding.db_name))
}

fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}
