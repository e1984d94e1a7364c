//! MongoDB engine

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::{options::ClientOptions, Client, Collection};
use serde_json::{json, Map, Value};

use crate::db::driver::Engine;
use crate::db::error::{DbError, Result};
use crate::db::model::{Binding, Model};

const ENGINE: &str = "MongoDB";

/// Registry key used by document-store models.
pub const MONGODB_KEY: &str = "mongodb";

#[derive(Debug, Clone, Default)]
pub struct MongoEngine;

impl MongoEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Engine for MongoEngine {
    type Handle = Client;

    fn name(&self) -> &'static str {
        ENGINE
    }

    fn scheme(&self) -> &'static str {
        "mongodb"
    }

    fn default_options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert("retryWrites".to_string(), json!(true));
        options.insert("maxPoolSize".to_string(), json!(10));
        options
    }

    async fn open(&self, uri: &str) -> Result<Client> {
        if !uri.starts_with("mongodb://") && !uri.starts_with("mongodb+srv://") {
            return Err(DbError::InvalidConnectionString(
                "MongoDB connection string must start with mongodb:// or mongodb+srv://".into(),
            ));
        }

        let options = ClientOptions::parse(uri)
            .await
            .map_err(|e| DbError::operation(ENGINE, "connect", e))?;
        let client =
            Client::with_options(options).map_err(|e| DbError::operation(ENGINE, "connect", e))?;

        // The driver connects lazily; ping so a bad server fails here.
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| DbError::operation(ENGINE, "connect", e))?;

        Ok(client)
    }

    async fn close(&self, handle: Client) -> Result<()> {
        handle.shutdown().await;
        Ok(())
    }

    async fn ping(&self, handle: &Client) -> Result<()> {
        handle
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| DbError::operation(ENGINE, "ping", e))?;
        Ok(())
    }
}

/// Bind a model to its collection in the connection's default database.
///
/// The collection name is the model's `db_name`.
pub fn bind_collection<M, T>(binding: &Binding<'_, M>) -> Result<Collection<T>>
where
    M: Model<Engine = MongoEngine>,
    T: Send + Sync,
{
    let database = binding.connection.default_database().ok_or_else(|| {
        DbError::InvalidConnectionString(format!(
            "connection '{}' has no default database",
            binding.connection_name
        ))
    })?;
    Ok(database.collection::<T>(binding.db_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::config::{ConnectorKind, DbConfig};
    use crate::db::connector::Connector;
    use crate::db::uri::query_param;

    #[tokio::test]
    async fn test_rejects_foreign_scheme() {
        let err = MongoEngine::new()
            .open("postgres://localhost:5432/app")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidConnectionString(_)));
    }

    #[tokio::test]
    async fn test_parse_error_keeps_driver_error() {
        let err = MongoEngine::new()
            .open("mongodb://localhost:27017/app?maxPoolSize=many")
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::Operation { action: "connect", .. }));
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.downcast_ref::<mongodb::error::Error>().is_some());
    }

    #[test]
    fn test_uri_from_config() {
        let config = DbConfig::new(ConnectorKind::DocumentStore, "/db.local/", 27017, "/app/")
            .with_option("retryWrites", false);
        let connector = Connector::new(MongoEngine::new(), config).unwrap();

        let uri = connector.uri_for(None).unwrap();
        assert!(uri.starts_with("mongodb://db.local:27017/app?"));
        assert_eq!(query_param(&uri, "retryWrites").as_deref(), Some("false"));
        assert_eq!(query_param(&uri, "maxPoolSize").as_deref(), Some("10"));
    }
}
