//! dbhub - named database connections and lazily bound models
//!
//! Application code asks for connections and models by name and never
//! hard-codes which engine sits behind them.
//!
//! # Architecture
//!
//! - **Engines**: thin adapters over `mongodb` and `tokio-postgres`
//! - **Connector**: opens, caches and closes named connections for one engine
//! - **DriverManager**: maps connector keys to connectors and owns the model cache
//! - **Models**: lazily build and cache the engine's native model object
//!
//! # Example
//!
//! ```rust,ignore
//! use dbhub::db::drivers::mongo::{bind_collection, MongoEngine, MONGODB_KEY};
//! use dbhub::db::{Binding, DbConfig, Model, Result};
//!
//! struct User;
//!
//! impl Model for User {
//!     type Engine = MongoEngine;
//!     type Native = mongodb::Collection<mongodb::bson::Document>;
//!     type Schema = ();
//!
//!     fn db_connector(&self) -> &str {
//!         MONGODB_KEY
//!     }
//!
//!     fn schema(&self) -> Self::Schema {}
//!
//!     fn create_model(&self, binding: &Binding<'_, Self>) -> Result<Self::Native> {
//!         bind_collection(binding)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DbConfig::from_file("db.toml")?;
//!     let manager = dbhub::service::bootstrap_and_connect(config).await?;
//!
//!     let users = manager.model(User).model()?;
//!     let count = users.count_documents(mongodb::bson::doc! {}).await?;
//!
//!     manager.close_all().await;
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod service;

pub use db::{DbConfig, DbError, DriverManager, Model, ModelHandle};
