//! Database service wiring.
//!
//! The hosting application calls [`bootstrap`] once at startup with its
//! database configuration and keeps the returned manager. Models are bound
//! to it with [`DriverManager::model`].

use std::sync::Arc;

use tracing::info;

use crate::db::{DbConfig, DriverManager, Result};

/// Build the driver manager with the configured connector registered.
///
/// Any error here should abort application boot.
pub fn bootstrap(config: DbConfig) -> Result<Arc<DriverManager>> {
    config.validate()?;

    let manager = DriverManager::new(config);
    manager.register_config_connector()?;

    info!(connector = %manager.default_driver(), "Database service ready");
    Ok(Arc::new(manager))
}

/// Like [`bootstrap`], and also open the `"default"` connection.
pub async fn bootstrap_and_connect(config: DbConfig) -> Result<Arc<DriverManager>> {
    let manager = bootstrap(config)?;
    manager.default_connector()?.connect().await?;
    Ok(manager)
}
