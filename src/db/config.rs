//! Database configuration.
//!
//! A [`DbConfig`] describes one logical database and is loaded once at
//! startup, usually from a TOML file:
//!
//! ```toml
//! connector = "mongodb"
//! host = "localhost"
//! port = 27017
//! database = "app"
//! timeout = "5s"
//!
//! [options]
//! maxPoolSize = 20
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Default timeout applied to connector operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

fn default_host() -> String {
    "localhost".to_string()
}

fn default_timeout() -> String {
    "10s".to_string()
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML configuration.
    #[error("failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Supported connector kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorKind {
    #[serde(rename = "mongodb", alias = "mongo", alias = "document-store")]
    DocumentStore,
    #[serde(rename = "postgres", alias = "postgresql", alias = "relational")]
    Relational,
}

impl ConnectorKind {
    /// Canonical registry key for this kind.
    pub fn key(&self) -> &'static str {
        match self {
            ConnectorKind::DocumentStore => "mongodb",
            ConnectorKind::Relational => "postgres",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConnectorKind::DocumentStore => "MongoDB",
            ConnectorKind::Relational => "PostgreSQL",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            ConnectorKind::DocumentStore => 27017,
            ConnectorKind::Relational => 5432,
        }
    }

    /// Cargo feature that compiles the engine in.
    pub fn feature_name(&self) -> &'static str {
        match self {
            ConnectorKind::DocumentStore => "mongodb",
            ConnectorKind::Relational => "postgres",
        }
    }

    pub fn is_available(&self) -> bool {
        match self {
            ConnectorKind::DocumentStore => cfg!(feature = "mongodb"),
            ConnectorKind::Relational => cfg!(feature = "postgres"),
        }
    }

    pub fn all() -> &'static [ConnectorKind] {
        &[ConnectorKind::DocumentStore, ConnectorKind::Relational]
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ConnectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mongodb" | "mongo" | "document-store" => Ok(ConnectorKind::DocumentStore),
            "postgres" | "postgresql" | "relational" => Ok(ConnectorKind::Relational),
            other => Err(format!("unknown connector kind: {other}")),
        }
    }
}

/// Configuration for one logical database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Engine used for this database.
    pub connector: ConnectorKind,

    /// Server host (default: "localhost").
    #[serde(default = "default_host")]
    pub host: String,

    pub port: u16,

    pub database: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Timeout for open/close/ping (default: "10s").
    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// Engine options. These override the engine defaults and any query
    /// parameters of an explicit URI.
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl DbConfig {
    pub fn new(
        connector: ConnectorKind,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            host: host.into(),
            port,
            database: database.into(),
            username: None,
            password: None,
            timeout: default_timeout(),
            options: Map::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: Option<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = timeout.into();
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DbConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if strip_separators(&self.host).trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "host cannot be empty".to_string(),
            ));
        }
        if strip_separators(&self.database).trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "database cannot be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::ValidationError(
                "port must be greater than 0".to_string(),
            ));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(ConfigError::ValidationError(
                "password requires a username".to_string(),
            ));
        }
        self.timeout()?;
        Ok(())
    }

    /// Parsed operation timeout.
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        let raw = self.timeout.trim();
        if raw.is_empty() {
            return Err(ConfigError::ValidationError(
                "timeout cannot be empty".to_string(),
            ));
        }
        let timeout = humantime::parse_duration(raw)
            .map_err(|e| ConfigError::ValidationError(format!("invalid timeout '{raw}': {e}")))?;
        if timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "timeout must be greater than 0".to_string(),
            ));
        }
        Ok(timeout)
    }
}

/// Remove every path separator from a host or database name.
pub(crate) fn strip_separators(value: &str) -> String {
    value.chars().filter(|c| !matches!(c, '/' | '\\')).collect()
}
