//! Configuration Management
//!
//! This module loads the database settings the tool layer connects with.
//!
//! # Configuration Locations
//! - Local: `./config.json` (per-project)
//! - Global: `~/.config/text2sql/config.json` (per-user)
//!
//! Settings may sit at the top level of the file or under a `"db"` key, so the same file
//! can carry other sections:
//! ```json
//! {
//!   "db": {
//!     "host": "localhost",
//!     "port": 5432,
//!     "database": "shop_db",
//!     "user": "app",
//!     "password_env": "SHOP_DB_PASSWORD"
//!   }
//! }
//! ```
//!
//! # Resolution Precedence
//! 1. Explicit connection string (`--database-url` or `TEXT2SQL_DATABASE_URL`)
//! 2. Explicit config file (`--config`)
//! 3. Local config file (`./config.json`)
//! 4. Global config file (`~/.config/text2sql/config.json`)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{ConnectionConfig, DatabaseType};
use crate::error::{Result, Text2SqlError};
use crate::pool::PoolOptions;

/// Database connection settings as stored in a config file
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Full connection string; takes precedence over the individual fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Engine type; inferred from `file` (sqlite) or `host` (postgres) when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<DatabaseType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable holding the password (overrides `password`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Database file path (for sqlite)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Schema to introspect; defaults to the connection's current schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Maximum number of pooled connections (default 5)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<usize>,

    /// How long a call may wait for a pooled connection (default 30000)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_timeout_ms: Option<u64>,
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("url", &self.url.as_ref().map(|_| "***"))
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("password_env", &self.password_env)
            .field("database", &self.database)
            .field("file", &self.file)
            .field("schema", &self.schema)
            .field("pool_size", &self.pool_size)
            .field("acquire_timeout_ms", &self.acquire_timeout_ms)
            .finish()
    }
}

impl DatabaseSettings {
    /// Settings holding only a connection string
    #[must_use]
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Parse settings from JSON text, unwrapping a `"db"` section if present
    pub fn from_json(contents: &str) -> Result<Self> {
        let mut data: Value = serde_json::from_str(contents)
            .map_err(|e| Text2SqlError::config(format!("Invalid config file format: {e}")))?;

        if let Some(section) = data.get_mut("db").filter(|v| v.is_object()) {
            data = section.take();
        }

        serde_json::from_value(data)
            .map_err(|e| Text2SqlError::config(format!("Invalid database settings: {e}")))
    }

    /// Load settings from a config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            Text2SqlError::config(format!("Could not read config file {}: {e}", path.display()))
        })?;
        Self::from_json(&contents)
    }

    /// Build the connection parameters, resolving `password_env`
    pub fn connection_config(&self) -> Result<ConnectionConfig> {
        let mut config = match &self.url {
            Some(url) => ConnectionConfig::from_url(url)?,
            None => self.connection_config_from_fields()?,
        };

        if let Some(env_var) = &self.password_env {
            let password = std::env::var(env_var).map_err(|_| {
                Text2SqlError::config(format!(
                    "Environment variable {env_var} not found for password"
                ))
            })?;
            config.password = Some(password);
        }

        Ok(config)
    }

    fn connection_config_from_fields(&self) -> Result<ConnectionConfig> {
        let engine = match self.engine {
            Some(engine) => engine,
            None if self.file.is_some() => DatabaseType::SQLite,
            None if self.host.is_some() => DatabaseType::Postgres,
            None => {
                return Err(Text2SqlError::config(
                    "Database settings need either 'url', 'file' (sqlite) or 'host' (postgres)",
                ))
            }
        };

        match engine {
            DatabaseType::SQLite => {
                let file = self
                    .file
                    .clone()
                    .ok_or_else(|| Text2SqlError::config("SQLite requires 'file' parameter"))?;
                Ok(ConnectionConfig::sqlite(file))
            }
            DatabaseType::Postgres => {
                let required = |value: &Option<String>, name: &str| {
                    value.clone().ok_or_else(|| {
                        Text2SqlError::config(format!("PostgreSQL requires '{name}' parameter"))
                    })
                };
                Ok(ConnectionConfig::postgres(
                    required(&self.host, "host")?,
                    self.port.unwrap_or(ConnectionConfig::DEFAULT_POSTGRES_PORT),
                    required(&self.user, "user")?,
                    self.password.clone().unwrap_or_default(),
                    required(&self.database, "database")?,
                ))
            }
        }
    }

    /// Pool sizing, falling back to the defaults
    #[must_use]
    pub fn pool_options(&self) -> PoolOptions {
        let defaults = PoolOptions::default();
        PoolOptions {
            max_size: self.pool_size.unwrap_or(defaults.max_size),
            acquire_timeout: self
                .acquire_timeout_ms
                .map_or(defaults.acquire_timeout, Duration::from_millis),
        }
    }
}

/// Get path to local config file (`./config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        Text2SqlError::config(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join("config.json"))
}

/// Get path to global config file (`~/.config/text2sql/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| Text2SqlError::config("Could not determine user config directory"))?;

    Ok(config_dir.join("text2sql").join("config.json"))
}

/// Resolve settings following the documented precedence
pub fn resolve_settings(url: Option<&str>, config_path: Option<&Path>) -> Result<DatabaseSettings> {
    if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
        tracing::debug!("using connection string from command line or environment");
        return Ok(DatabaseSettings::from_url(url));
    }

    if let Some(path) = config_path {
        tracing::debug!(path = %path.display(), "loading explicit config file");
        return DatabaseSettings::load(path);
    }

    for path in [local_config_path()?, global_config_path()?] {
        if path.exists() {
            tracing::debug!(path = %path.display(), "loading config file");
            return DatabaseSettings::load(&path);
        }
    }

    Err(Text2SqlError::config(
        "No database configured: pass --database-url, set TEXT2SQL_DATABASE_URL, or create ./config.json",
    ))
}
