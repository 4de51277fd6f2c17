//! Configuration management.
//!
//! Settings come from three places, later ones winning:
//!
//! 1. Built-in defaults
//! 2. `config.toml` in the platform config directory (or an explicit path)
//! 3. `CLASSIFY_STORE_*` environment variables (a `.env` file is honored)

use crate::models::{BackendType, PostgresElementConfig};
use crate::observability::LoggingConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory name under the platform config dir.
const APP_DIR: &str = "classify-store";

/// Environment variable names and the setting each overrides.
mod env_keys {
    pub const BACKEND: &str = "CLASSIFY_STORE_BACKEND";
    pub const TABLE: &str = "CLASSIFY_STORE_TABLE";
    pub const DB_URL: &str = "CLASSIFY_STORE_DB_URL";
    pub const DB_NAME: &str = "CLASSIFY_STORE_DB_NAME";
    pub const DB_HOST: &str = "CLASSIFY_STORE_DB_HOST";
    pub const DB_PORT: &str = "CLASSIFY_STORE_DB_PORT";
    pub const DB_USER: &str = "CLASSIFY_STORE_DB_USER";
    pub const DB_PASS: &str = "CLASSIFY_STORE_DB_PASS";
    pub const LOG_LEVEL: &str = "CLASSIFY_STORE_LOG_LEVEL";
}

/// Top-level store configuration.
///
/// ```toml
/// backend = "postgres"
///
/// [postgres]
/// table_name = "ml.classifications"
/// db_host = "db.internal"
/// protocol = "json"
///
/// [logging]
/// level = "debug"
/// format = "json"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend used by [`ElementFactory::create`](crate::ElementFactory::create).
    pub backend: BackendType,
    /// Settings for postgres-backed elements.
    pub postgres: PostgresElementConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl StoreConfig {
    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the text is not valid configuration.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::InvalidInput(format!("invalid config: {e}")))
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        Self::from_toml(&contents)
    }

    /// Default config file location, if a home directory can be found.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join(APP_DIR).join("config.toml"))
    }

    /// Loads configuration from the default location, then applies
    /// environment overrides.
    ///
    /// A missing or unreadable file falls back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if an environment override is malformed.
    pub fn load_default() -> Result<Self> {
        // Absent .env is the common case.
        let _ = dotenvy::dotenv();

        let from_file = Self::default_path()
            .filter(|path| path.exists())
            .and_then(|path| match Self::load_from_file(&path) {
                Ok(config) => Some(config),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                    None
                },
            });

        from_file.unwrap_or_default().with_env_overrides()
    }

    /// Applies `CLASSIFY_STORE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a variable holds an invalid value.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`.
    ///
    /// `CLASSIFY_STORE_DB_URL` is applied first so the individual
    /// `CLASSIFY_STORE_DB_*` variables can refine it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a value cannot be parsed.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup(env_keys::BACKEND) {
            self.backend = BackendType::parse(&backend).ok_or_else(|| {
                Error::InvalidInput(format!("{}: unknown backend '{backend}'", env_keys::BACKEND))
            })?;
        }
        if let Some(url) = lookup(env_keys::DB_URL) {
            self.postgres = apply_connection_url(self.postgres, &url)?;
        }
        if let Some(table) = lookup(env_keys::TABLE) {
            self.postgres.table_name = table;
        }
        if let Some(name) = lookup(env_keys::DB_NAME) {
            self.postgres.db_name = name;
        }
        if let Some(host) = lookup(env_keys::DB_HOST) {
            self.postgres.db_host = Some(host);
        }
        if let Some(port) = lookup(env_keys::DB_PORT) {
            let port = port.parse::<u16>().map_err(|e| {
                Error::InvalidInput(format!("{}: '{port}': {e}", env_keys::DB_PORT))
            })?;
            self.postgres.db_port = Some(port);
        }
        if let Some(user) = lookup(env_keys::DB_USER) {
            self.postgres.db_user = Some(user);
        }
        if let Some(pass) = lookup(env_keys::DB_PASS) {
            self.postgres.db_pass = Some(pass);
        }
        if let Some(level) = lookup(env_keys::LOG_LEVEL) {
            self.logging.level = level;
        }

        Ok(self)
    }
}

#[cfg(feature = "postgres")]
fn apply_connection_url(config: PostgresElementConfig, url: &str) -> Result<PostgresElementConfig> {
    config.with_connection_url(url)
}

#[cfg(not(feature = "postgres"))]
fn apply_connection_url(_config: PostgresElementConfig, _url: &str) -> Result<PostgresElementConfig> {
    Err(Error::FeatureNotEnabled("postgres".to_string()))
}
