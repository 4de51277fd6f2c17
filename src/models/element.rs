//! Element configuration and snapshot types.

use super::{ClassificationMap, ElementUuid};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage backend for classification elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Process memory.
    #[default]
    Memory,
    /// PostgreSQL table.
    #[serde(alias = "postgresql")]
    Postgres,
}

impl BackendType {
    /// Returns the backend name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres => "postgres",
        }
    }

    /// Parses a backend name (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "in-memory" | "inmemory" => Some(Self::Memory),
            "postgres" | "postgresql" | "psql" => Some(Self::Postgres),
            _ => None,
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Binary format used for stored classification blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationProtocol {
    /// UTF-8 JSON payload.
    Json,
    /// Compact bincode payload.
    #[default]
    Bincode,
}

impl SerializationProtocol {
    /// Header byte written ahead of the payload.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Json => 0x01,
            Self::Bincode => 0x02,
        }
    }

    /// Resolves a header byte.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::Json),
            0x02 => Some(Self::Bincode),
            _ => None,
        }
    }
}

/// How a classification row is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertStrategy {
    /// Single `INSERT ... ON CONFLICT DO UPDATE` statement.
    #[default]
    OnConflict,
    /// `UPDATE`, then `INSERT` when no row matched, in one transaction.
    ///
    /// For servers without `ON CONFLICT` support.
    UpdateThenInsert,
}

/// Configuration of a PostgreSQL-backed element.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresElementConfig {
    /// Table holding classification rows.
    pub table_name: String,
    /// Column for the classifier type name.
    pub type_col: String,
    /// Column for the element identifier.
    pub uuid_col: String,
    /// Column for the serialized classification blob.
    pub classification_col: String,
    /// Database name.
    pub db_name: String,
    /// Server host. `None` uses the client default.
    pub db_host: Option<String>,
    /// Server port. `None` uses 5432.
    pub db_port: Option<u16>,
    /// Role to connect as.
    pub db_user: Option<String>,
    /// Password for `db_user`.
    pub db_pass: Option<String>,
    /// Blob format for writes.
    pub protocol: SerializationProtocol,
    /// Whether to create the table before first use.
    pub create_table: bool,
    /// Write strategy.
    pub upsert: UpsertStrategy,
    /// Maximum pooled connections per connection target.
    pub pool_size: usize,
}

impl Default for PostgresElementConfig {
    fn default() -> Self {
        Self {
            table_name: "classifications".to_string(),
            type_col: "type_name".to_string(),
            uuid_col: "uid".to_string(),
            classification_col: "classification".to_string(),
            db_name: "postgres".to_string(),
            db_host: None,
            db_port: None,
            db_user: None,
            db_pass: None,
            protocol: SerializationProtocol::default(),
            create_table: true,
            upsert: UpsertStrategy::default(),
            pool_size: 10,
        }
    }
}

impl fmt::Debug for PostgresElementConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresElementConfig")
            .field("table_name", &self.table_name)
            .field("type_col", &self.type_col)
            .field("uuid_col", &self.uuid_col)
            .field("classification_col", &self.classification_col)
            .field("db_name", &self.db_name)
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_user", &self.db_user)
            .field("db_pass", &self.db_pass.as_ref().map(|_| "[REDACTED]"))
            .field("protocol", &self.protocol)
            .field("create_table", &self.create_table)
            .field("upsert", &self.upsert)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

impl PostgresElementConfig {
    /// Sets the table name.
    #[must_use]
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Sets the blob protocol.
    #[must_use]
    pub const fn with_protocol(mut self, protocol: SerializationProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the upsert strategy.
    #[must_use]
    pub const fn with_upsert(mut self, upsert: UpsertStrategy) -> Self {
        self.upsert = upsert;
        self
    }

    /// Enables or disables table creation.
    #[must_use]
    pub const fn with_create_table(mut self, create_table: bool) -> Self {
        self.create_table = create_table;
        self
    }

    /// Fills connection fields from a PostgreSQL URL or key/value string.
    ///
    /// Fields absent from the string are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the string cannot be parsed.
    #[cfg(feature = "postgres")]
    pub fn with_connection_url(mut self, url: &str) -> crate::Result<Self> {
        let parsed = url
            .parse::<tokio_postgres::Config>()
            .map_err(|e| crate::Error::InvalidInput(format!("invalid connection url: {e}")))?;

        if let Some(host) = parsed.get_hosts().first() {
            self.db_host = Some(host_to_string(host));
        }
        if let Some(port) = parsed.get_ports().first() {
            self.db_port = Some(*port);
        }
        if let Some(user) = parsed.get_user() {
            self.db_user = Some(user.to_string());
        }
        if let Some(pass) = parsed.get_password() {
            self.db_pass = Some(String::from_utf8_lossy(pass).to_string());
        }
        if let Some(db) = parsed.get_dbname() {
            self.db_name = db.to_string();
        }
        Ok(self)
    }
}

#[cfg(all(feature = "postgres", unix))]
fn host_to_string(h: &tokio_postgres::config::Host) -> String {
    match h {
        tokio_postgres::config::Host::Tcp(s) => s.clone(),
        tokio_postgres::config::Host::Unix(p) => p.to_string_lossy().to_string(),
    }
}

#[cfg(all(feature = "postgres", not(unix)))]
fn host_to_string(h: &tokio_postgres::config::Host) -> String {
    let tokio_postgres::config::Host::Tcp(s) = h;
    s.clone()
}

/// Backend configuration recovered from an element.
///
/// Feeding it back to [`ElementFactory`](crate::storage::ElementFactory)
/// yields an equivalent element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum ElementConfig {
    /// In-memory element (no settings).
    Memory,
    /// PostgreSQL-backed element.
    Postgres(PostgresElementConfig),
}

impl ElementConfig {
    /// Backend this configuration builds.
    #[must_use]
    pub const fn backend_type(&self) -> BackendType {
        match self {
            Self::Memory => BackendType::Memory,
            Self::Postgres(_) => BackendType::Postgres,
        }
    }
}

/// Captured element state.
///
/// Locks and connections are never part of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum ElementSnapshot {
    /// In-memory element state.
    Memory {
        /// Classifier type name.
        type_name: String,
        /// Element identifier.
        uuid: ElementUuid,
        /// Stored classification, if any.
        classification: Option<ClassificationMap>,
    },
    /// PostgreSQL-backed element state.
    Postgres {
        /// Classifier type name.
        type_name: String,
        /// Element identifier.
        uuid: ElementUuid,
        /// Table and connection settings.
        config: PostgresElementConfig,
    },
}

impl ElementSnapshot {
    /// Classifier type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Memory { type_name, .. } | Self::Postgres { type_name, .. } => type_name,
        }
    }

    /// Element identifier.
    #[must_use]
    pub const fn uuid(&self) -> &ElementUuid {
        match self {
            Self::Memory { uuid, .. } | Self::Postgres { uuid, .. } => uuid,
        }
    }

    /// Backend that produced the snapshot.
    #[must_use]
    pub const fn backend_type(&self) -> BackendType {
        match self {
            Self::Memory { .. } => BackendType::Memory,
            Self::Postgres { .. } => BackendType::Postgres,
        }
    }

    /// Serializes the snapshot to JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Serialization`] if encoding fails.
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Parses a snapshot from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Serialization`] if the JSON is not a snapshot.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}
