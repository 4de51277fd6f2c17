//! SQL text for classification tables.
//!
//! Table and column names cannot be bound as parameters, so they are checked
//! once against a strict identifier pattern and spliced into every statement
//! at construction, double-quoted. Quoting lets reserved words such as `user`
//! or `order` serve as names and keeps their case as written. Values are
//! always bound (`$1`, `$2`, `$3`).

use crate::models::PostgresElementConfig;
use crate::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Plain or schema-qualified SQL identifier.
static IDENTIFIER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").ok());

/// Checks that `name` is a bare identifier (`schema.table` when `qualified`).
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if any part is not `[A-Za-z_][A-Za-z0-9_]*`
/// of at most 63 characters.
pub fn validate_identifier(name: &str, qualified: bool) -> Result<()> {
    let parts: Vec<&str> = if qualified {
        name.splitn(2, '.').collect()
    } else {
        vec![name]
    };

    let valid = parts.iter().all(|part| {
        IDENTIFIER
            .as_ref()
            .is_some_and(|re| re.is_match(part))
    });

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "'{name}' is not a valid SQL identifier"
        )))
    }
}

/// Double-quotes each dot-separated part of an already validated name.
///
/// `ml.Scores` becomes `"ml"."Scores"`.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(".")
}

/// Statements for one table/column configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatements {
    /// `CREATE TABLE IF NOT EXISTS` with the composite primary key.
    pub create_table: String,
    /// Point select of the blob column. Binds type, uuid.
    pub select: String,
    /// Atomic `INSERT ... ON CONFLICT DO UPDATE`. Binds type, uuid, blob.
    pub upsert: String,
    /// Blob update by key. Binds type, uuid, blob.
    pub update: String,
    /// Full-row insert. Binds type, uuid, blob.
    pub insert: String,
}

impl SqlStatements {
    /// Builds the statement set after validating every name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a table or column name is invalid.
    pub fn new(config: &PostgresElementConfig) -> Result<Self> {
        validate_identifier(&config.table_name, true)?;
        validate_identifier(&config.type_col, false)?;
        validate_identifier(&config.uuid_col, false)?;
        validate_identifier(&config.classification_col, false)?;

        let table = quote_identifier(&config.table_name);
        let type_col = quote_identifier(&config.type_col);
        let uuid_col = quote_identifier(&config.uuid_col);
        let blob_col = quote_identifier(&config.classification_col);

        Ok(Self {
            create_table: format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 {type_col} TEXT NOT NULL, \
                 {uuid_col} TEXT NOT NULL, \
                 {blob_col} BYTEA NOT NULL, \
                 PRIMARY KEY ({type_col}, {uuid_col}))"
            ),
            select: format!(
                "SELECT {blob_col} FROM {table} WHERE {type_col} = $1 AND {uuid_col} = $2"
            ),
            upsert: format!(
                "INSERT INTO {table} ({type_col}, {uuid_col}, {blob_col}) VALUES ($1, $2, $3) \
                 ON CONFLICT ({type_col}, {uuid_col}) DO UPDATE SET {blob_col} = EXCLUDED.{blob_col}"
            ),
            update: format!(
                "UPDATE {table} SET {blob_col} = $3 WHERE {type_col} = $1 AND {uuid_col} = $2"
            ),
            insert: format!(
                "INSERT INTO {table} ({type_col}, {uuid_col}, {blob_col}) VALUES ($1, $2, $3)"
            ),
        })
    }
}
