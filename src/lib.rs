//! # classify-store
//!
//! Storage for classification results: a label → confidence map keyed by a
//! classifier type name and an element identifier.
//!
//! ## Features
//!
//! - One [`ClassificationElement`] contract, interchangeable backends
//! - In-memory elements guarded by an instance-scoped re-entrant lock
//! - PostgreSQL elements with atomic upserts and self-describing binary blobs
//! - Snapshot/restore and configuration round-trip for both backends
//!
//! ## Example
//!
//! ```rust
//! use classify_store::{ClassificationElement, ClassificationMap, MemoryClassificationElement};
//!
//! let element = MemoryClassificationElement::new("clf_a", "item_42");
//! assert!(!element.has_classifications().unwrap());
//!
//! let stored = element
//!     .set_classification(ClassificationMap::from_pairs([("cat", 0.9), ("dog", 0.1)]))
//!     .unwrap();
//! assert_eq!(element.get_classification().unwrap(), stored);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod models;
pub mod observability;
pub mod storage;

// Re-exports for convenience
pub use config::StoreConfig;
pub use models::{
    BackendType, ClassificationMap, ElementConfig, ElementSnapshot, ElementUuid,
    PostgresElementConfig, SerializationProtocol, UpsertStrategy, normalize_scores,
};
pub use observability::{LogFormat, LoggingConfig, init_logging};
pub use storage::{
    ClassificationElement, ElementFactory, MemoryClassificationElement,
    PostgresClassificationElement,
};

/// Error type for classify-store operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `NoClassification` | Reading an element that holds no classification |
/// | `InvalidInput` | Malformed scores, bad table/column names, mismatched snapshots |
/// | `Connectivity` | Database unreachable, pool exhausted, connection dropped |
/// | `PermissionDenied` | The database role lacks a privilege (e.g. `CREATE`) |
/// | `UniqueViolation` | A primary-key conflict escaped the upsert protocol |
/// | `Serialization` | A stored blob cannot be decoded, or a snapshot cannot be encoded |
/// | `OperationFailed` | Any other statement or I/O failure |
/// | `FeatureNotEnabled` | Using the PostgreSQL helper without the `postgres` feature |
#[derive(Debug, ThisError)]
pub enum Error {
    /// No classification is stored for the element.
    ///
    /// Both backends raise this same variant, so callers need not know which
    /// backend they hold.
    #[error("no classification for type '{type_name}' uuid '{uuid}'")]
    NoClassification {
        /// Classifier type name.
        type_name: String,
        /// Element identifier (string form).
        uuid: String,
    },

    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - The score map is empty, has a blank label, or a non-finite score
    /// - A table or column name is not a plain SQL identifier
    /// - A snapshot belongs to another backend
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The database could not be reached.
    #[error("connectivity failure during '{operation}': {cause}")]
    Connectivity {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The database refused the operation for lack of privilege.
    #[error("permission denied during '{operation}': {cause}")]
    PermissionDenied {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A primary-key conflict was reported by the database.
    #[error("unique violation during '{operation}': {cause}")]
    UniqueViolation {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Encoding or decoding failed.
    #[error("serialization failure: {0}")]
    Serialization(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),
}

impl Error {
    /// Returns true for the "nothing stored" signal.
    #[must_use]
    pub const fn is_no_classification(&self) -> bool {
        matches!(self, Self::NoClassification { .. })
    }
}

/// Result type alias for classify-store operations.
pub type Result<T> = std::result::Result<T, Error>;
