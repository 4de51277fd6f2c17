//! Storage layer.
//!
//! - **Traits**: the [`ClassificationElement`] contract
//! - **Element**: in-memory and PostgreSQL implementations
//! - **Codec**: self-describing classification blobs
//! - **SQL**: statement generation and the connection/transaction helper
//! - **Factory**: element construction from configuration and snapshots

// Dropping pooled connections a statement earlier gains nothing.
#![allow(clippy::significant_drop_tightening)]

pub mod codec;
pub mod element;
pub mod factory;
pub mod sql;
pub mod traits;

pub use element::{MemoryClassificationElement, PostgresClassificationElement};
pub use factory::ElementFactory;
pub use sql::{Cursor, SqlExecutor};
pub use traits::ClassificationElement;
