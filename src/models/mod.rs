//! Data models for classify-store.
//!
//! Score maps, element identifiers, and the configuration and snapshot types
//! shared by every storage backend.

mod classification;
mod element;

pub use classification::{ClassificationMap, ElementUuid, normalize_scores};
pub use element::{
    BackendType, ElementConfig, ElementSnapshot, PostgresElementConfig, SerializationProtocol,
    UpsertStrategy,
};
