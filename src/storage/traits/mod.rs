//! Storage backend traits.

mod element;

pub use element::ClassificationElement;
