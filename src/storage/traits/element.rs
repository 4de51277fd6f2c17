//! Classification element trait.
//!
//! Every storage backend exposes the same contract, so callers can hold a
//! `Arc<dyn ClassificationElement>` without caring where the scores live.
//!
//! # Available Implementations
//!
//! | Backend | Use Case | Configuration |
//! |---------|----------|---------------|
//! | `MemoryClassificationElement` | Process-local results, tests | None |
//! | `PostgresClassificationElement` | Shared, durable results | `PostgresElementConfig` |
//!
//! # Lifecycle
//!
//! ```text
//! UNSET --set--> SET --set--> SET
//! ```
//!
//! There is no delete; a set classification is only ever replaced wholesale.
//!
//! # Usage Example
//!
//! ```rust,ignore
//! use classify_store::{ClassificationElement, ClassificationMap, ElementFactory, StoreConfig};
//!
//! let element = ElementFactory::create("clf_a", "item_42", &StoreConfig::default())?;
//! element.set_classification(ClassificationMap::from_pairs([("cat", 0.9), ("dog", 0.1)]))?;
//! assert_eq!(element.max_label()?, "cat");
//! ```

use crate::Result;
use crate::models::{
    BackendType, ClassificationMap, ElementConfig, ElementSnapshot, ElementUuid, normalize_scores,
};
use std::fmt;

/// Trait for classification storage backends.
///
/// Identity (`type_name`, `uuid`) is fixed at construction and is the storage
/// key everywhere.
pub trait ClassificationElement: Send + Sync + fmt::Debug {
    /// Name of the classifier type that produced the result.
    fn type_name(&self) -> &str;

    /// Identifier of the classified item.
    fn uuid(&self) -> &ElementUuid;

    /// Backend holding the classification.
    fn backend_type(&self) -> BackendType;

    /// Returns true if a non-empty classification is stored.
    ///
    /// Only "nothing stored" reads as `false`.
    ///
    /// # Errors
    ///
    /// Returns connectivity, permission, or decoding failures unchanged.
    fn has_classifications(&self) -> Result<bool>;

    /// Returns the stored classification.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NoClassification`] if nothing is stored. Backend
    /// failures (connectivity, decoding) are returned unchanged.
    fn get_classification(&self) -> Result<ClassificationMap>;

    /// Validates `scores` and replaces the stored classification.
    ///
    /// Returns the normalized map that was stored.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] for malformed scores, or the
    /// backend's failure if the write does not complete.
    fn set_classification(&self, scores: ClassificationMap) -> Result<ClassificationMap>;

    /// Returns the configuration that rebuilds an equivalent element.
    fn get_config(&self) -> ElementConfig;

    /// Captures identity and backend state.
    fn snapshot(&self) -> ElementSnapshot;

    /// Validation hook applied by `set_classification` before storing.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the scores are malformed.
    fn normalize(&self, scores: ClassificationMap) -> Result<ClassificationMap> {
        normalize_scores::<_, String>(Some(scores), [])
    }

    /// Stores label/score pairs, keyword-argument style.
    ///
    /// # Errors
    ///
    /// Same as [`set_classification`](Self::set_classification).
    fn set_classification_pairs(&self, pairs: &[(&str, f64)]) -> Result<ClassificationMap> {
        self.set_classification(pairs.iter().map(|(k, v)| (*k, *v)).collect())
    }

    /// Label with the highest score.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NoClassification`] if nothing is stored.
    fn max_label(&self) -> Result<String> {
        let classification = self.get_classification()?;
        classification.max_label().map(str::to_string)
    }

    /// Returns true if both elements hold equal classifications.
    ///
    /// Elements without a classification are never equal.
    fn classification_eq(&self, other: &dyn ClassificationElement) -> bool {
        match (self.get_classification(), other.get_classification()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}
