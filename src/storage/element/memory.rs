//! In-memory classification element.
//!
//! Holds the score map directly, guarded by a re-entrant lock scoped to the
//! instance. Validation hooks may call back into the element while the lock
//! is held.

use crate::models::{BackendType, ClassificationMap, ElementConfig, ElementSnapshot, ElementUuid};
use crate::storage::traits::ClassificationElement;
use crate::{Error, Result};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::fmt;

/// In-memory classification element.
///
/// The lock is never captured in a snapshot; [`from_snapshot`](Self::from_snapshot)
/// always allocates a fresh one.
///
/// # Example
///
/// ```rust
/// use classify_store::{ClassificationElement, ClassificationMap, MemoryClassificationElement};
///
/// let element = MemoryClassificationElement::new("clf_a", 42_i64);
/// element.set_classification_pairs(&[("spam", 0.8), ("ham", 0.2)]).unwrap();
/// assert_eq!(element.max_label().unwrap(), "spam");
/// ```
pub struct MemoryClassificationElement {
    type_name: String,
    uuid: ElementUuid,
    classification: ReentrantMutex<RefCell<Option<ClassificationMap>>>,
}

impl MemoryClassificationElement {
    /// Creates an element with no classification.
    #[must_use]
    pub fn new(type_name: impl Into<String>, uuid: impl Into<ElementUuid>) -> Self {
        Self {
            type_name: type_name.into(),
            uuid: uuid.into(),
            classification: ReentrantMutex::new(RefCell::new(None)),
        }
    }

    /// Rebuilds an element from a memory snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the snapshot came from another backend.
    pub fn from_snapshot(snapshot: ElementSnapshot) -> Result<Self> {
        match snapshot {
            ElementSnapshot::Memory {
                type_name,
                uuid,
                classification,
            } => Ok(Self {
                type_name,
                uuid,
                classification: ReentrantMutex::new(RefCell::new(classification)),
            }),
            other => Err(Error::InvalidInput(format!(
                "cannot restore a {} snapshot into a memory element",
                other.backend_type()
            ))),
        }
    }

    /// Replaces this element's classification with the snapshot's.
    ///
    /// The existing lock is kept, so restoring twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the snapshot is from another backend,
    /// describes a different `(type_name, uuid)`, or holds no classification
    /// while this element already has one.
    pub fn restore(&self, snapshot: &ElementSnapshot) -> Result<()> {
        let ElementSnapshot::Memory {
            type_name,
            uuid,
            classification,
        } = snapshot
        else {
            return Err(Error::InvalidInput(format!(
                "cannot restore a {} snapshot into a memory element",
                snapshot.backend_type()
            )));
        };

        if *type_name != self.type_name || *uuid != self.uuid {
            return Err(Error::InvalidInput(format!(
                "snapshot identity ({type_name}, {uuid}) does not match element ({}, {})",
                self.type_name, self.uuid
            )));
        }

        let guard = self.classification.lock();
        let mut slot = guard.borrow_mut();
        if classification.is_none() && slot.is_some() {
            return Err(Error::InvalidInput(format!(
                "snapshot of ({type_name}, {uuid}) holds no classification; a stored map is never cleared"
            )));
        }
        *slot = classification.clone();
        Ok(())
    }
}

impl fmt::Debug for MemoryClassificationElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryClassificationElement")
            .field("type_name", &self.type_name)
            .field("uuid", &self.uuid)
            .field("set", &self.classification.lock().borrow().is_some())
            .finish()
    }
}

impl ClassificationElement for MemoryClassificationElement {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn uuid(&self) -> &ElementUuid {
        &self.uuid
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Memory
    }

    fn has_classifications(&self) -> Result<bool> {
        let guard = self.classification.lock();
        let slot = guard.borrow();
        Ok(slot.as_ref().is_some_and(|m| !m.is_empty()))
    }

    fn get_classification(&self) -> Result<ClassificationMap> {
        metrics::counter!("classification_get_total", "backend" => "memory").increment(1);
        let guard = self.classification.lock();
        let slot = guard.borrow();
        match slot.as_ref() {
            Some(m) if !m.is_empty() => Ok(m.clone()),
            _ => {
                metrics::counter!("classification_miss_total", "backend" => "memory")
                    .increment(1);
                Err(Error::NoClassification {
                    type_name: self.type_name.clone(),
                    uuid: self.uuid.to_string(),
                })
            },
        }
    }

    fn set_classification(&self, scores: ClassificationMap) -> Result<ClassificationMap> {
        let guard = self.classification.lock();
        // The hook may re-enter this element, so no RefCell borrow is held yet.
        let normalized = self.normalize(scores)?;
        *guard.borrow_mut() = Some(normalized.clone());

        metrics::counter!("classification_set_total", "backend" => "memory").increment(1);
        tracing::debug!(
            type_name = %self.type_name,
            uuid = %self.uuid,
            labels = normalized.len(),
            "Stored in-memory classification"
        );
        Ok(normalized)
    }

    fn get_config(&self) -> ElementConfig {
        ElementConfig::Memory
    }

    fn snapshot(&self) -> ElementSnapshot {
        let guard = self.classification.lock();
        let classification = guard.borrow().clone();
        ElementSnapshot::Memory {
            type_name: self.type_name.clone(),
            uuid: self.uuid.clone(),
            classification,
        }
    }
}
