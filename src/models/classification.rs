//! Classification maps, element identifiers, and score normalization.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a classification element.
///
/// Elements may be keyed by different kinds of hashable values. Storage
/// backends that need a uniform key use the [`Display`](fmt::Display) form, so
/// `Integer(42)` and `Text("42")` address the same remote row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ElementUuid {
    /// Free-form text identifier.
    Text(String),
    /// Integer identifier.
    Integer(i64),
    /// RFC 4122 UUID.
    Uuid(uuid::Uuid),
}

impl ElementUuid {
    /// Generates a random v4 UUID identifier.
    #[must_use]
    pub fn new_v4() -> Self {
        Self::Uuid(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for ElementUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Uuid(u) => write!(f, "{u}"),
        }
    }
}

impl From<String> for ElementUuid {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for ElementUuid {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<i64> for ElementUuid {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<uuid::Uuid> for ElementUuid {
    fn from(u: uuid::Uuid) -> Self {
        Self::Uuid(u)
    }
}

/// Mapping of classification label to confidence score.
///
/// Labels are kept ordered so serialized blobs are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassificationMap(BTreeMap<String, f64>);

impl ClassificationMap {
    /// Creates an empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builds a map from label/score pairs. Later duplicates win.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Inserts or replaces a label score.
    pub fn insert(&mut self, label: impl Into<String>, score: f64) -> Option<f64> {
        self.0.insert(label.into(), score)
    }

    /// Returns the score for a label.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<f64> {
        self.0.get(label).copied()
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when no labels are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates labels and scores in label order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Returns the label with the highest score.
    ///
    /// Ties go to the label that sorts first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the map is empty.
    pub fn max_label(&self) -> Result<&str> {
        let mut best: Option<(&str, f64)> = None;
        for (label, score) in self.iter() {
            match best {
                Some((_, top)) if score <= top => {},
                _ => best = Some((label, score)),
            }
        }
        best.map(|(label, _)| label)
            .ok_or_else(|| Error::InvalidInput("classification map is empty".to_string()))
    }

    /// Consumes the map, returning the inner `BTreeMap`.
    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, f64> {
        self.0
    }
}

impl From<BTreeMap<String, f64>> for ClassificationMap {
    fn from(m: BTreeMap<String, f64>) -> Self {
        Self(m)
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for ClassificationMap {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

/// Merges and validates incoming scores.
///
/// `extra` plays the role of keyword-style scores: pairs are applied on top of
/// `map`, overriding labels it already holds.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the merged map is empty, a label is
/// empty, or a score is not finite.
pub fn normalize_scores<I, K>(map: Option<ClassificationMap>, extra: I) -> Result<ClassificationMap>
where
    I: IntoIterator<Item = (K, f64)>,
    K: Into<String>,
{
    let mut merged = map.unwrap_or_default();
    for (label, score) in extra {
        merged.insert(label, score);
    }

    if merged.is_empty() {
        return Err(Error::InvalidInput(
            "No classification labels/values given".to_string(),
        ));
    }
    for (label, score) in merged.iter() {
        if label.is_empty() {
            return Err(Error::InvalidInput(
                "classification label must not be empty".to_string(),
            ));
        }
        if !score.is_finite() {
            return Err(Error::InvalidInput(format!(
                "score for label '{label}' is not finite: {score}"
            )));
        }
    }

    Ok(merged)
}
