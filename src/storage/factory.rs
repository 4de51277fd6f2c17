//! Element construction from configuration.

use crate::config::StoreConfig;
use crate::models::{BackendType, ElementConfig, ElementSnapshot, ElementUuid};
use crate::storage::element::{MemoryClassificationElement, PostgresClassificationElement};
use crate::storage::traits::ClassificationElement;
use crate::Result;
use std::sync::Arc;

/// Factory for classification elements.
pub struct ElementFactory;

impl ElementFactory {
    /// Creates an element for the backend selected in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the postgres table or column names are invalid.
    pub fn create(
        type_name: impl Into<String>,
        uuid: impl Into<ElementUuid>,
        config: &StoreConfig,
    ) -> Result<Arc<dyn ClassificationElement>> {
        let element_config = match config.backend {
            BackendType::Memory => ElementConfig::Memory,
            BackendType::Postgres => ElementConfig::Postgres(config.postgres.clone()),
        };
        Self::from_config(type_name, uuid, element_config)
    }

    /// Creates an element from a configuration recovered with
    /// [`get_config`](ClassificationElement::get_config).
    ///
    /// # Errors
    ///
    /// Returns an error if the postgres table or column names are invalid.
    pub fn from_config(
        type_name: impl Into<String>,
        uuid: impl Into<ElementUuid>,
        config: ElementConfig,
    ) -> Result<Arc<dyn ClassificationElement>> {
        let type_name = type_name.into();
        let uuid = uuid.into();
        tracing::debug!(
            type_name = %type_name,
            uuid = %uuid,
            backend = %config.backend_type(),
            "Creating classification element"
        );

        match config {
            ElementConfig::Memory => Ok(Arc::new(MemoryClassificationElement::new(type_name, uuid))),
            ElementConfig::Postgres(pg) => Ok(Arc::new(PostgresClassificationElement::new(
                type_name, uuid, pg,
            )?)),
        }
    }

    /// Rebuilds an element of whichever backend produced `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot holds invalid postgres names.
    pub fn from_snapshot(snapshot: ElementSnapshot) -> Result<Arc<dyn ClassificationElement>> {
        match snapshot.backend_type() {
            BackendType::Memory => Ok(Arc::new(MemoryClassificationElement::from_snapshot(snapshot)?)),
            BackendType::Postgres => Ok(Arc::new(PostgresClassificationElement::from_snapshot(
                snapshot,
            )?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassificationMap, PostgresElementConfig};

    #[test]
    fn test_create_memory_from_store_config() {
        let config = StoreConfig::default();
        let element = ElementFactory::create("clf_a", "item_1", &config).unwrap();
        assert_eq!(element.backend_type(), BackendType::Memory);
        assert_eq!(element.type_name(), "clf_a");
        assert!(!element.has_classifications().unwrap());
    }

    #[test]
    fn test_create_postgres_is_lazy() {
        let config = StoreConfig {
            backend: BackendType::Postgres,
            postgres: PostgresElementConfig {
                db_host: Some("127.0.0.1".to_string()),
                db_port: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };
        let element = ElementFactory::create("clf_a", 7_i64, &config).unwrap();
        assert_eq!(element.backend_type(), BackendType::Postgres);
        assert_eq!(element.get_config(), ElementConfig::Postgres(config.postgres));
    }

    #[test]
    fn test_create_postgres_rejects_bad_names() {
        let config = StoreConfig {
            backend: BackendType::Postgres,
            postgres: PostgresElementConfig::default().with_table_name("a b"),
            ..Default::default()
        };
        assert!(ElementFactory::create("clf_a", "x", &config).is_err());
    }

    #[test]
    fn test_config_round_trip_memory() {
        let original = ElementFactory::from_config("clf_a", "x", ElementConfig::Memory).unwrap();
        let rebuilt = ElementFactory::from_config("clf_a", "x", original.get_config()).unwrap();
        assert_eq!(rebuilt.backend_type(), original.backend_type());
        assert_eq!(rebuilt.uuid(), original.uuid());
    }

    #[test]
    fn test_from_snapshot_dispatches_on_backend() {
        let source = MemoryClassificationElement::new("clf_a", "x");
        source
            .set_classification(ClassificationMap::from_pairs([("cat", 1.0)]))
            .unwrap();
        let rebuilt = ElementFactory::from_snapshot(source.snapshot()).unwrap();
        assert_eq!(rebuilt.backend_type(), BackendType::Memory);
        assert!(rebuilt.classification_eq(&source));

        let pg = ElementSnapshot::Postgres {
            type_name: "clf_a".to_string(),
            uuid: ElementUuid::from("x"),
            config: PostgresElementConfig::default(),
        };
        let rebuilt = ElementFactory::from_snapshot(pg).unwrap();
        assert_eq!(rebuilt.backend_type(), BackendType::Postgres);
    }
}
