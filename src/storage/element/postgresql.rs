//! PostgreSQL-backed classification element.
//!
//! The element holds only identity and configuration. Every read and write is
//! a round trip through a [`SqlExecutor`]; the table row addressed by
//! `(type_col, uuid_col)` is the single source of truth.
//!
//! # Table Layout
//!
//! | Column | Type | Notes |
//! |--------|------|-------|
//! | `type_col` | `TEXT` | Primary key part |
//! | `uuid_col` | `TEXT` | Primary key part, identifier in string form |
//! | `classification_col` | `BYTEA` | Encoded score map, see [`codec`](crate::storage::codec) |

use crate::models::{
    BackendType, ClassificationMap, ElementConfig, ElementSnapshot, ElementUuid,
    PostgresElementConfig, UpsertStrategy,
};
use crate::storage::codec;
use crate::storage::sql::{
    ConnectionParams, Cursor, PostgresHelper, SqlExecutor, SqlParam, SqlStatements, SqlValue,
    table_create_lock,
};
use crate::storage::traits::ClassificationElement;
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// PostgreSQL-backed classification element.
///
/// Identifiers are stored in their string form, so an element keyed by
/// `Integer(42)` reads the same row as one keyed by `Text("42")`.
pub struct PostgresClassificationElement {
    type_name: String,
    uuid: ElementUuid,
    config: PostgresElementConfig,
    statements: SqlStatements,
    helper: Arc<dyn SqlExecutor>,
}

impl PostgresClassificationElement {
    /// Creates an element backed by a [`PostgresHelper`] for `config`.
    ///
    /// No connection is opened until the first read or write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a table or column name is invalid.
    pub fn new(
        type_name: impl Into<String>,
        uuid: impl Into<ElementUuid>,
        config: PostgresElementConfig,
    ) -> Result<Self> {
        let helper = Arc::new(PostgresHelper::new(
            ConnectionParams::from(&config),
            table_create_lock(),
        ));
        Self::with_executor(type_name, uuid, config, helper)
    }

    /// Creates an element that runs its statements through `helper`.
    ///
    /// When `config.create_table` is set, the table creation statement is
    /// registered with the helper.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a table or column name is invalid.
    pub fn with_executor(
        type_name: impl Into<String>,
        uuid: impl Into<ElementUuid>,
        config: PostgresElementConfig,
        helper: Arc<dyn SqlExecutor>,
    ) -> Result<Self> {
        let statements = SqlStatements::new(&config)?;
        if config.create_table {
            helper.set_table_create_sql(statements.create_table.clone());
        }

        Ok(Self {
            type_name: type_name.into(),
            uuid: uuid.into(),
            config,
            statements,
            helper,
        })
    }

    /// Rebuilds an element from a postgres snapshot.
    ///
    /// Only configuration is restored; connections are opened lazily.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the snapshot came from another
    /// backend or holds invalid names.
    pub fn from_snapshot(snapshot: ElementSnapshot) -> Result<Self> {
        let (type_name, uuid, config) = Self::unpack(snapshot)?;
        Self::new(type_name, uuid, config)
    }

    /// Rebuilds an element from a snapshot using an existing helper.
    ///
    /// # Errors
    ///
    /// Same as [`from_snapshot`](Self::from_snapshot).
    pub fn from_snapshot_with_executor(
        snapshot: ElementSnapshot,
        helper: Arc<dyn SqlExecutor>,
    ) -> Result<Self> {
        let (type_name, uuid, config) = Self::unpack(snapshot)?;
        Self::with_executor(type_name, uuid, config, helper)
    }

    fn unpack(snapshot: ElementSnapshot) -> Result<(String, ElementUuid, PostgresElementConfig)> {
        match snapshot {
            ElementSnapshot::Postgres {
                type_name,
                uuid,
                config,
            } => Ok((type_name, uuid, config)),
            other => Err(Error::InvalidInput(format!(
                "cannot restore a {} snapshot into a postgres element",
                other.backend_type()
            ))),
        }
    }

    /// Table and connection configuration.
    #[must_use]
    pub const fn config(&self) -> &PostgresElementConfig {
        &self.config
    }

    /// Writes `blob` with a single `INSERT ... ON CONFLICT` statement.
    fn write_on_conflict(&self, uuid: &str, blob: &[u8]) -> Result<()> {
        let upsert = &self.statements.upsert;
        let params = [
            SqlParam::Text(&self.type_name),
            SqlParam::Text(uuid),
            SqlParam::Bytes(blob),
        ];
        self.helper.single_execute(
            &mut |cursor: &mut dyn Cursor| -> Result<()> {
                cursor.execute(upsert, &params)?;
                Ok(())
            },
            false,
        )?;
        Ok(())
    }

    /// Writes `blob` with `UPDATE`, falling back to `INSERT`.
    ///
    /// A unique violation on the insert means a concurrent writer created the
    /// row first; the second attempt then updates it.
    fn write_update_then_insert(&self, uuid: &str, blob: &[u8]) -> Result<()> {
        let update = &self.statements.update;
        let insert = &self.statements.insert;
        let params = [
            SqlParam::Text(&self.type_name),
            SqlParam::Text(uuid),
            SqlParam::Bytes(blob),
        ];
        let attempt = || {
            self.helper.single_execute(
                &mut |cursor: &mut dyn Cursor| -> Result<()> {
                    if cursor.execute(update, &params)? == 0 {
                        cursor.execute(insert, &params)?;
                    }
                    Ok(())
                },
                false,
            )
        };

        match attempt() {
            Err(Error::UniqueViolation { cause, .. }) => {
                tracing::warn!(
                    type_name = %self.type_name,
                    uuid,
                    cause = %cause,
                    "Concurrent insert won the race, retrying as update"
                );
                metrics::counter!("classification_upsert_retry_total").increment(1);
                attempt()?;
                Ok(())
            },
            other => other.map(|_| ()),
        }
    }
}

impl fmt::Debug for PostgresClassificationElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresClassificationElement")
            .field("type_name", &self.type_name)
            .field("uuid", &self.uuid)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ClassificationElement for PostgresClassificationElement {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn uuid(&self) -> &ElementUuid {
        &self.uuid
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Postgres
    }

    fn has_classifications(&self) -> Result<bool> {
        match self.get_classification() {
            Ok(m) => Ok(!m.is_empty()),
            Err(e) if e.is_no_classification() => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(type_name = %self.type_name, uuid = %self.uuid))]
    fn get_classification(&self) -> Result<ClassificationMap> {
        metrics::counter!("classification_get_total", "backend" => "postgres").increment(1);

        let uuid = self.uuid.to_string();
        let select = &self.statements.select;
        let params = [SqlParam::Text(&self.type_name), SqlParam::Text(&uuid)];
        let rows = self.helper.single_execute(
            &mut |cursor: &mut dyn Cursor| -> Result<()> {
                cursor.query(select, &params)?;
                Ok(())
            },
            true,
        )?;

        let Some(row) = rows.first() else {
            metrics::counter!("classification_miss_total", "backend" => "postgres").increment(1);
            return Err(Error::NoClassification {
                type_name: self.type_name.clone(),
                uuid,
            });
        };

        let blob = row.first().and_then(SqlValue::as_bytes).ok_or_else(|| {
            Error::Serialization(format!(
                "column '{}' did not hold a binary value",
                self.config.classification_col
            ))
        })?;
        codec::decode(blob)
    }

    #[instrument(skip(self, scores), fields(type_name = %self.type_name, uuid = %self.uuid))]
    fn set_classification(&self, scores: ClassificationMap) -> Result<ClassificationMap> {
        let normalized = self.normalize(scores)?;
        let blob = codec::encode(&normalized, self.config.protocol)?;
        let uuid = self.uuid.to_string();

        match self.config.upsert {
            UpsertStrategy::OnConflict => self.write_on_conflict(&uuid, &blob)?,
            UpsertStrategy::UpdateThenInsert => self.write_update_then_insert(&uuid, &blob)?,
        }

        metrics::counter!("classification_set_total", "backend" => "postgres").increment(1);
        tracing::debug!(
            labels = normalized.len(),
            bytes = blob.len(),
            "Stored classification row"
        );
        Ok(normalized)
    }

    fn get_config(&self) -> ElementConfig {
        ElementConfig::Postgres(self.config.clone())
    }

    fn snapshot(&self) -> ElementSnapshot {
        ElementSnapshot::Postgres {
            type_name: self.type_name.clone(),
            uuid: self.uuid.clone(),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SerializationProtocol;
    use crate::storage::sql::{CursorCallback, SqlRow};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    type Rows = HashMap<(String, String), Vec<u8>>;

    /// In-process executor that interprets the generated statements.
    #[derive(Default)]
    struct FakeExecutor {
        statements: Mutex<Option<SqlStatements>>,
        rows: Mutex<Rows>,
        create_sql: Mutex<Option<String>>,
        table_created: AtomicBool,
        deny_create: AtomicBool,
        unreachable: AtomicBool,
        race_next_insert: AtomicBool,
        executions: AtomicUsize,
    }

    impl FakeExecutor {
        fn for_config(config: &PostgresElementConfig) -> Arc<Self> {
            let fake = Self::default();
            *fake.statements.lock() = Some(SqlStatements::new(config).unwrap());
            Arc::new(fake)
        }

        fn row_count(&self) -> usize {
            self.rows.lock().len()
        }

        fn put_raw(&self, type_name: &str, uuid: &str, blob: Vec<u8>) {
            self.rows
                .lock()
                .insert((type_name.to_string(), uuid.to_string()), blob);
        }
    }

    struct FakeCursor<'a> {
        statements: &'a SqlStatements,
        staged: &'a mut Rows,
        race_next_insert: &'a AtomicBool,
        race_winner: Option<((String, String), Vec<u8>)>,
        result: Vec<SqlRow>,
    }

    fn key_of(params: &[SqlParam<'_>]) -> (String, String) {
        match params {
            [SqlParam::Text(t), SqlParam::Text(u), ..] => ((*t).to_string(), (*u).to_string()),
            _ => panic!("unexpected params: {params:?}"),
        }
    }

    fn blob_of(params: &[SqlParam<'_>]) -> Vec<u8> {
        match params {
            [_, _, SqlParam::Bytes(b)] => b.to_vec(),
            _ => panic!("unexpected params: {params:?}"),
        }
    }

    impl Cursor for FakeCursor<'_> {
        fn execute(&mut self, sql: &str, params: &[SqlParam<'_>]) -> Result<u64> {
            let key = key_of(params);
            if sql == self.statements.upsert {
                self.staged.insert(key, blob_of(params));
                Ok(1)
            } else if sql == self.statements.update {
                match self.staged.get_mut(&key) {
                    Some(existing) => {
                        *existing = blob_of(params);
                        Ok(1)
                    },
                    None => Ok(0),
                }
            } else if sql == self.statements.insert {
                if self.race_next_insert.swap(false, Ordering::SeqCst) {
                    self.race_winner = Some((key, b"\x01{\"racer\":1.0}".to_vec()));
                    return Err(Error::UniqueViolation {
                        operation: "fake_insert".to_string(),
                        cause: "duplicate key".to_string(),
                    });
                }
                if self.staged.contains_key(&key) {
                    return Err(Error::UniqueViolation {
                        operation: "fake_insert".to_string(),
                        cause: "duplicate key".to_string(),
                    });
                }
                self.staged.insert(key, blob_of(params));
                Ok(1)
            } else {
                panic!("unexpected statement: {sql}");
            }
        }

        fn query(&mut self, sql: &str, params: &[SqlParam<'_>]) -> Result<usize> {
            assert_eq!(sql, self.statements.select);
            self.result = self
                .staged
                .get(&key_of(params))
                .map(|b| vec![vec![SqlValue::Bytes(b.clone())]])
                .unwrap_or_default();
            Ok(self.result.len())
        }
    }

    impl SqlExecutor for FakeExecutor {
        fn set_table_create_sql(&self, sql: String) {
            *self.create_sql.lock() = Some(sql);
        }

        fn single_execute(
            &self,
            callback: &mut CursorCallback<'_>,
            yield_result_rows: bool,
        ) -> Result<Vec<SqlRow>> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(Error::Connectivity {
                    operation: "fake_get_client".to_string(),
                    cause: "connection refused".to_string(),
                });
            }
            if self.create_sql.lock().is_some() && !self.table_created.load(Ordering::SeqCst) {
                if self.deny_create.load(Ordering::SeqCst) {
                    return Err(Error::PermissionDenied {
                        operation: "fake_create_table".to_string(),
                        cause: "permission denied for schema public".to_string(),
                    });
                }
                self.table_created.store(true, Ordering::SeqCst);
            }

            let statements = self.statements.lock().clone().unwrap();
            let mut rows = self.rows.lock();
            let mut staged = rows.clone();
            let mut cursor = FakeCursor {
                statements: &statements,
                staged: &mut staged,
                race_next_insert: &self.race_next_insert,
                race_winner: None,
                result: Vec::new(),
            };
            if let Err(e) = callback(&mut cursor) {
                // The concurrent writer's transaction commits; ours rolls back.
                if let Some((key, blob)) = cursor.race_winner.take() {
                    rows.insert(key, blob);
                }
                return Err(e);
            }
            let result = std::mem::take(&mut cursor.result);
            *rows = staged;
            Ok(if yield_result_rows { result } else { Vec::new() })
        }
    }

    fn element(fake: &Arc<FakeExecutor>, config: PostgresElementConfig) -> PostgresClassificationElement {
        PostgresClassificationElement::with_executor(
            "clf_a",
            "item_42",
            config,
            Arc::clone(fake) as Arc<dyn SqlExecutor>,
        )
        .unwrap()
    }

    fn cat_dog() -> ClassificationMap {
        ClassificationMap::from_pairs([("cat", 0.9), ("dog", 0.1)])
    }

    #[test]
    fn test_missing_row_is_no_classification() {
        let config = PostgresElementConfig::default();
        let fake = FakeExecutor::for_config(&config);
        let e = element(&fake, config);

        assert!(!e.has_classifications().unwrap());
        assert!(e.get_classification().unwrap_err().is_no_classification());
    }

    #[test]
    fn test_set_then_get_both_strategies() {
        for upsert in [UpsertStrategy::OnConflict, UpsertStrategy::UpdateThenInsert] {
            let config = PostgresElementConfig::default().with_upsert(upsert);
            let fake = FakeExecutor::for_config(&config);
            let e = element(&fake, config);

            assert_eq!(e.set_classification(cat_dog()).unwrap(), cat_dog());
            assert!(e.has_classifications().unwrap());
            assert_eq!(e.get_classification().unwrap(), cat_dog());
            assert_eq!(fake.row_count(), 1);
        }
    }

    #[test]
    fn test_overwrite_keeps_single_row() {
        for upsert in [UpsertStrategy::OnConflict, UpsertStrategy::UpdateThenInsert] {
            let config = PostgresElementConfig::default().with_upsert(upsert);
            let fake = FakeExecutor::for_config(&config);
            let e = element(&fake, config);

            e.set_classification(cat_dog()).unwrap();
            let second = ClassificationMap::from_pairs([("bird", 1.0)]);
            e.set_classification(second.clone()).unwrap();

            assert_eq!(e.get_classification().unwrap(), second);
            assert_eq!(fake.row_count(), 1);
        }
    }

    #[test]
    fn test_two_instances_share_one_row() {
        let config = PostgresElementConfig::default();
        let fake = FakeExecutor::for_config(&config);
        let a = element(&fake, config.clone());
        let b = element(&fake, config);

        a.set_classification(cat_dog()).unwrap();
        assert_eq!(b.get_classification().unwrap(), cat_dog());
        b.set_classification_pairs(&[("fish", 0.5)]).unwrap();
        assert_eq!(a.get_classification().unwrap().get("fish"), Some(0.5));
        assert_eq!(fake.row_count(), 1);
    }

    #[test]
    fn test_uuid_is_coerced_to_string() {
        let config = PostgresElementConfig::default();
        let fake = FakeExecutor::for_config(&config);
        let int_keyed = PostgresClassificationElement::with_executor(
            "clf_a",
            42_i64,
            config.clone(),
            Arc::clone(&fake) as Arc<dyn SqlExecutor>,
        )
        .unwrap();
        let text_keyed = PostgresClassificationElement::with_executor(
            "clf_a",
            "42",
            config,
            Arc::clone(&fake) as Arc<dyn SqlExecutor>,
        )
        .unwrap();

        int_keyed.set_classification(cat_dog()).unwrap();
        assert_eq!(text_keyed.get_classification().unwrap(), cat_dog());
        assert!(fake.rows.lock().contains_key(&("clf_a".to_string(), "42".to_string())));
    }

    #[test]
    fn test_upsert_race_retries_as_update() {
        let config = PostgresElementConfig::default().with_upsert(UpsertStrategy::UpdateThenInsert);
        let fake = FakeExecutor::for_config(&config);
        let e = element(&fake, config);
        fake.race_next_insert.store(true, Ordering::SeqCst);

        e.set_classification(cat_dog()).unwrap();

        assert_eq!(e.get_classification().unwrap(), cat_dog());
        assert_eq!(fake.row_count(), 1);
        // failed attempt, retry, read
        assert_eq!(fake.executions.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_upsert_race_loser_on_conflict_is_single_statement() {
        let config = PostgresElementConfig::default();
        let fake = FakeExecutor::for_config(&config);
        let e = element(&fake, config);
        fake.race_next_insert.store(true, Ordering::SeqCst);

        e.set_classification(cat_dog()).unwrap();
        assert_eq!(fake.executions.load(Ordering::SeqCst), 1);
        assert_eq!(e.get_classification().unwrap(), cat_dog());
    }

    #[test]
    fn test_invalid_scores_do_not_touch_database() {
        let config = PostgresElementConfig::default();
        let fake = FakeExecutor::for_config(&config);
        let e = element(&fake, config);

        let err = e.set_classification(ClassificationMap::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(fake.executions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_create_table_registration() {
        let config = PostgresElementConfig::default();
        let fake = FakeExecutor::for_config(&config);
        let _e = element(&fake, config.clone());
        let registered = fake.create_sql.lock().clone().unwrap();
        assert_eq!(registered, SqlStatements::new(&config).unwrap().create_table);

        let config = PostgresElementConfig::default().with_create_table(false);
        let fake = FakeExecutor::for_config(&config);
        let _e = element(&fake, config);
        assert!(fake.create_sql.lock().is_none());
    }

    #[test]
    fn test_create_table_failure_surfaces() {
        let config = PostgresElementConfig::default();
        let fake = FakeExecutor::for_config(&config);
        fake.deny_create.store(true, Ordering::SeqCst);
        let e = element(&fake, config);

        let err = e.set_classification(cat_dog()).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
        assert!(matches!(
            e.has_classifications(),
            Err(Error::PermissionDenied { .. })
        ));

        // Creation is retried once the privilege is granted.
        fake.deny_create.store(false, Ordering::SeqCst);
        assert!(!e.has_classifications().unwrap());
        e.set_classification(cat_dog()).unwrap();
        assert!(e.has_classifications().unwrap());
    }

    #[test]
    fn test_unreachable_database_surfaces_from_has() {
        let config = PostgresElementConfig::default();
        let fake = FakeExecutor::for_config(&config);
        fake.unreachable.store(true, Ordering::SeqCst);
        let e = element(&fake, config);

        assert!(matches!(e.has_classifications(), Err(Error::Connectivity { .. })));
        assert!(matches!(e.get_classification(), Err(Error::Connectivity { .. })));
        assert!(matches!(
            e.set_classification(cat_dog()),
            Err(Error::Connectivity { .. })
        ));
    }

    #[test]
    fn test_corrupt_row_is_serialization_failure() {
        let config = PostgresElementConfig::default();
        let fake = FakeExecutor::for_config(&config);
        let e = element(&fake, config);
        fake.put_raw("clf_a", "item_42", vec![0x99, 0x00]);

        assert!(matches!(e.get_classification(), Err(Error::Serialization(_))));
        assert!(matches!(e.has_classifications(), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_reads_rows_written_with_other_protocol() {
        let json_cfg = PostgresElementConfig::default().with_protocol(SerializationProtocol::Json);
        let fake = FakeExecutor::for_config(&json_cfg);
        let writer = element(&fake, json_cfg);
        writer.set_classification(cat_dog()).unwrap();

        let reader = element(&fake, PostgresElementConfig::default());
        assert_eq!(reader.get_classification().unwrap(), cat_dog());
    }

    #[test]
    fn test_config_round_trip_rebuilds_equivalent_element() {
        let config = PostgresElementConfig {
            table_name: "scores".to_string(),
            db_host: Some("db.internal".to_string()),
            db_port: Some(6543),
            db_user: Some("reader".to_string()),
            db_pass: Some("pw".to_string()),
            protocol: SerializationProtocol::Json,
            create_table: false,
            ..Default::default()
        };
        let fake = FakeExecutor::for_config(&config);
        let original = element(&fake, config.clone());
        original.set_classification(cat_dog()).unwrap();

        let ElementConfig::Postgres(recovered) = original.get_config() else {
            panic!("expected postgres config");
        };
        assert_eq!(recovered, config);

        let rebuilt = element(&fake, recovered);
        assert_eq!(rebuilt.get_classification().unwrap(), cat_dog());
    }

    #[test]
    fn test_snapshot_restores_config_and_reads_same_row() {
        let config = PostgresElementConfig::default().with_table_name("snap_table");
        let fake = FakeExecutor::for_config(&config);
        let original = element(&fake, config);
        original.set_classification(cat_dog()).unwrap();

        let snap = original.snapshot();
        let json = snap.to_json().unwrap();
        let restored = PostgresClassificationElement::from_snapshot_with_executor(
            ElementSnapshot::from_json(&json).unwrap(),
            Arc::clone(&fake) as Arc<dyn SqlExecutor>,
        )
        .unwrap();

        assert_eq!(restored.type_name(), "clf_a");
        assert_eq!(restored.uuid(), original.uuid());
        assert_eq!(restored.config(), original.config());
        assert_eq!(
            restored.has_classifications().unwrap(),
            original.has_classifications().unwrap()
        );
        assert_eq!(
            restored.get_classification().unwrap(),
            original.get_classification().unwrap()
        );
    }

    #[test]
    fn test_memory_snapshot_is_rejected() {
        let snap = ElementSnapshot::Memory {
            type_name: "clf_a".to_string(),
            uuid: ElementUuid::from("item_42"),
            classification: None,
        };
        assert!(matches!(
            PostgresClassificationElement::from_snapshot(snap),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_invalid_names_rejected_at_construction() {
        let config = PostgresElementConfig::default().with_table_name("bad name");
        assert!(matches!(
            PostgresClassificationElement::new("clf_a", "1", config),
            Err(Error::InvalidInput(_))
        ));
    }
}
