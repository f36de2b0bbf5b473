//! The reconciliation pass
//!
//! A run drives the database to the plan in four strictly ordered phases:
//!
//! 1. drop every planned collection that exists
//! 2. create every planned collection
//! 3. build every declared index, in declared order
//! 4. insert each seed batch with one unordered `insert_many`
//!
//! Any failure in phases 1-3 aborts the run. In phase 4 a rejected document
//! is recorded and the rest of its batch still goes in; only a lost
//! connection or a rejected record in a `required_seeds` collection stops
//! the run. Re-running a plan yields the same state because every run
//! starts by dropping what the previous one built.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mongodb::bson::Document;
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::metrics::{time_db_operation, Timer};
use crate::plan::{ReconciliationPlan, SeedBatch};
use crate::seed::{Clock, RejectKind, SeedInsertError, SeedRecord, SystemClock};
use crate::store::{DatabaseHandle, StoreError};
use crate::telemetry::create_phase_span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Drop,
    Create,
    Index,
    Seed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Drop => "drop",
            Phase::Create => "create",
            Phase::Index => "index",
            Phase::Seed => "seed",
        })
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("collection '{0}' already exists after the drop phase")]
    CollectionExists(String),
    #[error("index '{index}' on '{collection}' conflicts with an existing index: {detail}")]
    IndexConflict {
        collection: String,
        index: String,
        detail: String,
    },
    #[error("database unreachable during {phase} phase: {message}")]
    Connection { phase: Phase, message: String },
    #[error("{phase} phase failed on '{collection}': {message}")]
    Store {
        phase: Phase,
        collection: String,
        message: String,
    },
    #[error("{rejected} of {total} required seed records for '{collection}' were rejected")]
    RequiredSeedRejected {
        collection: String,
        rejected: usize,
        total: usize,
    },
}

impl ReconcileError {
    fn from_store(phase: Phase, collection: &str, err: StoreError) -> Self {
        match err {
            StoreError::Connection(message) => ReconcileError::Connection { phase, message },
            StoreError::NamespaceExists(name) => ReconcileError::CollectionExists(name),
            StoreError::IndexConflict {
                collection,
                index,
                detail,
            } => ReconcileError::IndexConflict {
                collection,
                index,
                detail,
            },
            StoreError::Other(message) => ReconcileError::Store {
                phase,
                collection: collection.to_string(),
                message,
            },
        }
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub collections_dropped: usize,
    pub collections_created: usize,
    pub indexes_created: usize,
    pub records_seeded: usize,
    pub rejections: Vec<SeedInsertError>,
}

impl ReconcileReport {
    pub fn records_rejected(&self) -> usize {
        self.rejections.len()
    }

    /// Fold in the entries rejected while the plan was parsed, ahead of the
    /// ones rejected by the database.
    pub fn absorb_plan_rejections(&mut self, mut rejected: Vec<SeedInsertError>) {
        rejected.append(&mut self.rejections);
        self.rejections = rejected;
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "collections dropped: {}", self.collections_dropped)?;
        writeln!(f, "collections created: {}", self.collections_created)?;
        writeln!(f, "indexes created:     {}", self.indexes_created)?;
        writeln!(f, "records seeded:      {}", self.records_seeded)?;
        write!(f, "records rejected:    {}", self.records_rejected())?;
        for rejection in &self.rejections {
            write!(f, "\n  - {}", rejection)?;
        }
        Ok(())
    }
}

pub struct Reconciler<'a, H: DatabaseHandle + ?Sized> {
    db: &'a H,
    clock: Arc<dyn Clock>,
}

impl<'a, H: DatabaseHandle + ?Sized> Reconciler<'a, H> {
    pub fn new(db: &'a H) -> Self {
        Self {
            db,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub async fn run(&self, plan: &ReconciliationPlan) -> Result<ReconcileReport, ReconcileError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "reconcile",
            %run_id,
            collections = plan.collections().len(),
            seeds = plan.seed_count()
        );
        self.run_phases(plan).instrument(span).await
    }

    async fn run_phases(&self, plan: &ReconciliationPlan) -> Result<ReconcileReport, ReconcileError> {
        let mut timer = Timer::new("reconcile").with_thresholds(10_000, 60_000);
        // One instant for the whole run so every relative timestamp agrees
        let now = self.clock.now();
        let mut report = ReconcileReport::default();

        self.drop_phase(plan, &mut report)
            .instrument(create_phase_span("drop"))
            .await?;
        self.create_phase(plan, &mut report)
            .instrument(create_phase_span("create"))
            .await?;
        self.index_phase(plan, &mut report)
            .instrument(create_phase_span("index"))
            .await?;
        self.seed_phase(plan, now, &mut report)
            .instrument(create_phase_span("seed"))
            .await?;

        info!(
            dropped = report.collections_dropped,
            created = report.collections_created,
            indexes = report.indexes_created,
            seeded = report.records_seeded,
            rejected = report.records_rejected(),
            "reconciliation finished"
        );
        timer.log_elapsed(None);
        Ok(report)
    }

    async fn drop_phase(
        &self,
        plan: &ReconciliationPlan,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        for spec in plan.collections() {
            let name = spec.name();
            let existed = time_db_operation("drop_collection", name, self.db.drop_collection(name))
                .await
                .map_err(|e| ReconcileError::from_store(Phase::Drop, name, e))?;
            if existed {
                report.collections_dropped += 1;
                debug!(collection = name, "dropped");
            }
        }
        Ok(())
    }

    async fn create_phase(
        &self,
        plan: &ReconciliationPlan,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        for spec in plan.collections() {
            let name = spec.name();
            time_db_operation("create_collection", name, self.db.create_collection(name))
                .await
                .map_err(|e| ReconcileError::from_store(Phase::Create, name, e))?;
            report.collections_created += 1;
        }
        Ok(())
    }

    async fn index_phase(
        &self,
        plan: &ReconciliationPlan,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        for spec in plan.collections() {
            let name = spec.name();
            for index in spec.indexes() {
                let built = time_db_operation("create_index", name, self.db.create_index(name, index))
                    .await
                    .map_err(|e| ReconcileError::from_store(Phase::Index, name, e))?;
                debug!(collection = name, index = %built, keys = %index.keys(), unique = index.is_unique(), "index built");
                report.indexes_created += 1;
            }
        }
        Ok(())
    }

    async fn seed_phase(
        &self,
        plan: &ReconciliationPlan,
        now: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        for batch in plan.batches() {
            let rejected = self.seed_batch(batch, now, report).await? + batch.rejected_on_load();
            if rejected == 0 {
                continue;
            }
            let total = batch.total();
            warn!(collection = batch.collection(), rejected, total, "seed records rejected");
            let required = plan
                .collection(batch.collection())
                .is_some_and(|c| c.required_seeds());
            if required {
                return Err(ReconcileError::RequiredSeedRejected {
                    collection: batch.collection().to_string(),
                    rejected,
                    total,
                });
            }
        }
        Ok(())
    }

    /// Insert one batch; returns how many of its records were rejected
    async fn seed_batch(
        &self,
        batch: &SeedBatch,
        now: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) -> Result<usize, ReconcileError> {
        let collection = batch.collection();
        let before = report.rejections.len();
        let mut documents: Vec<Document> = Vec::with_capacity(batch.records().len());
        let mut submitted: Vec<&SeedRecord> = Vec::with_capacity(batch.records().len());
        for record in batch.records() {
            match record.to_document(now) {
                Ok(doc) => {
                    documents.push(doc);
                    submitted.push(record);
                }
                Err(e) => report.rejections.push(SeedInsertError::for_record(
                    record,
                    RejectKind::Invalid,
                    e.to_string(),
                )),
            }
        }
        if documents.is_empty() {
            return Ok(report.rejections.len() - before);
        }

        match time_db_operation("insert_many", collection, self.db.insert_many(collection, documents)).await {
            Ok(outcome) => {
                report.records_seeded += outcome.inserted;
                for rejection in outcome.rejected {
                    match submitted.get(rejection.index) {
                        Some(record) => report.rejections.push(SeedInsertError::for_record(
                            record,
                            rejection.kind,
                            rejection.message,
                        )),
                        None => warn!(
                            collection,
                            index = rejection.index,
                            "store reported a rejection outside the submitted batch"
                        ),
                    }
                }
            }
            Err(StoreError::Connection(message)) => {
                return Err(ReconcileError::Connection {
                    phase: Phase::Seed,
                    message,
                });
            }
            Err(err) => {
                let reason = err.to_string();
                for record in &submitted {
                    report.rejections.push(SeedInsertError::for_record(
                        record,
                        RejectKind::Store,
                        reason.clone(),
                    ));
                }
            }
        }
        Ok(report.rejections.len() - before)
    }
}

/// Reconcile `db` to `plan` using the system clock
pub async fn reconcile<H: DatabaseHandle + ?Sized>(
    plan: &ReconciliationPlan,
    db: &H,
) -> Result<ReconcileReport, ReconcileError> {
    Reconciler::new(db).run(plan).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CollectionSpec, IndexSpec};
    use crate::seed::{FixedClock, SeedValue};
    use crate::store::{MemoryStore, StoreCall};
    use chrono::{Duration, TimeZone};
    use mongodb::bson::{doc, oid::ObjectId};

    fn category_id(n: u8) -> SeedValue {
        SeedValue::ObjectId(ObjectId::parse_str(format!("6500000000000000000000{:02x}", n)).unwrap())
    }

    fn category(position: usize, n: u8, slug: &str) -> SeedRecord {
        SeedRecord::new(
            "categories",
            vec![
                ("slug".to_string(), SeedValue::String(slug.to_string())),
                ("active".to_string(), SeedValue::Bool(true)),
            ],
        )
        .with_id(category_id(n))
        .at_position(position)
    }

    fn course(position: usize, slug: &str, category: u8) -> SeedRecord {
        SeedRecord::new(
            "courses",
            vec![
                ("slug".to_string(), SeedValue::String(slug.to_string())),
                ("category_id".to_string(), category_id(category)),
            ],
        )
        .at_position(position)
    }

    fn collections() -> Vec<CollectionSpec> {
        vec![
            CollectionSpec::new("categories", vec![IndexSpec::unique_on("slug")]),
            CollectionSpec::new(
                "courses",
                vec![IndexSpec::unique_on("slug"), IndexSpec::on("category_id")],
            ),
        ]
    }

    fn plan_with_categories(slugs: &[&str]) -> ReconciliationPlan {
        let mut records: Vec<SeedRecord> = slugs
            .iter()
            .enumerate()
            .map(|(i, slug)| category(i, i as u8 + 1, slug))
            .collect();
        let base = records.len();
        records.push(course(base, "spring-boot", 2));
        records.push(course(base + 1, "react", 2));
        records.push(course(base + 2, "python-data", 4));
        ReconciliationPlan::new(collections(), records).unwrap()
    }

    const SLUGS: [&str; 5] = [
        "programming",
        "web-development",
        "mobile-development",
        "data-science",
        "business",
    ];

    async fn snapshot(store: &MemoryStore) -> Vec<(String, Vec<Document>, usize)> {
        let mut out = Vec::new();
        for name in store.collection_names().await.unwrap() {
            let indexes = store.indexes(&name).await.unwrap().len();
            out.push((name.clone(), store.documents(&name), indexes));
        }
        out
    }

    #[tokio::test]
    async fn test_categories_then_courses() {
        let store = MemoryStore::new();
        let report = reconcile(&plan_with_categories(&SLUGS), &store).await.unwrap();
        assert_eq!(report.collections_created, 2);
        assert_eq!(report.indexes_created, 3);
        assert_eq!(report.records_seeded, 8);
        assert_eq!(report.records_rejected(), 0);
        assert_eq!(store.count_documents("categories").await.unwrap(), 5);
        assert_eq!(store.count_documents("courses").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_slug_rejected_run_completes() {
        let store = MemoryStore::new();
        let slugs = ["programming", "web-development", "programming", "data-science", "business"];
        let report = reconcile(&plan_with_categories(&slugs), &store).await.unwrap();
        assert_eq!(store.count_documents("categories").await.unwrap(), 4);
        assert_eq!(store.count_documents("courses").await.unwrap(), 3);
        assert_eq!(report.records_rejected(), 1);
        let rejection = &report.rejections[0];
        assert_eq!(rejection.kind, RejectKind::DuplicateKey);
        assert_eq!(rejection.collection, "categories");
        assert_eq!(rejection.position, 2);
        assert_eq!(
            rejection.id.as_deref(),
            Some("650000000000000000000003")
        );
    }

    #[tokio::test]
    async fn test_partial_failure_isolation() {
        let store = MemoryStore::new();
        let slugs = ["a", "b", "c", "b", "e", "f"];
        let report = reconcile(&plan_with_categories(&slugs), &store).await.unwrap();
        let categories = store.documents("categories");
        assert_eq!(categories.len(), slugs.len() - 1);
        assert_eq!(report.records_rejected(), 1);
        let survivors: Vec<_> = categories
            .iter()
            .filter(|d| d.get_str("slug").ok() == Some("b"))
            .collect();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].get_object_id("_id").unwrap().to_hex(), "650000000000000000000002");
    }

    #[tokio::test]
    async fn test_idempotent_rerun() {
        let store = MemoryStore::new();
        let plan = plan_with_categories(&SLUGS);
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        Reconciler::new(&store).with_clock(clock).run(&plan).await.unwrap();
        let first = snapshot(&store).await;
        // courses have server-generated ids, so compare them without _id
        let strip = |state: Vec<(String, Vec<Document>, usize)>| {
            state
                .into_iter()
                .map(|(name, docs, indexes)| {
                    let docs: Vec<Document> = docs
                        .into_iter()
                        .map(|mut d| {
                            if name == "courses" {
                                d.remove("_id");
                            }
                            d
                        })
                        .collect();
                    (name, docs, indexes)
                })
                .collect::<Vec<_>>()
        };
        let report = Reconciler::new(&store).with_clock(clock).run(&plan).await.unwrap();
        assert_eq!(report.collections_dropped, 2);
        assert_eq!(report.records_rejected(), 0);
        assert_eq!(strip(snapshot(&store).await), strip(first));
    }

    #[tokio::test]
    async fn test_rerun_wipes_out_of_band_documents() {
        let store = MemoryStore::new();
        let plan = plan_with_categories(&SLUGS);
        reconcile(&plan, &store).await.unwrap();
        store
            .insert_many("courses", vec![doc! {"slug": "stray", "category_id": 1}])
            .await
            .unwrap();
        assert_eq!(store.count_documents("courses").await.unwrap(), 4);
        reconcile(&plan, &store).await.unwrap();
        assert_eq!(store.count_documents("courses").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_phase_order() {
        let store = MemoryStore::new();
        reconcile(&plan_with_categories(&SLUGS), &store).await.unwrap();
        let journal = store.journal();
        let rank = |call: &StoreCall| match call {
            StoreCall::DropCollection(_) => 0,
            StoreCall::CreateCollection(_) => 1,
            StoreCall::CreateIndex { .. } => 2,
            StoreCall::InsertMany { .. } => 3,
        };
        assert!(journal.windows(2).all(|w| rank(&w[0]) <= rank(&w[1])));
        assert_eq!(
            journal.iter().filter(|c| matches!(c, StoreCall::CreateIndex { .. })).count(),
            3
        );
        assert_eq!(
            journal.last(),
            Some(&StoreCall::InsertMany {
                collection: "courses".to_string(),
                documents: 3
            })
        );
    }

    #[tokio::test]
    async fn test_relative_timestamps_use_injected_clock() {
        let store = MemoryStore::new();
        let spec = CollectionSpec::new("courses", vec![]);
        let record = SeedRecord::new(
            "courses",
            vec![(
                "discountExpiry".to_string(),
                SeedValue::Timestamp(crate::seed::Timestamp::FromNow(Duration::days(30))),
            )],
        );
        let plan = ReconciliationPlan::new(vec![spec], vec![record]).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        Reconciler::new(&store).with_clock(FixedClock(now)).run(&plan).await.unwrap();
        let docs = store.documents("courses");
        assert_eq!(
            docs[0].get_datetime("discountExpiry").unwrap().timestamp_millis(),
            (now + Duration::days(30)).timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_connection_loss_aborts() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = reconcile(&plan_with_categories(&SLUGS), &store).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Connection {
                phase: Phase::Drop,
                ..
            }
        ));
    }

    /// Wraps the memory store to simulate a drop that silently does
    /// nothing or an index build that collides with a live index.
    struct Faulty {
        inner: MemoryStore,
        skip_drop: bool,
        conflict_index: bool,
    }

    #[async_trait::async_trait]
    impl DatabaseHandle for Faulty {
        async fn drop_collection(&self, name: &str) -> Result<bool, StoreError> {
            if self.skip_drop {
                return Ok(false);
            }
            self.inner.drop_collection(name).await
        }

        async fn create_collection(&self, name: &str) -> Result<(), StoreError> {
            self.inner.create_collection(name).await
        }

        async fn create_index(
            &self,
            collection: &str,
            index: &IndexSpec,
        ) -> Result<String, StoreError> {
            if self.conflict_index {
                return Err(StoreError::IndexConflict {
                    collection: collection.to_string(),
                    index: index.name(),
                    detail: "different key pattern".to_string(),
                });
            }
            self.inner.create_index(collection, index).await
        }

        async fn insert_many(
            &self,
            collection: &str,
            documents: Vec<Document>,
        ) -> Result<crate::store::InsertOutcome, StoreError> {
            self.inner.insert_many(collection, documents).await
        }

        async fn collection_names(&self) -> Result<Vec<String>, StoreError> {
            self.inner.collection_names().await
        }

        async fn indexes(&self, collection: &str) -> Result<Vec<crate::store::IndexInfo>, StoreError> {
            self.inner.indexes(collection).await
        }

        async fn count_documents(&self, collection: &str) -> Result<u64, StoreError> {
            self.inner.count_documents(collection).await
        }
    }

    #[tokio::test]
    async fn test_index_conflict_aborts_before_seeding() {
        let store = Faulty {
            inner: MemoryStore::new(),
            skip_drop: false,
            conflict_index: true,
        };
        let err = reconcile(&plan_with_categories(&SLUGS), &store).await.unwrap_err();
        assert!(matches!(err, ReconcileError::IndexConflict { ref index, .. } if index == "slug_1"));
        assert!(!store
            .inner
            .journal()
            .iter()
            .any(|c| matches!(c, StoreCall::InsertMany { .. })));
    }

    #[tokio::test]
    async fn test_skipped_drop_surfaces_collection_exists() {
        let store = Faulty {
            inner: MemoryStore::new(),
            skip_drop: true,
            conflict_index: false,
        };
        store.inner.create_collection("categories").await.unwrap();
        let err = reconcile(&plan_with_categories(&SLUGS), &store).await.unwrap_err();
        assert!(matches!(err, ReconcileError::CollectionExists(ref name) if name == "categories"));
        assert_eq!(store.inner.count_documents("courses").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_required_seeds_abort_after_batch() {
        let store = MemoryStore::new();
        let specs = vec![
            CollectionSpec::new("categories", vec![IndexSpec::unique_on("slug")])
                .with_required_seeds(true),
            CollectionSpec::new("courses", vec![]),
        ];
        let records = vec![
            category(0, 1, "programming"),
            category(1, 2, "programming"),
            course(2, "a", 1),
        ];
        let plan = ReconciliationPlan::new(specs, records).unwrap();
        let err = reconcile(&plan, &store).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::RequiredSeedRejected {
                rejected: 1,
                total: 2,
                ..
            }
        ));
        assert_eq!(store.count_documents("categories").await.unwrap(), 1);
        assert_eq!(store.count_documents("courses").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_required_seeds_count_entries_rejected_on_load() {
        let text = r#"{
            "collections": [
                {"name": "categories", "indexes": [{"keys": {"slug": 1}, "unique": true}],
                 "required_seeds": true},
                {"name": "courses"}
            ],
            "seeds": [
                {"collection": "categories", "document": {"slug": "a"}},
                {"collection": "categories", "document": {"slug": {"$oops": 1}}},
                {"collection": "courses", "document": {"slug": "rust"}}
            ]
        }"#;
        let loaded = ReconciliationPlan::from_json_str(text).unwrap();
        assert_eq!(loaded.rejected.len(), 1);

        let store = MemoryStore::new();
        let err = reconcile(&loaded.plan, &store).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::RequiredSeedRejected {
                ref collection,
                rejected: 1,
                total: 2,
            } if collection == "categories"
        ));
        assert_eq!(store.count_documents("categories").await.unwrap(), 1);
        assert_eq!(store.count_documents("courses").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_required_collection_with_every_entry_rejected_on_load() {
        let text = r#"{
            "collections": [{"name": "categories", "required_seeds": true}, {"name": "courses"}],
            "seeds": [
                {"collection": "categories", "id": [1], "document": {"slug": "a"}},
                {"collection": "courses", "document": {"slug": "rust"}}
            ]
        }"#;
        let loaded = ReconciliationPlan::from_json_str(text).unwrap();
        let err = reconcile(&loaded.plan, &MemoryStore::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::RequiredSeedRejected {
                rejected: 1,
                total: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_optional_collection_tolerates_entries_rejected_on_load() {
        let text = r#"{
            "collections": [{"name": "courses"}],
            "seeds": [
                {"collection": "courses", "document": {"slug": "rust"}},
                {"collection": "courses", "document": {"slug": {"$oops": 1}}}
            ]
        }"#;
        let loaded = ReconciliationPlan::from_json_str(text).unwrap();
        let store = MemoryStore::new();
        let report = reconcile(&loaded.plan, &store).await.unwrap();
        assert_eq!(report.records_seeded, 1);
        assert_eq!(store.count_documents("courses").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shipped_fixture_rehearses_cleanly() {
        let loaded =
            ReconciliationPlan::from_json_str(include_str!("../fixtures/course_service.json")).unwrap();
        assert!(loaded.rejected.is_empty());
        assert_eq!(loaded.plan.database(), Some("course_service"));
        let store = MemoryStore::new();
        let report = reconcile(&loaded.plan, &store).await.unwrap();
        assert_eq!(report.collections_created, 7);
        assert_eq!(report.indexes_created, 33);
        assert_eq!(report.records_seeded, 7);
        assert_eq!(report.records_rejected(), 0);
        let courses = store.documents("courses");
        assert_eq!(courses[0].get_str("slug").unwrap(), "complete-spring-boot-masterclass");
        assert!(courses[1].is_null("discountExpiry"));
    }

    #[test]
    fn test_report_display_and_plan_rejections() {
        let mut report = ReconcileReport {
            records_seeded: 2,
            rejections: vec![SeedInsertError::for_record(
                &course(3, "x", 1),
                RejectKind::DuplicateKey,
                "dup",
            )],
            ..Default::default()
        };
        report.absorb_plan_rejections(vec![SeedInsertError::for_record(
            &course(1, "y", 1),
            RejectKind::Invalid,
            "bad",
        )]);
        assert_eq!(report.records_rejected(), 2);
        assert_eq!(report.rejections[0].position, 1);
        let text = report.to_string();
        assert!(text.contains("records seeded:      2"));
        assert!(text.contains("seed #3 (courses) duplicate key: dup"));
    }
}
