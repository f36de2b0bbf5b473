//! Reconciliation plans
//!
//! A plan is the full target description: the collections to rebuild, in
//! order, followed by the seed records grouped into one batch per target
//! collection. Plans are loaded from JSON fixture files.
//!
//! Plan-level mistakes (bad JSON, malformed index declarations, broken
//! index invariants) fail the whole load with a [`PlanError`]. A seed entry
//! that is individually malformed only rejects that entry: it is returned
//! as a [`SeedInsertError`] alongside the plan and never reaches the
//! database.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::schema::CollectionSpec;
use crate::seed::{RejectKind, SeedInsertError, SeedRecord, SeedValue};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("failed to read plan {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid plan: {0}")]
    Json(#[from] serde_json::Error),
    #[error("collection name must not be empty")]
    EmptyCollectionName,
    #[error("collection '{0}' is declared more than once")]
    DuplicateCollection(String),
    #[error("index #{position} on '{collection}' has an empty key pattern")]
    EmptyKeyPattern { collection: String, position: usize },
    #[error("indexes on '{collection}' repeat the key pattern {pattern}")]
    DuplicateKeyPattern { collection: String, pattern: String },
    #[error("indexes on '{collection}' repeat the name '{name}'")]
    DuplicateIndexName { collection: String, name: String },
    #[error("collection '{0}' declares more than one text index")]
    MultipleTextIndexes(String),
    #[error("seed record #{position} targets undeclared collection '{collection}'")]
    UndeclaredCollection { collection: String, position: usize },
}

/// Seed records for one collection, inserted as a single batch
#[derive(Debug, Clone, PartialEq)]
pub struct SeedBatch {
    collection: String,
    records: Vec<SeedRecord>,
    /// Entries for this collection rejected before reaching the database
    rejected_on_load: usize,
    first_position: usize,
}

impl SeedBatch {
    fn new(collection: &str, first_position: usize) -> Self {
        Self {
            collection: collection.to_string(),
            records: Vec::new(),
            rejected_on_load: 0,
            first_position,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn records(&self) -> &[SeedRecord] {
        &self.records
    }

    pub fn rejected_on_load(&self) -> usize {
        self.rejected_on_load
    }

    /// Records planned for this collection, including the ones rejected on load
    pub fn total(&self) -> usize {
        self.records.len() + self.rejected_on_load
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationPlan {
    database: Option<String>,
    collections: Vec<CollectionSpec>,
    batches: Vec<SeedBatch>,
}

/// A plan read from a file plus the seed entries rejected while reading it
#[derive(Debug)]
pub struct LoadedPlan {
    pub plan: ReconciliationPlan,
    pub rejected: Vec<SeedInsertError>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanFile {
    #[serde(default)]
    database: Option<String>,
    collections: Vec<CollectionSpec>,
    #[serde(default)]
    seeds: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SeedEntry {
    collection: String,
    #[serde(default)]
    id: Option<Value>,
    document: Value,
}

impl ReconciliationPlan {
    /// Build a plan, validating collections and grouping records by target
    /// collection in order of first appearance.
    pub fn new(collections: Vec<CollectionSpec>, records: Vec<SeedRecord>) -> Result<Self, PlanError> {
        let mut declared = HashSet::new();
        for spec in &collections {
            spec.validate()?;
            if !declared.insert(spec.name()) {
                return Err(PlanError::DuplicateCollection(spec.name().to_string()));
            }
        }

        let mut batches: Vec<SeedBatch> = Vec::new();
        let mut batch_of: HashMap<String, usize> = HashMap::new();
        for record in records {
            if !declared.contains(record.collection()) {
                return Err(PlanError::UndeclaredCollection {
                    collection: record.collection().to_string(),
                    position: record.position(),
                });
            }
            let slot = *batch_of
                .entry(record.collection().to_string())
                .or_insert_with(|| {
                    batches.push(SeedBatch::new(record.collection(), record.position()));
                    batches.len() - 1
                });
            batches[slot].records.push(record);
        }

        Ok(Self {
            database: None,
            collections,
            batches,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<LoadedPlan, PlanError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PlanError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), bytes = text.len(), "read plan file");
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<LoadedPlan, PlanError> {
        let file: PlanFile = serde_json::from_str(text)?;

        let declared: Vec<&str> = file.collections.iter().map(|c| c.name()).collect();
        let mut records = Vec::with_capacity(file.seeds.len());
        let mut rejected = Vec::new();
        for (position, raw) in file.seeds.iter().enumerate() {
            match parse_seed(position, raw, &declared) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(position, collection = %err.collection, reason = %err.reason, "rejected seed entry");
                    rejected.push(err);
                }
            }
        }

        let mut plan = Self::new(file.collections, records)?;
        plan.database = file.database;
        plan.count_load_rejections(&rejected);
        Ok(LoadedPlan { plan, rejected })
    }

    /// Attribute load-time rejections to the batch of their declared
    /// collection. A collection whose every entry was rejected still gets an
    /// empty batch, placed where its first entry appeared.
    fn count_load_rejections(&mut self, rejected: &[SeedInsertError]) {
        let mut added = false;
        for err in rejected {
            if self.collection(&err.collection).is_none() {
                continue;
            }
            match self.batches.iter_mut().find(|b| b.collection == err.collection) {
                Some(batch) => batch.rejected_on_load += 1,
                None => {
                    let mut batch = SeedBatch::new(&err.collection, err.position);
                    batch.rejected_on_load = 1;
                    self.batches.push(batch);
                    added = true;
                }
            }
        }
        if added {
            self.batches.sort_by_key(|b| b.first_position);
        }
    }

    /// Target database named by the plan, if any
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn collections(&self) -> &[CollectionSpec] {
        &self.collections
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionSpec> {
        self.collections.iter().find(|c| c.name() == name)
    }

    pub fn batches(&self) -> &[SeedBatch] {
        &self.batches
    }

    pub fn batch(&self, collection: &str) -> Option<&SeedBatch> {
        self.batches.iter().find(|b| b.collection == collection)
    }

    pub fn index_count(&self) -> usize {
        self.collections.iter().map(|c| c.indexes().len()).sum()
    }

    pub fn seed_count(&self) -> usize {
        self.batches.iter().map(|b| b.records.len()).sum()
    }
}

fn parse_seed(position: usize, raw: &Value, declared: &[&str]) -> Result<SeedRecord, SeedInsertError> {
    let collection = raw
        .get("collection")
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string();
    let reject = |reason: String| SeedInsertError {
        collection: collection.clone(),
        position,
        id: None,
        kind: RejectKind::Invalid,
        reason,
    };

    let entry: SeedEntry = serde_json::from_value(raw.clone()).map_err(|e| reject(e.to_string()))?;
    if !declared.contains(&entry.collection.as_str()) {
        return Err(reject(format!(
            "collection '{}' is not declared in the plan",
            entry.collection
        )));
    }

    let body = match SeedValue::from_json(&entry.document).map_err(|e| reject(e.to_string()))? {
        SeedValue::Document(fields) => fields,
        _ => return Err(reject("document must be a JSON object".to_string())),
    };
    let mut record = SeedRecord::new(entry.collection, body).at_position(position);

    if let Some(raw_id) = &entry.id {
        let id = SeedValue::from_json(raw_id).map_err(|e| reject(format!("id: {}", e)))?;
        if matches!(id, SeedValue::Array(_) | SeedValue::Null) {
            return Err(reject(format!("id {} cannot be used as _id", raw_id)));
        }
        if let Some(body_id) = record.id() {
            if body_id != &id {
                return Err(reject(format!(
                    "id {} disagrees with document _id {}",
                    id, body_id
                )));
            }
        }
        record = record.with_id(id);
    } else if let Some(SeedValue::Array(_)) = record.id() {
        return Err(reject("document _id cannot be an array".to_string()));
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PLAN: &str = r#"{
        "database": "course_service",
        "collections": [
            {"name": "categories", "indexes": [{"keys": {"slug": 1}, "unique": true}]},
            {"name": "courses", "indexes": [
                {"keys": {"slug": 1}, "unique": true},
                {"keys": {"category_id": 1}}
            ]}
        ],
        "seeds": [
            {"collection": "categories", "id": {"$oid": "650000000000000000000001"},
             "document": {"slug": "programming"}},
            {"collection": "courses", "document": {"slug": "rust",
             "category_id": {"$oid": "650000000000000000000001"}}},
            {"collection": "categories", "document": {"slug": "business"}}
        ]
    }"#;

    #[test]
    fn test_load_groups_batches_in_first_appearance_order() {
        let loaded = ReconciliationPlan::from_json_str(PLAN).unwrap();
        assert!(loaded.rejected.is_empty());
        let plan = loaded.plan;
        assert_eq!(plan.database(), Some("course_service"));
        assert_eq!(plan.index_count(), 3);
        assert_eq!(plan.seed_count(), 3);
        let order: Vec<_> = plan.batches().iter().map(|b| b.collection()).collect();
        assert_eq!(order, vec!["categories", "courses"]);
        let positions: Vec<_> = plan
            .batch("categories")
            .unwrap()
            .records()
            .iter()
            .map(|r| r.position())
            .collect();
        assert_eq!(positions, vec![0, 2]);
    }

    #[test]
    fn test_malformed_entries_are_rejected_not_fatal() {
        let text = r#"{
            "collections": [{"name": "courses"}],
            "seeds": [
                {"collection": "courses", "document": {"title": "ok"}},
                {"collection": "courses", "document": ["not", "an", "object"]},
                {"collection": "courses", "document": {"outcomes": {"$oops": 1}}},
                {"collection": "lessons", "document": {"title": "stray"}},
                {"collection": "courses", "id": 1, "document": {"_id": 2}},
                {"collection": "courses"},
                "garbage"
            ]
        }"#;
        let loaded = ReconciliationPlan::from_json_str(text).unwrap();
        assert_eq!(loaded.plan.seed_count(), 1);
        assert_eq!(loaded.rejected.len(), 6);
        assert!(loaded.rejected.iter().all(|r| r.kind == RejectKind::Invalid));
        let positions: Vec<_> = loaded.rejected.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(loaded.rejected[2].collection, "lessons");

        let courses = loaded.plan.batch("courses").unwrap();
        assert_eq!(courses.records().len(), 1);
        assert_eq!(courses.rejected_on_load(), 4);
        assert_eq!(courses.total(), 5);
    }

    #[test]
    fn test_fully_rejected_collection_keeps_its_batch_slot() {
        let text = r#"{
            "collections": [{"name": "categories"}, {"name": "courses"}],
            "seeds": [
                {"collection": "categories", "document": {"slug": {"$oops": 1}}},
                {"collection": "courses", "document": {"slug": "rust"}}
            ]
        }"#;
        let loaded = ReconciliationPlan::from_json_str(text).unwrap();
        let order: Vec<_> = loaded
            .plan
            .batches()
            .iter()
            .map(|b| (b.collection(), b.records().len(), b.rejected_on_load()))
            .collect();
        assert_eq!(order, vec![("categories", 0, 1), ("courses", 1, 0)]);
        assert_eq!(loaded.plan.seed_count(), 1);
    }

    #[test]
    fn test_plan_level_errors_are_fatal() {
        let dup = r#"{"collections": [{"name": "a"}, {"name": "a"}]}"#;
        assert!(matches!(
            ReconciliationPlan::from_json_str(dup),
            Err(PlanError::DuplicateCollection(_))
        ));
        let bad_index = r#"{"collections": [{"name": "a", "indexes": [{"keys": {}}]}]}"#;
        assert!(matches!(
            ReconciliationPlan::from_json_str(bad_index),
            Err(PlanError::EmptyKeyPattern { .. })
        ));
        assert!(matches!(
            ReconciliationPlan::from_json_str("{\"collections\": [ "),
            Err(PlanError::Json(_))
        ));
    }

    #[test]
    fn test_new_rejects_undeclared_collection() {
        let record = SeedRecord::new("ghost", vec![]).at_position(4);
        assert!(matches!(
            ReconciliationPlan::new(vec![], vec![record]),
            Err(PlanError::UndeclaredCollection { position: 4, .. })
        ));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(PLAN.as_bytes())
            .unwrap();
        let loaded = ReconciliationPlan::from_path(&path).unwrap();
        assert_eq!(loaded.plan.collections().len(), 2);

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            ReconciliationPlan::from_path(&missing),
            Err(PlanError::Io { .. })
        ));
    }
}
