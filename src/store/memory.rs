//! In-process database handle
//!
//! Mirrors the MongoDB behaviour the reconciler depends on: an implicit
//! unique `_id_` index, server-generated ids, unique index enforcement on
//! build and on insert, unordered batch inserts, and implicit collection
//! creation on first write. Every call is appended to a journal so the
//! order of operations can be inspected.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use mongodb::bson::{oid::ObjectId, Bson, Document};

use crate::schema::{IndexDirection, IndexSpec, KeyPattern};
use crate::seed::RejectKind;
use crate::store::{DatabaseHandle, DocumentRejection, IndexInfo, InsertOutcome, StoreError};

/// A recorded handle call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    DropCollection(String),
    CreateCollection(String),
    CreateIndex { collection: String, name: String },
    InsertMany { collection: String, documents: usize },
}

#[derive(Debug, Clone)]
struct MemoryIndex {
    name: String,
    keys: KeyPattern,
    unique: bool,
}

#[derive(Debug)]
struct MemoryCollection {
    documents: Vec<Document>,
    indexes: Vec<MemoryIndex>,
}

impl MemoryCollection {
    fn new() -> Self {
        Self {
            documents: Vec::new(),
            indexes: vec![MemoryIndex {
                name: "_id_".to_string(),
                keys: KeyPattern::new([("_id", IndexDirection::Ascending)]),
                unique: true,
            }],
        }
    }

    /// First unique index the document would violate
    fn violated_index(&self, doc: &Document) -> Option<&MemoryIndex> {
        self.indexes.iter().filter(|i| i.unique).find(|index| {
            let key = index_key(doc, &index.keys);
            self.documents
                .iter()
                .any(|existing| index_key(existing, &index.keys) == key)
        })
    }
}

#[derive(Debug, Default)]
struct State {
    collections: BTreeMap<String, MemoryCollection>,
    journal: Vec<StoreCall>,
    offline: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Connection`]
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn journal(&self) -> Vec<StoreCall> {
        self.lock().journal.clone()
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.lock()
            .collections
            .get(collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn online(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        let state = self.lock();
        if state.offline {
            return Err(StoreError::Connection("memory store is offline".to_string()));
        }
        Ok(state)
    }
}

/// Values of the indexed fields, missing fields counting as null
fn index_key(doc: &Document, keys: &KeyPattern) -> Vec<Bson> {
    keys.fields()
        .map(|field| lookup(doc, field).cloned().unwrap_or(Bson::Null))
        .collect()
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    match path.split_once('.') {
        None => doc.get(path),
        Some((head, rest)) => match doc.get(head)? {
            Bson::Document(inner) => lookup(inner, rest),
            _ => None,
        },
    }
}

fn duplicate_message(collection: &str, index: &MemoryIndex, doc: &Document) -> String {
    let dup: Vec<String> = index
        .keys
        .fields()
        .map(|f| format!("{}: {}", f, lookup(doc, f).unwrap_or(&Bson::Null)))
        .collect();
    format!(
        "E11000 duplicate key error collection: {} index: {} dup key: {{ {} }}",
        collection,
        index.name,
        dup.join(", ")
    )
}

#[async_trait]
impl DatabaseHandle for MemoryStore {
    async fn drop_collection(&self, name: &str) -> Result<bool, StoreError> {
        let mut state = self.online()?;
        state.journal.push(StoreCall::DropCollection(name.to_string()));
        Ok(state.collections.remove(name).is_some())
    }

    async fn create_collection(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.online()?;
        state.journal.push(StoreCall::CreateCollection(name.to_string()));
        if state.collections.contains_key(name) {
            return Err(StoreError::NamespaceExists(name.to_string()));
        }
        state.collections.insert(name.to_string(), MemoryCollection::new());
        Ok(())
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<String, StoreError> {
        let mut state = self.online()?;
        let name = index.name();
        state.journal.push(StoreCall::CreateIndex {
            collection: collection.to_string(),
            name: name.clone(),
        });
        let coll = state
            .collections
            .entry(collection.to_string())
            .or_insert_with(MemoryCollection::new);

        let conflict = |detail: String| StoreError::IndexConflict {
            collection: collection.to_string(),
            index: name.clone(),
            detail,
        };
        for existing in &coll.indexes {
            let same_keys = &existing.keys == index.keys();
            if existing.name == name {
                if same_keys && existing.unique == index.is_unique() {
                    return Ok(name);
                }
                return Err(conflict(format!(
                    "existing index has keys {} unique={}",
                    existing.keys, existing.unique
                )));
            }
            if same_keys {
                return Err(conflict(format!(
                    "same key pattern already indexed as '{}'",
                    existing.name
                )));
            }
            if existing.keys.is_text() && index.keys().is_text() {
                return Err(conflict(format!(
                    "only one text index is allowed, found '{}'",
                    existing.name
                )));
            }
        }

        let candidate = MemoryIndex {
            name: name.clone(),
            keys: index.keys().clone(),
            unique: index.is_unique(),
        };
        if candidate.unique {
            let mut seen: Vec<Vec<Bson>> = Vec::with_capacity(coll.documents.len());
            for doc in &coll.documents {
                let key = index_key(doc, &candidate.keys);
                if seen.contains(&key) {
                    return Err(StoreError::Other(duplicate_message(collection, &candidate, doc)));
                }
                seen.push(key);
            }
        }
        coll.indexes.push(candidate);
        Ok(name)
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertOutcome, StoreError> {
        let mut state = self.online()?;
        state.journal.push(StoreCall::InsertMany {
            collection: collection.to_string(),
            documents: documents.len(),
        });
        let coll = state
            .collections
            .entry(collection.to_string())
            .or_insert_with(MemoryCollection::new);

        let mut outcome = InsertOutcome::default();
        for (index, doc) in documents.into_iter().enumerate() {
            let doc = if doc.contains_key("_id") {
                doc
            } else {
                let mut with_id = Document::new();
                with_id.insert("_id", ObjectId::new());
                with_id.extend(doc);
                with_id
            };
            if let Some(violated) = coll.violated_index(&doc) {
                outcome.rejected.push(DocumentRejection {
                    index,
                    kind: RejectKind::DuplicateKey,
                    message: duplicate_message(collection, violated, &doc),
                });
                continue;
            }
            coll.documents.push(doc);
            outcome.inserted += 1;
        }
        Ok(outcome)
    }

    async fn collection_names(&self) -> Result<Vec<String>, StoreError> {
        let state = self.online()?;
        Ok(state.collections.keys().cloned().collect())
    }

    async fn indexes(&self, collection: &str) -> Result<Vec<IndexInfo>, StoreError> {
        let state = self.online()?;
        Ok(state
            .collections
            .get(collection)
            .map(|c| {
                c.indexes
                    .iter()
                    .map(|i| IndexInfo {
                        name: i.name.clone(),
                        keys: i.keys.to_document(),
                        unique: i.unique,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_documents(&self, collection: &str) -> Result<u64, StoreError> {
        let state = self.online()?;
        Ok(state
            .collections
            .get(collection)
            .map(|c| c.documents.len() as u64)
            .unwrap_or(0))
    }
}
