//! Database handles
//!
//! [`DatabaseHandle`] is the only way the reconciler touches a database.
//! [`MongoStore`] talks to a MongoDB deployment; [`MemoryStore`] keeps
//! everything in process and backs the `check` command and the tests.

use async_trait::async_trait;
use mongodb::bson::Document;
use thiserror::Error;

use crate::schema::IndexSpec;
use crate::seed::RejectKind;

pub mod memory;
pub mod mongo;

pub use memory::{MemoryStore, StoreCall};
pub use mongo::MongoStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection failure: {0}")]
    Connection(String),
    #[error("collection '{0}' already exists")]
    NamespaceExists(String),
    #[error("index '{index}' on '{collection}' conflicts with an existing index: {detail}")]
    IndexConflict {
        collection: String,
        index: String,
        detail: String,
    },
    #[error("{0}")]
    Other(String),
}

/// A document from an `insert_many` batch that the store refused
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRejection {
    /// Position of the document within the submitted batch
    pub index: usize,
    pub kind: RejectKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub rejected: Vec<DocumentRejection>,
}

/// An index as reported by the store
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub keys: Document,
    pub unique: bool,
}

#[async_trait]
pub trait DatabaseHandle: Send + Sync {
    /// Drop a collection with its documents and indexes; returns whether it existed.
    async fn drop_collection(&self, name: &str) -> Result<bool, StoreError>;

    /// Create an empty collection; fails with [`StoreError::NamespaceExists`]
    /// if one of that name is present.
    async fn create_collection(&self, name: &str) -> Result<(), StoreError>;

    /// Build an index and return its name.
    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<String, StoreError>;

    /// Insert a batch without stopping at the first failing document.
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertOutcome, StoreError>;

    async fn collection_names(&self) -> Result<Vec<String>, StoreError>;

    async fn indexes(&self, collection: &str) -> Result<Vec<IndexInfo>, StoreError>;

    async fn count_documents(&self, collection: &str) -> Result<u64, StoreError>;
}
