use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::error::{BulkWriteFailure, Error, ErrorKind};
use mongodb::options::{ClientOptions, IndexOptions, InsertManyOptions, ServerApi, ServerApiVersion};
use mongodb::{Client, Database, IndexModel};
use tracing::{debug, info, warn};

use crate::config::SeederConfig;
use crate::schema::IndexSpec;
use crate::seed::RejectKind;
use crate::store::{DatabaseHandle, DocumentRejection, IndexInfo, InsertOutcome, StoreError};

const NAMESPACE_NOT_FOUND: i32 = 26;
const NAMESPACE_EXISTS: i32 = 48;
const INDEX_OPTIONS_CONFLICT: i32 = 85;
const INDEX_KEY_SPECS_CONFLICT: i32 = 86;
const DUPLICATE_KEY: i32 = 11000;

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Connect with the configured pool settings and ping the target
    /// database so an unreachable server fails before any phase starts.
    pub async fn connect(config: &SeederConfig, database: &str) -> Result<Self, StoreError> {
        let mut client_options = ClientOptions::parse(&config.mongodb_uri)
            .await
            .map_err(classify)?;
        client_options.max_pool_size = Some(config.max_pool_size);
        client_options.min_pool_size = Some(config.min_pool_size);
        client_options.max_idle_time = Some(Duration::from_millis(config.max_idle_time_ms));
        client_options.connect_timeout = Some(Duration::from_millis(config.connect_timeout_ms));
        client_options.server_api = Some(ServerApi::builder().version(ServerApiVersion::V1).build());
        client_options.app_name = Some(config.service_name.clone());

        let client = Client::with_options(client_options).map_err(classify)?;
        let db = client.database(database);
        db.run_command(doc! {"ping": 1}, None)
            .await
            .map_err(classify)?;
        info!(database, "connected to MongoDB");
        Ok(Self::new(db))
    }

    pub fn database_name(&self) -> &str {
        self.db.name()
    }
}

/// Map an unordered insert failure to per-document rejections. Documents
/// without a write error were applied; a write concern error only means
/// their durability was not confirmed.
fn bulk_outcome(collection: &str, submitted: usize, failure: &BulkWriteFailure) -> InsertOutcome {
    if let Some(wce) = &failure.write_concern_error {
        warn!(
            collection,
            code = wce.code,
            code_name = %wce.code_name,
            message = %wce.message,
            "write concern not satisfied for seed batch"
        );
    }
    let rejected: Vec<DocumentRejection> = failure
        .write_errors
        .iter()
        .flatten()
        .map(|w| DocumentRejection {
            index: w.index,
            kind: if w.code == DUPLICATE_KEY {
                RejectKind::DuplicateKey
            } else {
                RejectKind::Store
            },
            message: w.message.clone(),
        })
        .collect();
    debug!(collection, rejected = rejected.len(), "partial batch insert");
    InsertOutcome {
        inserted: submitted.saturating_sub(rejected.len()),
        rejected,
    }
}

fn command_code(err: &Error) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        _ => None,
    }
}

fn classify(err: Error) -> StoreError {
    match err.kind.as_ref() {
        ErrorKind::Io(_)
        | ErrorKind::ServerSelection { .. }
        | ErrorKind::ConnectionPoolCleared { .. }
        | ErrorKind::DnsResolve { .. } => StoreError::Connection(err.to_string()),
        _ => StoreError::Other(err.to_string()),
    }
}

#[async_trait]
impl DatabaseHandle for MongoStore {
    async fn drop_collection(&self, name: &str) -> Result<bool, StoreError> {
        let existing = self
            .db
            .list_collection_names(doc! {"name": name})
            .await
            .map_err(classify)?;
        if !existing.iter().any(|n| n == name) {
            return Ok(false);
        }
        match self.db.collection::<Document>(name).drop(None).await {
            Ok(()) => Ok(true),
            Err(e) if command_code(&e) == Some(NAMESPACE_NOT_FOUND) => Ok(false),
            Err(e) => Err(classify(e)),
        }
    }

    async fn create_collection(&self, name: &str) -> Result<(), StoreError> {
        match self.db.create_collection(name, None).await {
            Ok(()) => Ok(()),
            Err(e) if command_code(&e) == Some(NAMESPACE_EXISTS) => {
                Err(StoreError::NamespaceExists(name.to_string()))
            }
            Err(e) => Err(classify(e)),
        }
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<String, StoreError> {
        let name = index.name();
        let options = IndexOptions::builder()
            .unique(index.is_unique().then_some(true))
            .name(Some(name.clone()))
            .build();
        let model = IndexModel::builder()
            .keys(index.keys().to_document())
            .options(options)
            .build();
        match self
            .db
            .collection::<Document>(collection)
            .create_index(model, None)
            .await
        {
            Ok(result) => Ok(result.index_name),
            Err(e)
                if matches!(
                    command_code(&e),
                    Some(INDEX_OPTIONS_CONFLICT | INDEX_KEY_SPECS_CONFLICT)
                ) =>
            {
                Err(StoreError::IndexConflict {
                    collection: collection.to_string(),
                    index: name,
                    detail: e.to_string(),
                })
            }
            Err(e) => Err(classify(e)),
        }
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertOutcome, StoreError> {
        if documents.is_empty() {
            return Ok(InsertOutcome::default());
        }
        let submitted = documents.len();
        let options = InsertManyOptions::builder().ordered(false).build();
        match self
            .db
            .collection::<Document>(collection)
            .insert_many(documents, options)
            .await
        {
            Ok(result) => Ok(InsertOutcome {
                inserted: result.inserted_ids.len(),
                rejected: Vec::new(),
            }),
            Err(e) => match e.kind.as_ref() {
                ErrorKind::BulkWrite(failure) => Ok(bulk_outcome(collection, submitted, failure)),
                _ => Err(classify(e)),
            },
        }
    }

    async fn collection_names(&self) -> Result<Vec<String>, StoreError> {
        self.db.list_collection_names(None).await.map_err(classify)
    }

    async fn indexes(&self, collection: &str) -> Result<Vec<IndexInfo>, StoreError> {
        let models: Vec<IndexModel> = self
            .db
            .collection::<Document>(collection)
            .list_indexes(None)
            .await
            .map_err(classify)?
            .try_collect()
            .await
            .map_err(classify)?;
        Ok(models
            .into_iter()
            .map(|model| {
                let options = model.options.unwrap_or_default();
                IndexInfo {
                    name: options.name.unwrap_or_default(),
                    keys: model.keys,
                    unique: options.unique.unwrap_or(false),
                }
            })
            .collect())
    }

    async fn count_documents(&self, collection: &str) -> Result<u64, StoreError> {
        self.db
            .collection::<Document>(collection)
            .count_documents(None, None)
            .await
            .map_err(classify)
    }
}
