//! MongoDB document store
//!
//! Commits run inside a multi-document MongoDB transaction, so the server
//! must be a replica set (a single-node replica set is enough for
//! development). Replaces are conditioned on the `_v` counter the unit of
//! work read; a mismatch, a duplicate key, or a transient transaction error
//! all surface as `LedgerError::Contention` so the ledger can retry.

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::{
    error::{
        Error as MongoError, ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR,
        UNKNOWN_TRANSACTION_COMMIT_RESULT,
    },
    ClientSession, Client, Collection as MongoCollection, IndexModel,
};
use tracing::{debug, info};

use crate::db::schemas::{
    Account, LedgerDoc, PaymentIntent, Review, SaleRequest, Session, TransactionRecord,
};
use crate::db::store::{
    Collection, DocumentStore, Query, ReadStamp, SortOrder, StagedWrite, VersionedDoc, WriteKind,
    VERSION_FIELD,
};
use crate::types::{LedgerError, Result};

const DUPLICATE_KEY_CODE: i32 = 11000;

/// MongoDB-backed document store
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db_name: String,
}

impl MongoStore {
    /// Connect, verify the server answers, and apply schema indexes
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast instead of hanging on an unreachable server
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        let store = Self {
            client,
            db_name: db_name.to_string(),
        };
        store.ping().await?;
        store.apply_all_indexes().await?;

        info!("Connected to MongoDB database '{}'", db_name);
        Ok(store)
    }

    fn raw(&self, collection: Collection) -> MongoCollection<Document> {
        self.client
            .database(&self.db_name)
            .collection::<Document>(collection.name())
    }

    async fn apply_all_indexes(&self) -> Result<()> {
        self.apply_indexes::<Account>().await?;
        self.apply_indexes::<Session>().await?;
        self.apply_indexes::<Review>().await?;
        self.apply_indexes::<TransactionRecord>().await?;
        self.apply_indexes::<PaymentIntent>().await?;
        self.apply_indexes::<SaleRequest>().await?;
        Ok(())
    }

    /// Apply schema-defined indexes
    async fn apply_indexes<T: LedgerDoc>(&self) -> Result<()> {
        let schema_indices = T::indexes();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.raw(T::COLLECTION)
            .create_indexes(indices)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Validate read stamps and apply writes inside an open transaction.
    ///
    /// Documents that were only read are re-checked with `find_one` against
    /// the transaction snapshot. That catches every change committed before
    /// the check, but a commit landing between the check and
    /// `commit_transaction` is not a write conflict for MongoDB. Units that
    /// must exclude such a change have to write the document too.
    async fn apply_in_session(
        &self,
        session: &mut ClientSession,
        reads: &[ReadStamp],
        writes: &[StagedWrite],
    ) -> Result<()> {
        for stamp in reads {
            // Written documents are checked by their own version precondition
            if writes.iter().any(|w| w.key == stamp.key) {
                continue;
            }
            let current = self
                .raw(stamp.key.collection)
                .find_one(doc! { "_id": &stamp.key.id })
                .session(&mut *session)
                .await
                .map_err(classify)?
                .map(|d| VersionedDoc::from_stored(d).version)
                .unwrap_or(0);
            if current != stamp.version {
                return Err(LedgerError::Contention(format!(
                    "{} changed (read v{}, now v{})",
                    stamp.key, stamp.version, current
                )));
            }
        }

        for write in writes {
            let collection = self.raw(write.key.collection);
            match write.kind {
                WriteKind::Insert => {
                    collection
                        .insert_one(write.stored_doc())
                        .session(&mut *session)
                        .await
                        .map_err(classify)?;
                }
                WriteKind::Replace { expected_version } => {
                    let filter = doc! {
                        "_id": &write.key.id,
                        VERSION_FIELD: expected_version as i64,
                    };
                    let result = collection
                        .replace_one(filter, write.stored_doc())
                        .session(&mut *session)
                        .await
                        .map_err(classify)?;
                    if result.matched_count == 0 {
                        return Err(LedgerError::Contention(format!(
                            "{} changed since v{}",
                            write.key, expected_version
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Map driver errors onto the ledger taxonomy
fn classify(err: MongoError) -> LedgerError {
    if err.contains_label(TRANSIENT_TRANSACTION_ERROR)
        || err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
    {
        return LedgerError::Contention(err.to_string());
    }
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE =>
        {
            LedgerError::Contention(err.to_string())
        }
        _ => LedgerError::Database(err.to_string()),
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<VersionedDoc>> {
        let found = self
            .raw(collection)
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| LedgerError::Database(format!("Find failed: {}", e)))?;
        Ok(found.map(VersionedDoc::from_stored))
    }

    async fn commit(&self, reads: Vec<ReadStamp>, writes: Vec<StagedWrite>) -> Result<()> {
        if writes.is_empty() && reads.is_empty() {
            return Ok(());
        }

        let mut session = self.client.start_session().await.map_err(classify)?;
        session.start_transaction().await.map_err(classify)?;

        if let Err(e) = self.apply_in_session(&mut session, &reads, &writes).await {
            if let Err(abort_err) = session.abort_transaction().await {
                debug!("Abort after failed commit also failed: {}", abort_err);
            }
            return Err(e);
        }

        session.commit_transaction().await.map_err(classify)?;
        debug!(reads = reads.len(), writes = writes.len(), "MongoDB commit applied");
        Ok(())
    }

    async fn find(&self, collection: Collection, query: Query) -> Result<Vec<Document>> {
        let mut filter = Document::new();
        for (field, value) in &query.filter {
            filter.insert(field.clone(), value.clone());
        }

        let raw = self.raw(collection);
        let mut action = raw.find(filter);
        if let Some((field, order)) = &query.sort {
            let direction = match order {
                SortOrder::Ascending => 1,
                SortOrder::Descending => -1,
            };
            let mut sort = Document::new();
            sort.insert(field.clone(), Bson::Int32(direction));
            action = action.sort(sort);
        }
        if let Some(limit) = query.limit {
            action = action.limit(limit as i64);
        }

        let cursor = action
            .await
            .map_err(|e| LedgerError::Database(format!("Find failed: {}", e)))?;
        let mut docs: Vec<Document> = cursor
            .try_collect()
            .await
            .map_err(|e| LedgerError::Database(format!("Cursor failed: {}", e)))?;
        for doc in docs.iter_mut() {
            doc.remove(VERSION_FIELD);
        }
        Ok(docs)
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .database(&self.db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| LedgerError::Database(format!("MongoDB ping failed: {}", e)))?;
        Ok(())
    }
}
