//! Transactional handle handed to every unit of work
//!
//! Reads go through staged writes first, then the store. Every store read
//! records the version it observed; `Ledger::atomic` hands those stamps to
//! `DocumentStore::commit`, which applies the staged writes only if none of
//! them moved in the meantime.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::db::schemas::{LedgerDoc, TransactionRecord};
use crate::db::store::{DocKey, DocumentStore, ReadStamp, StagedWrite, WriteKind};
use crate::types::{LedgerError, Result};

pub struct LedgerTx {
    store: Arc<dyn DocumentStore>,
    reads: BTreeMap<DocKey, u64>,
    writes: BTreeMap<DocKey, StagedWrite>,
    now: DateTime<Utc>,
}

impl LedgerTx {
    pub(crate) fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
            now: Utc::now(),
        }
    }

    /// Timestamp shared by every record written in this unit
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Read a document, seeing this unit's own staged writes
    pub async fn get<T: LedgerDoc>(&mut self, id: &str) -> Result<Option<T>> {
        let key = DocKey::new(T::COLLECTION, id);

        if let Some(staged) = self.writes.get(&key) {
            return Ok(Some(bson::from_document(staged.doc.clone())?));
        }

        let found = self.store.get(T::COLLECTION, id).await?;
        let version = found.as_ref().map(|v| v.version).unwrap_or(0);

        match self.reads.get(&key) {
            Some(&seen) if seen != version => {
                return Err(LedgerError::Contention(format!(
                    "{} moved from v{} to v{} during the unit",
                    key, seen, version
                )));
            }
            Some(_) => {}
            None => {
                self.reads.insert(key, version);
            }
        }

        match found {
            Some(versioned) => Ok(Some(bson::from_document(versioned.doc)?)),
            None => Ok(None),
        }
    }

    /// Read a document that must exist
    pub async fn require<T: LedgerDoc>(&mut self, id: &str) -> Result<T> {
        self.get(id).await?.ok_or_else(|| {
            LedgerError::NotFound(format!("{} '{}' not found", T::COLLECTION, id))
        })
    }

    /// Stage an overwrite of a document read earlier in this unit
    pub fn put<T: LedgerDoc>(&mut self, value: &T) -> Result<()> {
        let key = DocKey::new(T::COLLECTION, value.doc_id());
        let doc = bson::to_document(value)?;

        let kind = match self.writes.get(&key) {
            // Re-staging a fresh insert keeps it an insert
            Some(existing) => existing.kind,
            None => match self.reads.get(&key) {
                Some(&version) if version > 0 => WriteKind::Replace {
                    expected_version: version,
                },
                Some(_) => {
                    return Err(LedgerError::Internal(format!(
                        "{} does not exist; use insert",
                        key
                    )))
                }
                None => {
                    return Err(LedgerError::Internal(format!(
                        "{} must be read before it is replaced",
                        key
                    )))
                }
            },
        };

        self.writes.insert(key.clone(), StagedWrite { key, kind, doc });
        Ok(())
    }

    /// Stage the creation of a new document
    pub fn insert<T: LedgerDoc>(&mut self, value: &T) -> Result<()> {
        let key = DocKey::new(T::COLLECTION, value.doc_id());
        if self.writes.contains_key(&key) {
            return Err(LedgerError::Internal(format!("{} staged twice", key)));
        }
        if let Some(&version) = self.reads.get(&key) {
            if version > 0 {
                return Err(LedgerError::Internal(format!("{} already exists", key)));
            }
        }

        let doc = bson::to_document(value)?;
        self.writes.insert(
            key.clone(),
            StagedWrite {
                key,
                kind: WriteKind::Insert,
                doc,
            },
        );
        Ok(())
    }

    /// Append to the transaction log. The only way records are created.
    pub fn append_transaction(&mut self, record: TransactionRecord) -> Result<()> {
        if record.amount <= 0 {
            return Err(LedgerError::Internal(format!(
                "Transaction amount must be positive, got {}",
                record.amount
            )));
        }
        self.insert(&record)
    }

    #[cfg(test)]
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    pub(crate) fn into_parts(self) -> (Vec<ReadStamp>, Vec<StagedWrite>) {
        let reads = self
            .reads
            .into_iter()
            .map(|(key, version)| ReadStamp { key, version })
            .collect();
        let writes = self.writes.into_values().collect();
        (reads, writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::schemas::{Account, EntryKind};
    use crate::db::store::Collection;

    async fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let mut tx = LedgerTx::new(store.clone());
        tx.insert(&Account::new("alice", None, Utc::now())).unwrap();
        let (reads, writes) = tx.into_parts();
        store.commit(reads, writes).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_get_sees_staged_writes() {
        let store = seeded().await;
        let mut tx = LedgerTx::new(store.clone());

        let mut alice: Account = tx.require("alice").await.unwrap();
        alice.credit(40).unwrap();
        tx.put(&alice).unwrap();

        let again: Account = tx.require("alice").await.unwrap();
        assert_eq!(again.balance, 40);

        // Nothing reaches the store before commit
        let stored = store.get(Collection::Accounts, "alice").await.unwrap().unwrap();
        assert_eq!(stored.doc.get_i64("balance").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_put_requires_prior_read() {
        let store = seeded().await;
        let mut tx = LedgerTx::new(store);
        let err = tx.put(&Account::new("alice", None, Utc::now())).unwrap_err();
        assert!(matches!(err, LedgerError::Internal(_)));
    }

    #[tokio::test]
    async fn test_conflicting_units_first_commit_wins() {
        let store = seeded().await;

        let mut first = LedgerTx::new(store.clone());
        let mut second = LedgerTx::new(store.clone());

        let mut a: Account = first.require("alice").await.unwrap();
        let mut b: Account = second.require("alice").await.unwrap();
        a.credit(5).unwrap();
        b.credit(7).unwrap();
        first.put(&a).unwrap();
        second.put(&b).unwrap();

        let (reads, writes) = first.into_parts();
        store.commit(reads, writes).await.unwrap();

        let (reads, writes) = second.into_parts();
        let err = store.commit(reads, writes).await.unwrap_err();
        assert!(matches!(err, LedgerError::Contention(_)));

        let stored = store.get(Collection::Accounts, "alice").await.unwrap().unwrap();
        assert_eq!(stored.doc.get_i64("balance").unwrap(), 5);
    }

    #[tokio::test]
    async fn test_append_transaction_rejects_zero_amount() {
        let store = seeded().await;
        let mut tx = LedgerTx::new(store);
        let record =
            TransactionRecord::credit("alice", EntryKind::Purchase, 0, "nothing".into(), tx.now());
        assert!(tx.append_transaction(record).is_err());
        assert_eq!(tx.pending_writes(), 0);
    }

    #[tokio::test]
    async fn test_reread_after_external_change_is_contention() {
        let store = seeded().await;
        let mut tx = LedgerTx::new(store.clone());
        let _: Account = tx.require("alice").await.unwrap();

        // Another unit commits in between
        let mut other = LedgerTx::new(store.clone());
        let mut alice: Account = other.require("alice").await.unwrap();
        alice.credit(1).unwrap();
        other.put(&alice).unwrap();
        let (reads, writes) = other.into_parts();
        store.commit(reads, writes).await.unwrap();

        let err = tx.get::<Account>("alice").await.unwrap_err();
        assert!(matches!(err, LedgerError::Contention(_)));
    }
}
