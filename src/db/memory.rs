//! In-memory document store
//!
//! Used in dev mode and by tests. A single mutex guards every document, so a
//! commit validates and applies all of its writes without interleaving.

use std::collections::HashMap;

use async_trait::async_trait;
use bson::Document;
use tokio::sync::Mutex;
use tracing::debug;

use crate::db::store::{
    compare_bson, Collection, DocKey, DocumentStore, Query, ReadStamp, SortOrder, StagedWrite,
    VersionedDoc, WriteKind, VERSION_FIELD,
};
use crate::types::{LedgerError, Result};

/// Volatile store keyed by collection and id
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<DocKey, Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn count(&self, collection: Collection) -> usize {
        let docs = self.docs.lock().await;
        docs.keys().filter(|k| k.collection == collection).count()
    }
}

fn stored_version(docs: &HashMap<DocKey, Document>, key: &DocKey) -> u64 {
    docs.get(key)
        .map(|d| VersionedDoc::from_stored(d.clone()).version)
        .unwrap_or(0)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<VersionedDoc>> {
        let docs = self.docs.lock().await;
        Ok(docs
            .get(&DocKey::new(collection, id))
            .cloned()
            .map(VersionedDoc::from_stored))
    }

    async fn commit(&self, reads: Vec<ReadStamp>, writes: Vec<StagedWrite>) -> Result<()> {
        let mut docs = self.docs.lock().await;

        for stamp in &reads {
            let current = stored_version(&docs, &stamp.key);
            if current != stamp.version {
                return Err(LedgerError::Contention(format!(
                    "{} changed (read v{}, now v{})",
                    stamp.key, stamp.version, current
                )));
            }
        }

        for write in &writes {
            let exists = docs.contains_key(&write.key);
            match write.kind {
                WriteKind::Insert if exists => {
                    return Err(LedgerError::Contention(format!("{} already exists", write.key)));
                }
                WriteKind::Replace { expected_version } => {
                    let current = stored_version(&docs, &write.key);
                    if current != expected_version {
                        return Err(LedgerError::Contention(format!(
                            "{} changed (expected v{}, now v{})",
                            write.key, expected_version, current
                        )));
                    }
                }
                WriteKind::Insert => {}
            }
        }

        for write in &writes {
            docs.insert(write.key.clone(), write.stored_doc());
        }

        debug!(reads = reads.len(), writes = writes.len(), "Memory store commit applied");
        Ok(())
    }

    async fn find(&self, collection: Collection, query: Query) -> Result<Vec<Document>> {
        let docs = self.docs.lock().await;
        let mut matched: Vec<Document> = docs
            .iter()
            .filter(|(key, doc)| key.collection == collection && query.matches(doc))
            .map(|(_, doc)| {
                let mut doc = doc.clone();
                doc.remove(VERSION_FIELD);
                doc
            })
            .collect();
        drop(docs);

        match &query.sort {
            Some((field, order)) => matched.sort_by(|a, b| {
                let ordering = compare_bson(a.get(field), b.get(field));
                match order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            }),
            // HashMap iteration order is arbitrary; keep listings stable by id
            None => matched.sort_by(|a, b| compare_bson(a.get("_id"), b.get("_id"))),
        }

        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        Ok(matched)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
