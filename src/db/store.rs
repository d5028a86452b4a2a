//! Document store contract
//!
//! The ledger only needs three things from a database: keyed reads that
//! report a version, an all-or-nothing commit that re-checks those versions,
//! and simple filtered listings for the read side. Both backends implement
//! exactly this and nothing more.

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::types::Result;

/// Store-managed version counter stored alongside every document
pub const VERSION_FIELD: &str = "_v";

/// Collections known to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Accounts,
    Sessions,
    Reviews,
    Transactions,
    PaymentIntents,
    SaleRequests,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Accounts,
        Collection::Sessions,
        Collection::Reviews,
        Collection::Transactions,
        Collection::PaymentIntents,
        Collection::SaleRequests,
    ];

    /// Collection name in the backing database
    pub fn name(&self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Sessions => "sessions",
            Self::Reviews => "reviews",
            Self::Transactions => "transactions",
            Self::PaymentIntents => "payment_intents",
            Self::SaleRequests => "sale_requests",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Address of one document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocKey {
    pub collection: Collection,
    pub id: String,
}

impl DocKey {
    pub fn new(collection: Collection, id: &str) -> Self {
        Self {
            collection,
            id: id.to_string(),
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A stored document together with its version
#[derive(Debug, Clone)]
pub struct VersionedDoc {
    pub version: u64,
    pub doc: Document,
}

impl VersionedDoc {
    /// Split the version counter out of a raw stored document
    pub fn from_stored(mut doc: Document) -> Self {
        let version = match doc.remove(VERSION_FIELD) {
            Some(Bson::Int64(v)) => v.max(0) as u64,
            Some(Bson::Int32(v)) => v.max(0) as u64,
            _ => 0,
        };
        Self { version, doc }
    }
}

/// Version observed for a document during a unit of work (0 = absent)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadStamp {
    pub key: DocKey,
    pub version: u64,
}

/// How a staged write must be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Create; fails if the document already exists
    Insert,
    /// Overwrite; fails unless the stored version still equals `expected_version`
    Replace { expected_version: u64 },
}

/// One write buffered by a unit of work
#[derive(Debug, Clone)]
pub struct StagedWrite {
    pub key: DocKey,
    pub kind: WriteKind,
    pub doc: Document,
}

impl StagedWrite {
    /// Version the document will carry once this write is applied
    pub fn next_version(&self) -> u64 {
        match self.kind {
            WriteKind::Insert => 1,
            WriteKind::Replace { expected_version } => expected_version + 1,
        }
    }

    /// The stored form, including the version counter
    pub fn stored_doc(&self) -> Document {
        let mut doc = self.doc.clone();
        doc.insert("_id", self.key.id.clone());
        doc.insert(VERSION_FIELD, self.next_version() as i64);
        doc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Read-side listing: equality filters, one sort key, optional limit
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filter: Vec<(String, Bson)>,
    pub sort: Option<(String, SortOrder)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.filter.push((field.to_string(), value.into()));
        self
    }

    pub fn sort_by(mut self, field: &str, order: SortOrder) -> Self {
        self.sort = Some((field.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a document satisfies every equality filter
    pub fn matches(&self, doc: &Document) -> bool {
        self.filter
            .iter()
            .all(|(field, value)| doc.get(field).map(|v| bson_eq(v, value)).unwrap_or(false))
    }
}

/// Equality that treats the numeric BSON types as one domain
fn bson_eq(a: &Bson, b: &Bson) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(v) => Some(*v),
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        _ => None,
    }
}

/// Ordering used by the in-memory backend for sorted listings
pub fn compare_bson(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => match (a, b) {
                (Bson::String(x), Bson::String(y)) => x.cmp(y),
                (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
                (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
                _ => Ordering::Equal,
            },
        },
    }
}

/// Storage backend for the ledger
///
/// `commit` is the only mutation. It must apply every write or none, and it
/// must fail with `LedgerError::Contention` when any read stamp or replace
/// precondition no longer holds.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one document with its version
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<VersionedDoc>>;

    /// Atomically validate `reads` and apply `writes`
    async fn commit(&self, reads: Vec<ReadStamp>, writes: Vec<StagedWrite>) -> Result<()>;

    /// List documents for the read side (no version checks)
    async fn find(&self, collection: Collection, query: Query) -> Result<Vec<Document>>;

    /// Check the backend is reachable
    async fn ping(&self) -> Result<()>;
}
