//! Ledger document schemas
//!
//! Accounts, sessions, reviews, the transaction log, and coin exchange
//! records. Every schema knows its collection and its indexes.

mod account;
mod exchange;
mod review;
mod session;
mod transaction;

use bson::Document;
use mongodb::options::IndexOptions;
use serde::{de::DeserializeOwned, Serialize};

use crate::db::store::Collection;

pub use account::{Account, RatingAggregate};
pub use exchange::{PaymentIntent, PaymentStatus, SaleRequest, SaleStatus};
pub use review::Review;
pub use session::{Role, Session, SessionStatus};
pub use transaction::{Direction, EntryKind, TransactionRecord};

/// A document type the ledger can read and write
pub trait LedgerDoc: Serialize + DeserializeOwned + Send + Sync {
    /// Collection the type lives in
    const COLLECTION: Collection;

    /// Document key
    fn doc_id(&self) -> &str;

    /// Index definitions applied by the MongoDB backend
    fn indexes() -> Vec<(Document, Option<IndexOptions>)> {
        Vec::new()
    }
}
