//! Database layer
//!
//! `store` defines the contract the ledger relies on; `memory` and `mongo`
//! implement it. `schemas` holds the document types.

pub mod memory;
pub mod mongo;
pub mod schemas;
pub mod store;

pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use store::{Collection, DocumentStore, Query, SortOrder};
