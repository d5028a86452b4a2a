//! Logging infrastructure for the ledger
//!
//! Operational logs go through `tracing`; ledger events additionally land in
//! a JSONL audit trail for reconciliation.

pub mod audit;

pub use audit::{AuditEvent, AuditKind, AuditLogger};
