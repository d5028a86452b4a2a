//! HTTP server for the ledger API

pub mod http;

pub use http::{dispatch, run, AppState, MAX_BODY_BYTES};
