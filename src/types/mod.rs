//! Shared types

mod error;

pub use error::{LedgerError, Result};
