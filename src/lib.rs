//! SkillSwap ledger - coin settlement for peer-to-peer mentoring
//!
//! Members trade mentoring time for coins. This crate keeps the books:
//! every balance change happens inside one atomic, version-checked unit of
//! work, so concurrent completions, reviews and payment confirmations can
//! never double-credit or lose coins.
//!
//! ## Services
//!
//! - **Settlement**: session requests and the dual-confirmation transfer
//! - **Reviews**: one review per session, folded into mentor ratings
//! - **Exchange**: buying coins through a payment gateway and selling them back
//! - **Wallet**: balances, history, sessions and the mentor leaderboard

pub mod auth;
pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{LedgerError, Result};
