//! Services layer for the ledger
//!
//! ## Services
//!
//! - **Settlement**: session lifecycle and the dual-confirmation coin transfer
//! - **Reviews**: exactly-once reviews folded into mentor ratings
//! - **Exchange**: coin purchases and sales
//! - **Payments**: payment authorization and signature verification
//! - **Wallet**: balances, history and leaderboard reads
//! - **Pricing**: coin prices and the session fee split

pub mod exchange;
pub mod payments;
pub mod pricing;
pub mod reviews;
pub mod settlement;
pub mod wallet;

pub use exchange::{CoinExchange, PurchaseConfirmation, PurchaseOrder, SaleReceipt};
pub use payments::{
    GatewayAuthorizer, OrderMetadata, PaymentAuthorizer, SandboxAuthorizer, SignatureVerifier,
};
pub use pricing::Split;
pub use reviews::{ReviewAggregator, ReviewSubmission};
pub use settlement::{
    validate_meeting_link, CompletionOutcome, Decision, SessionRequest, SettlementEngine,
};
pub use wallet::{LeaderboardEntry, WalletQueryService, WalletSummary};
