//! Error types for the ledger service
//!
//! Every failure a caller can observe is one `LedgerError` variant. The
//! variant decides the HTTP status, the machine-readable `kind`, and whether
//! retrying can help.

use hyper::StatusCode;

/// Main error type for ledger operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Already marked: {0}")]
    AlreadyMarked(String),

    #[error("Duplicate review: {0}")]
    DuplicateReview(String),

    #[error("Insufficient funds in account {account_id}: required {required}, available {available}")]
    InsufficientFunds {
        account_id: String,
        required: i64,
        available: i64,
    },

    #[error("Insufficient balance: selling {requested} of {available} coins would leave less than {minimum}")]
    InsufficientBalance {
        requested: i64,
        available: i64,
        minimum: i64,
    },

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Store contention: {0}")]
    Contention(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Permission(_) => StatusCode::FORBIDDEN,
            Self::InvalidState(_) => StatusCode::CONFLICT,
            Self::AlreadyMarked(_) => StatusCode::OK,
            Self::DuplicateReview(_) => StatusCode::CONFLICT,
            Self::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Signature(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Contention(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable identifier sent to clients in the `error` field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Permission(_) => "permission_denied",
            Self::InvalidState(_) => "invalid_state",
            Self::AlreadyMarked(_) => "already_marked",
            Self::DuplicateReview(_) => "duplicate_review",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::Signature(_) => "signature_error",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Gateway(_) => "gateway_error",
            Self::Contention(_) | Self::Database(_) | Self::Config(_) | Self::Internal(_) => {
                "internal"
            }
        }
    }

    /// Whether the same call may succeed if simply repeated
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention(_) | Self::Database(_) | Self::Gateway(_))
    }

    /// Conflicts that mean "this already happened" rather than a failure
    pub fn is_idempotent_conflict(&self) -> bool {
        matches!(self, Self::AlreadyMarked(_) | Self::DuplicateReview(_))
    }

    /// Message safe to show an end user. Store and configuration details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Contention(_) | Self::Database(_) | Self::Config(_) | Self::Internal(_) => {
                "An internal error occurred, please try again later".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, serde_json::Value) {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.public_message(),
        });
        (status, body)
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for LedgerError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for LedgerError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for LedgerError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Internal(format!("Document encoding failed: {}", err))
    }
}

impl From<bson::de::Error> for LedgerError {
    fn from(err: bson::de::Error) -> Self {
        Self::Internal(format!("Document decoding failed: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for LedgerError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("JWT error: {}", err))
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        Self::Gateway(err.to_string())
    }
}

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_details_are_hidden() {
        let err = LedgerError::Database("connection reset by 10.0.0.7".into());
        let (status, body) = err.into_status_code_and_body();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "internal");
        assert!(!body["message"].as_str().unwrap().contains("10.0.0.7"));
    }

    #[test]
    fn test_validation_message_surfaces_verbatim() {
        let err = LedgerError::Validation("Rating must be between 1 and 5".into());
        let (status, body) = err.into_status_code_and_body();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
        assert!(body["message"].as_str().unwrap().contains("between 1 and 5"));
    }

    #[test]
    fn test_classification_flags() {
        assert!(LedgerError::Contention("x".into()).is_retryable());
        assert!(!LedgerError::Permission("x".into()).is_retryable());
        assert!(!LedgerError::Signature("x".into()).is_retryable());
        assert!(LedgerError::AlreadyMarked("x".into()).is_idempotent_conflict());
        assert!(LedgerError::DuplicateReview("x".into()).is_idempotent_conflict());
        assert!(!LedgerError::InvalidState("x".into()).is_idempotent_conflict());
    }

    #[test]
    fn test_insufficient_balance_message() {
        let err = LedgerError::InsufficientBalance {
            requested: 50,
            available: 120,
            minimum: 100,
        };
        assert_eq!(err.kind(), "insufficient_balance");
        assert!(err.to_string().contains("less than 100"));
    }
}
