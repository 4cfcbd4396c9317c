use chrono::{DateTime, Utc};
use fluance_storage::{StoreError, UserId};
use thiserror::Error;

/// Coarse classification callers branch on (exit codes, retry decisions).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    AlreadyUsed,
    Expired,
    ProductNotFound,
    AlreadyExists,
    BackingStore,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("token not found: {0}")]
    TokenNotFound(String),

    #[error("no entitlement record for user {0}")]
    RecordNotFound(UserId),

    #[error("token {token} already used (used_at: {}, user: {})",
        .used_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "unknown".into()),
        .user_id.as_ref().map(UserId::as_str).unwrap_or("none"))]
    AlreadyUsed {
        token: String,
        used_at: Option<DateTime<Utc>>,
        user_id: Option<UserId>,
    },

    #[error("token {token} expired at {}", .expires_at.to_rfc3339())]
    Expired {
        token: String,
        expires_at: DateTime<Utc>,
    },

    #[error("user {user_id} has no product {product}")]
    ProductNotFound { user_id: UserId, product: String },

    #[error("user {0} already has an entitlement record")]
    RecordExists(UserId),

    #[error("backing store error: {0}")]
    BackingStore(#[from] StoreError),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::TokenNotFound(_) | LedgerError::RecordNotFound(_) => ErrorKind::NotFound,
            LedgerError::AlreadyUsed { .. } => ErrorKind::AlreadyUsed,
            LedgerError::Expired { .. } => ErrorKind::Expired,
            LedgerError::ProductNotFound { .. } => ErrorKind::ProductNotFound,
            LedgerError::RecordExists(_) => ErrorKind::AlreadyExists,
            LedgerError::BackingStore(_) => ErrorKind::BackingStore,
        }
    }

    /// Only backing-store failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::BackingStore
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            LedgerError::validation("bad email").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            LedgerError::TokenNotFound("abc".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            LedgerError::RecordNotFound(UserId::from("U1")).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            LedgerError::from(StoreError::Conflict).kind(),
            ErrorKind::BackingStore
        );
        assert!(LedgerError::from(StoreError::Backend("io".into())).is_retryable());
        assert!(!LedgerError::validation("x").is_retryable());
    }

    #[test]
    fn test_already_used_display_carries_state() {
        let used_at = Utc.with_ymd_and_hms(2025, 2, 1, 8, 30, 0).unwrap();
        let err = LedgerError::AlreadyUsed {
            token: "ab12".into(),
            used_at: Some(used_at),
            user_id: Some(UserId::from("U1")),
        };
        let msg = err.to_string();
        assert!(msg.contains("ab12"));
        assert!(msg.contains("2025-02-01T08:30:00"));
        assert!(msg.contains("U1"));

        let err = LedgerError::AlreadyUsed {
            token: "ab12".into(),
            used_at: None,
            user_id: None,
        };
        assert!(err.to_string().contains("user: none"));
    }

    #[test]
    fn test_product_not_found_display() {
        let err = LedgerError::ProductNotFound {
            user_id: UserId::from("U7"),
            product: "complet".into(),
        };
        assert_eq!(err.to_string(), "user U7 has no product complet");
    }
}
