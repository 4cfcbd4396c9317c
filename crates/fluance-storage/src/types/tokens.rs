//! Registration token types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// Maximum number of writes in one batched multi-document operation.
pub const MAX_BATCH_OPS: usize = 500;

/// Products a token grants on redemption.
///
/// Tokens issued for a single purchase carry one product name; bulk and
/// cross-sell tokens carry a list. Both shapes live side by side in storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Grants {
    Single(String),
    Multiple(Vec<String>),
}

impl Grants {
    /// Build the canonical shape for a list of names (`None` when empty).
    pub fn from_names(mut names: Vec<String>) -> Option<Self> {
        match names.len() {
            0 => None,
            1 => names.pop().map(Grants::Single),
            _ => Some(Grants::Multiple(names)),
        }
    }

    /// Product names in grant order.
    pub fn names(&self) -> Vec<&str> {
        match self {
            Grants::Single(name) => vec![name.as_str()],
            Grants::Multiple(names) => names.iter().map(String::as_str).collect(),
        }
    }

    pub fn into_names(self) -> Vec<String> {
        match self {
            Grants::Single(name) => vec![name],
            Grants::Multiple(names) => names,
        }
    }
}

impl std::fmt::Display for Grants {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.names().join(", "))
    }
}

/// Derived token state. `Expired` is computed, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Unused,
    Used,
    Expired,
}

impl std::fmt::Display for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TokenState::Unused => "unused",
            TokenState::Used => "used",
            TokenState::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// Registration token record
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RegistrationToken {
    pub token: String, // 64 hex chars, also the lookup key
    pub email: String, // Normalized recipient
    pub grants: Grants,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub user_id: Option<UserId>, // Set on redemption only
    pub note: Option<String>,    // Free-text audit note
    pub invalidated_at: Option<DateTime<Utc>>, // Closed without redemption
}

impl RegistrationToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// State as seen at `now`. A used token stays `Used` after expiry.
    pub fn state_at(&self, now: DateTime<Utc>) -> TokenState {
        if self.used {
            TokenState::Used
        } else if self.is_expired_at(now) {
            TokenState::Expired
        } else {
            TokenState::Unused
        }
    }
}

/// Parameters for creating a registration token
#[derive(Clone, Debug)]
pub struct CreateTokenParams {
    pub token: String,
    pub email: String,
    pub grants: Grants,
    pub expires_at: DateTime<Utc>,
    pub note: Option<String>,
}

/// How a token gets closed (`used = true`).
///
/// The store only closes tokens that are still unused.
#[derive(Clone, Debug, Default)]
pub struct CloseTokenParams {
    /// Redeeming user (None for administrative closes)
    pub user_id: Option<UserId>,
    pub note: Option<String>,
    /// Stamp `invalidated_at` as well as `used_at`
    pub invalidated: bool,
}

impl CloseTokenParams {
    pub fn redeemed_by(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            note: None,
            invalidated: false,
        }
    }

    pub fn invalidated(reason: impl Into<String>) -> Self {
        Self {
            user_id: None,
            note: Some(reason.into()),
            invalidated: true,
        }
    }

    pub fn manual(note: impl Into<String>) -> Self {
        Self {
            user_id: None,
            note: Some(note.into()),
            invalidated: false,
        }
    }
}

/// Equality filters for listing tokens (newest first).
#[derive(Clone, Debug, Default)]
pub struct TokenFilter {
    pub email: Option<String>,
    pub used: Option<bool>,
    /// Created at or after this instant
    pub created_since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl TokenFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn used(mut self, used: bool) -> Self {
        self.used = Some(used);
        self
    }

    pub fn created_since(mut self, since: DateTime<Utc>) -> Self {
        self.created_since = Some(since);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn token(used: bool) -> RegistrationToken {
        let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        RegistrationToken {
            token: "ab".repeat(32),
            email: "user@example.com".to_string(),
            grants: Grants::Single("21jours".to_string()),
            created_at: created,
            expires_at: created + Duration::days(30),
            used,
            used_at: None,
            user_id: None,
            note: None,
            invalidated_at: None,
        }
    }

    #[test]
    fn test_grants_from_names_picks_shape() {
        assert_eq!(Grants::from_names(vec![]), None);
        assert_eq!(
            Grants::from_names(vec!["21jours".into()]),
            Some(Grants::Single("21jours".into()))
        );
        assert_eq!(
            Grants::from_names(vec!["21jours".into(), "complet".into()]),
            Some(Grants::Multiple(vec!["21jours".into(), "complet".into()]))
        );
    }

    #[test]
    fn test_grants_names_keep_order() {
        let g = Grants::Multiple(vec!["b".into(), "a".into()]);
        assert_eq!(g.names(), vec!["b", "a"]);
        assert_eq!(g.to_string(), "b, a");
        assert_eq!(g.into_names(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_grants_json_accepts_both_shapes() {
        let single: Grants = serde_json::from_str("\"21jours\"").unwrap();
        assert_eq!(single, Grants::Single("21jours".into()));
        let multi: Grants = serde_json::from_str("[\"21jours\",\"complet\"]").unwrap();
        assert_eq!(multi.names(), vec!["21jours", "complet"]);
    }

    #[test]
    fn test_token_state_transitions() {
        let t = token(false);
        assert_eq!(t.state_at(t.created_at), TokenState::Unused);
        // Expiry is strict: exactly at expires_at is still valid
        assert_eq!(t.state_at(t.expires_at), TokenState::Unused);
        assert_eq!(
            t.state_at(t.expires_at + Duration::seconds(1)),
            TokenState::Expired
        );

        let used = token(true);
        assert_eq!(
            used.state_at(used.expires_at + Duration::days(1)),
            TokenState::Used
        );
    }

    #[test]
    fn test_close_params_constructors() {
        let p = CloseTokenParams::redeemed_by(UserId::from("U1"));
        assert_eq!(p.user_id, Some(UserId::from("U1")));
        assert!(!p.invalidated);

        let p = CloseTokenParams::invalidated("superseded");
        assert!(p.invalidated);
        assert_eq!(p.note.as_deref(), Some("superseded"));
        assert!(p.user_id.is_none());

        let p = CloseTokenParams::manual("account repaired");
        assert!(!p.invalidated);
        assert_eq!(p.note.as_deref(), Some("account repaired"));
    }

    #[test]
    fn test_token_filter_builder() {
        let f = TokenFilter::new().email("a@b.ch").used(false).limit(10);
        assert_eq!(f.email.as_deref(), Some("a@b.ch"));
        assert_eq!(f.used, Some(false));
        assert_eq!(f.limit, Some(10));
        assert!(f.created_since.is_none());
    }
}
