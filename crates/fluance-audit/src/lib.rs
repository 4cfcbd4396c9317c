//! Audit logging abstraction for the Fluance entitlement ledger.
//!
//! This crate defines the `AuditLog` trait for persisting audit events
//! and the types representing auditable ledger mutations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluance_storage::UserId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for an audit log entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditLogId(pub Uuid);

impl AuditLogId {
    /// Generate a new audit log ID using UUID v7 (time-ordered)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AuditLogId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AuditLogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AuditLogId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Categories of auditable actions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // Registration tokens
    TokenIssue,
    TokenRedeem,
    TokenInvalidate,
    TokenMarkUsed,

    // Entitlement records
    RecordCreate,
    ProductGrant,
    ProductRevoke,
    ProductStartDateUpdate,
}

impl AuditAction {
    pub const ALL: [AuditAction; 8] = [
        AuditAction::TokenIssue,
        AuditAction::TokenRedeem,
        AuditAction::TokenInvalidate,
        AuditAction::TokenMarkUsed,
        AuditAction::RecordCreate,
        AuditAction::ProductGrant,
        AuditAction::ProductRevoke,
        AuditAction::ProductStartDateUpdate,
    ];
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::TokenIssue => "token.issue",
            AuditAction::TokenRedeem => "token.redeem",
            AuditAction::TokenInvalidate => "token.invalidate",
            AuditAction::TokenMarkUsed => "token.mark_used",
            AuditAction::RecordCreate => "record.create",
            AuditAction::ProductGrant => "product.grant",
            AuditAction::ProductRevoke => "product.revoke",
            AuditAction::ProductStartDateUpdate => "product.update_start_date",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "token.issue" => Ok(AuditAction::TokenIssue),
            "token.redeem" => Ok(AuditAction::TokenRedeem),
            "token.invalidate" => Ok(AuditAction::TokenInvalidate),
            "token.mark_used" => Ok(AuditAction::TokenMarkUsed),
            "record.create" => Ok(AuditAction::RecordCreate),
            "product.grant" => Ok(AuditAction::ProductGrant),
            "product.revoke" => Ok(AuditAction::ProductRevoke),
            "product.update_start_date" => Ok(AuditAction::ProductStartDateUpdate),
            _ => Err(format!("Unknown audit action: {}", s)),
        }
    }
}

/// Result of an audited operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    /// Nothing to do (e.g. product already granted)
    NoOp,
    NotFound,
    InvalidRequest,
    /// Token already used or expired
    Rejected,
    Error,
}

impl std::fmt::Display for AuditResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditResult::Success => "success",
            AuditResult::NoOp => "no_op",
            AuditResult::NotFound => "not_found",
            AuditResult::InvalidRequest => "invalid_request",
            AuditResult::Rejected => "rejected",
            AuditResult::Error => "error",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for AuditResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AuditResult::Success),
            "no_op" => Ok(AuditResult::NoOp),
            "not_found" => Ok(AuditResult::NotFound),
            "invalid_request" => Ok(AuditResult::InvalidRequest),
            "rejected" => Ok(AuditResult::Rejected),
            "error" => Ok(AuditResult::Error),
            _ => Err(format!("Unknown audit result: {}", s)),
        }
    }
}

/// An audit log entry representing a single ledger mutation attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique identifier for this audit entry
    pub id: AuditLogId,
    /// When the action occurred
    pub timestamp: DateTime<Utc>,
    /// Operator or automation that performed the action
    pub actor: String,
    /// Affected user (if applicable)
    pub user_id: Option<UserId>,
    /// The action that was performed
    pub action: AuditAction,
    /// Type of resource affected ("token" or "record")
    pub resource_type: String,
    /// Identifier of the affected resource
    pub resource_id: String,
    /// Result of the operation
    pub result: AuditResult,
    /// Error message or additional context
    pub reason: Option<String>,
    /// Additional details as JSON (e.g., products, old/new start dates)
    pub details: Option<serde_json::Value>,
}

impl AuditEvent {
    /// Create a new audit event builder
    pub fn builder(actor: impl Into<String>, action: AuditAction) -> AuditEventBuilder {
        AuditEventBuilder::new(actor, action)
    }
}

/// Builder for constructing audit events
pub struct AuditEventBuilder {
    actor: String,
    action: AuditAction,
    user_id: Option<UserId>,
    resource_type: String,
    resource_id: String,
    result: AuditResult,
    reason: Option<String>,
    details: Option<serde_json::Value>,
}

impl AuditEventBuilder {
    pub fn new(actor: impl Into<String>, action: AuditAction) -> Self {
        Self {
            actor: actor.into(),
            action,
            user_id: None,
            resource_type: String::new(),
            resource_id: String::new(),
            result: AuditResult::Success,
            reason: None,
            details: None,
        }
    }

    pub fn user_id(mut self, user_id: Option<&UserId>) -> Self {
        self.user_id = user_id.cloned();
        self
    }

    pub fn resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = resource_type.into();
        self.resource_id = resource_id.into();
        self
    }

    pub fn result(mut self, result: AuditResult) -> Self {
        self.result = result;
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn build(self) -> AuditEvent {
        AuditEvent {
            id: AuditLogId::new(),
            timestamp: Utc::now(),
            actor: self.actor,
            user_id: self.user_id,
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            result: self.result,
            reason: self.reason,
            details: self.details,
        }
    }
}

/// Filter for querying audit logs
#[derive(Clone, Debug, Default)]
pub struct AuditLogFilter {
    /// Filter by actor
    pub actor: Option<String>,
    /// Filter by affected user
    pub user_id: Option<UserId>,
    /// Filter by resource ID (e.g. a token value)
    pub resource_id: Option<String>,
    /// Filter by action
    pub action: Option<AuditAction>,
    /// Filter by result
    pub result: Option<AuditResult>,
    /// Filter by start timestamp (inclusive)
    pub from: Option<DateTime<Utc>>,
    /// Filter by end timestamp (exclusive)
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of results to return
    pub limit: Option<u32>,
    /// Number of results to skip (for pagination)
    pub offset: Option<u32>,
}

impl AuditLogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn result(mut self, result: AuditResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn from(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Error type for audit log operations
#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("database error: {0}")]
    Database(String),

    #[error("audit log not found: {0}")]
    NotFound(AuditLogId),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

/// Trait for audit log persistence.
///
/// Implementations store audit events and provide query capabilities
/// for support and reconciliation work.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Record an audit event.
    ///
    /// Failures to record audit events should be logged but should not
    /// fail the main operation.
    async fn record(&self, event: AuditEvent) -> Result<(), AuditLogError>;

    /// Query audit logs with optional filters.
    ///
    /// Returns events matching the filter criteria, ordered by timestamp descending.
    async fn query(&self, filter: AuditLogFilter) -> Result<Vec<AuditEvent>, AuditLogError>;

    /// Get a specific audit log entry by ID.
    async fn get(&self, id: AuditLogId) -> Result<AuditEvent, AuditLogError>;

    /// Count audit logs matching the filter criteria.
    async fn count(&self, filter: AuditLogFilter) -> Result<u64, AuditLogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_action_display() {
        assert_eq!(AuditAction::TokenIssue.to_string(), "token.issue");
        assert_eq!(AuditAction::ProductGrant.to_string(), "product.grant");
        assert_eq!(
            AuditAction::ProductStartDateUpdate.to_string(),
            "product.update_start_date"
        );
    }

    #[test]
    fn test_audit_action_parse() {
        assert_eq!(
            "token.redeem".parse::<AuditAction>().unwrap(),
            AuditAction::TokenRedeem
        );
        assert!("secret.create".parse::<AuditAction>().is_err());
    }

    #[test]
    fn test_audit_action_all_variants_roundtrip() {
        for action in AuditAction::ALL {
            let parsed: AuditAction = action.to_string().parse().unwrap();
            assert_eq!(action, parsed, "Roundtrip failed for {:?}", action);
        }
    }

    #[test]
    fn test_audit_result_parse_error() {
        let result = "unknown_result".parse::<AuditResult>();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Unknown audit result"));
        assert_eq!("no_op".parse::<AuditResult>().unwrap(), AuditResult::NoOp);
    }

    #[test]
    fn test_audit_event_builder() {
        let user_id = UserId::from("U1");
        let event = AuditEvent::builder("support", AuditAction::ProductGrant)
            .user_id(Some(&user_id))
            .resource("record", "U1")
            .result(AuditResult::NoOp)
            .reason("already granted")
            .details(serde_json::json!({ "product": "21jours" }))
            .build();

        assert_eq!(event.actor, "support");
        assert_eq!(event.action, AuditAction::ProductGrant);
        assert_eq!(event.user_id, Some(user_id));
        assert_eq!(event.resource_type, "record");
        assert_eq!(event.resource_id, "U1");
        assert_eq!(event.result, AuditResult::NoOp);
        assert_eq!(event.reason.as_deref(), Some("already granted"));
        assert_eq!(event.details.unwrap()["product"], "21jours");
    }

    #[test]
    fn test_audit_event_defaults_to_success() {
        let event = AuditEvent::builder("cli", AuditAction::TokenIssue).build();
        assert_eq!(event.result, AuditResult::Success);
        assert!(event.user_id.is_none());
        assert!(event.reason.is_none());
    }

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::builder("cli", AuditAction::TokenRedeem)
            .resource("token", "abc")
            .build();

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: AuditEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(event.id, deserialized.id);
        assert_eq!(event.action, deserialized.action);
        assert!(json.contains("\"token_redeem\""));
    }

    #[test]
    fn test_audit_log_id_parse() {
        let id = AuditLogId::new();
        let parsed: AuditLogId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<AuditLogId>().is_err());
    }

    #[test]
    fn test_audit_log_id_default() {
        assert_ne!(AuditLogId::default(), AuditLogId::default());
    }

    #[test]
    fn test_audit_log_filter_builder() {
        let filter = AuditLogFilter::new()
            .user_id(UserId::from("U1"))
            .action(AuditAction::TokenRedeem)
            .result(AuditResult::Success)
            .limit(20)
            .offset(40);

        assert_eq!(filter.user_id, Some(UserId::from("U1")));
        assert_eq!(filter.action, Some(AuditAction::TokenRedeem));
        assert_eq!(filter.limit, Some(20));
        assert_eq!(filter.offset, Some(40));
        assert!(filter.actor.is_none());
    }
}
