use std::sync::Arc;

use fluance_audit::{AuditAction, AuditEvent, AuditEventBuilder, AuditLog};
use tracing::warn;

/// Default actor when none is configured.
pub const DEFAULT_ACTOR: &str = "fluance-admin";

/// Records ledger mutations to an optional audit sink on behalf of one actor.
///
/// Sink failures are logged and swallowed; a mutation that succeeded stays
/// successful even when its audit entry could not be written.
#[derive(Clone)]
pub struct Auditor {
    sink: Option<Arc<dyn AuditLog>>,
    actor: String,
}

impl Auditor {
    pub fn new(sink: Arc<dyn AuditLog>, actor: impl Into<String>) -> Self {
        Self {
            sink: Some(sink),
            actor: actor.into(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            sink: None,
            actor: DEFAULT_ACTOR.to_string(),
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub(crate) fn event(&self, action: AuditAction) -> AuditEventBuilder {
        AuditEvent::builder(self.actor.clone(), action)
    }

    pub(crate) async fn record(&self, event: AuditEvent) {
        let Some(sink) = &self.sink else {
            return;
        };
        let action = event.action;
        let resource_id = event.resource_id.clone();
        if let Err(e) = sink.record(event).await {
            warn!(%action, %resource_id, error = %e, "failed to record audit event");
        }
    }
}

impl std::fmt::Debug for Auditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auditor")
            .field("actor", &self.actor)
            .field("enabled", &self.sink.is_some())
            .finish()
    }
}
