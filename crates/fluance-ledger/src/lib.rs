//! Entitlement ledger for Fluance courses.
//!
//! Three components share one [`Store`] handle:
//! - [`EntitlementRepository`]: per-user product grants, with lazy migration
//!   of legacy single-product records and revision-checked writes.
//! - [`TokenManager`]: single-use registration tokens that carry grants from
//!   purchase to account creation.
//! - [`Diagnostics`]: read-only detection of inconsistent states.

use std::sync::Arc;

use fluance_storage::Store;

mod audit;
mod catalog;
mod diagnostics;
mod entitlements;
mod error;
mod tokens;
mod window;

pub use audit::{Auditor, DEFAULT_ACTOR};
pub use catalog::{normalize_email, ProductCatalog};
pub use diagnostics::{ActivationReport, Diagnostics, LegacyMismatch, OrphanedToken};
pub use entitlements::{EntitlementRepository, GrantOutcome, MAX_WRITE_ATTEMPTS};
pub use error::{ErrorKind, LedgerError, Result};
pub use tokens::{
    generate_token, token_prefix, IssueRequest, TokenInspection, TokenManager, TOKEN_BYTES,
};
pub use window::{days_after, days_before};

/// The three ledger components wired to one store.
pub struct Ledger<S: Store> {
    pub entitlements: EntitlementRepository<S>,
    pub tokens: TokenManager<S>,
    pub diagnostics: Diagnostics<S>,
}

impl<S: Store> Ledger<S> {
    pub fn new(
        store: Arc<S>,
        catalog: ProductCatalog,
        auditor: Auditor,
        default_validity_days: i64,
    ) -> Self {
        let entitlements =
            EntitlementRepository::new(Arc::clone(&store), catalog.clone(), auditor.clone());
        let tokens = TokenManager::new(
            Arc::clone(&store),
            entitlements.clone(),
            catalog,
            auditor,
            default_validity_days,
        );
        Self {
            entitlements,
            tokens,
            diagnostics: Diagnostics::new(store),
        }
    }
}
