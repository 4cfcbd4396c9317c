//! Read-only consistency checks over tokens and records.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fluance_storage::{
    EntitlementRecord, Grants, RegistrationToken, Store, StoreError, TokenFilter, TokenState,
    UserId,
};
use serde::Serialize;
use tracing::debug;

use crate::error::{LedgerError, Result};

/// A used token whose redeeming user has no entitlement record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrphanedToken {
    pub token: String,
    pub email: String,
    pub user_id: UserId,
    pub grants: Grants,
    pub used_at: Option<DateTime<Utc>>,
}

/// A record whose legacy field disagrees with its last granted product.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LegacyMismatch {
    pub user_id: UserId,
    pub email: String,
    pub legacy_product: Option<String>,
    pub latest_product: Option<String>,
}

/// Token activation over a window.
#[derive(Clone, Debug, Serialize)]
pub struct ActivationReport {
    pub since: Option<DateTime<Utc>>,
    pub issued: usize,
    pub used: usize,
    pub expired: usize,
    /// used / issued, 0 when nothing was issued
    pub activation_rate: f64,
    /// Unused and not yet expired, newest first
    pub pending: Vec<RegistrationToken>,
}

pub struct Diagnostics<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Diagnostics<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn find_orphaned_used_tokens(&self) -> Result<Vec<OrphanedToken>> {
        let used = self
            .store
            .list_tokens(&TokenFilter::new().used(true))
            .await?;

        let mut known: HashMap<UserId, bool> = HashMap::new();
        let mut orphans = Vec::new();
        for token in used {
            // Invalidated and manually closed tokens carry no user
            let Some(user_id) = token.user_id.clone() else {
                continue;
            };
            let exists = match known.get(&user_id) {
                Some(exists) => *exists,
                None => {
                    let exists = match self.store.get_record(&user_id).await {
                        Ok(_) => true,
                        Err(StoreError::NotFound) => false,
                        Err(e) => return Err(e.into()),
                    };
                    known.insert(user_id.clone(), exists);
                    exists
                }
            };
            if !exists {
                orphans.push(OrphanedToken {
                    token: token.token,
                    email: token.email,
                    user_id,
                    grants: token.grants,
                    used_at: token.used_at,
                });
            }
        }
        debug!(count = orphans.len(), "orphaned used tokens scanned");
        Ok(orphans)
    }

    /// `None` when the record is consistent, including legacy-only records.
    pub async fn find_mismatched_legacy_product(
        &self,
        user_id: &UserId,
    ) -> Result<Option<LegacyMismatch>> {
        let record = self.store.get_record(user_id).await.map_err(|e| match e {
            StoreError::NotFound => LedgerError::RecordNotFound(user_id.clone()),
            e => e.into(),
        })?;
        Ok(legacy_mismatch(&record))
    }

    pub async fn scan_legacy_mismatches(&self) -> Result<Vec<LegacyMismatch>> {
        let records = self.store.list_records().await?;
        let total = records.len();
        let mismatches: Vec<_> = records.iter().filter_map(legacy_mismatch).collect();
        debug!(total, mismatched = mismatches.len(), "legacy mirror scan done");
        Ok(mismatches)
    }

    pub async fn activation_report(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<ActivationReport> {
        let mut filter = TokenFilter::new();
        if let Some(since) = since {
            filter = filter.created_since(since);
        }
        let tokens = self.store.list_tokens(&filter).await?;
        let now = Utc::now();

        let mut report = ActivationReport {
            since,
            issued: tokens.len(),
            used: 0,
            expired: 0,
            activation_rate: 0.0,
            pending: Vec::new(),
        };
        for token in tokens {
            match token.state_at(now) {
                TokenState::Used => report.used += 1,
                TokenState::Expired => report.expired += 1,
                TokenState::Unused => report.pending.push(token),
            }
        }
        if report.issued > 0 {
            report.activation_rate = report.used as f64 / report.issued as f64;
        }
        Ok(report)
    }
}

fn legacy_mismatch(record: &EntitlementRecord) -> Option<LegacyMismatch> {
    // Legacy-only records read back their own legacy field, so they always match
    let latest = record.latest_product()?;
    if record.legacy_product.as_deref() == Some(latest.as_str()) {
        return None;
    }
    Some(LegacyMismatch {
        user_id: record.user_id.clone(),
        email: record.email.clone(),
        legacy_product: record.legacy_product.clone(),
        latest_product: Some(latest),
    })
}
