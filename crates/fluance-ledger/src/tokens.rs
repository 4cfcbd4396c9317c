//! Single-use registration tokens: issue, redeem, and close.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fluance_audit::{AuditAction, AuditResult};
use fluance_storage::{
    CloseTokenParams, CreateTokenParams, Grants, ProductGrant, RegistrationToken, Store,
    StoreError, TokenFilter, TokenState, UserId,
};
use rand_core::{OsRng, RngCore};
use serde_json::json;
use tracing::{info, warn};

use crate::audit::Auditor;
use crate::catalog::{normalize_email, ProductCatalog};
use crate::entitlements::{failed, EntitlementRepository};
use crate::error::{LedgerError, Result};
use crate::window::days_after;

/// Token size in bytes before hex encoding.
pub const TOKEN_BYTES: usize = 32;

/// Fresh values to try when a generated token collides with a stored one.
const MAX_ISSUE_ATTEMPTS: usize = 3;

/// What to issue: recipient, products, and optional overrides.
#[derive(Clone, Debug)]
pub struct IssueRequest {
    pub email: String,
    pub products: Vec<String>,
    pub validity_days: Option<i64>,
    pub note: Option<String>,
}

impl IssueRequest {
    pub fn new<I, P>(email: impl Into<String>, products: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            email: email.into(),
            products: products.into_iter().map(Into::into).collect(),
            validity_days: None,
            note: None,
        }
    }

    pub fn validity_days(mut self, days: i64) -> Self {
        self.validity_days = Some(days);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// A token together with its state at inspection time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenInspection {
    pub token: RegistrationToken,
    pub state: TokenState,
}

/// 32 bytes from the OS RNG, hex-encoded.
pub fn generate_token() -> String {
    let mut token_bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut token_bytes);
    hex::encode(token_bytes)
}

/// First characters of a token, enough to identify it in logs.
pub fn token_prefix(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}

pub struct TokenManager<S: Store> {
    store: Arc<S>,
    entitlements: EntitlementRepository<S>,
    catalog: ProductCatalog,
    auditor: Auditor,
    default_validity_days: i64,
}

impl<S: Store> TokenManager<S> {
    pub fn new(
        store: Arc<S>,
        entitlements: EntitlementRepository<S>,
        catalog: ProductCatalog,
        auditor: Auditor,
        default_validity_days: i64,
    ) -> Self {
        Self {
            store,
            entitlements,
            catalog,
            auditor,
            default_validity_days,
        }
    }

    async fn get(&self, token: &str) -> Result<RegistrationToken> {
        self.store.get_token(token).await.map_err(|e| match e {
            StoreError::NotFound => LedgerError::TokenNotFound(token.to_string()),
            e => e.into(),
        })
    }

    /// Validate and persist a new unused token.
    pub async fn issue(&self, request: IssueRequest) -> Result<RegistrationToken> {
        let email = normalize_email(&request.email)?;
        self.catalog.validate_all(&request.products)?;
        let validity_days = request.validity_days.unwrap_or(self.default_validity_days);
        if validity_days <= 0 {
            return Err(LedgerError::validation(format!(
                "validity must be a positive number of days, got {validity_days}"
            )));
        }
        let expires_at = days_after(Utc::now(), validity_days)?;
        let grants = Grants::from_names(request.products)
            .ok_or_else(|| LedgerError::validation("at least one product is required"))?;

        for _ in 0..MAX_ISSUE_ATTEMPTS {
            let params = CreateTokenParams {
                token: generate_token(),
                email: email.clone(),
                grants: grants.clone(),
                expires_at,
                note: request.note.clone(),
            };
            match self.store.create_token(&params).await {
                Ok(token) => {
                    info!(
                        token = token_prefix(&token.token),
                        %email,
                        products = %token.grants,
                        expires_at = %token.expires_at,
                        "registration token issued"
                    );
                    self.auditor
                        .record(
                            self.auditor
                                .event(AuditAction::TokenIssue)
                                .resource("token", token.token.as_str())
                                .details(json!({
                                    "email": email,
                                    "products": token.grants.names(),
                                    "expires_at": token.expires_at,
                                }))
                                .build(),
                        )
                        .await;
                    return Ok(token);
                }
                Err(StoreError::AlreadyExists) => {
                    warn!("generated token collided with an existing one, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::AlreadyExists.into())
    }

    /// Issue one token per email with the same products and validity.
    ///
    /// Products and validity are checked once for the whole batch. Each email
    /// then succeeds or fails on its own: malformed addresses and repeats of an
    /// address already in the batch are reported without stopping the rest.
    /// Results keep the input order.
    pub async fn issue_many(
        &self,
        emails: &[String],
        products: &[String],
        validity_days: Option<i64>,
        note: Option<&str>,
    ) -> Result<Vec<(String, Result<RegistrationToken>)>> {
        if emails.is_empty() {
            return Err(LedgerError::validation("at least one email is required"));
        }
        self.catalog.validate_all(products)?;
        let validity_days = validity_days.unwrap_or(self.default_validity_days);
        if validity_days <= 0 {
            return Err(LedgerError::validation(format!(
                "validity must be a positive number of days, got {validity_days}"
            )));
        }
        days_after(Utc::now(), validity_days)?;

        let mut seen = HashSet::new();
        let mut results = Vec::with_capacity(emails.len());
        for raw in emails {
            let result = match normalize_email(raw) {
                Err(e) => Err(e),
                Ok(email) if seen.contains(&email) => Err(LedgerError::validation(format!(
                    "duplicate email in batch: {email}"
                ))),
                Ok(email) => {
                    seen.insert(email.clone());
                    let mut request = IssueRequest::new(email, products.iter().cloned())
                        .validity_days(validity_days);
                    request.note = note.map(str::to_string);
                    self.issue(request).await
                }
            };
            if let Err(e) = &result {
                warn!(email = %raw, error = %e, "skipped in batch issue");
            }
            results.push((raw.clone(), result));
        }

        let issued = results.iter().filter(|(_, r)| r.is_ok()).count();
        info!(issued, failed = results.len() - issued, "batch issue done");
        Ok(results)
    }

    /// Consume a token and grant its products to `user_id`.
    ///
    /// Fails without side effects on unknown, used, or expired tokens. Grants
    /// are applied before the token is closed, so a redemption that fails part
    /// way can be retried: products already granted are no-ops. Returns the
    /// grants for the token's products in token order.
    pub async fn redeem(&self, token: &str, user_id: &UserId) -> Result<Vec<ProductGrant>> {
        let event = self
            .auditor
            .event(AuditAction::TokenRedeem)
            .user_id(Some(user_id))
            .resource("token", token);

        let result = self.redeem_inner(token, user_id).await;
        match &result {
            Ok(grants) => {
                let names: Vec<&str> = grants.iter().map(|g| g.name.as_str()).collect();
                info!(token = token_prefix(token), %user_id, products = ?names, "token redeemed");
                self.auditor
                    .record(event.details(json!({ "products": names })).build())
                    .await;
            }
            Err(e) => {
                warn!(token = token_prefix(token), %user_id, error = %e, "redemption failed");
                self.auditor.record(failed(event, e).build()).await;
            }
        }
        result
    }

    async fn redeem_inner(&self, token: &str, user_id: &UserId) -> Result<Vec<ProductGrant>> {
        let record = self.get(token).await?;
        check_redeemable(&record, Utc::now())?;

        let names = record.grants.clone().into_names();
        self.entitlements.ensure_record(user_id, &record.email).await?;

        let now = Utc::now();
        let mut products = Vec::new();
        for name in &names {
            products = self
                .entitlements
                .grant_unchecked(user_id, name, now, now)
                .await?
                .into_products();
        }

        match self
            .store
            .close_token(token, &CloseTokenParams::redeemed_by(user_id.clone()))
            .await
        {
            Ok(_) => {}
            // Lost the race against a concurrent redemption or close
            Err(StoreError::Conflict) => return Err(self.already_used(token).await),
            Err(StoreError::NotFound) => return Err(LedgerError::TokenNotFound(token.to_string())),
            Err(e) => return Err(e.into()),
        }

        Ok(names
            .iter()
            .filter_map(|name| products.iter().find(|p| &p.name == name).cloned())
            .collect())
    }

    /// Close a token without granting anything, e.g. when it was sent to the
    /// wrong address.
    pub async fn invalidate(&self, token: &str, reason: &str) -> Result<RegistrationToken> {
        self.close_unredeemed(
            token,
            CloseTokenParams::invalidated(reason),
            AuditAction::TokenInvalidate,
        )
        .await
    }

    /// Mark a token used by hand, e.g. after the customer was set up manually.
    pub async fn mark_used_manually(&self, token: &str, note: &str) -> Result<RegistrationToken> {
        self.close_unredeemed(token, CloseTokenParams::manual(note), AuditAction::TokenMarkUsed)
            .await
    }

    async fn close_unredeemed(
        &self,
        token: &str,
        params: CloseTokenParams,
        action: AuditAction,
    ) -> Result<RegistrationToken> {
        let event = self
            .auditor
            .event(action)
            .resource("token", token)
            .details(json!({ "note": params.note }));

        let result = match self.store.close_token(token, &params).await {
            Ok(closed) => Ok(closed),
            Err(StoreError::Conflict) => Err(self.already_used(token).await),
            Err(StoreError::NotFound) => Err(LedgerError::TokenNotFound(token.to_string())),
            Err(e) => Err(e.into()),
        };

        match &result {
            Ok(closed) => {
                info!(token = token_prefix(token), %action, email = %closed.email, "token closed");
                self.auditor.record(event.build()).await;
            }
            Err(e) => self.auditor.record(failed(event, e).build()).await,
        }
        result
    }

    /// Mark every pending token for `email` used. Returns how many were closed.
    pub async fn mark_used_for_email(&self, email: &str, note: &str) -> Result<u64> {
        let email = normalize_email(email)?;
        let pending = self.pending_for(&email, None).await?;
        let closed = self
            .store
            .close_tokens(&pending, &CloseTokenParams::manual(note))
            .await?;
        info!(%email, closed, "pending tokens marked used");
        if closed > 0 {
            self.auditor
                .record(
                    self.auditor
                        .event(AuditAction::TokenMarkUsed)
                        .resource("email", email.as_str())
                        .details(json!({ "note": note, "tokens": pending.len(), "closed": closed }))
                        .build(),
                )
                .await;
        }
        Ok(closed)
    }

    /// Invalidate every other pending token for `email`, keeping `keep`.
    pub async fn supersede_pending(&self, email: &str, keep: &str) -> Result<u64> {
        let email = normalize_email(email)?;
        let pending = self.pending_for(&email, Some(keep)).await?;
        if pending.is_empty() {
            return Ok(0);
        }
        let reason = format!("superseded by {}", token_prefix(keep));
        let closed = self
            .store
            .close_tokens(&pending, &CloseTokenParams::invalidated(reason.as_str()))
            .await?;
        info!(%email, closed, kept = token_prefix(keep), "pending tokens superseded");
        self.auditor
            .record(
                self.auditor
                    .event(AuditAction::TokenInvalidate)
                    .resource("email", email.as_str())
                    .result(if closed > 0 {
                        AuditResult::Success
                    } else {
                        AuditResult::NoOp
                    })
                    .reason(reason)
                    .details(json!({ "tokens": pending, "closed": closed }))
                    .build(),
            )
            .await;
        Ok(closed)
    }

    pub async fn inspect(&self, token: &str) -> Result<TokenInspection> {
        let token = self.get(token).await?;
        Ok(TokenInspection {
            state: token.state_at(Utc::now()),
            token,
        })
    }

    /// Tokens matching `filter`, newest first. The email filter is normalized.
    pub async fn list(&self, mut filter: TokenFilter) -> Result<Vec<TokenInspection>> {
        if let Some(email) = filter.email.take() {
            filter.email = Some(normalize_email(&email)?);
        }
        let now = Utc::now();
        Ok(self
            .store
            .list_tokens(&filter)
            .await?
            .into_iter()
            .map(|token| TokenInspection {
                state: token.state_at(now),
                token,
            })
            .collect())
    }

    async fn pending_for(&self, email: &str, except: Option<&str>) -> Result<Vec<String>> {
        Ok(self
            .store
            .list_tokens(&TokenFilter::new().email(email).used(false))
            .await?
            .into_iter()
            .map(|t| t.token)
            .filter(|t| Some(t.as_str()) != except)
            .collect())
    }

    async fn already_used(&self, token: &str) -> LedgerError {
        match self.store.get_token(token).await {
            Ok(t) => LedgerError::AlreadyUsed {
                token: token.to_string(),
                used_at: t.used_at,
                user_id: t.user_id,
            },
            Err(e) => {
                warn!(token = token_prefix(token), error = %e, "could not re-read closed token");
                LedgerError::AlreadyUsed {
                    token: token.to_string(),
                    used_at: None,
                    user_id: None,
                }
            }
        }
    }
}

/// Used beats expired: a token redeemed before its expiry reports `AlreadyUsed`.
fn check_redeemable(token: &RegistrationToken, now: DateTime<Utc>) -> Result<()> {
    match token.state_at(now) {
        TokenState::Unused => Ok(()),
        TokenState::Used => Err(LedgerError::AlreadyUsed {
            token: token.token.clone(),
            used_at: token.used_at,
            user_id: token.user_id.clone(),
        }),
        TokenState::Expired => Err(LedgerError::Expired {
            token: token.token.clone(),
            expires_at: token.expires_at,
        }),
    }
}
