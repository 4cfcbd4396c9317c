//! Per-user entitlement records: reads with lazy legacy migration and
//! revision-checked product mutations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fluance_audit::{AuditAction, AuditEventBuilder, AuditResult};
use fluance_storage::{
    legacy_mirror, CreateRecordParams, EntitlementRecord, ProductGrant, Store, StoreError,
    UpdateProductsParams, UserId,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::audit::Auditor;
use crate::catalog::{normalize_email, ProductCatalog};
use crate::error::{ErrorKind, LedgerError, Result};
use crate::window::days_before;

/// Read-check-write attempts before giving up under contention.
pub const MAX_WRITE_ATTEMPTS: usize = 5;

/// Result of a grant. Granting something the user already owns is not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted(Vec<ProductGrant>),
    AlreadyGranted(Vec<ProductGrant>),
}

impl GrantOutcome {
    pub fn products(&self) -> &[ProductGrant] {
        match self {
            GrantOutcome::Granted(p) | GrantOutcome::AlreadyGranted(p) => p,
        }
    }

    pub fn into_products(self) -> Vec<ProductGrant> {
        match self {
            GrantOutcome::Granted(p) | GrantOutcome::AlreadyGranted(p) => p,
        }
    }

    pub fn was_granted(&self) -> bool {
        matches!(self, GrantOutcome::Granted(_))
    }
}

/// What an edit wants done with the freshly read product list.
enum Edit {
    Write(Vec<ProductGrant>),
    Keep(Vec<ProductGrant>),
}

pub struct EntitlementRepository<S: Store> {
    store: Arc<S>,
    catalog: ProductCatalog,
    auditor: Auditor,
}

impl<S: Store> Clone for EntitlementRepository<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            catalog: self.catalog.clone(),
            auditor: self.auditor.clone(),
        }
    }
}

impl<S: Store> EntitlementRepository<S> {
    pub fn new(store: Arc<S>, catalog: ProductCatalog, auditor: Auditor) -> Self {
        Self {
            store,
            catalog,
            auditor,
        }
    }

    pub async fn get_record(&self, user_id: &UserId) -> Result<EntitlementRecord> {
        self.store.get_record(user_id).await.map_err(|e| match e {
            StoreError::NotFound => LedgerError::RecordNotFound(user_id.clone()),
            e => e.into(),
        })
    }

    /// The user's grants. Legacy single-product records are presented as a
    /// one-element list without being rewritten.
    pub async fn get_entitlements(&self, user_id: &UserId) -> Result<Vec<ProductGrant>> {
        Ok(self.get_record(user_id).await?.effective_products())
    }

    /// Grant `product` starting now.
    pub async fn grant_product(&self, user_id: &UserId, product: &str) -> Result<GrantOutcome> {
        let now = Utc::now();
        self.grant_product_at(user_id, product, now, now).await
    }

    pub async fn grant_product_at(
        &self,
        user_id: &UserId,
        product: &str,
        start_date: DateTime<Utc>,
        purchased_at: DateTime<Utc>,
    ) -> Result<GrantOutcome> {
        self.catalog.validate(product)?;
        self.grant_unchecked(user_id, product, start_date, purchased_at)
            .await
    }

    /// Grant without the catalog check, for tokens issued under an older catalog.
    pub(crate) async fn grant_unchecked(
        &self,
        user_id: &UserId,
        product: &str,
        start_date: DateTime<Utc>,
        purchased_at: DateTime<Utc>,
    ) -> Result<GrantOutcome> {
        if product.trim().is_empty() {
            return Err(LedgerError::validation("product name is empty"));
        }

        let result = self
            .apply(user_id, |mut products| {
                if products.iter().any(|p| p.name == product) {
                    return Ok(Edit::Keep(products));
                }
                products.push(ProductGrant::new(product, start_date, purchased_at));
                Ok(Edit::Write(products))
            })
            .await;

        let event = self
            .auditor
            .event(AuditAction::ProductGrant)
            .user_id(Some(user_id))
            .resource("record", user_id.as_str())
            .details(json!({ "product": product, "start_date": start_date }));

        match result {
            Ok((products, true)) => {
                info!(%user_id, product, "product granted");
                self.auditor.record(event.build()).await;
                Ok(GrantOutcome::Granted(products))
            }
            Ok((products, false)) => {
                info!(%user_id, product, "product already granted");
                self.auditor
                    .record(event.result(AuditResult::NoOp).reason("already granted").build())
                    .await;
                Ok(GrantOutcome::AlreadyGranted(products))
            }
            Err(e) => {
                self.auditor.record(failed(event, &e).build()).await;
                Err(e)
            }
        }
    }

    /// Move a product's start date. `ProductNotFound` leaves the record untouched.
    pub async fn update_product_start_date(
        &self,
        user_id: &UserId,
        product: &str,
        new_start: DateTime<Utc>,
    ) -> Result<Vec<ProductGrant>> {
        let mut previous = None;
        let result = self
            .apply(user_id, |mut products| {
                let grant = products
                    .iter_mut()
                    .find(|p| p.name == product)
                    .ok_or_else(|| LedgerError::ProductNotFound {
                        user_id: user_id.clone(),
                        product: product.to_string(),
                    })?;
                previous = Some(grant.start_date);
                grant.start_date = new_start;
                Ok(Edit::Write(products))
            })
            .await;

        let event = self
            .auditor
            .event(AuditAction::ProductStartDateUpdate)
            .user_id(Some(user_id))
            .resource("record", user_id.as_str());

        match result {
            Ok((products, _)) => {
                info!(%user_id, product, start_date = %new_start, "product start date updated");
                self.auditor
                    .record(
                        event
                            .details(json!({
                                "product": product,
                                "old_start_date": previous,
                                "new_start_date": new_start,
                            }))
                            .build(),
                    )
                    .await;
                Ok(products)
            }
            Err(e) => {
                self.auditor
                    .record(failed(event.details(json!({ "product": product })), &e).build())
                    .await;
                Err(e)
            }
        }
    }

    /// Move a product's start date `days_back` days into the past so all
    /// time-gated content is already released.
    pub async fn unlock_product(
        &self,
        user_id: &UserId,
        product: &str,
        days_back: i64,
    ) -> Result<Vec<ProductGrant>> {
        if days_back <= 0 {
            return Err(LedgerError::validation(format!(
                "days back must be positive, got {days_back}"
            )));
        }
        let new_start = days_before(Utc::now(), days_back)?;
        self.update_product_start_date(user_id, product, new_start)
            .await
    }

    /// Remove a grant. The legacy mirror follows the new last product, or is
    /// cleared when nothing is left.
    pub async fn revoke_product(
        &self,
        user_id: &UserId,
        product: &str,
    ) -> Result<Vec<ProductGrant>> {
        let result = self
            .apply(user_id, |mut products| {
                let before = products.len();
                products.retain(|p| p.name != product);
                if products.len() == before {
                    return Err(LedgerError::ProductNotFound {
                        user_id: user_id.clone(),
                        product: product.to_string(),
                    });
                }
                Ok(Edit::Write(products))
            })
            .await;

        let event = self
            .auditor
            .event(AuditAction::ProductRevoke)
            .user_id(Some(user_id))
            .resource("record", user_id.as_str())
            .details(json!({ "product": product }));

        match result {
            Ok((products, _)) => {
                info!(%user_id, product, remaining = products.len(), "product revoked");
                self.auditor.record(event.build()).await;
                Ok(products)
            }
            Err(e) => {
                self.auditor.record(failed(event, &e).build()).await;
                Err(e)
            }
        }
    }

    /// Return the user's record, creating an empty one with `email` if missing.
    ///
    /// The bool is true when this call created the record.
    pub async fn ensure_record(
        &self,
        user_id: &UserId,
        email: &str,
    ) -> Result<(EntitlementRecord, bool)> {
        match self.store.get_record(user_id).await {
            Ok(record) => return Ok((record, false)),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let email = normalize_email(email)?;
        match self.create(user_id, &email, Vec::new()).await {
            Ok(record) => Ok((record, true)),
            // Someone else created it between our read and insert
            Err(LedgerError::BackingStore(StoreError::AlreadyExists)) => {
                Ok((self.get_record(user_id).await?, false))
            }
            Err(e) => Err(e),
        }
    }

    /// Create a missing record for an existing auth account with the given
    /// products. Refuses with `RecordExists` when the user already has one.
    pub async fn repair_record(
        &self,
        user_id: &UserId,
        email: &str,
        products: &[String],
    ) -> Result<EntitlementRecord> {
        let email = normalize_email(email)?;
        self.catalog.validate_all(products)?;

        match self.store.get_record(user_id).await {
            Ok(_) => return Err(LedgerError::RecordExists(user_id.clone())),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let now = Utc::now();
        let grants = products
            .iter()
            .map(|name| ProductGrant::new(name.as_str(), now, now))
            .collect();
        match self.create(user_id, &email, grants).await {
            Err(LedgerError::BackingStore(StoreError::AlreadyExists)) => {
                Err(LedgerError::RecordExists(user_id.clone()))
            }
            other => other,
        }
    }

    /// First record (by creation time) for an email.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<EntitlementRecord>> {
        let email = normalize_email(email)?;
        let records = self.store.find_records_by_email(&email).await?;
        if records.len() > 1 {
            warn!(
                %email,
                count = records.len(),
                "several entitlement records share this email; using the oldest"
            );
        }
        Ok(records.into_iter().next())
    }

    async fn create(
        &self,
        user_id: &UserId,
        email: &str,
        products: Vec<ProductGrant>,
    ) -> Result<EntitlementRecord> {
        let legacy_product = legacy_mirror(&products);
        let result = self
            .store
            .create_record(&CreateRecordParams {
                user_id: user_id.clone(),
                email: email.to_string(),
                products,
                legacy_product,
                registration_date: None,
            })
            .await;

        let event = self
            .auditor
            .event(AuditAction::RecordCreate)
            .user_id(Some(user_id))
            .resource("record", user_id.as_str());
        match result {
            Ok(record) => {
                let names: Vec<&str> = record.products.iter().map(|p| p.name.as_str()).collect();
                info!(%user_id, %email, products = ?names, "entitlement record created");
                self.auditor
                    .record(
                        event
                            .details(json!({ "email": email, "products": names }))
                            .build(),
                    )
                    .await;
                Ok(record)
            }
            Err(e) => {
                let e = LedgerError::from(e);
                self.auditor.record(failed(event, &e).build()).await;
                Err(e)
            }
        }
    }

    /// Read, edit, and conditionally write the product list, retrying the
    /// whole cycle when another writer bumped the revision first.
    ///
    /// Returns the resulting products and whether a write happened.
    async fn apply<F>(
        &self,
        user_id: &UserId,
        mut edit: F,
    ) -> Result<(Vec<ProductGrant>, bool)>
    where
        F: FnMut(Vec<ProductGrant>) -> Result<Edit>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let record = self.get_record(user_id).await?;
            let products = match edit(record.effective_products())? {
                Edit::Keep(products) => return Ok((products, false)),
                Edit::Write(products) => products,
            };

            let params = UpdateProductsParams {
                user_id: user_id.clone(),
                expected_revision: record.revision,
                legacy_product: legacy_mirror(&products),
                products,
            };
            match self.store.update_products(&params).await {
                Ok(updated) => {
                    if record.needs_migration() {
                        debug!(%user_id, "legacy record migrated to product list");
                    }
                    return Ok((updated.products, true));
                }
                Err(StoreError::Conflict) => {
                    debug!(%user_id, attempt, "revision conflict, retrying");
                }
                Err(StoreError::NotFound) => {
                    return Err(LedgerError::RecordNotFound(user_id.clone()))
                }
                Err(e) => return Err(e.into()),
            }
        }
        warn!(%user_id, attempts = MAX_WRITE_ATTEMPTS, "gave up after repeated write conflicts");
        Err(LedgerError::BackingStore(StoreError::Conflict))
    }
}

/// Stamp an audit event with the outcome of a failed operation.
pub(crate) fn failed(event: AuditEventBuilder, err: &LedgerError) -> AuditEventBuilder {
    let result = match err.kind() {
        ErrorKind::NotFound | ErrorKind::ProductNotFound => AuditResult::NotFound,
        ErrorKind::Validation | ErrorKind::AlreadyExists => AuditResult::InvalidRequest,
        ErrorKind::AlreadyUsed | ErrorKind::Expired => AuditResult::Rejected,
        ErrorKind::BackingStore => AuditResult::Error,
    };
    event.result(result).reason(err.to_string())
}
