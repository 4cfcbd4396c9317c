//! The Store trait that backends implement.

use crate::types::*;
use crate::StoreError;

/// The storage trait the ledger depends on.
///
/// Models a document collection: get-by-key, equality-filter queries with a
/// fixed sort, conditional single-document writes, and batched writes. All
/// `created_at`/`updated_at`/`used_at` stamps are generated by the store.
#[cfg_attr(feature = "test-support", mockall::automock)]
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────── Entitlement records ───────────────────────────────

    /// Create a record. `AlreadyExists` if the user already has one.
    async fn create_record(
        &self,
        params: &CreateRecordParams,
    ) -> Result<EntitlementRecord, StoreError>;

    /// Get a record by user ID.
    async fn get_record(&self, user_id: &UserId) -> Result<EntitlementRecord, StoreError>;

    /// All records for a normalized email, oldest first.
    async fn find_records_by_email(&self, email: &str)
        -> Result<Vec<EntitlementRecord>, StoreError>;

    /// All records, oldest first.
    async fn list_records(&self) -> Result<Vec<EntitlementRecord>, StoreError>;

    /// Replace the product list and legacy mirror in one write.
    ///
    /// Applies only if the stored revision equals `expected_revision`
    /// (`Conflict` otherwise, `NotFound` if the record is gone). Returns the
    /// record as written.
    async fn update_products(
        &self,
        params: &UpdateProductsParams,
    ) -> Result<EntitlementRecord, StoreError>;

    // ───────────────────────────────── Registration tokens ──────────────────────────────

    /// Persist a new, unused token. `AlreadyExists` on token collision.
    async fn create_token(&self, params: &CreateTokenParams)
        -> Result<RegistrationToken, StoreError>;

    /// Get a token by its value.
    async fn get_token(&self, token: &str) -> Result<RegistrationToken, StoreError>;

    /// List tokens matching the filter, newest first.
    async fn list_tokens(&self, filter: &TokenFilter)
        -> Result<Vec<RegistrationToken>, StoreError>;

    /// Mark a token used.
    ///
    /// Applies only while the token is unused (`Conflict` if it was already
    /// closed, `NotFound` if absent). Returns the token as written.
    async fn close_token(
        &self,
        token: &str,
        params: &CloseTokenParams,
    ) -> Result<RegistrationToken, StoreError>;

    /// Close many tokens in batches of at most [`MAX_BATCH_OPS`].
    ///
    /// Tokens already closed are skipped. Returns how many were closed.
    async fn close_tokens(
        &self,
        tokens: &[String],
        params: &CloseTokenParams,
    ) -> Result<u64, StoreError>;
}
