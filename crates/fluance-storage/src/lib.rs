//! Storage abstraction for the Fluance entitlement ledger.
//!
//! Backend crates (e.g., fluance-store-sqlite) implement [`Store`] so the
//! ledger doesn't depend on any specific database engine or schema details.

use thiserror::Error;

mod store;
mod types;

pub use store::*;
pub use types::*;

/// Uniform error type for all storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("conflict")]
    Conflict,
    #[error("backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    // Tiny compile-time smoke test for trait object usage.
    struct NoopStore;

    #[async_trait::async_trait]
    impl Store for NoopStore {
        async fn create_record(
            &self,
            params: &CreateRecordParams,
        ) -> Result<EntitlementRecord, StoreError> {
            Ok(EntitlementRecord {
                user_id: params.user_id.clone(),
                email: params.email.clone(),
                products: params.products.clone(),
                legacy_product: params.legacy_product.clone(),
                registration_date: params.registration_date,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                revision: 1,
            })
        }

        async fn get_record(&self, _user_id: &UserId) -> Result<EntitlementRecord, StoreError> {
            Err(StoreError::NotFound)
        }

        async fn find_records_by_email(
            &self,
            _email: &str,
        ) -> Result<Vec<EntitlementRecord>, StoreError> {
            Ok(vec![])
        }

        async fn list_records(&self) -> Result<Vec<EntitlementRecord>, StoreError> {
            Ok(vec![])
        }

        async fn update_products(
            &self,
            _params: &UpdateProductsParams,
        ) -> Result<EntitlementRecord, StoreError> {
            Err(StoreError::Conflict)
        }

        async fn create_token(
            &self,
            params: &CreateTokenParams,
        ) -> Result<RegistrationToken, StoreError> {
            Ok(RegistrationToken {
                token: params.token.clone(),
                email: params.email.clone(),
                grants: params.grants.clone(),
                created_at: Utc::now(),
                expires_at: params.expires_at,
                used: false,
                used_at: None,
                user_id: None,
                note: params.note.clone(),
                invalidated_at: None,
            })
        }

        async fn get_token(&self, _token: &str) -> Result<RegistrationToken, StoreError> {
            Err(StoreError::NotFound)
        }

        async fn list_tokens(
            &self,
            _filter: &TokenFilter,
        ) -> Result<Vec<RegistrationToken>, StoreError> {
            Ok(vec![])
        }

        async fn close_token(
            &self,
            _token: &str,
            _params: &CloseTokenParams,
        ) -> Result<RegistrationToken, StoreError> {
            Err(StoreError::NotFound)
        }

        async fn close_tokens(
            &self,
            _tokens: &[String],
            _params: &CloseTokenParams,
        ) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn trait_smoke() {
        let s: Box<dyn Store> = Box::new(NoopStore);

        let record = s
            .create_record(&CreateRecordParams {
                user_id: UserId::from("U1"),
                email: "test@example.com".to_string(),
                products: vec![],
                legacy_product: Some("21jours".to_string()),
                registration_date: None,
            })
            .await
            .unwrap();
        assert!(record.needs_migration());

        let token = s
            .create_token(&CreateTokenParams {
                token: "00".repeat(32),
                email: "test@example.com".to_string(),
                grants: Grants::Single("21jours".to_string()),
                expires_at: Utc::now() + Duration::days(30),
                note: None,
            })
            .await
            .unwrap();
        assert!(!token.used);

        assert!(matches!(
            s.get_record(&UserId::from("missing")).await,
            Err(StoreError::NotFound)
        ));
        let _ = s.list_tokens(&TokenFilter::new().used(false)).await.unwrap();
    }

    #[test]
    fn test_store_error_display() {
        assert_eq!(StoreError::NotFound.to_string(), "not found");
        assert_eq!(StoreError::Conflict.to_string(), "conflict");
        assert_eq!(
            StoreError::Backend("disk full".into()).to_string(),
            "backend error: disk full"
        );
    }
}
