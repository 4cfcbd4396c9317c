//! Entitlement record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// One product unlocked for a user.
///
/// `start_date` gates time-released content (drip); `purchased_at` is when
/// the grant was made.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductGrant {
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub purchased_at: DateTime<Utc>,
}

impl ProductGrant {
    pub fn new(
        name: impl Into<String>,
        start_date: DateTime<Utc>,
        purchased_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            start_date,
            purchased_at,
        }
    }
}

/// Per-user entitlement document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntitlementRecord {
    pub user_id: UserId,
    /// Normalized (trimmed, lowercased)
    pub email: String,
    /// Grant order
    pub products: Vec<ProductGrant>,
    /// Mirrors the most recent grant
    pub legacy_product: Option<String>,
    /// Only on legacy records
    pub registration_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every write
    pub revision: i64,
}

impl EntitlementRecord {
    /// Product list as readers should see it.
    ///
    /// Records written before the multi-product format only carry the legacy
    /// single field; those read as a one-element list. Nothing is persisted.
    pub fn effective_products(&self) -> Vec<ProductGrant> {
        if !self.products.is_empty() {
            return self.products.clone();
        }
        match &self.legacy_product {
            Some(name) => vec![ProductGrant {
                name: name.clone(),
                start_date: self.registration_date.unwrap_or(self.created_at),
                purchased_at: self.created_at,
            }],
            None => Vec::new(),
        }
    }

    /// True when reads synthesize the product list from the legacy field.
    pub fn needs_migration(&self) -> bool {
        self.products.is_empty() && self.legacy_product.is_some()
    }

    /// Name of the most recently granted product, if any.
    pub fn latest_product(&self) -> Option<String> {
        self.effective_products().last().map(|p| p.name.clone())
    }
}

/// Value the legacy single-product field must hold for a given product list.
pub fn legacy_mirror(products: &[ProductGrant]) -> Option<String> {
    products.last().map(|p| p.name.clone())
}

/// Parameters for creating an entitlement record
#[derive(Clone, Debug)]
pub struct CreateRecordParams {
    pub user_id: UserId,
    pub email: String,
    pub products: Vec<ProductGrant>,
    pub legacy_product: Option<String>,
    pub registration_date: Option<DateTime<Utc>>,
}

/// Parameters for rewriting a record's product list.
///
/// The write only applies if the stored revision still equals
/// `expected_revision`; otherwise the store reports `Conflict`.
#[derive(Clone, Debug)]
pub struct UpdateProductsParams {
    pub user_id: UserId,
    pub expected_revision: i64,
    pub products: Vec<ProductGrant>,
    pub legacy_product: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 9, 0, 0).unwrap()
    }

    fn record(products: Vec<ProductGrant>, legacy: Option<&str>) -> EntitlementRecord {
        EntitlementRecord {
            user_id: UserId::from("U1"),
            email: "user@example.com".to_string(),
            products,
            legacy_product: legacy.map(str::to_string),
            registration_date: None,
            created_at: ts(1),
            updated_at: ts(1),
            revision: 1,
        }
    }

    #[test]
    fn test_effective_products_prefers_array() {
        let r = record(vec![ProductGrant::new("complet", ts(2), ts(2))], Some("21jours"));
        let products = r.effective_products();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name, "complet");
        assert!(!r.needs_migration());
    }

    #[test]
    fn test_effective_products_synthesizes_from_legacy() {
        let mut r = record(vec![], Some("21jours"));
        let products = r.effective_products();
        assert_eq!(products, vec![ProductGrant::new("21jours", ts(1), ts(1))]);
        assert!(r.needs_migration());

        r.registration_date = Some(ts(1) - Duration::days(22));
        let products = r.effective_products();
        assert_eq!(products[0].start_date, ts(1) - Duration::days(22));
        assert_eq!(products[0].purchased_at, ts(1));
        // Reading never touches the stored array
        assert!(r.products.is_empty());
    }

    #[test]
    fn test_effective_products_empty_record() {
        let r = record(vec![], None);
        assert!(r.effective_products().is_empty());
        assert_eq!(r.latest_product(), None);
    }

    #[test]
    fn test_latest_product_and_mirror() {
        let products = vec![
            ProductGrant::new("21jours", ts(2), ts(2)),
            ProductGrant::new("sos-dos-cervicales", ts(3), ts(3)),
        ];
        assert_eq!(legacy_mirror(&products).as_deref(), Some("sos-dos-cervicales"));
        assert_eq!(legacy_mirror(&[]), None);

        let r = record(products, Some("21jours"));
        assert_eq!(r.latest_product().as_deref(), Some("sos-dos-cervicales"));
    }

    #[test]
    fn test_product_grant_json_shape() {
        let grant = ProductGrant::new("21jours", ts(2), ts(2));
        let json = serde_json::to_value(&grant).unwrap();
        assert_eq!(json["name"], "21jours");
        assert!(json.get("startDate").is_some());
        assert!(json.get("purchasedAt").is_some());
    }
}
