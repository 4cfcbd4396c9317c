//! Product catalog and input normalization.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{LedgerError, Result};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static email pattern"));

/// Trim and lowercase an email, rejecting anything that isn't `local@domain.tld`.
pub fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err(LedgerError::validation("email is empty"));
    }
    if !EMAIL_RE.is_match(&email) {
        return Err(LedgerError::validation(format!("invalid email: {raw}")));
    }
    Ok(email)
}

/// The set of product identifiers the business sells.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductCatalog {
    names: Vec<String>,
}

impl ProductCatalog {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(LedgerError::validation("product name is empty"));
        }
        if !self.contains(name) {
            return Err(LedgerError::validation(format!(
                "unknown product {name} (known: {})",
                self.names.join(", ")
            )));
        }
        Ok(())
    }

    /// A grant list must be non-empty, known, and free of duplicates.
    pub fn validate_all(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Err(LedgerError::validation("at least one product is required"));
        }
        let mut seen = HashSet::new();
        for name in names {
            self.validate(name)?;
            if !seen.insert(name.as_str()) {
                return Err(LedgerError::validation(format!("duplicate product {name}")));
            }
        }
        Ok(())
    }
}

impl Default for ProductCatalog {
    fn default() -> Self {
        Self::new(["21jours", "sos-dos-cervicales", "complet", "rdv-clarte"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            normalize_email("  CBaka@Bluewin.CH ").unwrap(),
            "cbaka@bluewin.ch"
        );
        for bad in ["", "   ", "no-at-sign", "a@b", "two words@x.ch", "@x.ch"] {
            let err = normalize_email(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "accepted {bad:?}");
        }
    }

    #[test]
    fn test_validate_known_products() {
        let catalog = ProductCatalog::default();
        assert!(catalog.validate("21jours").is_ok());
        assert!(catalog.validate("yoga").is_err());
        assert!(catalog.validate(" ").is_err());
    }

    #[test]
    fn test_validate_all() {
        let catalog = ProductCatalog::default();
        assert!(catalog
            .validate_all(&["21jours".into(), "sos-dos-cervicales".into()])
            .is_ok());

        let err = catalog.validate_all(&[]).unwrap_err();
        assert!(err.to_string().contains("at least one"));

        let err = catalog
            .validate_all(&["21jours".into(), "21jours".into()])
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
