use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "FLUANCE_CONFIG";

pub const DEFAULT_REGISTRATION_URL: &str = "https://fluance.io/creer-compte";
pub const DEFAULT_VALIDITY_DAYS: i64 = 30;
/// Upper bound for `default_validity_days` (about a century).
pub const MAX_VALIDITY_DAYS: i64 = 36_500;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Admin configuration, stored as JSON (e.g. ~/.fluance/config.json)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// sqlx URL of the ledger database; `None` means ~/.fluance/ledger.db
    pub database_url: Option<String>,
    /// Account-creation page a token link points at
    pub registration_url: String,
    pub default_validity_days: i64,
    /// Known product identifiers
    pub products: Vec<String>,
    /// Name recorded as the actor of audit events
    pub actor: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            registration_url: DEFAULT_REGISTRATION_URL.to_string(),
            default_validity_days: DEFAULT_VALIDITY_DAYS,
            products: ["21jours", "sos-dos-cervicales", "complet", "rdv-clarte"]
                .into_iter()
                .map(String::from)
                .collect(),
            actor: None,
        }
    }
}

impl AdminConfig {
    /// Load from the first existing candidate path, or fall back to defaults.
    ///
    /// Candidates, in order: `explicit`, `$FLUANCE_CONFIG`, `./fluance.json`,
    /// `~/.fluance/config.json`. An explicit path that does not exist is an
    /// error rather than a silent fallback.
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::load_from(path)?, Some(path.to_path_buf())));
        }
        let env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::resolve_from(Self::candidate_paths(env))
    }

    /// First existing path among `candidates` wins.
    pub fn resolve_from(
        candidates: Vec<PathBuf>,
    ) -> Result<(Self, Option<PathBuf>), ConfigError> {
        match candidates.into_iter().find(|p| p.is_file()) {
            Some(path) => Ok((Self::load_from(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    pub fn candidate_paths(env: Option<PathBuf>) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        paths.extend(env);
        paths.push(PathBuf::from("fluance.json"));
        paths.extend(Self::default_path());
        paths
    }

    /// Load config from a path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Read(e)
            }
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a path
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&self)?)?;
        Ok(())
    }

    /// Default config path (~/.fluance/config.json)
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".fluance").join("config.json"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_validity_days <= 0 {
            return Err(ConfigError::Invalid(format!(
                "default_validity_days must be positive, got {}",
                self.default_validity_days
            )));
        }
        if self.default_validity_days > MAX_VALIDITY_DAYS {
            return Err(ConfigError::Invalid(format!(
                "default_validity_days must be at most {}, got {}",
                MAX_VALIDITY_DAYS, self.default_validity_days
            )));
        }
        if self.products.is_empty() {
            return Err(ConfigError::Invalid("product catalog is empty".into()));
        }
        if self.registration_url.trim().is_empty() {
            return Err(ConfigError::Invalid("registration_url is empty".into()));
        }
        Ok(())
    }

    /// Link a customer follows to create their account with `token`.
    pub fn registration_link(&self, token: &str) -> String {
        let sep = if self.registration_url.contains('?') {
            '&'
        } else {
            '?'
        };
        format!("{}{}token={}", self.registration_url, sep, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = AdminConfig::default();
        assert_eq!(config.registration_url, "https://fluance.io/creer-compte");
        assert_eq!(config.default_validity_days, 30);
        assert_eq!(
            config.products,
            vec!["21jours", "sos-dos-cervicales", "complet", "rdv-clarte"]
        );
        assert!(config.database_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, r#"{{ "database_url": "sqlite://ledger.db", "actor": "ops" }}"#).unwrap();

        let loaded = AdminConfig::load_from(temp_file.path()).unwrap();
        assert_eq!(loaded.database_url.as_deref(), Some("sqlite://ledger.db"));
        assert_eq!(loaded.actor.as_deref(), Some("ops"));
        assert_eq!(loaded.default_validity_days, 30);
        assert_eq!(loaded.products.len(), 4);
    }

    #[test]
    fn test_load_from_nonexistent_file() {
        let result = AdminConfig::load_from("/nonexistent/path/fluance.json");
        assert!(matches!(result, Err(ConfigError::NotFound(p)) if p.ends_with("fluance.json")));
    }

    #[test]
    fn test_load_from_invalid_json() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{{ invalid json }}").unwrap();

        let result = AdminConfig::load_from(temp_file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_rejects_non_positive_validity() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, r#"{{ "default_validity_days": 0 }}"#).unwrap();

        let result = AdminConfig::load_from(temp_file.path());
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("positive")));
    }

    #[test]
    fn test_load_rejects_validity_beyond_cap() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, r#"{{ "default_validity_days": 100000000 }}"#).unwrap();

        let result = AdminConfig::load_from(temp_file.path());
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("at most")));

        let at_cap = AdminConfig {
            default_validity_days: MAX_VALIDITY_DAYS,
            ..AdminConfig::default()
        };
        assert!(at_cap.validate().is_ok());
    }

    #[test]
    fn test_save_to_creates_parent_dirs() {
        let config = AdminConfig {
            actor: Some("support".into()),
            ..AdminConfig::default()
        };

        let temp_dir = tempfile::tempdir().unwrap();
        let nested_path = temp_dir.path().join("nested").join("config.json");
        config.save_to(&nested_path).unwrap();

        let loaded = AdminConfig::load_from(&nested_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_resolve_from_takes_first_existing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("missing.json");
        let first = temp_dir.path().join("first.json");
        let second = temp_dir.path().join("second.json");

        AdminConfig {
            actor: Some("first".into()),
            ..AdminConfig::default()
        }
        .save_to(&first)
        .unwrap();
        AdminConfig {
            actor: Some("second".into()),
            ..AdminConfig::default()
        }
        .save_to(&second)
        .unwrap();

        let (config, path) =
            AdminConfig::resolve_from(vec![missing, first.clone(), second]).unwrap();
        assert_eq!(config.actor.as_deref(), Some("first"));
        assert_eq!(path, Some(first));
    }

    #[test]
    fn test_resolve_from_none_existing_gives_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (config, path) =
            AdminConfig::resolve_from(vec![temp_dir.path().join("nope.json")]).unwrap();
        assert_eq!(config, AdminConfig::default());
        assert!(path.is_none());
    }

    #[test]
    fn test_resolve_explicit_missing_is_error() {
        let result = AdminConfig::resolve(Some(Path::new("/nonexistent/fluance.json")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_candidate_paths_order() {
        let paths = AdminConfig::candidate_paths(Some(PathBuf::from("/etc/fluance.json")));
        assert_eq!(paths[0], PathBuf::from("/etc/fluance.json"));
        assert_eq!(paths[1], PathBuf::from("fluance.json"));

        let without_env = AdminConfig::candidate_paths(None);
        assert_eq!(without_env[0], PathBuf::from("fluance.json"));
    }

    #[test]
    fn test_registration_link() {
        let config = AdminConfig::default();
        assert_eq!(
            config.registration_link("abc123"),
            "https://fluance.io/creer-compte?token=abc123"
        );

        let config = AdminConfig {
            registration_url: "https://example.com/join?lang=fr".into(),
            ..AdminConfig::default()
        };
        assert_eq!(
            config.registration_link("abc123"),
            "https://example.com/join?lang=fr&token=abc123"
        );
    }

    #[test]
    fn test_default_path_returns_path() {
        if let Some(path) = AdminConfig::default_path() {
            assert!(path.ends_with("config.json"));
            assert!(path.to_string_lossy().contains(".fluance"));
        }
    }
}
