use std::sync::Arc;

use chrono::{DateTime, Utc};
use fluance_config::AdminConfig;
use fluance_ledger::{days_before, Auditor, Ledger, LedgerError, ProductCatalog, DEFAULT_ACTOR};
use fluance_store_sqlite::SqliteStore;
use tracing::{debug, info};

use crate::cli::Cli;

/// Everything a command needs, built once per invocation.
pub struct Context {
    pub config: AdminConfig,
    pub store: Arc<SqliteStore>,
    pub ledger: Ledger<SqliteStore>,
    pub json: bool,
}

impl Context {
    pub async fn open(cli: &Cli) -> Result<Self, Box<dyn std::error::Error>> {
        let (config, source) = AdminConfig::resolve(cli.config.as_deref())?;
        match &source {
            Some(path) => info!(path = %path.display(), "loaded config"),
            None => debug!("no config file found, using defaults"),
        }

        let database_url = cli
            .database_url
            .clone()
            .or_else(|| config.database_url.clone());
        let store = Arc::new(match &database_url {
            Some(url) => SqliteStore::open(url).await?,
            None => SqliteStore::open_default().await?,
        });

        let actor = cli
            .actor
            .clone()
            .or_else(|| config.actor.clone())
            .unwrap_or_else(|| DEFAULT_ACTOR.to_string());
        let auditor = Auditor::new(store.clone(), actor);
        let ledger = Ledger::new(
            store.clone(),
            ProductCatalog::new(config.products.iter().cloned()),
            auditor,
            config.default_validity_days,
        );

        Ok(Self {
            config,
            store,
            ledger,
            json: cli.json,
        })
    }
}

/// Pretty-print a value as JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Start of a `--since-days N` window ending now.
pub fn since(days: i64) -> Result<DateTime<Utc>, LedgerError> {
    if days < 0 {
        return Err(LedgerError::Validation(format!(
            "--since-days must not be negative, got {}",
            days
        )));
    }
    days_before(Utc::now(), days)
}
