use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fluance-admin")]
#[command(about = "Fluance entitlement ledger administration")]
pub struct Cli {
    /// Config file (otherwise $FLUANCE_CONFIG, ./fluance.json, ~/.fluance/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database URL (sqlite://path/to/ledger.db); overrides the config file
    #[arg(long, global = true, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Name recorded in the audit trail; overrides the config file
    #[arg(long, global = true, env = "FLUANCE_ACTOR")]
    pub actor: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Registration token commands
    Token {
        #[command(subcommand)]
        token_cmd: TokenCommand,
    },
    /// Grant a product to a user
    Grant {
        /// User ID from the auth directory
        user_id: String,
        /// Product identifier
        product: String,
    },
    /// Remove a product from a user
    Revoke {
        user_id: String,
        product: String,
    },
    /// Show a user's products
    Entitlements {
        #[command(flatten)]
        target: UserTarget,
    },
    /// Change when a product's content starts unlocking
    SetStartDate {
        user_id: String,
        product: String,
        #[command(flatten)]
        when: StartDate,
    },
    /// Create a missing entitlement record for an existing account
    Repair {
        user_id: String,
        email: String,
        /// Products to grant
        #[arg(required = true)]
        products: Vec<String>,
    },
    /// Read-only consistency checks
    Diagnose {
        #[command(subcommand)]
        diagnose_cmd: DiagnoseCommand,
    },
    /// Audit log commands
    Audit {
        #[command(subcommand)]
        audit_cmd: AuditCommand,
    },
    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective config and where it was loaded from
    Show,
    /// Write a config file with default values
    Init {
        /// Target file (defaults to --config, then ~/.fluance/config.json)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum TokenCommand {
    /// Issue a registration token
    Issue {
        /// Recipient email
        email: String,
        /// Products the token grants, in order
        #[arg(required = true)]
        products: Vec<String>,
        /// Validity in days (defaults from config)
        #[arg(long)]
        days: Option<i64>,
        /// Free-text note stored with the token
        #[arg(long)]
        note: Option<String>,
        /// Invalidate other pending tokens for this email
        #[arg(long)]
        supersede: bool,
        /// Output only the registration link (for scripts)
        #[arg(long)]
        plain: bool,
    },
    /// Issue one token per email with the same products
    IssueBatch {
        /// Recipient emails
        emails: Vec<String>,
        /// Read more emails from a file, one per line (# starts a comment)
        #[arg(long)]
        file: Option<PathBuf>,
        /// Product the tokens grant; repeat for several, in order
        #[arg(long = "product", required = true)]
        products: Vec<String>,
        /// Validity in days (defaults from config)
        #[arg(long)]
        days: Option<i64>,
        /// Free-text note stored with every token
        #[arg(long)]
        note: Option<String>,
    },
    /// Redeem a token for a user (normally done at account creation)
    Redeem {
        token: String,
        user_id: String,
    },
    /// Show a token and its state
    Show { token: String },
    /// List tokens, newest first
    List {
        #[arg(long)]
        email: Option<String>,
        /// Only used tokens
        #[arg(long, conflicts_with = "unused")]
        used: bool,
        /// Only unused tokens
        #[arg(long)]
        unused: bool,
        /// Only tokens created in the last N days
        #[arg(long)]
        since_days: Option<i64>,
        #[arg(long, default_value = "50")]
        limit: u32,
    },
    /// Close a token without granting anything
    Invalidate {
        token: String,
        #[arg(long)]
        reason: String,
    },
    /// Mark a token used without granting anything
    MarkUsed {
        token: String,
        #[arg(long)]
        note: String,
    },
    /// Mark every pending token for an email used
    MarkUsedForEmail {
        email: String,
        #[arg(long)]
        note: String,
    },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct UserTarget {
    /// User ID
    pub user_id: Option<String>,
    /// Look the user up by email instead
    #[arg(long)]
    pub email: Option<String>,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct StartDate {
    /// New start date (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub date: Option<DateTime<Utc>>,
    /// Move the start date this many days into the past
    #[arg(long)]
    pub days_back: Option<i64>,
}

#[derive(Subcommand, Debug)]
pub enum DiagnoseCommand {
    /// Used tokens whose user has no entitlement record
    Orphans,
    /// Records whose legacy product field disagrees with their last product
    Legacy {
        /// Check one user instead of scanning all records
        #[arg(long)]
        user_id: Option<String>,
    },
    /// Token activation statistics
    Activation {
        /// Only tokens created in the last N days
        #[arg(long)]
        since_days: Option<i64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum AuditCommand {
    /// List audit log entries, newest first
    List {
        #[arg(long)]
        user_id: Option<String>,
        /// Filter by resource (token value or user ID)
        #[arg(long)]
        resource: Option<String>,
        /// Filter by action (e.g. token.redeem)
        #[arg(long)]
        action: Option<String>,
        /// Filter by result (e.g. success, rejected)
        #[arg(long)]
        result: Option<String>,
        /// Only entries from the last N days
        #[arg(long)]
        since_days: Option<i64>,
        #[arg(long, default_value = "50")]
        limit: u32,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Get a specific audit log entry
    Get {
        /// Audit entry ID
        id: String,
    },
    /// Count audit log entries
    Count {
        #[arg(long)]
        user_id: Option<String>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        result: Option<String>,
    },
}

/// Accepts RFC 3339 timestamps or plain dates (midnight UTC).
pub fn parse_date(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid date '{}': expected RFC 3339 or YYYY-MM-DD", s))
}
