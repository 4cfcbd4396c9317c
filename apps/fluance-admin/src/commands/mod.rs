pub mod audit;
pub mod config;
pub mod diagnose;
pub mod entitlement;
pub mod token;

pub use audit::{cmd_audit_count, cmd_audit_get, cmd_audit_list};
pub use config::{cmd_config_init, cmd_config_show};
pub use diagnose::{cmd_diagnose_activation, cmd_diagnose_legacy, cmd_diagnose_orphans};
pub use entitlement::{cmd_entitlements, cmd_grant, cmd_repair, cmd_revoke, cmd_set_start_date};
pub use token::{
    cmd_token_invalidate, cmd_token_issue, cmd_token_issue_batch, cmd_token_list,
    cmd_token_mark_used, cmd_token_mark_used_for_email, cmd_token_redeem, cmd_token_show,
};
