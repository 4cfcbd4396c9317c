//! Audit log commands: list, get, count

use fluance_audit::{AuditAction, AuditEvent, AuditLog, AuditLogFilter, AuditLogId, AuditResult};
use fluance_storage::UserId;

use crate::context::{print_json, since, Context};

fn build_filter(
    user_id: Option<&str>,
    action: Option<&str>,
    result: Option<&str>,
) -> Result<AuditLogFilter, Box<dyn std::error::Error>> {
    let mut filter = AuditLogFilter::new();
    if let Some(user_id) = user_id {
        filter = filter.user_id(UserId::from(user_id));
    }
    if let Some(action) = action {
        filter = filter.action(action.parse::<AuditAction>()?);
    }
    if let Some(result) = result {
        filter = filter.result(result.parse::<AuditResult>()?);
    }
    Ok(filter)
}

fn print_entry(entry: &AuditEvent) {
    println!("ID:        {}", entry.id);
    println!("Timestamp: {}", entry.timestamp);
    println!("Actor:     {}", entry.actor);
    println!("Action:    {}", entry.action);
    println!("Resource:  {} ({})", entry.resource_type, entry.resource_id);
    if let Some(user_id) = &entry.user_id {
        println!("User:      {}", user_id);
    }
    println!("Result:    {}", entry.result);
    if let Some(reason) = &entry.reason {
        println!("Reason:    {}", reason);
    }
    if let Some(details) = &entry.details {
        println!("Details:   {}", details);
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn cmd_audit_list(
    ctx: &Context,
    user_id: Option<&str>,
    resource: Option<&str>,
    action: Option<&str>,
    result: Option<&str>,
    since_days: Option<i64>,
    limit: u32,
    offset: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut filter = build_filter(user_id, action, result)?.limit(limit);
    if let Some(resource) = resource {
        filter = filter.resource_id(resource);
    }
    if let Some(days) = since_days {
        filter = filter.from(since(days)?);
    }
    if let Some(offset) = offset {
        filter = filter.offset(offset);
    }

    let total = ctx.store.count(filter.clone()).await?;
    let entries = ctx.store.query(filter).await?;
    if ctx.json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        println!("No audit log entries found.");
    } else {
        println!("Audit logs ({} of {} total):\n", entries.len(), total);
        for entry in &entries {
            print_entry(entry);
            println!();
        }
    }
    Ok(())
}

pub async fn cmd_audit_get(ctx: &Context, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let id: AuditLogId = id.parse()?;
    let entry = ctx.store.get(id).await?;
    if ctx.json {
        return print_json(&entry);
    }
    print_entry(&entry);
    Ok(())
}

pub async fn cmd_audit_count(
    ctx: &Context,
    user_id: Option<&str>,
    action: Option<&str>,
    result: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let count = ctx
        .store
        .count(build_filter(user_id, action, result)?)
        .await?;
    println!("{}", count);
    Ok(())
}
