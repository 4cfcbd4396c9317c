//! Read-only diagnostics

use fluance_ledger::token_prefix;
use fluance_storage::UserId;

use crate::context::{print_json, since, Context};

pub async fn cmd_diagnose_orphans(ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let orphans = ctx.ledger.diagnostics.find_orphaned_used_tokens().await?;
    if ctx.json {
        return print_json(&orphans);
    }
    if orphans.is_empty() {
        println!("✓ No orphaned tokens.");
        return Ok(());
    }
    println!("Used tokens without an entitlement record ({}):\n", orphans.len());
    for o in &orphans {
        println!("Token:    {}", o.token);
        println!("Email:    {}", o.email);
        println!("User:     {}", o.user_id);
        println!("Products: {}", o.grants);
        if let Some(used_at) = o.used_at {
            println!("Used:     {}", used_at);
        }
        println!();
    }
    println!("Fix with: fluance-admin repair <user_id> <email> <products...>");
    Ok(())
}

pub async fn cmd_diagnose_legacy(
    ctx: &Context,
    user_id: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mismatches = match user_id {
        Some(id) => ctx
            .ledger
            .diagnostics
            .find_mismatched_legacy_product(&UserId::from(id))
            .await?
            .into_iter()
            .collect(),
        None => ctx.ledger.diagnostics.scan_legacy_mismatches().await?,
    };
    if ctx.json {
        return print_json(&mismatches);
    }
    if mismatches.is_empty() {
        println!("✓ Legacy product fields are consistent.");
        return Ok(());
    }
    for m in &mismatches {
        println!(
            "{} ({}): legacy={} latest={}",
            m.user_id,
            m.email,
            m.legacy_product.as_deref().unwrap_or("-"),
            m.latest_product.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

pub async fn cmd_diagnose_activation(
    ctx: &Context,
    since_days: Option<i64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let window_start = since_days.map(since).transpose()?;
    let report = ctx.ledger.diagnostics.activation_report(window_start).await?;
    if ctx.json {
        return print_json(&report);
    }

    match since_days {
        Some(d) => println!("Token activation, last {} days:\n", d),
        None => println!("Token activation, all time:\n"),
    }
    println!("Issued:   {}", report.issued);
    println!("Used:     {}", report.used);
    println!("Expired:  {}", report.expired);
    println!("Rate:     {:.1}%", report.activation_rate * 100.0);
    println!("Pending:  {}", report.pending.len());
    for t in &report.pending {
        println!(
            "  {}  {}  {}  expires {}",
            token_prefix(&t.token),
            t.email,
            t.grants,
            t.expires_at.format("%Y-%m-%d")
        );
    }
    Ok(())
}
