//! Entitlement commands: grant, revoke, show, start dates, repair

use chrono::{DateTime, Utc};
use fluance_ledger::GrantOutcome;
use fluance_storage::{ProductGrant, UserId};
use serde_json::json;

use crate::context::{print_json, Context};

pub fn print_products(products: &[ProductGrant]) {
    if products.is_empty() {
        println!("No products.");
        return;
    }
    for p in products {
        println!(
            "  {:<20} started {}  purchased {}",
            p.name,
            p.start_date.format("%Y-%m-%d %H:%M"),
            p.purchased_at.format("%Y-%m-%d")
        );
    }
}

pub async fn cmd_grant(
    ctx: &Context,
    user_id: &str,
    product: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let user_id = UserId::from(user_id);
    let outcome = ctx
        .ledger
        .entitlements
        .grant_product(&user_id, product)
        .await?;

    if ctx.json {
        return print_json(&json!({
            "granted": outcome.was_granted(),
            "products": outcome.products(),
        }));
    }
    match &outcome {
        GrantOutcome::Granted(_) => println!("✓ Granted {} to {}\n", product, user_id),
        GrantOutcome::AlreadyGranted(_) => {
            println!("{} already has {} (nothing changed)\n", user_id, product)
        }
    }
    print_products(outcome.products());
    Ok(())
}

pub async fn cmd_revoke(
    ctx: &Context,
    user_id: &str,
    product: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let user_id = UserId::from(user_id);
    let remaining = ctx
        .ledger
        .entitlements
        .revoke_product(&user_id, product)
        .await?;
    if ctx.json {
        return print_json(&remaining);
    }
    println!("✓ Revoked {} from {}\n", product, user_id);
    print_products(&remaining);
    Ok(())
}

pub async fn cmd_entitlements(
    ctx: &Context,
    user_id: Option<&str>,
    email: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let user_id = match (user_id, email) {
        (Some(id), _) => UserId::from(id),
        (None, Some(email)) => match ctx.ledger.entitlements.find_by_email(email).await? {
            Some(record) => record.user_id,
            None => return Err(format!("no entitlement record for {}", email).into()),
        },
        (None, None) => return Err("a user ID or --email is required".into()),
    };

    let record = ctx.ledger.entitlements.get_record(&user_id).await?;
    let products = record.effective_products();
    if ctx.json {
        return print_json(&json!({
            "user_id": record.user_id,
            "email": record.email,
            "products": products,
            "legacy_product": record.legacy_product,
            "needs_migration": record.needs_migration(),
        }));
    }

    println!("User:    {}", record.user_id);
    println!("Email:   {}", record.email);
    if let Some(legacy) = &record.legacy_product {
        println!("Legacy:  {}", legacy);
    }
    if record.needs_migration() {
        println!("(legacy record, product list not yet materialized)");
    }
    println!();
    print_products(&products);
    Ok(())
}

pub async fn cmd_set_start_date(
    ctx: &Context,
    user_id: &str,
    product: &str,
    date: Option<DateTime<Utc>>,
    days_back: Option<i64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let user_id = UserId::from(user_id);
    let products = match (date, days_back) {
        (Some(date), _) => {
            ctx.ledger
                .entitlements
                .update_product_start_date(&user_id, product, date)
                .await?
        }
        (None, Some(days)) => {
            ctx.ledger
                .entitlements
                .unlock_product(&user_id, product, days)
                .await?
        }
        (None, None) => return Err("either --date or --days-back is required".into()),
    };

    if ctx.json {
        return print_json(&products);
    }
    println!("✓ Start date of {} updated for {}\n", product, user_id);
    print_products(&products);
    Ok(())
}

pub async fn cmd_repair(
    ctx: &Context,
    user_id: &str,
    email: &str,
    products: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let record = ctx
        .ledger
        .entitlements
        .repair_record(&UserId::from(user_id), email, products)
        .await?;
    if ctx.json {
        return print_json(&record);
    }
    println!("✓ Entitlement record created for {} ({})\n", record.user_id, record.email);
    print_products(&record.products);
    Ok(())
}
