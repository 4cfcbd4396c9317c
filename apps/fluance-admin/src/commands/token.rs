//! Token commands: issue, issue-batch, redeem, show, list, invalidate, mark-used

use std::path::Path;

use fluance_ledger::{IssueRequest, TokenInspection};
use fluance_storage::{TokenFilter, UserId};
use serde_json::json;

use super::entitlement::print_products;
use crate::context::{print_json, since, Context};

fn inspection_json(i: &TokenInspection) -> serde_json::Value {
    json!({ "state": i.state, "token": i.token })
}

fn print_token(i: &TokenInspection) {
    let t = &i.token;
    println!("Token:    {}", t.token);
    println!("Email:    {}", t.email);
    println!("Products: {}", t.grants);
    println!("State:    {}", i.state);
    println!("Created:  {}", t.created_at);
    println!("Expires:  {}", t.expires_at);
    if let Some(used_at) = t.used_at {
        println!("Used:     {}", used_at);
    }
    if let Some(user_id) = &t.user_id {
        println!("User:     {}", user_id);
    }
    if let Some(invalidated_at) = t.invalidated_at {
        println!("Closed:   {} (not redeemed)", invalidated_at);
    }
    if let Some(note) = &t.note {
        println!("Note:     {}", note);
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn cmd_token_issue(
    ctx: &Context,
    email: &str,
    products: Vec<String>,
    days: Option<i64>,
    note: Option<String>,
    supersede: bool,
    plain: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut request = IssueRequest::new(email, products);
    if let Some(days) = days {
        request = request.validity_days(days);
    }
    if let Some(note) = note {
        request = request.note(note);
    }
    let token = ctx.ledger.tokens.issue(request).await?;

    let superseded = if supersede {
        ctx.ledger
            .tokens
            .supersede_pending(&token.email, &token.token)
            .await?
    } else {
        0
    };

    let link = ctx.config.registration_link(&token.token);
    if plain {
        println!("{}", link);
    } else if ctx.json {
        print_json(&json!({ "token": token, "link": link, "superseded": superseded }))?;
    } else {
        println!("✓ Registration token issued!\n");
        println!("Token:    {}", token.token);
        println!("Email:    {}", token.email);
        println!("Products: {}", token.grants);
        println!("Expires:  {}", token.expires_at);
        println!("Link:     {}", link);
        if superseded > 0 {
            println!("\nSuperseded {} older pending token(s)", superseded);
        }
    }
    Ok(())
}

/// Emails listed in a file, one per line. Blank lines and `#` comments are skipped.
fn read_email_file(path: &Path) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    Ok(parse_email_lines(&contents))
}

fn parse_email_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

pub async fn cmd_token_issue_batch(
    ctx: &Context,
    mut emails: Vec<String>,
    file: Option<&Path>,
    products: Vec<String>,
    days: Option<i64>,
    note: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(file) = file {
        emails.extend(read_email_file(file)?);
    }
    if emails.is_empty() {
        return Err("no emails given: pass them as arguments or with --file".into());
    }

    let results = ctx
        .ledger
        .tokens
        .issue_many(&emails, &products, days, note.as_deref())
        .await?;
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();

    if ctx.json {
        let items: Vec<_> = results
            .iter()
            .map(|(email, result)| match result {
                Ok(token) => json!({
                    "email": email,
                    "token": token,
                    "link": ctx.config.registration_link(&token.token),
                }),
                Err(e) => json!({ "email": email, "error": e.to_string() }),
            })
            .collect();
        print_json(&items)?;
    } else {
        for (email, result) in &results {
            match result {
                Ok(token) => println!(
                    "✓ {} -> {}",
                    token.email,
                    ctx.config.registration_link(&token.token)
                ),
                Err(e) => println!("✗ {}: {}", email, e),
            }
        }
        println!(
            "\n{} issued, {} failed ({})",
            results.len() - failed,
            failed,
            products.join(", ")
        );
    }

    if failed > 0 {
        return Err(format!("{} of {} emails failed", failed, results.len()).into());
    }
    Ok(())
}

pub async fn cmd_token_redeem(
    ctx: &Context,
    token: &str,
    user_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let user_id = UserId::from(user_id);
    let grants = ctx.ledger.tokens.redeem(token, &user_id).await?;

    if ctx.json {
        print_json(&json!({ "user_id": user_id, "granted": grants }))?;
    } else {
        println!("✓ Token redeemed for user {}\n", user_id);
        print_products(&grants);
    }
    Ok(())
}

pub async fn cmd_token_show(ctx: &Context, token: &str) -> Result<(), Box<dyn std::error::Error>> {
    let inspection = ctx.ledger.tokens.inspect(token).await?;
    if ctx.json {
        print_json(&inspection_json(&inspection))?;
    } else {
        print_token(&inspection);
    }
    Ok(())
}

pub async fn cmd_token_list(
    ctx: &Context,
    email: Option<&str>,
    used: Option<bool>,
    since_days: Option<i64>,
    limit: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut filter = TokenFilter::new().limit(limit);
    if let Some(email) = email {
        filter = filter.email(email);
    }
    if let Some(used) = used {
        filter = filter.used(used);
    }
    if let Some(days) = since_days {
        filter = filter.created_since(since(days)?);
    }

    let tokens = ctx.ledger.tokens.list(filter).await?;
    if ctx.json {
        let items: Vec<_> = tokens.iter().map(inspection_json).collect();
        print_json(&items)?;
    } else if tokens.is_empty() {
        println!("No tokens found.");
    } else {
        println!("Tokens ({}):\n", tokens.len());
        for inspection in &tokens {
            print_token(inspection);
            println!();
        }
    }
    Ok(())
}

pub async fn cmd_token_invalidate(
    ctx: &Context,
    token: &str,
    reason: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let closed = ctx.ledger.tokens.invalidate(token, reason).await?;
    println!("✓ Token {} invalidated ({})", closed.token, closed.email);
    Ok(())
}

pub async fn cmd_token_mark_used(
    ctx: &Context,
    token: &str,
    note: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let closed = ctx.ledger.tokens.mark_used_manually(token, note).await?;
    println!("✓ Token {} marked used ({})", closed.token, closed.email);
    Ok(())
}

pub async fn cmd_token_mark_used_for_email(
    ctx: &Context,
    email: &str,
    note: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let closed = ctx.ledger.tokens.mark_used_for_email(email, note).await?;
    if closed == 0 {
        println!("No pending tokens for {}", email);
    } else {
        println!("✓ Marked {} pending token(s) used for {}", closed, email);
    }
    Ok(())
}
