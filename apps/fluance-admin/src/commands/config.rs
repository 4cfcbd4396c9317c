//! Config commands: show, init. These run without opening the database.

use std::path::{Path, PathBuf};

use fluance_config::AdminConfig;
use serde_json::json;

use crate::context::print_json;

pub fn cmd_config_show(
    explicit: Option<&Path>,
    json_output: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (config, source) = AdminConfig::resolve(explicit)?;
    if json_output {
        print_json(&json!({ "source": source, "config": config }))?;
        return Ok(());
    }

    match &source {
        Some(path) => println!("Source:        {}", path.display()),
        None => println!("Source:        (defaults, no config file found)"),
    }
    println!(
        "Database:      {}",
        config.database_url.as_deref().unwrap_or("~/.fluance/ledger.db")
    );
    println!("Registration:  {}", config.registration_url);
    println!("Validity days: {}", config.default_validity_days);
    println!("Products:      {}", config.products.join(", "));
    println!("Actor:         {}", config.actor.as_deref().unwrap_or("-"));
    Ok(())
}

/// Where `config init` writes: `--path`, then `--config`, then the home default.
fn init_target(path: Option<&Path>, explicit: Option<&Path>) -> Option<PathBuf> {
    path.or(explicit)
        .map(Path::to_path_buf)
        .or_else(AdminConfig::default_path)
}

pub fn cmd_config_init(
    path: Option<&Path>,
    explicit: Option<&Path>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let target = init_target(path, explicit)
        .ok_or("could not determine home directory; pass --path")?;
    write_default(&target, force)?;
    println!("✓ Wrote default config to {}", target.display());
    Ok(())
}

fn write_default(target: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if target.exists() && !force {
        return Err(format!(
            "{} already exists; use --force to overwrite",
            target.display()
        )
        .into());
    }
    AdminConfig::default().save_to(target)?;
    Ok(())
}
