//! Configuration view and validation commands: `un1ca-desk config`.

use anyhow::Result;
use un1ca_desk::config::DeskConfig;

use super::super::ConfigCommands;
use super::DeskContext;

pub fn cmd_config(ctx: &DeskContext, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = &ctx.config_file;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("UN1CA Desk Configuration");
            println!("========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No desk.toml found at {}; using defaults.", config_path.display());
            }
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!();
            print!("{}", toml::to_string_pretty(&ctx.config)?);
            println!();

            println!("Directories:");
            println!("  app       = {}", ctx.paths.app_dir.display());
            println!("  resources = {}", ctx.paths.resources_dir.display());
            println!("  seed      = {}", ctx.paths.seed_dir.display());
            println!("  runtime   = {}", ctx.paths.runtime_dir.display());
            println!("  logs      = {}", ctx.paths.log_dir.display());
            println!();

            for warning in &ctx.warnings {
                println!("Warning: {}", warning);
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let mut warnings = ctx.warnings.clone();
            if config_path.exists() {
                // Re-read so that parse errors in the file itself surface here.
                DeskConfig::load(config_path)?;
            } else {
                println!("No desk.toml found. Using defaults.");
            }
            warnings.extend(ctx.config.validate());

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("desk.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if let Some(parent) = config_path.parent()
                && !parent.exists()
            {
                std::fs::create_dir_all(parent)?;
            }

            DeskConfig::default().save(config_path)?;

            println!("Created desk.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [engine] binary, docker_host, require_rootful");
            println!("  - [images] strict, skip_pull, pull_tag");
            println!("  - [timeouts] per-stage budgets in seconds");
            println!();
        }
    }

    Ok(())
}
