//! `un1ca-desk images`: run the seed and refresh passes on their own.

use anyhow::Result;
use console::style;
use un1ca_desk::bootstrap::pull_backend;
use un1ca_desk::events::{StageReporter, StartupStage};
use un1ca_desk::images::{ImageManifest, ImageSynchronizer};
use un1ca_desk::ui::icons::{CHECK, PACKAGE, WARN};

use super::{DeskContext, negotiate};

pub async fn cmd_images(ctx: &DeskContext, json: bool) -> Result<()> {
    let (mut negotiator, engine) = negotiate(ctx).await?;
    let seed_dir = &ctx.paths.seed_dir;
    let specs = ImageManifest::load_from_seed_dir(seed_dir)?.specs(seed_dir);

    let sync = ImageSynchronizer::new(engine.clone(), pull_backend(&ctx.config, &engine), ctx.config.sync_settings());
    let result = sync
        .synchronize(
            &specs,
            &StageReporter::detached(StartupStage::Seed),
            &StageReporter::detached(StartupStage::Pull),
        )
        .await;
    negotiator.release().await;
    let report = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    if report.images.is_empty() {
        println!("No managed images in {}", seed_dir.display());
    }
    for image in &report.images {
        let icon = if image.warning.is_some() { &WARN } else { &CHECK };
        println!("{}{}{}  {}", icon, PACKAGE, style(&image.local_reference).bold(), image.decision);
        if let Some(from) = &image.pulled_from {
            println!("      from {}", from);
        }
        if let Some(warning) = &image.warning {
            println!("      {}", style(warning).yellow());
        }
    }
    println!();
    Ok(())
}
