//! `un1ca-desk status`: container states and the readiness estimate.

use anyhow::Result;
use console::style;
use un1ca_desk::stack::StackController;

use super::{DeskContext, expected_services, negotiate};

pub async fn cmd_status(ctx: &DeskContext) -> Result<()> {
    let (mut negotiator, engine) = negotiate(ctx).await?;
    let services = expected_services(ctx);
    let controller = StackController::new(ctx.config.stack_settings(&ctx.paths.runtime_dir, services.clone()));

    let (statuses, progress) = controller.status(&engine).await?;
    negotiator.release().await;

    println!();
    println!("Project: {}  (engine access: {})", style(&ctx.config.stack.project).bold(), engine.mode());
    println!();
    if statuses.is_empty() {
        println!("No containers.");
    }
    for status in &statuses {
        println!(
            "  {:<20} {:>4.0}%  {}",
            status.service_name,
            status.weight * 100.0,
            style(&status.raw_status_text).dim()
        );
    }
    for missing in services
        .iter()
        .filter(|name| !statuses.iter().any(|s| &s.service_name == *name))
    {
        println!("  {:<20} {:>4}   {}", missing, "-", style("not created").dim());
    }
    println!();
    println!("Overall readiness: {:.0}%", progress * 100.0);
    Ok(())
}
