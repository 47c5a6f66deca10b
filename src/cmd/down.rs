//! `un1ca-desk down`: tear down a stack left behind by an earlier session.

use anyhow::Result;
use un1ca_desk::stack::StackController;
use un1ca_desk::ui::icons::STOP;

use super::{DeskContext, expected_services, negotiate};

pub async fn cmd_down(ctx: &DeskContext) -> Result<()> {
    let (mut negotiator, engine) = negotiate(ctx).await?;
    let controller = StackController::new(
        ctx.config
            .stack_settings(&ctx.paths.runtime_dir, expected_services(ctx)),
    );
    controller.attach(engine);

    let outcome = controller.shutdown(ctx.config.hard_stop_timeout()).await;
    negotiator.release().await;

    println!("{}{}", STOP, outcome);
    Ok(())
}
