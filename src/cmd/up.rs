//! `un1ca-desk up`: start the stack, show progress, stay up until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use un1ca_desk::access::{Secret, SecretResponse};
use un1ca_desk::bootstrap::BootstrapOrchestrator;
use un1ca_desk::events::BootstrapEvent;
use un1ca_desk::process::SystemRunner;
use un1ca_desk::ui::BootstrapUI;

use super::{DeskContext, read_password};

enum Ending {
    Interrupted,
    Failed(anyhow::Error),
}

pub async fn cmd_up(ctx: DeskContext, verbose: bool, open_browser: bool) -> Result<()> {
    let open_browser = open_browser && ctx.config.ui.open_browser;
    let (orchestrator, mut requests) =
        BootstrapOrchestrator::with_secret_channel(ctx.config, ctx.paths, Arc::new(SystemRunner::new()))?;
    let ui = Arc::new(BootstrapUI::new(verbose));

    let render = {
        let ui = ui.clone();
        let mut events = orchestrator.events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        ui.handle(&event);
                        match event {
                            BootstrapEvent::Ready { url } if open_browser => {
                                if let Err(e) = open::that(&url) {
                                    tracing::warn!(url = %url, error = %e, "failed to open browser");
                                }
                            }
                            BootstrapEvent::ShutdownFinished { .. } => break,
                            _ => {}
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "UI fell behind on events"),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let prompts = {
        let ui = ui.clone();
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let ui = ui.clone();
                let (attempt, max) = (request.attempt, request.max_attempts);
                let answer = tokio::task::spawn_blocking(move || ui.suspend(|| read_password(attempt, max))).await;
                request.respond(match answer {
                    Ok(Some(password)) => SecretResponse::Provided(Secret::new(password)),
                    _ => SecretResponse::Cancelled,
                });
            }
        })
    };

    let ending = run_until_interrupted(&orchestrator, &ui).await;

    let outcome = orchestrator.shutdown().await;
    prompts.abort();
    if tokio::time::timeout(Duration::from_secs(1), render).await.is_err() {
        tracing::debug!("event renderer did not finish");
    }
    ui.finish();
    tracing::info!(outcome = %outcome, "stack stopped");

    match ending {
        Ending::Interrupted => Ok(()),
        Ending::Failed(e) => Err(e),
    }
}

/// Start, offer a retry after each failure, and once ready wait for Ctrl-C.
async fn run_until_interrupted(orchestrator: &BootstrapOrchestrator, ui: &Arc<BootstrapUI>) -> Ending {
    let mut attempt = match orchestrator.start().context("a startup attempt is already running") {
        Ok(handle) => handle,
        Err(e) => return Ending::Failed(e),
    };

    loop {
        let joined = tokio::select! {
            joined = &mut attempt => joined,
            _ = tokio::signal::ctrl_c() => return Ending::Interrupted,
        };

        let error = match joined {
            Ok(Ok(report)) => {
                tracing::info!(
                    url = %report.url,
                    mode = %report.access_mode,
                    elapsed_secs = report.elapsed.as_secs(),
                    "stack ready; press Ctrl-C to stop"
                );
                ui.print_line("Press Ctrl-C to stop the application.");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "failed to wait for Ctrl-C");
                }
                return Ending::Interrupted;
            }
            Ok(Err(e)) if e.is_cancelled() => return Ending::Failed(e.into()),
            Ok(Err(e)) => e,
            Err(e) => return Ending::Failed(e.into()),
        };

        let ui_for_prompt = ui.clone();
        let confirm = tokio::task::spawn_blocking(move || {
            ui_for_prompt.suspend(|| {
                dialoguer::Confirm::new()
                    .with_prompt("Startup failed. Try again?")
                    .default(true)
                    .interact()
                    .unwrap_or(false)
            })
        });
        let retry = tokio::select! {
            answer = confirm => answer.unwrap_or(false),
            _ = tokio::signal::ctrl_c() => return Ending::Interrupted,
        };
        if !retry {
            return Ending::Failed(error.into());
        }

        attempt = match orchestrator.retry() {
            Some(handle) => handle,
            None => return Ending::Failed(anyhow::anyhow!("{}", error)),
        };
    }
}
