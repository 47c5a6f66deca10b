use crate::events::{BootstrapEvent, ProgressEvent, TransferMetrics};
use crate::ui::icons::{CHECK, CROSS, LOCK, ROCKET, STOP, WARN};
use console::style;
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal rendering of [`BootstrapEvent`]s via `indicatif`.
///
/// Two bars are stacked vertically:
/// - Startup bar, the aggregate 0–100 progress with the current stage message
/// - Transfer line, byte counts and speed while images are pulled
pub struct BootstrapUI {
    multi: MultiProgress,
    startup_bar: ProgressBar,
    transfer_bar: ProgressBar,
    verbose: bool,
}

impl BootstrapUI {
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let startup_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let startup_bar = multi.add(ProgressBar::new(100));
        startup_bar.set_style(startup_style);
        startup_bar.set_prefix("Startup");
        startup_bar.enable_steady_tick(Duration::from_millis(120));

        let transfer_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} {msg}")
            .expect("progress bar template is a valid static string");
        let transfer_bar = multi.add(ProgressBar::new(0));
        transfer_bar.set_style(transfer_style);
        transfer_bar.set_prefix("   Pull");

        Self {
            multi,
            startup_bar,
            transfer_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    pub fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Hide the bars while `f` runs, e.g. around an interactive prompt.
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.multi.suspend(f)
    }

    pub fn handle(&self, event: &BootstrapEvent) {
        match event {
            BootstrapEvent::Progress(p) => self.show_progress(p),
            BootstrapEvent::Warning { message, .. } => {
                self.print_line(format!("{}{}", WARN, style(message).yellow()));
            }
            BootstrapEvent::SecretRequested { attempt, max_attempts } => {
                self.startup_bar.set_message(format!(
                    "{}waiting for administrator password ({}/{})",
                    LOCK, attempt, max_attempts
                ));
            }
            BootstrapEvent::Fatal {
                message,
                detail,
                cancelled,
            } => self.show_fatal(message, detail.as_deref(), *cancelled),
            BootstrapEvent::Ready { url } => {
                self.clear_transfer();
                self.startup_bar.set_position(100);
                self.startup_bar.finish_with_message(format!("{}ready", CHECK));
                self.print_line(format!("{}Open {}", ROCKET, style(url).cyan().underlined()));
            }
            BootstrapEvent::ShutdownStarted => {
                self.clear_transfer();
                self.startup_bar.set_message(format!("{}shutting down", STOP));
            }
            BootstrapEvent::ShutdownFinished { outcome } => {
                self.startup_bar.finish_and_clear();
                self.print_line(format!("{}Shutdown complete: {}", STOP, outcome));
            }
        }
    }

    fn show_progress(&self, p: &ProgressEvent) {
        self.startup_bar
            .set_position(p.aggregate_progress.round().clamp(0.0, 100.0) as u64);
        self.startup_bar
            .set_message(format!("{} {}", style(p.stage.label()).yellow(), p.message));
        match p.metrics {
            Some(ref metrics) => self.transfer_bar.set_message(format_transfer(metrics)),
            None => self.clear_transfer(),
        }
        if self.verbose {
            self.print_line(format!("    {} {}", style("→").dim(), style(&p.message).dim()));
        }
    }

    fn show_fatal(&self, message: &str, detail: Option<&str>, cancelled: bool) {
        self.clear_transfer();
        if cancelled {
            self.startup_bar.abandon_with_message(format!("{}cancelled", STOP));
        } else {
            self.startup_bar
                .abandon_with_message(format!("{}{}", CROSS, style("startup failed").red()));
        }
        self.print_line(format!("{}{}", CROSS, style(message).red().bold()));
        if let Some(detail) = detail {
            for line in detail.lines() {
                self.print_line(format!("    {}", style(line).dim()));
            }
        }
    }

    fn clear_transfer(&self) {
        self.transfer_bar.set_message("");
    }

    pub fn finish(&self) {
        self.startup_bar.finish_and_clear();
        self.transfer_bar.finish_and_clear();
    }
}

/// `12.00 MiB / 48.00 MiB (1.50 MiB/s)`; the total is omitted until known.
pub fn format_transfer(metrics: &TransferMetrics) -> String {
    let speed = HumanBytes(metrics.bytes_per_sec.max(0.0) as u64);
    if metrics.total == 0 {
        format!("{} ({}/s)", HumanBytes(metrics.downloaded), speed)
    } else {
        format!(
            "{} / {} ({}/s)",
            HumanBytes(metrics.downloaded),
            HumanBytes(metrics.total),
            speed
        )
    }
}
