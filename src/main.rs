use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "un1ca-desk")]
#[command(version, about = "Desktop launcher for the UN1CA Build stack")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Application directory holding desk.toml, resources and runtime files
    #[arg(long, global = true, env = "UN1CA_APP_DIR")]
    pub app_dir: Option<PathBuf>,

    /// Abort startup when an image cannot be refreshed
    #[arg(long, global = true)]
    pub strict_pull: bool,

    /// Never contact the registry; use seeded or local images only
    #[arg(long, global = true)]
    pub skip_pull: bool,

    /// Tag to pull instead of the configured one
    #[arg(long, global = true)]
    pub pull_tag: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the stack and keep it running until interrupted
    Up {
        /// Do not open the browser once the application is ready
        #[arg(long)]
        no_browser: bool,
    },
    /// Stop a stack left running by an earlier session
    Down,
    /// Seed and refresh the managed images without starting the stack
    Images {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the state of the stack's containers
    Status,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate desk.toml
    Validate,
    /// Create a default desk.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { command } = &cli.command {
        un1ca_desk::logging::init_stderr(cli.verbose);
        let ctx = cmd::load_context(&cli)?;
        return cmd::cmd_config(&ctx, command.clone());
    }

    let ctx = cmd::load_context(&cli)?;
    let _log_guard = un1ca_desk::logging::init(&ctx.paths.log_dir, cli.verbose)?;
    for warning in &ctx.warnings {
        tracing::warn!("{}", warning);
    }

    match &cli.command {
        Commands::Up { no_browser } => cmd::cmd_up(ctx, cli.verbose, !*no_browser).await?,
        Commands::Down => cmd::cmd_down(&ctx).await?,
        Commands::Images { json } => cmd::cmd_images(&ctx, *json).await?,
        Commands::Status => cmd::cmd_status(&ctx).await?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
