mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use skills::config::SkillsConfig;

#[derive(Parser)]
#[command(
    name = "skills",
    version,
    about = "Keeps project skill files current while assistant sessions run"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Handle one host lifecycle event (JSON on stdin). Always exits 0
    Hook,
    /// Control the per-project overseer
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Show or change a project's trigger configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start an overseer if none is running
    Start {
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Start an overseer, or ask the running one for another pass
    Notify {
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Show lock holder, trigger configuration, counters and recent runs
    Status {
        #[arg(long)]
        project: Option<PathBuf>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Worker entry point (launched detached by the coordinator)
    #[command(hide = true)]
    Run {
        #[arg(long)]
        project: PathBuf,
        #[arg(long)]
        token: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective trigger configuration
    Show {
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Change the project's trigger configuration
    Set {
        #[arg(long)]
        project: Option<PathBuf>,
        #[command(flatten)]
        args: cli::configure::SetArgs,
    },
    /// Drop the project's configuration so the global defaults apply
    Reset {
        #[arg(long)]
        project: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Loads its own config and never returns an error to the host.
        Command::Hook => cli::hook::hook(),
        Command::Daemon { action } => daemon(SkillsConfig::load()?, action).await?,
        Command::Config { action } => {
            let config = SkillsConfig::load()?;
            cli::init_stderr_logging(&config.logging);
            match action {
                ConfigAction::Show { project } => {
                    cli::configure::show(&config, &cli::resolve_project(project)?)?;
                }
                ConfigAction::Set { project, args } => {
                    cli::configure::set(&config, &cli::resolve_project(project)?, &args)?;
                }
                ConfigAction::Reset { project } => {
                    cli::configure::reset(&config, &cli::resolve_project(project)?)?;
                }
            }
        }
    }

    Ok(())
}

async fn daemon(config: SkillsConfig, action: DaemonAction) -> Result<()> {
    if let DaemonAction::Run { project, token } = action {
        // Detached: no terminal to write to.
        let _guard = cli::init_file_logging(&config.logging)?;
        return cli::daemon::run(&config, &project, &token).await;
    }

    cli::init_stderr_logging(&config.logging);
    match action {
        DaemonAction::Start { project } => {
            cli::daemon::start(&config, &cli::resolve_project(project)?)
        }
        DaemonAction::Notify { project } => {
            cli::daemon::notify(&config, &cli::resolve_project(project)?)
        }
        DaemonAction::Status { project, json } => {
            cli::status::status(&config, &cli::resolve_project(project)?, json)
        }
        DaemonAction::Run { .. } => Ok(()),
    }
}
