use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "reposmith")]
#[command(version, about = "Conversational repository scaffolding with policy-checked plans")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Approve plans without prompting
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Disable a module for this invocation (repeatable)
    #[arg(long = "disable-module", global = true)]
    pub disable_modules: Vec<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .reposmith/ with a default config and policy catalog
    Init,
    /// Plan and execute a scaffold from a requirements file
    Run {
        /// File with `key: value` lines or a JSON object
        #[arg(short, long)]
        requirements: PathBuf,

        /// Write into memory only; no repository is created
        #[arg(long)]
        dry_run: bool,
    },
    /// Preview the plan and policy results for a requirements file
    Plan {
        #[arg(short, long)]
        requirements: PathBuf,
    },
    /// Inspect persisted sessions
    Sessions {
        #[command(subcommand)]
        command: Option<SessionsCommands>,
    },
    /// Export a session's audit trail
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
    /// List or check policy catalogs
    Policies {
        #[command(subcommand)]
        command: Option<PoliciesCommands>,
    },
    /// List scaffolding modules
    Modules,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum SessionsCommands {
    List,
    Show { id: String },
    Remove { id: String },
}

#[derive(Subcommand, Clone)]
pub enum AuditCommands {
    Export {
        session: String,

        /// json or csv
        #[arg(short, long, default_value = "json")]
        format: String,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Clone)]
pub enum PoliciesCommands {
    /// List the active catalog
    List,
    /// Parse and validate a catalog file without activating it
    Check {
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default reposmith.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let config = reposmith::config::ReposmithConfig::new(project_dir.clone())?
        .with_cli_args(&cli.disable_modules, cli.log_json);
    let mut logging = config.toml.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    let _log_guard = reposmith::telemetry::init(&logging, config.log_file().as_deref())?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Run {
            requirements,
            dry_run,
        } => cmd::cmd_run(&cli, config, requirements, *dry_run).await?,
        Commands::Plan { requirements } => cmd::cmd_plan(config, requirements)?,
        Commands::Sessions { command } => cmd::cmd_sessions(config, command.clone()).await?,
        Commands::Audit { command } => cmd::cmd_audit(config, command.clone())?,
        Commands::Policies { command } => cmd::cmd_policies(config, command.clone())?,
        Commands::Modules => cmd::cmd_modules(config)?,
        Commands::Config { command } => cmd::cmd_config(config, command.clone())?,
    }

    Ok(())
}
