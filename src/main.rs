//! MySQL Backup/Restore Helper
//!
//! Provides a CLI for backing up, restoring and cloning MySQL databases
//! described by named connection profiles.

// mysql-helper/src/main.rs
mod backup;
mod clone;
mod config;
mod configure;
mod display;
mod errors;
mod profiles;
mod restore;
mod utils;
mod workflow;

#[cfg(test)]
mod testing;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use backup::{BackupOptions, BackupWorkflow};
use clone::{CloneOptions, CloneSource, CloneWorkflow};
use config::AppConfig;
use configure::Configurator;
use display::{DisplayOptions, DisplaySource};
use profiles::store::ProfileStore;
use restore::{RestoreOptions, RestoreWorkflow};
use utils::database::MySqlClient;
use utils::process::SystemProcessRunner;
use utils::prompt::TerminalPrompter;
use utils::remote::SshExecutor;
use workflow::{Context, Workflow};

#[derive(Debug, Parser)]
#[command(name = "mysql-helper", version, about = "Back up, restore and clone MySQL databases")]
struct Cli {
    /// Working directory holding profiles, backups and config.yml.
    #[arg(long, global = true, value_name = "DIR")]
    home: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "warn")]
    log: String,

    /// Never prompt; every missing selection becomes an error.
    #[arg(short = 'n', long, global = true)]
    no_interaction: bool,

    /// Skip the confirmation before destructive operations.
    #[arg(short = 'y', long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Dump a database into a timestamped archive.
    Backup(BackupArgs),
    /// Load a backup or SQL file into a database.
    Restore(RestoreArgs),
    /// Copy one database into another.
    Clone(CloneArgs),
    /// List profiles, connections or databases.
    Display(DisplayArgs),
    /// Edit profiles interactively.
    Configure,
    /// Verify that mysqldump and mysql are installed.
    Check,
}

#[derive(Debug, Args)]
struct BackupArgs {
    #[arg(long)]
    profile: Option<String>,
    #[arg(long)]
    connection: Option<String>,
    #[arg(long)]
    database: Option<String>,
    /// Hide progress bars.
    #[arg(long)]
    no_progress: bool,
}

#[derive(Debug, Args)]
struct RestoreArgs {
    #[arg(long)]
    profile: Option<String>,
    /// Archive (.tar.gz, .tgz, .zip) or plain .sql file to restore instead of choosing a backup.
    #[arg(long, value_name = "PATH")]
    sql_path: Option<PathBuf>,
    #[arg(long)]
    connection: Option<String>,
    #[arg(long)]
    database: Option<String>,
    /// Back up the target database first.
    #[arg(long, value_name = "BOOL")]
    backup: Option<bool>,
    /// Same as --yes.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Args)]
struct CloneArgs {
    #[arg(value_enum)]
    source: CloneSource,
    #[arg(long)]
    profile: Option<String>,
    #[arg(long)]
    remote: Option<String>,
    #[arg(long)]
    remote_profile: Option<String>,
    #[arg(long)]
    remote_connection: Option<String>,
    #[arg(long)]
    src_database: Option<String>,
    #[arg(long)]
    connection: Option<String>,
    #[arg(long)]
    dest_database: Option<String>,
}

#[derive(Debug, Args)]
struct DisplayArgs {
    #[arg(value_enum)]
    source: DisplaySource,
    #[arg(long)]
    profile: Option<String>,
    #[arg(long)]
    connection: Option<String>,
    /// Print a JSON array instead of one name per line.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli.log);

    match run_app(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_app(cli: Cli) -> Result<ExitCode> {
    if matches!(cli.command, Command::Check) {
        return Ok(run_check());
    }

    let config = AppConfig::resolve(cli.home.clone()).context("Failed to resolve the working directory")?;
    debug!(home = %config.home.display(), "Using working directory");
    let store = ProfileStore::new(config.profiles_dir());
    let profiles = store
        .load_all()
        .with_context(|| format!("Failed to load profiles from {}", store.root().display()))?;

    let show_progress = !matches!(&cli.command, Command::Backup(args) if args.no_progress);
    let prompter = TerminalPrompter;
    let databases = MySqlClient;
    let processes = SystemProcessRunner::new(show_progress);
    let remotes = SshExecutor::new(Duration::from_secs(config.settings.ssh_timeout_secs));
    let interactive = !cli.no_interaction;

    let force = matches!(&cli.command, Command::Restore(args) if args.force);
    let cx = Context {
        config: &config,
        profiles: &profiles,
        prompter: &prompter,
        databases: &databases,
        processes: &processes,
        remotes: &remotes,
        interactive,
        assume_yes: cli.yes || force,
    };

    let mut job: Box<dyn Workflow> = match cli.command {
        Command::Backup(args) => Box::new(BackupWorkflow::new(BackupOptions {
            profile: args.profile,
            connection: args.connection,
            database: args.database,
        })),
        Command::Restore(args) => Box::new(RestoreWorkflow::new(RestoreOptions {
            profile: args.profile,
            sql_path: args.sql_path,
            connection: args.connection,
            database: args.database,
            backup: args.backup,
        })),
        Command::Clone(args) => Box::new(CloneWorkflow::new(CloneOptions {
            profile: args.profile,
            remote: args.remote,
            remote_profile: args.remote_profile,
            remote_connection: args.remote_connection,
            src_database: args.src_database,
            connection: args.connection,
            dest_database: args.dest_database,
            ..CloneOptions::new(args.source)
        })),
        Command::Display(args) => {
            let options = DisplayOptions {
                source: args.source,
                profile: args.profile,
                connection: args.connection,
                json: args.json,
            };
            display::run_display(&cx, &options).await.context("Display failed")?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Configure => {
            configure::require_terminal(interactive)?;
            let mut editor = Configurator::new(&store, profiles.clone(), &config.settings, &prompter, &databases, &remotes);
            editor.run().await.context("Profile editor failed")?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Check => return Ok(run_check()),
    };

    let report = workflow::run(job.as_mut(), &cx).await;
    report.emit();
    Ok(report.exit_code())
}

/// Prints where each required client tool was found.
fn run_check() -> ExitCode {
    let mut missing = 0;
    for (tool, found) in utils::check_required_tools() {
        match found {
            Ok(path) => println!("✅ {}: {}", tool, path.display()),
            Err(e) => {
                println!("❌ {}: {}", tool, e);
                missing += 1;
            }
        }
    }
    if missing == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
