//! Serverkeeper CLI entry point

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use serverkeeper::KeeperError;
use serverkeeper::artifact::DriveStore;
use serverkeeper::backup::{self, BackupManager};
use serverkeeper::cli::{Cli, Command};
use serverkeeper::config::Config;
use serverkeeper::launch::JavaLauncher;
use serverkeeper::orchestrator::{Orchestrator, local_host_name};
use serverkeeper::status::{PgStatusStore, StatusStore};

const BANNER: &str = r#"
    ███████╗███████╗██████╗ ██╗   ██╗███████╗██████╗
    ██╔════╝██╔════╝██╔══██╗██║   ██║██╔════╝██╔══██╗
    ███████╗█████╗  ██████╔╝██║   ██║█████╗  ██████╔╝
    ╚════██║██╔══╝  ██╔══██╗╚██╗ ██╔╝██╔══╝  ██╔══██╗
    ███████║███████╗██║  ██║ ╚████╔╝ ███████╗██║  ██║
    ╚══════╝╚══════╝╚═╝  ╚═╝  ╚═══╝  ╚══════╝╚═╝  ╚═╝
              KEEPER -- DO NOT CLOSE THIS!
"#;

/// Level priority: CLI --log-level > config file > INFO
fn resolve_level(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> tracing::Level {
    match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some("INFO") | None => tracing::Level::INFO,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    }
}

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("serverkeeper")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let level = resolve_level(cli_log_level, config_log_level);

    let log_file = fs::File::create(log_dir.join("serverkeeper.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

fn print_error(message: &str) {
    eprintln!("{}", message.red());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // One parse serves both the log level and the run itself
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;
    config.validate()?;

    match cli.command {
        Some(Command::Status) => cmd_status(&config).await,
        Some(Command::Release) => cmd_release(&config).await,
        Some(Command::Publish) => cmd_publish(&config).await,
        Some(Command::Run) | None => cmd_run(&config).await,
    }
}

/// Full lifecycle: claim, provision, run, publish, release
async fn cmd_run(config: &Config) -> Result<()> {
    println!("{}", BANNER.red());

    let status = connect_status(config).await?;
    let artifacts = DriveStore::from_key_file(&config.drive.service_account_key)?;
    let launcher = JavaLauncher::new(config.server.runtime_dir.clone(), config.server.binary_title.clone());
    let host = local_host_name();

    info!(host, "starting coordinated run");
    let orchestrator = Orchestrator::new(config, &status, &artifacts, &launcher, host);

    match orchestrator.run().await {
        Ok(()) => {
            println!("{}", "Server stopped, state uploaded, claim released.".green());
            Ok(())
        }
        Err(err @ KeeperError::AlreadyRunning { .. }) => {
            // Expected outcome, not a fault: report and exit cleanly
            print_error(&err.to_string());
            Ok(())
        }
        Err(err) => {
            print_error(&format!("An error occurred: {err}"));
            Err(err).wrap_err("run aborted")
        }
    }
}

/// Show the shared status record
async fn cmd_status(config: &Config) -> Result<()> {
    let status = connect_status(config).await?;

    let running = status.get_running().await?;
    let host = status.get_host_name().await?;

    if running {
        println!(
            "Server is {} on host '{}'",
            "running".green(),
            host.as_deref().unwrap_or("<unknown>")
        );
    } else {
        println!("Server is {}", "not running".yellow());
        if let Some(host) = host {
            println!("Last run by host '{}'", host);
        }
    }
    Ok(())
}

/// Clear a stale claim left by a crashed host
async fn cmd_release(config: &Config) -> Result<()> {
    let status = connect_status(config).await?;

    match status.get_host_name().await? {
        Some(host) => println!("Clearing claim held by '{}'...", host),
        None => println!("Clearing claim..."),
    }
    status.set_running(false).await?;
    println!("{}", "Claim released.".green());
    Ok(())
}

/// Snapshot the local work directory and upload it as the canonical bundle
async fn cmd_publish(config: &Config) -> Result<()> {
    let server = &config.server;
    if !server.work_dir.exists() {
        return Err(eyre::eyre!("work directory {} does not exist", server.work_dir.display()));
    }

    let artifacts = DriveStore::from_key_file(&config.drive.service_account_key)?;
    let manager = BackupManager::new(&server.binary_title);

    let snapshot_path = std::env::temp_dir().join(format!("serverkeeper-publish-{}.zip", backup::timestamp_now()));
    let snapshot = manager.snapshot(&snapshot_path, &server.work_dir)?;

    manager
        .rotate_canonical(&artifacts, &snapshot, &server.bundle_title, &config.drive.main_folder_id)
        .await?;
    fs::remove_file(&snapshot)?;

    println!("{}", "Canonical bundle uploaded.".green());
    Ok(())
}

async fn connect_status(config: &Config) -> Result<PgStatusStore> {
    PgStatusStore::connect(&config.database.url)
        .await
        .wrap_err("status database unreachable")
}
