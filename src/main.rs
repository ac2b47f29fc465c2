//! Backup archive tool
//!
//! Creates dated zip archives of a database dump and selected paths, keeps a
//! bounded history locally and mirrors it to S3-compatible storage.

// backupsync/src/main.rs
mod archive;
mod backup;
mod config;
mod errors;
mod local;
mod restore;
mod storage;
mod sync;
mod utils;

use anyhow::{Context, Result};
use config::AppConfig;
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use sync::logic::{RunState, SyncReport};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const CONFIG_PATH_ENV: &str = "BACKUPSYNC_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine; credentials may come from the real environment
    let _ = dotenv::dotenv();

    let config_path = env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let app_config = match AppConfig::load_from_json(&config_path) {
        Ok(app_config) => app_config,
        Err(e) => {
            eprintln!(
                "❌ Failed to load application configuration from {}: {:?}",
                config_path.display(),
                e
            );
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = utils::logging::init_logging(&app_config.logging) {
        eprintln!("❌ Error: {:?}", e);
        return ExitCode::FAILURE;
    }
    app_config.log_warnings();

    match run_app(&app_config).await {
        Ok(true) => {
            info!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            warn!("Operation completed with errors.");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(false)` when the operation finished but some archives failed.
async fn run_app(app_config: &AppConfig) -> Result<bool> {
    let args: Vec<String> = env::args().collect();
    let choice = if args.len() > 1 {
        args[1].trim().to_string()
    } else {
        prompt_choice()?
    };

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    match choice.as_str() {
        "1" | "backup" => {
            info!("🚀 Starting Backup Process...");
            let report = backup::run_backup_flow(app_config, cancel)
                .await
                .context("Backup process failed")?;
            print_json(&report)?;
            Ok(is_clean(&report))
        }
        "2" | "restore" => {
            let name = match args.get(2) {
                Some(name) => name.trim().to_string(),
                None => prompt_line("Archive to restore (e.g. 2024-01-31_235959.zip): ")?,
            };
            info!("🔄 Starting Restore Process for {}...", name);
            let outcome = restore::run_restore_flow(app_config, &name)
                .await
                .context("Restore process failed")?;
            print_json(&outcome)?;
            Ok(true)
        }
        "3" | "sync" => {
            info!("⚙️ Starting Sync Process...");
            let report = sync::run_sync_flow(app_config, cancel)
                .await
                .context("Sync process failed")?;
            print_json(&report)?;
            Ok(is_clean(&report))
        }
        "4" | "list" => {
            let listings = sync::list_archives(app_config)
                .await
                .context("Listing archives failed")?;
            print_json(&listings)?;
            Ok(true)
        }
        _ => {
            println!(
                "❌ Invalid choice. Please enter '1' (backup), '2' (restore), '3' (sync) \
                 or '4' (list)."
            );
            anyhow::bail!("Invalid operation choice");
        }
    }
}

fn is_clean(report: &SyncReport) -> bool {
    report.state == RunState::Completed
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight operations and stopping");
            cancel.cancel();
        }
    });
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", rendered);
    Ok(())
}

/// Prompts user to select an operation
///
/// Returns the user's choice as String
fn prompt_choice() -> Result<String> {
    println!("Select an operation:");
    println!("1. Take Backup (or type 'backup')");
    println!("2. Restore Backup (or type 'restore')");
    println!("3. Sync Archives with Remote Storage (or type 'sync')");
    println!("4. List Archives (or type 'list')");
    prompt_line("Enter your choice: ")
}

fn prompt_line(prompt: &str) -> Result<String> {
    use std::io::{stdin, stdout, Write};

    print!("{}", prompt);
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
