//! CLI smoke entry point.
//!
//! # Responsibility
//! - Open a store through `crewlink_core` and report its status.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Without a database path an in-memory store is used.

use clap::Parser;
use crewlink_core::db::migrations::current_user_version;
use crewlink_core::{default_log_level, init_logging, open_db, open_db_in_memory, CoreConfig};
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "crewlink")]
#[command(about = "Open a crewlink store and report its schema and policies")]
#[command(version)]
struct Cli {
    /// SQLite database file (in-memory store when omitted)
    db_path: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Absolute directory for rolling log files
    #[arg(long, env = "CREWLINK_LOG_DIR")]
    log_dir: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("crewlink: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    if let Some(log_dir) = &cli.log_dir {
        init_logging(default_log_level(), log_dir)?;
    }

    let config = match &cli.config {
        Some(path) => CoreConfig::from_file(path).map_err(|err| err.to_string())?,
        None => CoreConfig::default(),
    };

    let conn = match &cli.db_path {
        Some(path) => open_db(path, &config),
        None => open_db_in_memory(),
    }
    .map_err(|err| err.to_string())?;
    let schema_version = current_user_version(&conn).map_err(|err| err.to_string())?;

    info!(
        "event=cli_status module=cli status=ok store={} schema_version={schema_version}",
        if cli.db_path.is_some() { "file" } else { "memory" }
    );
    println!("crewlink_core ping={}", crewlink_core::ping());
    println!("crewlink_core version={}", crewlink_core::core_version());
    println!("store schema_version={schema_version}");
    println!(
        "policy promotion={:?} project_chat_visibility={:?} max_fanout_recipients={}",
        config.promotion_policy, config.project_chat_visibility, config.max_fanout_recipients
    );
    Ok(())
}
