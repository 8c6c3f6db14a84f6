//! Board summary CLI.
//!
//! Usage: `taskboard [config.toml]`. Loads config (defaults when the file is
//! absent), starts file logging when `log_dir` is set, opens the database and
//! prints task counts per column, actor loads and recent activity.

use log::info;
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use taskboard_core::{
    init_logging, load_config, open_db, BoardConfig, BroadcastRelay, SqliteBoardService,
    SystemClock, TaskStatus,
};

const DEFAULT_CONFIG_PATH: &str = "taskboard.toml";

fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    match run(&config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("taskboard: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: &str) -> Result<(), Box<dyn Error>> {
    let config = load_config(config_path)?;
    if let Some(log_dir) = &config.log_dir {
        init_logging(&config.log_level, log_dir)?;
    }
    info!("event=cli_start module=cli status=ok config_path={config_path}");

    let conn = open_db(&config.db_path)?;
    let relay = BroadcastRelay::new(config.relay_limits()?);
    let service =
        SqliteBoardService::sqlite(&conn, Arc::new(SystemClock), config.board_options(), relay)?;

    print_summary(&config, &service)?;
    Ok(())
}

fn print_summary(
    config: &BoardConfig,
    service: &SqliteBoardService<'_>,
) -> Result<(), Box<dyn Error>> {
    println!("taskboard {}", taskboard_core::core_version());
    println!("database {}", config.db_path.display());

    let tasks = service.list_tasks()?;
    println!("tasks {}", tasks.len());
    for status in [TaskStatus::Todo, TaskStatus::InProgress, TaskStatus::Done] {
        let count = tasks.iter().filter(|task| task.status == status).count();
        println!("  {:<12} {count}", status.label());
    }

    let loads = service.actor_loads()?;
    println!("actors {}", loads.len());
    for load in &loads {
        println!(
            "  {:<24} {} active",
            load.actor.display_name, load.active_tasks
        );
    }

    let recent = service.recent_activity(None)?;
    println!("recent activity {}", recent.len());
    for entry in &recent {
        println!(
            "  [{}] {} {}: {}",
            entry.created_at,
            entry.action.as_str(),
            entry.actor_name,
            entry.details
        );
    }
    Ok(())
}
