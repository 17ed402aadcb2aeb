use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use liftoff_execution::{FairnessGenerator, MemoryStore, RoundEngine, Supervisor};
use tracing::{info, Level};

mod api;
mod config;
mod history_persistence;

use config::{Config, ValidatedConfig};
use history_persistence::ServiceStore;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML config file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the config, print it, and exit.
    #[arg(long)]
    dry_run: bool,
}

fn load_config(args: &Args) -> Result<Config> {
    let Some(path) = &args.config else {
        return Ok(Config::default());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read config file {}", path.display()))?;
    Config::from_yaml(&contents).context("Could not parse config file")
}

fn init_tracing(level: Level, json: bool) {
    let builder = tracing_subscriber::fmt().with_max_level(level);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_dry_run_report(config: &ValidatedConfig) {
    println!("crash-table config ok");
    println!("{config:#?}");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    let config = config.validate().context("Invalid config")?;
    if args.dry_run {
        print_dry_run_report(&config);
        return Ok(());
    }
    init_tracing(config.log_level, config.json_logs);

    let memory = MemoryStore::new(config.broadcast_buffer);
    let store = match &config.history_path {
        Some(path) => ServiceStore::with_sqlite(memory.clone(), path)?,
        None => ServiceStore::in_memory(memory.clone()),
    };

    let engine = RoundEngine::new(
        store,
        config.phases,
        FairnessGenerator::new(config.fairness),
    );
    let supervisor = tokio::spawn(Supervisor::new(engine).run());

    let app = api::router(api::AppState::new(memory, config.admin_token.clone()));
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("Could not bind {}", config.addr))?;
    info!(addr = %config.addr, algorithm = ?config.fairness.algorithm, "crash table listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(?err, "failed to listen for shutdown signal");
            }
            info!("shutting down");
        })
        .await
        .context("server failed")?;

    supervisor.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_and_dry_run_flags() {
        let args = Args::parse_from(["crash-table", "--config", "table.yaml", "--dry-run"]);
        assert_eq!(args.config, Some(PathBuf::from("table.yaml")));
        assert!(args.dry_run);

        let args = Args::parse_from(["crash-table"]);
        assert!(args.config.is_none());
        assert!(!args.dry_run);
    }

    #[test]
    fn missing_config_path_uses_defaults() {
        let args = Args::parse_from(["crash-table"]);
        let config = load_config(&args).unwrap().validate().unwrap();
        assert_eq!(config.addr.port(), 9124);
    }

    #[test]
    fn loads_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.yaml");
        std::fs::write(&path, "port: 9200\nphases:\n  waiting_ms: 2000\n").unwrap();
        let args = Args::parse_from(["crash-table", "--config", path.to_str().unwrap()]);
        let config = load_config(&args).unwrap().validate().unwrap();
        assert_eq!(config.addr.port(), 9200);
        assert_eq!(config.phases.waiting_ms, 2_000);

        let args = Args::parse_from(["crash-table", "--config", "/nonexistent/table.yaml"]);
        assert!(load_config(&args).is_err());
    }
}
