use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use workflow_core::config::WorkflowConfigLoader;
use workflow_core::orchestrator::TransitionOrchestrator;
use workflow_database::{EntityStore, SqliteEntityStore};
use workflow_server::config::Config;
use workflow_server::protocol;
use workflow_server::telemetry::{
    init_telemetry, log_config_validation, log_shutdown_info, log_startup_info, PerformanceTimer,
};

#[derive(Parser)]
#[command(name = "workflow-server")]
#[command(about = "Workflow state engine — line-delimited JSON stdio loop")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<String>,

    /// Database URL override
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Log level override
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Working directory the workflow config is resolved relative to
    #[arg(long, env = "WORKFLOW_WORKING_DIR", default_value = ".")]
    working_dir: String,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(config_file) => {
            info!("loading configuration from file: {config_file}");
            Config::from_file(config_file)?
        }
        None => {
            info!("loading configuration from environment");
            Config::from_env()?
        }
    };

    if let Some(ref database_url) = cli.database_url {
        info!("overriding database url from cli");
        config.database.url = Some(database_url.clone());
    }

    if let Some(ref log_level) = cli.log_level {
        info!("overriding log level from cli");
        config.logging.level = log_level.clone();
    }

    Ok(config)
}

/// Spawn a blocking thread that forwards stdin lines to an async channel, so
/// the main loop can `select!` between new input and the shutdown signal
/// without blocking the executor on a synchronous `read_line`.
fn spawn_stdin_reader() -> tokio::sync::mpsc::Receiver<String> {
    let (tx, rx) = tokio::sync::mpsc::channel(32);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config = load_config(&cli).context("failed to load configuration")?;

    init_telemetry(&config.logging).context("failed to initialize telemetry")?;
    log_config_validation(&config);

    if let Err(e) = config.validate() {
        error!(error = %e, "configuration validation failed");
        std::process::exit(1);
    }

    log_startup_info(&config);

    let database_url = config.database_url();
    let store = SqliteEntityStore::new(&database_url)
        .await
        .context("failed to open database")?;
    store.migrate().await.context("failed to run migrations")?;
    store.health_check().await.context("database health check failed")?;

    let working_dir = PathBuf::from(&cli.working_dir);
    let config_loader = WorkflowConfigLoader::new();
    let orchestrator = TransitionOrchestrator::new(&store, &config_loader, &working_dir);

    info!("workflow server ready, reading transition batches from stdin");

    let mut stdin_lines = spawn_stdin_reader();
    let stdout = io::stdout();

    loop {
        tokio::select! {
            _ = wait_for_shutdown_signal() => {
                info!("shutdown signal received, stopping stdio loop");
                break;
            }
            line = stdin_lines.recv() => {
                let Some(line) = line else {
                    info!("stdin closed, stopping stdio loop");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                let timer = PerformanceTimer::new("apply_batch");
                let response = match protocol::parse_batch(&line) {
                    Ok(requests) => {
                        let batch = orchestrator.apply(requests).await;
                        protocol::to_wire_response(batch)
                    }
                    Err(message) => {
                        warn!(error = %message, "rejected malformed request line");
                        protocol::WireBatchResponse {
                            success: false,
                            message,
                            data: protocol::WireBatchData {
                                results: Vec::new(),
                                summary: protocol::WireSummary { total: 0, succeeded: 0, failed: 0 },
                            },
                        }
                    }
                };
                timer.finish();

                let mut out = stdout.lock();
                if let Err(e) = serde_json::to_writer(&mut out, &response) {
                    error!(error = %e, "failed to serialize response");
                    continue;
                }
                let _ = out.write_all(b"\n");
                let _ = out.flush();
            }
        }
    }

    log_shutdown_info();
    Ok(())
}
