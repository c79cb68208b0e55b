use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{info, warn};
use std::fs;
use std::path::Path;
use std::sync::Arc;

mod cli;

use autorank::config::Config;
use autorank::engine::ReconcileEngine;
use autorank::server::{self, AppState};
use autorank::store::CouchStore;
use cli::Cli;
use cli::commands::Commands;

fn setup_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));

    if let Some(log_file) = log_file {
        if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("Failed to create log directory")?;
        }
        let target = Box::new(
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)
                .context("Failed to open log file")?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.init();

    match log_file {
        Some(path) => info!("Logging initialized, writing to: {}", path.display()),
        None => info!("Logging initialized"),
    }
    Ok(())
}

/// Connect to the store and bootstrap the engine
async fn start_engine(config: &Config) -> Result<ReconcileEngine> {
    let store = CouchStore::new(&config.store).context("Store is not usable")?;
    let engine = ReconcileEngine::start(Arc::new(store), &config.reconcile)
        .await
        .context("Failed to bootstrap from the store")?;
    Ok(engine)
}

async fn handle_serve(bind: Option<&str>, config: &Config) -> Result<()> {
    let mut server_config = config.server.clone();
    if let Some(bind) = bind {
        server_config.bind = bind.to_string();
    }
    let addr = server_config.bind_addr()?;

    // Without a store the routes still answer, reporting the failure
    let engine = match start_engine(config).await {
        Ok(engine) => Some(Arc::new(engine)),
        Err(e) => {
            warn!("Serving without a store: {:#}", e);
            eprintln!("{} {:#}", "Warning:".yellow(), e);
            None
        }
    };
    if server_config.access_tokens.is_empty() {
        warn!("No access tokens configured, every webhook will be rejected");
    }

    println!("{} {}", "Listening on".green(), addr);
    server::serve(addr, AppState::new(engine, server_config.access_tokens)).await
}

async fn handle_sort_all(config: &Config) -> Result<()> {
    let engine = start_engine(config).await?;
    let result = engine.on_full_resync().await;
    let outcome = engine.outcome(&result).await;

    if outcome.success {
        println!("{} {}", "Success:".green(), outcome.message);
        Ok(())
    } else {
        println!("{} {}", "Failed:".red(), outcome.message);
        result.map(|_| ()).context("Full resort failed")
    }
}

fn handle_check_config(config: &Config) -> Result<()> {
    let shown = serde_yaml::to_string(&config.redacted()).context("Failed to render config")?;
    println!("{}", shown);
    if config.store.is_configured() {
        println!("{}", "Store connection is configured".green());
    } else {
        println!("{}", "Store connection is incomplete".yellow());
    }
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None => handle_serve(None, config).await,
        Some(Commands::Serve { bind }) => handle_serve(bind.as_deref(), config).await,
        Some(Commands::SortAll) => handle_sort_all(config).await,
        Some(Commands::CheckConfig) => handle_check_config(config),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration, then the deployment environment on top
    let config = Config::load(cli.config.as_ref())
        .context("Failed to load configuration")?
        .apply_env(|key| std::env::var(key).ok())
        .context("Invalid environment configuration")?;

    let level = if cli.is_verbose() {
        "debug".to_string()
    } else {
        config.log_level.clone().unwrap_or_else(|| "info".to_string())
    };
    setup_logging(&level, cli.log_file.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config)
        .await
        .context("Application failed")?;

    Ok(())
}
