// src/main.rs

//! The main entry point for the monitor binary.

use anyhow::Result;
use pgwarden::config::Config;
use pgwarden::core::api::{MonitorApi, MonitorSettings};
use pgwarden::server;
use std::env;
use std::sync::Arc;
use tracing::error;

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("pgwarden version {VERSION}");
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("monitor.toml");

    let mut config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        if let Some(port_str) = args.get(port_index + 1) {
            match port_str.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => {
                    eprintln!("Invalid port number: {port_str}");
                    std::process::exit(1);
                }
            }
        } else {
            eprintln!("--port flag requires a value");
            std::process::exit(1);
        }
    }

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .compact()
        .with_ansi(true)
        .init();

    let settings = MonitorSettings {
        timeouts: config.timeouts.into(),
        enable_sync_xlog_threshold: config.enable_sync_xlog_threshold,
        promote_xlog_threshold: config.promote_xlog_threshold,
        default_number_sync_standbys: config.default_number_sync_standbys,
        ..MonitorSettings::default()
    };
    let api: Arc<MonitorApi> = Arc::new(MonitorApi::new(settings));

    if let Err(e) = server::run(&config.host, config.port, api).await {
        error!("monitor runtime error: {e}");
        return Err(e);
    }

    Ok(())
}
