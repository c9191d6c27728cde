//! ctsync CLI - Main entry point
//!
//! Operator commands for the log-list updater plus `serve`, which runs the
//! scheduled service with its local HTTP adapter.

use ctsync_lib::engine::{
    api::{create_router, ApiState},
    cli::{formatter::CliFormatter, Cli, Commands, OutputFormat},
    config::Config,
    service::Service,
};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run_cli(cli) {
        CliFormatter::error(&format!("Error: {}", e));
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ctsync=info,ctsync_lib=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_cli(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = cli.get_data_dir()?;
    let json_output = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Init { public_key, force } => {
            cmd_init(&data_dir, public_key, force, json_output)?;
        }
        Commands::Status => {
            cmd_status(&data_dir, json_output)?;
        }
        Commands::Update { compat_version, force } => {
            cmd_update(&data_dir, compat_version, force, json_output)?;
        }
        Commands::Reset => {
            cmd_reset(&data_dir, json_output)?;
        }
        Commands::Serve { port, host } => {
            cmd_serve(&data_dir, host, port)?;
        }
    }

    Ok(())
}

fn cmd_init(data_dir: &Path, public_key: Option<String>, force: bool, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if Config::load(data_dir).is_ok() && !force {
        return Err(format!("Configuration already exists in {} (use --force)", data_dir.display()).into());
    }

    let mut config = Config::default();
    if let Some(key) = public_key {
        // Reject bad key material before writing it out
        ctsync_lib::engine::updater::SignatureVerifier::new().set_public_key_base64(&key)?;
        config.public_key = Some(key);
    }
    config.save(data_dir)?;

    if json {
        println!("{}", serde_json::json!({
            "success": true,
            "data_dir": data_dir.display().to_string(),
            "versions": config.compatibility_versions.iter().map(|v| v.id.clone()).collect::<Vec<_>>(),
        }));
    } else {
        CliFormatter::success(&format!("Initialized ctsync in {}", data_dir.display()));
        if config.public_key.is_none() {
            CliFormatter::warning("No trusted public key set; add `public_key` before updating");
        }
    }

    Ok(())
}

fn cmd_status(data_dir: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(data_dir)?;
    let service = Service::from_config(&config, data_dir)?;
    let status = service.status();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        CliFormatter::header("ctsync status");
        CliFormatter::kv("Data dir", &data_dir.display().to_string());
        CliFormatter::kv("Trusted key", if status.trusted_key_loaded { "loaded" } else { "missing" });
        for version in &status.versions {
            CliFormatter::version_status(version);
        }
    }

    Ok(())
}

#[tokio::main]
async fn cmd_update(
    data_dir: &Path,
    compat_version: Option<String>,
    force: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(data_dir)?;
    let service = Service::from_config(&config, data_dir)?;
    let job = service.job();

    let outcomes = match compat_version {
        Some(id) if force => vec![(id.clone(), job.force_run_version(&id).await?)],
        Some(id) => vec![(id.clone(), job.run_version(&id).await?)],
        None => job.run().await,
    };

    if json {
        let results: serde_json::Map<String, serde_json::Value> = outcomes
            .iter()
            .map(|(id, outcome)| (id.clone(), serde_json::json!(outcome)))
            .collect();
        println!("{}", serde_json::json!({ "results": results }));
    } else {
        for (id, outcome) in &outcomes {
            CliFormatter::outcome(id, outcome);
        }
    }

    Ok(())
}

#[tokio::main]
async fn cmd_reset(data_dir: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(data_dir)?;
    let service = Service::from_config(&config, data_dir)?;
    let removed = service.job().reset().await;

    if json {
        println!("{}", serde_json::json!({ "success": true, "removed": removed }));
    } else if removed {
        CliFormatter::success("Update state cleared");
    } else {
        CliFormatter::info("No update state to clear");
    }

    Ok(())
}

#[tokio::main]
async fn cmd_serve(data_dir: &Path, host: Option<String>, port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(data_dir)?;
    let service = Arc::new(Service::from_config(&config, data_dir)?);
    service.on_boot_completed(config.flag.enabled)?;

    let app = create_router(ApiState { service: service.clone() });

    let host = host.unwrap_or_else(|| config.api.host.clone());
    let port = port.unwrap_or(config.api.port);
    let addr = format!("{}:{}", host, port);
    CliFormatter::header("ctsync service");
    CliFormatter::kv("Data dir", &data_dir.display().to_string());
    CliFormatter::kv("Listening", &format!("http://{}", addr));
    CliFormatter::kv("Updates", if service.is_enabled() { "enabled" } else { "disabled" });
    CliFormatter::info("Press Ctrl+C to stop");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    service.disable();
    Ok(())
}
