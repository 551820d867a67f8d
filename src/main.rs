//! # milky
//!
//! Companion bot service binary: settings → telemetry → load state → serve.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use milky_core::{LogNotifier, OperatorNotifier};
use milky_engine::{Companion, CompanionConfig, WebhookNotifier};
use milky_llm::{GeminiBackend, GeminiConfig, InferenceClient, InferenceConfig};
use milky_server::MilkyServer;
use milky_settings::{load_settings_from_path, settings_path, MilkySettings, Secrets};
use milky_store::{LoadOutcome, StateStore, SyncAdapter};
use milky_telemetry::{init_telemetry, parse_level, LogFormat, TelemetryConfig};

const FINAL_SAVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Companion bot service.
#[derive(Parser, Debug)]
#[command(name = "milky", about = "Persona chat companion service")]
struct Cli {
    /// Settings file (defaults to `$MILKY_HOME/settings.json`).
    #[arg(long, env = "MILKY_SETTINGS")]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings, 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Skip loading persisted state on start-up.
    #[arg(long, default_value_t = false)]
    fresh: bool,
}

fn telemetry_config(settings: &MilkySettings) -> TelemetryConfig {
    let defaults = TelemetryConfig::default();
    TelemetryConfig {
        log_level: parse_level(&settings.logging.level).unwrap_or(defaults.log_level),
        format: settings.logging.format.parse().unwrap_or(LogFormat::Json),
        ..defaults
    }
}

fn operator_notifier(secrets: &Secrets) -> Arc<dyn OperatorNotifier> {
    match &secrets.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let path = cli.settings.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings: {}", path.display()))?;
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    settings.validate().context("Invalid settings")?;

    let telemetry = init_telemetry(telemetry_config(&settings));
    info!(filter = telemetry.filter(), from_env = telemetry.from_env(), "telemetry ready");

    let secrets = Secrets::from_env();
    if secrets.api_keys.is_empty() {
        warn!("GEMINI_API_KEYS is empty, every inference call will fail");
    }
    let notifier = operator_notifier(&secrets);

    let backend = GeminiBackend::new(GeminiConfig::from(&settings.inference))
        .context("Failed to build inference backend")?;
    let client = Arc::new(InferenceClient::new(
        Arc::new(backend),
        secrets.api_keys.clone(),
        InferenceConfig::from(&settings.inference),
        notifier.clone(),
    ));

    let store = Arc::new(StateStore::new());
    let sync = Arc::new(
        SyncAdapter::from_settings(store, &settings.sync, secrets.hf_token.clone(), notifier)
            .context("Failed to configure remote store")?,
    );
    if cli.fresh {
        info!("skipping state load");
    } else {
        match sync.load().await {
            LoadOutcome::Unavailable => warn!("remote store unreachable, starting from empty state"),
            outcome => info!(?outcome, "state load finished"),
        }
    }

    let companion = Arc::new(
        Companion::new(CompanionConfig::from(&settings), client, sync.clone())
            .context("Failed to build companion")?,
    );
    let server = MilkyServer::new(companion);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let shutdown = server.shutdown().clone();
    let signal = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                shutdown.shutdown();
            }
            Err(e) => warn!(error = %e, "cannot listen for shutdown signal"),
        }
    });

    server.serve(listener).await.context("Server error")?;
    signal.abort();

    if sync.is_configured() {
        info!("saving state before exit");
        let final_save = tokio::spawn(async move {
            match sync.save().await {
                Ok(()) => info!("state saved"),
                Err(e) => warn!(error = %e, "final save failed"),
            }
        });
        server.shutdown().drain(vec![final_save], FINAL_SAVE_TIMEOUT).await;
    }
    Ok(())
}
