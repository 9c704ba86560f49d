use std::path::Path;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use tracktags_crypto::{CredentialCipher, MASTER_KEY_ENV};
use tracktags_server::app::{build_state, create_store, master_cipher};
use tracktags_server::config::TrackTagsConfig;

/// TrackTags metering and admission-control server.
#[derive(Parser, Debug)]
#[command(name = "tracktags-server", about = "Standalone HTTP server for TrackTags")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "tracktags.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server (the default).
    Serve,
    /// Encrypt a credential (e.g. a webhook secret) for the store. Reads
    /// plaintext from stdin.
    Encrypt,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Commands::Encrypt) = cli.command {
        tracktags_server::telemetry::init_cli();
        return run_encrypt();
    }

    let config = TrackTagsConfig::load(Path::new(&cli.config))?;
    let telemetry_guard = tracktags_server::telemetry::init(&config.telemetry);
    if !Path::new(&cli.config).exists() {
        info!(path = %cli.config, "config file not found, using defaults");
    }

    let store = create_store(&config.store)?;
    let cipher = master_cipher()?;
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.gateway.forward_timeout_seconds))
        .build()?;
    let state = build_state(&config, store, cipher, http_client)?;
    let engine = state.engine.clone();
    let app = tracktags_server::api::router(state);

    let host = cli.host.unwrap_or(config.server.host);
    let port = cli.port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "tracktags-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(
        timeout_secs = config.server.shutdown_timeout_seconds,
        "draining usage flushes and breach webhooks..."
    );
    engine
        .shutdown(Duration::from_secs(config.server.shutdown_timeout_seconds))
        .await;

    telemetry_guard.shutdown();
    info!("tracktags-server shut down");
    Ok(())
}

/// Read plaintext from stdin and print the encrypted blob to stdout.
fn run_encrypt() -> Result<(), Box<dyn std::error::Error>> {
    let raw_key = std::env::var(MASTER_KEY_ENV)
        .map_err(|_| format!("{MASTER_KEY_ENV} is required for the encrypt command"))?;
    let cipher = CredentialCipher::from_key_text(&raw_key)
        .map_err(|e| format!("invalid {MASTER_KEY_ENV}: {e}"))?;

    let mut plaintext = String::new();
    std::io::Read::read_to_string(&mut std::io::stdin(), &mut plaintext)?;
    let plaintext = plaintext.trim_end_matches(['\r', '\n']);
    if plaintext.is_empty() {
        return Err("nothing to encrypt: stdin was empty".into());
    }

    println!("{}", cipher.encrypt(plaintext)?);
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
