//! A small host process wiring [`ami::supervisor::Supervisor`] to a TOML
//! config file, a `tracing` subscriber, and a minimal `axum` health
//! endpoint — the kind of hosting app the core crate's `HealthReport`
//! (`Serialize`, framework-agnostic) is meant to be embedded in.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use ami::bus::EventFilter;
use ami::config::load_config_from_path;
use ami::supervisor::{ManagerEvent, Supervisor};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;

#[derive(Parser)]
#[command(about = "Runs a multi-provider AMI supervisor and exposes its health over HTTP")]
struct Args {
    /// Path to a TOML config file (see `ami::config` for the schema).
    #[arg(long, default_value = "ami.toml")]
    config: PathBuf,

    /// Address the health endpoint listens on.
    #[arg(long, default_value = "127.0.0.1:8089")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let config = load_config_from_path(&args.config)?;
    let catalog = Arc::new(ami_protocol::default_catalog());
    let supervisor = Arc::new(Supervisor::new(config, catalog));
    supervisor.start();

    let mut events = supervisor.subscribe(EventFilter::All);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ManagerEvent::Event { provider, event } => {
                    tracing::info!(%provider, event = %event.name, "received AMI event");
                }
                ManagerEvent::Disconnected { provider, reason } => {
                    tracing::warn!(%provider, %reason, "provider disconnected");
                }
            }
        }
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .with_state(supervisor.clone());

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    tracing::info!(addr = %args.listen, "health endpoint listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    supervisor.stop().await;
    Ok(())
}

async fn health_handler(State(supervisor): State<Arc<Supervisor>>) -> Json<serde_json::Value> {
    let report = supervisor.check_health(serde_json::Value::Null);
    Json(serde_json::to_value(report).unwrap_or(serde_json::Value::Null))
}
