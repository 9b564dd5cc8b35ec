//! Command line entry point and server bootstrap.

use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::executable;
use crate::router::{build_router, AppState, RelayConfig};
use crate::rules::RulesCache;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3001;

#[derive(Parser, Debug)]
#[command(name = "chat-relay", bin_name = "chat-relay", version)]
pub struct Cli {
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Explicit path to the claude executable, skipping PATH detection.
    #[arg(long)]
    pub claude_path: Option<PathBuf>,

    /// Rules document prepended to the first message of every new
    /// conversation. Falls back to a built-in default when unreadable.
    #[arg(long)]
    pub rules_file: Option<PathBuf>,

    /// Project directory advertised to clients; defaults to the
    /// server's working directory.
    #[arg(long)]
    pub project_dir: Option<PathBuf>,

    #[arg(long = "cors-allow-origin", short = 'O')]
    pub cors_allow_origin: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid CORS origin: {0}")]
    InvalidCorsOrigin(String),
    #[error("server error: {0}")]
    Server(String),
    #[error(transparent)]
    Relay(#[from] chat_relay_error::RelayError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .init();
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let executable = executable::resolve(cli.claude_path.as_deref()).await?;
    tracing::info!(
        command = %executable.display_command(),
        version = %executable.version,
        "resolved claude executable"
    );

    let default_project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let rules = RulesCache::load(cli.rules_file.clone()).await;

    let state = AppState::new(
        RelayConfig {
            default_project_dir,
        },
        executable,
        rules,
    );
    let router = build_router(state).layer(build_cors_layer(&cli)?);

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "chat relay listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .map_err(|err| CliError::Server(err.to_string()))
}

/// Permissive on methods and headers; origins default to any, narrowed
/// to an explicit list when `--cors-allow-origin` is given.
fn build_cors_layer(cli: &Cli) -> Result<CorsLayer, CliError> {
    let mut cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if cli.cors_allow_origin.is_empty() {
        cors = cors.allow_origin(Any);
    } else {
        let mut origins: Vec<axum::http::HeaderValue> = Vec::new();
        for origin in &cli.cors_allow_origin {
            let value = origin
                .parse()
                .map_err(|_| CliError::InvalidCorsOrigin(origin.clone()))?;
            origins.push(value);
        }
        cors = cors.allow_origin(origins);
    }
    Ok(cors)
}
