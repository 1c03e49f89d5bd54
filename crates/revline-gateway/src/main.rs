use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

mod app;
mod call;
mod http;
mod outbound;
mod prompt;
mod tools;

#[derive(Parser)]
#[command(name = "revline-gateway", about = "Dealership voice agent gateway")]
struct Cli {
    /// Path to revline.toml (default: ~/.revline/revline.toml)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "revline_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var("REVLINE_CONFIG").ok());
    let config = revline_core::config::RevlineConfig::load(config_path.as_deref())?;

    let db = Arc::new(revline_db::Database::open(&config.database.path)?);
    info!(path = %config.database.path, "relational store ready");

    let store = match revline_store::SessionStore::init(&config.session_store.url, config.session_store.pool_size).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "session store unavailable, running degraded");
            Arc::new(revline_store::SessionStore::disconnected())
        }
    };

    let calendar = Arc::new(revline_calendar::CalendarClient::new(&config.calendar));

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config, db, store, calendar));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("Revline gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
