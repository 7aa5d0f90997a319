mod config;
mod error;
mod jimeng;
mod pool;
mod routes;
mod session;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::jimeng::poll::StatusTable;
use crate::session::{DisabledSessionProvider, HttpSessionProvider, SessionProvider};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: Config,
    pub http: reqwest::Client,
    pub status_table: StatusTable,
    pub session_provider: Arc<dyn SessionProvider>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "jimeng_openai_gateway=debug,tower_http=info".into()
        }))
        .with(fmt::layer().with_target(true))
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let status_table = match &config.status_table_path {
        Some(path) => {
            let table = StatusTable::from_file(path)?;
            tracing::info!(path, "loaded status table overrides");
            table
        }
        None => StatusTable::default(),
    };

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()?;

    let session_provider: Arc<dyn SessionProvider> = match &config.session_provider_url {
        Some(url) => Arc::new(HttpSessionProvider::new(http.clone(), url.clone())),
        None => Arc::new(DisabledSessionProvider),
    };

    tracing::info!(
        port = config.port,
        max_poll_count = config.max_poll_count,
        strict_international_models = config.strict_international_models,
        "starting jimeng-openai-gateway"
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        http,
        status_table,
        session_provider,
    });

    let app = Router::new()
        .merge(routes::router(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!("Listening on 0.0.0.0:{}", config.port);
    axum::serve(listener, app).await?;

    Ok(())
}
