mod error;
mod handlers;
mod models;

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use bridge_lib::callbacks::{self, LogEvent};
use bridge_lib::lifecycle;
use bridge_lib::types::BridgeConfig;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
pub struct AppState {
    pub logs: Arc<Mutex<Receiver<LogEvent>>>,
}

fn load_config() -> anyhow::Result<BridgeConfig> {
    match std::env::var("BRIDGE_CONFIG") {
        Ok(path) => BridgeConfig::load(&path).with_context(|| format!("loading {}", path)),
        Err(_) => {
            let root = std::env::var("BRIDGE_ROOT").unwrap_or_else(|_| "./bridge-data".to_string());
            Ok(BridgeConfig::with_root(root))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = load_config()?;
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());

    // The bridge logger owns the `log` facade, so the subscriber's LogTracer
    // step fails; the tracing dispatcher is installed before that point.
    let queue_capacity = config.log.queue_capacity;
    lifecycle::init(config).context("initializing bridge")?;
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bridge_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    let state = AppState {
        logs: Arc::new(Mutex::new(callbacks::subscribe_logs(queue_capacity))),
    };

    let app = Router::new()
        .route("/v1/status", get(handlers::get_status))
        .route("/v1/functions", get(handlers::list_functions))
        .route("/v1/call/:function", post(handlers::call_function))
        .route("/v1/logs", get(handlers::get_logs))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("binding port {}", port))?;

    tracing::info!("Gateway listening on port {}", port);

    axum::serve(listener, app).await.context("server failed")?;

    lifecycle::release().context("releasing bridge")?;
    Ok(())
}
