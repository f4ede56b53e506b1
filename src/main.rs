use axum::http::HeaderValue;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod ai;
mod astronomy;
mod cache;
mod config;
mod error;
mod gateway;
mod rate_limit;
mod routes;
mod utils;
mod weather;

use ai::AiClient;
use cache::CacheStore;
use config::Config;
use gateway::Gateway;
use rate_limit::RateLimiter;
use routes::{create_router, AppState};
use weather::openweather::OpenWeatherClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ambient_weather_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    if !config.weather_configured() {
        tracing::warn!(demo_mode = config.demo_mode, "OPENWEATHER_API_KEY not set");
    }
    if !config.gemini_configured() {
        tracing::warn!("GEMINI_API_KEY not set, AI endpoints will answer 503");
    }

    let cache = CacheStore::new(&config.cache);
    let weather_client = OpenWeatherClient::new(config.clone())?;
    let ai_client = AiClient::new(config.clone())?;
    let gateway = Arc::new(Gateway::new(cache, weather_client, ai_client, config.demo_mode));
    let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));

    let cors = cors_layer(&config.cors_origins);
    let addr = format!("{}:{}", config.bind_addr, config.port);

    // Create application state
    let state = AppState {
        config: Arc::new(config),
        gateway,
        limiter,
    };

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server starting on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// `*` anywhere in the list opens CORS to every origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
