use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, Query, State,
    },
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::{
    ai::{BriefingInput, ChatInput, ChatTurn, SummaryInput},
    astronomy::{self, Astronomy},
    cache::CacheStats,
    config::Config,
    error::ApiError,
    gateway::{Coordinates, Gateway, Resolved},
    rate_limit::{Decision, RateLimiter, Scope},
};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub gateway: Arc<Gateway>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    fn admit(&self, client: SocketAddr, scope: Scope) -> Result<(), ApiError> {
        let identity = client.ip().to_string();
        match self.limiter.admit(&identity, scope) {
            Decision::Allowed { .. } => Ok(()),
            Decision::Denied { scope, retry_after } => {
                tracing::warn!(client = %identity, scope, ?retry_after, "rate limit exceeded");
                Err(ApiError::RateLimited { scope, retry_after })
            }
        }
    }
}

// Request/Response types
#[derive(Debug, Deserialize)]
pub struct WeatherQuery {
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub units: Option<String>,
}

impl WeatherQuery {
    fn coordinates(&self) -> Result<Coordinates, ApiError> {
        Coordinates::parse(self.lat.as_deref(), self.lon.as_deref())
    }

    fn units(&self) -> &str {
        match self.units.as_deref().map(str::trim) {
            Some(units) if !units.is_empty() => units,
            _ => "metric",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GeocodeQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryRequest {
    pub weather: Option<Value>,
    pub current: Option<Value>,
    #[serde(default)]
    pub hourly: Vec<Value>,
    #[serde(default)]
    pub daily: Vec<Value>,
    pub location: Option<String>,
    pub style: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: Option<String>,
    pub weather: Option<Value>,
    pub current: Option<Value>,
    #[serde(default)]
    pub hourly: Vec<Value>,
    #[serde(default)]
    pub daily: Vec<Value>,
    pub location: Option<String>,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Deserialize)]
pub struct BriefingRequest {
    pub weather: Option<Value>,
    #[serde(default)]
    pub forecast: Vec<Value>,
    pub timezone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub services: ServiceStatus,
    pub demo_mode: bool,
    pub cache: CacheStats,
}

#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub weather_api: bool,
    pub gemini_api: bool,
}

/// `weather`, else `current`; null and `{}` count as missing.
fn snapshot(weather: Option<Value>, current: Option<Value>) -> Option<Value> {
    let present = |value: &Value| match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    };
    weather.filter(present).or_else(|| current.filter(present))
}

fn location(location: Option<String>) -> String {
    location
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    params
        .map(|Query(params)| params)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

// Route handlers
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        services: ServiceStatus {
            weather_api: state.config.weather_configured(),
            gemini_api: state.config.gemini_configured(),
        },
        demo_mode: state.gateway.demo_mode(),
        cache: state.gateway.cache_stats().await,
    })
}

pub async fn current_weather(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    params: Result<Query<WeatherQuery>, QueryRejection>,
) -> Result<Resolved, ApiError> {
    state.admit(client, Scope::CurrentWeather)?;
    let params = query(params)?;
    let coords = params.coordinates()?;
    state.gateway.current_weather(&coords, params.units()).await
}

pub async fn forecast(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    params: Result<Query<WeatherQuery>, QueryRejection>,
) -> Result<Resolved, ApiError> {
    state.admit(client, Scope::Forecast)?;
    let params = query(params)?;
    let coords = params.coordinates()?;
    state.gateway.forecast(&coords, params.units()).await
}

pub async fn onecall(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    params: Result<Query<WeatherQuery>, QueryRejection>,
) -> Result<Resolved, ApiError> {
    state.admit(client, Scope::OneCall)?;
    let params = query(params)?;
    let coords = params.coordinates()?;
    state.gateway.onecall(&coords, params.units()).await
}

pub async fn air_quality(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    params: Result<Query<WeatherQuery>, QueryRejection>,
) -> Result<Resolved, ApiError> {
    state.admit(client, Scope::AirQuality)?;
    let params = query(params)?;
    let coords = params.coordinates()?;
    state.gateway.air_quality(&coords).await
}

pub async fn geocode(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    params: Result<Query<GeocodeQuery>, QueryRejection>,
) -> Result<Resolved, ApiError> {
    state.admit(client, Scope::Geocode)?;
    let params = query(params)?;
    let query = params.q.unwrap_or_default();
    state.gateway.geocode(&query).await
}

pub async fn weather_summary(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    payload: Result<Json<SummaryRequest>, JsonRejection>,
) -> Result<Resolved, ApiError> {
    state.admit(client, Scope::AiSummary)?;
    let request = body(payload)?;
    let weather = snapshot(request.weather, request.current)
        .ok_or_else(|| ApiError::bad_request("Weather data required"))?;

    state
        .gateway
        .weather_summary(SummaryInput {
            weather,
            hourly: request.hourly,
            daily: request.daily,
            location: location(request.location),
            style: request.style.unwrap_or_else(|| "friendly".to_string()),
        })
        .await
}

pub async fn chat(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Resolved, ApiError> {
    state.admit(client, Scope::AiChat)?;
    let request = body(payload)?;
    let message = request
        .message
        .filter(|message| !message.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Message required"))?;

    state
        .gateway
        .chat(ChatInput {
            message,
            weather: snapshot(request.weather, request.current),
            hourly: request.hourly,
            daily: request.daily,
            location: location(request.location),
            history: request.history,
        })
        .await
}

pub async fn daily_briefing(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    payload: Result<Json<BriefingRequest>, JsonRejection>,
) -> Result<Resolved, ApiError> {
    state.admit(client, Scope::AiBriefing)?;
    let request = body(payload)?;
    let weather = snapshot(request.weather, None)
        .ok_or_else(|| ApiError::bad_request("Weather data required"))?;

    state
        .gateway
        .daily_briefing(BriefingInput {
            weather,
            forecast: request.forecast,
            timezone: request.timezone.unwrap_or_else(|| "UTC".to_string()),
        })
        .await
}

pub async fn get_astronomy(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    params: Result<Query<WeatherQuery>, QueryRejection>,
) -> Result<Json<Astronomy>, ApiError> {
    state.admit(client, Scope::Astronomy)?;
    let params = query(params)?;
    let coords = params.coordinates()?;
    Ok(Json(astronomy::compute(coords.lat_deg, coords.lon_deg, Utc::now())))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/weather/current", get(current_weather))
        .route("/api/weather/forecast", get(forecast))
        .route("/api/weather/onecall", get(onecall))
        .route("/api/weather/air-quality", get(air_quality))
        .route("/api/geocode", get(geocode))
        .route("/api/ai/weather-summary", post(weather_summary))
        .route("/api/ai/chat", post(chat))
        .route("/api/ai/daily-briefing", post(daily_briefing))
        .route("/api/astronomy", get(get_astronomy))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AiClient;
    use crate::cache::{CacheConfig, CacheStore};
    use crate::gateway::DATA_SOURCE_HEADER;
    use crate::rate_limit::{Quota, RateLimitConfig};
    use crate::weather::openweather::OpenWeatherClient;
    use axum::{
        body::{to_bytes, Body},
        extract::connect_info::MockConnectInfo,
        http::{header, Request, StatusCode},
    };
    use serde_json::json;
    use tower::ServiceExt;

    fn state_with(config: Config) -> AppState {
        let gateway = Gateway::new(
            CacheStore::new(&CacheConfig::default()),
            OpenWeatherClient::new(config.clone()).unwrap(),
            AiClient::new(config.clone()).unwrap(),
            config.demo_mode,
        );
        AppState {
            limiter: Arc::new(RateLimiter::new(config.rate_limits.clone())),
            gateway: Arc::new(gateway),
            config: Arc::new(config),
        }
    }

    fn app(state: AppState) -> Router {
        create_router(state).layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 7], 51000))))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_lon_is_bad_request_and_caches_nothing() {
        let state = state_with(Config::default());
        let app = app(state.clone());

        let response = app
            .oneshot(get_request("/api/weather/current?lat=51.5"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["code"], "bad_request");
        assert!(body["timestamp"].is_string());
        assert_eq!(state.gateway.cache_stats().await.weather, 0);
    }

    #[tokio::test]
    async fn test_demo_mode_serves_synthetic_then_cached() {
        let app = app(state_with(Config::default()));
        let uri = "/api/weather/current?lat=48.85&lon=2.35&units=imperial";

        let first = app.clone().oneshot(get_request(uri)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[DATA_SOURCE_HEADER], "synthetic");
        let first_body = to_bytes(first.into_body(), usize::MAX).await.unwrap();

        let second = app.oneshot(get_request(uri)).await.unwrap();
        assert_eq!(second.headers()[DATA_SOURCE_HEADER], "cached");
        let second_body = to_bytes(second.into_body(), usize::MAX).await.unwrap();

        assert_eq!(first_body, second_body);
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_over_quota() {
        let mut config = Config::default();
        config.rate_limits.scopes.insert(Scope::Astronomy, Quota::per_minute(2));
        let app = app(state_with(config));

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(get_request("/api/astronomy?lat=0&lon=0"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(get_request("/api/astronomy?lat=0&lon=0"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        assert_eq!(json_body(response).await["code"], "rate_limited");

        // Other scopes keep their own counters.
        let response = app
            .oneshot(get_request("/api/weather/forecast?lat=0&lon=0"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admission_precedes_validation() {
        let mut config = Config::default();
        config.rate_limits.scopes.insert(Scope::Forecast, Quota::per_minute(1));
        let app = app(state_with(config));

        let response = app
            .clone()
            .oneshot(get_request("/api/weather/forecast?lat=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(get_request("/api/weather/forecast?lat=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_health_is_exempt_from_limits() {
        let config = Config {
            rate_limits: RateLimitConfig {
                global_hourly: Quota::per_hour(1),
                ..RateLimitConfig::default()
            },
            ..Config::default()
        };
        let app = app(state_with(config));

        let response = app
            .clone()
            .oneshot(get_request("/api/astronomy?lat=10&lon=10"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app
            .clone()
            .oneshot(get_request("/api/astronomy?lat=10&lon=10"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        for _ in 0..3 {
            let response = app.clone().oneshot(get_request("/api/health")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_health_reports_services() {
        let config = Config {
            gemini_api_key: Some("g".to_string()),
            demo_mode: false,
            ..Config::default()
        };
        let response = app(state_with(config))
            .oneshot(get_request("/api/health"))
            .await
            .unwrap();

        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["services"]["weather_api"], false);
        assert_eq!(body["services"]["gemini_api"], true);
        assert_eq!(body["demo_mode"], false);
        assert_eq!(body["cache"]["ai_summary"], 0);
    }

    #[tokio::test]
    async fn test_astronomy_validates_coordinates() {
        let app = app(state_with(Config::default()));

        for uri in [
            "/api/astronomy?lat=0",
            "/api/astronomy?lat=north&lon=0",
            "/api/astronomy?lat=91&lon=0",
        ] {
            let response = app.clone().oneshot(get_request(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }

        let response = app
            .oneshot(get_request("/api/astronomy?lat=0&lon=0"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["sun"]["day_length_hours"], 12.0);
        assert!(body["moon"]["phase_name"].is_string());
    }

    #[tokio::test]
    async fn test_ai_endpoints_validate_bodies() {
        let app = app(state_with(Config::default()));

        let response = app
            .clone()
            .oneshot(post_json("/api/ai/weather-summary", r#"{"style": "eli5"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(post_json("/api/ai/chat", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "bad_request");

        let response = app
            .clone()
            .oneshot(post_json("/api/ai/daily-briefing", r#"{"weather": {}}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(post_json(
                "/api/ai/weather-summary",
                r#"{"current": {"temp": 12}, "location": "Oslo"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["code"], "not_configured");
    }

    #[tokio::test]
    async fn test_malformed_query_gets_json_error() {
        let app = app(state_with(Config::default()));

        for uri in [
            "/api/weather/current?lat=1&lat=2&lon=3",
            "/api/geocode?q=a&q=b",
        ] {
            let response = app.clone().oneshot(get_request(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(
                response.headers()[header::CONTENT_TYPE],
                "application/json"
            );
            let body = json_body(response).await;
            assert_eq!(body["code"], "bad_request");
            assert!(body["error"].is_string());
            assert!(body["timestamp"].is_string());
        }
    }

    #[test]
    fn test_snapshot_prefers_weather() {
        assert_eq!(
            snapshot(Some(json!({"temp": 1})), Some(json!({"temp": 2}))),
            Some(json!({"temp": 1}))
        );
        assert_eq!(
            snapshot(Some(json!({})), Some(json!({"temp": 2}))),
            Some(json!({"temp": 2}))
        );
        assert_eq!(snapshot(Some(Value::Null), None), None);
    }
}
