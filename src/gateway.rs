//! Per-endpoint resolution: cache, then upstream, then (for current weather
//! and forecast in demo mode only) a synthetic stand-in. Rate-limit admission
//! has already happened by the time anything here runs.

use crate::ai::{self, AiClient, BriefingInput, ChatInput, SummaryInput};
use crate::cache::{ai_summary_key, weather_key, CacheStats, CacheStore, Namespace};
use crate::error::{ApiError, UpstreamError};
use crate::utils::validate_coordinates;
use crate::weather::fallback;
use crate::weather::openweather::{OpenWeatherClient, WeatherEndpoint};
use axum::{
    http::{HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

pub const DATA_SOURCE_HEADER: HeaderName = HeaderName::from_static("x-data-source");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Cached,
    Live,
    Synthetic,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Cached => "cached",
            DataSource::Live => "live",
            DataSource::Synthetic => "synthetic",
        }
    }
}

/// A response body together with where it came from.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub payload: Value,
    pub source: DataSource,
}

impl IntoResponse for Resolved {
    fn into_response(self) -> Response {
        let mut response = Json(self.payload).into_response();
        response.headers_mut().insert(
            DATA_SOURCE_HEADER,
            HeaderValue::from_static(self.source.as_str()),
        );
        response
    }
}

/// Caller-supplied coordinates. The raw strings feed cache keys, the parsed
/// values feed the synthesizer.
#[derive(Debug, Clone)]
pub struct Coordinates {
    pub lat: String,
    pub lon: String,
    pub lat_deg: f64,
    pub lon_deg: f64,
}

impl Coordinates {
    pub fn parse(lat: Option<&str>, lon: Option<&str>) -> Result<Self, ApiError> {
        let (lat, lon) = match (lat, lon) {
            (Some(lat), Some(lon)) if !lat.trim().is_empty() && !lon.trim().is_empty() => {
                (lat, lon)
            }
            _ => return Err(ApiError::bad_request("lat and lon parameters required")),
        };

        let lat_deg = parse_degrees("lat", lat)?;
        let lon_deg = parse_degrees("lon", lon)?;
        validate_coordinates(lat_deg, lon_deg).map_err(ApiError::BadRequest)?;

        Ok(Self {
            lat: lat.to_string(),
            lon: lon.to_string(),
            lat_deg,
            lon_deg,
        })
    }
}

fn parse_degrees(name: &str, raw: &str) -> Result<f64, ApiError> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ApiError::bad_request(format!("{} must be a number, got {:?}", name, raw))),
    }
}

#[derive(Debug, Clone, Copy)]
enum Synthetic {
    Current,
    Forecast,
}

struct WeatherRequest<'a> {
    endpoint: WeatherEndpoint,
    namespace: Namespace,
    key: String,
    params: Vec<(&'a str, &'a str)>,
    fallback: Option<Synthetic>,
}

pub struct Gateway {
    cache: CacheStore,
    weather: OpenWeatherClient,
    ai: AiClient,
    demo_mode: bool,
    rng: Mutex<StdRng>,
}

impl Gateway {
    pub fn new(cache: CacheStore, weather: OpenWeatherClient, ai: AiClient, demo_mode: bool) -> Self {
        Self {
            cache,
            weather,
            ai,
            demo_mode,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replaces the synthesizer's random source.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn demo_mode(&self) -> bool {
        self.demo_mode
    }

    /// Entry counts after pending evictions have been applied.
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.sync().await;
        self.cache.stats()
    }

    pub async fn current_weather(&self, coords: &Coordinates, units: &str) -> Result<Resolved, ApiError> {
        self.resolve_weather(
            WeatherRequest {
                endpoint: WeatherEndpoint::Current,
                namespace: Namespace::Weather,
                key: weather_key("current", &coords.lat, &coords.lon, Some(units)),
                params: vec![("lat", coords.lat.as_str()), ("lon", coords.lon.as_str()), ("units", units)],
                fallback: Some(Synthetic::Current),
            },
            coords,
            units,
        )
        .await
    }

    pub async fn forecast(&self, coords: &Coordinates, units: &str) -> Result<Resolved, ApiError> {
        self.resolve_weather(
            WeatherRequest {
                endpoint: WeatherEndpoint::Forecast,
                namespace: Namespace::Forecast,
                key: weather_key("forecast", &coords.lat, &coords.lon, Some(units)),
                params: vec![("lat", coords.lat.as_str()), ("lon", coords.lon.as_str()), ("units", units)],
                fallback: Some(Synthetic::Forecast),
            },
            coords,
            units,
        )
        .await
    }

    pub async fn onecall(&self, coords: &Coordinates, units: &str) -> Result<Resolved, ApiError> {
        self.resolve_weather(
            WeatherRequest {
                endpoint: WeatherEndpoint::OneCall,
                namespace: Namespace::Forecast,
                key: weather_key("onecall", &coords.lat, &coords.lon, Some(units)),
                params: vec![("lat", coords.lat.as_str()), ("lon", coords.lon.as_str()), ("units", units)],
                fallback: None,
            },
            coords,
            units,
        )
        .await
    }

    pub async fn air_quality(&self, coords: &Coordinates) -> Result<Resolved, ApiError> {
        self.resolve_weather(
            WeatherRequest {
                endpoint: WeatherEndpoint::AirQuality,
                namespace: Namespace::Weather,
                key: weather_key("air", &coords.lat, &coords.lon, None),
                params: vec![("lat", coords.lat.as_str()), ("lon", coords.lon.as_str())],
                fallback: None,
            },
            coords,
            "metric",
        )
        .await
    }

    /// Location search. Never cached, never synthesized.
    pub async fn geocode(&self, query: &str) -> Result<Resolved, ApiError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ApiError::bad_request("q parameter required"));
        }

        let payload = self
            .weather
            .fetch(WeatherEndpoint::Geocode, &[("q", query)])
            .await
            .map_err(|err| surface(WeatherEndpoint::Geocode.label(), err))?;

        info!(endpoint = "geocode", source = "live", "served geocode results");
        Ok(Resolved {
            payload,
            source: DataSource::Live,
        })
    }

    async fn resolve_weather(
        &self,
        request: WeatherRequest<'_>,
        coords: &Coordinates,
        units: &str,
    ) -> Result<Resolved, ApiError> {
        let endpoint = request.endpoint.label();

        if let Some(payload) = self.cache.get(request.namespace, &request.key).await {
            debug!(endpoint, key = %request.key, source = "cached", "cache hit");
            return Ok(Resolved {
                payload,
                source: DataSource::Cached,
            });
        }

        let (payload, source) = match self.weather.fetch(request.endpoint, &request.params).await {
            Ok(payload) => (payload, DataSource::Live),
            Err(err) => match request.fallback {
                Some(kind) if self.demo_mode => {
                    warn!(
                        endpoint,
                        key = %request.key,
                        reason = err.reason(),
                        "upstream unavailable, serving synthetic data: {}",
                        err
                    );
                    (self.synthesize(kind, coords, units)?, DataSource::Synthetic)
                }
                _ => return Err(surface(endpoint, err)),
            },
        };

        self.cache
            .put(request.namespace, request.key.clone(), payload.clone())
            .await;
        info!(endpoint, key = %request.key, source = source.as_str(), "resolved weather payload");

        Ok(Resolved { payload, source })
    }

    fn synthesize(&self, kind: Synthetic, coords: &Coordinates, units: &str) -> Result<Value, ApiError> {
        let now = Utc::now();
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let value = match kind {
            Synthetic::Current => serde_json::to_value(fallback::synthesize_current(
                &mut *rng,
                coords.lat_deg,
                coords.lon_deg,
                units,
                now,
            )),
            Synthetic::Forecast => serde_json::to_value(fallback::synthesize_forecast(
                &mut *rng,
                coords.lat_deg,
                coords.lon_deg,
                units,
                now,
            )),
        };

        value.map_err(|e| ApiError::Upstream(format!("failed to build synthetic payload: {}", e)))
    }

    /// AI narrative for a weather snapshot, shared across callers by content.
    pub async fn weather_summary(&self, input: SummaryInput) -> Result<Resolved, ApiError> {
        let key = ai_summary_key(&input.weather, &input.style);

        if let Some(Value::String(summary)) = self.cache.get(Namespace::AiSummary, &key).await {
            debug!(endpoint = "ai_summary", key = %key, source = "cached", "cache hit");
            return Ok(Resolved {
                payload: json!({ "summary": summary }),
                source: DataSource::Cached,
            });
        }

        let prompt = ai::build_summary_prompt(&input);
        let summary = self
            .ai
            .generate(&prompt)
            .await
            .map_err(|err| surface("ai_summary", err))?;

        self.cache
            .put(Namespace::AiSummary, key.clone(), Value::String(summary.clone()))
            .await;
        info!(endpoint = "ai_summary", key = %key, style = %input.style, source = "live", "generated summary");

        Ok(Resolved {
            payload: json!({ "summary": summary }),
            source: DataSource::Live,
        })
    }

    pub async fn chat(&self, input: ChatInput) -> Result<Resolved, ApiError> {
        let prompt = ai::build_chat_prompt(&input);
        let response = self
            .ai
            .generate(&prompt)
            .await
            .map_err(|err| surface("ai_chat", err))?;

        info!(endpoint = "ai_chat", history = input.history.len(), source = "live", "answered chat");
        Ok(Resolved {
            payload: json!({ "response": response }),
            source: DataSource::Live,
        })
    }

    pub async fn daily_briefing(&self, input: BriefingInput) -> Result<Resolved, ApiError> {
        let prompt = ai::build_briefing_prompt(&input, Utc::now());
        let briefing = self
            .ai
            .generate(&prompt)
            .await
            .map_err(|err| surface("ai_briefing", err))?;

        info!(endpoint = "ai_briefing", timezone = %input.timezone, source = "live", "generated briefing");
        Ok(Resolved {
            payload: json!({ "briefing": briefing }),
            source: DataSource::Live,
        })
    }
}

fn surface(endpoint: &str, err: UpstreamError) -> ApiError {
    match &err {
        UpstreamError::NotConfigured(service) => {
            warn!(endpoint, "{} not configured", service);
        }
        _ => {
            error!(
                endpoint,
                reason = err.reason(),
                retryable = err.is_retryable(),
                "upstream call failed: {}",
                err
            );
        }
    }
    err.into()
}
