use crate::cache::CacheConfig;
use crate::rate_limit::RateLimitConfig;
use std::env;
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_OPENWEATHER_BASE_URL: &str = "https://api.openweathermap.org";
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid rate limit '{0}', expected e.g. '30/minute'")]
    InvalidQuota(String),
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: String, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub openweather_api_key: Option<String>,
    pub openweather_base_url: String,
    pub openweather_current_path: String,
    pub openweather_forecast_path: String,
    pub openweather_onecall_path: String,
    pub openweather_air_pollution_path: String,
    pub openweather_geocode_direct_path: String,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub demo_mode: bool,
    pub bind_addr: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub rate_limits: RateLimitConfig,
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            openweather_api_key: None,
            openweather_base_url: DEFAULT_OPENWEATHER_BASE_URL.to_string(),
            openweather_current_path: "/data/2.5/weather".to_string(),
            openweather_forecast_path: "/data/2.5/forecast".to_string(),
            openweather_onecall_path: "/data/3.0/onecall".to_string(),
            openweather_air_pollution_path: "/data/2.5/air_pollution".to_string(),
            openweather_geocode_direct_path: "/geo/1.0/direct".to_string(),
            gemini_api_key: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            demo_mode: true,
            bind_addr: "0.0.0.0".to_string(),
            port: 5000,
            cors_origins: vec!["http://localhost:3000".to_string()],
            rate_limits: RateLimitConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Config::default();

        Ok(Config {
            openweather_api_key: secret("OPENWEATHER_API_KEY"),
            openweather_base_url: env::var("OPENWEATHER_BASE_URL")
                .unwrap_or(defaults.openweather_base_url),
            openweather_current_path: env::var("OPENWEATHER_CURRENT_PATH")
                .unwrap_or(defaults.openweather_current_path),
            openweather_forecast_path: env::var("OPENWEATHER_FORECAST_PATH")
                .unwrap_or(defaults.openweather_forecast_path),
            openweather_onecall_path: env::var("OPENWEATHER_ONECALL_PATH")
                .unwrap_or(defaults.openweather_onecall_path),
            openweather_air_pollution_path: env::var("OPENWEATHER_AIR_POLLUTION_PATH")
                .unwrap_or(defaults.openweather_air_pollution_path),
            openweather_geocode_direct_path: env::var("OPENWEATHER_GEOCODE_DIRECT_PATH")
                .unwrap_or(defaults.openweather_geocode_direct_path),
            gemini_api_key: secret("GEMINI_API_KEY"),
            gemini_base_url: env::var("GEMINI_BASE_URL").unwrap_or(defaults.gemini_base_url),
            gemini_model: env::var("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            demo_mode: env::var("DEMO_MODE")
                .map(|value| parse_flag(&value))
                .unwrap_or(defaults.demo_mode),
            bind_addr: env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            port: parse_env("PORT", defaults.port)?,
            cors_origins: env::var("CORS_ORIGINS")
                .map(|value| parse_origins(&value))
                .unwrap_or(defaults.cors_origins),
            rate_limits: RateLimitConfig::from_env()?,
            cache: CacheConfig::from_env()?,
        })
    }

    pub fn weather_configured(&self) -> bool {
        self.openweather_api_key.is_some()
    }

    pub fn gemini_configured(&self) -> bool {
        self.gemini_api_key.is_some()
    }
}

/// Unset and empty credentials are both treated as absent.
fn secret(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Only a literal `true` (any case) enables a flag.
pub fn parse_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

pub fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}
