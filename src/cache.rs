//! Tiered in-memory payload cache.
//!
//! Each data class gets its own moka cache with independent capacity and
//! time-to-live. Eviction is least-recently-used in every namespace; expiry is
//! checked on read, so an expired entry is never handed back.

use crate::config::{parse_env, ConfigError};
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;

pub type PayloadCache = Cache<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Weather,
    Forecast,
    AiSummary,
}

impl Namespace {
    pub fn label(&self) -> &'static str {
        match self {
            Namespace::Weather => "weather",
            Namespace::Forecast => "forecast",
            Namespace::AiSummary => "ai_summary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceConfig {
    pub max_entries: u64,
    pub ttl: Duration,
}

impl NamespaceConfig {
    pub const fn new(max_entries: u64, ttl_secs: u64) -> Self {
        Self {
            max_entries,
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    fn from_env(prefix: &str, default: Self) -> Result<Self, ConfigError> {
        let max_entries = parse_env(&format!("{}_CAPACITY", prefix), default.max_entries)?;
        let ttl_secs = parse_env(&format!("{}_TTL_SECS", prefix), default.ttl.as_secs())?;
        Ok(Self::new(max_entries, ttl_secs))
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub weather: NamespaceConfig,
    pub forecast: NamespaceConfig,
    pub ai_summary: NamespaceConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            weather: NamespaceConfig::new(100, 10 * 60),
            forecast: NamespaceConfig::new(100, 30 * 60),
            ai_summary: NamespaceConfig::new(50, 60 * 60),
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            weather: NamespaceConfig::from_env("CACHE_WEATHER", defaults.weather)?,
            forecast: NamespaceConfig::from_env("CACHE_FORECAST", defaults.forecast)?,
            ai_summary: NamespaceConfig::from_env("CACHE_AI_SUMMARY", defaults.ai_summary)?,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub weather: u64,
    pub forecast: u64,
    pub ai_summary: u64,
}

pub struct CacheStore {
    weather: PayloadCache,
    forecast: PayloadCache,
    ai_summary: PayloadCache,
}

impl CacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            weather: build_namespace(Namespace::Weather, config.weather),
            forecast: build_namespace(Namespace::Forecast, config.forecast),
            ai_summary: build_namespace(Namespace::AiSummary, config.ai_summary),
        }
    }

    fn namespace(&self, namespace: Namespace) -> &PayloadCache {
        match namespace {
            Namespace::Weather => &self.weather,
            Namespace::Forecast => &self.forecast,
            Namespace::AiSummary => &self.ai_summary,
        }
    }

    pub async fn get(&self, namespace: Namespace, key: &str) -> Option<Value> {
        self.namespace(namespace).get(key).await
    }

    pub async fn put(&self, namespace: Namespace, key: String, value: Value) {
        self.namespace(namespace).insert(key, value).await;
    }

    /// Applies pending evictions so entry counts are exact.
    pub async fn sync(&self) {
        self.weather.run_pending_tasks().await;
        self.forecast.run_pending_tasks().await;
        self.ai_summary.run_pending_tasks().await;
    }

    /// Entry counts are eventually consistent between `sync` calls.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            weather: self.weather.entry_count(),
            forecast: self.forecast.entry_count(),
            ai_summary: self.ai_summary.entry_count(),
        }
    }
}

fn build_namespace(namespace: Namespace, config: NamespaceConfig) -> PayloadCache {
    Cache::builder()
        .name(namespace.label())
        .max_capacity(config.max_entries)
        .time_to_live(config.ttl)
        .eviction_policy(EvictionPolicy::lru())
        .build()
}

/// Key for a coordinate-addressed weather payload, e.g. `current_51.5_-0.12_metric`.
/// Coordinates are used exactly as the caller supplied them.
pub fn weather_key(prefix: &str, lat: &str, lon: &str, units: Option<&str>) -> String {
    match units {
        Some(units) => format!("{}_{}_{}_{}", prefix, lat, lon, units),
        None => format!("{}_{}_{}", prefix, lat, lon),
    }
}

/// Content-derived key for an AI narrative: identical weather objects hash the
/// same regardless of field order.
pub fn ai_summary_key(weather: &Value, style: &str) -> String {
    let digest = Sha256::digest(canonical_json(weather).as_bytes());
    format!("summary_{}_{}", hex::encode(digest), style)
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
