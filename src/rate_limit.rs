//! Fixed-window request quotas per client identity.
//!
//! Every admitted request consumes one unit from its endpoint scope and one
//! unit from each global ceiling. All buckets belonging to one identity live
//! behind a single `DashMap` shard entry, so the check-then-increment for a
//! request is atomic with respect to other requests from the same client.

use crate::config::ConfigError;
use dashmap::DashMap;
use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const PRUNE_EVERY: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    CurrentWeather,
    Forecast,
    OneCall,
    AirQuality,
    Geocode,
    AiSummary,
    AiChat,
    AiBriefing,
    Astronomy,
}

impl Scope {
    pub const ALL: [Scope; 9] = [
        Scope::CurrentWeather,
        Scope::Forecast,
        Scope::OneCall,
        Scope::AirQuality,
        Scope::Geocode,
        Scope::AiSummary,
        Scope::AiChat,
        Scope::AiBriefing,
        Scope::Astronomy,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Scope::CurrentWeather => "current_weather",
            Scope::Forecast => "forecast",
            Scope::OneCall => "onecall",
            Scope::AirQuality => "air_quality",
            Scope::Geocode => "geocode",
            Scope::AiSummary => "ai_summary",
            Scope::AiChat => "ai_chat",
            Scope::AiBriefing => "ai_briefing",
            Scope::Astronomy => "astronomy",
        }
    }

    fn default_quota(&self) -> Quota {
        match self {
            Scope::CurrentWeather => Quota::per_minute(30),
            Scope::Forecast => Quota::per_minute(20),
            Scope::OneCall => Quota::per_minute(15),
            Scope::AirQuality => Quota::per_minute(20),
            Scope::Geocode => Quota::per_minute(30),
            Scope::AiSummary => Quota::per_minute(10),
            Scope::AiChat => Quota::per_minute(20),
            Scope::AiBriefing => Quota::per_minute(5),
            Scope::Astronomy => Quota::per_minute(30),
        }
    }

    fn env_var(&self) -> String {
        format!("RATE_LIMIT_{}", self.label().to_uppercase())
    }
}

/// `limit` requests per `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub period: Duration,
}

impl Quota {
    pub const fn new(limit: u32, period: Duration) -> Self {
        Self { limit, period }
    }

    pub const fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub const fn per_hour(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60 * 60))
    }

    pub const fn per_day(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(24 * 60 * 60))
    }

    /// Parses `30/minute`, `30 per minute` or `200/day`.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidQuota(input.to_string());
        let normalized = input.trim().to_lowercase();

        let (count, period) = normalized
            .split_once('/')
            .or_else(|| normalized.split_once(" per "))
            .ok_or_else(invalid)?;

        let limit: u32 = count.trim().parse().map_err(|_| invalid())?;
        let period = match period.trim().trim_end_matches('s') {
            "second" => Duration::from_secs(1),
            "minute" => Duration::from_secs(60),
            "hour" => Duration::from_secs(60 * 60),
            "day" => Duration::from_secs(24 * 60 * 60),
            _ => return Err(invalid()),
        };

        Ok(Self::new(limit, period))
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub scopes: HashMap<Scope, Quota>,
    pub global_daily: Quota,
    pub global_hourly: Quota,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            scopes: Scope::ALL
                .iter()
                .map(|scope| (*scope, scope.default_quota()))
                .collect(),
            global_daily: Quota::per_day(200),
            global_hourly: Quota::per_hour(50),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for scope in Scope::ALL {
            if let Ok(value) = env::var(scope.env_var()) {
                config.scopes.insert(scope, Quota::parse(&value)?);
            }
        }
        if let Ok(value) = env::var("RATE_LIMIT_GLOBAL_DAILY") {
            config.global_daily = Quota::parse(&value)?;
        }
        if let Ok(value) = env::var("RATE_LIMIT_GLOBAL_HOURLY") {
            config.global_hourly = Quota::parse(&value)?;
        }

        Ok(config)
    }

    fn quota(&self, scope: Scope) -> Quota {
        self.scopes
            .get(&scope)
            .copied()
            .unwrap_or_else(|| scope.default_quota())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Denied {
        scope: &'static str,
        retry_after: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Bucket {
    Endpoint(Scope),
    GlobalHourly,
    GlobalDaily,
}

impl Bucket {
    fn label(&self) -> &'static str {
        match self {
            Bucket::Endpoint(scope) => scope.label(),
            Bucket::GlobalHourly => "global_hourly",
            Bucket::GlobalDaily => "global_daily",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

impl Window {
    fn roll(&mut self, now: Instant, period: Duration) {
        if now.saturating_duration_since(self.started) >= period {
            self.started = now;
            self.count = 0;
        }
    }

    fn expired(&self, now: Instant, period: Duration) -> bool {
        now.saturating_duration_since(self.started) >= period
    }
}

#[derive(Debug, Default)]
struct ClientWindows {
    windows: HashMap<Bucket, Window>,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    clients: DashMap<String, ClientWindows>,
    admissions: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
            admissions: AtomicU64::new(0),
        }
    }

    pub fn admit(&self, identity: &str, scope: Scope) -> Decision {
        self.admit_at(identity, scope, Instant::now())
    }

    pub(crate) fn admit_at(&self, identity: &str, scope: Scope, now: Instant) -> Decision {
        let buckets = [
            (Bucket::Endpoint(scope), self.config.quota(scope)),
            (Bucket::GlobalHourly, self.config.global_hourly),
            (Bucket::GlobalDaily, self.config.global_daily),
        ];

        let decision = {
            let mut client = self.clients.entry(identity.to_string()).or_default();
            let mut denied: Option<(Bucket, Duration)> = None;

            for (bucket, quota) in &buckets {
                let window = client.windows.entry(*bucket).or_insert(Window {
                    started: now,
                    count: 0,
                });
                window.roll(now, quota.period);

                if window.count >= quota.limit {
                    let wait = quota
                        .period
                        .saturating_sub(now.saturating_duration_since(window.started));
                    if denied.map_or(true, |(_, longest)| wait > longest) {
                        denied = Some((*bucket, wait));
                    }
                }
            }

            match denied {
                Some((bucket, retry_after)) => Decision::Denied {
                    scope: bucket.label(),
                    retry_after,
                },
                None => {
                    let mut remaining = u32::MAX;
                    for (bucket, quota) in &buckets {
                        if let Some(window) = client.windows.get_mut(bucket) {
                            window.count += 1;
                            remaining = remaining.min(quota.limit.saturating_sub(window.count));
                        }
                    }
                    Decision::Allowed { remaining }
                }
            }
        };

        if self.admissions.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune(now);
        }

        decision
    }

    /// Drops clients whose every window has fully elapsed.
    pub fn prune(&self, now: Instant) {
        let before = self.clients.len();
        self.clients.retain(|_, client| {
            client.windows.iter().any(|(bucket, window)| {
                let period = match bucket {
                    Bucket::Endpoint(scope) => self.config.quota(*scope).period,
                    Bucket::GlobalHourly => self.config.global_hourly.period,
                    Bucket::GlobalDaily => self.config.global_daily.period,
                };
                !window.expired(now, period)
            })
        });
        let pruned = before.saturating_sub(self.clients.len());
        if pruned > 0 {
            tracing::debug!(pruned, tracked = self.tracked_clients(), "Pruned idle rate-limit windows");
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with(scope: Scope, quota: Quota) -> RateLimiter {
        let mut config = RateLimitConfig::default();
        config.scopes.insert(scope, quota);
        RateLimiter::new(config)
    }

    #[test]
    fn test_parse_quota() {
        assert_eq!(Quota::parse("30/minute").unwrap(), Quota::per_minute(30));
        assert_eq!(Quota::parse("200 per day").unwrap(), Quota::per_day(200));
        assert_eq!(Quota::parse(" 50 / Hours ").unwrap(), Quota::per_hour(50));
        assert!(Quota::parse("fast").is_err());
        assert!(Quota::parse("10/fortnight").is_err());
        assert!(Quota::parse("-1/minute").is_err());
    }

    #[test]
    fn test_default_quotas() {
        let config = RateLimitConfig::default();
        assert_eq!(config.quota(Scope::CurrentWeather), Quota::per_minute(30));
        assert_eq!(config.quota(Scope::AiBriefing), Quota::per_minute(5));
        assert_eq!(config.global_daily, Quota::per_day(200));
        assert_eq!(config.global_hourly, Quota::per_hour(50));
    }

    #[test]
    fn test_denies_after_limit_and_resets_next_window() {
        let limiter = limiter_with(Scope::Forecast, Quota::per_minute(3));
        let start = Instant::now();

        for _ in 0..3 {
            assert!(limiter.admit_at("10.0.0.1", Scope::Forecast, start).is_allowed());
        }

        match limiter.admit_at("10.0.0.1", Scope::Forecast, start + Duration::from_secs(20)) {
            Decision::Denied { scope, retry_after } => {
                assert_eq!(scope, "forecast");
                assert_eq!(retry_after, Duration::from_secs(40));
            }
            other => panic!("expected denial, got {:?}", other),
        }

        let next_window = start + Duration::from_secs(61);
        assert!(limiter.admit_at("10.0.0.1", Scope::Forecast, next_window).is_allowed());
    }

    #[test]
    fn test_scopes_and_clients_are_independent() {
        let limiter = limiter_with(Scope::AiBriefing, Quota::per_minute(1));
        let now = Instant::now();

        assert!(limiter.admit_at("a", Scope::AiBriefing, now).is_allowed());
        assert!(!limiter.admit_at("a", Scope::AiBriefing, now).is_allowed());
        assert!(limiter.admit_at("a", Scope::AiChat, now).is_allowed());
        assert!(limiter.admit_at("b", Scope::AiBriefing, now).is_allowed());
    }

    #[test]
    fn test_global_ceiling_applies_across_scopes() {
        let mut config = RateLimitConfig::default();
        config.global_hourly = Quota::per_hour(2);
        let limiter = RateLimiter::new(config);
        let now = Instant::now();

        assert!(limiter.admit_at("c", Scope::CurrentWeather, now).is_allowed());
        assert!(limiter.admit_at("c", Scope::Geocode, now).is_allowed());
        match limiter.admit_at("c", Scope::Astronomy, now) {
            Decision::Denied { scope, .. } => assert_eq!(scope, "global_hourly"),
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn test_denial_consumes_nothing() {
        let mut config = RateLimitConfig::default();
        config.scopes.insert(Scope::OneCall, Quota::per_minute(1));
        config.global_hourly = Quota::per_hour(3);
        let limiter = RateLimiter::new(config);
        let now = Instant::now();

        assert!(limiter.admit_at("d", Scope::OneCall, now).is_allowed());
        // Denied on the endpoint scope; the hourly ceiling must not be charged.
        for _ in 0..5 {
            assert!(!limiter.admit_at("d", Scope::OneCall, now).is_allowed());
        }
        assert!(limiter.admit_at("d", Scope::Forecast, now).is_allowed());
        assert!(limiter.admit_at("d", Scope::Forecast, now).is_allowed());
        assert!(!limiter.admit_at("d", Scope::Forecast, now).is_allowed());
    }

    #[test]
    fn test_remaining_reports_tightest_bucket() {
        let limiter = limiter_with(Scope::Geocode, Quota::per_minute(4));
        match limiter.admit_at("e", Scope::Geocode, Instant::now()) {
            Decision::Allowed { remaining } => assert_eq!(remaining, 3),
            other => panic!("expected allowance, got {:?}", other),
        }
    }

    #[test]
    fn test_concurrent_admissions_never_exceed_limit() {
        use std::sync::Arc;

        let limiter = Arc::new(limiter_with(Scope::AiSummary, Quota::per_minute(10)));
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..5)
                        .filter(|_| limiter.admit_at("f", Scope::AiSummary, now).is_allowed())
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 10);
    }

    #[test]
    fn test_prune_drops_idle_clients() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let start = Instant::now();
        limiter.admit_at("g", Scope::Astronomy, start);
        assert_eq!(limiter.tracked_clients(), 1);

        limiter.prune(start + Duration::from_secs(60 * 60));
        assert_eq!(limiter.tracked_clients(), 1);

        limiter.prune(start + Duration::from_secs(24 * 60 * 60));
        assert_eq!(limiter.tracked_clients(), 0);
    }
}
