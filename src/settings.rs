//! Configuration for the aggregator, loaded from environment variables
//! with a `SERP_` prefix — mirrors the original Python implementation's
//! `pydantic-settings` model, translated into an eagerly-validated
//! builder in the style of the aggregator's own builder.
//!
//! Invalid values fail at construction (`Settings::from_env` or
//! `SettingsBuilder::build`), never at first request, per the
//! protocol's configuration contract.

use std::time::Duration;

use crate::error::{SerpError, SerpResult};

/// Cache backend selection (the `cache_backend` setting).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    /// Bounded in-process TTL+LRU cache.
    Memory,
    /// External key/value store (requires the `remote-cache` feature).
    Remote,
}

/// Aggregator-wide configuration.
///
/// All fields have defaults matching the protocol's configuration
/// table except `api_key`, which is required.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bearer credential for the upstream provider.
    pub api_key: String,
    /// Provider zone identifier.
    pub zone: String,
    /// Upstream API base URL.
    pub api_base_url: String,
    /// Default `gl` parameter.
    pub default_country: String,
    /// Default `hl` parameter.
    pub default_language: String,
    /// Default fan-out cap.
    pub default_max_pages: u32,
    /// Default in-flight page cap.
    pub default_concurrency: u32,
    /// Phase B polling cadence.
    pub poll_interval: Duration,
    /// Phase B attempt cap.
    pub max_polls: u32,
    /// Per-HTTP-call deadline.
    pub request_timeout: Duration,
    /// Transport retry cap.
    pub max_retries: u32,
    /// Exponential backoff base.
    pub retry_backoff: f64,
    /// Whether the adaptive rate limiter is engaged.
    pub rate_limit_enabled: bool,
    /// Initial requests-per-second.
    pub rate_limit_rps: f64,
    /// Token bucket depth.
    pub rate_limit_burst: u32,
    /// Whether the result cache is engaged.
    pub cache_enabled: bool,
    /// Cache entry TTL; `0` disables expiry.
    pub cache_ttl: Duration,
    /// Which cache backend to construct.
    pub cache_backend: CacheBackend,
    /// Connection string for the remote cache backend, if used.
    pub remote_cache_url: Option<String>,
    /// Early-stop threshold for consecutive empty pages.
    pub consecutive_empty_limit: u32,
}

impl Settings {
    /// Maximum total polling time: `poll_interval * max_polls`.
    pub fn max_poll_time(&self) -> Duration {
        self.poll_interval * self.max_polls
    }

    /// Load settings from `SERP_*` environment variables, applying
    /// defaults for anything unset and validating every field's
    /// declared range.
    pub fn from_env() -> SerpResult<Self> {
        SettingsBuilder::new().build_from_env()
    }

    /// Start a builder for programmatic configuration (e.g. in tests),
    /// bypassing the environment entirely.
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::new()
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(format!("SERP_{key}")).ok()
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> SerpResult<T> {
    match env_var(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| SerpError::Config(format!("SERP_{key}: cannot parse {raw:?}"))),
    }
}

fn in_range<T: PartialOrd + std::fmt::Display + Copy>(
    field: &str,
    value: T,
    min: T,
    max: T,
) -> SerpResult<T> {
    if value < min || value > max {
        return Err(SerpError::Config(format!(
            "{field} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(value)
}

fn is_lowercase_country(code: &str) -> bool {
    code.len() == 2 && code.chars().all(|c| c.is_ascii_lowercase())
}

fn is_lowercase_language(code: &str) -> bool {
    let (primary, region) = match code.split_once('-') {
        Some((p, r)) => (p, Some(r)),
        None => (code, None),
    };
    let primary_ok = primary.len() == 2 && primary.chars().all(|c| c.is_ascii_lowercase());
    let region_ok = region.map_or(true, |r| r.len() == 2 && r.chars().all(|c| c.is_ascii_lowercase()));
    primary_ok && region_ok
}

/// Builder for [`Settings`], used both by [`Settings::from_env`] and by
/// callers who want to override specific fields without environment
/// variables (tests, embedders with their own config layer).
pub struct SettingsBuilder {
    api_key: Option<String>,
    zone: Option<String>,
    api_base_url: Option<String>,
    default_country: Option<String>,
    default_language: Option<String>,
    default_max_pages: Option<u32>,
    default_concurrency: Option<u32>,
    poll_interval_secs: Option<f64>,
    max_polls: Option<u32>,
    request_timeout_secs: Option<f64>,
    max_retries: Option<u32>,
    retry_backoff: Option<f64>,
    rate_limit_enabled: Option<bool>,
    rate_limit_rps: Option<f64>,
    rate_limit_burst: Option<u32>,
    cache_enabled: Option<bool>,
    cache_ttl_secs: Option<u64>,
    cache_backend: Option<CacheBackend>,
    remote_cache_url: Option<String>,
    consecutive_empty_limit: Option<u32>,
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsBuilder {
    /// Create an empty builder; every field falls back to its
    /// protocol default unless overridden.
    pub fn new() -> Self {
        Self {
            api_key: None,
            zone: None,
            api_base_url: None,
            default_country: None,
            default_language: None,
            default_max_pages: None,
            default_concurrency: None,
            poll_interval_secs: None,
            max_polls: None,
            request_timeout_secs: None,
            max_retries: None,
            retry_backoff: None,
            rate_limit_enabled: None,
            rate_limit_rps: None,
            rate_limit_burst: None,
            cache_enabled: None,
            cache_ttl_secs: None,
            cache_backend: None,
            remote_cache_url: None,
            consecutive_empty_limit: None,
        }
    }

    /// Set the upstream bearer credential directly, overriding
    /// `SERP_API_KEY`.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the provider zone identifier.
    pub fn zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    /// Override the upstream API base URL, e.g. to point at a mock
    /// server in tests.
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Override the default fan-out cap.
    pub fn default_max_pages(mut self, pages: u32) -> Self {
        self.default_max_pages = Some(pages);
        self
    }

    /// Override the default in-flight page cap.
    pub fn default_concurrency(mut self, concurrency: u32) -> Self {
        self.default_concurrency = Some(concurrency);
        self
    }

    /// Override the polling cadence, in seconds.
    pub fn poll_interval_secs(mut self, secs: f64) -> Self {
        self.poll_interval_secs = Some(secs);
        self
    }

    /// Override the polling attempt cap.
    pub fn max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = Some(max_polls);
        self
    }

    /// Enable or disable the adaptive rate limiter.
    pub fn rate_limit_enabled(mut self, enabled: bool) -> Self {
        self.rate_limit_enabled = Some(enabled);
        self
    }

    /// Enable or disable the result cache.
    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = Some(enabled);
        self
    }

    /// Set the cache backend and, for `Remote`, its connection string.
    pub fn cache_backend(mut self, backend: CacheBackend) -> Self {
        self.cache_backend = Some(backend);
        self
    }

    /// Build settings by layering explicit overrides over `SERP_*`
    /// environment variables over protocol defaults, then validating.
    pub fn build_from_env(self) -> SerpResult<Settings> {
        let api_key = self
            .api_key
            .or_else(|| env_var("API_KEY"))
            .ok_or_else(|| SerpError::Config("SERP_API_KEY is required".to_string()))?;
        if api_key.trim().is_empty() {
            return Err(SerpError::Config("SERP_API_KEY cannot be empty".to_string()));
        }

        let zone = self
            .zone
            .or_else(|| env_var("ZONE"))
            .unwrap_or_else(|| "serp_api1".to_string());
        let api_base_url = self
            .api_base_url
            .or_else(|| env_var("API_BASE_URL"))
            .unwrap_or_else(|| "https://api.brightdata.com".to_string());

        let default_country = self
            .default_country
            .or_else(|| env_var("DEFAULT_COUNTRY"))
            .unwrap_or_else(|| "us".to_string());
        if !is_lowercase_country(&default_country) {
            return Err(SerpError::Config(format!(
                "default_country must be two lowercase letters, got {default_country:?}"
            )));
        }

        let default_language = self
            .default_language
            .or_else(|| env_var("DEFAULT_LANGUAGE"))
            .unwrap_or_else(|| "en".to_string());
        if !is_lowercase_language(&default_language) {
            return Err(SerpError::Config(format!(
                "default_language must be two lowercase letters with an optional region suffix, got {default_language:?}"
            )));
        }

        let default_max_pages = in_range(
            "default_max_pages",
            self.default_max_pages
                .map(Ok)
                .unwrap_or_else(|| parse_env("DEFAULT_MAX_PAGES", 25))?,
            1,
            100,
        )?;
        let default_concurrency = in_range(
            "default_concurrency",
            self.default_concurrency
                .map(Ok)
                .unwrap_or_else(|| parse_env("DEFAULT_CONCURRENCY", 50))?,
            1,
            200,
        )?;
        let poll_interval_secs = in_range(
            "poll_interval",
            self.poll_interval_secs
                .map(Ok)
                .unwrap_or_else(|| parse_env("POLL_INTERVAL", 2.0))?,
            0.5,
            10.0,
        )?;
        let max_polls = in_range(
            "max_polls",
            self.max_polls
                .map(Ok)
                .unwrap_or_else(|| parse_env("MAX_POLLS", 20))?,
            1,
            100,
        )?;
        let request_timeout_secs = in_range(
            "request_timeout",
            self.request_timeout_secs
                .map(Ok)
                .unwrap_or_else(|| parse_env("REQUEST_TIMEOUT", 30.0))?,
            5.0,
            120.0,
        )?;
        let max_retries = in_range(
            "max_retries",
            self.max_retries
                .map(Ok)
                .unwrap_or_else(|| parse_env("MAX_RETRIES", 3))?,
            0,
            10,
        )?;
        let retry_backoff = in_range(
            "retry_backoff",
            self.retry_backoff
                .map(Ok)
                .unwrap_or_else(|| parse_env("RETRY_BACKOFF", 2.0))?,
            1.0,
            5.0,
        )?;

        let rate_limit_enabled = self
            .rate_limit_enabled
            .map(Ok)
            .unwrap_or_else(|| parse_env("RATE_LIMIT_ENABLED", true))?;
        let rate_limit_rps = in_range(
            "rate_limit_rps",
            self.rate_limit_rps
                .map(Ok)
                .unwrap_or_else(|| parse_env("RATE_LIMIT_RPS", 5.0))?,
            0.1,
            50.0,
        )?;
        let rate_limit_burst = in_range(
            "rate_limit_burst",
            self.rate_limit_burst
                .map(Ok)
                .unwrap_or_else(|| parse_env("RATE_LIMIT_BURST", 10))?,
            1,
            100,
        )?;

        let cache_enabled = self
            .cache_enabled
            .map(Ok)
            .unwrap_or_else(|| parse_env("CACHE_ENABLED", true))?;
        let cache_ttl_secs = in_range(
            "cache_ttl",
            self.cache_ttl_secs
                .map(Ok)
                .unwrap_or_else(|| parse_env("CACHE_TTL", 3600u64))?,
            0,
            86_400,
        )?;
        let cache_backend = match self.cache_backend {
            Some(b) => b,
            None => match env_var("CACHE_BACKEND").as_deref() {
                None | Some("memory") => CacheBackend::Memory,
                Some("remote") => CacheBackend::Remote,
                Some(other) => {
                    return Err(SerpError::Config(format!(
                        "cache_backend must be \"memory\" or \"remote\", got {other:?}"
                    )))
                }
            },
        };
        let remote_cache_url = self.remote_cache_url.or_else(|| env_var("REMOTE_CACHE_URL"));
        if cache_backend == CacheBackend::Remote && remote_cache_url.is_none() {
            return Err(SerpError::Config(
                "cache_backend=remote requires SERP_REMOTE_CACHE_URL".to_string(),
            ));
        }

        let consecutive_empty_limit = in_range(
            "consecutive_empty_limit",
            self.consecutive_empty_limit
                .map(Ok)
                .unwrap_or_else(|| parse_env("CONSECUTIVE_EMPTY_LIMIT", 3))?,
            1,
            10,
        )?;

        Ok(Settings {
            api_key,
            zone,
            api_base_url,
            default_country,
            default_language,
            default_max_pages,
            default_concurrency,
            poll_interval: Duration::from_secs_f64(poll_interval_secs),
            max_polls,
            request_timeout: Duration::from_secs_f64(request_timeout_secs),
            max_retries,
            retry_backoff,
            rate_limit_enabled,
            rate_limit_rps,
            rate_limit_burst,
            cache_enabled,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            cache_backend,
            remote_cache_url,
            consecutive_empty_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_api_key() {
        let result = Settings::builder().build_from_env();
        assert!(matches!(result, Err(SerpError::Config(_))));
    }

    #[test]
    fn defaults_match_protocol_table() {
        let settings = Settings::builder().api_key("key").build_from_env().unwrap();
        assert_eq!(settings.zone, "serp_api1");
        assert_eq!(settings.default_country, "us");
        assert_eq!(settings.default_language, "en");
        assert_eq!(settings.default_max_pages, 25);
        assert_eq!(settings.default_concurrency, 50);
        assert_eq!(settings.poll_interval, Duration::from_secs_f64(2.0));
        assert_eq!(settings.max_polls, 20);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.rate_limit_rps, 5.0);
        assert_eq!(settings.rate_limit_burst, 10);
        assert_eq!(settings.cache_ttl, Duration::from_secs(3600));
        assert_eq!(settings.consecutive_empty_limit, 3);
    }

    #[test]
    fn rejects_out_of_range_max_pages() {
        let bad = SettingsBuilder {
            api_key: Some("key".to_string()),
            default_max_pages: Some(0),
            ..Settings::builder()
        }
        .build_from_env();
        assert!(matches!(bad, Err(SerpError::Config(_))));
    }

    #[test]
    fn remote_backend_requires_url() {
        let result = Settings::builder()
            .api_key("key")
            .cache_backend(CacheBackend::Remote)
            .build_from_env();
        assert!(matches!(result, Err(SerpError::Config(_))));
    }

    #[test]
    fn max_poll_time_multiplies_interval_by_count() {
        let settings = Settings::builder().api_key("key").build_from_env().unwrap();
        assert_eq!(settings.max_poll_time(), Duration::from_secs(40));
    }
}
