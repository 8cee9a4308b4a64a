//! The public entry point: [`Aggregator`], its builder, and the
//! one-off convenience functions built on top of it.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::{generate_cache_key, InMemoryCache, NullCache, ResultCache};
use crate::error::{SerpError, SerpResult};
use crate::fetcher::UpstreamFetcher;
use crate::models::{BatchResult, QueryTiming, SearchParams, SearchResult};
use crate::progress::{NullProgress, ProgressReporter};
use crate::rate_limiter::{AdaptiveRateLimiter, NullRateLimiter, RateLimiter};
use crate::retry::RetryPolicy;
use crate::scheduler::PageScheduler;
use crate::settings::{CacheBackend, Settings};

/// Per-call overrides for a single [`Aggregator::search`], falling
/// back to the aggregator's configured defaults when omitted.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub max_pages: Option<u32>,
    pub concurrency: Option<u32>,
    pub country: Option<String>,
    pub language: Option<String>,
    pub use_cache: bool,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self {
            use_cache: true,
            ..Default::default()
        }
    }

    pub fn max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }
}

/// Async SERP aggregator client: fans a query out across pages,
/// dedupes, caches, and paces requests against the upstream provider.
///
/// `reqwest::Client` is already a pooled, cheaply-cloneable handle, so
/// there is no separate socket-open step: [`Aggregator::connect`] is
/// the validating constructor, and dropping the aggregator is enough
/// to release its resources.
pub struct Aggregator {
    settings: Settings,
    progress: Arc<dyn ProgressReporter>,
    cache: Arc<dyn ResultCache>,
    rate_limiter: Arc<dyn RateLimiter>,
    http: reqwest::Client,
}

impl Aggregator {
    /// Build and validate an aggregator from environment-derived
    /// settings, the way `connect()` opens the original's HTTP session.
    pub async fn connect() -> SerpResult<Self> {
        AggregatorBuilder::new().connect().await
    }

    /// Start a builder for explicit configuration.
    pub fn builder() -> AggregatorBuilder {
        AggregatorBuilder::new()
    }

    fn scheduler(&self) -> PageScheduler {
        let fetcher = UpstreamFetcher::new(
            self.http.clone(),
            self.settings.api_base_url.clone(),
            self.settings.api_key.clone(),
            self.settings.zone.clone(),
            self.settings.request_timeout,
            self.settings.poll_interval,
            self.settings.max_polls,
            RetryPolicy::new(self.settings.max_retries as usize)
                .with_backoff_multiplier(self.settings.retry_backoff),
            Arc::clone(&self.rate_limiter),
        );
        PageScheduler::new(Arc::new(fetcher), self.settings.consecutive_empty_limit)
    }

    /// Execute a single search query, consulting the cache first and
    /// populating it afterward unless the result contains errors.
    pub async fn search(&self, query: &str, options: SearchOptions) -> SerpResult<SearchResult> {
        self.search_cancellable(query, options, &CancellationToken::new()).await
    }

    /// Like [`Aggregator::search`], but cooperatively cancellable via
    /// the given token.
    pub async fn search_cancellable(
        &self,
        query: &str,
        options: SearchOptions,
        cancel: &CancellationToken,
    ) -> SerpResult<SearchResult> {
        let max_pages = options.max_pages.unwrap_or(self.settings.default_max_pages);
        let concurrency = options.concurrency.unwrap_or(self.settings.default_concurrency);
        let country = options.country.unwrap_or_else(|| self.settings.default_country.clone());
        let language = options.language.unwrap_or_else(|| self.settings.default_language.clone());

        // Validate before any work is issued (spec: ValidationError raises
        // up front, never after a request has gone out).
        let params = SearchParams::builder(query)
            .country(country)
            .language(language)
            .max_pages(max_pages)
            .concurrency(concurrency)
            .build()?;

        let cache_key = generate_cache_key(params.query(), params.country(), params.language(), params.max_pages());

        if options.use_cache {
            if let Some(cached) = self.cache.get(&cache_key).await? {
                self.progress.on_cache_hit(params.query());
                return Ok(cached);
            }
        }

        let result = self
            .scheduler()
            .run(
                params.query(),
                params.country(),
                params.language(),
                params.max_pages(),
                params.concurrency(),
                self.progress.as_ref(),
                cancel,
            )
            .await;

        if options.use_cache && !result.has_errors() {
            self.cache.set(&cache_key, result.clone(), None).await?;
        }

        Ok(result)
    }

    /// Execute several queries one after another, reusing this
    /// aggregator's cache/rate limiter/progress reporter throughout.
    pub async fn search_batch(&self, queries: &[String], options: SearchOptions) -> SerpResult<BatchResult> {
        let started = Instant::now();
        let mut batch = BatchResult::default();
        batch.queries = queries.to_vec();

        for query in queries {
            let query = query.trim();
            if query.is_empty() {
                continue;
            }

            let query_started = Instant::now();
            let result = self.search(query, options.clone()).await?;
            let elapsed = query_started.elapsed().as_secs_f64();

            batch.total_organic += result.organic.len();
            batch.query_timings.push(QueryTiming {
                query: query.to_string(),
                elapsed_seconds: elapsed,
                result_count: result.organic.len(),
                pages_fetched: result.pages_fetched,
                errors: result.errors.len(),
            });
            batch.timing.insert(query.to_string(), elapsed);
            batch.results.insert(query.to_string(), result);
        }

        batch.total_elapsed_seconds = started.elapsed().as_secs_f64();
        Ok(batch)
    }

    /// Execute several queries concurrently, bounded by
    /// `max_parallel_queries` simultaneous queries.
    pub async fn search_parallel(
        &self,
        queries: &[String],
        options: SearchOptions,
        max_parallel_queries: usize,
    ) -> SerpResult<BatchResult> {
        use futures::stream::{self, StreamExt};

        let started = Instant::now();
        let cleaned: Vec<String> = queries
            .iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();

        let outcomes: Vec<(String, SerpResult<SearchResult>, f64)> = stream::iter(cleaned.iter().cloned())
            .map(|query| {
                let options = options.clone();
                async move {
                    let query_started = Instant::now();
                    let result = self.search(&query, options).await;
                    (query, result, query_started.elapsed().as_secs_f64())
                }
            })
            .buffer_unordered(max_parallel_queries.max(1))
            .collect()
            .await;

        let mut batch = BatchResult::default();
        batch.queries = queries.to_vec();

        for (query, result, elapsed) in outcomes {
            let result = match result {
                Ok(result) => result,
                Err(_) => continue,
            };
            batch.total_organic += result.organic.len();
            batch.query_timings.push(QueryTiming {
                query: query.clone(),
                elapsed_seconds: elapsed,
                result_count: result.organic.len(),
                pages_fetched: result.pages_fetched,
                errors: result.errors.len(),
            });
            batch.timing.insert(query.clone(), elapsed);
            batch.results.insert(query, result);
        }

        batch.total_elapsed_seconds = started.elapsed().as_secs_f64();
        Ok(batch)
    }

    /// Stream results as each query in `queries` completes, in the
    /// order given (not completion order — each query is a full
    /// fan-out/merge, so streaming here is about not waiting for the
    /// whole batch rather than about out-of-order delivery).
    #[cfg(feature = "streaming")]
    pub fn search_stream<'a>(
        &'a self,
        queries: &'a [String],
        options: SearchOptions,
    ) -> impl futures::Stream<Item = (String, SerpResult<SearchResult>)> + 'a {
        futures::stream::unfold(0usize, move |idx| {
            let options = options.clone();
            async move {
                let mut idx = idx;
                loop {
                    let query = queries.get(idx)?.trim().to_string();
                    idx += 1;
                    if query.is_empty() {
                        continue;
                    }
                    let result = self.search(&query, options.clone()).await;
                    return Some(((query, result), idx));
                }
            }
        })
    }

    pub fn cache(&self) -> &Arc<dyn ResultCache> {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.rate_limiter
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

/// Builder for [`Aggregator`]: plug points default from `settings`
/// when not overridden, and `connect()` validates and constructs.
pub struct AggregatorBuilder {
    settings: Option<Settings>,
    progress: Option<Arc<dyn ProgressReporter>>,
    cache: Option<Arc<dyn ResultCache>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
}

impl Default for AggregatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregatorBuilder {
    pub fn new() -> Self {
        Self {
            settings: None,
            progress: None,
            cache: None,
            rate_limiter: None,
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// Validate settings (loading from the environment if none were
    /// supplied), build the shared HTTP client, and construct the
    /// plug points that weren't explicitly overridden.
    pub async fn connect(self) -> SerpResult<Aggregator> {
        let settings = match self.settings {
            Some(settings) => settings,
            None => Settings::from_env()?,
        };

        let progress: Arc<dyn ProgressReporter> = self.progress.unwrap_or_else(|| Arc::new(NullProgress));

        let cache: Arc<dyn ResultCache> = match self.cache {
            Some(cache) => cache,
            None if settings.cache_enabled => match settings.cache_backend {
                CacheBackend::Memory => Arc::new(InMemoryCache::new(settings.cache_ttl, 1000)),
                #[cfg(feature = "remote-cache")]
                CacheBackend::Remote => {
                    let url = settings.remote_cache_url.clone().ok_or_else(|| {
                        SerpError::Config("remote cache backend selected without a URL".to_string())
                    })?;
                    Arc::new(crate::cache::RemoteCache::new(&url, settings.cache_ttl)?)
                }
                #[cfg(not(feature = "remote-cache"))]
                CacheBackend::Remote => {
                    return Err(SerpError::Config(
                        "cache_backend=remote requires the remote-cache feature".to_string(),
                    ))
                }
            },
            None => Arc::new(NullCache::new()),
        };

        let rate_limiter: Arc<dyn RateLimiter> = match self.rate_limiter {
            Some(limiter) => limiter,
            None if settings.rate_limit_enabled => Arc::new(AdaptiveRateLimiter::new(
                settings.rate_limit_rps,
                settings.rate_limit_burst,
            )),
            None => Arc::new(NullRateLimiter::new()),
        };

        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(SerpError::Transport)?;

        info!(zone = %settings.zone, "aggregator connected");

        Ok(Aggregator {
            settings,
            progress,
            cache,
            rate_limiter,
            http,
        })
    }
}

/// Convenience function for a one-off search: builds a short-lived
/// [`Aggregator`] from environment settings and runs a single query.
pub async fn search(query: &str, options: SearchOptions) -> SerpResult<SearchResult> {
    let aggregator = Aggregator::connect().await?;
    aggregator.search(query, options).await
}

/// Convenience function for a one-off batch search.
pub async fn search_batch(queries: &[String], options: SearchOptions) -> SerpResult<BatchResult> {
    let aggregator = Aggregator::connect().await?;
    aggregator.search_batch(queries, options).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_options_default_to_cache_enabled() {
        let options = SearchOptions::new();
        assert!(options.use_cache);
        assert!(options.max_pages.is_none());
    }

    #[test]
    fn search_options_builder_overrides_fields() {
        let options = SearchOptions::new().max_pages(5).country("gb").use_cache(false);
        assert_eq!(options.max_pages, Some(5));
        assert_eq!(options.country.as_deref(), Some("gb"));
        assert!(!options.use_cache);
    }
}
