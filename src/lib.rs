//! # serp-aggregator
//!
//! A concurrent search-results aggregator: fan a query out across
//! paginated upstream requests, merge and deduplicate the results by
//! URL with cross-page position tracking, pace requests with an
//! adaptive rate limiter and circuit breaker, and cache the merged
//! result with TTL+LRU eviction.
//!
//! ## Features
//!
//! - **Concurrent fan-out**: bounded in-flight page requests, consumed
//!   in completion order
//! - **Deterministic merge**: dedup by URL, best/average position
//!   tracking, stable sort with first-insertion tie-break
//! - **Adaptive pacing**: token-bucket rate limiter with a circuit
//!   breaker that backs off on sustained errors and 429s
//! - **TTL+LRU caching**: in-process by default, optionally
//!   Redis-backed behind the `remote-cache` feature
//! - **Structured progress**: a synchronous callback bus distinct from
//!   `tracing`-based operator logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serp_aggregator::{Aggregator, SearchOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads SERP_API_KEY (and other SERP_* settings) from the environment
//!     let aggregator = Aggregator::connect().await?;
//!
//!     let result = aggregator
//!         .search("rust programming", SearchOptions::new().max_pages(5))
//!         .await?;
//!
//!     for item in &result.organic {
//!         println!("{}: {}", item.best_position, item.link);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! All settings are read from `SERP_*` environment variables and
//! validated eagerly — a bad value fails at [`Aggregator::connect`],
//! never at first search. See [`Settings`] for the full list.
//!
//! ## Non-goals
//!
//! This crate stops at the merged, deduplicated result set. It does
//! not parse individual result pages' HTML, render markdown, construct
//! LLM prompts, persist results beyond its cache, or handle
//! multi-tenant auth — those are a caller's concern.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

/// Async-trait pluggable result cache (in-memory TTL+LRU, optional remote).
pub mod cache;

/// Error taxonomy for all aggregator operations.
pub mod error;

/// The two-phase submit/poll upstream protocol.
pub mod fetcher;

/// Search parameters and the merged result data model.
pub mod models;

/// Structured progress reporting, independent of `tracing`.
pub mod progress;

/// Adaptive rate limiting and circuit breaking.
pub mod rate_limiter;

/// Transport-level retry policy for the fetcher.
pub mod retry;

/// Fan-out/merge scheduling across a query's pages.
pub mod scheduler;

/// Environment-driven, eagerly validated configuration.
pub mod settings;

mod aggregator;

pub use aggregator::{search, search_batch, Aggregator, AggregatorBuilder, SearchOptions};
pub use cache::{CacheStats, InMemoryCache, NullCache, ResultCache};
pub use error::{SerpError, SerpResult};
pub use models::{
    BatchResult, GeneralMetadata, NavigationItem, OrganicResult, PaginationItem, QueryTiming,
    RelatedSearch, SearchParams, SearchParamsBuilder, SearchResult, SearchType,
};
pub use progress::{
    AggregatingProgress, CallbackProgress, NullProgress, PageStatus, ProgressEvent,
    ProgressReporter, StderrProgress,
};
pub use rate_limiter::{AdaptiveRateLimiter, CircuitState, NullRateLimiter, RateLimiter, RateLimiterStats};
pub use retry::RetryPolicy;
pub use settings::{CacheBackend, Settings, SettingsBuilder};

#[cfg(feature = "remote-cache")]
pub use cache::RemoteCache;
