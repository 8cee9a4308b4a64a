//! Adaptive rate limiting with a token-bucket pacer and a circuit
//! breaker, matching the upstream protocol's pacing contract.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::error::{SerpError, SerpResult};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; requests flow through.
    Closed,
    /// Tripped; requests are rejected until the recovery timeout elapses.
    Open,
    /// Probing recovery; a limited number of requests are allowed through.
    HalfOpen,
}

/// Point-in-time rate limiter statistics.
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub requests_total: u64,
    pub requests_allowed: u64,
    pub requests_throttled: u64,
    pub rate_limit_hits: u64,
    pub errors_total: u64,
    pub circuit_opens: u64,
    pub current_rps: f64,
    pub circuit_state: CircuitState,
}

impl Default for RateLimiterStats {
    fn default() -> Self {
        Self {
            requests_total: 0,
            requests_allowed: 0,
            requests_throttled: 0,
            rate_limit_hits: 0,
            errors_total: 0,
            circuit_opens: 0,
            current_rps: 0.0,
            circuit_state: CircuitState::Closed,
        }
    }
}

/// Pacing and backpressure contract the fetcher consults around every
/// upstream call.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait until a request is allowed to proceed.
    ///
    /// Returns [`SerpError::CircuitOpen`] if the breaker is tripped and
    /// has not yet reached its recovery timeout.
    async fn acquire(&self) -> SerpResult<()>;
    /// Report a successful request.
    async fn on_success(&self);
    /// Report a 429 response.
    async fn on_rate_limit(&self);
    /// Report a non-429 failure.
    async fn on_error(&self);
    /// Snapshot current statistics.
    async fn stats(&self) -> RateLimiterStats;
}

/// No-op limiter; every request is allowed immediately.
#[derive(Debug, Default)]
pub struct NullRateLimiter {
    stats: Mutex<RateLimiterStats>,
}

impl NullRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for NullRateLimiter {
    async fn acquire(&self) -> SerpResult<()> {
        let mut stats = self.stats.lock().await;
        stats.requests_total += 1;
        stats.requests_allowed += 1;
        Ok(())
    }

    async fn on_success(&self) {}

    async fn on_rate_limit(&self) {
        self.stats.lock().await.rate_limit_hits += 1;
    }

    async fn on_error(&self) {
        self.stats.lock().await.errors_total += 1;
    }

    async fn stats(&self) -> RateLimiterStats {
        self.stats.lock().await.clone()
    }
}

struct AdaptiveState {
    current_rps: f64,
    tokens: f64,
    last_update: Instant,
    circuit_state: CircuitState,
    consecutive_errors: u32,
    consecutive_successes: u32,
    circuit_opened_at: Option<Instant>,
    stats: RateLimiterStats,
}

/// Token-bucket rate limiter with an attached circuit breaker.
///
/// Rate adapts to upstream behavior: successes nudge the allowed rate
/// up by 10%, a 429 halves it, any other error cuts it by 20%. Five
/// consecutive errors or rate-limit hits trip the breaker for
/// `recovery_timeout`, after which it half-opens and needs
/// `success_threshold` consecutive successes to fully close.
pub struct AdaptiveRateLimiter {
    min_rps: f64,
    max_rps: f64,
    burst_size: f64,
    error_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,
    state: Mutex<AdaptiveState>,
}

impl AdaptiveRateLimiter {
    /// Build a limiter starting at `initial_rps`, with a token bucket
    /// depth of `burst_size`.
    pub fn new(initial_rps: f64, burst_size: u32) -> Self {
        let mut stats = RateLimiterStats::default();
        stats.current_rps = initial_rps;
        Self {
            min_rps: 0.5,
            max_rps: 20.0,
            burst_size: burst_size as f64,
            error_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 3,
            state: Mutex::new(AdaptiveState {
                current_rps: initial_rps,
                tokens: burst_size as f64,
                last_update: Instant::now(),
                circuit_state: CircuitState::Closed,
                consecutive_errors: 0,
                consecutive_successes: 0,
                circuit_opened_at: None,
                stats,
            }),
        }
    }

    pub fn with_bounds(mut self, min_rps: f64, max_rps: f64) -> Self {
        self.min_rps = min_rps;
        self.max_rps = max_rps;
        self
    }

    pub fn with_circuit_breaker(
        mut self,
        error_threshold: u32,
        recovery_timeout: Duration,
        success_threshold: u32,
    ) -> Self {
        self.error_threshold = error_threshold;
        self.recovery_timeout = recovery_timeout;
        self.success_threshold = success_threshold;
        self
    }

    async fn check_circuit(&self, state: &mut AdaptiveState) {
        if state.consecutive_errors >= self.error_threshold
            && state.circuit_state != CircuitState::Open
        {
            state.circuit_state = CircuitState::Open;
            state.circuit_opened_at = Some(Instant::now());
            state.stats.circuit_opens += 1;
            state.stats.circuit_state = CircuitState::Open;
        }
    }

    /// Current allowed rate in requests per second.
    pub async fn current_rps(&self) -> f64 {
        self.state.lock().await.current_rps
    }

    /// Whether the breaker is currently tripped.
    pub async fn is_circuit_open(&self) -> bool {
        self.state.lock().await.circuit_state == CircuitState::Open
    }
}

#[async_trait]
impl RateLimiter for AdaptiveRateLimiter {
    async fn acquire(&self) -> SerpResult<()> {
        let wait = {
            let mut state = self.state.lock().await;
            state.stats.requests_total += 1;

            if state.circuit_state == CircuitState::Open {
                let opened_at = state.circuit_opened_at.unwrap_or_else(Instant::now);
                if opened_at.elapsed() > self.recovery_timeout {
                    state.circuit_state = CircuitState::HalfOpen;
                    state.consecutive_successes = 0;
                } else {
                    state.stats.requests_throttled += 1;
                    return Err(SerpError::CircuitOpen);
                }
            }

            let now = Instant::now();
            let elapsed = now.duration_since(state.last_update).as_secs_f64();
            state.tokens = (self.burst_size).min(state.tokens + elapsed * state.current_rps);
            state.last_update = now;

            if state.tokens < 1.0 {
                let wait_secs = (1.0 - state.tokens) / state.current_rps;
                state.stats.requests_throttled += 1;
                state.tokens = 0.0;
                Some(Duration::from_secs_f64(wait_secs.max(0.0)))
            } else {
                state.tokens -= 1.0;
                None
            }
        };

        if let Some(wait) = wait {
            sleep(wait).await;
        }

        self.state.lock().await.stats.requests_allowed += 1;
        Ok(())
    }

    async fn on_success(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_errors = 0;
        state.consecutive_successes += 1;

        if state.circuit_state == CircuitState::HalfOpen
            && state.consecutive_successes >= self.success_threshold
        {
            state.circuit_state = CircuitState::Closed;
            state.consecutive_successes = 0;
        }

        if state.current_rps < self.max_rps {
            state.current_rps = (state.current_rps * 1.1).min(self.max_rps);
            state.stats.current_rps = state.current_rps;
        }
    }

    async fn on_rate_limit(&self) {
        let mut state = self.state.lock().await;
        state.stats.rate_limit_hits += 1;
        state.consecutive_errors += 1;
        state.current_rps = (state.current_rps * 0.5).max(self.min_rps);
        state.stats.current_rps = state.current_rps;
        self.check_circuit(&mut state).await;
    }

    async fn on_error(&self) {
        let mut state = self.state.lock().await;
        state.stats.errors_total += 1;
        state.consecutive_errors += 1;
        state.consecutive_successes = 0;
        state.current_rps = (state.current_rps * 0.8).max(self.min_rps);
        state.stats.current_rps = state.current_rps;
        self.check_circuit(&mut state).await;
    }

    async fn stats(&self) -> RateLimiterStats {
        let mut state = self.state.lock().await;
        state.stats.circuit_state = state.circuit_state;
        state.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_limiter_never_throttles() {
        let limiter = NullRateLimiter::new();
        for _ in 0..100 {
            limiter.acquire().await.unwrap();
        }
        assert_eq!(limiter.stats().await.requests_allowed, 100);
    }

    #[tokio::test]
    async fn success_increases_rate_by_ten_percent() {
        let limiter = AdaptiveRateLimiter::new(5.0, 10);
        limiter.on_success().await;
        assert!((limiter.current_rps().await - 5.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rate_limit_halves_current_rps() {
        let limiter = AdaptiveRateLimiter::new(5.0, 10);
        limiter.on_rate_limit().await;
        assert!((limiter.current_rps().await - 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn error_reduces_rate_by_twenty_percent() {
        let limiter = AdaptiveRateLimiter::new(5.0, 10);
        limiter.on_rate_limit().await; // 5.0 -> 2.5
        limiter.on_error().await; // 2.5 -> 2.0
        assert!((limiter.current_rps().await - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rate_never_drops_below_minimum() {
        let limiter = AdaptiveRateLimiter::new(0.6, 10);
        for _ in 0..10 {
            limiter.on_rate_limit().await;
        }
        assert!(limiter.current_rps().await >= 0.5);
    }

    #[tokio::test]
    async fn five_consecutive_errors_open_the_circuit() {
        let limiter = AdaptiveRateLimiter::new(5.0, 10);
        for _ in 0..5 {
            limiter.on_error().await;
        }
        assert!(limiter.is_circuit_open().await);
        assert!(matches!(limiter.acquire().await, Err(SerpError::CircuitOpen)));
    }
}
