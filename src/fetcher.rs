//! The two-phase upstream protocol: submit a search, then poll for the
//! rendered result.
//!
//! This is the only module that talks HTTP to the upstream provider.
//! Everything above it (the scheduler, the aggregator) only knows
//! about [`UpstreamFetcher::fetch_page`]'s page-number-in,
//! raw-JSON-out contract.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{SerpError, SerpResult};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;

const RESULTS_PER_PAGE: u32 = 10;

#[derive(Deserialize)]
struct SubmitResponse {
    response_id: Option<String>,
}

/// Talks the submit/poll protocol to the upstream provider for a
/// single logical request at a time; concurrency is the scheduler's
/// job, not this struct's.
pub struct UpstreamFetcher {
    http: reqwest::Client,
    api_base_url: String,
    api_key: String,
    zone: String,
    request_timeout: Duration,
    poll_interval: Duration,
    max_polls: u32,
    retry_policy: RetryPolicy,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl UpstreamFetcher {
    pub fn new(
        http: reqwest::Client,
        api_base_url: impl Into<String>,
        api_key: impl Into<String>,
        zone: impl Into<String>,
        request_timeout: Duration,
        poll_interval: Duration,
        max_polls: u32,
        retry_policy: RetryPolicy,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            http,
            api_base_url: api_base_url.into(),
            api_key: api_key.into(),
            zone: zone.into(),
            request_timeout,
            poll_interval,
            max_polls,
            retry_policy,
            rate_limiter,
        }
    }

    /// Fetch one page of a search (`page` is 1-based; converted to the
    /// upstream's `start` offset internally).
    ///
    /// Retries transport-level failures up to `retry_policy.max_retries`
    /// times with exponential backoff; typed upstream errors (429,
    /// missing `response_id`) propagate immediately without consuming a
    /// transport retry, since the rate limiter already backs those off.
    pub async fn fetch_page(
        &self,
        query: &str,
        country: &str,
        language: &str,
        page: u32,
        cancel: &CancellationToken,
    ) -> SerpResult<Value> {
        let start = (page - 1) * RESULTS_PER_PAGE;

        for attempt in 0..=self.retry_policy.max_retries {
            if cancel.is_cancelled() {
                return Err(SerpError::Cancelled);
            }

            match self.submit_and_poll(query, country, language, start, cancel).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable_transport() && attempt < self.retry_policy.max_retries => {
                    let delay = self.retry_policy.backoff_duration(attempt);
                    warn!(page, attempt, ?delay, %err, "transport error, retrying");
                    self.sleep_cancellable(delay, cancel).await?;
                }
                Err(err) => return Err(err),
            }
        }

        Err(SerpError::Api {
            status: 0,
            response_id: None,
            message: "all retries exhausted".to_string(),
        })
    }

    async fn submit_and_poll(
        &self,
        query: &str,
        country: &str,
        language: &str,
        start: u32,
        cancel: &CancellationToken,
    ) -> SerpResult<Value> {
        self.rate_limiter.acquire().await?;

        let search_url = format!(
            "https://www.google.com/search?gl={country}&hl={language}&brd_json=1&q={}&start={start}",
            urlencode(query)
        );

        let body = serde_json::json!({
            "zone": self.zone,
            "url": search_url,
            "format": "raw",
        });

        debug!(query, start, "submitting search request");

        let submit_response = match self
            .http
            .post(format!("{}/serp/req", self.api_base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.request_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                self.rate_limiter.on_error().await;
                return Err(SerpError::Transport(err));
            }
        };

        if submit_response.status().as_u16() == 429 {
            self.rate_limiter.on_rate_limit().await;
            return Err(SerpError::RateLimited { retry_after: None });
        }

        let status = submit_response.status();
        let submit: SubmitResponse = match submit_response.json().await {
            Ok(submit) => submit,
            Err(err) => {
                self.rate_limiter.on_error().await;
                return Err(SerpError::Transport(err));
            }
        };
        let response_id = submit.response_id.ok_or_else(|| {
            SerpError::Api {
                status: status.as_u16(),
                response_id: None,
                message: "no response_id returned from API".to_string(),
            }
        });
        let response_id = match response_id {
            Ok(id) => id,
            Err(err) => {
                self.rate_limiter.on_error().await;
                return Err(err);
            }
        };

        self.poll_for_result(&response_id, cancel).await
    }

    async fn poll_for_result(
        &self,
        response_id: &str,
        cancel: &CancellationToken,
    ) -> SerpResult<Value> {
        let started = Instant::now();

        for _ in 0..self.max_polls {
            self.sleep_cancellable(self.poll_interval, cancel).await?;

            let poll_response = match self
                .http
                .get(format!("{}/serp/get_result", self.api_base_url))
                .bearer_auth(&self.api_key)
                .query(&[("response_id", response_id)])
                .timeout(self.request_timeout)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    self.rate_limiter.on_error().await;
                    return Err(SerpError::Transport(err));
                }
            };

            match poll_response.status().as_u16() {
                200 => {
                    let body = match poll_response.json().await {
                        Ok(body) => body,
                        Err(err) => {
                            self.rate_limiter.on_error().await;
                            return Err(SerpError::Transport(err));
                        }
                    };
                    self.rate_limiter.on_success().await;
                    return Ok(body);
                }
                429 => {
                    self.rate_limiter.on_rate_limit().await;
                    return Err(SerpError::RateLimited { retry_after: None });
                }
                102 | 202 => continue,
                status => {
                    self.rate_limiter.on_error().await;
                    return Err(SerpError::Api {
                        status,
                        response_id: Some(response_id.to_string()),
                        message: format!("unexpected status during polling: {status}"),
                    });
                }
            }
        }

        self.rate_limiter.on_error().await;
        Err(SerpError::Timeout {
            elapsed_secs: started.elapsed().as_secs_f64(),
            response_id: Some(response_id.to_string()),
        })
    }

    async fn sleep_cancellable(
        &self,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> SerpResult<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = cancel.cancelled() => Err(SerpError::Cancelled),
        }
    }
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_offset_is_zero_indexed_in_tens() {
        assert_eq!((1 - 1) * RESULTS_PER_PAGE, 0);
        assert_eq!((3 - 1) * RESULTS_PER_PAGE, 20);
    }

    #[test]
    fn urlencode_escapes_spaces() {
        assert_eq!(urlencode("rust programming"), "rust+programming");
    }
}
