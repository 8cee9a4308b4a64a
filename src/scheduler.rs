//! Fans a query out across pages, consumes responses in completion
//! order, and merges them into one deduplicated [`SearchResult`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::fetcher::UpstreamFetcher;
use crate::models::{GeneralMetadata, NavigationItem, OrganicResult, PaginationItem, SearchResult};
use crate::progress::{PageStatus, ProgressEvent, ProgressReporter};

struct MergeState {
    /// Insertion order is the tie-break for equal `best_position`.
    order: Vec<String>,
    index: HashMap<String, usize>,
    positions: Vec<Vec<i64>>,
    pages: Vec<Vec<u32>>,
    rank: Vec<i64>,
    title: Vec<String>,
    description: Vec<Option<String>>,
}

impl MergeState {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            index: HashMap::new(),
            positions: Vec::new(),
            pages: Vec::new(),
            rank: Vec::new(),
            title: Vec::new(),
            description: Vec::new(),
        }
    }

    fn record(&mut self, link: String, rank: i64, title: String, description: Option<String>, page: u32) {
        match self.index.get(&link) {
            Some(&idx) => {
                self.positions[idx].push(rank);
                self.pages[idx].push(page);
            }
            None => {
                let idx = self.order.len();
                self.index.insert(link.clone(), idx);
                self.order.push(link);
                self.positions.push(vec![rank]);
                self.pages.push(vec![page]);
                self.rank.push(rank);
                self.title.push(title);
                self.description.push(description);
            }
        }
    }

    fn into_results(mut self) -> Vec<OrganicResult> {
        let mut results: Vec<OrganicResult> = self
            .order
            .drain(..)
            .enumerate()
            .map(|(idx, link)| {
                let positions = &self.positions[idx];
                let best_position = *positions.iter().min().unwrap_or(&0);
                let avg_position =
                    (positions.iter().sum::<i64>() as f64 / positions.len() as f64 * 100.0).round()
                        / 100.0;
                let mut pages_seen: Vec<u32> = self.pages[idx].clone();
                pages_seen.sort_unstable();
                pages_seen.dedup();

                OrganicResult {
                    link,
                    title: std::mem::take(&mut self.title[idx]),
                    description: self.description[idx].take(),
                    rank: self.rank[idx],
                    best_position,
                    avg_position,
                    frequency: positions.len(),
                    pages_seen,
                }
            })
            .collect();

        // Stable sort: equal best_position keeps insertion order, since
        // `enumerate()` above preserved it and `sort_by_key` is stable.
        results.sort_by_key(|r| r.best_position);
        results
    }
}

/// Runs the fan-out/merge/early-termination algorithm for one query.
pub struct PageScheduler {
    fetcher: Arc<UpstreamFetcher>,
    consecutive_empty_limit: u32,
}

impl PageScheduler {
    pub fn new(fetcher: Arc<UpstreamFetcher>, consecutive_empty_limit: u32) -> Self {
        Self {
            fetcher,
            consecutive_empty_limit,
        }
    }

    /// Fetch up to `max_pages` pages of `query` with at most
    /// `concurrency` in flight at once, merging as pages complete and
    /// stopping early once `consecutive_empty_limit` consecutive pages
    /// come back with no organic results.
    pub async fn run(
        &self,
        query: &str,
        country: &str,
        language: &str,
        max_pages: u32,
        concurrency: u32,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> SearchResult {
        progress.on_query_start(query, max_pages);
        let started = Instant::now();

        let semaphore = Arc::new(Semaphore::new(concurrency as usize));
        let mut in_flight = FuturesUnordered::new();

        for page in 1..=max_pages {
            let fetcher = Arc::clone(&self.fetcher);
            let semaphore = Arc::clone(&semaphore);
            let query = query.to_string();
            let country = country.to_string();
            let language = language.to_string();
            let cancel = cancel.clone();

            in_flight.push(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                let result = fetcher.fetch_page(&query, &country, &language, page, &cancel).await;
                (page, result)
            });
        }

        let mut merge = MergeState::new();
        let mut errors = Vec::new();
        let mut pages_fetched = 0u32;
        let mut consecutive_empty = 0u32;
        let mut page1_response: Option<Value> = None;
        let mut first_response: Option<Value> = None;
        let mut pagination_seen: std::collections::HashSet<String> = std::collections::HashSet::new();

        while let Some((page, outcome)) = in_flight.next().await {
            pages_fetched += 1;

            match outcome {
                Err(err) => {
                    let message = err.to_string();
                    errors.push(format!("Page {page}: {message}"));
                    progress.on_error(query, &message, Some(page));
                    consecutive_empty += 1;
                }
                Ok(response) => {
                    if first_response.is_none() {
                        first_response = Some(response.clone());
                    }
                    if page == 1 {
                        page1_response = Some(response.clone());
                    }

                    let organic = response.get("organic").and_then(Value::as_array).cloned().unwrap_or_default();

                    if organic.is_empty() {
                        consecutive_empty += 1;
                    } else {
                        consecutive_empty = 0;
                        for item in &organic {
                            let link = item.get("link").and_then(Value::as_str).unwrap_or_default();
                            if link.is_empty() {
                                continue;
                            }
                            let rank = item.get("rank").and_then(Value::as_i64).unwrap_or(0);
                            let title = item.get("title").and_then(Value::as_str).unwrap_or_default().to_string();
                            let description = item.get("description").and_then(Value::as_str).map(str::to_string);
                            merge.record(link.to_string(), rank, title, description, page);
                        }
                    }

                    if let Some(pagination) = response.get("pagination").and_then(Value::as_array) {
                        for pag in pagination {
                            if let Some(page_key) = pag.get("page").and_then(Value::as_str) {
                                pagination_seen.insert(page_key.to_string());
                            }
                        }
                    }

                    progress.on_page_complete(&ProgressEvent {
                        query: query.to_string(),
                        page,
                        total_pages: max_pages,
                        results_count: organic.len(),
                        status: if organic.is_empty() { PageStatus::Empty } else { PageStatus::Complete },
                        message: None,
                        timestamp: chrono::Utc::now(),
                    });
                }
            }

            if consecutive_empty >= self.consecutive_empty_limit {
                cancel.cancel();
                break;
            }
        }

        // Open question #1: prefer page 1's metadata when it completed;
        // otherwise fall back to whichever page finished first.
        let canonical = page1_response.or(first_response);
        let result = build_search_result(query, canonical, merge.into_results(), pages_fetched, errors, pagination_seen);

        progress.on_query_complete(query, result.organic.len(), started.elapsed().as_secs_f64());
        result
    }
}

fn build_search_result(
    query: &str,
    canonical: Option<Value>,
    organic: Vec<OrganicResult>,
    pages_fetched: u32,
    errors: Vec<String>,
    _pagination_seen: std::collections::HashSet<String>,
) -> SearchResult {
    let general = canonical
        .as_ref()
        .and_then(|v| v.get("general"))
        .and_then(|g| serde_json::from_value::<GeneralMetadata>(g.clone()).ok())
        .unwrap_or_else(|| GeneralMetadata {
            query: query.to_string(),
            ..GeneralMetadata::default()
        });

    let mut pagination: Vec<PaginationItem> = canonical
        .as_ref()
        .and_then(|v| v.get("pagination"))
        .and_then(|p| serde_json::from_value::<Vec<PaginationItem>>(p.clone()).ok())
        .unwrap_or_default();
    pagination.sort_by_key(|p| p.page.parse::<i64>().unwrap_or(0));

    let navigation: Vec<NavigationItem> = canonical
        .as_ref()
        .and_then(|v| v.get("navigation"))
        .and_then(|n| serde_json::from_value::<Vec<NavigationItem>>(n.clone()).ok())
        .unwrap_or_default();

    let people_also_ask: Vec<String> = canonical
        .as_ref()
        .and_then(|v| v.get("people_also_ask"))
        .and_then(|p| serde_json::from_value::<Vec<String>>(p.clone()).ok())
        .unwrap_or_default();

    let related = canonical
        .as_ref()
        .and_then(|v| v.get("related"))
        .and_then(|r| serde_json::from_value(r.clone()).ok())
        .unwrap_or_default();

    SearchResult {
        url: canonical.as_ref().and_then(|v| v.get("url")).and_then(Value::as_str).map(str::to_string),
        keyword: canonical.as_ref().and_then(|v| v.get("keyword")).and_then(Value::as_str).map(str::to_string),
        general,
        organic,
        related,
        people_also_ask,
        pagination,
        navigation,
        language: canonical.as_ref().and_then(|v| v.get("language")).and_then(Value::as_str).map(str::to_string),
        country: canonical.as_ref().and_then(|v| v.get("country")).and_then(Value::as_str).map(str::to_string),
        aio_text: canonical.as_ref().and_then(|v| v.get("aio_text")).and_then(Value::as_str).map(str::to_string),
        pages_fetched,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_state_dedupes_by_link_and_tracks_positions() {
        let mut merge = MergeState::new();
        merge.record("https://a".to_string(), 3, "A".to_string(), None, 1);
        merge.record("https://a".to_string(), 1, "A".to_string(), None, 2);
        merge.record("https://b".to_string(), 2, "B".to_string(), None, 1);

        let results = merge.into_results();
        assert_eq!(results.len(), 2);

        let a = results.iter().find(|r| r.link == "https://a").unwrap();
        assert_eq!(a.best_position, 1);
        assert_eq!(a.frequency, 2);
        assert_eq!(a.pages_seen, vec![1, 2]);
    }

    #[test]
    fn ties_on_best_position_keep_insertion_order() {
        let mut merge = MergeState::new();
        merge.record("https://a".to_string(), 5, "A".to_string(), None, 1);
        merge.record("https://b".to_string(), 5, "B".to_string(), None, 1);

        let results = merge.into_results();
        assert_eq!(results[0].link, "https://a");
        assert_eq!(results[1].link, "https://b");
    }

    #[test]
    fn avg_position_is_rounded_to_two_decimals() {
        let mut merge = MergeState::new();
        merge.record("https://a".to_string(), 1, "A".to_string(), None, 1);
        merge.record("https://a".to_string(), 2, "A".to_string(), None, 2);
        merge.record("https://a".to_string(), 4, "A".to_string(), None, 3);

        let results = merge.into_results();
        assert_eq!(results[0].avg_position, 2.33);
    }
}
