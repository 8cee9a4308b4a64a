//! Structured progress reporting for in-flight searches.
//!
//! This is a synchronous, non-blocking callback bus distinct from the
//! crate's `tracing` instrumentation: `tracing` is for operators
//! tailing logs, [`ProgressReporter`] is the public contract hosts use
//! to drive a progress bar or stream status to a UI.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// One reported event: a page fetch finishing (successfully, empty,
/// or with an error), keyed to the query and page it belongs to.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub query: String,
    pub page: u32,
    pub total_pages: u32,
    pub results_count: usize,
    pub status: PageStatus,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Percentage of `total_pages` this page represents, `0.0` if
    /// `total_pages` is zero.
    pub fn progress_pct(&self) -> f64 {
        if self.total_pages == 0 {
            0.0
        } else {
            (self.page as f64 / self.total_pages as f64) * 100.0
        }
    }
}

/// Outcome of a single page fetch, as reported to a [`ProgressReporter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Fetching,
    Complete,
    Empty,
    Error,
}

/// Callback surface a host implements to observe search progress.
///
/// Every method is synchronous: implementations must not block, since
/// they are invoked inline from the scheduler's hot path.
pub trait ProgressReporter: Send + Sync {
    fn on_query_start(&self, query: &str, total_pages: u32);
    fn on_page_complete(&self, event: &ProgressEvent);
    fn on_query_complete(&self, query: &str, total_results: usize, elapsed_seconds: f64);
    fn on_error(&self, query: &str, error: &str, page: Option<u32>);
    fn on_cache_hit(&self, query: &str);
}

/// Silent reporter; the default when a host doesn't care about
/// progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn on_query_start(&self, _query: &str, _total_pages: u32) {}
    fn on_page_complete(&self, _event: &ProgressEvent) {}
    fn on_query_complete(&self, _query: &str, _total_results: usize, _elapsed_seconds: f64) {}
    fn on_error(&self, _query: &str, _error: &str, _page: Option<u32>) {}
    fn on_cache_hit(&self, _query: &str) {}
}

/// Reporter that writes human-readable lines to stderr.
#[derive(Debug, Clone, Copy)]
pub struct StderrProgress {
    pub verbose: bool,
}

impl StderrProgress {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for StderrProgress {
    fn on_query_start(&self, query: &str, total_pages: u32) {
        eprintln!("[serp] query: '{query}' - fetching up to {total_pages} pages...");
    }

    fn on_page_complete(&self, event: &ProgressEvent) {
        if !self.verbose {
            return;
        }
        let status = match event.status {
            PageStatus::Complete => format!("{} results", event.results_count),
            PageStatus::Empty => "empty".to_string(),
            PageStatus::Error => "error".to_string(),
            PageStatus::Fetching => "fetching".to_string(),
        };
        eprintln!(
            "[serp]   page {}/{}: {status}",
            event.page, event.total_pages
        );
    }

    fn on_query_complete(&self, query: &str, total_results: usize, elapsed_seconds: f64) {
        eprintln!(
            "[serp] query: '{query}' - done: {total_results} results in {elapsed_seconds:.1}s"
        );
    }

    fn on_error(&self, query: &str, error: &str, page: Option<u32>) {
        match page {
            Some(page) => eprintln!("[serp] query: '{query}' - page {page} error: {error}"),
            None => eprintln!("[serp] query: '{query}' - error: {error}"),
        }
    }

    fn on_cache_hit(&self, query: &str) {
        eprintln!("[serp] query: '{query}' - cache hit");
    }
}

type StartCallback = Box<dyn Fn(&str, u32) + Send + Sync>;
type PageCallback = Box<dyn Fn(&ProgressEvent) + Send + Sync>;
type CompleteCallback = Box<dyn Fn(&str, usize, f64) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&str, &str, Option<u32>) + Send + Sync>;

/// Reporter that forwards events to caller-supplied closures, for
/// hosts that want to wire progress into their own event system
/// without implementing the full trait.
#[derive(Default)]
pub struct CallbackProgress {
    on_start: Option<StartCallback>,
    on_page: Option<PageCallback>,
    on_complete: Option<CompleteCallback>,
    on_error: Option<ErrorCallback>,
}

impl CallbackProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(mut self, f: impl Fn(&str, u32) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Box::new(f));
        self
    }

    pub fn on_page(mut self, f: impl Fn(&ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_page = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn(&str, usize, f64) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_error_callback(
        mut self,
        f: impl Fn(&str, &str, Option<u32>) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl ProgressReporter for CallbackProgress {
    fn on_query_start(&self, query: &str, total_pages: u32) {
        if let Some(f) = &self.on_start {
            f(query, total_pages);
        }
    }

    fn on_page_complete(&self, event: &ProgressEvent) {
        if let Some(f) = &self.on_page {
            f(event);
        }
    }

    fn on_query_complete(&self, query: &str, total_results: usize, elapsed_seconds: f64) {
        if let Some(f) = &self.on_complete {
            f(query, total_results, elapsed_seconds);
        }
    }

    fn on_error(&self, query: &str, error: &str, page: Option<u32>) {
        if let Some(f) = &self.on_error {
            f(query, error, page);
        }
    }

    fn on_cache_hit(&self, _query: &str) {}
}

#[derive(Default)]
struct AggregatingState {
    events: Vec<ProgressEvent>,
    query_starts: HashMap<String, DateTime<Utc>>,
    query_results: HashMap<String, usize>,
    errors: Vec<(String, String, Option<u32>)>,
}

/// Reporter that accumulates every event in memory, for batch
/// operations a host wants to inspect after the fact rather than
/// stream live.
#[derive(Default)]
pub struct AggregatingProgress {
    state: Mutex<AggregatingState>,
}

impl AggregatingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_pages_fetched(&self) -> usize {
        self.state.lock().unwrap().events.len()
    }

    pub fn total_results(&self) -> usize {
        self.state.lock().unwrap().query_results.values().sum()
    }

    pub fn error_count(&self) -> usize {
        self.state.lock().unwrap().errors.len()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.state.lock().unwrap().events.clone()
    }
}

impl ProgressReporter for AggregatingProgress {
    fn on_query_start(&self, query: &str, _total_pages: u32) {
        self.state
            .lock()
            .unwrap()
            .query_starts
            .insert(query.to_string(), Utc::now());
    }

    fn on_page_complete(&self, event: &ProgressEvent) {
        self.state.lock().unwrap().events.push(event.clone());
    }

    fn on_query_complete(&self, query: &str, total_results: usize, _elapsed_seconds: f64) {
        self.state
            .lock()
            .unwrap()
            .query_results
            .insert(query.to_string(), total_results);
    }

    fn on_error(&self, query: &str, error: &str, page: Option<u32>) {
        self.state
            .lock()
            .unwrap()
            .errors
            .push((query.to_string(), error.to_string(), page));
    }

    fn on_cache_hit(&self, _query: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_pct_is_zero_when_total_pages_is_zero() {
        let event = ProgressEvent {
            query: "x".to_string(),
            page: 1,
            total_pages: 0,
            results_count: 0,
            status: PageStatus::Empty,
            message: None,
            timestamp: Utc::now(),
        };
        assert_eq!(event.progress_pct(), 0.0);
    }

    #[test]
    fn aggregating_progress_accumulates_events_and_errors() {
        let progress = AggregatingProgress::new();
        progress.on_query_start("rust", 3);
        progress.on_page_complete(&ProgressEvent {
            query: "rust".to_string(),
            page: 1,
            total_pages: 3,
            results_count: 10,
            status: PageStatus::Complete,
            message: None,
            timestamp: Utc::now(),
        });
        progress.on_error("rust", "boom", Some(2));
        progress.on_query_complete("rust", 10, 1.5);

        assert_eq!(progress.total_pages_fetched(), 1);
        assert_eq!(progress.total_results(), 10);
        assert_eq!(progress.error_count(), 1);
    }

    #[test]
    fn callback_progress_invokes_only_registered_callbacks() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let starts = Arc::new(AtomicUsize::new(0));
        let starts_clone = starts.clone();
        let reporter = CallbackProgress::new().on_start(move |_, _| {
            starts_clone.fetch_add(1, Ordering::SeqCst);
        });

        reporter.on_query_start("rust", 5);
        reporter.on_query_complete("rust", 5, 1.0); // no-op: no callback registered

        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }
}
