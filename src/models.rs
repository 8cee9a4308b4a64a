//! Data model: validated search parameters, raw upstream result shapes,
//! the deduplicated/merged [`SearchResult`], and batch-operation
//! bookkeeping types.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{SerpError, SerpResult};

/// The kind of search to run against the upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Web,
    Images,
    News,
    Shopping,
    Videos,
}

impl Default for SearchType {
    fn default() -> Self {
        SearchType::Web
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchType::Web => "web",
            SearchType::Images => "images",
            SearchType::News => "news",
            SearchType::Shopping => "shopping",
            SearchType::Videos => "videos",
        };
        f.write_str(s)
    }
}

/// Validated parameters for a single search.
///
/// Constructed only through [`SearchParams::new`] / [`SearchParamsBuilder`]
/// so that an instance in hand always satisfies its field invariants.
#[derive(Debug, Clone)]
pub struct SearchParams {
    query: String,
    country: String,
    language: String,
    max_pages: u32,
    concurrency: u32,
    search_type: SearchType,
}

impl SearchParams {
    /// Validate and build search parameters with default country,
    /// language, max_pages, concurrency and search type.
    pub fn new(query: impl Into<String>) -> SerpResult<Self> {
        SearchParamsBuilder::new(query).build()
    }

    /// Start a builder for overriding individual fields.
    pub fn builder(query: impl Into<String>) -> SearchParamsBuilder {
        SearchParamsBuilder::new(query)
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    pub fn concurrency(&self) -> u32 {
        self.concurrency
    }

    pub fn search_type(&self) -> SearchType {
        self.search_type
    }

    /// Deterministic cache fingerprint over the normalized
    /// (query, country, language, max_pages) tuple: lowercase and trim
    /// the query, SHA-256 the pipe-joined fields, keep the first 32 hex
    /// characters (128 bits).
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.query, &self.country, &self.language, self.max_pages)
    }
}

/// Compute the cache fingerprint for arbitrary (possibly un-normalized)
/// search parameters, without requiring a [`SearchParams`] instance.
pub fn fingerprint(query: &str, country: &str, language: &str, max_pages: u32) -> String {
    let normalized_query = query.trim().to_lowercase();
    let key_data = format!("{normalized_query}|{country}|{language}|{max_pages}");
    let digest = Sha256::digest(key_data.as_bytes());
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    hex[..32].to_string()
}

/// Builder for [`SearchParams`], validating each field the way the
/// protocol's query-string fields are validated.
pub struct SearchParamsBuilder {
    query: String,
    country: String,
    language: String,
    max_pages: u32,
    concurrency: u32,
    search_type: SearchType,
}

impl SearchParamsBuilder {
    fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            country: "us".to_string(),
            language: "en".to_string(),
            max_pages: 25,
            concurrency: 50,
            search_type: SearchType::Web,
        }
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn search_type(mut self, search_type: SearchType) -> Self {
        self.search_type = search_type;
        self
    }

    pub fn build(self) -> SerpResult<SearchParams> {
        let query = self.query.trim().to_string();
        if query.is_empty() || query.chars().count() > 500 {
            return Err(SerpError::validation("query", &query));
        }
        if self.country.len() != 2 || !self.country.chars().all(|c| c.is_ascii_lowercase()) {
            return Err(SerpError::validation("country", &self.country));
        }
        let lang_ok = match self.language.split_once('-') {
            Some((primary, region)) => {
                primary.len() == 2
                    && primary.chars().all(|c| c.is_ascii_lowercase())
                    && region.len() == 2
                    && region.chars().all(|c| c.is_ascii_lowercase())
            }
            None => self.language.len() == 2 && self.language.chars().all(|c| c.is_ascii_lowercase()),
        };
        if !lang_ok {
            return Err(SerpError::validation("language", &self.language));
        }
        if !(1..=100).contains(&self.max_pages) {
            return Err(SerpError::validation("max_pages", self.max_pages));
        }
        if !(1..=200).contains(&self.concurrency) {
            return Err(SerpError::validation("concurrency", self.concurrency));
        }

        Ok(SearchParams {
            query,
            country: self.country,
            language: self.language,
            max_pages: self.max_pages,
            concurrency: self.concurrency,
            search_type: self.search_type,
        })
    }
}

/// A single organic result, deduplicated and annotated with
/// cross-page position statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganicResult {
    pub link: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Rank on the page it was first seen on.
    #[serde(default)]
    pub rank: i64,
    /// Best (lowest) rank seen across all pages it appeared on.
    pub best_position: i64,
    /// Mean rank across all pages it appeared on, rounded to 2 decimals.
    pub avg_position: f64,
    /// Number of pages the URL appeared on.
    pub frequency: usize,
    /// Sorted, deduplicated page numbers the URL appeared on.
    pub pages_seen: Vec<u32>,
}

/// A related-search suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedSearch {
    pub text: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub rank: i64,
}

/// A pagination link reported by the upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationItem {
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub page: String,
    #[serde(default)]
    pub page_html: Option<String>,
}

/// A navigation tab (Images, Videos, ...) reported by the upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
}

/// Provider-reported search metadata, captured from whichever page
/// response the scheduler elects to treat as canonical.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralMetadata {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub datetime: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_search_engine")]
    pub search_engine: String,
    #[serde(default = "default_search_type_tag")]
    pub search_type: String,
    #[serde(default)]
    pub page_title: Option<String>,
}

fn default_search_engine() -> String {
    "google".to_string()
}

fn default_search_type_tag() -> String {
    "text".to_string()
}

/// The merged, deduplicated result of fanning a query out across
/// pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub general: GeneralMetadata,
    #[serde(default)]
    pub organic: Vec<OrganicResult>,
    #[serde(default)]
    pub related: Vec<RelatedSearch>,
    #[serde(default)]
    pub people_also_ask: Vec<String>,
    #[serde(default)]
    pub pagination: Vec<PaginationItem>,
    #[serde(default)]
    pub navigation: Vec<NavigationItem>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub aio_text: Option<String>,
    /// Number of pages actually fetched before the scheduler stopped.
    pub pages_fetched: u32,
    /// Human-readable per-page failures encountered along the way.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl SearchResult {
    pub fn organic_count(&self) -> usize {
        self.organic.len()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Per-query timing captured during a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTiming {
    pub query: String,
    pub elapsed_seconds: f64,
    pub result_count: usize,
    pub pages_fetched: u32,
    pub errors: usize,
}

/// Aggregate result of running several queries, sequentially or in
/// parallel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResult {
    pub queries: Vec<String>,
    pub results: std::collections::HashMap<String, SearchResult>,
    pub timing: std::collections::HashMap<String, f64>,
    pub total_organic: usize,
    pub total_elapsed_seconds: f64,
    pub query_timings: Vec<QueryTiming>,
}

impl BatchResult {
    pub fn success_count(&self) -> usize {
        self.results.values().filter(|r| !r.has_errors()).count()
    }

    pub fn error_count(&self) -> usize {
        self.results.values().filter(|r| r.has_errors()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_query() {
        assert!(SearchParams::new("   ").is_err());
    }

    #[test]
    fn rejects_bad_country() {
        let result = SearchParams::builder("rust").country("USA").build();
        assert!(result.is_err());
    }

    #[test]
    fn accepts_region_tagged_language() {
        let params = SearchParams::builder("rust").language("en-gb").build();
        assert!(params.is_ok());
    }

    #[test]
    fn fingerprint_ignores_whitespace_and_case() {
        let a = fingerprint("Rust Tutorial", "us", "en", 25);
        let b = fingerprint("  rust tutorial  ", "us", "en", 25);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_on_max_pages() {
        let a = fingerprint("rust", "us", "en", 10);
        let b = fingerprint("rust", "us", "en", 20);
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_is_32_hex_chars() {
        let key = fingerprint("rust", "us", "en", 25);
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
