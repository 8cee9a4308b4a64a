use serde_json::json;
use serp_aggregator::{Aggregator, SearchOptions, SearchParams, Settings};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn connect_to(mock: &MockServer) -> Aggregator {
    let settings = Settings::builder()
        .api_key("test-key")
        .api_base_url(mock.uri())
        .poll_interval_secs(0.5)
        .max_polls(3)
        .rate_limit_enabled(false)
        .cache_enabled(true)
        .default_max_pages(2)
        .default_concurrency(2)
        .build_from_env()
        .unwrap();

    Aggregator::builder().settings(settings).connect().await.unwrap()
}

#[tokio::test]
async fn search_merges_and_dedupes_across_pages() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/serp/req"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response_id": "abc123"})))
        .mount(&mock)
        .await;

    Mock::given(method("GET"))
        .and(path("/serp/get_result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": "https://www.google.com/search?q=rust",
            "keyword": "rust",
            "general": {"query": "rust", "search_engine": "google", "search_type": "text"},
            "organic": [
                {"link": "https://a.example", "title": "A", "rank": 1},
                {"link": "https://b.example", "title": "B", "rank": 2},
            ],
        })))
        .mount(&mock)
        .await;

    let aggregator = connect_to(&mock).await;
    let result = aggregator
        .search("rust", SearchOptions::new().max_pages(2).use_cache(false))
        .await
        .unwrap();

    // Both pages return identical content, so dedup collapses to 2 URLs,
    // each seen on both pages.
    assert_eq!(result.organic.len(), 2);
    assert_eq!(result.pages_fetched, 2);
    assert!(!result.has_errors());

    let a = result.organic.iter().find(|r| r.link == "https://a.example").unwrap();
    assert_eq!(a.frequency, 2);
    assert_eq!(a.best_position, 1);
}

#[tokio::test]
async fn cache_hit_skips_the_second_fetch() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/serp/req"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response_id": "xyz"})))
        .expect(1)
        .mount(&mock)
        .await;

    Mock::given(method("GET"))
        .and(path("/serp/get_result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "organic": [{"link": "https://a.example", "title": "A", "rank": 1}],
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let aggregator = connect_to(&mock).await;
    let options = SearchOptions::new().max_pages(1).concurrency(1);

    let first = aggregator.search("cached query", options.clone()).await.unwrap();
    let second = aggregator.search("cached query", options).await.unwrap();

    assert_eq!(first.organic.len(), second.organic.len());
}

#[tokio::test]
async fn rate_limited_submit_surfaces_as_rate_limited_error() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/serp/req"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&mock)
        .await;

    let settings = Settings::builder()
        .api_key("test-key")
        .api_base_url(mock.uri())
        .poll_interval_secs(0.5)
        .max_polls(1)
        .rate_limit_enabled(false)
        .cache_enabled(false)
        .build_from_env()
        .unwrap();

    let aggregator = Aggregator::builder().settings(settings).connect().await.unwrap();
    let result = aggregator
        .search("will fail", SearchOptions::new().max_pages(1).concurrency(1).use_cache(false))
        .await
        .unwrap();

    // Every page failed, so the merged result carries the errors instead
    // of the call itself failing - a single bad page shouldn't sink a
    // multi-page search.
    assert!(result.has_errors());
    assert!(result.organic.is_empty());
}

#[test]
fn missing_api_key_fails_fast() {
    std::env::remove_var("SERP_API_KEY");
    let result = Settings::from_env();
    assert!(result.is_err());
}

#[test]
fn search_params_reject_out_of_range_max_pages() {
    let result = SearchParams::builder("rust").max_pages(0).build();
    assert!(result.is_err());

    let result = SearchParams::builder("rust").max_pages(101).build();
    assert!(result.is_err());

    let result = SearchParams::builder("rust").max_pages(50).build();
    assert!(result.is_ok());
}

#[tokio::test]
async fn search_batch_runs_every_non_empty_query() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/serp/req"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response_id": "batch-1"})))
        .mount(&mock)
        .await;

    Mock::given(method("GET"))
        .and(path("/serp/get_result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "organic": [{"link": "https://a.example", "title": "A", "rank": 1}],
        })))
        .mount(&mock)
        .await;

    let aggregator = connect_to(&mock).await;
    let queries = vec!["first".to_string(), "  ".to_string(), "second".to_string()];

    let batch = aggregator
        .search_batch(&queries, SearchOptions::new().max_pages(1).concurrency(1))
        .await
        .unwrap();

    assert_eq!(batch.results.len(), 2);
    assert!(batch.results.contains_key("first"));
    assert!(batch.results.contains_key("second"));
}

#[cfg(feature = "streaming")]
#[tokio::test]
async fn search_stream_yields_one_item_per_non_empty_query() {
    use futures::StreamExt;

    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/serp/req"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response_id": "stream-1"})))
        .mount(&mock)
        .await;

    Mock::given(method("GET"))
        .and(path("/serp/get_result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "organic": [{"link": "https://a.example", "title": "A", "rank": 1}],
        })))
        .mount(&mock)
        .await;

    let aggregator = connect_to(&mock).await;
    let queries = vec!["one".to_string(), String::new(), "two".to_string()];

    let items: Vec<_> = aggregator
        .search_stream(&queries, SearchOptions::new().max_pages(1).concurrency(1))
        .collect()
        .await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].0, "one");
    assert_eq!(items[1].0, "two");
    assert!(items[0].1.is_ok());
}
