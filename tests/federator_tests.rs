use std::sync::Arc;

use music_stream_gateway::api::mock::MockProvider;
use music_stream_gateway::api::{Provider, RawHit};
use music_stream_gateway::federator::Federator;

fn hits(prefix: &str, n: usize) -> Vec<RawHit> {
    (0..n)
        .map(|i| RawHit {
            id: format!("{}{:07}", prefix, i),
            title: format!("{} song {}", prefix, i),
        })
        .collect()
}

#[tokio::test]
async fn limit_is_split_evenly_and_order_follows_providers() {
    let a = Arc::new(
        MockProvider::new("Alpha")
            .with_paths("/stream/alpha", "/search/alpha")
            .with_hits(hits("alph", 15)),
    );
    let b = Arc::new(
        MockProvider::new("Beta")
            .with_paths("/stream/beta", "/search/beta")
            .with_hits(hits("beta", 15)),
    );
    let fed = Federator::new(vec![a.clone() as Arc<dyn Provider>, b.clone() as Arc<dyn Provider>]);

    let results = fed.search("daft punk", 20, "https://gw.example").await;

    assert_eq!(a.search_limits(), vec![10]);
    assert_eq!(b.search_limits(), vec![10]);
    assert_eq!(results.len(), 20);
    assert!(results[..10].iter().all(|r| r.source == "Alpha"));
    assert!(results[10..].iter().all(|r| r.source == "Beta"));
    assert_eq!(results[0].title, "alph song 0");
    assert_eq!(
        results[0].playback_url,
        "https://gw.example/stream/alpha?trackId=alph0000000"
    );
}

#[tokio::test]
async fn remainder_of_the_split_is_dropped() {
    let a = Arc::new(MockProvider::new("Alpha").with_paths("/stream/alpha", "/search/alpha"));
    let b = Arc::new(MockProvider::new("Beta").with_paths("/stream/beta", "/search/beta"));
    let fed = Federator::new(vec![a.clone() as Arc<dyn Provider>, b.clone() as Arc<dyn Provider>]);

    fed.search("q", 5, "http://localhost").await;

    assert_eq!(a.search_limits(), vec![2]);
    assert_eq!(b.search_limits(), vec![2]);
}

#[tokio::test]
async fn failing_provider_is_skipped() {
    let a = Arc::new(
        MockProvider::new("Alpha")
            .with_paths("/stream/alpha", "/search/alpha")
            .failing_search(),
    );
    let b = Arc::new(
        MockProvider::new("Beta")
            .with_paths("/stream/beta", "/search/beta")
            .with_hits(hits("beta", 3)),
    );
    let fed = Federator::new(vec![a as Arc<dyn Provider>, b as Arc<dyn Provider>]);

    let results = fed.search("q", 20, "http://localhost").await;

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.source == "Beta"));
}

#[tokio::test]
async fn no_providers_yields_nothing() {
    let fed = Federator::new(Vec::new());
    assert!(fed.search("q", 20, "http://localhost").await.is_empty());
}

#[test]
fn providers_are_found_by_either_path() {
    let a: Arc<dyn Provider> = Arc::new(MockProvider::new("Alpha").with_paths("/stream/alpha", "/search/alpha"));
    let fed = Federator::new(vec![a]);
    assert_eq!(fed.by_path("/stream/alpha").map(|p| p.name().to_string()).as_deref(), Some("Alpha"));
    assert_eq!(fed.by_path("/search/alpha").map(|p| p.name().to_string()).as_deref(), Some("Alpha"));
    assert!(fed.by_path("/stream/other").is_none());
}
