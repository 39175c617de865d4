//! Federated search across every configured provider.
use std::sync::Arc;

use tracing::warn;

use crate::api::{Provider, RawHit};
use crate::models::SearchResult;
use crate::util::construct_url;

pub struct Federator {
    providers: Vec<Arc<dyn Provider>>,
}

impl Federator {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self { providers }
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    /// Provider owning `stream_path` or `search_path` `path`.
    pub fn by_path(&self, path: &str) -> Option<&Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|p| p.stream_path() == path || p.search_path() == path)
    }

    /// Search every provider with `limit / providers` each and concatenate in
    /// provider order. The division remainder is dropped, not redistributed.
    /// A failing provider contributes nothing.
    pub async fn search(&self, query: &str, limit: u32, base: &str) -> Vec<SearchResult> {
        if self.providers.is_empty() {
            return Vec::new();
        }
        let share = limit / self.providers.len() as u32;
        let searches = self.providers.iter().map(|p| async move {
            match p.search(query, share).await {
                Ok(hits) => normalize(p.as_ref(), hits, base),
                Err(e) => {
                    warn!("{} search failed, skipping its results: {}", p.name(), e);
                    Vec::new()
                }
            }
        });
        // join_all keeps input order regardless of completion order.
        futures::future::join_all(searches)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Turn raw hits into results whose URLs point at this gateway.
pub fn normalize(provider: &dyn Provider, hits: Vec<RawHit>, base: &str) -> Vec<SearchResult> {
    hits.into_iter()
        .filter_map(|hit| {
            let url = construct_url(base, provider.stream_path(), &[(provider.id_param(), &hit.id)])?;
            Some(SearchResult {
                title: hit.title,
                playback_url: url,
                source: provider.name().to_string(),
            })
        })
        .collect()
}
