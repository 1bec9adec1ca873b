//! Container registry adapter and tag cache

use crate::domain::ports::{TagFetcher, TagFetcherRef};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

const SERVICE: &str = "registry";

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// [`TagFetcher`] over the Docker Registry v2 API
#[derive(Debug, Clone)]
pub struct RegistryTagFetcher {
    base_url: String,
    client: reqwest::Client,
}

impl RegistryTagFetcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl TagFetcher for RegistryTagFetcher {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let url = format!("{}/v2/{}/tags/list", self.base_url, repository);
        debug!(%url, "listing image tags");

        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            StatusCode::TOO_MANY_REQUESTS => Err(Error::Throttled {
                service: SERVICE.to_string(),
            }),
            status if status.is_success() => {
                let list: TagList = response.json().await?;
                Ok(list.tags.unwrap_or_default())
            }
            status => Err(Error::External {
                service: SERVICE.to_string(),
                reason: format!("{} listing tags of {}", status, repository),
            }),
        }
    }
}

// =============================================================================
// Tag Cache
// =============================================================================

/// Caches tag listings per repository for a fixed TTL
pub struct TagCache {
    fetcher: TagFetcherRef,
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, Vec<String>)>>,
}

impl TagCache {
    pub fn new(fetcher: TagFetcherRef, ttl: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Tags of `repository`, fetched when the cached listing is older than the TTL
    pub async fn tags(&self, repository: &str) -> Result<Vec<String>> {
        let cached = self
            .entries
            .read()
            .get(repository)
            .filter(|(fetched_at, _)| fetched_at.elapsed() < self.ttl)
            .map(|(_, tags)| tags.clone());
        if let Some(tags) = cached {
            return Ok(tags);
        }

        let tags = self.fetcher.list_tags(repository).await?;
        self.entries
            .write()
            .insert(repository.to_string(), (Instant::now(), tags.clone()));
        Ok(tags)
    }

    /// Drop every cached listing
    pub fn invalidate(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TagFetcher for CountingFetcher {
        async fn list_tags(&self, _repository: &str) -> Result<Vec<String>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![format!("{}-abc1234-main", n + 1)])
        }
    }

    #[tokio::test]
    async fn test_cache_honors_ttl() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
        });
        let cache = TagCache::new(fetcher.clone(), Duration::from_secs(300));

        assert_eq!(cache.tags("web").await.unwrap(), vec!["1-abc1234-main"]);
        assert_eq!(cache.tags("web").await.unwrap(), vec!["1-abc1234-main"]);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        cache.invalidate();
        assert_eq!(cache.tags("web").await.unwrap(), vec!["2-abc1234-main"]);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_fetches() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
        });
        let cache = TagCache::new(fetcher.clone(), Duration::ZERO);

        cache.tags("web").await.unwrap();
        cache.tags("web").await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_registry_lists_tags() {
        let app = Router::new().route(
            "/v2/team/web/tags/list",
            get(|| async { Json(serde_json::json!({"name": "team/web", "tags": ["1-abc1234-main"]})) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let fetcher = RegistryTagFetcher::new(format!("http://{}/", addr), Duration::from_secs(5)).unwrap();
        assert_eq!(fetcher.list_tags("team/web").await.unwrap(), vec!["1-abc1234-main"]);
        assert!(fetcher.list_tags("team/unknown").await.unwrap().is_empty());
    }
}
