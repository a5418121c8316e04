//! # Page Cache
//!
//! Short-lived cache of fetched product pages keyed by URL. Several chats
//! tracking the same product share one request per poll cycle, and the page
//! fetched by `/add` for the display name is reused by the first poll.
//!
//! Only successful fetches are cached; a failure is always retried on the
//! next request. The TTL must stay below the poll interval so that every
//! cycle looks at a fresh page.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::errors::FetchError;
use crate::fetcher::PageFetcher;
use crate::observability;

/// Cached page with its expiry time
#[derive(Debug, Clone)]
struct CacheEntry {
    html: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// [`PageFetcher`] decorator answering repeated requests from memory
pub struct CachedPageFetcher {
    inner: Arc<dyn PageFetcher>,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CachedPageFetcher {
    /// Wrap `inner`; a zero `ttl` turns caching off
    pub fn new(inner: Arc<dyn PageFetcher>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lookup(&self, url: &str, now: Instant) -> Option<String> {
        let entries = self.entries.lock();
        entries
            .get(url)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.html.clone())
    }

    fn store(&self, url: &str, html: &str, now: Instant) {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.insert(
            url.to_string(),
            CacheEntry {
                html: html.to_string(),
                expires_at: now + self.ttl,
            },
        );
    }

    async fn fetch_at(&self, url: &str, now: Instant) -> Result<String, FetchError> {
        if self.ttl.is_zero() {
            return self.inner.fetch(url).await;
        }

        if let Some(html) = self.lookup(url, now) {
            observability::record_page_cache(true);
            debug!(url = %url, "Page served from cache");
            return Ok(html);
        }
        observability::record_page_cache(false);

        let html = self.inner.fetch(url).await?;
        self.store(url, &html, now);
        Ok(html)
    }
}

#[async_trait]
impl PageFetcher for CachedPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.fetch_at(url, Instant::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const URL: &str = "https://www.amazon.in/dp/B0CHX1W1XY";

    /// Succeeds unless `failing` is set, counting every call
    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
        failing: AtomicBool,
    }

    #[async_trait]
    impl PageFetcher for CountingFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failing.load(Ordering::SeqCst) {
                return Err(FetchError::Timeout { url: url.to_string() });
            }
            Ok(format!("page {}", call))
        }
    }

    fn held(cache: &CachedPageFetcher) -> usize {
        cache.entries.lock().len()
    }

    fn cached(ttl: Duration) -> (Arc<CountingFetcher>, CachedPageFetcher) {
        let inner = Arc::new(CountingFetcher::default());
        let cache = CachedPageFetcher::new(inner.clone(), ttl);
        (inner, cache)
    }

    #[tokio::test]
    async fn test_repeated_fetch_within_ttl_hits_cache() {
        let (inner, cache) = cached(Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(cache.fetch_at(URL, now).await.unwrap(), "page 1");
        assert_eq!(cache.fetch_at(URL, now + Duration::from_secs(30)).await.unwrap(), "page 1");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let (inner, cache) = cached(Duration::from_secs(60));
        let now = Instant::now();

        cache.fetch_at(URL, now).await.unwrap();
        let later = cache.fetch_at(URL, now + Duration::from_secs(60)).await.unwrap();
        assert_eq!(later, "page 2");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let (inner, cache) = cached(Duration::from_secs(60));
        let now = Instant::now();

        inner.failing.store(true, Ordering::SeqCst);
        assert!(cache.fetch_at(URL, now).await.is_err());
        assert_eq!(held(&cache), 0);

        inner.failing.store(false, Ordering::SeqCst);
        assert_eq!(cache.fetch_at(URL, now).await.unwrap(), "page 2");
        assert_eq!(held(&cache), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_caching() {
        let (inner, cache) = cached(Duration::ZERO);

        cache.fetch(URL).await.unwrap();
        cache.fetch(URL).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(held(&cache), 0);
    }

    #[tokio::test]
    async fn test_expired_entries_are_evicted_on_insert() {
        let (_inner, cache) = cached(Duration::from_secs(60));
        let now = Instant::now();

        cache.fetch_at(URL, now).await.unwrap();
        cache
            .fetch_at("https://www.amazon.in/dp/B000000002", now + Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(held(&cache), 1);
    }
}
