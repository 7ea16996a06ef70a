use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;

/// Cached response body.
///
/// The body is wrapped in `Arc` so every document that resolves to the
/// same URL shares one buffer.
///
/// # Examples
///
/// ```
/// use xslt_core::cache::CachedBody;
/// use std::sync::Arc;
/// use std::time::Instant;
///
/// let body = CachedBody {
///     body: Arc::from("<xsl:stylesheet/>"),
///     fetched_at: Instant::now(),
/// };
///
/// let cloned = body.clone();
/// assert!(Arc::ptr_eq(&body.body, &cloned.body));
/// ```
#[derive(Debug, Clone)]
pub struct CachedBody {
    pub body: Arc<str>,
    pub fetched_at: Instant,
}

/// Fetch-once response cache keyed by absolute URL.
///
/// Entries are never revalidated or evicted: once a URL has been fetched
/// successfully with caching enabled, every later request for it is served
/// from memory. Use [`clear`](Self::clear) to start over.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: DashMap<String, CachedBody>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached body for `url`, if any.
    pub fn get(&self, url: &str) -> Option<Arc<str>> {
        self.entries.get(url).map(|entry| Arc::clone(&entry.body))
    }

    /// Stores a successfully fetched body. An existing entry is kept.
    pub fn insert(&self, url: &str, body: &str) -> Arc<str> {
        let entry = self
            .entries
            .entry(url.to_string())
            .or_insert_with(|| CachedBody {
                body: Arc::from(body),
                fetched_at: Instant::now(),
            });
        tracing::debug!(url, "cached response body");
        Arc::clone(&entry.body)
    }

    /// Clears all cached entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache contains no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
