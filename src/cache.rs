use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::{header::HeaderMap, Method};
use serde_json::Value;
use tokio::time::Instant;

use crate::util::lock_unpoisoned;

/// Successful GET response kept by [`ResponseCache`].
#[derive(Clone, Debug, PartialEq)]
pub struct CachedResponse {
    pub data: Value,
    pub status: u16,
    pub headers: HeaderMap,
}

#[derive(Debug)]
struct CacheEntry {
    response: CachedResponse,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) < self.ttl
    }
}

/// Builds the cache key `METHOD:url:json(body)`.
///
/// A missing body is encoded as `null`.
pub fn cache_key(method: &Method, url: &str, body: Option<&Value>) -> String {
    let body = body.map_or_else(|| "null".to_owned(), Value::to_string);
    format!("{method}:{url}:{body}")
}

/// TTL-keyed response store. Expiry is checked on every read; there is no sweeper.
#[derive(Debug)]
pub struct ResponseCache {
    default_ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the entry for `key`, evicting it instead if its TTL elapsed.
    pub fn lookup(&self, key: &str) -> Option<CachedResponse> {
        let now = Instant::now();
        let mut entries = lock_unpoisoned(&self.entries);
        match entries.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(entry.response.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores `response` under `key` for `ttl`, or the default TTL.
    pub fn store(&self, key: String, response: CachedResponse, ttl: Option<Duration>) {
        let entry = CacheEntry {
            response,
            stored_at: Instant::now(),
            ttl: ttl.unwrap_or(self.default_ttl),
        };
        lock_unpoisoned(&self.entries).insert(key, entry);
    }

    /// Removes every entry, or only those whose key contains `pattern`.
    ///
    /// Matching is a plain substring test. Returns the number of removed entries.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        let mut entries = lock_unpoisoned(&self.entries);
        let before = entries.len();
        match pattern {
            None => entries.clear(),
            Some(pattern) => entries.retain(|key, _| !key.contains(pattern)),
        }
        before - entries.len()
    }

    /// Drops expired entries that have not been read since they expired.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = lock_unpoisoned(&self.entries);
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::{header::HeaderMap, Method};
    use serde_json::json;
    use tokio::time::advance;

    use super::{cache_key, CachedResponse, ResponseCache};

    fn response(power_kw: f64) -> CachedResponse {
        CachedResponse {
            data: json!({ "currentPower": power_kw }),
            status: 200,
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn key_includes_method_url_and_body() {
        let url = "https://api/site/1/overview";
        assert_eq!(
            cache_key(&Method::GET, url, None),
            "GET:https://api/site/1/overview:null"
        );
        assert_eq!(
            cache_key(&Method::GET, url, Some(&json!({"a": 1}))),
            r#"GET:https://api/site/1/overview:{"a":1}"#
        );
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_its_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(300));
        cache.store("k".to_owned(), response(4.2), Some(Duration::from_millis(100)));

        advance(Duration::from_millis(50)).await;
        assert_eq!(cache.lookup("k"), Some(response(4.2)));

        advance(Duration::from_millis(100)).await;
        assert_eq!(cache.lookup("k"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn default_ttl_applies_without_override() {
        let cache = ResponseCache::new(Duration::from_millis(200));
        cache.store("k".to_owned(), response(1.0), None);

        advance(Duration::from_millis(199)).await;
        assert!(cache.lookup("k").is_some());
        advance(Duration::from_millis(1)).await;
        assert!(cache.lookup("k").is_none());
    }

    #[test]
    fn invalidate_by_substring_or_everything() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.store("GET:https://api/plants/1:null".to_owned(), response(1.0), None);
        cache.store("GET:https://api/plants/2:null".to_owned(), response(2.0), None);
        cache.store("GET:https://api/alarms:null".to_owned(), response(0.0), None);

        assert_eq!(cache.invalidate(Some("/plants/")), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate(Some("[")), 0);
        assert_eq!(cache.invalidate(None), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_entries() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.store("short".to_owned(), response(1.0), Some(Duration::from_millis(10)));
        cache.store("long".to_owned(), response(2.0), None);

        advance(Duration::from_millis(20)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
