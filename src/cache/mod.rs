//! Unified HTTP cache facade
//!
//! One cache for webpage fetches and structured API responses (SPARQL,
//! entity lookups). Entries are keyed by a deterministic fingerprint of
//! `(method, canonical URL, cache-relevant parameters)`, carry a
//! per-sub-type TTL, and are evicted least-recently-used once the byte
//! ceiling is reached. Bodies are held gzip-compressed.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use xxhash_rust::xxh3::Xxh3;

use crate::error::{CrawlError, Result};

/// Content sub-types the cache distinguishes for TTL policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheSubtype {
    Html,
    SparqlResults,
    JsonEntities,
    GeoAdmin,
    Other,
}

impl CacheSubtype {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::SparqlResults => "sparql-results",
            Self::JsonEntities => "json-entities",
            Self::GeoAdmin => "geo-admin",
            Self::Other => "other",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "html" => Some(Self::Html),
            "sparql-results" => Some(Self::SparqlResults),
            "json-entities" => Some(Self::JsonEntities),
            "geo-admin" => Some(Self::GeoAdmin),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Per-sub-type TTLs; defaults follow the freshness needs of each source
#[derive(Debug, Clone)]
pub struct CacheTtlPolicy {
    ttls: HashMap<CacheSubtype, Duration>,
}

impl Default for CacheTtlPolicy {
    fn default() -> Self {
        let mut ttls = HashMap::new();
        ttls.insert(CacheSubtype::Html, Duration::from_secs(7 * 24 * 3600));
        ttls.insert(CacheSubtype::SparqlResults, Duration::from_secs(24 * 3600));
        ttls.insert(CacheSubtype::JsonEntities, Duration::from_secs(24 * 3600));
        ttls.insert(CacheSubtype::GeoAdmin, Duration::from_secs(7 * 24 * 3600));
        ttls.insert(CacheSubtype::Other, Duration::from_secs(24 * 3600));
        Self { ttls }
    }
}

impl CacheTtlPolicy {
    /// Build a policy from a configured `sub-type name → seconds` map;
    /// unknown names are ignored, unnamed sub-types keep their defaults.
    #[must_use]
    pub fn from_secs_map(overrides: &HashMap<String, u64>) -> Self {
        let mut policy = Self::default();
        for (name, secs) in overrides {
            if let Some(subtype) = CacheSubtype::parse(name) {
                policy.set_ttl(subtype, Duration::from_secs(*secs));
            }
        }
        policy
    }

    /// TTL for a sub-type
    #[must_use]
    pub fn ttl(&self, subtype: CacheSubtype) -> Duration {
        self.ttls
            .get(&subtype)
            .copied()
            .unwrap_or(Duration::from_secs(24 * 3600))
    }

    /// Override a sub-type's TTL
    pub fn set_ttl(&mut self, subtype: CacheSubtype, ttl: Duration) {
        self.ttls.insert(subtype, ttl);
    }
}

/// Deterministic cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(pub u64);

impl CacheKey {
    /// Fingerprint of `(method, canonical URL, cache-relevant params)`.
    ///
    /// Parameters are sorted before hashing so caller ordering never
    /// produces distinct keys.
    #[must_use]
    pub fn fingerprint(method: &str, canonical_url: &str, params: &[(&str, &str)]) -> Self {
        let mut hasher = Xxh3::new();
        hasher.update(method.to_ascii_uppercase().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(canonical_url.as_bytes());
        let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
        sorted.sort();
        for (k, v) in sorted {
            hasher.update(b"\x1f");
            hasher.update(k.as_bytes());
            hasher.update(b"\x1e");
            hasher.update(v.as_bytes());
        }
        Self(hasher.digest())
    }
}

/// A cached response
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub subtype: CacheSubtype,
    pub created_at: Instant,
    pub hits: u64,
}

impl CacheEntry {
    /// Age of the entry at `now`
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// Result of a cache lookup
#[derive(Debug)]
pub enum CacheLookup {
    Hit(CacheEntry),
    /// Present but past its TTL; usable only as a stale fallback
    Expired(CacheEntry),
    Miss,
}

struct StoredEntry {
    status: u16,
    headers: Vec<(String, String)>,
    compressed_body: Vec<u8>,
    uncompressed_len: usize,
    subtype: CacheSubtype,
    url: String,
    created_at: Instant,
    hits: u64,
}

impl StoredEntry {
    fn cost(&self) -> usize {
        self.compressed_body.len() + self.url.len() + 128
    }
}

struct CacheInner {
    entries: LruCache<CacheKey, StoredEntry>,
    total_bytes: usize,
}

/// The process-wide cache facade
pub struct HttpCache {
    inner: Mutex<CacheInner>,
    policy: CacheTtlPolicy,
    max_bytes: usize,
}

impl HttpCache {
    /// Create a cache with the default TTL policy and a 256 MiB ceiling
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(CacheTtlPolicy::default(), 256 * 1024 * 1024)
    }

    /// Create a cache with an explicit policy and byte ceiling
    #[must_use]
    pub fn with_policy(policy: CacheTtlPolicy, max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(NonZeroUsize::new(100_000).unwrap_or(NonZeroUsize::MIN)),
                total_bytes: 0,
            }),
            policy,
            max_bytes: max_bytes.max(1024),
        }
    }

    /// Look a key up; distinguishes fresh hits from expired entries.
    pub fn lookup(&self, key: CacheKey) -> Result<CacheLookup> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let Some(stored) = inner.entries.get_mut(&key) else {
            return Ok(CacheLookup::Miss);
        };
        stored.hits += 1;
        let ttl = self.policy.ttl(stored.subtype);
        let entry = CacheEntry {
            status: stored.status,
            headers: stored.headers.clone(),
            body: gunzip(&stored.compressed_body, stored.uncompressed_len)?,
            subtype: stored.subtype,
            created_at: stored.created_at,
            hits: stored.hits,
        };
        if entry.age(now) > ttl {
            Ok(CacheLookup::Expired(entry))
        } else {
            Ok(CacheLookup::Hit(entry))
        }
    }

    /// Store a response. Runs LRU eviction opportunistically if the byte
    /// ceiling is exceeded; eviction never touches entries already handed
    /// out to readers (bodies are copied out on lookup).
    pub fn store(
        &self,
        key: CacheKey,
        url: &str,
        status: u16,
        headers: Vec<(String, String)>,
        body: &[u8],
        subtype: CacheSubtype,
    ) -> Result<()> {
        let stored = StoredEntry {
            status,
            headers,
            compressed_body: gzip_fast(body)?,
            uncompressed_len: body.len(),
            subtype,
            url: url.to_string(),
            created_at: Instant::now(),
            hits: 0,
        };
        let cost = stored.cost();
        let mut inner = self.inner.lock();
        if let Some(old) = inner.entries.put(key, stored) {
            inner.total_bytes = inner.total_bytes.saturating_sub(old.cost());
        }
        inner.total_bytes += cost;
        while inner.total_bytes > self.max_bytes {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.total_bytes = inner.total_bytes.saturating_sub(evicted.cost());
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Drop a single key
    pub fn invalidate(&self, key: CacheKey) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.entries.pop(&key) {
            inner.total_bytes = inner.total_bytes.saturating_sub(old.cost());
        }
    }

    /// Drop every entry whose URL starts with `prefix`
    pub fn invalidate_prefix(&self, prefix: &str) {
        let mut inner = self.inner.lock();
        let doomed: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.url.starts_with(prefix))
            .map(|(k, _)| *k)
            .collect();
        for key in doomed {
            if let Some(old) = inner.entries.pop(&key) {
                inner.total_bytes = inner.total_bytes.saturating_sub(old.cost());
            }
        }
    }

    /// Number of live entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True if the cache holds nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current byte accounting
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }
}

impl Default for HttpCache {
    fn default() -> Self {
        Self::new()
    }
}

fn gzip_fast(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder =
        flate2::write::GzEncoder::new(Vec::with_capacity(data.len() / 2), flate2::Compression::fast());
    encoder
        .write_all(data)
        .and_then(|()| encoder.finish())
        .map_err(|e| CrawlError::Internal(format!("cache gzip: {e}")))
}

fn gunzip(data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::with_capacity(expected_len);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CrawlError::Internal(format!("cache gunzip: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_param_order() {
        let a = CacheKey::fingerprint("GET", "https://example.com/", &[("a", "1"), ("b", "2")]);
        let b = CacheKey::fingerprint("GET", "https://example.com/", &[("b", "2"), ("a", "1")]);
        assert_eq!(a, b);
        let c = CacheKey::fingerprint("POST", "https://example.com/", &[("a", "1"), ("b", "2")]);
        assert_ne!(a, c);
    }

    #[test]
    fn store_then_lookup_round_trips_body() {
        let cache = HttpCache::new();
        let key = CacheKey::fingerprint("GET", "https://example.com/page", &[]);
        let body = b"<html>hello</html>".repeat(100);
        cache
            .store(key, "https://example.com/page", 200, vec![], &body, CacheSubtype::Html)
            .expect("store");
        match cache.lookup(key).expect("lookup") {
            CacheLookup::Hit(entry) => assert_eq!(entry.body, body),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[test]
    fn prefix_invalidation_drops_matching_entries() {
        let cache = HttpCache::new();
        for path in ["a", "b", "c"] {
            let url = format!("https://example.com/{path}");
            let key = CacheKey::fingerprint("GET", &url, &[]);
            cache
                .store(key, &url, 200, vec![], b"x", CacheSubtype::Html)
                .expect("store");
        }
        let other = CacheKey::fingerprint("GET", "https://other.com/a", &[]);
        cache
            .store(other, "https://other.com/a", 200, vec![], b"x", CacheSubtype::Html)
            .expect("store");
        cache.invalidate_prefix("https://example.com/");
        assert_eq!(cache.len(), 1);
        assert!(matches!(cache.lookup(other), Ok(CacheLookup::Hit(_))));
    }

    #[test]
    fn byte_ceiling_evicts_lru() {
        let cache = HttpCache::with_policy(CacheTtlPolicy::default(), 4096);
        for i in 0..64 {
            let url = format!("https://example.com/{i}");
            let key = CacheKey::fingerprint("GET", &url, &[]);
            // Random-ish bytes defeat gzip so each entry keeps real weight.
            let body: Vec<u8> = (0..512u32).map(|j| ((i * 7 + j * 13) % 251) as u8).collect();
            cache
                .store(key, &url, 200, vec![], &body, CacheSubtype::Html)
                .expect("store");
        }
        assert!(cache.total_bytes() <= 4096 + 1024);
        assert!(cache.len() < 64);
    }
}
