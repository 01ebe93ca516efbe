//! URL canonicalisation and interning
//!
//! Every URL in the system is referred to by an opaque integer ID handed
//! out exactly once per canonical form. Canonicalisation lower-cases
//! scheme and host, strips default ports and fragments, drops tracking
//! parameters, stably sorts the query string and optionally folds
//! `index.html` to the directory form.

use std::sync::Arc;

use dashmap::DashMap;
use sqlx::{Row, SqlitePool};
use url::Url;

use crate::error::{CrawlError, Result};

mod canonical;

pub use canonical::{canonicalize, default_tracking_params};

/// Opaque identifier for an interned URL
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct UrlId(pub i64);

impl std::fmt::Display for UrlId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Settings consulted during canonicalisation
#[derive(Debug, Clone)]
pub struct CanonicalPolicy {
    /// Query parameters removed before sorting
    pub tracking_params: Vec<String>,
    /// Fold trailing `index.html` / `index.htm` / `index.php` to `/`
    pub fold_index_pages: bool,
}

impl Default for CanonicalPolicy {
    fn default() -> Self {
        Self {
            tracking_params: default_tracking_params(),
            fold_index_pages: true,
        }
    }
}

/// Process-wide intern table mapping canonical URLs to stable IDs.
///
/// Backed by the `urls` table; a `DashMap` caches both directions so hot
/// crawl paths rarely touch SQLite.
pub struct UrlStore {
    pool: SqlitePool,
    policy: CanonicalPolicy,
    by_canonical: DashMap<String, UrlId>,
    by_id: DashMap<UrlId, Arc<str>>,
}

impl UrlStore {
    /// Create a store over an already-initialised pool
    #[must_use]
    pub fn new(pool: SqlitePool, policy: CanonicalPolicy) -> Self {
        Self {
            pool,
            policy,
            by_canonical: DashMap::new(),
            by_id: DashMap::new(),
        }
    }

    /// Canonicalise `raw` without interning it
    pub fn canonical_form(&self, raw: &str) -> Result<String> {
        let url = canonicalize(raw, &self.policy)?;
        Ok(url.to_string())
    }

    /// Parse, canonicalise and insert-or-lookup atomically.
    ///
    /// Equivalent raw forms always return the same ID for the lifetime of
    /// the underlying database.
    pub async fn intern(&self, raw: &str) -> Result<UrlId> {
        let url = canonicalize(raw, &self.policy)?;
        let canonical = url.to_string();

        if let Some(id) = self.by_canonical.get(&canonical) {
            let id = *id;
            sqlx::query("UPDATE urls SET last_seen = ?1 WHERE id = ?2")
                .bind(chrono::Utc::now().timestamp())
                .bind(id.0)
                .execute(&self.pool)
                .await?;
            return Ok(id);
        }

        let host = url.host_str().unwrap_or_default().to_string();
        let now = chrono::Utc::now().timestamp();

        // INSERT OR IGNORE + SELECT keeps the canonical→id mapping unique
        // even under concurrent interning of the same URL.
        sqlx::query(
            "INSERT INTO urls (canonical, host, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(canonical) DO UPDATE SET last_seen = ?3",
        )
        .bind(&canonical)
        .bind(&host)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT id FROM urls WHERE canonical = ?1")
            .bind(&canonical)
            .fetch_one(&self.pool)
            .await?;
        let id = UrlId(row.get::<i64, _>(0));

        self.by_canonical.insert(canonical.clone(), id);
        self.by_id.insert(id, Arc::from(canonical.as_str()));
        Ok(id)
    }

    /// Inverse of [`intern`](Self::intern): the canonical string for an ID
    pub async fn resolve(&self, id: UrlId) -> Result<String> {
        if let Some(s) = self.by_id.get(&id) {
            return Ok(s.to_string());
        }
        let row = sqlx::query("SELECT canonical FROM urls WHERE id = ?1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CrawlError::InvalidInput(format!("unknown url id {id}")))?;
        let canonical: String = row.get(0);
        self.by_id.insert(id, Arc::from(canonical.as_str()));
        self.by_canonical.insert(canonical.clone(), id);
        Ok(canonical)
    }

    /// Lower-cased host of an interned URL
    pub async fn host_of(&self, id: UrlId) -> Result<String> {
        let canonical = self.resolve(id).await?;
        let url = Url::parse(&canonical)
            .map_err(|e| CrawlError::Internal(format!("stored canonical unparsable: {e}")))?;
        Ok(url.host_str().unwrap_or_default().to_string())
    }

    /// Number of distinct URLs interned so far
    pub async fn len(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) FROM urls")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>(0) as u64)
    }

    /// True if no URL has been interned yet
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// The canonicalisation policy in effect
    #[must_use]
    pub fn policy(&self) -> &CanonicalPolicy {
        &self.policy
    }
}
