//! HTTP responses, content analyses and the link graph

use sqlx::Row;

use super::content::ContentRef;
use super::Storage;
use crate::analyzer::ContentAnalysis;
use crate::error::Result;
use crate::urlstore::UrlId;

/// A persisted HTTP response header row
#[derive(Debug, Clone)]
pub struct HttpResponseRow {
    pub id: i64,
    pub url_id: UrlId,
    pub status: u16,
    pub fetched_at: i64,
    pub headers: Vec<(String, String)>,
    pub content_ref: Option<ContentRef>,
    pub elapsed_ms: u64,
}

impl Storage {
    /// Persist a fetched response. Historical rows are retained; the latest
    /// row per URL drives freshness decisions.
    pub async fn put_http_response(
        &self,
        url_id: UrlId,
        status: u16,
        headers: &[(String, String)],
        content_ref: Option<ContentRef>,
        elapsed_ms: u64,
    ) -> Result<i64> {
        let headers_json = serde_json::to_string(headers)
            .map_err(|e| crate::error::CrawlError::Internal(format!("encode headers: {e}")))?;
        let row = sqlx::query(
            "INSERT INTO http_responses (url_id, status, fetched_at, headers, content_ref, elapsed_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING id",
        )
        .bind(url_id.0)
        .bind(status as i64)
        .bind(chrono::Utc::now().timestamp())
        .bind(headers_json)
        .bind(content_ref.map(|c| c.0))
        .bind(elapsed_ms as i64)
        .fetch_one(self.pool())
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    /// Latest response for a URL, if any
    pub async fn latest_response(&self, url_id: UrlId) -> Result<Option<HttpResponseRow>> {
        let row = sqlx::query(
            "SELECT id, url_id, status, fetched_at, headers, content_ref, elapsed_ms
             FROM http_responses WHERE url_id = ?1
             ORDER BY fetched_at DESC, id DESC LIMIT 1",
        )
        .bind(url_id.0)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| response_from_row(&r)).transpose()
    }

    /// Count of stored responses for a URL
    pub async fn response_count(&self, url_id: UrlId) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) FROM http_responses WHERE url_id = ?1")
            .bind(url_id.0)
            .fetch_one(self.pool())
            .await?;
        Ok(row.get::<i64, _>(0) as u64)
    }

    /// Persist analyzer output for a content body.
    ///
    /// `persist_signals` gates the per-decision explanation JSON.
    pub async fn put_content_analysis(
        &self,
        content_ref: ContentRef,
        analysis: &ContentAnalysis,
        persist_signals: bool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO content_analysis
                (content_ref, classification, title, published_date, word_count, language,
                 nav_link_count, article_link_count, place_ids, topic_ids, signals)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(content_ref) DO UPDATE SET
                classification = excluded.classification,
                title = excluded.title,
                published_date = excluded.published_date,
                word_count = excluded.word_count,
                language = excluded.language,
                nav_link_count = excluded.nav_link_count,
                article_link_count = excluded.article_link_count,
                place_ids = excluded.place_ids,
                topic_ids = excluded.topic_ids,
                signals = excluded.signals",
        )
        .bind(content_ref.0)
        .bind(analysis.classification.as_str())
        .bind(analysis.title.as_deref())
        .bind(analysis.published_date.as_deref())
        .bind(analysis.word_count as i64)
        .bind(analysis.language.as_deref())
        .bind(analysis.nav_link_count as i64)
        .bind(analysis.article_link_count as i64)
        .bind(serde_json::to_string(&analysis.place_ids).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&analysis.topic_ids).unwrap_or_else(|_| "[]".into()))
        .bind(if persist_signals {
            Some(analysis.signals.to_string())
        } else {
            None
        })
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Classification stored for a content body, if analysed
    pub async fn get_classification(&self, content_ref: ContentRef) -> Result<Option<String>> {
        let row = sqlx::query("SELECT classification FROM content_analysis WHERE content_ref = ?1")
            .bind(content_ref.0)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| r.get(0)))
    }

    /// Persist a link edge; duplicate edges are ignored
    pub async fn put_link(
        &self,
        src: UrlId,
        dst: UrlId,
        anchor: Option<&str>,
        rel: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO links (src_url_id, dst_url_id, anchor, rel, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(src.0)
        .bind(dst.0)
        .bind(anchor)
        .bind(rel)
        .bind(chrono::Utc::now().timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Host column for an interned URL; used by queue rehydration
    pub async fn url_host(&self, url_id: UrlId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT host FROM urls WHERE id = ?1")
            .bind(url_id.0)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| r.get(0)))
    }

    /// Outbound degree per URL for a host; feeds the planner's graph reasoner
    pub async fn host_out_degrees(&self, host: &str) -> Result<Vec<(UrlId, u64)>> {
        let rows = sqlx::query(
            "SELECT l.src_url_id, COUNT(*) AS degree
             FROM links l JOIN urls u ON u.id = l.src_url_id
             WHERE u.host = ?1
             GROUP BY l.src_url_id
             ORDER BY degree DESC
             LIMIT 256",
        )
        .bind(host)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .iter()
            .map(|r| (UrlId(r.get(0)), r.get::<i64, _>(1) as u64))
            .collect())
    }
}

fn response_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<HttpResponseRow> {
    let headers: Vec<(String, String)> =
        serde_json::from_str(&row.get::<String, _>(4)).unwrap_or_default();
    Ok(HttpResponseRow {
        id: row.get(0),
        url_id: UrlId(row.get(1)),
        status: row.get::<i64, _>(2) as u16,
        fetched_at: row.get(3),
        headers,
        content_ref: row.get::<Option<i64>, _>(5).map(ContentRef),
        elapsed_ms: row.get::<i64, _>(6) as u64,
    })
}
