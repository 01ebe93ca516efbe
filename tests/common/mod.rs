//! Test utilities shared by the integration suite

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;

use newswire_crawler::error::{CrawlError, Result};
use newswire_crawler::fetch::{FetchedResponse, Fetcher};

/// A canned response for one URL
#[derive(Debug, Clone)]
pub struct CannedPage {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl CannedPage {
    #[allow(dead_code)]
    pub fn html(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: "text/html",
            body: body.into(),
        }
    }

    #[allow(dead_code)]
    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body: body.into(),
        }
    }
}

/// In-process fetcher serving canned pages; unknown URLs get 404.
/// Records per-URL hit counts and fetch instants for pacing assertions.
pub struct StubFetcher {
    pages: Mutex<HashMap<String, CannedPage>>,
    hits: Mutex<HashMap<String, u64>>,
    fetch_times: Mutex<Vec<(String, Instant)>>,
    total: AtomicU64,
}

impl StubFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(HashMap::new()),
            hits: Mutex::new(HashMap::new()),
            fetch_times: Mutex::new(Vec::new()),
            total: AtomicU64::new(0),
        })
    }

    pub fn put(&self, url: &str, page: CannedPage) {
        self.pages.lock().insert(url.to_string(), page);
    }

    #[allow(dead_code)]
    pub fn hits(&self, url: &str) -> u64 {
        self.hits.lock().get(url).copied().unwrap_or(0)
    }

    #[allow(dead_code)]
    pub fn total_fetches(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Fetch instants for URLs containing `fragment`
    #[allow(dead_code)]
    pub fn fetch_times_matching(&self, fragment: &str) -> Vec<Instant> {
        self.fetch_times
            .lock()
            .iter()
            .filter(|(url, _)| url.contains(fragment))
            .map(|(_, t)| *t)
            .collect()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResponse> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.hits.lock().entry(url.to_string()).or_insert(0) += 1;
        self.fetch_times.lock().push((url.to_string(), Instant::now()));

        let page = self.pages.lock().get(url).cloned();
        match page {
            Some(page) => Ok(FetchedResponse {
                status: page.status,
                headers: vec![("content-type".to_string(), page.content_type.to_string())],
                body: page.body,
                final_url: url.to_string(),
                elapsed_ms: 1,
            }),
            None => Ok(FetchedResponse {
                status: 404,
                headers: vec![("content-type".to_string(), "text/html".to_string())],
                body: b"not found".to_vec(),
                final_url: url.to_string(),
                elapsed_ms: 1,
            }),
        }
    }
}

/// A fetcher that always fails with a transient error
#[allow(dead_code)]
pub struct FailingFetcher;

#[async_trait]
impl Fetcher for FailingFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResponse> {
        Err(CrawlError::TransientNetwork(format!("{url}: connection reset")))
    }
}

/// A small news site: an index hub linking to dated article pages
#[allow(dead_code)]
pub fn seed_news_site(fetcher: &StubFetcher, origin: &str, article_count: usize) {
    let mut index_links = String::new();
    for i in 0..article_count {
        index_links.push_str(&format!(
            r#"<a href="/2026/07/{:02}/story-about-topic-number-{i}">Story about topic number {i} headline</a>"#,
            (i % 28) + 1
        ));
    }
    fetcher.put(
        &format!("{origin}/"),
        CannedPage::html(format!(
            "<html><head><title>The Example Times</title></head><body>{index_links}</body></html>"
        )),
    );
    for i in 0..article_count {
        let words = "word ".repeat(300);
        fetcher.put(
            &format!("{origin}/2026/07/{:02}/story-about-topic-number-{i}", (i % 28) + 1),
            CannedPage::html(format!(
                "<html><head><title>Story {i}</title></head><body><p>{words}</p></body></html>"
            )),
        );
    }
}

/// A restcountries-style payload with three countries, one multi-capital
#[allow(dead_code)]
pub fn countries_payload() -> serde_json::Value {
    serde_json::json!([
        {
            "name": { "common": "France", "official": "French Republic" },
            "cca2": "FR",
            "capital": ["Paris"],
            "latlng": [46.0, 2.0],
            "population": 67391582,
            "altSpellings": ["FR", "République française"]
        },
        {
            "name": { "common": "South Africa", "official": "Republic of South Africa" },
            "cca2": "ZA",
            "capital": ["Pretoria", "Cape Town", "Bloemfontein"],
            "latlng": [-29.0, 24.0],
            "population": 59308690,
            "altSpellings": ["ZA", "RSA"]
        },
        {
            "name": { "common": "Germany", "official": "Federal Republic of Germany" },
            "cca2": "DE",
            "capital": ["Berlin"],
            "latlng": [51.0, 9.0],
            "population": 83240525,
            "altSpellings": ["DE", "Deutschland"]
        }
    ])
}
