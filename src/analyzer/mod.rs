//! Page analyzer / classifier
//!
//! A pure function of `(url, response, content, gazetteer, topics)`; no
//! I/O. For a fixed gazetteer/topic snapshot and identical input the
//! output is byte-identical across runs.
//!
//! Classification scoring: the response status and content type decide
//! the non-HTML kinds outright. For HTML, the URL path is matched
//! against the gazetteer and topic index to count place and topic
//! dimensions. A page whose outbound links are dominated by
//! article-shaped links (at least [`HUB_MIN_ARTICLE_LINKS`], and at
//! least twice the nav links) is a hub, sub-typed by its dimensions; a
//! prose-dominated page of [`ARTICLE_MIN_WORDS`] or more words with a
//! title is an article; shallow link-heavy pages fall to nav / index /
//! listing / category by path shape.

use url::Url;

use crate::gazetteer::{Gazetteer, TopicIndex};

pub mod signals;
pub mod taxonomy;

pub use signals::{date_from_path, extract_links, has_date_segments, page_signals, ExtractedLink, PageSignals};
pub use taxonomy::PageKind;

/// A hub needs at least this many article-shaped links
pub const HUB_MIN_ARTICLE_LINKS: u32 = 8;
/// An article needs at least this many words of prose
pub const ARTICLE_MIN_WORDS: u32 = 250;

/// Everything the analyzer may look at
pub struct AnalyzerInput<'a> {
    pub url: &'a str,
    pub status: u16,
    pub content_type: Option<&'a str>,
    pub body: &'a str,
    pub links: &'a [ExtractedLink],
    pub gazetteer: &'a Gazetteer,
    pub topics: &'a TopicIndex,
}

/// Analyzer output, persisted per content body
#[derive(Debug, Clone)]
pub struct ContentAnalysis {
    pub classification: PageKind,
    pub title: Option<String>,
    pub published_date: Option<String>,
    pub word_count: u32,
    pub language: Option<String>,
    pub place_ids: Vec<i64>,
    pub topic_ids: Vec<i64>,
    pub nav_link_count: u32,
    pub article_link_count: u32,
    /// Why the classification was chosen; drives the explain surface
    pub signals: serde_json::Value,
}

/// Classify one page
#[must_use]
pub fn analyze(input: &AnalyzerInput<'_>) -> ContentAnalysis {
    if let Some(kind) = classify_by_transport(input.status, input.content_type) {
        return ContentAnalysis {
            classification: kind,
            title: None,
            published_date: None,
            word_count: 0,
            language: None,
            place_ids: Vec::new(),
            topic_ids: Vec::new(),
            nav_link_count: 0,
            article_link_count: 0,
            signals: serde_json::json!({
                "decider": "transport",
                "status": input.status,
                "content_type": input.content_type,
            }),
        };
    }

    let page = page_signals(input.body, input.links);
    let (place_ids, topic_ids, path_depth) = match_url_dimensions(input);

    let places = place_ids.len().min(2) as u32;
    let topics = u32::from(!topic_ids.is_empty());
    let hub_shaped = page.article_link_count >= HUB_MIN_ARTICLE_LINKS
        && page.article_link_count >= page.nav_link_count.saturating_mul(2);

    let path = Url::parse(input.url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| "/".to_string());

    let classification = if hub_shaped {
        match (places, topics) {
            (0, 0) if path == "/" => PageKind::Index,
            (0, 0) => PageKind::Hub,
            (1, 0) => PageKind::PlaceHub,
            (_, 0) => PageKind::PlacePlaceHub,
            (0, _) => PageKind::TopicHub,
            (1, _) => PageKind::PlaceTopicHub,
            (_, _) => PageKind::PlacePlaceTopicHub,
        }
    } else if page.word_count >= ARTICLE_MIN_WORDS && page.title.is_some() {
        PageKind::Article
    } else if path == "/" {
        PageKind::Index
    } else if path_contains(&path, "category") || path_contains(&path, "tag") {
        PageKind::Category
    } else if page.nav_link_count + page.article_link_count >= 10 && path_depth <= 1 {
        PageKind::Listing
    } else if page.nav_link_count > page.article_link_count {
        PageKind::Nav
    } else {
        PageKind::Unknown
    };

    let published_date = page
        .published_date
        .clone()
        .or_else(|| date_from_path(&path));

    // whatlang needs a reasonable sample to be trustworthy.
    let language = if page.text_sample.split_whitespace().count() >= 20 {
        whatlang::detect(&page.text_sample).map(|info| info.lang().code().to_string())
    } else {
        None
    };

    let signals = serde_json::json!({
        "decider": "content",
        "hub_shaped": hub_shaped,
        "place_dimensions": places,
        "topic_dimensions": topics,
        "word_count": page.word_count,
        "nav_link_count": page.nav_link_count,
        "article_link_count": page.article_link_count,
        "path_depth": path_depth,
        "has_title": page.title.is_some(),
        "date_source": if page.published_date.is_some() {
            "meta"
        } else if published_date.is_some() {
            "url-path"
        } else {
            "none"
        },
    });

    ContentAnalysis {
        classification,
        title: page.title,
        published_date,
        word_count: page.word_count,
        language,
        place_ids,
        topic_ids,
        nav_link_count: page.nav_link_count,
        article_link_count: page.article_link_count,
        signals,
    }
}

/// Status and content type alone decide the non-HTML kinds
fn classify_by_transport(status: u16, content_type: Option<&str>) -> Option<PageKind> {
    if status >= 400 {
        return Some(PageKind::Error);
    }
    if (300..400).contains(&status) {
        return Some(PageKind::Redirect);
    }
    let ct = content_type?.split(';').next()?.trim().to_lowercase();
    match ct.as_str() {
        "text/html" | "application/xhtml+xml" => None,
        "application/json" | "application/sparql-results+json" | "application/ld+json" => {
            Some(PageKind::ApiResponse)
        }
        "application/pdf" => Some(PageKind::Pdf),
        _ if ct.starts_with("image/") => Some(PageKind::Image),
        _ if ct.starts_with("video/") => Some(PageKind::Video),
        _ if ct.starts_with("audio/") => Some(PageKind::Audio),
        _ if ct.starts_with("application/") => Some(PageKind::Document),
        _ => None,
    }
}

/// Place and topic dimensions from the URL path segments
fn match_url_dimensions(input: &AnalyzerInput<'_>) -> (Vec<i64>, Vec<i64>, u32) {
    let Ok(url) = Url::parse(input.url) else {
        return (Vec::new(), Vec::new(), 0);
    };
    let segments: Vec<&str> = url
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let mut place_ids = Vec::new();
    let mut topic_ids = Vec::new();
    for segment in &segments {
        for m in input.gazetteer.match_slug(segment) {
            if !place_ids.contains(&m.place_id) {
                place_ids.push(m.place_id);
            }
        }
        if let Some(topic_id) = input.topics.match_slug(segment) {
            if !topic_ids.contains(&topic_id) {
                topic_ids.push(topic_id);
            }
        }
    }
    (place_ids, topic_ids, segments.len() as u32)
}

fn path_contains(path: &str, segment: &str) -> bool {
    path.split('/').any(|s| s.eq_ignore_ascii_case(segment))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(
        url: &'a str,
        status: u16,
        content_type: Option<&'a str>,
        body: &'a str,
        links: &'a [ExtractedLink],
        gazetteer: &'a Gazetteer,
        topics: &'a TopicIndex,
    ) -> AnalyzerInput<'a> {
        AnalyzerInput {
            url,
            status,
            content_type,
            body,
            links,
            gazetteer,
            topics,
        }
    }

    fn article_links(n: usize) -> Vec<ExtractedLink> {
        (0..n)
            .map(|i| ExtractedLink {
                href: format!("https://example.com/2026/07/31/story-number-{i}-has-a-long-slug"),
                anchor: format!("Story number {i} with a headline shaped anchor"),
                rel: None,
                nav_like: false,
            })
            .collect()
    }

    #[test]
    fn http_error_is_error_kind() {
        let gaz = Gazetteer::empty();
        let topics = TopicIndex::default_news();
        let analysis = analyze(&input(
            "https://example.com/x",
            404,
            Some("text/html"),
            "",
            &[],
            &gaz,
            &topics,
        ));
        assert_eq!(analysis.classification, PageKind::Error);
    }

    #[test]
    fn json_is_api_response() {
        let gaz = Gazetteer::empty();
        let topics = TopicIndex::default_news();
        let analysis = analyze(&input(
            "https://api.example.com/entities",
            200,
            Some("application/json"),
            "{}",
            &[],
            &gaz,
            &topics,
        ));
        assert_eq!(analysis.classification, PageKind::ApiResponse);
    }

    #[test]
    fn link_dominated_section_is_topic_hub() {
        let gaz = Gazetteer::empty();
        let topics = TopicIndex::default_news();
        let links = article_links(12);
        let body = "<html><head><title>Politics</title></head><body></body></html>";
        let analysis = analyze(&input(
            "https://example.com/politics",
            200,
            Some("text/html"),
            body,
            &links,
            &gaz,
            &topics,
        ));
        assert_eq!(analysis.classification, PageKind::TopicHub);
        assert_eq!(analysis.topic_ids.len(), 1);
    }

    #[test]
    fn prose_page_with_title_is_article() {
        let gaz = Gazetteer::empty();
        let topics = TopicIndex::default_news();
        let words = "word ".repeat(300);
        let body = format!(
            "<html><head><title>A Long Story</title></head><body><p>{words}</p></body></html>"
        );
        let analysis = analyze(&input(
            "https://example.com/2026/07/31/a-long-story",
            200,
            Some("text/html"),
            &body,
            &[],
            &gaz,
            &topics,
        ));
        assert_eq!(analysis.classification, PageKind::Article);
        assert_eq!(analysis.published_date.as_deref(), Some("2026-07-31"));
        assert!(analysis.word_count >= 300);
    }

    #[test]
    fn root_page_is_index() {
        let gaz = Gazetteer::empty();
        let topics = TopicIndex::default_news();
        let analysis = analyze(&input(
            "https://example.com/",
            200,
            Some("text/html"),
            "<html><body></body></html>",
            &[],
            &gaz,
            &topics,
        ));
        assert_eq!(analysis.classification, PageKind::Index);
    }

    #[test]
    fn deterministic_for_identical_input() {
        let gaz = Gazetteer::empty();
        let topics = TopicIndex::default_news();
        let links = article_links(10);
        let body = "<html><head><title>Hub</title></head><body><p>short</p></body></html>";
        let a = analyze(&input(
            "https://example.com/world",
            200,
            Some("text/html"),
            body,
            &links,
            &gaz,
            &topics,
        ));
        let b = analyze(&input(
            "https://example.com/world",
            200,
            Some("text/html"),
            body,
            &links,
            &gaz,
            &topics,
        ));
        assert_eq!(a.classification, b.classification);
        assert_eq!(a.signals, b.signals);
    }
}
