//! Link extraction and structural signal gathering
//!
//! All HTML walking happens here, synchronously, so parsed DOM handles
//! never cross an await point.

use scraper::{Html, Selector};
use url::Url;

/// One outbound link as extracted from a page
#[derive(Debug, Clone)]
pub struct ExtractedLink {
    /// Absolute URL after resolution against the page base
    pub href: String,
    pub anchor: String,
    pub rel: Option<String>,
    /// Heuristic: menu/footer-style link vs article-style link
    pub nav_like: bool,
}

/// Structural facts about a page body
#[derive(Debug, Clone, Default)]
pub struct PageSignals {
    pub title: Option<String>,
    pub published_date: Option<String>,
    pub word_count: u32,
    pub text_sample: String,
    pub nav_link_count: u32,
    pub article_link_count: u32,
}

/// Extract outbound links with anchor text and rel attributes.
///
/// `same_origin_only` drops cross-origin links at the source.
#[must_use]
pub fn extract_links(html: &str, base: &Url, same_origin_only: bool) -> Vec<ExtractedLink> {
    let document = Html::parse_document(html);
    let anchor_sel = match Selector::parse("a[href]") {
        Ok(sel) => sel,
        Err(_) => return Vec::new(),
    };

    let mut links = Vec::new();
    for element in document.select(&anchor_sel) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(resolved) = base.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        if same_origin_only && resolved.host_str() != base.host_str() {
            continue;
        }
        let anchor: String = element.text().collect::<String>().trim().to_string();
        let rel = element.value().attr("rel").map(str::to_string);
        let nav_like = is_nav_like(&anchor, resolved.path());
        links.push(ExtractedLink {
            href: resolved.to_string(),
            anchor,
            rel,
            nav_like,
        });
    }
    links
}

/// Gather title, date, word count and link-shape counts from a body
#[must_use]
pub fn page_signals(html: &str, links: &[ExtractedLink]) -> PageSignals {
    let document = Html::parse_document(html);

    let title = select_first_text(&document, "title")
        .or_else(|| select_meta_content(&document, r#"meta[property="og:title"]"#))
        .filter(|t| !t.is_empty());

    let published_date = select_meta_content(&document, r#"meta[property="article:published_time"]"#)
        .or_else(|| select_attr(&document, "time[datetime]", "datetime"));

    let mut text = String::new();
    if let Ok(sel) = Selector::parse("p") {
        for p in document.select(&sel) {
            for chunk in p.text() {
                text.push_str(chunk);
                text.push(' ');
            }
        }
    }
    let word_count = text.split_whitespace().count() as u32;
    let text_sample: String = text.chars().take(2048).collect();

    let nav_link_count = links.iter().filter(|l| l.nav_like).count() as u32;
    let article_link_count = links.len() as u32 - nav_link_count;

    PageSignals {
        title,
        published_date,
        word_count,
        text_sample,
        nav_link_count,
        article_link_count,
    }
}

/// A link reads as navigation when its anchor is short boilerplate or its
/// target is a shallow section path; article links carry headline-length
/// anchors or dated/slugged paths.
fn is_nav_like(anchor: &str, path: &str) -> bool {
    let words = anchor.split_whitespace().count();
    if words >= 4 {
        return false;
    }
    if has_date_segments(path) {
        return false;
    }
    // Long hyphenated leaf segments read as article slugs.
    if let Some(leaf) = path.rsplit('/').find(|s| !s.is_empty()) {
        if leaf.matches('-').count() >= 3 {
            return false;
        }
    }
    true
}

/// `/2026/07/31/...` style path prefixes
#[must_use]
pub fn has_date_segments(path: &str) -> bool {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for window in segments.windows(2) {
        let [year, month] = window else { continue };
        if year.len() == 4
            && year.chars().all(|c| c.is_ascii_digit())
            && month.len() == 2
            && month.chars().all(|c| c.is_ascii_digit())
        {
            let y: u32 = year.parse().unwrap_or(0);
            let m: u32 = month.parse().unwrap_or(0);
            if (1990..2100).contains(&y) && (1..=12).contains(&m) {
                return true;
            }
        }
    }
    false
}

/// Date from a `/YYYY/MM/DD/` URL path, ISO formatted
#[must_use]
pub fn date_from_path(path: &str) -> Option<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for window in segments.windows(3) {
        let [year, month, day] = window else { continue };
        if year.len() == 4 && month.len() == 2 && day.len() == 2 {
            let (Ok(y), Ok(m), Ok(d)) = (
                year.parse::<u32>(),
                month.parse::<u32>(),
                day.parse::<u32>(),
            ) else {
                continue;
            };
            if (1990..2100).contains(&y) && (1..=12).contains(&m) && (1..=31).contains(&d) {
                return Some(format!("{y:04}-{m:02}-{d:02}"));
            }
        }
    }
    None
}

fn select_first_text(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document
        .select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

fn select_meta_content(document: &Html, selector: &str) -> Option<String> {
    select_attr(document, selector, "content")
}

fn select_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::to_string)
}
