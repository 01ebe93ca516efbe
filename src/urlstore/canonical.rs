//! Canonical form rules for crawl URLs

use url::Url;

use super::CanonicalPolicy;
use crate::error::{CrawlError, Result};

/// Query parameters stripped by default before the stable sort.
///
/// Covers the common analytics and mail-campaign markers; overridable via
/// `CanonicalPolicy::tracking_params`.
#[must_use]
pub fn default_tracking_params() -> Vec<String> {
    [
        "utm_source",
        "utm_medium",
        "utm_campaign",
        "utm_term",
        "utm_content",
        "gclid",
        "fbclid",
        "msclkid",
        "mc_cid",
        "mc_eid",
        "ref",
        "ref_src",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

/// Filenames folded to the directory form when `fold_index_pages` is on
const INDEX_LEAVES: [&str; 3] = ["index.html", "index.htm", "index.php"];

/// Produce the canonical form of a raw URL.
///
/// The `url` crate already lower-cases scheme and host, strips default
/// ports and normalises percent-encoding on parse; this adds fragment
/// removal, tracking-parameter removal, a stable query sort and optional
/// index-page folding. Path case is preserved.
pub fn canonicalize(raw: &str, policy: &CanonicalPolicy) -> Result<Url> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| CrawlError::InvalidInput(format!("malformed URL {raw:?}: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(CrawlError::InvalidInput(format!(
                "unsupported scheme {other:?} in {raw:?}"
            )));
        }
    }
    if url.host_str().is_none() {
        return Err(CrawlError::InvalidInput(format!("URL has no host: {raw:?}")));
    }

    url.set_fragment(None);

    // Stable query sort with tracking parameters removed. serialize via
    // query_pairs_mut so reserved characters are re-encoded per RFC 3986.
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !policy.tracking_params.iter().any(|t| t == k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort(); // sort_stable by (key, value)
        let mut fresh = url.clone();
        fresh.set_query(None);
        {
            let mut serializer = fresh.query_pairs_mut();
            for (k, v) in &pairs {
                serializer.append_pair(k, v);
            }
        }
        url = fresh;
    }

    if policy.fold_index_pages {
        let path = url.path().to_string();
        for leaf in INDEX_LEAVES {
            if let Some(prefix) = path.strip_suffix(leaf) {
                if prefix.ends_with('/') {
                    url.set_path(prefix);
                }
                break;
            }
        }
    }

    // Empty path becomes "/" so `https://example.com` and
    // `https://example.com/` intern to one ID.
    if url.path().is_empty() {
        url.set_path("/");
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(raw: &str) -> String {
        canonicalize(raw, &CanonicalPolicy::default())
            .expect("canonicalize")
            .to_string()
    }

    #[test]
    fn host_and_scheme_lowercased_default_port_stripped() {
        assert_eq!(canon("HTTPS://Example.COM:443/News"), "https://example.com/News");
        assert_eq!(canon("http://example.com:80/a"), "http://example.com/a");
        // Non-default port survives
        assert_eq!(canon("http://example.com:8080/a"), "http://example.com:8080/a");
    }

    #[test]
    fn fragment_dropped_and_query_sorted() {
        assert_eq!(
            canon("https://example.com/a?b=2&a=1#section"),
            "https://example.com/a?a=1&b=2"
        );
    }

    #[test]
    fn tracking_params_removed() {
        assert_eq!(
            canon("https://example.com/a?utm_source=x&page=2&fbclid=abc"),
            "https://example.com/a?page=2"
        );
        // All-tracking query collapses to none
        assert_eq!(canon("https://example.com/a?utm_medium=m"), "https://example.com/a");
    }

    #[test]
    fn index_html_folds_to_directory() {
        assert_eq!(canon("https://example.com/news/index.html"), "https://example.com/news/");
        assert_eq!(canon("https://example.com/index.htm"), "https://example.com/");
        // Not a directory index, left alone
        assert_eq!(
            canon("https://example.com/not-index.html"),
            "https://example.com/not-index.html"
        );
    }

    #[test]
    fn path_case_preserved() {
        assert_eq!(canon("https://example.com/News/UK"), "https://example.com/News/UK");
    }

    #[test]
    fn rejects_non_http_schemes_and_hostless() {
        assert!(canonicalize("ftp://example.com/x", &CanonicalPolicy::default()).is_err());
        assert!(canonicalize("mailto:x@example.com", &CanonicalPolicy::default()).is_err());
        assert!(canonicalize("not a url", &CanonicalPolicy::default()).is_err());
    }

    #[test]
    fn canonical_form_is_fixed_point() {
        let once = canon("https://Example.com/a/index.html?utm_source=x&b=2&a=1#frag");
        let twice = canon(&once);
        assert_eq!(once, twice);
    }
}
