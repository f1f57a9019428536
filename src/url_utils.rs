//! URL helper functions used throughout the crawler.
//!
//! The canonical form produced here is the deduplication key for the whole
//! pipeline: scheme and host lowercased, fragment stripped, default ports
//! removed, query parameters sorted by key.

use std::hash::Hasher;
use twox_hash::XxHash64;
use url::Url;

/// Produce the canonical form of a URL, or `None` when it is not crawlable.
///
/// Canonicalization is idempotent: feeding the output back in yields the
/// same string.
pub fn canonicalize(url: &str) -> Option<String> {
    let mut parsed = Url::parse(url.trim()).ok()?;

    // Only HTTP(S) participates in the crawl
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    parsed.set_fragment(None);

    // The url crate already lowercases scheme/host and drops default ports;
    // query parameter order is ours to pin down.
    if let Some(query) = parsed.query() {
        if query.is_empty() {
            parsed.set_query(None);
        } else {
            let mut pairs: Vec<(String, String)> = parsed
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            // Stable sort keeps repeated keys in their original relative order
            pairs.sort_by(|a, b| a.0.cmp(&b.0));

            let sorted = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs)
                .finish();
            parsed.set_query(Some(&sorted));
        }
    }

    Some(parsed.to_string())
}

/// Extract the host portion of a URL
pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_string()))
}

/// Resolve a link against the provided base URL
pub fn resolve(base_url: &str, link: &str) -> Option<String> {
    let base = Url::parse(base_url).ok()?;
    base.join(link).ok().map(|u| u.to_string())
}

/// 64-bit digest of the canonical form of a URL
pub fn url_digest(url: &str) -> u64 {
    let canonical = canonicalize(url).unwrap_or_else(|| url.to_string());
    xxh64(canonical.as_bytes())
}

/// 64-bit digest of raw content bytes
pub fn content_digest(body: &[u8]) -> u64 {
    xxh64(body)
}

fn xxh64(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

/// Determine whether a URL is eligible for crawling
pub fn should_crawl_url(url: &str) -> bool {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return false,
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    // Skip binary and asset extensions the parser cannot use
    let path = parsed.path().to_lowercase();
    const DISALLOWED_EXTENSIONS: &[&str] = &[
        ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".css", ".js", ".zip", ".mp4", ".avi",
        ".mov", ".mp3", ".wav", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".tar",
        ".gz", ".tgz", ".bz2", ".7z", ".rar", ".exe", ".msi", ".dmg", ".iso", ".apk",
    ];
    if DISALLOWED_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_strips_fragment() {
        assert_eq!(
            canonicalize("https://example.com/page#section"),
            Some("https://example.com/page".to_string())
        );
    }

    #[test]
    fn test_canonicalize_lowercases_scheme_and_host() {
        assert_eq!(
            canonicalize("HTTPS://Example.COM/Path"),
            Some("https://example.com/Path".to_string())
        );
    }

    #[test]
    fn test_canonicalize_drops_default_port() {
        assert_eq!(
            canonicalize("http://example.com:80/a"),
            Some("http://example.com/a".to_string())
        );
        assert_eq!(
            canonicalize("https://example.com:443/a"),
            Some("https://example.com/a".to_string())
        );
        assert_eq!(
            canonicalize("https://example.com:8443/a"),
            Some("https://example.com:8443/a".to_string())
        );
    }

    #[test]
    fn test_canonicalize_sorts_query_params() {
        assert_eq!(
            canonicalize("https://example.com/search?z=1&a=2&m=3"),
            Some("https://example.com/search?a=2&m=3&z=1".to_string())
        );
    }

    #[test]
    fn test_canonicalize_rejects_non_http() {
        assert_eq!(canonicalize("ftp://example.com/file"), None);
        assert_eq!(canonicalize("mailto:me@example.com"), None);
        assert_eq!(canonicalize("not a url"), None);
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let inputs = [
            "https://Example.com/page#frag",
            "http://example.com:80/?b=2&a=1",
            "https://example.com/a%20b?x=a%20b",
        ];
        for input in inputs {
            let once = canonicalize(input).unwrap();
            let twice = canonicalize(&once).unwrap();
            assert_eq!(once, twice, "canonicalize not idempotent for {input}");
        }
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(
            extract_host("https://example.com/path"),
            Some("example.com".to_string())
        );
        assert_eq!(extract_host("invalid"), None);
    }

    #[test]
    fn test_resolve() {
        assert_eq!(
            resolve("https://test.local/foo", "/page1"),
            Some("https://test.local/page1".to_string())
        );
        assert_eq!(
            resolve("https://test.local/foo/", "page1"),
            Some("https://test.local/foo/page1".to_string())
        );
        assert_eq!(
            resolve("https://test.local", "https://other.local/page"),
            Some("https://other.local/page".to_string())
        );
    }

    #[test]
    fn test_digest_tracks_canonical_form() {
        // Two spellings of the same canonical URL share a digest
        assert_eq!(
            url_digest("https://Example.com/page#a"),
            url_digest("https://example.com/page")
        );
        assert_ne!(
            url_digest("https://example.com/page"),
            url_digest("https://example.com/other")
        );
    }

    #[test]
    fn test_content_digest_is_stable() {
        assert_eq!(content_digest(b"hello"), content_digest(b"hello"));
        assert_ne!(content_digest(b"hello"), content_digest(b"world"));
    }

    #[test]
    fn test_should_crawl_url() {
        assert!(should_crawl_url("https://test.local/page"));
        assert!(!should_crawl_url("ftp://test.local/page"));
        assert!(!should_crawl_url("https://test.local/file.pdf"));
        assert!(!should_crawl_url("https://test.local/image.jpg"));
    }
}
