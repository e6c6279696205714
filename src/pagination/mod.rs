//! Link-header pagination for REST list endpoints.

use reqwest::header::HeaderMap;
use serde::Serialize;
use url::Url;

/// GitHub never serves more than this per page.
pub const MAX_PER_PAGE: u32 = 100;

/// `next` and `last` targets of an RFC 5988 `Link` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginationLinks {
    /// Absolute URL of the following page.
    pub next: Option<String>,
    /// Absolute URL of the final page.
    pub last: Option<String>,
}

impl PaginationLinks {
    /// Parses a `Link` header value. Unknown relations are ignored.
    pub fn from_header(header_value: &str) -> Self {
        let mut links = Self::default();

        for entry in header_value.split(',') {
            let mut segments = entry.split(';').map(str::trim);
            let Some(target) = segments
                .next()
                .and_then(|s| s.strip_prefix('<'))
                .and_then(|s| s.strip_suffix('>'))
            else {
                continue;
            };

            let rel = segments
                .filter_map(|s| s.strip_prefix("rel="))
                .map(|r| r.trim_matches('"'))
                .next();
            match rel {
                Some("next") => links.next = Some(target.to_string()),
                Some("last") => links.last = Some(target.to_string()),
                _ => {}
            }
        }

        links
    }

    /// Reads the `Link` header of a response, if any.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .map(Self::from_header)
            .unwrap_or_default()
    }

    /// Page number of the `last` link.
    pub fn last_page(&self) -> Option<u32> {
        let last = Url::parse(self.last.as_deref()?).ok()?;
        last.query_pairs()
            .find(|(key, _)| key == "page")
            .and_then(|(_, value)| value.parse().ok())
    }
}

/// One page of a list endpoint.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Decoded items.
    pub items: Vec<T>,
    /// Links to the surrounding pages.
    pub links: PaginationLinks,
}

impl<T> Page<T> {
    /// Creates a page.
    pub fn new(items: Vec<T>, links: PaginationLinks) -> Self {
        Self { items, links }
    }

    /// URL of the following page, absent on the last one.
    pub fn next_url(&self) -> Option<&str> {
        self.links.next.as_deref()
    }

    /// Consumes the page.
    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

/// `per_page` query parameter.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PaginationParams {
    /// Items per page, capped at [`MAX_PER_PAGE`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
}

impl PaginationParams {
    /// Requests `per_page` items per page.
    pub fn per_page(per_page: u32) -> Self {
        Self {
            per_page: Some(per_page.clamp(1, MAX_PER_PAGE)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_link_header() {
        let header = r#"<https://api.github.com/repositories/1/issues?state=all&page=2>; rel="next", <https://api.github.com/repositories/1/issues?state=all&page=7>; rel="last""#;
        let links = PaginationLinks::from_header(header);

        assert_eq!(
            links.next.as_deref(),
            Some("https://api.github.com/repositories/1/issues?state=all&page=2")
        );
        assert_eq!(links.last_page(), Some(7));
    }

    #[test]
    fn test_last_page_has_no_next() {
        let header = r#"<https://api.github.com/user/repos?page=1>; rel="first", <https://api.github.com/user/repos?page=4>; rel="prev""#;
        let links = PaginationLinks::from_header(header);

        assert!(links.next.is_none());
        assert_eq!(links.last_page(), None);
        assert_eq!(PaginationLinks::from_headers(&HeaderMap::new()), PaginationLinks::default());
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let links = PaginationLinks::from_header(r#"garbage, <https://x/y?page=3>; rel="next""#);
        assert_eq!(links.next.as_deref(), Some("https://x/y?page=3"));
    }

    #[test]
    fn test_per_page_is_capped() {
        assert_eq!(
            serde_urlencoded::to_string(PaginationParams::per_page(500)).unwrap(),
            "per_page=100"
        );
        assert_eq!(PaginationParams::per_page(0).per_page, Some(1));
    }
}
