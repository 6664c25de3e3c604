//! RFC 5988 `Link` header parsing for upstream pagination.

/// Pagination links extracted from a `Link` header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageLinks {
    pub next: Option<String>,
    /// Page number from the `rel="last"` URL's `page` query parameter.
    pub last_page: Option<u32>,
}

/// Parse a raw header value such as:
/// `<https://host/repos/o/r/commits?page=2>; rel="next", <https://host/repos/o/r/commits?page=9>; rel="last"`
pub fn parse(header: &str) -> PageLinks {
    let mut links = PageLinks::default();
    for part in header.split(',') {
        let mut sections = part.split(';');
        let Some(url_section) = sections.next() else {
            continue;
        };
        let Some(rel_section) = sections.next() else {
            continue;
        };
        let url = url_section
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>');
        match rel_section.trim() {
            r#"rel="next""# => links.next = Some(url.to_string()),
            r#"rel="last""# => links.last_page = page_param(url),
            _ => {}
        }
    }
    links
}

/// The `page` query parameter of a pagination URL.
fn page_param(url: &str) -> Option<u32> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("page="))
        .and_then(|value| value.parse().ok())
}
