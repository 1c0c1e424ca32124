//! URL canonicalization and link/title extraction from fetched markup.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));
static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));
static H1_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1").expect("valid selector"));

/// Canonical form of a URL, used as the visitation and cache key.
///
/// Scheme and host are lowercased (the `url` crate already does this when
/// parsing), the fragment is dropped, and a trailing slash is removed, so
/// `https://Example.com/docs/#intro` and `https://example.com/docs` are the
/// same node.
pub fn canonicalize(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);

    let path = canonical.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        canonical.set_path(path.trim_end_matches('/'));
    }

    let mut s = canonical.to_string();
    // Root path: `https://example.com/` -> `https://example.com`
    if canonical.query().is_none() && s.ends_with('/') {
        s.pop();
    }
    s
}

/// Extract all followable links from a document, resolved against the page URL.
///
/// Fragment-only, `javascript:`, `mailto:` and `tel:` links are skipped.
/// Returned URLs have their fragment stripped; order follows the document.
pub(crate) fn extract_links(doc: &Html, base_url: &Url) -> Vec<Url> {
    let mut links = Vec::new();

    for el in doc.select(&LINK_SEL) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }

        if let Ok(mut resolved) = base_url.join(href) {
            resolved.set_fragment(None);
            links.push(resolved);
        }
    }

    links
}

/// Page title from `<title>`, falling back to the first `<h1>`.
pub(crate) fn extract_title(doc: &Html) -> Option<String> {
    let text_of = |sel: &Selector| {
        doc.select(sel)
            .next()
            .map(|el| el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty())
    };
    text_of(&TITLE_SEL).or_else(|| text_of(&H1_SEL))
}
