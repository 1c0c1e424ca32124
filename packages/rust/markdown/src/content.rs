//! Content-region selection and chrome stripping.
//!
//! Picks the element most likely to hold the page's documentation text and
//! re-serializes it without navigation, boilerplate, scripts or images.
//! Tables are lifted out as pipe tables and replaced by placeholders, since
//! `htmd` 0.1 does not convert them.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

/// Content containers, most specific first.
const REGION_SELECTORS: &[&str] = &[
    "main",
    "[role=\"main\"]",
    "article",
    ".main",
    "#main",
    ".content",
    "#content",
    ".article",
    ".documentation",
    "body",
];

/// Elements dropped wholesale, wherever they appear inside the region.
const CHROME: &str = "nav, aside, footer, script, style, noscript, template, svg, iframe, \
     form, button, img, picture, video, audio, canvas, body > header, \
     .navigation, .sidebar, .menu, .ads, .advertisement, .breadcrumbs, \
     [role=\"navigation\"], [role=\"banner\"], [role=\"contentinfo\"], [aria-hidden=\"true\"]";

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "input", "link", "meta", "source", "track", "wbr",
];

static REGIONS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    REGION_SELECTORS
        .iter()
        .map(|s| Selector::parse(s).expect("valid selector"))
        .collect()
});
static CHROME_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(CHROME).expect("valid selector"));
static TR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
static TH_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th").expect("valid selector"));
static TD_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").expect("valid selector"));

/// Main content of a page as cleaned HTML, plus the pipe tables whose
/// placeholders appear in it.
pub(crate) struct ContentRegion {
    pub html: String,
    pub tables: Vec<String>,
}

/// Placeholder paragraph text for the `index`-th table.
pub(crate) fn table_placeholder(index: usize) -> String {
    format!("DOCMODULESTABLE{index}")
}

pub(crate) fn select_content(raw: &str) -> ContentRegion {
    let doc = Html::parse_document(raw);

    let region = REGIONS
        .iter()
        .find_map(|sel| doc.select(sel).next())
        .unwrap_or_else(|| doc.root_element());

    let mut out = ContentRegion {
        html: String::new(),
        tables: Vec::new(),
    };
    for child in region.children() {
        if let Some(el) = ElementRef::wrap(child) {
            write_element(el, &mut out);
        } else if let Some(text) = child.value().as_text() {
            out.html.push_str(&escape_text(text));
        }
    }
    out
}

fn write_element(el: ElementRef<'_>, out: &mut ContentRegion) {
    if CHROME_SEL.matches(&el) {
        return;
    }

    let name = el.value().name();
    if name == "table" {
        let table = html_table_to_markdown(&el);
        if !table.is_empty() {
            out.html.push_str(&format!("<p>{}</p>", table_placeholder(out.tables.len())));
            out.tables.push(table);
        }
        return;
    }

    out.html.push('<');
    out.html.push_str(name);
    // Only `class` matters downstream (code fence languages).
    if let Some(class) = el.value().attr("class") {
        out.html.push_str(" class=\"");
        out.html.push_str(&escape_attr(class));
        out.html.push('"');
    }
    out.html.push('>');

    if VOID_TAGS.contains(&name) {
        return;
    }

    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            write_element(child_el, out);
        } else if let Some(text) = child.value().as_text() {
            out.html.push_str(&escape_text(text));
        }
    }

    out.html.push_str("</");
    out.html.push_str(name);
    out.html.push('>');
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Convert a single HTML table element to a pipe table.
fn html_table_to_markdown(table: &ElementRef) -> String {
    let cell_text = |cell: ElementRef| {
        cell.text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .replace('|', "/")
    };

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut has_header = false;

    for tr in table.select(&TR_SEL) {
        let ths: Vec<String> = tr.select(&TH_SEL).map(cell_text).collect();
        if !ths.is_empty() {
            if rows.is_empty() {
                has_header = true;
            }
            rows.push(ths);
            continue;
        }

        let tds: Vec<String> = tr.select(&TD_SEL).map(cell_text).collect();
        if !tds.is_empty() {
            rows.push(tds);
        }
    }

    let col_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }
    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    let render = |row: &[String]| format!("| {} |\n", row.join(" | "));
    let separator = render(&vec!["---".to_string(); col_count]);

    let mut md = String::new();
    if has_header {
        md.push_str(&render(&rows[0]));
        md.push_str(&separator);
        for row in &rows[1..] {
            md.push_str(&render(row));
        }
    } else {
        // Header-less tables get an empty header row so the layout stays valid.
        md.push_str(&render(&vec![String::new(); col_count]));
        md.push_str(&separator);
        for row in &rows {
            md.push_str(&render(row));
        }
    }
    md.trim_end().to_string()
}
