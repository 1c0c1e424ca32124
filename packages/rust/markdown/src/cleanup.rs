//! Post-conversion cleanup pipeline.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence. The
//! pipeline turns `htmd` Markdown into the lightweight text the extractor
//! reads: `#` headings, `- ` / `1. ` list items, pipe tables, fenced code, and
//! no links, images, emphasis or stray tags.

use std::sync::LazyLock;

use regex::Regex;

use crate::content::table_placeholder;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, tables: &[String]) -> String {
    let mut result = md.replace("\r\n", "\n");

    result = normalize_headings(&result);
    result = fix_code_block_languages(&result);
    result = outside_code(&result, strip_leftover_html);
    result = outside_code(&result, links_to_text);
    result = outside_code(&result, strip_emphasis);
    result = outside_code(&result, normalize_list_markers);
    result = outside_code(&result, unescape_markdown);
    result = restore_tables(&result, tables);
    result = normalize_whitespace(&result);
    result = clean_blank_lines(&result);
    ensure_trailing_newline(&result)
}

/// Apply a per-line pass to every line that is not inside a fenced code block.
fn outside_code(md: &str, pass: fn(&str) -> String) -> String {
    let mut in_code_block = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
                line.to_string()
            } else if in_code_block {
                line.to_string()
            } else {
                pass(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Headings
// ---------------------------------------------------------------------------

/// Ensure there's at most one H1 and strip closing hashes.
fn normalize_headings(md: &str) -> String {
    static H_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+?)(?:\s+#+)?\s*$").expect("valid regex"));

    let mut h1_count = 0;
    let mut in_code_block = false;
    let mut lines: Vec<String> = Vec::new();

    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
        }
        let caps = if in_code_block { None } else { H_RE.captures(line) };
        let Some(caps) = caps else {
            lines.push(line.to_string());
            continue;
        };

        let hashes = &caps[1];
        let text = &caps[2];
        if hashes == "#" {
            h1_count += 1;
            if h1_count > 1 {
                lines.push(format!("## {text}"));
                continue;
            }
        }
        lines.push(format!("{hashes} {text}"));
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Code blocks
// ---------------------------------------------------------------------------

/// Strip class-style prefixes (`language-js`, `lang-python`, `highlight-rust`)
/// from code fence info strings.
fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^(\s*)```(?:language-|lang-|highlight-)(\w+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "$1```$2").to_string()
}

// ---------------------------------------------------------------------------
// Inline markup
// ---------------------------------------------------------------------------

/// Remove HTML tags that survived conversion, keeping their text.
fn strip_leftover_html(line: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?[a-zA-Z][a-zA-Z0-9-]*(?:\s[^<>]*)?/?>").expect("valid regex")
    });

    HTML_TAG_RE.replace_all(line, "").to_string()
}

/// Drop images and reduce links to their text.
fn links_to_text(line: &str) -> String {
    static IMAGE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));
    static AUTOLINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<(https?://[^>\s]+)>").expect("valid regex"));

    let line = IMAGE_RE.replace_all(line, "");
    let line = LINK_RE.replace_all(&line, "$1");
    AUTOLINK_RE.replace_all(&line, "$1").to_string()
}

/// Remove bold/italic/strikethrough markers and inline code ticks.
fn strip_emphasis(line: &str) -> String {
    static STRONG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\*\*|__)(\S(?:.*?\S)?)(\*\*|__)").expect("valid regex"));
    static EM_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(^|[^\w*])[*_](\S(?:[^*_]*?\S)?)[*_]").expect("valid regex"));
    static STRIKE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"~~(.+?)~~").expect("valid regex"));
    static CODE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("valid regex"));

    let line = STRONG_RE.replace_all(line, "$2");
    let line = EM_RE.replace_all(&line, "$1$2");
    let line = STRIKE_RE.replace_all(&line, "$1");
    CODE_RE.replace_all(&line, "$1").to_string()
}

/// `*` / `+` bullets become `- `; ordered markers get a single space.
fn normalize_list_markers(line: &str) -> String {
    static BULLET_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(\s*)[*+-]\s+").expect("valid regex"));
    static ORDERED_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(\s*)(\d+)[.)]\s+").expect("valid regex"));

    if BULLET_RE.is_match(line) {
        return BULLET_RE.replace(line, "$1- ").to_string();
    }
    ORDERED_RE.replace(line, "$1$2. ").to_string()
}

/// Remove Markdown backslash escapes; the output is plain text.
fn unescape_markdown(line: &str) -> String {
    static ESCAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\\([\\`*_{}\[\]()#+\-.!|<>~])").expect("valid regex")
    });

    ESCAPE_RE.replace_all(line, "$1").to_string()
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Swap table placeholder lines for the pipe tables they stand for.
fn restore_tables(md: &str, tables: &[String]) -> String {
    if tables.is_empty() {
        return md.to_string();
    }

    md.lines()
        .map(|line| {
            let trimmed = line.trim();
            tables
                .iter()
                .enumerate()
                .find(|(i, _)| trimmed == table_placeholder(*i))
                .map(|(_, table)| format!("\n{table}\n"))
                .unwrap_or_else(|| line.to_string())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Whitespace
// ---------------------------------------------------------------------------

/// Trim trailing whitespace, turn non-breaking spaces into spaces, and
/// collapse runs of inner spaces outside code blocks.
fn normalize_whitespace(md: &str) -> String {
    static INNER_SPACES_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\S)[ \t]{2,}").expect("valid regex"));

    let md = md.replace('\u{a0}', " ");
    let mut in_code_block = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
                return line.trim_end().to_string();
            }
            if in_code_block {
                return line.trim_end().to_string();
            }
            if line.trim().is_empty() {
                return String::new();
            }
            INNER_SPACES_RE.replace_all(line.trim_end(), "$1 ").to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse runs of blank lines into exactly one, and drop leading blanks.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE
        .replace_all(md.trim_start_matches('\n'), "\n\n")
        .to_string()
}

/// Ensure the text ends with exactly one newline; blank text stays empty.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("{trimmed}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_headings_demotes_duplicate_h1() {
        let input = "# Title\n\nSome text\n\n# Another Title\n\nMore text";
        assert_eq!(
            normalize_headings(input),
            "# Title\n\nSome text\n\n## Another Title\n\nMore text"
        );
    }

    #[test]
    fn normalize_headings_ignores_code() {
        let input = "```sh\n# comment\n# another\n```\n# Real";
        assert_eq!(normalize_headings(input), input);
    }

    #[test]
    fn normalize_headings_strips_closing_hashes() {
        assert_eq!(normalize_headings("## Setup ##"), "## Setup");
    }

    #[test]
    fn fix_code_block_languages_strips_prefix() {
        let result = fix_code_block_languages("```language-javascript\nconsole.log('hi');\n```");
        assert!(result.starts_with("```javascript"));
        assert_eq!(fix_code_block_languages("```rust\nfn main() {}\n```"), "```rust\nfn main() {}\n```");
    }

    #[test]
    fn strip_leftover_html_keeps_text() {
        assert_eq!(
            strip_leftover_html("<div class=\"note\">Important <span>info</span></div>"),
            "Important info"
        );
        assert_eq!(strip_leftover_html("a < b and c > d"), "a < b and c > d");
    }

    #[test]
    fn links_become_text_and_images_vanish() {
        assert_eq!(
            links_to_text("See [the guide](/guide) and ![diagram](d.png) or <https://x.dev>"),
            "See the guide and  or https://x.dev"
        );
    }

    #[test]
    fn emphasis_is_stripped() {
        assert_eq!(
            strip_emphasis("Use **bold**, *italic*, ~~old~~ and `code`"),
            "Use bold, italic, old and code"
        );
        assert_eq!(strip_emphasis("snake_case_name stays"), "snake_case_name stays");
    }

    #[test]
    fn list_markers_are_normalized() {
        assert_eq!(normalize_list_markers("*   Item one"), "- Item one");
        assert_eq!(normalize_list_markers("    + nested"), "    - nested");
        assert_eq!(normalize_list_markers("1.  First"), "1. First");
        assert_eq!(normalize_list_markers("plain"), "plain");
    }

    #[test]
    fn escapes_are_removed() {
        assert_eq!(unescape_markdown(r"config\_file \[v2\] 3\. done"), "config_file [v2] 3. done");
    }

    #[test]
    fn code_blocks_are_left_alone() {
        let input = "Text with [link](x)\n```\n[keep](this) **too**\n```";
        let result = run_pipeline(input, &[]);
        assert!(result.contains("Text with link"));
        assert!(result.contains("[keep](this) **too**"));
    }

    #[test]
    fn tables_are_restored() {
        let tables = vec!["| A | B |\n| --- | --- |\n| 1 | 2 |".to_string()];
        let result = run_pipeline("Intro\n\nDOCMODULESTABLE0\n\nOutro", &tables);
        assert_eq!(result, "Intro\n\n| A | B |\n| --- | --- |\n| 1 | 2 |\n\nOutro\n");
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(normalize_whitespace("Line  1   \n\t\nword\u{a0}\u{a0}gap"), "Line 1\n\nword gap");
        assert_eq!(clean_blank_lines("\n\nA\n\n\n\n\nB"), "A\n\nB");
    }

    #[test]
    fn blank_text_stays_empty() {
        assert_eq!(run_pipeline("   \n\n  ", &[]), "");
        assert_eq!(ensure_trailing_newline("Content\n\n\n"), "Content\n");
    }

    #[test]
    fn full_pipeline_cleans_markdown() {
        let input = "# Title\n\n\n\n\n\n## Section\n\n<div>Some content</div>\n\n*   [Item](/a)\n\n```language-python\nprint('hi')\n```\n\nEnd";
        let result = run_pipeline(input, &[]);
        assert_eq!(
            result,
            "# Title\n\n## Section\n\nSome content\n\n- Item\n\n```python\nprint('hi')\n```\n\nEnd\n"
        );
    }
}
