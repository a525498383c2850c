//! Document composition
//!
//! Turns caller markup into a complete document the engine can load. This is a
//! marker-based transform, not an HTML parser: the only structure it looks at
//! is the doctype, the root `<html` opening and the first `</head` closing.
//! It performs no sanitization.

use std::fmt;

/// A complete, self-contained document ready to be loaded by an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedDocument(String);

impl ComposedDocument {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ComposedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds documents from fragments plus optional CSS
#[derive(Debug, Clone, Default)]
pub struct DocumentComposer;

impl DocumentComposer {
    pub fn new() -> Self {
        DocumentComposer
    }

    /// Compose `fragment` and `css` into a full document.
    ///
    /// Full documents keep every original byte; the style block is inserted
    /// before the first `</head`, or a synthesized head is inserted after the
    /// root element opening. Anything else is wrapped in a minimal skeleton.
    pub fn compose(&self, fragment: &str, css: Option<&str>) -> ComposedDocument {
        let css = css.filter(|c| !c.trim().is_empty());

        if !is_full_document(fragment) {
            return ComposedDocument(wrap_fragment(fragment, css));
        }

        let Some(css) = css else {
            return ComposedDocument(fragment.to_string());
        };

        let style = style_block(css);
        let mut out = String::with_capacity(fragment.len() + style.len() + 16);

        if let Some(at) = find_head_close(fragment) {
            out.push_str(&fragment[..at]);
            out.push_str(&style);
            out.push_str(&fragment[at..]);
            return ComposedDocument(out);
        }

        let at = head_insertion_point(fragment);
        out.push_str(&fragment[..at]);
        out.push_str("<head>");
        out.push_str(&style);
        out.push_str("</head>");
        out.push_str(&fragment[at..]);
        ComposedDocument(out)
    }
}

/// Whether the markup already carries a doctype or a root element.
pub fn is_full_document(markup: &str) -> bool {
    find_ascii_ci(markup, "<!doctype", 0).is_some() || find_root_open(markup).is_some()
}

fn style_block(css: &str) -> String {
    format!("<style>{}</style>", css)
}

fn wrap_fragment(fragment: &str, css: Option<&str>) -> String {
    let style = css.map(style_block).unwrap_or_default();
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n{}\n</head>\n<body style=\"margin: 0; padding: 0;\">\n{}\n</body>\n</html>",
        style, fragment
    )
}

/// Byte offset just after the root element's opening tag, or after the
/// doctype declaration when there is no root element.
fn head_insertion_point(markup: &str) -> usize {
    let open = find_root_open(markup).or_else(|| find_ascii_ci(markup, "<!doctype", 0));
    match open {
        Some(start) => markup[start..]
            .find('>')
            .map(|rel| start + rel + 1)
            .unwrap_or(markup.len()),
        None => 0,
    }
}

/// First `<html` that is a tag name on its own (not `<htmlfoo`).
fn find_root_open(markup: &str) -> Option<usize> {
    find_tag(markup, "<html")
}

/// First `</head` closing marker (not `</header`).
fn find_head_close(markup: &str) -> Option<usize> {
    find_tag(markup, "</head")
}

fn find_tag(markup: &str, tag: &str) -> Option<usize> {
    let bytes = markup.as_bytes();
    let mut from = 0;
    while let Some(at) = find_ascii_ci(markup, tag, from) {
        match bytes.get(at + tag.len()) {
            None => return Some(at),
            Some(b) if *b == b'>' || *b == b'/' || b.is_ascii_whitespace() => return Some(at),
            _ => from = at + 1,
        }
    }
    None
}

// `needle` must be ASCII, so any match starts on a char boundary.
fn find_ascii_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || hay.len() < needle.len() {
        return None;
    }
    (from..=hay.len() - needle.len()).find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}
