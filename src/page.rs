use std::sync::LazyLock;

use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};

use crate::error::{BuildError, Result};
use crate::rules::IGNORE_ELEMENTS;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static BODY_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());
static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());

/// Attributes that survive normalization; everything else is dropped.
const KEEP_ATTRIBUTES: &[&str] = &["class", "name", "id", "property", "content"];

/// Never dropped for being empty.
const STRUCTURAL: &[&str] = &["html", "head", "body"];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// The page a builder works on. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    /// Normalized `<html>` markup.
    pub document: String,
    /// Outer HTML of `<body>`, the text sent for analysis.
    pub body: String,
    /// Base64 PNG, if one was captured.
    pub screenshot: Option<String>,
    pub title: Option<String>,
}

/// Parse raw page markup and reduce it to what analysis needs.
pub fn normalize_page(html: &str, screenshot: Option<String>) -> Result<PageContent> {
    if html.trim().is_empty() {
        return Err(BuildError::Page("No page content provided.".into()));
    }

    let parsed = Html::parse_document(html);
    let title = parsed
        .select(&TITLE_SEL)
        .next()
        .map(|t| collapse(&t.text().collect::<String>()).trim().to_string())
        .filter(|t| !t.is_empty());

    let mut document = String::with_capacity(html.len() / 2);
    write_element(parsed.root_element(), &mut document);

    let normalized = Html::parse_document(&document);
    let body = normalized
        .select(&BODY_SEL)
        .next()
        .map(|b| b.html())
        .unwrap_or_else(|| "<body></body>".to_string());

    Ok(PageContent {
        document,
        body,
        screenshot: screenshot.filter(|s| !s.trim().is_empty()),
        title,
    })
}

fn write_element(el: ElementRef<'_>, out: &mut String) {
    let name = el.value().name();
    if IGNORE_ELEMENTS.contains(&name) {
        return;
    }
    if !STRUCTURAL.contains(&name) && !has_text(el) {
        return;
    }

    out.push('<');
    out.push_str(name);
    for attr in KEEP_ATTRIBUTES {
        let Some(value) = el.value().attr(attr) else {
            continue;
        };
        if !value.is_empty() {
            out.push(' ');
            out.push_str(attr);
            out.push_str("=\"");
            out.push_str(&escape(value, true));
            out.push('"');
        }
    }
    out.push('>');
    if VOID_ELEMENTS.contains(&name) {
        return;
    }

    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                let text = collapse(text);
                if !text.trim().is_empty() {
                    out.push_str(&escape(&text, false));
                }
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    write_element(child, out);
                }
            }
            _ => {}
        }
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

/// Whether any non-whitespace text remains once ignored elements are gone.
fn has_text(el: ElementRef<'_>) -> bool {
    el.children().any(|child| match child.value() {
        Node::Text(text) => !text.trim().is_empty(),
        Node::Element(e) if !IGNORE_ELEMENTS.contains(&e.name()) => {
            ElementRef::wrap(child).is_some_and(has_text)
        }
        _ => false,
    })
}

fn collapse(text: &str) -> String {
    WS_RE.replace_all(text, " ").into_owned()
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_page_is_rejected() {
        let err = normalize_page("   ", None).unwrap_err();
        assert_eq!(err.to_string(), "No page content provided.");
    }

    #[test]
    fn simple_body_is_kept() {
        let page = normalize_page("<body><main>Hello</main></body>", None).unwrap();
        assert_eq!(page.body, "<body><main>Hello</main></body>");
        assert!(page.screenshot.is_none());
    }

    #[test]
    fn ignored_elements_and_attributes_are_stripped() {
        let html = r#"<html lang="en"><head><title> Test  Page </title><script>var x = 1;</script></head>
            <body>
              <div id="app" class="shell" style="color:red" data-x="1">
                <script>alert(1)</script>
                <p class="lead" onclick="go()">Text &amp; more</p>
              </div>
            </body></html>"#;
        let page = normalize_page(html, Some("iVBOR".into())).unwrap();
        assert_eq!(
            page.body,
            r#"<body><div class="shell" id="app"><p class="lead">Text &amp; more</p></div></body>"#
        );
        assert_eq!(page.title.as_deref(), Some("Test Page"));
        assert_eq!(page.screenshot.as_deref(), Some("iVBOR"));
        assert!(!page.document.contains("script"));
    }

    #[test]
    fn empty_elements_are_removed() {
        let html = "<body><div><span> </span></div><section><p>kept</p><div><script>x</script></div></section></body>";
        let page = normalize_page(html, None).unwrap();
        assert_eq!(page.body, "<body><section><p>kept</p></section></body>");
    }

    #[test]
    fn empty_screenshot_is_dropped() {
        let page = normalize_page("<body>x</body>", Some(String::new())).unwrap();
        assert!(page.screenshot.is_none());
    }
}
