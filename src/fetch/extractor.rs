use dom_smoothie::{Config, Readability};
use scraper::{Html, Node, Selector};
use tracing::{debug, warn};

const SKIPPED_TAGS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Visible text under `<body>`, one space between text nodes.
/// Returns an empty string when the document has no body.
pub(super) fn extract_body_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("body") else {
        return String::new();
    };
    let Some(body) = document.select(&selector).next() else {
        return String::new();
    };

    let mut parts: Vec<&str> = Vec::new();
    for node in body.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| SKIPPED_TAGS.contains(&e.name()))
        });
        if hidden {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed);
        }
    }
    parts.join(" ")
}

/// Main article content as Markdown, or body text when readability rejects the page.
pub(super) fn extract_article(html: &str, url: Option<&str>) -> String {
    let mut readability = match Readability::new(html, url, Some(Config::default())) {
        Ok(r) => r,
        Err(e) => {
            warn!(%e, "readability init failed, using body text");
            return extract_body_text(html);
        }
    };

    if !readability.is_probably_readable() {
        debug!("page not readable, using body text");
        return extract_body_text(html);
    }

    match readability.parse() {
        Ok(article) => html2md::rewrite_html(&article.content, false)
            .trim()
            .to_string(),
        Err(e) => {
            warn!(%e, "readability parse failed, using body text");
            extract_body_text(html)
        }
    }
}
