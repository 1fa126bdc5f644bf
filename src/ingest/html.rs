//! HTML parsing: one whole-document fragment with page metadata
//!
//! Script and style content is dropped, remaining text is whitespace
//! collapsed, and the page title plus meta description/keywords are copied
//! into the fragment metadata when present.

use crate::error::Result;
use crate::ingest::types::{keys, DocType, Fragment};
use scraper::{Html, Selector};
use std::path::Path;

pub fn parse(path: &Path, filename: &str) -> Result<Vec<Fragment>> {
    let content = super::text::read_lossy(path, filename)?;
    let document = Html::parse_document(&content);

    let text = visible_text(&document);
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let mut fragment = Fragment::new(text, "Full Document")
        .with_meta(keys::FILENAME, filename)
        .with_meta(keys::DOC_TYPE, DocType::Html.as_str());

    if let Some(title) = select_text(&document, "title") {
        fragment = fragment.with_meta("title", title);
    }
    if let Some(description) = select_attr(&document, r#"meta[name="description"]"#, "content") {
        fragment = fragment.with_meta("description", description);
    }
    if let Some(kws) = select_attr(&document, r#"meta[name="keywords"]"#, "content") {
        fragment = fragment.with_meta("keywords", kws);
    }

    Ok(vec![fragment])
}

/// Collect text nodes outside script/style subtrees, whitespace collapsed
fn visible_text(document: &Html) -> String {
    let mut parts: Vec<String> = Vec::new();

    for node in document.tree.nodes() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let excluded = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript"))
        });
        if excluded {
            continue;
        }

        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.split_whitespace().collect::<Vec<_>>().join(" "));
        }
    }

    parts.join(" ")
}

fn select_text(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let element = document.select(&sel).next()?;
    let text: String = element.text().collect::<String>().trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn select_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let element = document.select(&sel).next()?;
    element.value().attr(attr).map(|v| v.trim().to_string())
}
