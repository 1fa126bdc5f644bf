//! DOCX parsing: paragraph extraction via `zip` + `quick-xml`
//!
//! Nonempty paragraphs from `word/document.xml` are grouped into sections of
//! at most ~1000 characters, split only at paragraph boundaries. The
//! regulatory classification looks at the filename first, then content
//! keywords.

use crate::error::{IngestError, Result};
use crate::ingest::types::{keys, DocType, Fragment, RegulatoryType};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::Read;
use std::path::Path;

const SECTION_LIMIT: usize = 1000;

fn local_name(q: &[u8]) -> &[u8] {
    match q.iter().position(|&b| b == b':') {
        Some(i) => &q[i + 1..],
        None => q,
    }
}

pub fn parse(path: &Path, filename: &str) -> Result<Vec<Fragment>> {
    let file = std::fs::File::open(path).map_err(|e| IngestError::ParseError {
        filename: filename.to_string(),
        reason: e.to_string(),
    })?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| IngestError::ParseError {
        filename: filename.to_string(),
        reason: format!("not a valid .docx (zip) file: {}", e),
    })?;

    let mut document_xml = String::new();
    zip.by_name("word/document.xml")
        .map_err(|e| IngestError::ParseError {
            filename: filename.to_string(),
            reason: format!("missing word/document.xml: {}", e),
        })?
        .read_to_string(&mut document_xml)
        .map_err(|e| IngestError::ParseError {
            filename: filename.to_string(),
            reason: e.to_string(),
        })?;

    let paragraphs = extract_paragraphs(&document_xml);
    if paragraphs.is_empty() {
        return Ok(Vec::new());
    }

    let full_text = paragraphs.join(" ");
    let regulatory_type = classify(filename, &full_text);
    let total_paragraphs = paragraphs.len();

    let mut fragments = Vec::new();
    for section in group_into_sections(&paragraphs) {
        let paragraph_count = section.len();
        let content = section.join("\n\n");
        let fragment = Fragment::new(
            content,
            format!("Document Section ({} paragraphs)", paragraph_count),
        )
        .with_meta(keys::FILENAME, filename)
        .with_meta(keys::DOC_TYPE, DocType::Word.as_str())
        .with_meta("total_paragraphs", total_paragraphs)
        .with_meta(keys::REGULATORY_TYPE, regulatory_type.as_str());
        fragments.push(fragment);
    }

    Ok(fragments)
}

/// Pull `w:t` run text out of the document, one entry per `w:p`
fn extract_paragraphs(document_xml: &str) -> Vec<String> {
    let mut reader = Reader::from_str(document_xml);
    reader.trim_text(false);
    let mut buf = Vec::new();

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match local_name(e.name().as_ref()) {
                b"t" => in_text_run = true,
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) => match local_name(e.name().as_ref()) {
                b"t" => in_text_run = false,
                b"p" => {
                    let text = current.trim().to_string();
                    if !text.is_empty() {
                        paragraphs.push(text);
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Text(t)) if in_text_run => {
                if let Ok(text) = t.unescape() {
                    current.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }

    paragraphs
}

/// Group paragraphs into sections bounded by `SECTION_LIMIT` characters
fn group_into_sections<'a>(paragraphs: &'a [String]) -> Vec<Vec<&'a str>> {
    let mut sections: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_size = 0usize;

    for para in paragraphs {
        if current_size + para.len() > SECTION_LIMIT && !current.is_empty() {
            sections.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += para.len();
        current.push(para.as_str());
    }
    if !current.is_empty() {
        sections.push(current);
    }

    sections
}

fn classify(filename: &str, content: &str) -> RegulatoryType {
    let filename_lower = filename.to_lowercase();
    let content_lower = content.to_lowercase();

    if ["policy", "procedure", "manual"]
        .iter()
        .any(|t| filename_lower.contains(t))
    {
        RegulatoryType::RegulatoryPolicy
    } else if ["corep", "finrep", "basel"]
        .iter()
        .any(|t| filename_lower.contains(t))
    {
        RegulatoryType::RegulatoryGuidance
    } else if ["policy", "procedure", "shall", "must"]
        .iter()
        .any(|t| content_lower.contains(t))
    {
        RegulatoryType::RegulatoryPolicy
    } else if ["capital", "liquidity", "risk management"]
        .iter()
        .any(|t| content_lower.contains(t))
    {
        RegulatoryType::RegulatoryGuidance
    } else {
        RegulatoryType::RegulatoryDocument
    }
}
