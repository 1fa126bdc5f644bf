//! PDF parsing: one fragment per page via `lopdf`

use crate::error::{IngestError, Result};
use crate::ingest::types::{keys, DocType, Fragment, RegulatoryType};
use lopdf::Document;
use std::path::Path;
use tracing::warn;

/// Extract page texts in reading order. Blank pages are dropped; a page that
/// fails to decode is logged and skipped without failing the document.
pub fn parse(path: &Path, filename: &str) -> Result<Vec<Fragment>> {
    let doc = Document::load(path).map_err(|e| IngestError::ParseError {
        filename: filename.to_string(),
        reason: e.to_string(),
    })?;

    let pages = doc.get_pages();
    let total_pages = pages.len();
    let mut fragments = Vec::new();

    for (page_num, _object_id) in pages {
        let text = match doc.extract_text(&[page_num]) {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to extract text from page {} of {}: {}", page_num, filename, e);
                continue;
            }
        };

        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let fragment = Fragment::new(text, format!("Page {}", page_num))
            .with_meta(keys::FILENAME, filename)
            .with_meta(keys::DOC_TYPE, DocType::Pdf.as_str())
            .with_meta("page_number", page_num as i64)
            .with_meta("total_pages", total_pages)
            .with_meta(keys::REGULATORY_TYPE, RegulatoryType::BaselDocument.as_str());
        fragments.push(fragment);
    }

    Ok(fragments)
}
