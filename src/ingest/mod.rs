//! Multi-format document ingestion
//!
//! One parser per document type, all with the same contract: a file path and
//! declared filename in, an ordered sequence of provenance-tagged fragments
//! out. The dispatch table binds case-insensitive extensions, with declared
//! MIME types accepted as an override for clients that rename files.

pub mod chunker;
pub mod code;
pub mod csv;
pub mod excel;
pub mod html;
pub mod pdf;
pub mod slides;
pub mod text;
pub mod types;
pub mod word;

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use chunker::Chunker;
use std::path::Path;
use tracing::info;
use types::{keys, Chunk, DocType, Fragment, MetadataExt, ParsedDocument};

/// Extension → parser binding, `.ext` keys lowercase
const EXTENSION_TABLE: &[(&str, DocType)] = &[
    (".pdf", DocType::Pdf),
    (".txt", DocType::Text),
    (".md", DocType::Markdown),
    (".markdown", DocType::Markdown),
    (".csv", DocType::Csv),
    (".docx", DocType::Word),
    (".xlsx", DocType::Excel),
    (".xls", DocType::Excel),
    (".pptx", DocType::Powerpoint),
    (".ppt", DocType::Powerpoint),
    (".html", DocType::Html),
    (".htm", DocType::Html),
    (".sql", DocType::Sql),
    (".py", DocType::Code),
    (".js", DocType::Code),
    (".ts", DocType::Code),
];

/// Declared MIME type → parser binding, used when the extension is unknown
const MIME_TABLE: &[(&str, DocType)] = &[
    ("application/pdf", DocType::Pdf),
    ("text/plain", DocType::Text),
    ("text/markdown", DocType::Markdown),
    ("text/csv", DocType::Csv),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        DocType::Word,
    ),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        DocType::Excel,
    ),
    ("application/vnd.ms-excel", DocType::Excel),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        DocType::Powerpoint,
    ),
    ("text/html", DocType::Html),
];

fn extension_of(filename: &str) -> Option<String> {
    filename
        .rfind('.')
        .map(|i| filename[i..].to_lowercase())
}

/// Resolve the parser for a declared filename and optional MIME type
pub fn resolve_doc_type(filename: &str, mime_type: Option<&str>) -> Option<DocType> {
    if let Some(ext) = extension_of(filename) {
        if let Some((_, doc_type)) = EXTENSION_TABLE.iter().find(|(e, _)| *e == ext) {
            return Some(*doc_type);
        }
    }
    mime_type.and_then(|m| {
        MIME_TABLE
            .iter()
            .find(|(known, _)| *known == m)
            .map(|(_, doc_type)| *doc_type)
    })
}

/// Check whether a filename (or MIME type) is accepted for upload
pub fn is_supported(filename: &str, mime_type: Option<&str>) -> bool {
    resolve_doc_type(filename, mime_type).is_some()
}

/// All accepted extensions, for error messages and the UI
pub fn supported_extensions() -> Vec<&'static str> {
    EXTENSION_TABLE.iter().map(|(e, _)| *e).collect()
}

/// Parse a file into provenance-tagged fragments
pub fn parse_file(path: &Path, filename: &str, mime_type: Option<&str>) -> Result<Vec<Fragment>> {
    let doc_type = resolve_doc_type(filename, mime_type).ok_or_else(|| {
        IngestError::UnsupportedFileType(
            extension_of(filename).unwrap_or_else(|| filename.to_string()),
        )
    })?;

    match doc_type {
        DocType::Pdf => pdf::parse(path, filename),
        DocType::Excel => excel::parse(path, filename),
        DocType::Powerpoint => slides::parse(path, filename),
        DocType::Word => word::parse(path, filename),
        DocType::Csv => csv::parse(path, filename),
        DocType::Html => html::parse(path, filename),
        DocType::Sql | DocType::Code => code::parse(path, filename, doc_type),
        DocType::Text | DocType::Markdown => text::parse(path, filename, doc_type),
    }
}

/// Parse and chunk a document into its final retrieval units.
///
/// Fragment metadata is copied onto each sub-chunk; `chunk_index` counts
/// across the whole file so provenance stays unambiguous after splitting.
pub fn process_document(
    path: &Path,
    filename: &str,
    mime_type: Option<&str>,
    config: &IngestConfig,
) -> Result<ParsedDocument> {
    let doc_type = resolve_doc_type(filename, mime_type).ok_or_else(|| {
        IngestError::UnsupportedFileType(
            extension_of(filename).unwrap_or_else(|| filename.to_string()),
        )
    })?;

    let fragments = parse_file(path, filename, mime_type)?;
    let chunker = Chunker::new(config);

    let mut chunks = Vec::new();
    let mut chunk_index = 0usize;
    let mut regulatory_type = None;

    for fragment in &fragments {
        if regulatory_type.is_none() {
            regulatory_type = fragment
                .metadata
                .regulatory_type()
                .and_then(|s| serde_json::from_value(serde_json::Value::String(s.to_string())).ok());
        }

        for piece in chunker.split(&fragment.text) {
            let mut metadata = fragment.metadata.clone();
            metadata.insert(
                keys::SOURCE_LOCATION.to_string(),
                fragment.source_location.clone().into(),
            );
            metadata.insert(keys::CHUNK_INDEX.to_string(), chunk_index.into());
            chunks.push(Chunk::new(piece, metadata));
            chunk_index += 1;
        }
    }

    info!(
        "Processed {} ({}): {} fragments, {} chunks",
        filename,
        doc_type,
        fragments.len(),
        chunks.len()
    );

    Ok(ParsedDocument {
        filename: filename.to_string(),
        doc_type,
        regulatory_type,
        chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_extension_dispatch() {
        assert_eq!(resolve_doc_type("Report.PDF", None), Some(DocType::Pdf));
        assert_eq!(resolve_doc_type("a.xlsx", None), Some(DocType::Excel));
        assert_eq!(resolve_doc_type("a.ppt", None), Some(DocType::Powerpoint));
        assert_eq!(resolve_doc_type("a.ts", None), Some(DocType::Code));
        assert_eq!(resolve_doc_type("noext", None), None);
        assert_eq!(resolve_doc_type("a.exe", None), None);
    }

    #[test]
    fn test_mime_override() {
        assert_eq!(
            resolve_doc_type("payload.bin", Some("text/csv")),
            Some(DocType::Csv)
        );
        // Extension wins over a contradictory MIME type
        assert_eq!(
            resolve_doc_type("a.pdf", Some("text/html")),
            Some(DocType::Pdf)
        );
        assert!(!is_supported("payload.bin", Some("application/zip")));
    }

    #[test]
    fn test_unsupported_type_is_400() {
        let mut file = tempfile::NamedTempFile::with_suffix(".exe").unwrap();
        file.write_all(b"MZ").unwrap();
        let err = parse_file(file.path(), "tool.exe", None).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_process_document_assigns_chunk_indices() {
        let mut file = tempfile::NamedTempFile::with_suffix(".txt").unwrap();
        let body = "Capital adequacy paragraph one.\n\n".repeat(60);
        file.write_all(body.as_bytes()).unwrap();

        let config = IngestConfig::default();
        let parsed = process_document(file.path(), "capital.txt", None, &config).unwrap();
        assert_eq!(parsed.doc_type, DocType::Text);
        assert!(parsed.chunks.len() > 1);
        for (i, chunk) in parsed.chunks.iter().enumerate() {
            assert_eq!(chunk.metadata.int_value(keys::CHUNK_INDEX), Some(i as i64));
            assert_eq!(chunk.metadata.filename(), Some("capital.txt"));
            assert_eq!(
                chunk.metadata.str_value(keys::SOURCE_LOCATION),
                Some("Full Document")
            );
        }
    }

    #[test]
    fn test_supported_extensions_match_table() {
        let exts = supported_extensions();
        assert!(exts.contains(&".pdf"));
        assert!(exts.contains(&".sql"));
        assert_eq!(exts.len(), 16);
    }
}
