//! Plain text and Markdown parsing: one whole-file fragment

use crate::error::{IngestError, Result};
use crate::ingest::types::{keys, DocType, Fragment};
use std::path::Path;

/// Read the file, trim surrounding whitespace, and emit one fragment.
/// Empty files yield zero fragments rather than an error.
pub fn parse(path: &Path, filename: &str, doc_type: DocType) -> Result<Vec<Fragment>> {
    let content = read_lossy(path, filename)?;
    let content = content.trim();

    if content.is_empty() {
        return Ok(Vec::new());
    }

    let fragment = Fragment::new(content, "Full Document")
        .with_meta(keys::FILENAME, filename)
        .with_meta(keys::DOC_TYPE, doc_type.as_str());
    Ok(vec![fragment])
}

/// Read a file as UTF-8, falling back to windows-1252 for legacy exports
pub(crate) fn read_lossy(path: &Path, filename: &str) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| IngestError::ParseError {
        filename: filename.to_string(),
        reason: e.to_string(),
    })?;

    match String::from_utf8(bytes) {
        Ok(s) => Ok(s.replace('\r', "")),
        Err(e) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(e.as_bytes());
            Ok(decoded.replace('\r', ""))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::MetadataExt;
    use std::io::Write;

    #[test]
    fn test_whole_file_fragment() {
        let mut file = tempfile::NamedTempFile::with_suffix(".md").unwrap();
        file.write_all(b"  # Basel III\n\nCapital requirements.  \n").unwrap();

        let fragments = parse(file.path(), "notes.md", DocType::Markdown).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].text, "# Basel III\n\nCapital requirements.");
        assert_eq!(fragments[0].metadata.doc_type(), Some("markdown"));
    }

    #[test]
    fn test_empty_file_yields_nothing() {
        let mut file = tempfile::NamedTempFile::with_suffix(".txt").unwrap();
        file.write_all(b"   \n\n  ").unwrap();

        let fragments = parse(file.path(), "empty.txt", DocType::Text).unwrap();
        assert!(fragments.is_empty());
    }

    #[test]
    fn test_latin1_fallback() {
        let mut file = tempfile::NamedTempFile::with_suffix(".txt").unwrap();
        // "caf\xe9" is invalid UTF-8 but valid windows-1252
        file.write_all(b"caf\xe9 risk report").unwrap();

        let fragments = parse(file.path(), "legacy.txt", DocType::Text).unwrap();
        assert_eq!(fragments[0].text, "café risk report");
    }
}
