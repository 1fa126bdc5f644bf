//! PPTX parsing: one fragment per slide via `zip` + `quick-xml`
//!
//! Each slide yields its title (detected from the title placeholder shape),
//! remaining shape text, and speaker notes. Slides without any text are
//! dropped.

use crate::error::{IngestError, Result};
use crate::ingest::types::{keys, DocType, Fragment, RegulatoryType};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::Read;
use std::path::Path;
use tracing::warn;

fn local_name(q: &[u8]) -> &[u8] {
    match q.iter().position(|&b| b == b':') {
        Some(i) => &q[i + 1..],
        None => q,
    }
}

fn attr_val(e: &BytesStart<'_>, key_local: &[u8]) -> Option<String> {
    for a in e.attributes().with_checks(false).flatten() {
        if local_name(a.key.as_ref()) == key_local {
            return Some(String::from_utf8_lossy(&a.value).into_owned());
        }
    }
    None
}

pub fn parse(path: &Path, filename: &str) -> Result<Vec<Fragment>> {
    let file = std::fs::File::open(path).map_err(|e| IngestError::ParseError {
        filename: filename.to_string(),
        reason: e.to_string(),
    })?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| IngestError::ParseError {
        filename: filename.to_string(),
        reason: format!("not a valid .pptx (zip) file: {}", e),
    })?;

    // Slide parts are numbered ppt/slides/slideN.xml
    let mut slide_numbers: Vec<usize> = Vec::new();
    for i in 0..zip.len() {
        if let Some(n) = zip
            .by_index(i)
            .ok()
            .and_then(|f| slide_number(f.name(), "ppt/slides/slide"))
        {
            slide_numbers.push(n);
        }
    }
    slide_numbers.sort_unstable();
    slide_numbers.dedup();

    let total_slides = slide_numbers.len();
    let mut fragments = Vec::new();

    for n in slide_numbers {
        let slide_xml = match read_entry(&mut zip, &format!("ppt/slides/slide{}.xml", n)) {
            Some(xml) => xml,
            None => {
                warn!("Failed to read slide {} of {}", n, filename);
                continue;
            }
        };

        let slide = extract_slide(&slide_xml);
        let notes = read_entry(&mut zip, &format!("ppt/notesSlides/notesSlide{}.xml", n))
            .map(|xml| extract_slide(&xml))
            .map(|s| s.all_text())
            .filter(|t| !t.is_empty());

        let content = slide.render(n, notes.as_deref());
        if content.is_none() {
            continue;
        }

        let fragment = Fragment::new(content.unwrap_or_default(), format!("Slide {}", n))
            .with_meta(keys::FILENAME, filename)
            .with_meta(keys::DOC_TYPE, DocType::Powerpoint.as_str())
            .with_meta("slide_number", n)
            .with_meta("total_slides", total_slides)
            .with_meta(keys::REGULATORY_TYPE, RegulatoryType::SteeringCommittee.as_str());
        fragments.push(fragment);
    }

    Ok(fragments)
}

fn slide_number(entry_name: &str, prefix: &str) -> Option<usize> {
    entry_name
        .strip_prefix(prefix)?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

fn read_entry<R: Read + std::io::Seek>(
    zip: &mut zip::ZipArchive<R>,
    name: &str,
) -> Option<String> {
    let mut content = String::new();
    zip.by_name(name).ok()?.read_to_string(&mut content).ok()?;
    Some(content)
}

#[derive(Default)]
struct SlideText {
    title: Option<String>,
    body: Vec<String>,
}

impl SlideText {
    fn all_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(t) = &self.title {
            parts.push(t);
        }
        parts.extend(self.body.iter().map(String::as_str));
        parts.join("\n").trim().to_string()
    }

    fn render(&self, slide_num: usize, notes: Option<&str>) -> Option<String> {
        if self.title.is_none() && self.body.is_empty() && notes.is_none() {
            return None;
        }

        let mut content = vec![format!("# Regulatory Presentation - Slide {}\n", slide_num)];
        if let Some(title) = &self.title {
            content.push(format!("## {}\n", title));
        }
        for text in &self.body {
            content.push(text.clone());
        }
        if let Some(notes) = notes {
            content.push(format!("Notes: {}", notes));
        }
        Some(content.join("\n"))
    }
}

/// Walk slide XML collecting text runs per shape; the shape whose placeholder
/// is a title becomes the slide title.
fn extract_slide(slide_xml: &str) -> SlideText {
    let mut reader = Reader::from_str(slide_xml);
    reader.trim_text(false);
    let mut buf = Vec::new();

    let mut slide = SlideText::default();
    let mut in_shape = false;
    let mut shape_is_title = false;
    let mut shape_text = String::new();
    let mut in_text_run = false;

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match local_name(e.name().as_ref()) {
                b"sp" => {
                    in_shape = true;
                    shape_is_title = false;
                    shape_text.clear();
                }
                b"t" => in_text_run = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if local_name(e.name().as_ref()) == b"ph" {
                    if let Some(ty) = attr_val(&e, b"type") {
                        if ty == "title" || ty == "ctrTitle" {
                            shape_is_title = true;
                        }
                    }
                }
            }
            Ok(Event::End(e)) => match local_name(e.name().as_ref()) {
                b"t" => in_text_run = false,
                b"p" if in_shape => shape_text.push('\n'),
                b"sp" => {
                    in_shape = false;
                    let text = shape_text.trim().to_string();
                    if !text.is_empty() {
                        if shape_is_title && slide.title.is_none() {
                            slide.title = Some(text);
                        } else {
                            slide.body.push(text);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Text(t)) if in_text_run => {
                if let Ok(text) = t.unescape() {
                    shape_text.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }

    slide
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::MetadataExt;
    use std::io::Write;

    fn slide_xml(title: Option<&str>, bodies: &[&str]) -> String {
        let mut shapes = String::new();
        if let Some(t) = title {
            shapes.push_str(&format!(
                "<p:sp><p:nvSpPr><p:nvPr><p:ph type=\"title\"/></p:nvPr></p:nvSpPr><p:txBody><a:p><a:r><a:t>{t}</a:t></a:r></a:p></p:txBody></p:sp>"
            ));
        }
        for b in bodies {
            shapes.push_str(&format!(
                "<p:sp><p:txBody><a:p><a:r><a:t>{b}</a:t></a:r></a:p></p:txBody></p:sp>"
            ));
        }
        format!(
            "<?xml version=\"1.0\"?><p:sld xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\" xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\"><p:cSld><p:spTree>{shapes}</p:spTree></p:cSld></p:sld>"
        )
    }

    fn write_pptx(slides: &[(Option<&str>, &[&str])]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::with_suffix(".pptx").unwrap();
        let mut zip = zip::ZipWriter::new(file.reopen().unwrap());
        let options = zip::write::FileOptions::default();

        for (i, (title, bodies)) in slides.iter().enumerate() {
            zip.start_file(format!("ppt/slides/slide{}.xml", i + 1), options)
                .unwrap();
            zip.write_all(slide_xml(*title, bodies).as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        file
    }

    #[test]
    fn test_slides_with_titles_and_bodies() {
        let file = write_pptx(&[
            (Some("Q3 Regulatory Update"), &["CET1 at 13.1%"][..]),
            (None, &[][..]),
            (None, &["Next steps"][..]),
        ]);

        let fragments = parse(file.path(), "steerco.pptx").unwrap();
        assert_eq!(fragments.len(), 2, "empty slide should be dropped");

        let first = &fragments[0];
        assert_eq!(first.source_location, "Slide 1");
        assert!(first.text.contains("## Q3 Regulatory Update"));
        assert!(first.text.contains("CET1 at 13.1%"));
        assert_eq!(first.metadata.int_value("slide_number"), Some(1));
        assert_eq!(first.metadata.int_value("total_slides"), Some(3));
        assert_eq!(
            first.metadata.regulatory_type(),
            Some("steering_committee")
        );

        assert_eq!(fragments[1].source_location, "Slide 3");
    }

    #[test]
    fn test_extract_slide_title_detection() {
        let xml = slide_xml(Some("Title here"), &["body text"]);
        let slide = extract_slide(&xml);
        assert_eq!(slide.title.as_deref(), Some("Title here"));
        assert_eq!(slide.body, vec!["body text".to_string()]);
    }

    #[test]
    fn test_not_a_zip_is_parse_error() {
        let mut file = tempfile::NamedTempFile::with_suffix(".pptx").unwrap();
        file.write_all(b"nope").unwrap();
        let err = parse(file.path(), "broken.pptx").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
