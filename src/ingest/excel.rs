//! Excel parsing: one fragment per non-empty sheet via `calamine`
//!
//! Sheets render as markdown tables bounded to the first 50 rows and 10
//! columns, which keeps COREP/FINREP annex workbooks inside the retrieval
//! context budget. The regulatory template type is classified from filename
//! tokens first, then sheet-name tokens.

use crate::error::{IngestError, Result};
use crate::ingest::types::{keys, DocType, Fragment, RegulatoryType};
use calamine::Reader;
use std::path::Path;
use tracing::warn;

const MAX_ROWS: usize = 50;
const MAX_COLS: usize = 10;

pub fn parse(path: &Path, filename: &str) -> Result<Vec<Fragment>> {
    let mut workbook = calamine::open_workbook_auto(path).map_err(|e| IngestError::ParseError {
        filename: filename.to_string(),
        reason: e.to_string(),
    })?;

    let names: Vec<String> = workbook.sheet_names().to_owned();
    let regulatory_type = classify(filename, &names);
    let mut fragments = Vec::new();

    for name in &names {
        let range = match workbook.worksheet_range(name) {
            Ok(r) => r,
            Err(e) => {
                warn!("Failed to read sheet '{}' of {}: {}", name, filename, e);
                continue;
            }
        };

        let rows = collect_rows(&range);
        if rows.is_empty() {
            continue;
        }

        let max_row = range.height();
        let max_column = range.width();
        let content = render_markdown(name, &rows);

        let fragment = Fragment::new(content, format!("Sheet: {}", name))
            .with_meta(keys::FILENAME, filename)
            .with_meta(keys::DOC_TYPE, DocType::Excel.as_str())
            .with_meta("sheet_name", name.as_str())
            .with_meta("max_row", max_row)
            .with_meta("max_column", max_column)
            .with_meta(keys::REGULATORY_TYPE, regulatory_type.as_str());
        fragments.push(fragment);
    }

    Ok(fragments)
}

fn collect_rows(range: &calamine::Range<calamine::DataType>) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for row in range.rows().take(MAX_ROWS) {
        let cells: Vec<String> = row.iter().take(MAX_COLS).map(cell_to_string).collect();
        if cells.iter().any(|c| !c.trim().is_empty()) {
            rows.push(cells);
        }
    }
    rows
}

fn cell_to_string(c: &calamine::DataType) -> String {
    use calamine::DataType as D;
    match c {
        D::Empty => String::new(),
        D::String(s) => s.replace('|', "\\|").replace('\n', " ").trim().to_string(),
        D::Float(f) => {
            if f.fract() == 0.0 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        D::Int(i) => i.to_string(),
        D::Bool(b) => if *b { "TRUE".into() } else { "FALSE".into() },
        D::Error(e) => format!("#ERR:{:?}", e),
        other => format!("{}", other),
    }
}

fn render_markdown(sheet_name: &str, rows: &[Vec<String>]) -> String {
    let mut content = vec![format!("# Regulatory Template: {}\n", sheet_name)];

    if let Some(header) = rows.first() {
        content.push(format!("| {} |", header.join(" | ")));
        content.push(format!(
            "|{}|",
            header.iter().map(|_| " --- ").collect::<Vec<_>>().join("|")
        ));
        for row in &rows[1..] {
            content.push(format!("| {} |", row.join(" | ")));
        }
    }

    content.join("\n")
}

fn classify(filename: &str, sheet_names: &[String]) -> RegulatoryType {
    let filename_lower = filename.to_lowercase();
    let sheets_lower = sheet_names.join(" ").to_lowercase();

    if ["corep", "capital", "own funds"]
        .iter()
        .any(|t| filename_lower.contains(t))
    {
        RegulatoryType::CorepTemplate
    } else if ["finrep", "financial", "ifrs"]
        .iter()
        .any(|t| filename_lower.contains(t))
    {
        RegulatoryType::FinrepTemplate
    } else if ["mapping", "lineage", "source"]
        .iter()
        .any(|t| filename_lower.contains(t))
    {
        RegulatoryType::DataMapping
    } else if ["corep", "capital"].iter().any(|t| sheets_lower.contains(t)) {
        RegulatoryType::CorepTemplate
    } else if ["finrep", "financial"].iter().any(|t| sheets_lower.contains(t)) {
        RegulatoryType::FinrepTemplate
    } else {
        RegulatoryType::RegulatoryTemplate
    }
}
