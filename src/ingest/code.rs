//! SQL and source code parsing
//!
//! SQL files are split on top-level semicolons, one fragment per statement.
//! Other code files (Python, JavaScript, TypeScript) become a single
//! whole-file fragment fenced with the language. Both are tagged with the
//! regulatory role inferred from the filename and content.

use crate::error::Result;
use crate::ingest::types::{keys, DocType, Fragment, RegulatoryType};
use std::path::Path;

pub fn parse(path: &Path, filename: &str, doc_type: DocType) -> Result<Vec<Fragment>> {
    let content = super::text::read_lossy(path, filename)?;
    let content = content.trim();

    if content.is_empty() {
        return Ok(Vec::new());
    }

    match doc_type {
        DocType::Sql => Ok(parse_sql(content, filename)),
        _ => Ok(parse_source(content, filename, doc_type)),
    }
}

fn parse_sql(content: &str, filename: &str) -> Vec<Fragment> {
    let regulatory_type = classify(filename, content);

    split_statements(content)
        .into_iter()
        .enumerate()
        .map(|(i, stmt)| {
            let number = i + 1;
            Fragment::new(
                format!("SQL Statement {}:\n{}", number, stmt),
                format!("Statement {}", number),
            )
            .with_meta(keys::FILENAME, filename)
            .with_meta(keys::DOC_TYPE, DocType::Sql.as_str())
            .with_meta("statement_number", number)
            .with_meta("language", "sql")
            .with_meta(keys::REGULATORY_TYPE, regulatory_type.as_str())
        })
        .collect()
}

fn parse_source(content: &str, filename: &str, doc_type: DocType) -> Vec<Fragment> {
    let language = detect_language(filename);
    let regulatory_type = classify(filename, content);
    let line_count = content.lines().count();

    let body = format!(
        "# Regulatory Code: {}\n\n**Language:** {}\n**Lines:** {}\n\n```{}\n{}\n```",
        filename, language, line_count, language, content
    );

    vec![Fragment::new(body, "Full File")
        .with_meta(keys::FILENAME, filename)
        .with_meta(keys::DOC_TYPE, doc_type.as_str())
        .with_meta("language", language)
        .with_meta("line_count", line_count)
        .with_meta(keys::REGULATORY_TYPE, regulatory_type.as_str())]
}

/// Split on semicolons outside of string literals and comments
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut in_line_comment = false;

    while let Some(c) = chars.next() {
        match c {
            '\n' if in_line_comment => {
                in_line_comment = false;
                current.push(c);
            }
            _ if in_line_comment => current.push(c),
            '-' if !in_single && !in_double && chars.peek() == Some(&'-') => {
                in_line_comment = true;
                current.push(c);
            }
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(c);
            }
            ';' if !in_single && !in_double => {
                let stmt = current.trim().to_string();
                if !stmt.is_empty() {
                    statements.push(stmt);
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }

    let stmt = current.trim().to_string();
    if !stmt.is_empty() {
        statements.push(stmt);
    }
    statements
}

fn detect_language(filename: &str) -> &'static str {
    let lower = filename.to_lowercase();
    if lower.ends_with(".sql") {
        "sql"
    } else if lower.ends_with(".py") {
        "python"
    } else if lower.ends_with(".js") {
        "javascript"
    } else if lower.ends_with(".ts") {
        "typescript"
    } else {
        "text"
    }
}

fn classify(filename: &str, content: &str) -> RegulatoryType {
    let filename_lower = filename.to_lowercase();
    let content_lower = content.to_lowercase();

    if ["lineage", "etl", "mapping"]
        .iter()
        .any(|t| filename_lower.contains(t))
    {
        RegulatoryType::DataLineage
    } else if ["corep", "finrep", "basel"]
        .iter()
        .any(|t| filename_lower.contains(t))
    {
        RegulatoryType::RegulatoryCalculation
    } else if ["select", "from", "join", "where"]
        .iter()
        .any(|t| content_lower.contains(t))
    {
        RegulatoryType::SqlQuery
    } else {
        RegulatoryType::RegulatoryScript
    }
}
