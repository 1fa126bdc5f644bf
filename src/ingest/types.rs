//! Type definitions for document ingestion and retrieval

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Document types accepted by the ingestion pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Pdf,
    Excel,
    Powerpoint,
    Word,
    Csv,
    Html,
    Sql,
    Markdown,
    Text,
    Code,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Excel => "excel",
            Self::Powerpoint => "powerpoint",
            Self::Word => "word",
            Self::Csv => "csv",
            Self::Html => "html",
            Self::Sql => "sql",
            Self::Markdown => "markdown",
            Self::Text => "text",
            Self::Code => "code",
        }
    }
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Regulatory classification tags attached during parsing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegulatoryType {
    CorepTemplate,
    FinrepTemplate,
    BaselDocument,
    DataMapping,
    RegulatoryPolicy,
    RegulatoryGuidance,
    RegulatoryDocument,
    RegulatoryCalculation,
    DataLineage,
    JiraExport,
    RegulatoryTemplate,
    RegulatoryData,
    SqlQuery,
    RegulatoryScript,
    SteeringCommittee,
}

impl RegulatoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CorepTemplate => "corep_template",
            Self::FinrepTemplate => "finrep_template",
            Self::BaselDocument => "basel_document",
            Self::DataMapping => "data_mapping",
            Self::RegulatoryPolicy => "regulatory_policy",
            Self::RegulatoryGuidance => "regulatory_guidance",
            Self::RegulatoryDocument => "regulatory_document",
            Self::RegulatoryCalculation => "regulatory_calculation",
            Self::DataLineage => "data_lineage",
            Self::JiraExport => "jira_export",
            Self::RegulatoryTemplate => "regulatory_template",
            Self::RegulatoryData => "regulatory_data",
            Self::SqlQuery => "sql_query",
            Self::RegulatoryScript => "regulatory_script",
            Self::SteeringCommittee => "steering_committee",
        }
    }
}

impl std::fmt::Display for RegulatoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of a chunk: bundled with the binary or uploaded by a client
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Preloaded,
    UserUploaded,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preloaded => "preloaded",
            Self::UserUploaded => "user_uploaded",
        }
    }
}

/// A single metadata value in the open key/value bag
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Time(DateTime<Utc>),
    Str(String),
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<usize> for MetaValue {
    fn from(v: usize) -> Self {
        Self::Int(v as i64)
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<DateTime<Utc>> for MetaValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Time(v)
    }
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Reserved metadata keys validated at index insertion
pub mod keys {
    pub const FILENAME: &str = "filename";
    pub const DOC_TYPE: &str = "doc_type";
    pub const SOURCE_LOCATION: &str = "source_location";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const SOURCE: &str = "source";
    pub const IS_ORIGINAL: &str = "is_original";
    pub const REGULATORY_TYPE: &str = "regulatory_type";
    pub const UPLOAD_TIME: &str = "upload_time";
}

/// Open metadata bag carried by every chunk
pub type Metadata = HashMap<String, MetaValue>;

/// Convenience accessors over the metadata bag
pub trait MetadataExt {
    fn str_value(&self, key: &str) -> Option<&str>;
    fn int_value(&self, key: &str) -> Option<i64>;
    fn filename(&self) -> Option<&str>;
    fn doc_type(&self) -> Option<&str>;
    fn regulatory_type(&self) -> Option<&str>;
}

impl MetadataExt for Metadata {
    fn str_value(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetaValue::as_str)
    }

    fn int_value(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(MetaValue::as_int)
    }

    fn filename(&self) -> Option<&str> {
        self.str_value(keys::FILENAME)
    }

    fn doc_type(&self) -> Option<&str> {
        self.str_value(keys::DOC_TYPE)
    }

    fn regulatory_type(&self) -> Option<&str> {
        self.str_value(keys::REGULATORY_TYPE)
    }
}

/// One logical fragment emitted by a format parser, before chunking.
///
/// Fragments keep per-source provenance (page, sheet, slide, statement)
/// so citations can point at an exact location inside the original file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
    pub source_location: String,
    pub metadata: Metadata,
}

impl Fragment {
    pub fn new(text: impl Into<String>, source_location: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_location: source_location.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// The unit of retrieval: a normalized text passage plus its metadata.
/// Vectors live in the index, not on the chunk, so the chunk manifest can
/// be re-embedded against a different backend without reparsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }
}

/// Summary of a parsed upload returned to the API layer
#[derive(Debug, Clone, Serialize)]
pub struct ParsedDocument {
    pub filename: String,
    pub doc_type: DocType,
    pub regulatory_type: Option<RegulatoryType>,
    pub chunks: Vec<Chunk>,
}
