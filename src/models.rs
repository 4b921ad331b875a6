//! Core data models used throughout the engine.
//!
//! These types represent the documents, chunks, vector records, registry
//! entries, and search results that flow through indexing and retrieval.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{IndexError, Result};

/// Detected shape of a document, which selects the chunking strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Curly-brace-language source code.
    Code,
    /// Prose structured by headings (Markdown).
    Markdown,
    /// Issue-tracker record.
    Issue,
    /// Pull-request record.
    PullRequest,
    /// Anything else.
    PlainText,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Code => "code",
            DocumentKind::Markdown => "markdown",
            DocumentKind::Issue => "issue",
            DocumentKind::PullRequest => "pull_request",
            DocumentKind::PlainText => "text",
        }
    }

    /// Coarse category used for filtering and kind affinity in ranking.
    pub fn category(&self) -> &'static str {
        match self {
            DocumentKind::Code => "code",
            DocumentKind::Markdown | DocumentKind::PlainText => "documentation",
            DocumentKind::Issue | DocumentKind::PullRequest => "issue",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw document handed to the chunker.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub document_id: String,
    pub content: String,
    pub source_path: Option<PathBuf>,
    pub language: Option<String>,
    pub kind: DocumentKind,
}

/// Structural role of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Function,
    Class,
    TypeDeclaration,
    Section,
    Paragraph,
    IssueBody,
    Comment,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Function => "function",
            ChunkType::Class => "class",
            ChunkType::TypeDeclaration => "type_declaration",
            ChunkType::Section => "section",
            ChunkType::Paragraph => "paragraph",
            ChunkType::IssueBody => "issue_body",
            ChunkType::Comment => "comment",
        }
    }
}

/// Structured chunk metadata. Every field is optional or defaults empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// 1-based inclusive line range in the source document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<String>,
    /// Heading ancestry (outermost first), excluding the chunk's own title.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
    /// Import/using statements shared by every chunk of a source file.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// A segment of a document bounded by semantic structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Deterministic id, unique within its document.
    pub id: String,
    pub document_id: String,
    pub index: usize,
    pub chunk_type: ChunkType,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Build a chunk with an id derived from document id, index, and the
    /// chunk's symbol or title.
    pub fn new(
        document_id: &str,
        index: usize,
        chunk_type: ChunkType,
        text: impl Into<String>,
        metadata: ChunkMetadata,
    ) -> Self {
        let label = metadata
            .symbols
            .first()
            .or(metadata.title.as_ref())
            .map(|s| slug(s))
            .unwrap_or_default();
        let id = if label.is_empty() {
            format!("{}#{}", document_id, index)
        } else {
            format!("{}#{}:{}", document_id, index, label)
        };
        Self {
            id,
            document_id: document_id.to_string(),
            index,
            chunk_type,
            text: text.into(),
            metadata,
        }
    }

    /// Vector-store point id for this chunk (UUIDv5 of the chunk id).
    pub fn vector_id(&self) -> String {
        vector_id_for(&self.id)
    }
}

/// Deterministic UUIDv5 point id for a chunk id.
pub fn vector_id_for(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

/// Deterministic document id for a source path.
pub fn document_id_for(path: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, path.as_bytes()).to_string()
}

fn slug(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .take(48)
        .collect()
}

/// Document-level metadata carried in every vector payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadMetadata {
    pub source: String,
    pub document_id: String,
    pub kind: DocumentKind,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    pub size: u64,
    /// Unix seconds.
    pub modified: i64,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PayloadMetadata {
    /// Reject payloads that would make filters or ranking lie.
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(IndexError::InvalidPayload("source must not be empty".into()));
        }
        if self.document_id.is_empty() {
            return Err(IndexError::InvalidPayload(
                "document_id must not be empty".into(),
            ));
        }
        if self.category != self.kind.category() {
            return Err(IndexError::InvalidPayload(format!(
                "category '{}' does not match kind '{}'",
                self.category, self.kind
            )));
        }
        if self.modified < 0 {
            return Err(IndexError::InvalidPayload(
                "modified time must be non-negative".into(),
            ));
        }
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(IndexError::InvalidPayload("tags must not be blank".into()));
        }
        Ok(())
    }
}

/// The originating chunk, as stored alongside its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub chunk_id: String,
    pub index: usize,
    pub chunk_type: ChunkType,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// Payload stored with each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPayload {
    pub content: String,
    pub metadata: PayloadMetadata,
    pub chunk: ChunkDescriptor,
}

/// A point written to the vector store.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

impl VectorRecord {
    /// Assemble a record, validating the payload at the store boundary.
    pub fn new(chunk: &Chunk, vector: Vec<f32>, metadata: PayloadMetadata) -> Result<Self> {
        metadata.validate()?;
        Ok(Self {
            id: chunk.vector_id(),
            vector,
            payload: VectorPayload {
                content: chunk.text.clone(),
                metadata,
                chunk: ChunkDescriptor {
                    chunk_id: chunk.id.clone(),
                    index: chunk.index,
                    chunk_type: chunk.chunk_type,
                    metadata: chunk.metadata.clone(),
                },
            },
        })
    }
}

/// Lifecycle status of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Indexed,
    Error,
    Outdated,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Indexed => "indexed",
            IndexStatus::Error => "error",
            IndexStatus::Outdated => "outdated",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "indexed" => IndexStatus::Indexed,
            "outdated" => IndexStatus::Outdated,
            _ => IndexStatus::Error,
        }
    }
}

/// Registry entry for one indexed source document.
///
/// `vector_ids` is exactly the set of points present in the vector store for
/// this document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentIndexEntry {
    pub document_id: String,
    pub path: String,
    pub content_hash: String,
    /// Unix seconds.
    pub modified_at: i64,
    /// Unix seconds.
    pub indexed_at: i64,
    pub chunk_count: usize,
    pub vector_ids: Vec<String>,
    pub size_bytes: u64,
    /// Chunks skipped or zero-filled because embedding failed.
    pub degraded_chunks: usize,
    pub status: IndexStatus,
    pub error: Option<String>,
}

/// Collection-level summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexMetadata {
    pub collection_id: String,
    pub documents: usize,
    pub chunks: usize,
    pub vectors: usize,
    pub size_bytes: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_rebuild_at: Option<i64>,
}

/// AND-combined metadata filters for a search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Matches if the payload carries any of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Unix seconds, inclusive.
    #[serde(default)]
    pub modified_after: Option<i64>,
    /// Unix seconds, inclusive.
    #[serde(default)]
    pub modified_before: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default = "default_true")]
    pub include_content: bool,
    #[serde(default)]
    pub include_highlights: bool,
}

fn default_true() -> bool {
    true
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: None,
            threshold: None,
            filters: SearchFilters::default(),
            include_content: true,
            include_highlights: false,
        }
    }
}

/// A ranked search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f64,
    /// Raw vector similarity before blending.
    pub similarity: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub metadata: PayloadMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlights: Option<Vec<String>>,
    pub chunk: ChunkDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(kind: DocumentKind) -> PayloadMetadata {
        PayloadMetadata {
            source: "src/lib.ts".into(),
            document_id: "doc".into(),
            kind,
            category: kind.category().into(),
            language: Some("typescript".into()),
            file_type: Some("ts".into()),
            size: 10,
            modified: 0,
            tags: vec![],
        }
    }

    #[test]
    fn chunk_id_is_deterministic_and_labelled() {
        let md = ChunkMetadata {
            symbols: vec!["addNumbers".into()],
            ..Default::default()
        };
        let a = Chunk::new("doc1", 0, ChunkType::Function, "x", md.clone());
        let b = Chunk::new("doc1", 0, ChunkType::Function, "x", md);
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, "doc1#0:addnumbers");
        assert_eq!(a.vector_id(), b.vector_id());
    }

    #[test]
    fn chunk_id_without_label() {
        let c = Chunk::new("doc1", 3, ChunkType::Paragraph, "x", ChunkMetadata::default());
        assert_eq!(c.id, "doc1#3");
    }

    #[test]
    fn payload_validation() {
        assert!(meta(DocumentKind::Code).validate().is_ok());

        let mut bad = meta(DocumentKind::Code);
        bad.category = "issue".into();
        assert!(bad.validate().is_err());

        let mut bad = meta(DocumentKind::Code);
        bad.source = " ".into();
        assert!(bad.validate().is_err());

        let mut bad = meta(DocumentKind::Code);
        bad.tags = vec!["".into()];
        assert!(bad.validate().is_err());
    }

    #[test]
    fn record_rejects_invalid_payload() {
        let chunk = Chunk::new("doc", 0, ChunkType::Paragraph, "x", ChunkMetadata::default());
        let mut bad = meta(DocumentKind::PlainText);
        bad.modified = -1;
        assert!(VectorRecord::new(&chunk, vec![0.0], bad).is_err());
    }
}
