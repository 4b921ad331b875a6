//! Document-kind-aware chunking.
//!
//! [`Chunker::chunk`] picks one strategy per [`DocumentKind`]:
//!
//! | Kind | Strategy |
//! |------|----------|
//! | `Code` | syntax tree: functions, classes, type declarations ([`code`]) |
//! | `Markdown` | heading sections with ancestry ([`markdown`]) |
//! | `Issue` / `PullRequest` | body plus important comments ([`issue`]) |
//! | `PlainText` | one chunk per blank-line paragraph, long ones split at `max_tokens` ([`text`]) |
//!
//! Chunking never fails. A strategy that cannot parse its input produces a
//! warning and the document is split into packed paragraphs instead. Every document
//! yields at least one chunk, and chunk ids are deterministic for a given
//! document id and content.

pub mod code;
pub mod issue;
pub mod markdown;
pub mod text;

use tracing::warn;

use crate::config::ChunkingConfig;
use crate::error::Result;
use crate::models::{Chunk, ChunkMetadata, ChunkType, DocumentInput, DocumentKind};
use text::{pack_paragraphs, split_paragraphs, Piece, CHARS_PER_TOKEN};

/// A chunk before it has been numbered and given an id.
#[derive(Debug, Clone)]
pub(crate) struct ChunkDraft {
    pub chunk_type: ChunkType,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Chunks for one document plus any non-fatal warnings.
#[derive(Debug, Clone, Default)]
pub struct ChunkOutput {
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<String>,
}

/// Splits documents into typed chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chars: usize,
    section_max_chars: usize,
    min_comment_chars: usize,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            max_chars: config.max_tokens.max(1) * CHARS_PER_TOKEN,
            section_max_chars: config.section_max_tokens.max(1) * CHARS_PER_TOKEN,
            min_comment_chars: config.min_comment_chars,
        }
    }

    pub fn chunk(&self, doc: &DocumentInput) -> ChunkOutput {
        let mut warnings = Vec::new();

        let strategy: Result<Vec<ChunkDraft>> = match doc.kind {
            DocumentKind::Code => code::chunk_code(&doc.content, doc.language.as_deref()),
            DocumentKind::Markdown => Ok(markdown::chunk_markdown(
                &doc.content,
                self.section_max_chars,
            )),
            DocumentKind::Issue | DocumentKind::PullRequest => {
                issue::chunk_record(&doc.content, doc.kind, self.min_comment_chars)
            }
            DocumentKind::PlainText => Ok(self.paragraph_chunks(&doc.content)),
        };

        let mut drafts = match strategy {
            Ok(drafts) => drafts,
            Err(e) => {
                let source = doc
                    .source_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| doc.document_id.clone());
                warn!(source = %source, kind = %doc.kind, error = %e, "falling back to text split");
                warnings.push(format!("{}; fell back to text split", e));
                self.split_text(&doc.content)
            }
        };

        // Code with no top-level declarations (scripts, config modules).
        if drafts.is_empty() {
            drafts = self.split_text(&doc.content);
        }
        if drafts.is_empty() {
            drafts.push(ChunkDraft {
                chunk_type: ChunkType::Paragraph,
                text: String::new(),
                metadata: ChunkMetadata::default(),
            });
        }

        let chunks = drafts
            .into_iter()
            .enumerate()
            .map(|(index, mut draft)| {
                if draft.metadata.language.is_none() {
                    draft.metadata.language = doc.language.clone();
                }
                Chunk::new(
                    &doc.document_id,
                    index,
                    draft.chunk_type,
                    draft.text,
                    draft.metadata,
                )
            })
            .collect();

        ChunkOutput { chunks, warnings }
    }

    fn paragraph_chunks(&self, content: &str) -> Vec<ChunkDraft> {
        paragraph_drafts(split_paragraphs(content, self.max_chars, 1))
    }

    fn split_text(&self, content: &str) -> Vec<ChunkDraft> {
        paragraph_drafts(pack_paragraphs(content, self.max_chars, 1))
    }
}

fn paragraph_drafts(pieces: Vec<Piece>) -> Vec<ChunkDraft> {
    pieces
        .into_iter()
        .map(|piece| ChunkDraft {
            chunk_type: ChunkType::Paragraph,
            text: piece.text,
            metadata: ChunkMetadata {
                start_line: Some(piece.start_line),
                end_line: Some(piece.end_line),
                ..Default::default()
            },
        })
        .collect()
}

/// Chunk a document with the given settings.
pub fn chunk_document(doc: &DocumentInput, config: &ChunkingConfig) -> ChunkOutput {
    Chunker::new(config).chunk(doc)
}
