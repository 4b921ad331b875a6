//! Error taxonomy for the retrieval engine.
//!
//! Every fallible library operation returns [`Result`]. Retry loops consult
//! [`IndexError::is_transient`] to decide whether another attempt is worth
//! making; everything else is surfaced immediately.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by chunking, embedding, storage, and indexing.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The chunker could not parse a document under its detected kind.
    ///
    /// Never escapes [`crate::chunk::chunk_document`]; it is turned into a
    /// warning and the document is split as plain text instead.
    #[error("parse error ({kind}): {message}")]
    Parse { kind: String, message: String },

    /// Caller supplied unusable input (e.g. empty text to embed).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Embedding backend failed, was rate limited, or broke its contract.
    #[error("embedding provider error ({provider}): {message}")]
    Provider {
        provider: String,
        message: String,
        transient: bool,
    },

    /// Vector backend was unreachable or rejected a read/write.
    #[error("vector store error ({backend}): {message}")]
    VectorStore {
        backend: String,
        message: String,
        transient: bool,
    },

    /// Source file missing, oversized, or unreadable.
    #[error("file system error ({}): {message}", path.display())]
    FileSystem { path: PathBuf, message: String },

    /// Configuration is invalid or disagrees with the live collection.
    #[error("configuration error: {0}")]
    Config(String),

    /// The document-index registry could not be read or written.
    #[error("registry error: {0}")]
    Registry(#[from] sqlx::Error),

    /// A vector payload failed validation before reaching the store.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A full rebuild gave up before switching collections; the live index
    /// is untouched.
    #[error("rebuild aborted: {0}")]
    RebuildAborted(String),

    /// A long-running operation observed its cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

impl IndexError {
    /// Whether the failure is worth retrying (connection refused, rate limit,
    /// 5xx, timeout).
    pub fn is_transient(&self) -> bool {
        match self {
            IndexError::Provider { transient, .. } => *transient,
            IndexError::VectorStore { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Short machine-readable category, used in batch error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            IndexError::Parse { .. } => "parse",
            IndexError::InvalidInput(_) => "invalid_input",
            IndexError::Provider { .. } => "provider",
            IndexError::VectorStore { .. } => "vector_store",
            IndexError::FileSystem { .. } => "file_system",
            IndexError::Config(_) => "config",
            IndexError::Registry(_) => "registry",
            IndexError::InvalidPayload(_) => "invalid_payload",
            IndexError::RebuildAborted(_) => "rebuild_aborted",
            IndexError::Cancelled => "cancelled",
        }
    }

    /// Failures caused by a backend rather than by the document itself.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            IndexError::Provider { .. } | IndexError::VectorStore { .. } | IndexError::Registry(_)
        )
    }

    pub(crate) fn provider(provider: &str, message: impl Into<String>, transient: bool) -> Self {
        IndexError::Provider {
            provider: provider.to_string(),
            message: message.into(),
            transient,
        }
    }

    pub(crate) fn store(backend: &str, message: impl Into<String>, transient: bool) -> Self {
        IndexError::VectorStore {
            backend: backend.to_string(),
            message: message.into(),
            transient,
        }
    }

    pub(crate) fn fs(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        IndexError::FileSystem {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(IndexError::provider("openai", "429", true).is_transient());
        assert!(!IndexError::provider("openai", "dimension mismatch", false).is_transient());
        assert!(IndexError::store("qdrant", "connection refused", true).is_transient());
        assert!(!IndexError::Config("dims".into()).is_transient());
        assert!(!IndexError::Cancelled.is_transient());
    }

    #[test]
    fn file_system_message_includes_path() {
        let err = IndexError::fs("/tmp/missing.md", "not found");
        assert_eq!(
            err.to_string(),
            "file system error (/tmp/missing.md): not found"
        );
    }
}
