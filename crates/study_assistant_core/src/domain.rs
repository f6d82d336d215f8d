//! crates/study_assistant_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any storage or serialization format.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// The composite key that addresses every piece of persisted state.
///
/// `user_id` is a client-supplied identifier; `session_id` is generated by the
/// server on session creation and stable afterwards. All isolation in the
/// system hangs off this pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_id: String,
    pub session_id: Uuid,
}

impl SessionKey {
    pub fn new(user_id: impl Into<String>, session_id: Uuid) -> Self {
        Self {
            user_id: user_id.into(),
            session_id,
        }
    }
}

/// An isolated per-user workspace: uploaded documents, their index, and the
/// chat history accumulated against them.
#[derive(Debug, Clone)]
pub struct Session {
    pub key: SessionKey,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub documents: Vec<DocumentRecord>,
    pub history: Vec<ChatTurn>,
}

/// The supported upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
}

impl DocumentKind {
    /// Maps a filename extension to a kind; `None` for anything unsupported.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }
}

/// One uploaded document inside a session's manifest.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: Uuid,
    /// The filename as uploaded by the client.
    pub filename: String,
    /// The storage-safe name the raw bytes were saved under.
    pub stored_as: String,
    pub kind: DocumentKind,
    pub uploaded_at: DateTime<Utc>,
}

/// A single question-and-answer exchange. Immutable once appended; history
/// preserves strict insertion order.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

/// One retrieval result: the chunk text, the document it came from, and the
/// similarity score (higher is better).
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub text: String,
    pub document_id: Uuid,
    pub score: f32,
}

/// The two kinds of generated study artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Notes,
    PracticeTest,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notes => "notes",
            Self::PracticeTest => "practice_test",
        }
    }
}

/// Per-file outcome of one ingestion batch. A failed file never aborts the
/// rest of the batch, so callers get one of these per uploaded file.
#[derive(Debug, Clone)]
pub struct IngestedFile {
    pub filename: String,
    pub status: IngestStatus,
}

#[derive(Debug, Clone)]
pub enum IngestStatus {
    Indexed(DocumentRecord),
    Failed(String),
}

impl IngestStatus {
    pub fn is_indexed(&self) -> bool {
        matches!(self, Self::Indexed(_))
    }
}
