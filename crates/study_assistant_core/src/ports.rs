//! crates/study_assistant_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like AI providers or
//! document parsers.

use crate::domain::{ArtifactKind, DocumentKind};
use async_trait::async_trait;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// The error taxonomy shared by every port and every engine operation.
///
/// Each variant maps to one failure class the boundary layer can act on;
/// external-provider errors never leak their concrete types past a port.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// Bad or missing parameters: blank question, unsupported file type,
    /// invalid chunking parameters. No state change.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Unknown user, session, document or artifact. No state change.
    #[error("Item not found: {0}")]
    NotFound(String),
    /// Text extraction failed for one file. Per-file; never aborts a batch.
    #[error("Extraction failed: {0}")]
    Extraction(String),
    /// The embedding provider failed or timed out. Retryable; no partial
    /// index state is persisted.
    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),
    /// The generation provider failed or timed out. Retryable.
    #[error("Generation service unavailable: {0}")]
    GenerationUnavailable(String),
    /// Artifact generation requested against a session with no documents.
    #[error("Session has no documents")]
    EmptySession,
    /// A disk read or write failed. Fatal for the request.
    #[error("Storage error: {0}")]
    Storage(String),
    /// A catch-all for anything that does not fit the taxonomy above.
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait TextExtractionService: Send + Sync {
    /// Extracts plain text from the raw bytes of an uploaded document.
    async fn extract(&self, data: &[u8], kind: DocumentKind) -> PortResult<String>;
}

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embeds a single piece of text into a fixed-length vector.
    async fn embed(&self, text: &str) -> PortResult<Vec<f32>>;

    /// Embeds a batch of texts. The result preserves input order; callers
    /// rely on stable chunk indices downstream. The default implementation
    /// fans the calls out concurrently and reassembles them in order.
    async fn embed_batch(&self, texts: &[String]) -> PortResult<Vec<Vec<f32>>> {
        futures::future::try_join_all(texts.iter().map(|text| self.embed(text))).await
    }
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Produces text from a system instruction and a user input, bounded by
    /// `max_tokens`.
    async fn generate(&self, instructions: &str, input: &str, max_tokens: u32)
        -> PortResult<String>;
}

#[async_trait]
pub trait DocumentRenderService: Send + Sync {
    /// Renders generated study text into a downloadable document and returns
    /// its bytes.
    async fn render(&self, title: &str, body: &str, kind: ArtifactKind) -> PortResult<Vec<u8>>;
}
