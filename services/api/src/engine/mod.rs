//! services/api/src/engine/mod.rs
//!
//! The retrieval-augmented session engine: ingestion, question answering and
//! study-artifact generation, plus the persistence and concurrency discipline
//! that keeps sessions isolated and the (metadata, index) pair consistent.
//! This is the only entry point the web layer calls.

pub mod index;
pub mod locks;
pub mod store;

use bytes::Bytes;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use study_assistant_core::chunker;
use study_assistant_core::domain::{
    ArtifactKind, ChatTurn, DocumentKind, DocumentRecord, IngestStatus, IngestedFile, Session,
    SessionKey,
};
use study_assistant_core::ports::{
    DocumentRenderService, EmbeddingService, GenerationService, PortError, PortResult,
    TextExtractionService,
};
use tracing::{info, warn};
use uuid::Uuid;

use index::EmbeddingIndex;
use locks::SessionLocks;
use store::SessionStore;

const ANSWER_INSTRUCTIONS: &str = "You are a helpful study assistant. Answer the question using \
only the provided context. If the context does not contain the answer, say that the uploaded \
documents do not cover it.";

const NOTES_INSTRUCTIONS: &str = "You are a helpful study assistant. Convert the following text \
into clear, concise, and easy-to-understand notes that would be ideal for a student studying for \
a test. Focus on key concepts, important details, and summaries that aid in quick revision and \
understanding.";

const PRACTICE_TEST_INSTRUCTIONS: &str = "You are a helpful study assistant. Create practice \
questions based on the following text, each followed by its answer. Cover the most important \
concepts and vary the difficulty.";

const NO_DOCUMENTS_ANSWER: &str =
    "There are no documents in this session yet. Upload some documents and ask again.";

const ANSWER_MAX_TOKENS: u32 = 1000;
const ARTIFACT_MAX_TOKENS: u32 = 2000;

/// Tuning knobs for the engine, lifted from `Config` at startup.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub max_artifact_chars: usize,
    pub call_timeout: Duration,
}

/// One uploaded file as received by the boundary layer.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Bytes,
}

//=========================================================================================
// The Engine
//=========================================================================================

pub struct SessionEngine {
    store: SessionStore,
    locks: SessionLocks,
    extractor: Arc<dyn TextExtractionService>,
    embedder: Arc<dyn EmbeddingService>,
    generator: Arc<dyn GenerationService>,
    renderer: Arc<dyn DocumentRenderService>,
    settings: EngineSettings,
}

impl SessionEngine {
    pub fn new(
        store: SessionStore,
        extractor: Arc<dyn TextExtractionService>,
        embedder: Arc<dyn EmbeddingService>,
        generator: Arc<dyn GenerationService>,
        renderer: Arc<dyn DocumentRenderService>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            locks: SessionLocks::new(),
            extractor,
            embedder,
            generator,
            renderer,
            settings,
        }
    }

    // --- Session lifecycle -------------------------------------------------------------

    pub async fn create_session(&self, user_id: &str, name: &str) -> PortResult<Session> {
        let key = SessionKey::new(user_id, Uuid::new_v4());
        let name = if name.trim().is_empty() { "New Chat" } else { name };
        let session = self.store.create(key.clone(), name).await?;
        info!(user_id, session_id = %key.session_id, "Created session");
        Ok(session)
    }

    pub async fn list_sessions(&self, user_id: &str) -> PortResult<Vec<Session>> {
        self.store.list_for_user(user_id).await
    }

    pub async fn get_session(&self, key: &SessionKey) -> PortResult<Session> {
        self.store.get(key).await
    }

    pub async fn rename_session(&self, key: &SessionKey, name: &str) -> PortResult<Session> {
        if name.trim().is_empty() {
            return Err(PortError::InvalidInput(
                "session_name must not be blank".to_string(),
            ));
        }
        let lock = self.locks.for_session(key);
        let _guard = lock.lock().await;

        let mut session = self.store.get(key).await?;
        session.name = name.trim().to_string();
        session.updated_at = Utc::now();
        self.store.persist(&session).await?;
        Ok(session)
    }

    /// Removes the session's metadata, index, uploads and artifacts as one
    /// logical operation (the whole directory goes at once).
    pub async fn delete_session(&self, key: &SessionKey) -> PortResult<()> {
        let lock = self.locks.for_session(key);
        let _guard = lock.lock().await;

        self.store.delete(key).await?;
        self.locks.remove(key);
        info!(user_id = %key.user_id, session_id = %key.session_id, "Deleted session");
        Ok(())
    }

    // --- Ingestion pipeline ------------------------------------------------------------

    /// Ingests a batch of uploaded files: extract, chunk, embed, index, then
    /// record in the manifest. Per-file failures are reported, never raised;
    /// one bad file does not abort the batch. The index is persisted before
    /// the manifest acknowledges each document.
    pub async fn ingest(
        &self,
        key: &SessionKey,
        files: Vec<UploadedFile>,
    ) -> PortResult<Vec<IngestedFile>> {
        if files.is_empty() {
            return Err(PortError::InvalidInput("no files provided".to_string()));
        }

        let lock = self.locks.for_session(key);
        let _guard = lock.lock().await;

        let mut session = self.store.get(key).await?;
        let mut index = EmbeddingIndex::load(self.store.index_path(key)?).await?;

        let mut report = Vec::with_capacity(files.len());
        for file in files {
            let status = match self.ingest_one(key, &mut index, &file).await {
                Ok(record) => {
                    session.documents.push(record.clone());
                    session.updated_at = Utc::now();
                    // Manifest write happens after the index write inside
                    // ingest_one, so a crash can orphan chunks but never a
                    // manifest entry.
                    self.store.persist(&session).await?;
                    IngestStatus::Indexed(record)
                }
                Err(e) => {
                    warn!(filename = %file.filename, "Ingestion failed: {}", e);
                    IngestStatus::Failed(e.to_string())
                }
            };
            report.push(IngestedFile {
                filename: file.filename,
                status,
            });
        }

        Ok(report)
    }

    async fn ingest_one(
        &self,
        key: &SessionKey,
        index: &mut EmbeddingIndex,
        file: &UploadedFile,
    ) -> PortResult<DocumentRecord> {
        let extension = file
            .filename
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or("");
        let kind = DocumentKind::from_extension(extension).ok_or_else(|| {
            PortError::InvalidInput(format!(
                "unsupported file type '{}' (expected pdf or docx)",
                extension
            ))
        })?;

        let document_id = Uuid::new_v4();
        let stored_as = format!("{}.{}", document_id, kind.as_str());
        let upload_path = self.store.uploads_dir(key)?.join(&stored_as);
        tokio::fs::write(&upload_path, &file.data)
            .await
            .map_err(|e| PortError::Storage(e.to_string()))?;

        // Failed uploads must not accumulate under uploads/.
        if let Err(e) = self.extract_and_index(index, file, kind, document_id).await {
            if let Err(cleanup) = tokio::fs::remove_file(&upload_path).await {
                warn!("Could not remove stored upload {}: {}", stored_as, cleanup);
            }
            return Err(e);
        }

        Ok(DocumentRecord {
            id: document_id,
            filename: file.filename.clone(),
            stored_as,
            kind,
            uploaded_at: Utc::now(),
        })
    }

    async fn extract_and_index(
        &self,
        index: &mut EmbeddingIndex,
        file: &UploadedFile,
        kind: DocumentKind,
        document_id: Uuid,
    ) -> PortResult<()> {
        let text = with_timeout(
            self.settings.call_timeout,
            self.extractor.extract(&file.data, kind),
            PortError::Extraction,
        )
        .await?;
        if text.trim().is_empty() {
            return Err(PortError::Extraction(format!(
                "no text could be extracted from '{}'",
                file.filename
            )));
        }

        let chunks = chunker::chunk(&text, self.settings.chunk_size, self.settings.chunk_overlap)?;
        let added = with_timeout(
            self.settings.call_timeout,
            index.add(self.embedder.as_ref(), document_id, &chunks),
            PortError::EmbeddingUnavailable,
        )
        .await?;
        info!(filename = %file.filename, chunks = added, "Indexed document");
        Ok(())
    }

    /// Removes one document from the manifest and rebuilds the index from
    /// the surviving chunks. The manifest is persisted first: a crash between
    /// the two writes leaves orphan chunks in the index, never a manifest
    /// entry whose chunks are gone.
    pub async fn remove_document(
        &self,
        key: &SessionKey,
        document_id: Uuid,
    ) -> PortResult<Session> {
        let lock = self.locks.for_session(key);
        let _guard = lock.lock().await;

        let mut session = self.store.get(key).await?;
        let position = session
            .documents
            .iter()
            .position(|doc| doc.id == document_id)
            .ok_or_else(|| {
                PortError::NotFound(format!("Document {} not found in session", document_id))
            })?;

        let removed = session.documents.remove(position);
        session.updated_at = Utc::now();
        self.store.persist(&session).await?;

        let mut index = EmbeddingIndex::load(self.store.index_path(key)?).await?;
        index.remove_document(document_id).await?;

        let upload_path = self.store.uploads_dir(key)?.join(&removed.stored_as);
        if let Err(e) = tokio::fs::remove_file(&upload_path).await {
            warn!("Could not remove stored upload {}: {}", removed.stored_as, e);
        }

        Ok(session)
    }

    // --- Retrieval-augmented answering -------------------------------------------------

    /// Answers a question against the session's index and appends the
    /// exchange to history. The session lock is held across the whole
    /// read-retrieve-generate-append sequence, so turns land in causal order.
    pub async fn ask(&self, key: &SessionKey, question: &str) -> PortResult<ChatTurn> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PortError::InvalidInput("question must not be blank".to_string()));
        }

        let lock = self.locks.for_session(key);
        let _guard = lock.lock().await;

        let mut session = self.store.get(key).await?;
        let index = EmbeddingIndex::load(self.store.index_path(key)?).await?;

        let hits = with_timeout(
            self.settings.call_timeout,
            index.search(self.embedder.as_ref(), question, self.settings.top_k),
            PortError::EmbeddingUnavailable,
        )
        .await?;

        let answer = if hits.is_empty() {
            NO_DOCUMENTS_ANSWER.to_string()
        } else {
            let context = hits
                .iter()
                .map(|hit| hit.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            let input = format!("Context:\n{}\n\nQuestion: {}", context, question);
            with_timeout(
                self.settings.call_timeout,
                self.generator
                    .generate(ANSWER_INSTRUCTIONS, &input, ANSWER_MAX_TOKENS),
                PortError::GenerationUnavailable,
            )
            .await?
        };

        let turn = ChatTurn {
            question: question.to_string(),
            answer,
            timestamp: Utc::now(),
        };
        session.history.push(turn.clone());
        session.message_count += 1;
        session.updated_at = Utc::now();
        self.store.persist(&session).await?;

        Ok(turn)
    }

    // --- Study artifacts ---------------------------------------------------------------

    /// Generates condensed notes or a practice test from a bounded sample of
    /// the session's indexed text, renders it, and returns the filename the
    /// boundary layer can expose for download.
    pub async fn generate_artifact(
        &self,
        key: &SessionKey,
        kind: ArtifactKind,
    ) -> PortResult<String> {
        let lock = self.locks.for_session(key);
        let _guard = lock.lock().await;

        let session = self.store.get(key).await?;
        if session.documents.is_empty() {
            return Err(PortError::EmptySession);
        }

        let index = EmbeddingIndex::load(self.store.index_path(key)?).await?;
        if index.is_empty() {
            return Err(PortError::EmptySession);
        }
        let text = index.sample_text(self.settings.max_artifact_chars);

        let (instructions, title) = match kind {
            ArtifactKind::Notes => (NOTES_INSTRUCTIONS, "Study Notes"),
            ArtifactKind::PracticeTest => (PRACTICE_TEST_INSTRUCTIONS, "Practice Test"),
        };

        let generated = with_timeout(
            self.settings.call_timeout,
            self.generator.generate(instructions, &text, ARTIFACT_MAX_TOKENS),
            PortError::GenerationUnavailable,
        )
        .await?;

        let rendered = with_timeout(
            self.settings.call_timeout,
            self.renderer.render(title, &generated, kind),
            PortError::Unexpected,
        )
        .await?;

        let filename = format!(
            "{}_{}.html",
            kind.as_str(),
            Utc::now().format("%Y%m%d_%H%M%S%3f")
        );
        let path = self.store.artifacts_dir(key)?.join(&filename);
        tokio::fs::write(&path, rendered)
            .await
            .map_err(|e| PortError::Storage(e.to_string()))?;

        info!(session_id = %key.session_id, artifact = %filename, "Generated artifact");
        Ok(filename)
    }

    /// Resolves a previously generated artifact to its path for download.
    pub async fn artifact_path(
        &self,
        key: &SessionKey,
        filename: &str,
    ) -> PortResult<std::path::PathBuf> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return Err(PortError::InvalidInput("invalid artifact filename".to_string()));
        }
        // Confirms the session exists before touching its directory.
        self.store.get(key).await?;

        let path = self.store.artifacts_dir(key)?.join(filename);
        if !tokio::fs::try_exists(&path)
            .await
            .map_err(|e| PortError::Storage(e.to_string()))?
        {
            return Err(PortError::NotFound(format!("Artifact {} not found", filename)));
        }
        Ok(path)
    }
}

/// Bounds an external-capability call; on timeout the in-flight mutation is
/// treated as failed and nothing partial is persisted.
async fn with_timeout<T, F>(
    duration: Duration,
    future: F,
    on_timeout: impl FnOnce(String) -> PortError,
) -> PortResult<T>
where
    F: Future<Output = PortResult<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(format!(
            "call exceeded the {}s timeout",
            duration.as_secs()
        ))),
    }
}
