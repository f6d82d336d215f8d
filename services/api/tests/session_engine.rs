//! Integration tests for the retrieval-augmented session engine, run against
//! deterministic stub capabilities and a throwaway data directory.

use api_lib::engine::index::EmbeddingIndex;
use api_lib::engine::store::SessionStore;
use api_lib::engine::{EngineSettings, SessionEngine, UploadedFile};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use study_assistant_core::domain::{ArtifactKind, DocumentKind};
use study_assistant_core::ports::{
    DocumentRenderService, EmbeddingService, GenerationService, PortError, PortResult,
    TextExtractionService,
};

//=========================================================================================
// Stub Capabilities
//=========================================================================================

/// Marker prefix that makes the stub extractor fail, standing in for a
/// corrupt or mislabeled upload.
const POISON: &[u8] = b"%%unreadable%%";

struct StubExtractor;

#[async_trait]
impl TextExtractionService for StubExtractor {
    async fn extract(&self, data: &[u8], _kind: DocumentKind) -> PortResult<String> {
        if data.starts_with(POISON) {
            return Err(PortError::Extraction("unreadable file".to_string()));
        }
        Ok(String::from_utf8_lossy(data).into_owned())
    }
}

/// Deterministic letter-frequency embedding; close enough for relevance
/// ranking over distinct vocabularies.
struct StubEmbedder;

#[async_trait]
impl EmbeddingService for StubEmbedder {
    async fn embed(&self, text: &str) -> PortResult<Vec<f32>> {
        let mut v = vec![0.0f32; 26];
        for c in text.to_ascii_lowercase().chars() {
            if c.is_ascii_lowercase() {
                v[(c as u8 - b'a') as usize] += 1.0;
            }
        }
        Ok(v)
    }
}

/// Echoes its input so tests can assert the answer was grounded in the
/// retrieved context; counts invocations for call-count assertions.
struct StubGenerator {
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl StubGenerator {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Some(delay),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for StubGenerator {
    async fn generate(
        &self,
        _instructions: &str,
        input: &str,
        _max_tokens: u32,
    ) -> PortResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(format!("Generated from: {}", input))
    }
}

struct StubRenderer;

#[async_trait]
impl DocumentRenderService for StubRenderer {
    async fn render(&self, title: &str, body: &str, _kind: ArtifactKind) -> PortResult<Vec<u8>> {
        Ok(format!("{}\n{}", title, body).into_bytes())
    }
}

struct SlowRenderer(Duration);

#[async_trait]
impl DocumentRenderService for SlowRenderer {
    async fn render(&self, title: &str, body: &str, _kind: ArtifactKind) -> PortResult<Vec<u8>> {
        tokio::time::sleep(self.0).await;
        Ok(format!("{}\n{}", title, body).into_bytes())
    }
}

//=========================================================================================
// Harness
//=========================================================================================

struct Harness {
    engine: SessionEngine,
    store: SessionStore,
    generator: Arc<StubGenerator>,
    _dir: tempfile::TempDir,
}

fn settings() -> EngineSettings {
    EngineSettings {
        chunk_size: 200,
        chunk_overlap: 40,
        top_k: 4,
        max_artifact_chars: 12_000,
        call_timeout: Duration::from_secs(5),
    }
}

fn harness_with(generator: Arc<StubGenerator>, settings: EngineSettings) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());
    let engine = SessionEngine::new(
        store.clone(),
        Arc::new(StubExtractor),
        Arc::new(StubEmbedder),
        generator.clone(),
        Arc::new(StubRenderer),
        settings,
    );
    Harness {
        engine,
        store,
        generator,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(StubGenerator::new()), settings())
}

fn upload(filename: &str, text: &str) -> UploadedFile {
    UploadedFile {
        filename: filename.to_string(),
        data: Bytes::from(text.as_bytes().to_vec()),
    }
}

//=========================================================================================
// Tests
//=========================================================================================

#[tokio::test]
async fn end_to_end_question_answering() {
    let h = harness();
    let session = h.engine.create_session("alice", "Geography").await.unwrap();
    let key = session.key.clone();

    // Long enough to cross at least one chunk boundary.
    let text = "Paris is the capital of France. ".repeat(20);
    let report = h.engine.ingest(&key, vec![upload("france.pdf", &text)]).await.unwrap();
    assert_eq!(report.len(), 1);
    assert!(report[0].status.is_indexed());

    let turn = h.engine.ask(&key, "What is the capital of France?").await.unwrap();
    assert!(turn.answer.contains("Paris"));
    assert_eq!(h.generator.call_count(), 1);

    let reloaded = h.engine.get_session(&key).await.unwrap();
    assert_eq!(reloaded.message_count, 1);
    assert_eq!(reloaded.history.len(), 1);
    assert_eq!(reloaded.history[0].question, "What is the capital of France?");
}

#[tokio::test]
async fn asking_an_empty_session_skips_the_generator() {
    let h = harness();
    let session = h.engine.create_session("alice", "").await.unwrap();
    assert_eq!(session.name, "New Chat");

    let turn = h.engine.ask(&session.key, "Anything there?").await.unwrap();
    assert!(turn.answer.contains("no documents"));
    assert_eq!(h.generator.call_count(), 0);

    // The canned answer is still part of the history contract.
    let reloaded = h.engine.get_session(&session.key).await.unwrap();
    assert_eq!(reloaded.message_count, 1);
}

#[tokio::test]
async fn blank_questions_are_rejected_without_state_change() {
    let h = harness();
    let session = h.engine.create_session("alice", "Empty Qs").await.unwrap();

    let err = h.engine.ask(&session.key, "   ").await.unwrap_err();
    assert!(matches!(err, PortError::InvalidInput(_)));

    let reloaded = h.engine.get_session(&session.key).await.unwrap();
    assert_eq!(reloaded.message_count, 0);
    assert!(reloaded.history.is_empty());
}

#[tokio::test]
async fn failed_extraction_is_reported_per_file_not_per_batch() {
    let h = harness();
    let session = h.engine.create_session("alice", "Mixed batch").await.unwrap();
    let key = session.key.clone();

    let poisoned = UploadedFile {
        filename: "broken.pdf".to_string(),
        data: Bytes::from_static(b"%%unreadable%% rest of file"),
    };
    let report = h
        .engine
        .ingest(&key, vec![poisoned, upload("fine.docx", "Plenty of real text here.")])
        .await
        .unwrap();

    assert_eq!(report.len(), 2);
    assert!(!report[0].status.is_indexed());
    assert!(report[1].status.is_indexed());

    let reloaded = h.engine.get_session(&key).await.unwrap();
    assert_eq!(reloaded.documents.len(), 1);
    assert_eq!(reloaded.documents[0].filename, "fine.docx");
}

#[tokio::test]
async fn unsupported_extensions_fail_per_file() {
    let h = harness();
    let session = h.engine.create_session("alice", "Bad types").await.unwrap();

    let report = h
        .engine
        .ingest(&session.key, vec![upload("notes.txt", "plain text")])
        .await
        .unwrap();
    assert!(!report[0].status.is_indexed());

    let reloaded = h.engine.get_session(&session.key).await.unwrap();
    assert!(reloaded.documents.is_empty());
}

#[tokio::test]
async fn empty_upload_batch_is_invalid_input() {
    let h = harness();
    let session = h.engine.create_session("alice", "No files").await.unwrap();
    let err = h.engine.ingest(&session.key, Vec::new()).await.unwrap_err();
    assert!(matches!(err, PortError::InvalidInput(_)));
}

#[tokio::test]
async fn concurrent_uploads_to_one_session_lose_nothing() {
    let h = harness();
    let session = h.engine.create_session("alice", "Races").await.unwrap();
    let key = session.key.clone();

    let text_a = "alpha bravo charlie delta echo ".repeat(15);
    let text_b = "zulu yankee xray whiskey victor ".repeat(15);
    let (ra, rb) = tokio::join!(
        h.engine.ingest(&key, vec![upload("a.pdf", &text_a)]),
        h.engine.ingest(&key, vec![upload("b.pdf", &text_b)]),
    );
    assert!(ra.unwrap()[0].status.is_indexed());
    assert!(rb.unwrap()[0].status.is_indexed());

    let reloaded = h.engine.get_session(&key).await.unwrap();
    assert_eq!(reloaded.documents.len(), 2);

    // Both documents' chunks survived in the persisted index.
    let index = EmbeddingIndex::load(h.store.index_path(&key).unwrap()).await.unwrap();
    let hits = index.search(&StubEmbedder, "alpha zulu", 100).await.unwrap();
    for doc in &reloaded.documents {
        assert!(
            hits.iter().any(|hit| hit.document_id == doc.id),
            "missing chunks for {}",
            doc.filename
        );
    }
}

#[tokio::test]
async fn removing_a_document_purges_its_chunks() {
    let h = harness();
    let session = h.engine.create_session("alice", "Removal").await.unwrap();
    let key = session.key.clone();

    h.engine
        .ingest(
            &key,
            vec![
                upload("keep.pdf", &"kangaroo koala wombat ".repeat(20)),
                upload("drop.pdf", &"quasar nebula pulsar ".repeat(20)),
            ],
        )
        .await
        .unwrap();

    let session = h.engine.get_session(&key).await.unwrap();
    let dropped = session.documents.iter().find(|d| d.filename == "drop.pdf").unwrap().id;

    let updated = h.engine.remove_document(&key, dropped).await.unwrap();
    assert_eq!(updated.documents.len(), 1);

    let index = EmbeddingIndex::load(h.store.index_path(&key).unwrap()).await.unwrap();
    let hits = index.search(&StubEmbedder, "quasar nebula pulsar", 100).await.unwrap();
    assert!(hits.iter().all(|hit| hit.document_id != dropped));

    let err = h.engine.remove_document(&key, dropped).await.unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));
}

#[tokio::test]
async fn deleting_a_session_removes_all_its_state() {
    let h = harness();
    let session = h.engine.create_session("alice", "Doomed").await.unwrap();
    let key = session.key.clone();

    h.engine
        .ingest(&key, vec![upload("doc.pdf", &"ephemeral content ".repeat(30))])
        .await
        .unwrap();
    h.engine.generate_artifact(&key, ArtifactKind::Notes).await.unwrap();

    let dir = h.store.session_dir(&key).unwrap();
    assert!(dir.exists());

    h.engine.delete_session(&key).await.unwrap();
    assert!(!dir.exists());
    assert!(matches!(
        h.engine.get_session(&key).await.unwrap_err(),
        PortError::NotFound(_)
    ));
    assert!(matches!(
        h.engine.delete_session(&key).await.unwrap_err(),
        PortError::NotFound(_)
    ));
}

#[tokio::test]
async fn artifact_generation_requires_documents() {
    let h = harness();
    let session = h.engine.create_session("alice", "No docs yet").await.unwrap();

    let err = h
        .engine
        .generate_artifact(&session.key, ArtifactKind::Notes)
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::EmptySession));
    // The external generator was never consulted.
    assert_eq!(h.generator.call_count(), 0);
}

#[tokio::test]
async fn generated_artifacts_are_downloadable_by_filename() {
    let h = harness();
    let session = h.engine.create_session("alice", "Artifacts").await.unwrap();
    let key = session.key.clone();

    h.engine
        .ingest(&key, vec![upload("doc.pdf", &"photosynthesis chlorophyll ".repeat(20))])
        .await
        .unwrap();

    let filename = h
        .engine
        .generate_artifact(&key, ArtifactKind::PracticeTest)
        .await
        .unwrap();
    assert!(filename.starts_with("practice_test_"));

    let path = h.engine.artifact_path(&key, &filename).await.unwrap();
    let content = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(content.contains("Practice Test"));
    assert!(content.contains("photosynthesis"));

    let err = h.engine.artifact_path(&key, "../session.json").await.unwrap_err();
    assert!(matches!(err, PortError::InvalidInput(_)));
    let err = h.engine.artifact_path(&key, "missing.html").await.unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));
}

#[tokio::test]
async fn slow_generation_times_out_without_persisting_a_turn() {
    let generator = Arc::new(StubGenerator::slow(Duration::from_secs(30)));
    let mut cfg = settings();
    cfg.call_timeout = Duration::from_millis(50);
    let h = harness_with(generator, cfg);

    let session = h.engine.create_session("alice", "Slow").await.unwrap();
    let key = session.key.clone();
    h.engine
        .ingest(&key, vec![upload("doc.pdf", &"timeout fodder text ".repeat(20))])
        .await
        .unwrap();

    let err = h.engine.ask(&key, "will this time out?").await.unwrap_err();
    assert!(matches!(err, PortError::GenerationUnavailable(_)));

    let reloaded = h.engine.get_session(&key).await.unwrap();
    assert_eq!(reloaded.message_count, 0);
    assert!(reloaded.history.is_empty());
}

#[tokio::test]
async fn slow_rendering_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path());
    let mut cfg = settings();
    cfg.call_timeout = Duration::from_millis(50);
    let engine = SessionEngine::new(
        store,
        Arc::new(StubExtractor),
        Arc::new(StubEmbedder),
        Arc::new(StubGenerator::new()),
        Arc::new(SlowRenderer(Duration::from_secs(30))),
        cfg,
    );

    let session = engine.create_session("alice", "Slow render").await.unwrap();
    engine
        .ingest(&session.key, vec![upload("doc.pdf", &"render fodder text ".repeat(20))])
        .await
        .unwrap();

    let err = engine
        .generate_artifact(&session.key, ArtifactKind::Notes)
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::Unexpected(_)));
}

#[tokio::test]
async fn failed_ingestion_leaves_no_stored_upload_behind() {
    let h = harness();
    let session = h.engine.create_session("alice", "Cleanup").await.unwrap();
    let key = session.key.clone();

    let poisoned = UploadedFile {
        filename: "broken.pdf".to_string(),
        data: Bytes::from_static(b"%%unreadable%% bytes"),
    };
    let report = h.engine.ingest(&key, vec![poisoned]).await.unwrap();
    assert!(!report[0].status.is_indexed());

    let uploads = h.store.uploads_dir(&key).unwrap();
    let mut entries = tokio::fs::read_dir(&uploads).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn manifest_drops_a_document_even_if_the_index_rewrite_fails() {
    let h = harness();
    let session = h.engine.create_session("alice", "Removal order").await.unwrap();
    let key = session.key.clone();

    h.engine
        .ingest(&key, vec![upload("doc.pdf", &"removal ordering text ".repeat(20))])
        .await
        .unwrap();
    let doc_id = h.engine.get_session(&key).await.unwrap().documents[0].id;

    // Break the index file so its rewrite fails after the manifest write.
    let index_path = h.store.index_path(&key).unwrap();
    tokio::fs::remove_file(&index_path).await.unwrap();
    tokio::fs::create_dir(&index_path).await.unwrap();

    let err = h.engine.remove_document(&key, doc_id).await.unwrap_err();
    assert!(matches!(err, PortError::Storage(_)));

    // The manifest no longer lists the document; only orphan chunks can be
    // left behind, never a document without chunks.
    let reloaded = h.engine.get_session(&key).await.unwrap();
    assert!(reloaded.documents.is_empty());
}

#[tokio::test]
async fn sessions_list_most_recently_updated_first() {
    let h = harness();
    let older = h.engine.create_session("alice", "older").await.unwrap();
    let newer = h.engine.create_session("alice", "newer").await.unwrap();

    // Touch the first session so it becomes the most recent.
    h.engine.rename_session(&older.key, "older renamed").await.unwrap();

    let sessions = h.engine.list_sessions("alice").await.unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].name, "older renamed");
    assert_eq!(sessions[1].key.session_id, newer.key.session_id);

    // Other users see nothing.
    assert!(h.engine.list_sessions("bob").await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_questions_append_in_causal_order() {
    let h = harness();
    let session = h.engine.create_session("alice", "Ordering").await.unwrap();
    let key = session.key.clone();
    h.engine
        .ingest(&key, vec![upload("doc.pdf", &"ordered history text ".repeat(20))])
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        h.engine.ask(&key, "first question?"),
        h.engine.ask(&key, "second question?"),
    );
    a.unwrap();
    b.unwrap();

    let reloaded = h.engine.get_session(&key).await.unwrap();
    assert_eq!(reloaded.message_count, 2);
    assert_eq!(reloaded.history.len(), 2);
    // Each turn's own read-then-write stayed atomic under the session lock.
    assert_ne!(reloaded.history[0].question, reloaded.history[1].question);
}
