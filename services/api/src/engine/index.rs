//! services/api/src/engine/index.rs
//!
//! The per-session embedding index: a set of (vector, chunk text, source
//! document) triples persisted as JSON next to the session metadata, with
//! brute-force cosine search. The structure is append/query-optimized;
//! document removal rebuilds by retaining the surviving entries.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use study_assistant_core::domain::SearchHit;
use study_assistant_core::ports::{EmbeddingService, PortError, PortResult};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    text: String,
    document_id: Uuid,
    embedding: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    entries: Vec<IndexEntry>,
}

const INDEX_VERSION: u32 = 1;

/// One session's searchable collection of chunk embeddings.
///
/// Instances are loaded per operation and never shared across sessions; the
/// engine's per-session lock serializes every load-modify-persist cycle.
pub struct EmbeddingIndex {
    path: PathBuf,
    entries: Vec<IndexEntry>,
}

impl EmbeddingIndex {
    /// Loads the index persisted at `path`. A missing file yields an empty
    /// index rather than an error.
    pub async fn load(path: impl Into<PathBuf>) -> PortResult<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(data) => {
                let persisted: PersistedIndex = serde_json::from_slice(&data)
                    .map_err(|e| PortError::Storage(format!("corrupt index file: {}", e)))?;
                persisted.entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(PortError::Storage(e.to_string())),
        };
        Ok(Self { path, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embeds `chunks` and appends them for `document_id`, persisting before
    /// returning. All-or-nothing: if embedding or the disk write fails,
    /// neither memory nor disk changes, so a later `add` on the same index
    /// can never carry chunks of a document that was reported failed.
    pub async fn add(
        &mut self,
        embedder: &dyn EmbeddingService,
        document_id: Uuid,
        chunks: &[String],
    ) -> PortResult<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let embeddings = embedder.embed_batch(chunks).await?;

        let mut next = self.entries.clone();
        next.extend(chunks.iter().zip(embeddings).map(|(text, embedding)| {
            IndexEntry {
                text: text.clone(),
                document_id,
                embedding,
            }
        }));
        self.persist_entries(&next).await?;
        self.entries = next;
        Ok(chunks.len())
    }

    /// Embeds `query` and returns the `k` nearest chunks, best match first.
    /// `k` is clamped to the number of indexed chunks; an empty index yields
    /// an empty result, not an error.
    pub async fn search(
        &self,
        embedder: &dyn EmbeddingService,
        query: &str,
        k: usize,
    ) -> PortResult<Vec<SearchHit>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = embedder.embed(query).await?;

        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(&query_embedding, &entry.embedding), entry))
            .collect();
        // Stable sort keeps equal-score ordering deterministic across calls.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k.min(self.entries.len()))
            .map(|(score, entry)| SearchHit {
                text: entry.text.clone(),
                document_id: entry.document_id,
                score,
            })
            .collect())
    }

    /// Drops every chunk belonging to `document_id` and persists the rebuilt
    /// index. Full reconstruction is O(n) and fine at per-session scale.
    pub async fn remove_document(&mut self, document_id: Uuid) -> PortResult<()> {
        let next: Vec<IndexEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.document_id != document_id)
            .cloned()
            .collect();
        self.persist_entries(&next).await?;
        self.entries = next;
        Ok(())
    }

    /// Gathers a representative concatenation of the indexed text for
    /// artifact generation, bounded by `max_chars`. Chunks are taken
    /// round-robin across distinct source documents so coverage is spread
    /// over every document rather than exhausting the first one.
    pub fn sample_text(&self, max_chars: usize) -> String {
        let mut by_document: Vec<(Uuid, Vec<&str>)> = Vec::new();
        for entry in &self.entries {
            match by_document.iter_mut().find(|(id, _)| *id == entry.document_id) {
                Some((_, texts)) => texts.push(&entry.text),
                None => by_document.push((entry.document_id, vec![&entry.text])),
            }
        }

        let mut picked: Vec<&str> = Vec::new();
        let mut total = 0usize;
        let mut round = 0usize;
        'outer: loop {
            let mut any = false;
            for (_, texts) in &by_document {
                if let Some(text) = texts.get(round) {
                    any = true;
                    let cost = text.chars().count() + 2;
                    if total + cost > max_chars && !picked.is_empty() {
                        break 'outer;
                    }
                    picked.push(text);
                    total += cost;
                }
            }
            if !any {
                break;
            }
            round += 1;
        }

        let mut text = picked.join("\n\n");
        if text.chars().count() > max_chars {
            text = text.chars().take(max_chars).collect();
        }
        text
    }

    async fn persist_entries(&self, entries: &[IndexEntry]) -> PortResult<()> {
        let persisted = PersistedIndex {
            version: INDEX_VERSION,
            entries: entries.to_vec(),
        };
        let data = serde_json::to_vec(&persisted)
            .map_err(|e| PortError::Storage(e.to_string()))?;
        write_atomically(&self.path, &data).await
    }
}

/// Writes via a temp file in the same directory followed by a rename, so a
/// crash mid-write never leaves a truncated index or manifest behind.
pub async fn write_atomically(path: &Path, data: &[u8]) -> PortResult<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, data)
        .await
        .map_err(|e| PortError::Storage(e.to_string()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| PortError::Storage(e.to_string()))
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Deterministic embedder: letter frequencies over a small alphabet, so
    /// lexically similar texts land close together.
    struct FrequencyEmbedder {
        fail: AtomicBool,
    }

    impl FrequencyEmbedder {
        fn new() -> Self {
            Self {
                fail: AtomicBool::new(false),
            }
        }

        fn fail_next(&self) {
            self.fail.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl EmbeddingService for FrequencyEmbedder {
        async fn embed(&self, text: &str) -> PortResult<Vec<f32>> {
            if self.fail.swap(false, Ordering::SeqCst) {
                return Err(PortError::EmbeddingUnavailable("stub outage".to_string()));
            }
            let mut v = vec![0.0f32; 26];
            for c in text.to_ascii_lowercase().chars() {
                if c.is_ascii_lowercase() {
                    v[(c as u8 - b'a') as usize] += 1.0;
                }
            }
            Ok(v)
        }
    }

    fn index_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("index.json")
    }

    #[tokio::test]
    async fn add_then_search_returns_added_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = FrequencyEmbedder::new();
        let mut index = EmbeddingIndex::load(index_path(&dir)).await.unwrap();

        let doc = Uuid::new_v4();
        let chunks = vec!["paris france capital".to_string(), "rust systems language".to_string()];
        index.add(&embedder, doc, &chunks).await.unwrap();

        let hits = index.search(&embedder, "capital of france", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "paris france capital");
        assert!(hits.iter().all(|h| h.document_id == doc));
    }

    #[tokio::test]
    async fn identical_queries_return_identical_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = FrequencyEmbedder::new();
        let mut index = EmbeddingIndex::load(index_path(&dir)).await.unwrap();

        let chunks: Vec<String> = (0..5).map(|i| format!("chunk number {}", i)).collect();
        index.add(&embedder, Uuid::new_v4(), &chunks).await.unwrap();

        let first = index.search(&embedder, "chunk number", 5).await.unwrap();
        let second = index.search(&embedder, "chunk number", 5).await.unwrap();
        let order_a: Vec<&str> = first.iter().map(|h| h.text.as_str()).collect();
        let order_b: Vec<&str> = second.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(order_a, order_b);
    }

    #[tokio::test]
    async fn empty_index_searches_to_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = FrequencyEmbedder::new();
        let index = EmbeddingIndex::load(index_path(&dir)).await.unwrap();
        let hits = index.search(&embedder, "anything", 3).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn failed_embedding_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = FrequencyEmbedder::new();
        let mut index = EmbeddingIndex::load(index_path(&dir)).await.unwrap();

        embedder.fail_next();
        let err = index
            .add(&embedder, Uuid::new_v4(), &["some text".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::EmbeddingUnavailable(_)));
        assert!(index.is_empty());
        assert!(!index_path(&dir).exists());
    }

    #[tokio::test]
    async fn failed_persist_does_not_leak_entries_into_later_adds() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = FrequencyEmbedder::new();
        let path = index_path(&dir);
        let mut index = EmbeddingIndex::load(path.clone()).await.unwrap();

        // A directory squatting on the index path makes the write fail.
        tokio::fs::create_dir(&path).await.unwrap();
        let err = index
            .add(&embedder, Uuid::new_v4(), &["doomed chunk".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Storage(_)));
        assert!(index.is_empty());

        // Once the disk recovers, the next add must persist only its own
        // document's chunks.
        tokio::fs::remove_dir(&path).await.unwrap();
        let doc = Uuid::new_v4();
        index
            .add(&embedder, doc, &["surviving chunk".to_string()])
            .await
            .unwrap();

        let reloaded = EmbeddingIndex::load(path).await.unwrap();
        assert_eq!(reloaded.len(), 1);
        let hits = reloaded.search(&embedder, "chunk", 10).await.unwrap();
        assert!(hits.iter().all(|h| h.document_id == doc));
    }

    #[tokio::test]
    async fn remove_document_excludes_its_chunks_from_search() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = FrequencyEmbedder::new();
        let mut index = EmbeddingIndex::load(index_path(&dir)).await.unwrap();

        let keep = Uuid::new_v4();
        let drop = Uuid::new_v4();
        index
            .add(&embedder, keep, &["alpha beta".to_string()])
            .await
            .unwrap();
        index
            .add(&embedder, drop, &["gamma delta".to_string()])
            .await
            .unwrap();

        index.remove_document(drop).await.unwrap();

        let hits = index.search(&embedder, "gamma delta", 10).await.unwrap();
        assert!(hits.iter().all(|h| h.document_id != drop));

        // The rebuild is persisted too.
        let reloaded = EmbeddingIndex::load(index_path(&dir)).await.unwrap();
        assert_eq!(reloaded.len(), 1);
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = FrequencyEmbedder::new();
        let doc = Uuid::new_v4();
        {
            let mut index = EmbeddingIndex::load(index_path(&dir)).await.unwrap();
            index
                .add(&embedder, doc, &["persisted chunk".to_string()])
                .await
                .unwrap();
        }
        let reloaded = EmbeddingIndex::load(index_path(&dir)).await.unwrap();
        assert_eq!(reloaded.len(), 1);
        let hits = reloaded.search(&embedder, "persisted chunk", 1).await.unwrap();
        assert_eq!(hits[0].document_id, doc);
    }

    #[tokio::test]
    async fn sample_text_spreads_across_documents() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = FrequencyEmbedder::new();
        let mut index = EmbeddingIndex::load(index_path(&dir)).await.unwrap();

        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        index
            .add(
                &embedder,
                doc_a,
                &["a one".to_string(), "a two".to_string(), "a three".to_string()],
            )
            .await
            .unwrap();
        index
            .add(&embedder, doc_b, &["b one".to_string()])
            .await
            .unwrap();

        // Budget for roughly two chunks: one from each document wins over
        // two from the first.
        let sample = index.sample_text(14);
        assert!(sample.contains("a one"));
        assert!(sample.contains("b one"));
        assert!(!sample.contains("a three"));
    }
}
