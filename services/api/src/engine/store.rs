//! services/api/src/engine/store.rs
//!
//! Filesystem persistence for session metadata. Every session owns one
//! directory addressed exclusively by the `(user_id, session_id)` pair:
//!
//! ```text
//! <data_dir>/<user_id>/<session_id>/
//!     session.json    metadata + document manifest + chat history
//!     index.json      the embedding index (owned by engine::index)
//!     uploads/        original uploaded files
//!     artifacts/      rendered study documents
//! ```
//!
//! Isolation across users is structural: no path is ever computed from
//! anything but the composite key. All writes land synchronously, through a
//! temp file and rename, before any mutation is acknowledged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use study_assistant_core::domain::{
    ChatTurn, DocumentKind, DocumentRecord, Session, SessionKey,
};
use study_assistant_core::ports::{PortError, PortResult};
use tracing::warn;
use uuid::Uuid;

use crate::engine::index::write_atomically;

const SESSION_FILE: &str = "session.json";
pub const INDEX_FILE: &str = "index.json";
const UPLOADS_DIR: &str = "uploads";
const ARTIFACTS_DIR: &str = "artifacts";

//=========================================================================================
// The Main Store Struct
//=========================================================================================

/// Durable mapping from `(user_id, session_id)` to session state on disk.
#[derive(Clone)]
pub struct SessionStore {
    data_dir: PathBuf,
}

impl SessionStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// The directory owned by one session. Rejects user ids that could
    /// escape the data directory.
    pub fn session_dir(&self, key: &SessionKey) -> PortResult<PathBuf> {
        Ok(self
            .data_dir
            .join(checked_user_id(&key.user_id)?)
            .join(key.session_id.to_string()))
    }

    pub fn index_path(&self, key: &SessionKey) -> PortResult<PathBuf> {
        Ok(self.session_dir(key)?.join(INDEX_FILE))
    }

    pub fn uploads_dir(&self, key: &SessionKey) -> PortResult<PathBuf> {
        Ok(self.session_dir(key)?.join(UPLOADS_DIR))
    }

    pub fn artifacts_dir(&self, key: &SessionKey) -> PortResult<PathBuf> {
        Ok(self.session_dir(key)?.join(ARTIFACTS_DIR))
    }

    /// Creates a new, empty session and persists it before returning.
    pub async fn create(&self, key: SessionKey, name: &str) -> PortResult<Session> {
        let dir = self.session_dir(&key)?;
        tokio::fs::create_dir_all(dir.join(UPLOADS_DIR))
            .await
            .map_err(|e| PortError::Storage(e.to_string()))?;
        tokio::fs::create_dir_all(dir.join(ARTIFACTS_DIR))
            .await
            .map_err(|e| PortError::Storage(e.to_string()))?;

        let now = Utc::now();
        let session = Session {
            key,
            name: name.to_string(),
            created_at: now,
            updated_at: now,
            message_count: 0,
            documents: Vec::new(),
            history: Vec::new(),
        };
        self.persist(&session).await?;
        Ok(session)
    }

    /// Loads one session; unknown keys are `NotFound`.
    pub async fn get(&self, key: &SessionKey) -> PortResult<Session> {
        let path = self.session_dir(key)?.join(SESSION_FILE);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PortError::NotFound(format!(
                    "Session {} for user {} not found",
                    key.session_id, key.user_id
                )))
            }
            Err(e) => return Err(PortError::Storage(e.to_string())),
        };
        let record: SessionRecord = serde_json::from_slice(&data)
            .map_err(|e| PortError::Storage(format!("corrupt session file: {}", e)))?;
        record.to_domain()
    }

    /// Writes the session metadata to disk. Synchronous with respect to the
    /// caller: once this returns, a restart cannot lose the write.
    pub async fn persist(&self, session: &Session) -> PortResult<()> {
        let path = self.session_dir(&session.key)?.join(SESSION_FILE);
        let record = SessionRecord::from_domain(session);
        let data =
            serde_json::to_vec_pretty(&record).map_err(|e| PortError::Storage(e.to_string()))?;
        write_atomically(&path, &data).await
    }

    /// Deletes the whole session directory: metadata, index, uploads and
    /// artifacts go together, so no orphaned index file can survive its
    /// manifest.
    pub async fn delete(&self, key: &SessionKey) -> PortResult<()> {
        let dir = self.session_dir(key)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PortError::NotFound(
                format!("Session {} for user {} not found", key.session_id, key.user_id),
            )),
            Err(e) => Err(PortError::Storage(e.to_string())),
        }
    }

    /// Lists every session belonging to `user_id`, most recently updated
    /// first. A user with no directory simply has no sessions.
    pub async fn list_for_user(&self, user_id: &str) -> PortResult<Vec<Session>> {
        let user_dir = self.data_dir.join(checked_user_id(user_id)?);
        let mut read_dir = match tokio::fs::read_dir(&user_dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PortError::Storage(e.to_string())),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| PortError::Storage(e.to_string()))?
        {
            let Ok(session_id) = entry.file_name().to_string_lossy().parse::<Uuid>() else {
                continue;
            };
            let key = SessionKey::new(user_id, session_id);
            match self.get(&key).await {
                Ok(session) => sessions.push(session),
                Err(e) => warn!("Skipping unreadable session {}: {}", session_id, e),
            }
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}

/// Validates that a client-supplied user id is safe to use as a directory
/// name. Rejection rather than silent rewriting keeps the key stable.
fn checked_user_id(user_id: &str) -> PortResult<&str> {
    if user_id.is_empty() {
        return Err(PortError::InvalidInput("user_id must not be empty".to_string()));
    }
    if !user_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        || user_id.starts_with('.')
    {
        return Err(PortError::InvalidInput(format!(
            "user_id '{}' contains unsupported characters",
            user_id
        )));
    }
    Ok(user_id)
}

//=========================================================================================
// "Impure" Persistence Record Structs
//=========================================================================================

#[derive(Serialize, Deserialize)]
struct SessionRecord {
    session_id: Uuid,
    user_id: String,
    session_name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    message_count: usize,
    documents: Vec<StoredDocument>,
    chat_history: Vec<StoredTurn>,
}

impl SessionRecord {
    fn from_domain(session: &Session) -> Self {
        Self {
            session_id: session.key.session_id,
            user_id: session.key.user_id.clone(),
            session_name: session.name.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            message_count: session.message_count,
            documents: session.documents.iter().map(StoredDocument::from_domain).collect(),
            chat_history: session.history.iter().map(StoredTurn::from_domain).collect(),
        }
    }

    fn to_domain(self) -> PortResult<Session> {
        Ok(Session {
            key: SessionKey::new(self.user_id, self.session_id),
            name: self.session_name,
            created_at: self.created_at,
            updated_at: self.updated_at,
            message_count: self.message_count,
            documents: self
                .documents
                .into_iter()
                .map(StoredDocument::to_domain)
                .collect::<PortResult<Vec<_>>>()?,
            history: self.chat_history.into_iter().map(StoredTurn::to_domain).collect(),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct StoredDocument {
    id: Uuid,
    filename: String,
    stored_as: String,
    kind: String,
    uploaded_at: DateTime<Utc>,
}

impl StoredDocument {
    fn from_domain(doc: &DocumentRecord) -> Self {
        Self {
            id: doc.id,
            filename: doc.filename.clone(),
            stored_as: doc.stored_as.clone(),
            kind: doc.kind.as_str().to_string(),
            uploaded_at: doc.uploaded_at,
        }
    }

    fn to_domain(self) -> PortResult<DocumentRecord> {
        let kind = DocumentKind::from_extension(&self.kind).ok_or_else(|| {
            PortError::Storage(format!("unknown document kind '{}' on disk", self.kind))
        })?;
        Ok(DocumentRecord {
            id: self.id,
            filename: self.filename,
            stored_as: self.stored_as,
            kind,
            uploaded_at: self.uploaded_at,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct StoredTurn {
    question: String,
    answer: String,
    timestamp: DateTime<Utc>,
}

impl StoredTurn {
    fn from_domain(turn: &ChatTurn) -> Self {
        Self {
            question: turn.question.clone(),
            answer: turn.answer.clone(),
            timestamp: turn.timestamp,
        }
    }

    fn to_domain(self) -> ChatTurn {
        ChatTurn {
            question: self.question,
            answer: self.answer,
            timestamp: self.timestamp,
        }
    }
}
