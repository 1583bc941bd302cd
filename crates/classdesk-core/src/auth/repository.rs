use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use super::session::Session;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid session record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Durable home of the persisted session.
///
/// The session store reads it once during hydration and writes it after
/// every `set_auth`/`clear_auth`. Implementations only move records; the
/// JSON layout lives in [`super::codec`].
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Load the persisted session. `Ok(None)` means nothing was stored.
    async fn load(&self) -> Result<Option<Session>, StorageError>;

    async fn save(&self, session: &Session) -> Result<(), StorageError>;

    /// Remove the persisted session. Clearing an empty repository succeeds.
    async fn clear(&self) -> Result<(), StorageError>;
}

/// Process-local repository. Nothing survives a restart.
#[derive(Default)]
pub struct MemorySessionRepository {
    record: Mutex<Option<String>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an already persisted session, as if written by a previous run
    pub fn with_session(session: &Session) -> Result<Self, StorageError> {
        Ok(Self {
            record: Mutex::new(Some(super::codec::encode_session(session)?)),
        })
    }

    /// The raw persisted record, if any
    pub async fn record(&self) -> Option<String> {
        self.record.lock().await.clone()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn load(&self) -> Result<Option<Session>, StorageError> {
        match self.record.lock().await.as_deref() {
            Some(record) => super::codec::decode_session(record),
            None => Ok(None),
        }
    }

    async fn save(&self, session: &Session) -> Result<(), StorageError> {
        let record = super::codec::encode_session(session)?;
        *self.record.lock().await = Some(record);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        *self.record.lock().await = None;
        Ok(())
    }
}
