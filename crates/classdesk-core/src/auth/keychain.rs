use async_trait::async_trait;
use keyring::Entry;
use tracing::debug;

use super::codec::{self, STORAGE_NAME};
use super::repository::{SessionRepository, StorageError};
use super::session::Session;

/// Keychain service the session entry is filed under
pub const SERVICE_NAME: &str = "classdesk";

/// Session repository backed by the OS keychain (Keychain on macOS/iOS,
/// Credential Manager on Windows).
///
/// Keychain calls block, so each one runs on the blocking pool.
pub struct KeyringSessionRepository {
    service: String,
    key: String,
}

impl KeyringSessionRepository {
    pub fn new() -> Self {
        Self::with_names(SERVICE_NAME, STORAGE_NAME)
    }

    pub fn with_names(service: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            key: key.into(),
        }
    }

    fn entry(service: &str, key: &str) -> Result<Entry, StorageError> {
        Ok(Entry::new(service, key)?)
    }
}

impl Default for KeyringSessionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionRepository for KeyringSessionRepository {
    async fn load(&self) -> Result<Option<Session>, StorageError> {
        let (service, key) = (self.service.clone(), self.key.clone());
        let record = tokio::task::spawn_blocking(move || {
            match Self::entry(&service, &key)?.get_password() {
                Ok(record) => Ok(Some(record)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(StorageError::from(e)),
            }
        })
        .await??;

        debug!(found = record.is_some(), "Keychain session entry read");
        match record {
            Some(record) => codec::decode_session(&record),
            None => Ok(None),
        }
    }

    async fn save(&self, session: &Session) -> Result<(), StorageError> {
        let record = codec::encode_session(session)?;
        let (service, key) = (self.service.clone(), self.key.clone());
        tokio::task::spawn_blocking(move || {
            Self::entry(&service, &key)?
                .set_password(&record)
                .map_err(StorageError::from)
        })
        .await??;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let (service, key) = (self.service.clone(), self.key.clone());
        tokio::task::spawn_blocking(move || match Self::entry(&service, &key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StorageError::from(e)),
        })
        .await?
    }
}
