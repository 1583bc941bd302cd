use std::path::{Path, PathBuf};

use argon2::Argon2;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::codec;
use super::repository::{SessionRepository, StorageError};
use super::session::Session;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// On-disk envelope for an encrypted record
#[derive(Debug, Serialize, Deserialize)]
struct SealedRecord {
    salt: String,
    nonce: String,
    ciphertext: String,
}

/// Session repository backed by a JSON file in the cache directory.
///
/// Used on hosts without a usable keychain. With a passphrase the record is
/// sealed with ChaCha20-Poly1305 under an Argon2-derived key; without one it
/// is stored as plain JSON.
pub struct FileSessionRepository {
    path: PathBuf,
    passphrase: Option<String>,
}

impl FileSessionRepository {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            path: cache_dir.as_ref().join(SESSION_FILE),
            passphrase: None,
        }
    }

    pub fn encrypted(cache_dir: impl AsRef<Path>, passphrase: impl Into<String>) -> Self {
        Self {
            path: cache_dir.as_ref().join(SESSION_FILE),
            passphrase: Some(passphrase.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], StorageError> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| StorageError::Crypto(format!("key derivation failed: {}", e)))?;
        Ok(key)
    }

    fn seal(passphrase: &str, plaintext: &str) -> Result<String, StorageError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let key = Self::derive_key(passphrase, &salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| StorageError::Crypto(format!("encryption failed: {}", e)))?;

        let sealed = SealedRecord {
            salt: STANDARD.encode(salt),
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        };
        Ok(serde_json::to_string_pretty(&sealed)?)
    }

    fn open(passphrase: &str, contents: &str) -> Result<String, StorageError> {
        let sealed: SealedRecord = serde_json::from_str(contents)?;
        let decode = |field: &str| {
            STANDARD
                .decode(field)
                .map_err(|e| StorageError::Crypto(format!("invalid base64 in session file: {}", e)))
        };
        let salt = decode(&sealed.salt)?;
        let nonce = decode(&sealed.nonce)?;
        let ciphertext = decode(&sealed.ciphertext)?;
        if nonce.len() != NONCE_LEN {
            return Err(StorageError::Crypto("invalid nonce length".to_string()));
        }

        let key = Self::derive_key(passphrase, &salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            // Wrong passphrase and tampering look the same here
            .map_err(|_| StorageError::Crypto("session file could not be decrypted".to_string()))?;

        String::from_utf8(plaintext).map_err(|e| StorageError::Crypto(e.to_string()))
    }
}

#[async_trait]
impl SessionRepository for FileSessionRepository {
    async fn load(&self) -> Result<Option<Session>, StorageError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %self.path.display(), "Session file read");

        let record = match self.passphrase {
            // Key derivation is CPU-bound; keep it off the runtime threads
            Some(ref passphrase) => {
                let passphrase = passphrase.clone();
                tokio::task::spawn_blocking(move || Self::open(&passphrase, &contents)).await??
            }
            None => contents,
        };
        codec::decode_session(&record)
    }

    async fn save(&self, session: &Session) -> Result<(), StorageError> {
        let record = codec::encode_session(session)?;
        let contents = match self.passphrase {
            Some(ref passphrase) => {
                let passphrase = passphrase.clone();
                tokio::task::spawn_blocking(move || Self::seal(&passphrase, &record)).await??
            }
            None => record,
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, contents).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
