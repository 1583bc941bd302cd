//! JSON layout of the persisted session record.
//!
//! One record under a fixed storage name:
//!
//! ```json
//! {"version":1,"accessToken":"...","refreshToken":"...","user":{"name":"..."}}
//! ```
//!
//! Kept apart from the store and the repositories so the layout can be
//! tested on its own and shared by every backend.

use serde::{Deserialize, Serialize};

use super::repository::StorageError;
use super::session::Session;
use crate::models::UserProfile;

/// Fixed storage name the record is persisted under
pub const STORAGE_NAME: &str = "auth-storage";

const RECORD_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSession {
    #[serde(default)]
    version: u32,
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
    #[serde(rename = "refreshToken")]
    refresh_token: Option<String>,
    user: Option<UserProfile>,
}

pub fn encode_session(session: &Session) -> Result<String, StorageError> {
    let record = PersistedSession {
        version: RECORD_VERSION,
        access_token: session.access_token.clone(),
        refresh_token: session.refresh_token.clone(),
        user: session.user.clone(),
    };
    Ok(serde_json::to_string(&record)?)
}

/// Decode a persisted record. A record without an access token holds no
/// usable session and decodes to `None`.
pub fn decode_session(record: &str) -> Result<Option<Session>, StorageError> {
    let persisted: PersistedSession = serde_json::from_str(record)?;
    match persisted.access_token.filter(|t| !t.is_empty()) {
        Some(access_token) => Ok(Some(Session {
            access_token: Some(access_token),
            refresh_token: persisted.refresh_token.filter(|t| !t.is_empty()),
            user: persisted.user,
        })),
        None => Ok(None),
    }
}
