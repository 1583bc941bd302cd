//! Application configuration.
//!
//! Settings come from `CLASSDESK_*` environment variables; the binary loads
//! a `.env` file first so development setups can keep them in one place.
//! Session files live under the user cache directory (`~/.cache/classdesk`
//! on Linux).

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::auth::{
    FileSessionRepository, KeyringSessionRepository, MemorySessionRepository, SessionRepository,
    DEFAULT_HYDRATION_TIMEOUT,
};
use crate::oidc::IdentityConfig;

/// Application name used for cache directory paths
const APP_NAME: &str = "classdesk";

const DEFAULT_REDIRECT_URI: &str = "classdesk://auth/callback";
const DEFAULT_SCOPES: &str = "openid profile email offline_access";

pub const ENV_API_URL: &str = "CLASSDESK_API_URL";
pub const ENV_IDENTITY_URL: &str = "CLASSDESK_IDENTITY_URL";
pub const ENV_CLIENT_ID: &str = "CLASSDESK_CLIENT_ID";
pub const ENV_REDIRECT_URI: &str = "CLASSDESK_REDIRECT_URI";
pub const ENV_SCOPES: &str = "CLASSDESK_SCOPES";
pub const ENV_HYDRATION_TIMEOUT_MS: &str = "CLASSDESK_HYDRATION_TIMEOUT_MS";
pub const ENV_SESSION_STORE: &str = "CLASSDESK_SESSION_STORE";
pub const ENV_SESSION_PASSPHRASE: &str = "CLASSDESK_SESSION_PASSPHRASE";
pub const ENV_LOG_DIR: &str = "CLASSDESK_LOG_DIR";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("Could not find cache directory")]
    NoCacheDir,
}

/// Where the session is persisted between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStoreKind {
    /// OS keychain (macOS Keychain, Windows Credential Manager)
    Keyring,
    /// `session.json` in the cache directory
    File,
    /// Nothing survives the process
    Memory,
}

/// Whether `keyring` has a native credential store on this target
const KEYRING_AVAILABLE: bool = cfg!(any(target_os = "macos", target_os = "ios", target_os = "windows"));

impl Default for SessionStoreKind {
    fn default() -> Self {
        if KEYRING_AVAILABLE {
            SessionStoreKind::Keyring
        } else {
            // No keychain backend is compiled in elsewhere
            SessionStoreKind::File
        }
    }
}

impl FromStr for SessionStoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "keyring" | "keychain" if KEYRING_AVAILABLE => Ok(SessionStoreKind::Keyring),
            "file" => Ok(SessionStoreKind::File),
            "memory" => Ok(SessionStoreKind::Memory),
            _ => Err(ConfigError::Invalid {
                name: ENV_SESSION_STORE,
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub identity_url: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub hydration_timeout: Duration,
    pub session_store: SessionStoreKind,
    pub session_passphrase: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to
    /// its value. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let hydration_timeout = match get(ENV_HYDRATION_TIMEOUT_MS) {
            Some(raw) => {
                let ms: u64 = raw.parse().map_err(|_| ConfigError::Invalid {
                    name: ENV_HYDRATION_TIMEOUT_MS,
                    value: raw.clone(),
                })?;
                Duration::from_millis(ms)
            }
            None => DEFAULT_HYDRATION_TIMEOUT,
        };

        let session_store = match get(ENV_SESSION_STORE) {
            Some(raw) => raw.parse()?,
            None => SessionStoreKind::default(),
        };

        let scopes = get(ENV_SCOPES)
            .unwrap_or_else(|| DEFAULT_SCOPES.to_string())
            .split_whitespace()
            .map(String::from)
            .collect();

        Ok(Self {
            api_url: required(ENV_API_URL)?,
            identity_url: required(ENV_IDENTITY_URL)?,
            client_id: required(ENV_CLIENT_ID)?,
            redirect_uri: get(ENV_REDIRECT_URI).unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
            scopes,
            hydration_timeout,
            session_store,
            session_passphrase: get(ENV_SESSION_PASSPHRASE),
            log_dir: get(ENV_LOG_DIR).map(PathBuf::from),
        })
    }

    pub fn identity_config(&self) -> IdentityConfig {
        IdentityConfig {
            issuer_url: self.identity_url.clone(),
            client_id: self.client_id.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scopes: self.scopes.clone(),
        }
    }

    pub fn cache_dir(&self) -> Result<PathBuf, ConfigError> {
        let cache_dir = dirs::cache_dir().ok_or(ConfigError::NoCacheDir)?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Build the repository selected by `session_store`
    pub fn session_repository(&self) -> Result<Arc<dyn SessionRepository>, ConfigError> {
        let repository: Arc<dyn SessionRepository> = match self.session_store {
            SessionStoreKind::Keyring => Arc::new(KeyringSessionRepository::new()),
            SessionStoreKind::File => {
                let dir = self.cache_dir()?;
                match self.session_passphrase {
                    Some(ref passphrase) => Arc::new(FileSessionRepository::encrypted(dir, passphrase.clone())),
                    None => Arc::new(FileSessionRepository::new(dir)),
                }
            }
            SessionStoreKind::Memory => Arc::new(MemorySessionRepository::new()),
        };
        Ok(repository)
    }
}
