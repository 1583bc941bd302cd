//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionStore`: the single source of truth for tokens and identity,
//!   with write-through persistence and a hydration barrier
//! - `SessionRepository` and its backends: OS keychain, (optionally
//!   encrypted) file, and in-memory
//! - `AuthService`: PKCE login, logout and revocation against the
//!   identity server
//!
//! The persisted record layout lives in `codec`, separate from the store.

pub mod codec;
pub mod error;
pub mod file_store;
pub mod keychain;
pub mod repository;
pub mod service;
pub mod session;

pub use error::AuthError;
pub use file_store::FileSessionRepository;
pub use keychain::KeyringSessionRepository;
pub use repository::{MemorySessionRepository, SessionRepository, StorageError};
pub use service::AuthService;
pub use session::{Session, SessionSnapshot, SessionStore, DEFAULT_HYDRATION_TIMEOUT};
