//! Core library for classdesk.
//!
//! This crate contains everything the classdesk front-ends share:
//!
//! - [`auth`]: the session store, its persistence adapters, and the
//!   login/logout flow
//! - [`oidc`]: the identity provider client (PKCE, refresh, revocation)
//! - [`api`]: request executors, the reauthenticating decorator and the
//!   typed domain client
//! - [`cache`]: the tag-invalidated query cache
//! - [`models`]: classes, people, schedules, attendance and assignments
//! - [`config`]: environment-driven configuration

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;
pub mod oidc;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, HttpExecutor, RequestExecutor, WithReauth};
pub use auth::{AuthError, AuthService, Session, SessionRepository, SessionSnapshot, SessionStore};
pub use cache::{CacheTag, QueryCache};
pub use config::{Config, ConfigError, SessionStoreKind};
pub use models::UserProfile;
pub use oidc::{IdentityClient, TokenRefresher, TokenResponse};
