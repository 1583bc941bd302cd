//! Identity provider client.
//!
//! The identity server is an OAuth2/OpenID Connect provider exposing the
//! usual `/connect/*` endpoints. This module covers:
//!
//! - `pkce`: verifier, challenge and state generation
//! - `IdentityClient`: authorization URL, code exchange, refresh,
//!   revocation and user info
//! - `TokenRefresher`: the one capability the request gateway needs,
//!   split out so tests can substitute it

pub mod client;
pub mod pkce;
pub mod types;

pub use client::{AuthorizationRequest, IdentityClient, IdentityConfig, TokenRefresher, TokenTypeHint};
pub use types::{AuthorizationCallback, TokenResponse};
