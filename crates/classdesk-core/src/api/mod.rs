//! REST API access for the administration backend.
//!
//! Requests flow through a stack of [`RequestExecutor`]s:
//!
//! - `HttpExecutor` sends them over HTTP
//! - `WithReauth` wraps any executor, attaches the session's access token
//!   and recovers from one expired token per request by refreshing it
//!
//! `ApiClient` sits on top with typed operations for classes, teachers,
//! students, sessions, attendance and assignments.

pub mod client;
pub mod error;
pub mod executor;
pub mod reauth;

pub use client::ApiClient;
pub use error::ApiError;
pub use executor::{ApiRequest, ApiResponse, HttpExecutor, RequestExecutor};
pub use reauth::WithReauth;
