//! In-memory query cache for API reads.
//!
//! This module provides the `QueryCache` used by `ApiClient` to serve
//! repeated reads without a round trip. Entries carry `CacheTag`s; a
//! mutation invalidates every entry sharing one of its tags. Entries belong
//! to the identity that was signed in when the read was issued and are
//! never served to anyone else.
//!
//! Entries are considered stale after 5 minutes.

pub mod manager;

pub use manager::{CacheTag, CachedData, QueryCache};
