//! OAuth token acquisition with a shared per-`(provider, identity, key)`
//! cache, at-most-once concurrent refresh per cache key, explicit 401
//! invalidation, and optional on-disk persistence.

mod client;
mod persist;
mod profiles;

pub use client::{AcquireInput, CachedToken, OAuthClient, OAuthClientConfig, OAuthError, cache_key};
pub use profiles::{OAuthProfile, profile_for_mode};
