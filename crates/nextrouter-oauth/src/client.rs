use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, warn};

use nextrouter_dsl::JsonPath;

use crate::persist;

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("token endpoint request failed: {0}")]
    Http(String),
    #[error("token endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("token response missing access token at {0}")]
    MissingToken(String),
}

/// `lower(provider)|identity|sha256(api key)` — the cache identity for a
/// shared token.
pub fn cache_key(provider: &str, identity: &str, api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    format!(
        "{}|{}|{:x}",
        provider.to_lowercase(),
        identity,
        hasher.finalize()
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    pub token_type: String,
    /// Unix seconds; 0 means the upstream reported no expiry and the
    /// fallback TTL was applied at acquisition time.
    pub expires_at: i64,
}

impl CachedToken {
    fn usable(&self, skew: Duration) -> bool {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.expires_at - (skew.as_secs() as i64) > now
    }
}

/// Everything one acquisition needs, already evaluated: the engine
/// resolves DSL expressions before calling in.
#[derive(Debug, Clone)]
pub struct AcquireInput {
    pub cache_key: String,
    pub token_url: String,
    pub form: Vec<(String, String)>,
    pub basic_auth: Option<(String, String)>,
    pub token_path: Option<JsonPath>,
    pub expires_in_path: Option<JsonPath>,
    pub token_type_path: Option<JsonPath>,
}

#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub refresh_skew: Duration,
    pub fallback_ttl: Duration,
    pub persist_dir: Option<PathBuf>,
}

impl Default for OAuthClientConfig {
    fn default() -> Self {
        Self {
            refresh_skew: Duration::from_secs(60),
            fallback_ttl: Duration::from_secs(3000),
            persist_dir: None,
        }
    }
}

pub struct OAuthClient {
    http: wreq::Client,
    config: OAuthClientConfig,
    cache: Mutex<HashMap<String, CachedToken>>,
    /// Per-cache-key acquisition locks; at most one token exchange is in
    /// flight per key, concurrent waiters reuse its result.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl OAuthClient {
    pub fn new(http: wreq::Client, config: OAuthClientConfig) -> Self {
        Self {
            http,
            config,
            cache: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_token(&self, input: &AcquireInput) -> Result<CachedToken, OAuthError> {
        if let Some(token) = self.cached(&input.cache_key) {
            return Ok(token);
        }

        let lock = self.key_lock(&input.cache_key);
        let _guard = lock.lock().await;

        // Re-check under the key lock: a concurrent acquirer may have won.
        if let Some(token) = self.cached(&input.cache_key) {
            return Ok(token);
        }

        let token = self.exchange(input).await?;
        self.store(&input.cache_key, token.clone());
        Ok(token)
    }

    /// Drop the entry (memory and disk). Called by the engine on an
    /// upstream 401; the request itself is not retried.
    pub fn invalidate(&self, cache_key: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(cache_key);
        }
        if let Some(dir) = &self.config.persist_dir {
            persist::remove(dir, cache_key);
        }
        debug!(event = "oauth_invalidate", cache_key = %cache_key);
    }

    fn cached(&self, cache_key: &str) -> Option<CachedToken> {
        if let Ok(cache) = self.cache.lock()
            && let Some(token) = cache.get(cache_key)
            && token.usable(self.config.refresh_skew)
        {
            return Some(token.clone());
        }
        // Miss in memory: hydrate from disk when persistence is on.
        let dir = self.config.persist_dir.as_ref()?;
        let token = persist::load(dir, cache_key)?;
        if !token.usable(self.config.refresh_skew) {
            return None;
        }
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(cache_key.to_string(), token.clone());
        }
        Some(token)
    }

    fn store(&self, cache_key: &str, token: CachedToken) {
        if let Some(dir) = &self.config.persist_dir
            && let Err(err) = persist::save(dir, cache_key, &token)
        {
            warn!(event = "oauth_persist_failed", error = %err);
        }
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(cache_key.to_string(), token);
        }
    }

    fn key_lock(&self, cache_key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(cache_key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn exchange(&self, input: &AcquireInput) -> Result<CachedToken, OAuthError> {
        let mut request = self.http.post(input.token_url.as_str()).form(&input.form);
        if let Some((user, pass)) = &input.basic_auth {
            let raw = format!("{user}:{pass}");
            let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
            request = request.header("Authorization", format!("Basic {encoded}"));
        }

        let response = request
            .send()
            .await
            .map_err(|err| OAuthError::Http(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| OAuthError::Http(err.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(OAuthError::Status {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let parsed: Value = serde_json::from_slice(&body)
            .map_err(|err| OAuthError::Http(format!("invalid token response JSON: {err}")))?;

        let token_path = input
            .token_path
            .clone()
            .unwrap_or_else(|| JsonPath::parse("$.access_token").expect("static path"));
        let access_token = token_path
            .get_str(&parsed)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| OAuthError::MissingToken(token_path.to_string()))?;

        let expires_in = input
            .expires_in_path
            .clone()
            .unwrap_or_else(|| JsonPath::parse("$.expires_in").expect("static path"))
            .get_u64(&parsed)
            .map(|secs| Duration::from_secs(secs))
            .unwrap_or(self.config.fallback_ttl);

        let token_type = input
            .token_type_path
            .clone()
            .unwrap_or_else(|| JsonPath::parse("$.token_type").expect("static path"))
            .get_str(&parsed)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Bearer".to_string());

        Ok(CachedToken {
            access_token,
            token_type,
            expires_at: OffsetDateTime::now_utc().unix_timestamp() + expires_in.as_secs() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_shape() {
        let key = cache_key("Acme", "team-a", "sk-secret");
        let parts: Vec<&str> = key.split('|').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "acme");
        assert_eq!(parts[1], "team-a");
        assert_eq!(parts[2].len(), 64);
        // Same inputs, same key; different key value, different hash.
        assert_eq!(key, cache_key("acme", "team-a", "sk-secret"));
        assert_ne!(key, cache_key("acme", "team-a", "sk-other"));
    }

    #[test]
    fn token_usability_honors_skew() {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let token = CachedToken {
            access_token: "t".into(),
            token_type: "Bearer".into(),
            expires_at: now + 30,
        };
        assert!(token.usable(Duration::from_secs(0)));
        assert!(!token.usable(Duration::from_secs(60)));
    }
}
