use std::collections::HashMap;
use std::path::Path;

use axum::http::HeaderMap;

/// Downstream-token → provider bindings. A client credential pinned to one
/// upstream resolves the provider without a path prefix or header hint.
#[derive(Debug, Default)]
pub struct TokenBindings {
    bindings: HashMap<String, String>,
}

impl TokenBindings {
    /// File format: `{ "<downstream-token>": "<provider>", … }`.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read(path)?;
        let bindings = serde_json::from_slice(&raw)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        Ok(Self { bindings })
    }

    pub fn from_map(bindings: HashMap<String, String>) -> Self {
        Self { bindings }
    }

    pub fn provider_for(&self, token: &str) -> Option<String> {
        self.bindings.get(token).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// The downstream credential, wherever the client dialect puts it:
/// `Authorization: Bearer …`, `x-api-key`, or `x-goog-api-key`.
pub fn downstream_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .unwrap_or(value)
            .trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    for name in ["x-api-key", "x-goog-api-key"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            let token = value.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    None
}
