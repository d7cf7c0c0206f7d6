use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use nextrouter_common::ProviderKey;

/// Upstream credential lookup. The management surface lives elsewhere;
/// the proxy only reads.
pub trait Keystore: Send + Sync {
    fn key_for(&self, provider: &str) -> Option<ProviderKey>;
}

#[derive(Debug, Deserialize)]
struct KeyEntry {
    name: Option<String>,
    value: String,
    #[serde(default)]
    base_url: Option<String>,
}

/// File-backed keystore: `{ "provider": { "name": …, "value": …,
/// "base_url": … }, … }`.
#[derive(Debug, Default)]
pub struct JsonKeystore {
    keys: HashMap<String, ProviderKey>,
}

impl JsonKeystore {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read(path)?;
        let entries: HashMap<String, KeyEntry> = serde_json::from_slice(&raw)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        Ok(Self::from_entries(entries))
    }

    pub fn from_map(keys: HashMap<String, ProviderKey>) -> Self {
        Self { keys }
    }

    fn from_entries(entries: HashMap<String, KeyEntry>) -> Self {
        let keys = entries
            .into_iter()
            .map(|(provider, entry)| {
                let key = ProviderKey {
                    name: entry.name.unwrap_or_else(|| format!("{provider}-key")),
                    value: entry.value,
                    base_url_override: entry.base_url,
                };
                (provider, key)
            })
            .collect();
        Self { keys }
    }
}

impl Keystore for JsonKeystore {
    fn key_for(&self, provider: &str) -> Option<ProviderKey> {
        self.keys.get(provider).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries() {
        let entries: HashMap<String, KeyEntry> = serde_json::from_str(
            r#"{
                "acme": {"value": "sk-1", "base_url": "https://alt.acme.dev"},
                "other": {"name": "main", "value": "sk-2"}
            }"#,
        )
        .unwrap();
        let store = JsonKeystore::from_entries(entries);
        let key = store.key_for("acme").unwrap();
        assert_eq!(key.value, "sk-1");
        assert_eq!(key.base_url_override.as_deref(), Some("https://alt.acme.dev"));
        assert_eq!(store.key_for("other").unwrap().name, "main");
        assert!(store.key_for("missing").is_none());
    }
}
