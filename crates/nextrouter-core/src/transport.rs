use std::collections::HashMap;
use std::sync::Mutex;

use wreq::{Client, Proxy};

use nextrouter_common::ProxyError;

use crate::config::EngineConfig;

/// Resolves the HTTP client used to reach a provider: the shared base
/// client, or a proxied clone cached by canonical proxy URL so connection
/// pools are reused across requests.
pub struct TransportManager {
    base: Client,
    proxy_by_provider: HashMap<String, String>,
    clients: Mutex<HashMap<String, Client>>,
    config: EngineConfig,
}

impl TransportManager {
    pub fn new(config: EngineConfig) -> Result<Self, ProxyError> {
        let base = build_client(&config, None)?;
        Ok(Self {
            base,
            proxy_by_provider: config.proxy_by_provider.clone(),
            clients: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn client_for_provider(&self, provider: &str) -> Result<Client, ProxyError> {
        let proxy = self
            .proxy_by_provider
            .get(provider)
            .map(|url| url.trim())
            .filter(|url| !url.is_empty());
        let Some(proxy) = proxy else {
            return Ok(self.base.clone());
        };

        check_scheme(proxy)?;

        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(proxy) {
            return Ok(client.clone());
        }
        let client = build_client(&self.config, Some(proxy))?;
        clients.insert(proxy.to_string(), client.clone());
        Ok(client)
    }
}

fn check_scheme(proxy: &str) -> Result<(), ProxyError> {
    let scheme = proxy.split("://").next().unwrap_or_default();
    match scheme {
        "http" | "https" | "socks5" | "socks5h" => Ok(()),
        other => Err(ProxyError::Transport(format!(
            "unsupported proxy scheme `{other}` in `{proxy}`"
        ))),
    }
}

fn build_client(config: &EngineConfig, proxy: Option<&str>) -> Result<Client, ProxyError> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.stream_idle_timeout);

    if let Some(proxy) = proxy {
        let proxy = Proxy::all(proxy)
            .map_err(|err| ProxyError::Transport(format!("invalid proxy url: {err}")))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|err| ProxyError::Transport(err.to_string()))
}
