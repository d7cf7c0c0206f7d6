use std::collections::HashMap;
use std::time::Duration;

use nextrouter_oauth::OAuthClientConfig;

/// Engine-wide knobs. Owned by the engine instance; there is no
/// process-global configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Overall deadline for a buffered upstream exchange.
    pub write_timeout: Duration,
    pub connect_timeout: Duration,
    /// Idle gap allowed between stream reads.
    pub stream_idle_timeout: Duration,
    /// Trailing bytes of a stream retained for metrics extraction.
    pub tail_buffer_bytes: usize,
    /// Client body peek cap.
    pub body_peek_limit: usize,
    /// Per-provider egress proxy URL (`http://`, `https://`, `socks5://`,
    /// `socks5h://`).
    pub proxy_by_provider: HashMap<String, String>,
    /// Heuristic token estimation when the upstream reports no usage.
    pub estimate_usage: bool,
    pub oauth: OAuthClientConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(5),
            stream_idle_timeout: Duration::from_secs(30),
            tail_buffer_bytes: 256 * 1024,
            body_peek_limit: 16 * 1024 * 1024,
            proxy_by_provider: HashMap::new(),
            estimate_usage: true,
            oauth: OAuthClientConfig::default(),
        }
    }
}
