use serde::Serialize;

/// Request-scoped failure taxonomy. Configuration errors live with the DSL
/// loader; everything the engine can raise for a single request is here.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("provider not found: {0}")]
    ProviderNotFound(String),
    #[error("no provider selected for request")]
    ProviderNotSelected,
    #[error("no DSL match for api={api} stream={stream}")]
    DslNoMatch { api: String, stream: bool },
    #[error("invalid JSON in request body: {0}")]
    InvalidJson(String),
    #[error("missing upstream key for provider {0}")]
    MissingUpstreamKey(String),
    #[error("unsupported req_map mode: {0}")]
    UnsupportedReqMap(String),
    #[error("cannot transform request with content-encoding {0}")]
    EncodedRequestBody(String),
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("oauth token acquisition failed: {0}")]
    OAuth(String),
}

impl ProxyError {
    /// Stable machine-readable code, used as `error.code` in the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::ProviderNotFound(_) => "provider_not_found",
            ProxyError::ProviderNotSelected => "provider_not_selected",
            ProxyError::DslNoMatch { .. } => "dsl_no_match",
            ProxyError::InvalidJson(_) => "invalid_json",
            ProxyError::MissingUpstreamKey(_) => "missing_upstream_key",
            ProxyError::UnsupportedReqMap(_) => "unsupported_req_map",
            ProxyError::EncodedRequestBody(_) => "encoded_request_body",
            ProxyError::Transport(_) => "proxy_error",
            ProxyError::OAuth(_) => "oauth_error",
        }
    }

    /// Suggested HTTP status for the front-end. The router owns the final
    /// mapping; this is the default it starts from.
    pub fn http_status(&self) -> u16 {
        match self {
            ProxyError::ProviderNotFound(_) => 404,
            _ => 400,
        }
    }
}

/// OpenAI-style error envelope:
/// `{"error":{"message":…,"type":…,"code":…}}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub code: String,
}

impl ErrorEnvelope {
    pub fn new(err: &ProxyError, request_id: Option<&str>) -> Self {
        let message = match request_id {
            Some(id) => format!("{err} (request id: {id})"),
            None => err.to_string(),
        };
        Self {
            error: ErrorDetail {
                message,
                kind: "invalid_request_error".to_string(),
                code: err.code().to_string(),
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            ProxyError::DslNoMatch {
                api: "responses".into(),
                stream: true
            }
            .code(),
            "dsl_no_match"
        );
        assert_eq!(ProxyError::ProviderNotFound("x".into()).http_status(), 404);
        assert_eq!(ProxyError::InvalidJson("y".into()).http_status(), 400);
    }

    #[test]
    fn envelope_includes_request_id() {
        let envelope = ErrorEnvelope::new(
            &ProxyError::MissingUpstreamKey("acme".into()),
            Some("req_01"),
        );
        assert!(envelope.error.message.ends_with("(request id: req_01)"));
        assert_eq!(envelope.error.code, "missing_upstream_key");
    }
}
