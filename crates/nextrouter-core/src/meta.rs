use std::time::Instant;

use nextrouter_dsl::ExprScope;
use nextrouter_protocol::api::Api;

/// Per-request state threaded through the pipeline; the expression
/// evaluator reads from it on every evaluation.
#[derive(Debug, Clone)]
pub struct Meta {
    pub api: Api,
    pub is_stream: bool,
    pub actual_model_name: String,
    pub dsl_model_mapped: String,
    pub api_key: String,
    /// Authoritative upstream origin; non-empty after routing applies.
    pub base_url: String,
    /// Mutable path + query appended to `base_url`.
    pub request_url_path: String,
    pub oauth_access_token: String,
    pub oauth_cache_key: String,
    pub start_time: Instant,
}

impl Meta {
    pub fn new(api: Api, is_stream: bool) -> Self {
        Self {
            api,
            is_stream,
            actual_model_name: String::new(),
            dsl_model_mapped: String::new(),
            api_key: String::new(),
            base_url: String::new(),
            request_url_path: String::new(),
            oauth_access_token: String::new(),
            oauth_cache_key: String::new(),
            start_time: Instant::now(),
        }
    }

    /// `$request.model_mapped` resolves to the mapped model when a rule
    /// fired, otherwise to the actual model, so path templates stay valid
    /// for unmapped models.
    pub fn scope(&self) -> ExprScope<'_> {
        ExprScope {
            channel_key: &self.api_key,
            channel_base_url: &self.base_url,
            request_model: &self.actual_model_name,
            request_model_mapped: self.reported_model(),
            oauth_access_token: &self.oauth_access_token,
        }
    }

    /// The model this request is billed/reported as.
    pub fn reported_model(&self) -> &str {
        if self.dsl_model_mapped.is_empty() {
            &self.actual_model_name
        } else {
            &self.dsl_model_mapped
        }
    }
}

/// Owned snapshot of the evaluation scope for tasks that outlive the
/// request handler (the streaming SSE mutator).
#[derive(Debug, Clone, Default)]
pub struct ScopeVals {
    pub channel_key: String,
    pub channel_base_url: String,
    pub request_model: String,
    pub request_model_mapped: String,
    pub oauth_access_token: String,
}

impl ScopeVals {
    pub fn from_meta(meta: &Meta) -> Self {
        Self {
            channel_key: meta.api_key.clone(),
            channel_base_url: meta.base_url.clone(),
            request_model: meta.actual_model_name.clone(),
            request_model_mapped: meta.reported_model().to_string(),
            oauth_access_token: meta.oauth_access_token.clone(),
        }
    }

    pub fn as_scope(&self) -> ExprScope<'_> {
        ExprScope {
            channel_key: &self.channel_key,
            channel_base_url: &self.channel_base_url,
            request_model: &self.request_model,
            request_model_mapped: &self.request_model_mapped,
            oauth_access_token: &self.oauth_access_token,
        }
    }
}
