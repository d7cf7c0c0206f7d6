use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::Bytes;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use nextrouter_common::{ErrorEnvelope, ProviderSource, ProxyError};
use nextrouter_core::engine::{ClientRequest, EngineResponse, ProxyCall, ProxyEngine};
use nextrouter_protocol::api::{Api, parse_gemini_model_path};

use crate::keystore::Keystore;
use crate::model_router::ModelRouter;
use crate::token_bindings::{TokenBindings, downstream_token};

const PROVIDER_HEADER: &str = "x-upstream-provider";

#[derive(Clone)]
pub struct RouterState {
    pub engine: Arc<ProxyEngine>,
    pub keystore: Arc<dyn Keystore>,
    pub token_bindings: Arc<TokenBindings>,
    pub model_router: Arc<ModelRouter>,
}

pub fn proxy_router(state: RouterState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/responses", post(responses))
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/messages", post(claude_messages))
        .route("/v1beta/models/{*model_action}", post(gemini_generate))
        .route("/{provider}/v1/chat/completions", post(chat_completions_pinned))
        .route("/{provider}/v1/responses", post(responses_pinned))
        .route("/{provider}/v1/embeddings", post(embeddings_pinned))
        .route("/{provider}/v1/messages", post(claude_messages_pinned))
        .route(
            "/{provider}/v1beta/models/{*model_action}",
            post(gemini_generate_pinned),
        )
        .with_state(state)
}

macro_rules! simple_handlers {
    ($plain:ident, $pinned:ident, $api:expr, $path:literal) => {
        async fn $plain(
            State(state): State<RouterState>,
            headers: HeaderMap,
            body: Bytes,
        ) -> Response {
            handle(state, None, $api, $path.to_string(), headers, body).await
        }

        async fn $pinned(
            State(state): State<RouterState>,
            Path(provider): Path<String>,
            headers: HeaderMap,
            body: Bytes,
        ) -> Response {
            handle(
                state,
                Some((provider, ProviderSource::Dsl)),
                $api,
                $path.to_string(),
                headers,
                body,
            )
            .await
        }
    };
}

simple_handlers!(
    chat_completions,
    chat_completions_pinned,
    Api::ChatCompletions,
    "/v1/chat/completions"
);
simple_handlers!(responses, responses_pinned, Api::Responses, "/v1/responses");
simple_handlers!(embeddings, embeddings_pinned, Api::Embeddings, "/v1/embeddings");
simple_handlers!(
    claude_messages,
    claude_messages_pinned,
    Api::ClaudeMessages,
    "/v1/messages"
);

async fn gemini_generate(
    State(state): State<RouterState>,
    Path(model_action): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    gemini_common(state, None, model_action, uri, headers, body).await
}

async fn gemini_generate_pinned(
    State(state): State<RouterState>,
    Path((provider, model_action)): Path<(String, String)>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    gemini_common(
        state,
        Some((provider, ProviderSource::Dsl)),
        model_action,
        uri,
        headers,
        body,
    )
    .await
}

async fn gemini_common(
    state: RouterState,
    pinned: Option<(String, ProviderSource)>,
    model_action: String,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = format!("/v1beta/models/{model_action}");
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.clone(),
    };
    let api = match parse_gemini_model_path(&path) {
        Some((_, "streamGenerateContent")) => Api::GeminiStreamGenerateContent,
        Some((_, "generateContent")) => Api::GeminiGenerateContent,
        _ => {
            let err = ProxyError::InvalidJson(format!("unsupported gemini action in `{path}`"));
            return error_response(&err, &request_id());
        }
    };
    handle(state, pinned, api, path_and_query, headers, body).await
}

async fn handle(
    state: RouterState,
    pinned: Option<(String, ProviderSource)>,
    api: Api,
    path_and_query: String,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req_id = request_id();
    let body_doc: Option<Value> = serde_json::from_slice(&body).ok();
    let stream = detect_stream(api, body_doc.as_ref());

    let resolved = pinned
        .or_else(|| {
            headers
                .get(PROVIDER_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(|p| (p.to_string(), ProviderSource::Header))
        })
        .or_else(|| {
            let token = downstream_token(&headers)?;
            state
                .token_bindings
                .provider_for(&token)
                .map(|p| (p, ProviderSource::Token))
        })
        .or_else(|| {
            let model = body_doc
                .as_ref()
                .and_then(|doc| doc.get("model"))
                .and_then(Value::as_str)
                .map(str::to_owned)
                .or_else(|| {
                    parse_gemini_model_path(&path_and_query).map(|(m, _)| m.to_string())
                })?;
            state
                .model_router
                .next_provider(&model)
                .map(|p| (p, ProviderSource::Model))
        });
    let Some((provider, source)) = resolved else {
        return error_response(&ProxyError::ProviderNotSelected, &req_id);
    };

    let Some(key) = state.keystore.key_for(&provider) else {
        return error_response(&ProxyError::MissingUpstreamKey(provider), &req_id);
    };

    info!(
        event = "proxy_request",
        request_id = %req_id,
        provider = %provider,
        source = %source.as_str(),
        api = %api,
        stream = stream,
    );

    let call = ProxyCall {
        provider,
        key,
        api,
        stream,
        source: Some(source),
        request: ClientRequest {
            method: Method::POST,
            path_and_query,
            headers,
            body,
        },
    };

    match state.engine.proxy_json(call).await {
        Ok(EngineResponse::Json {
            status,
            headers,
            body,
        }) => {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            response
        }
        Ok(EngineResponse::Stream {
            status,
            headers,
            body,
        }) => {
            let mut response = Response::new(Body::from_stream(body));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            response
        }
        Err(err) => {
            warn!(event = "proxy_error", request_id = %req_id, error = %err);
            error_response(&err, &req_id)
        }
    }
}

/// Stream when the client asked for it, or when the Gemini action is the
/// streaming one.
fn detect_stream(api: Api, body: Option<&Value>) -> bool {
    if api == Api::GeminiStreamGenerateContent {
        return true;
    }
    body.and_then(|doc| doc.get("stream"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

fn error_response(err: &ProxyError, request_id: &str) -> Response {
    let envelope = ErrorEnvelope::new(err, Some(request_id));
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
    (status, axum::Json(envelope.to_json())).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stream_detection() {
        assert!(detect_stream(Api::GeminiStreamGenerateContent, None));
        assert!(!detect_stream(Api::GeminiGenerateContent, None));
        assert!(detect_stream(
            Api::ChatCompletions,
            Some(&json!({"stream": true}))
        ));
        assert!(!detect_stream(
            Api::ChatCompletions,
            Some(&json!({"stream": false}))
        ));
        assert!(!detect_stream(Api::ChatCompletions, Some(&json!({}))));
    }

    #[test]
    fn request_ids_are_prefixed_and_unique() {
        let a = request_id();
        let b = request_id();
        assert!(a.starts_with("req_"));
        assert_ne!(a, b);
    }
}
