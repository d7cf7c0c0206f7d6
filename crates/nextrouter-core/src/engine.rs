use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use http::header::{CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use nextrouter_common::{ProviderKey, ProviderSource, ProxyError, ProxyResult, UsageStage};
use nextrouter_dsl::{
    FinishPlan, HeaderOp, HeadersPlan, OAuthPlan, Registry, RequestPlan, ResponsePlan,
    RoutingPlan, UsagePlan,
};
use nextrouter_oauth::{AcquireInput, OAuthClient, cache_key, profile_for_mode};
use nextrouter_protocol::api::{Api, parse_gemini_model_path, rewrite_gemini_model_path};
use nextrouter_protocol::sse::SseParser;
use nextrouter_transform::{StreamCtx, map_request, map_response, make_sse_transform};

use crate::config::EngineConfig;
use crate::estimate::{
    EstimateProvider, chat_prompt_overhead, completion_text, estimate_tokens, prompt_text,
};
use crate::gzip::{gunzip, is_gzip};
use crate::meta::{Meta, ScopeVals};
use crate::pipeline::{PipelineSpec, SseMutator, StreamOutcome, run_pipeline};
use crate::sink::ResultSink;
use crate::transport::TransportManager;
use crate::usage::StreamStats;

/// The HTTP request context handed over by the front-end.
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub method: Method,
    /// Path plus query, e.g. `/v1beta/models/m:generateContent?alt=sse`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// One resolved proxy invocation.
#[derive(Debug, Clone)]
pub struct ProxyCall {
    pub provider: String,
    pub key: ProviderKey,
    pub api: Api,
    pub stream: bool,
    pub source: Option<ProviderSource>,
    pub request: ClientRequest,
}

pub enum EngineResponse {
    Json {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    Stream {
        status: StatusCode,
        headers: HeaderMap,
        body: BoxStream<'static, io::Result<Bytes>>,
    },
}

impl std::fmt::Debug for EngineResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineResponse::Json { status, headers, body } => f
                .debug_struct("Json")
                .field("status", status)
                .field("headers", headers)
                .field("body", body)
                .finish(),
            EngineResponse::Stream { status, headers, .. } => f
                .debug_struct("Stream")
                .field("status", status)
                .field("headers", headers)
                .finish(),
        }
    }
}

pub struct ProxyEngine {
    registry: Arc<Registry>,
    transports: TransportManager,
    oauth: Arc<OAuthClient>,
    config: EngineConfig,
    sink: Arc<dyn ResultSink>,
}

/// Narrowed plan facets for one request, captured up front so the stream
/// handler works from a consistent snapshot.
struct PlanFacets {
    routing: RoutingPlan,
    request: Option<RequestPlan>,
    headers: Option<HeadersPlan>,
    response: Option<ResponsePlan>,
    usage: Option<UsagePlan>,
    finish: Option<FinishPlan>,
}

impl ProxyEngine {
    pub fn new(
        registry: Arc<Registry>,
        config: EngineConfig,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self, ProxyError> {
        let transports = TransportManager::new(config.clone())?;
        let oauth_http = wreq::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|err| ProxyError::Transport(err.to_string()))?;
        let oauth = Arc::new(OAuthClient::new(oauth_http, config.oauth.clone()));
        Ok(Self {
            registry,
            transports,
            oauth,
            config,
            sink,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Execute one request end to end. Errors returned here never touched
    /// the upstream (or failed before any downstream byte was written);
    /// the caller maps them onto the wire.
    pub async fn proxy_json(&self, call: ProxyCall) -> Result<EngineResponse, ProxyError> {
        let ProxyCall {
            provider,
            key,
            api,
            stream,
            source,
            request,
        } = call;

        let plan = self
            .registry
            .get(&provider)
            .ok_or_else(|| ProxyError::ProviderNotFound(provider.clone()))?;
        if key.value.is_empty() {
            return Err(ProxyError::MissingUpstreamKey(provider.clone()));
        }

        // Peek the client body (bounded), keeping the raw bytes for
        // re-emit when no rewrite applies.
        if request.body.len() > self.config.body_peek_limit {
            return Err(ProxyError::InvalidJson(format!(
                "request body exceeds {} bytes",
                self.config.body_peek_limit
            )));
        }
        let mut body_doc: Option<Value> = if request.body.is_empty() {
            None
        } else {
            Some(
                serde_json::from_slice(&request.body)
                    .map_err(|err| ProxyError::InvalidJson(err.to_string()))?,
            )
        };

        let mut meta = Meta::new(api, stream);
        meta.api_key = key.value.clone();
        meta.request_url_path = request.path_and_query.clone();
        meta.actual_model_name = body_doc
            .as_ref()
            .and_then(|doc| doc.get("model"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| {
                parse_gemini_model_path(&request.path_and_query)
                    .map(|(model, _)| model.to_string())
            })
            .unwrap_or_default();

        // Prompt side of the estimator, taken from the client dialect
        // before any rewrite.
        let (prompt, message_count) = body_doc
            .as_ref()
            .map(|doc| prompt_text(api, doc))
            .unwrap_or_default();

        let facets = PlanFacets {
            routing: {
                let selected = plan
                    .routing
                    .select(api, stream)
                    .filter(|s| s.arm_matched)
                    .ok_or(ProxyError::DslNoMatch {
                        api: api.as_str().to_string(),
                        stream,
                    })?;
                selected.body
            },
            request: plan.request.select(api, stream).map(|s| s.body),
            headers: plan.headers.select(api, stream).map(|s| s.body),
            response: plan.response.select(api, stream).map(|s| s.body),
            usage: plan.usage.select(api, stream).map(|s| s.body),
            finish: plan.finish.select(api, stream).map(|s| s.body),
        };

        // Model mapping resolves before routing evaluation so `set_path`
        // expressions can reference the mapped model.
        if let Some(request_plan) = &facets.request {
            let mapped = {
                let scope = meta.scope();
                request_plan.mapped_model(&meta.actual_model_name, &scope)
            };
            meta.dsl_model_mapped = mapped;
        }

        self.apply_routing(&mut meta, &facets.routing, &key)?;

        // Request transform: model overwrite, JSON ops, body-level codec.
        let mut out_body = request.body.clone();
        if let Some(request_plan) = &facets.request {
            let mut dirty = false;
            if let Some(doc) = body_doc.as_mut() {
                if !meta.dsl_model_mapped.is_empty()
                    && doc.get("model").is_some()
                    && let Some(obj) = doc.as_object_mut()
                {
                    obj.insert(
                        "model".to_string(),
                        Value::String(meta.dsl_model_mapped.clone()),
                    );
                    dirty = true;
                }
                if !request_plan.json_ops.is_empty() {
                    let scope = meta.scope();
                    for op in &request_plan.json_ops {
                        op.apply(doc, &scope);
                    }
                    dirty = true;
                }
            }
            if let Some(mode) = request_plan.req_map {
                let encoding = header_str(&request.headers, CONTENT_ENCODING);
                if !matches!(encoding.as_deref(), None | Some("") | Some("identity")) {
                    return Err(ProxyError::EncodedRequestBody(
                        encoding.unwrap_or_default(),
                    ));
                }
                if let Some(doc) = &body_doc {
                    let ctx = StreamCtx {
                        model: meta.reported_model(),
                        stream,
                    };
                    let mapped = map_request(mode, doc, ctx);
                    out_body = Bytes::from(
                        serde_json::to_vec(&mapped)
                            .map_err(|err| ProxyError::InvalidJson(err.to_string()))?,
                    );
                    body_doc = Some(mapped);
                    dirty = false;
                }
            }
            if dirty && let Some(doc) = &body_doc {
                out_body = Bytes::from(
                    serde_json::to_vec(doc)
                        .map_err(|err| ProxyError::InvalidJson(err.to_string()))?,
                );
            }
        }

        // Gemini native requests route the model through the URL.
        if api.is_gemini()
            && !meta.dsl_model_mapped.is_empty()
            && let Some(rewritten) =
                rewrite_gemini_model_path(&meta.request_url_path, &meta.dsl_model_mapped)
        {
            meta.request_url_path = rewritten;
        }

        // Header plan, OAuth first so auth expressions see the token.
        let mut out_headers = forwardable_headers(&request.headers);
        if let Some(headers_plan) = &facets.headers {
            if let Some(oauth_plan) = &headers_plan.oauth
                && oauth_plan.mode.is_some()
            {
                self.acquire_oauth(&provider, oauth_plan, &mut meta).await?;
            }
            let scope_meta = meta.clone();
            let scope = scope_meta.scope();
            apply_header_ops(&mut out_headers, &headers_plan.auth_ops, &scope);
            apply_header_ops(&mut out_headers, &headers_plan.request_ops, &scope);
        }
        out_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Dispatch.
        let client = self.transports.client_for_provider(&provider)?;
        let url = format!("{}{}", meta.base_url, meta.request_url_path);
        debug!(
            event = "upstream_request",
            provider = %provider,
            api = %api,
            stream = stream,
            url = %url,
            model = %meta.reported_model(),
        );
        let mut builder = client.request(wreq_method(&request.method), url.as_str());
        for (name, value) in out_headers.iter() {
            if let Ok(value) = value.to_str() {
                builder = builder.header(name.as_str(), value);
            }
        }
        if !stream {
            builder = builder.timeout(self.config.write_timeout);
        }
        let response = builder
            .body(out_body.to_vec())
            .send()
            .await
            .map_err(|err| ProxyError::Transport(err.to_string()))?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let upstream_headers = convert_headers(response.headers());

        // Upstream 401 on an OAuth-authenticated request drops the cached
        // token; the 401 itself is surfaced, never retried here.
        if status == StatusCode::UNAUTHORIZED && !meta.oauth_cache_key.is_empty() {
            self.oauth.invalidate(&meta.oauth_cache_key);
        }

        let effective_stream = stream
            || header_str(&upstream_headers, CONTENT_TYPE)
                .map(|ct| ct.to_ascii_lowercase().contains("text/event-stream"))
                .unwrap_or(false);

        let ctx = FinalizeCtx {
            provider,
            key_name: key.name.clone(),
            source,
            estimate_provider: EstimateProvider::from_usage_mode(
                facets.usage.as_ref().and_then(|u| u.mode),
            ),
            meta,
            prompt,
            message_count,
        };
        if effective_stream {
            Ok(self.handle_stream(response, status, upstream_headers, facets, ctx))
        } else {
            self.handle_buffered(response, status, upstream_headers, facets, ctx)
                .await
        }
    }

    fn apply_routing(
        &self,
        meta: &mut Meta,
        routing: &RoutingPlan,
        key: &ProviderKey,
    ) -> Result<(), ProxyError> {
        // Credential override wins; the DSL default fills the rest.
        let override_url = key
            .base_url_override
            .clone()
            .unwrap_or_default();
        meta.base_url = if override_url.is_empty() {
            let scope = nextrouter_dsl::ExprScope {
                channel_key: &meta.api_key,
                channel_base_url: "",
                request_model: &meta.actual_model_name,
                request_model_mapped: meta.reported_model(),
                oauth_access_token: "",
            };
            routing
                .base_url
                .as_ref()
                .map(|expr| expr.eval(&scope))
                .unwrap_or_default()
        } else {
            override_url
        };
        if meta.base_url.is_empty() {
            return Err(ProxyError::DslNoMatch {
                api: meta.api.as_str().to_string(),
                stream: meta.is_stream,
            });
        }
        meta.base_url = meta.base_url.trim_end_matches('/').to_string();

        let scope_meta = meta.clone();
        let scope = scope_meta.scope();
        if let Some(expr) = &routing.set_path {
            meta.request_url_path = expr.eval(&scope);
        }
        if !routing.set_query.is_empty() || !routing.del_query.is_empty() {
            let (path, query) = split_path_query(&meta.request_url_path);
            let mut pairs: Vec<(String, String)> =
                serde_urlencoded::from_str(query).unwrap_or_default();
            for (name, expr) in &routing.set_query {
                let value = expr.eval(&scope);
                pairs.retain(|(k, _)| k != name);
                pairs.push((name.clone(), value));
            }
            for name in &routing.del_query {
                pairs.retain(|(k, _)| k != name);
            }
            meta.request_url_path = if pairs.is_empty() {
                path.to_string()
            } else {
                let encoded = serde_urlencoded::to_string(&pairs)
                    .unwrap_or_default();
                format!("{path}?{encoded}")
            };
        }
        Ok(())
    }

    async fn acquire_oauth(
        &self,
        provider: &str,
        oauth_plan: &OAuthPlan,
        meta: &mut Meta,
    ) -> Result<(), ProxyError> {
        let mode = oauth_plan.mode.expect("caller checked mode");
        let profile = profile_for_mode(mode);

        let scope_meta = meta.clone();
        let scope = scope_meta.scope();

        let token_url = oauth_plan
            .token_url
            .as_ref()
            .map(|expr| expr.eval(&scope))
            .unwrap_or_else(|| profile.token_url.to_string());

        let mut form = Vec::new();
        for (name, raw) in profile.form {
            let value = match nextrouter_dsl::expr::parse(raw) {
                Ok(expr) => expr.eval(&scope),
                Err(_) => (*raw).to_string(),
            };
            form.push((name.to_string(), value));
        }
        for (name, expr) in &oauth_plan.form {
            form.push((name.clone(), expr.eval(&scope)));
        }

        let identity = oauth_plan.identity.clone().unwrap_or_default();
        let key = cache_key(provider, &identity, &meta.api_key);
        let input = AcquireInput {
            cache_key: key.clone(),
            token_url,
            form,
            basic_auth: oauth_plan
                .basic_auth
                .as_ref()
                .map(|(user, pass)| (user.eval(&scope), pass.eval(&scope))),
            token_path: oauth_plan.token_path.clone(),
            expires_in_path: oauth_plan.expires_in_path.clone(),
            token_type_path: oauth_plan.token_type_path.clone(),
        };

        let token = self
            .oauth
            .get_token(&input)
            .await
            .map_err(|err| ProxyError::OAuth(err.to_string()))?;
        meta.oauth_cache_key = key;
        meta.oauth_access_token = token.access_token;
        Ok(())
    }

    async fn handle_buffered(
        &self,
        response: wreq::Response,
        status: StatusCode,
        upstream_headers: HeaderMap,
        facets: PlanFacets,
        ctx: FinalizeCtx,
    ) -> Result<EngineResponse, ProxyError> {
        let raw = response
            .bytes()
            .await
            .map_err(|err| ProxyError::Transport(err.to_string()))?;

        let gzipped = is_gzip(header_str(&upstream_headers, CONTENT_ENCODING).as_deref());
        let mut body: Vec<u8> = raw.to_vec();
        let mut transformed = false;
        let mut doc: Option<Value> = None;

        let resp_map_mode = facets.response.as_ref().and_then(ResponsePlan::resp_map);
        if let Some(mode) = resp_map_mode
            && status.is_success()
        {
            let decoded = if gzipped {
                match gunzip(&body) {
                    Ok(plain) => {
                        transformed = true;
                        plain
                    }
                    Err(err) => {
                        warn!(event = "resp_gunzip_failed", error = %err);
                        body.clone()
                    }
                }
            } else {
                body.clone()
            };
            match serde_json::from_slice::<Value>(&decoded) {
                Ok(parsed) => {
                    let mapped = map_response(mode, &parsed);
                    body = serde_json::to_vec(&mapped)
                        .map_err(|err| ProxyError::Transport(err.to_string()))?;
                    doc = Some(mapped);
                    transformed = true;
                }
                Err(_) => {
                    // Non-JSON upstream reply passes through untouched.
                    transformed = gzipped && transformed;
                    if transformed {
                        body = decoded;
                    }
                }
            }
        }

        // Metrics read the mapped body before response json_ops run.
        let metric_doc: Option<Value> = match &doc {
            Some(mapped) => Some(mapped.clone()),
            None => {
                let plain = if gzipped {
                    gunzip(&body).unwrap_or_default()
                } else {
                    body.clone()
                };
                serde_json::from_slice(&plain).ok()
            }
        };
        let mut stats = StreamStats::new(facets.usage.clone(), facets.finish.clone());
        if status.is_success()
            && let Some(md) = &metric_doc
        {
            stats.on_document(md);
        }
        let completion = metric_doc
            .as_ref()
            .map(completion_text)
            .unwrap_or_default();

        // Response json_ops apply post-mapping; non-object bodies pass
        // through silently.
        if let Some(response_plan) = &facets.response
            && !response_plan.json_ops.is_empty()
            && status.is_success()
        {
            if doc.is_none() {
                let plain = if gzipped {
                    gunzip(&body).unwrap_or_default()
                } else {
                    body.clone()
                };
                if let Ok(parsed) = serde_json::from_slice::<Value>(&plain)
                    && parsed.is_object()
                {
                    transformed = transformed || gzipped;
                    doc = Some(parsed);
                }
            }
            if let Some(target) = doc.as_mut()
                && target.is_object()
            {
                let scope_meta = ctx.meta.clone();
                let scope = scope_meta.scope();
                for op in &response_plan.json_ops {
                    op.apply(target, &scope);
                }
                body = serde_json::to_vec(target)
                    .map_err(|err| ProxyError::Transport(err.to_string()))?;
                transformed = true;
            }
        }

        let mut headers = HeaderMap::new();
        for (name, value) in upstream_headers.iter() {
            if name == CONTENT_LENGTH || (transformed && name == CONTENT_ENCODING) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        if resp_map_mode.is_some() && status.is_success() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let result = self.finalize(&ctx, status, stats, completion, false);
        self.sink.record(result);

        Ok(EngineResponse::Json {
            status,
            headers,
            body: Bytes::from(body),
        })
    }

    fn handle_stream(
        &self,
        response: wreq::Response,
        status: StatusCode,
        upstream_headers: HeaderMap,
        facets: PlanFacets,
        ctx: FinalizeCtx,
    ) -> EngineResponse {
        let sse_parse_mode = facets.response.as_ref().and_then(ResponsePlan::sse_parse);
        let has_sse_ops = facets
            .response
            .as_ref()
            .is_some_and(|p| !p.json_ops.is_empty() || !p.sse_del_if.is_empty());
        let gzipped = is_gzip(header_str(&upstream_headers, CONTENT_ENCODING).as_deref());
        let gunzip_active = gzipped && (sse_parse_mode.is_some() || has_sse_ops);

        let mut headers = HeaderMap::new();
        for (name, value) in upstream_headers.iter() {
            if name == CONTENT_LENGTH || (gunzip_active && name == CONTENT_ENCODING) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        let transform = sse_parse_mode.map(|mode| {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            make_sse_transform(mode, ctx.meta.reported_model())
        });
        let mutator = has_sse_ops.then(|| {
            let response_plan = facets.response.as_ref().expect("checked above");
            SseMutator {
                del_if: response_plan.sse_del_if.clone(),
                ops: response_plan.json_ops.clone(),
                scope: ScopeVals::from_meta(&ctx.meta),
            }
        });

        let upstream = response
            .bytes_stream()
            .map(|item| item.map_err(|err| io::Error::other(err.to_string())))
            .boxed();
        let (body, outcome_rx) = run_pipeline(
            upstream,
            PipelineSpec {
                gunzip: gunzip_active,
                transform,
                mutator,
                tail_cap: self.config.tail_buffer_bytes,
            },
        );

        // Metrics finalize only after the copy loop terminates.
        let usage_plan = facets.usage.clone();
        let finish_plan = facets.finish.clone();
        let sink = self.sink.clone();
        let engine_self = EngineFinalizer {
            estimate_usage: self.config.estimate_usage,
        };
        tokio::spawn(async move {
            let outcome = outcome_rx.await.unwrap_or(StreamOutcome {
                tail: Vec::new(),
                client_disconnect: false,
            });
            let mut stats = StreamStats::new(usage_plan, finish_plan);
            let mut completion = String::new();
            let mut parser = SseParser::new();
            let mut events = parser.push_bytes(&outcome.tail);
            events.extend(parser.finish());
            for event in events {
                stats.on_sse_data_json(&event.data);
                if let Ok(doc) = serde_json::from_str::<Value>(&event.data) {
                    completion.push_str(&completion_text(&doc));
                }
            }
            let result = engine_self.finalize(&ctx, status, stats, completion, outcome.client_disconnect);
            sink.record(result);
        });

        EngineResponse::Stream {
            status,
            headers,
            body,
        }
    }

    fn finalize(
        &self,
        ctx: &FinalizeCtx,
        status: StatusCode,
        stats: StreamStats,
        completion: String,
        client_disconnect: bool,
    ) -> ProxyResult {
        EngineFinalizer {
            estimate_usage: self.config.estimate_usage,
        }
        .finalize(ctx, status, stats, completion, client_disconnect)
    }
}

/// Context carried into result finalization (shared by the buffered path
/// and the spawned stream finalizer).
struct FinalizeCtx {
    provider: String,
    key_name: String,
    source: Option<ProviderSource>,
    estimate_provider: EstimateProvider,
    meta: Meta,
    prompt: String,
    message_count: usize,
}

struct EngineFinalizer {
    estimate_usage: bool,
}

impl EngineFinalizer {
    fn finalize(
        &self,
        ctx: &FinalizeCtx,
        status: StatusCode,
        stats: StreamStats,
        completion: String,
        client_disconnect: bool,
    ) -> ProxyResult {
        let (mut usage, finish_reason, _saw) = stats.result();
        let mut stage = if usage.is_zero() {
            UsageStage::Unknown
        } else {
            UsageStage::Upstream
        };

        // Estimation only fills gaps, only on success, only when enabled.
        if self.estimate_usage && status == StatusCode::OK {
            let provider = ctx.estimate_provider;
            let missing_input = usage.input_tokens == 0;
            let missing_output = usage.output_tokens == 0;
            if missing_input {
                let mut estimate = estimate_tokens(provider, &ctx.prompt);
                if ctx.meta.api == Api::ChatCompletions {
                    estimate += chat_prompt_overhead(ctx.message_count);
                }
                usage.input_tokens = estimate;
            }
            if missing_output {
                usage.output_tokens = estimate_tokens(provider, &completion);
            }
            stage = match (missing_input, missing_output) {
                (true, true) => UsageStage::EstimateBoth,
                (true, false) => UsageStage::EstimatePrompt,
                (false, true) => UsageStage::EstimateCompletion,
                (false, false) => stage,
            };
            usage = usage.normalized();
        }

        ProxyResult {
            provider: ctx.provider.clone(),
            provider_key_name: ctx.key_name.clone(),
            provider_source: ctx.source,
            api: ctx.meta.api.as_str().to_string(),
            stream: ctx.meta.is_stream,
            model: ctx.meta.reported_model().to_string(),
            status: status.as_u16(),
            latency_ms: ctx.meta.start_time.elapsed().as_millis() as u64,
            usage,
            usage_stage: stage,
            finish_reason,
            client_disconnect,
        }
    }
}

// ---------------------------------------------------------------------------
// Header plumbing

/// Client headers safe to forward upstream: everything except transport
/// framing and the downstream credential.
fn forwardable_headers(client: &HeaderMap) -> HeaderMap {
    const DROP: &[&str] = &[
        "host",
        "content-length",
        "connection",
        "authorization",
        "x-api-key",
        "x-goog-api-key",
        "accept-encoding",
    ];
    let mut out = HeaderMap::new();
    for (name, value) in client.iter() {
        if DROP.contains(&name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn apply_header_ops(headers: &mut HeaderMap, ops: &[HeaderOp], scope: &nextrouter_dsl::ExprScope) {
    for op in ops {
        match op {
            HeaderOp::Set { name, value } => {
                let evaluated = value.eval(scope);
                if let (Ok(name), Ok(value)) = (
                    HeaderName::try_from(name.as_str()),
                    HeaderValue::from_str(&evaluated),
                ) {
                    headers.insert(name, value);
                }
            }
            HeaderOp::Del { name } => {
                if let Ok(name) = HeaderName::try_from(name.as_str()) {
                    headers.remove(name);
                }
            }
        }
    }
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(&name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn convert_headers(upstream: &wreq::header::HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in upstream.iter() {
        if let Ok(value_str) = value.to_str()
            && let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_str(value_str),
            )
        {
            out.append(name, value);
        }
    }
    out
}

fn wreq_method(method: &Method) -> wreq::Method {
    match *method {
        Method::GET => wreq::Method::GET,
        Method::PUT => wreq::Method::PUT,
        Method::PATCH => wreq::Method::PATCH,
        Method::DELETE => wreq::Method::DELETE,
        _ => wreq::Method::POST,
    }
}

fn split_path_query(path_and_query: &str) -> (&str, &str) {
    match path_and_query.split_once('?') {
        Some((path, query)) => (path, query),
        None => (path_and_query, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_query_split() {
        assert_eq!(split_path_query("/v1/x?a=1"), ("/v1/x", "a=1"));
        assert_eq!(split_path_query("/v1/x"), ("/v1/x", ""));
    }

    #[test]
    fn forwardable_headers_drop_credentials() {
        let mut client = HeaderMap::new();
        client.insert("authorization", HeaderValue::from_static("Bearer down"));
        client.insert("x-api-key", HeaderValue::from_static("down"));
        client.insert("x-custom", HeaderValue::from_static("keep"));
        client.insert("accept-encoding", HeaderValue::from_static("gzip"));
        let out = forwardable_headers(&client);
        assert!(out.get("authorization").is_none());
        assert!(out.get("x-api-key").is_none());
        assert!(out.get("accept-encoding").is_none());
        assert_eq!(out.get("x-custom").unwrap(), "keep");
    }

    #[test]
    fn header_ops_apply_in_order() {
        let mut headers = HeaderMap::new();
        headers.insert("x-old", HeaderValue::from_static("1"));
        let ops = vec![
            HeaderOp::Set {
                name: "Authorization".to_string(),
                value: nextrouter_dsl::expr::parse(r#"concat("Bearer ", $channel.key)"#).unwrap(),
            },
            HeaderOp::Del {
                name: "x-old".to_string(),
            },
        ];
        let scope = nextrouter_dsl::ExprScope {
            channel_key: "sk-up",
            ..Default::default()
        };
        apply_header_ops(&mut headers, &ops, &scope);
        assert_eq!(headers.get("authorization").unwrap(), "Bearer sk-up");
        assert!(headers.get("x-old").is_none());
    }
}
