//! Typed provider plan: the immutable result of parsing one `provider`
//! block, organized as `{defaults, matches[]}` sub-plans narrowed by
//! `(api, stream)`.

use nextrouter_protocol::api::Api;
use serde_json::Value;

use crate::expr::Expr;
use crate::path::{JsonOp, JsonPath};
use crate::usage_expr::UsageExpr;

/// Codec mode allowlists are owned by the transform crate (the closed
/// codec set); the DSL re-exports them as its validator vocabulary.
pub use nextrouter_transform::{ReqMapMode, RespMapMode, SseParseMode};

// ---------------------------------------------------------------------------
// Enumerations (validator allowlists)

macro_rules! dsl_enum {
    ($name:ident, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            pub fn allowed() -> String {
                [$($text),+].join(" | ")
            }
        }
    };
}

dsl_enum!(UsageMode, {
    OpenAI => "openai",
    Anthropic => "anthropic",
    Gemini => "gemini",
    Custom => "custom",
});

dsl_enum!(FinishMode, {
    OpenAI => "openai",
    Anthropic => "anthropic",
    Gemini => "gemini",
    Custom => "custom",
});

dsl_enum!(OAuthMode, {
    OpenAI => "openai",
    Claude => "claude",
    Gemini => "gemini",
    Antigravity => "antigravity",
    IFlow => "iflow",
    Qwen => "qwen",
    Kimi => "kimi",
    Custom => "custom",
});

dsl_enum!(BalanceMode, {
    Custom => "custom",
});

dsl_enum!(BalanceUnit, {
    Usd => "USD",
    Cny => "CNY",
});

// ---------------------------------------------------------------------------
// Sub-plan composition

/// Shallow merge: scalars override when the override side is set, lists
/// append. `Defaults` are never mutated by selection.
pub trait Merge: Clone {
    fn merge_from(&mut self, other: &Self);
    fn is_empty(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchFilter {
    pub api: Option<Api>,
    pub stream: Option<bool>,
}

impl MatchFilter {
    pub fn matches(&self, api: Api, stream: bool) -> bool {
        self.api.is_none_or(|want| want == api) && self.stream.is_none_or(|want| want == stream)
    }
}

#[derive(Debug, Clone)]
pub struct MatchArm<T> {
    pub filter: MatchFilter,
    pub body: T,
}

#[derive(Debug, Clone)]
pub struct SubPlan<T> {
    pub defaults: T,
    pub matches: Vec<MatchArm<T>>,
}

impl<T: Merge + Default> Default for SubPlan<T> {
    fn default() -> Self {
        Self {
            defaults: T::default(),
            matches: Vec::new(),
        }
    }
}

/// Outcome of narrowing a sub-plan by `(api, stream)`.
#[derive(Debug, Clone)]
pub struct Selected<T> {
    pub body: T,
    /// Whether an explicit `match` arm applied (as opposed to defaults
    /// alone). Routing uses this to reject unknown `(api, stream)` pairs.
    pub arm_matched: bool,
}

impl<T: Merge> SubPlan<T> {
    /// First arm whose filter accepts `(api, stream)` merged over the
    /// defaults. `None` when the merged body has no operative content.
    pub fn select(&self, api: Api, stream: bool) -> Option<Selected<T>> {
        let arm = self
            .matches
            .iter()
            .find(|arm| arm.filter.matches(api, stream));
        let mut body = self.defaults.clone();
        if let Some(arm) = arm {
            body.merge_from(&arm.body);
        }
        if body.is_empty() {
            return None;
        }
        Some(Selected {
            body,
            arm_matched: arm.is_some(),
        })
    }
}

// ---------------------------------------------------------------------------
// Sub-plan bodies

#[derive(Debug, Clone, Default)]
pub struct RoutingPlan {
    pub base_url: Option<Expr>,
    pub set_path: Option<Expr>,
    pub set_query: Vec<(String, Expr)>,
    pub del_query: Vec<String>,
}

impl Merge for RoutingPlan {
    fn merge_from(&mut self, other: &Self) {
        if other.base_url.is_some() {
            self.base_url = other.base_url.clone();
        }
        if other.set_path.is_some() {
            self.set_path = other.set_path.clone();
        }
        self.set_query.extend(other.set_query.iter().cloned());
        self.del_query.extend(other.del_query.iter().cloned());
    }

    fn is_empty(&self) -> bool {
        self.base_url.is_none()
            && self.set_path.is_none()
            && self.set_query.is_empty()
            && self.del_query.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestPlan {
    pub model_map: Vec<(String, Expr)>,
    pub model_map_default: Option<Expr>,
    pub json_ops: Vec<JsonOp>,
    pub req_map: Option<ReqMapMode>,
}

impl RequestPlan {
    /// `model_map` resolution: explicit rule first, then the default
    /// expression, else empty.
    pub fn mapped_model(&self, actual: &str, scope: &crate::expr::ExprScope<'_>) -> String {
        for (from, to) in &self.model_map {
            if from == actual {
                return to.eval(scope);
            }
        }
        self.model_map_default
            .as_ref()
            .map(|expr| expr.eval(scope))
            .unwrap_or_default()
    }
}

impl Merge for RequestPlan {
    fn merge_from(&mut self, other: &Self) {
        self.model_map.extend(other.model_map.iter().cloned());
        if other.model_map_default.is_some() {
            self.model_map_default = other.model_map_default.clone();
        }
        self.json_ops.extend(other.json_ops.iter().cloned());
        if other.req_map.is_some() {
            self.req_map = other.req_map;
        }
    }

    fn is_empty(&self) -> bool {
        self.model_map.is_empty()
            && self.model_map_default.is_none()
            && self.json_ops.is_empty()
            && self.req_map.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeaderOp {
    Set { name: String, value: Expr },
    Del { name: String },
}

#[derive(Debug, Clone, Default)]
pub struct OAuthPlan {
    pub mode: Option<OAuthMode>,
    pub token_url: Option<Expr>,
    pub form: Vec<(String, Expr)>,
    pub token_path: Option<JsonPath>,
    pub expires_in_path: Option<JsonPath>,
    pub token_type_path: Option<JsonPath>,
    pub identity: Option<String>,
    pub basic_auth: Option<(Expr, Expr)>,
}

impl OAuthPlan {
    pub fn is_empty(&self) -> bool {
        self.mode.is_none()
            && self.token_url.is_none()
            && self.form.is_empty()
            && self.token_path.is_none()
            && self.expires_in_path.is_none()
            && self.token_type_path.is_none()
            && self.identity.is_none()
            && self.basic_auth.is_none()
    }

    fn merge_from(&mut self, other: &Self) {
        if other.mode.is_some() {
            self.mode = other.mode;
        }
        if other.token_url.is_some() {
            self.token_url = other.token_url.clone();
        }
        self.form.extend(other.form.iter().cloned());
        if other.token_path.is_some() {
            self.token_path = other.token_path.clone();
        }
        if other.expires_in_path.is_some() {
            self.expires_in_path = other.expires_in_path.clone();
        }
        if other.token_type_path.is_some() {
            self.token_type_path = other.token_type_path.clone();
        }
        if other.identity.is_some() {
            self.identity = other.identity.clone();
        }
        if other.basic_auth.is_some() {
            self.basic_auth = other.basic_auth.clone();
        }
    }
}

/// Auth ops run before request ops; both are ordered.
#[derive(Debug, Clone, Default)]
pub struct HeadersPlan {
    pub auth_ops: Vec<HeaderOp>,
    pub request_ops: Vec<HeaderOp>,
    pub oauth: Option<OAuthPlan>,
}

impl Merge for HeadersPlan {
    fn merge_from(&mut self, other: &Self) {
        self.auth_ops.extend(other.auth_ops.iter().cloned());
        self.request_ops.extend(other.request_ops.iter().cloned());
        match (&mut self.oauth, &other.oauth) {
            (Some(base), Some(over)) => base.merge_from(over),
            (None, Some(over)) => self.oauth = Some(over.clone()),
            _ => {}
        }
    }

    fn is_empty(&self) -> bool {
        self.auth_ops.is_empty() && self.request_ops.is_empty() && self.oauth.is_none()
    }
}

/// `resp_passthrough | resp_map <mode> | sse_parse <mode>` — one of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespDirective {
    Passthrough,
    Map(RespMapMode),
    SseParse(SseParseMode),
}

/// `sse_json_del_if <cond-path> == <literal> <del-path>`.
#[derive(Debug, Clone, PartialEq)]
pub struct SseDelIf {
    pub cond_path: JsonPath,
    pub equals: Value,
    pub del_path: JsonPath,
}

#[derive(Debug, Clone, Default)]
pub struct ResponsePlan {
    pub directive: Option<RespDirective>,
    pub json_ops: Vec<JsonOp>,
    pub sse_del_if: Vec<SseDelIf>,
}

impl ResponsePlan {
    pub fn resp_map(&self) -> Option<RespMapMode> {
        match self.directive {
            Some(RespDirective::Map(mode)) => Some(mode),
            _ => None,
        }
    }

    pub fn sse_parse(&self) -> Option<SseParseMode> {
        match self.directive {
            Some(RespDirective::SseParse(mode)) => Some(mode),
            _ => None,
        }
    }
}

impl Merge for ResponsePlan {
    fn merge_from(&mut self, other: &Self) {
        if other.directive.is_some() {
            self.directive = other.directive;
        }
        self.json_ops.extend(other.json_ops.iter().cloned());
        self.sse_del_if.extend(other.sse_del_if.iter().cloned());
    }

    fn is_empty(&self) -> bool {
        self.directive.is_none() && self.json_ops.is_empty() && self.sse_del_if.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UsagePlan {
    pub mode: Option<UsageMode>,
    pub input_expr: Option<UsageExpr>,
    pub output_expr: Option<UsageExpr>,
    pub total_expr: Option<UsageExpr>,
    pub input_path: Option<JsonPath>,
    pub output_path: Option<JsonPath>,
    pub total_path: Option<JsonPath>,
    pub cached_path: Option<JsonPath>,
    pub cache_write_path: Option<JsonPath>,
}

impl Merge for UsagePlan {
    fn merge_from(&mut self, other: &Self) {
        if other.mode.is_some() {
            self.mode = other.mode;
        }
        if other.input_expr.is_some() {
            self.input_expr = other.input_expr.clone();
        }
        if other.output_expr.is_some() {
            self.output_expr = other.output_expr.clone();
        }
        if other.total_expr.is_some() {
            self.total_expr = other.total_expr.clone();
        }
        if other.input_path.is_some() {
            self.input_path = other.input_path.clone();
        }
        if other.output_path.is_some() {
            self.output_path = other.output_path.clone();
        }
        if other.total_path.is_some() {
            self.total_path = other.total_path.clone();
        }
        if other.cached_path.is_some() {
            self.cached_path = other.cached_path.clone();
        }
        if other.cache_write_path.is_some() {
            self.cache_write_path = other.cache_write_path.clone();
        }
    }

    fn is_empty(&self) -> bool {
        self.mode.is_none()
            && self.input_expr.is_none()
            && self.output_expr.is_none()
            && self.total_expr.is_none()
            && self.input_path.is_none()
            && self.output_path.is_none()
            && self.total_path.is_none()
            && self.cached_path.is_none()
            && self.cache_write_path.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FinishPlan {
    pub mode: Option<FinishMode>,
    pub path: Option<JsonPath>,
}

impl Merge for FinishPlan {
    fn merge_from(&mut self, other: &Self) {
        if other.mode.is_some() {
            self.mode = other.mode;
        }
        if other.path.is_some() {
            self.path = other.path.clone();
        }
    }

    fn is_empty(&self) -> bool {
        self.mode.is_none() && self.path.is_none()
    }
}

/// Admin-facet balance probe. Parsed and validated; the request engine
/// never executes it.
#[derive(Debug, Clone, Default)]
pub struct BalancePlan {
    pub mode: Option<BalanceMode>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub balance_expr: Option<UsageExpr>,
    pub used_path: Option<JsonPath>,
    pub unit: Option<BalanceUnit>,
    pub header_ops: Vec<HeaderOp>,
}

impl Merge for BalancePlan {
    fn merge_from(&mut self, other: &Self) {
        if other.mode.is_some() {
            self.mode = other.mode;
        }
        if other.method.is_some() {
            self.method = other.method.clone();
        }
        if other.path.is_some() {
            self.path = other.path.clone();
        }
        if other.balance_expr.is_some() {
            self.balance_expr = other.balance_expr.clone();
        }
        if other.used_path.is_some() {
            self.used_path = other.used_path.clone();
        }
        if other.unit.is_some() {
            self.unit = other.unit;
        }
        self.header_ops.extend(other.header_ops.iter().cloned());
    }

    fn is_empty(&self) -> bool {
        self.mode.is_none()
            && self.method.is_none()
            && self.path.is_none()
            && self.balance_expr.is_none()
            && self.used_path.is_none()
            && self.unit.is_none()
            && self.header_ops.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Provider plan

#[derive(Debug, Clone, Default)]
pub struct ProviderPlan {
    pub name: String,
    pub routing: SubPlan<RoutingPlan>,
    pub request: SubPlan<RequestPlan>,
    pub headers: SubPlan<HeadersPlan>,
    pub response: SubPlan<ResponsePlan>,
    pub usage: SubPlan<UsagePlan>,
    pub finish: SubPlan<FinishPlan>,
    pub balance: SubPlan<BalancePlan>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arm<T>(api: Option<Api>, stream: Option<bool>, body: T) -> MatchArm<T> {
        MatchArm {
            filter: MatchFilter { api, stream },
            body,
        }
    }

    #[test]
    fn select_prefers_first_matching_arm() {
        let plan = SubPlan {
            defaults: RoutingPlan {
                base_url: Some(Expr::literal("https://default")),
                ..RoutingPlan::default()
            },
            matches: vec![
                arm(
                    Some(Api::ChatCompletions),
                    Some(true),
                    RoutingPlan {
                        set_path: Some(Expr::literal("/stream")),
                        ..RoutingPlan::default()
                    },
                ),
                arm(
                    Some(Api::ChatCompletions),
                    None,
                    RoutingPlan {
                        set_path: Some(Expr::literal("/any")),
                        ..RoutingPlan::default()
                    },
                ),
            ],
        };

        let selected = plan.select(Api::ChatCompletions, true).unwrap();
        assert!(selected.arm_matched);
        assert_eq!(
            selected.body.set_path,
            Some(Expr::literal("/stream")),
            "first arm in file order wins"
        );
        // Defaults survive the merge.
        assert_eq!(selected.body.base_url, Some(Expr::literal("https://default")));

        let fallback = plan.select(Api::ChatCompletions, false).unwrap();
        assert_eq!(fallback.body.set_path, Some(Expr::literal("/any")));
    }

    #[test]
    fn select_without_arm_reports_unmatched() {
        let plan = SubPlan {
            defaults: RoutingPlan {
                base_url: Some(Expr::literal("https://default")),
                ..RoutingPlan::default()
            },
            matches: vec![arm(Some(Api::ClaudeMessages), None, RoutingPlan::default())],
        };
        let selected = plan.select(Api::Responses, false).unwrap();
        assert!(!selected.arm_matched);
    }

    #[test]
    fn select_empty_merge_is_none() {
        let plan: SubPlan<ResponsePlan> = SubPlan::default();
        assert!(plan.select(Api::ChatCompletions, false).is_none());
    }

    #[test]
    fn merge_appends_lists() {
        let mut base = RequestPlan {
            model_map: vec![("a".into(), Expr::literal("x"))],
            ..RequestPlan::default()
        };
        base.merge_from(&RequestPlan {
            model_map: vec![("b".into(), Expr::literal("y"))],
            req_map: Some(ReqMapMode::AnthropicToOpenAIChat),
            ..RequestPlan::default()
        });
        assert_eq!(base.model_map.len(), 2);
        assert_eq!(base.req_map, Some(ReqMapMode::AnthropicToOpenAIChat));
    }

    #[test]
    fn model_map_resolution() {
        let plan = RequestPlan {
            model_map: vec![("gpt-4o".into(), Expr::literal("upstream-4o"))],
            model_map_default: Some(Expr::literal("fallback")),
            ..RequestPlan::default()
        };
        let scope = crate::expr::ExprScope::default();
        assert_eq!(plan.mapped_model("gpt-4o", &scope), "upstream-4o");
        assert_eq!(plan.mapped_model("other", &scope), "fallback");

        let bare = RequestPlan::default();
        assert_eq!(bare.mapped_model("other", &scope), "");
    }
}
