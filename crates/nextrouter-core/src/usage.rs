//! Usage / finish-reason extraction, tolerant to token fields fragmented
//! across SSE events: per-field saturating max, a later zero never
//! overwrites a known positive.

use serde_json::Value;

use nextrouter_common::Usage;
use nextrouter_dsl::{FinishMode, FinishPlan, JsonPath, UsageMode, UsagePlan};

#[derive(Debug, Default)]
pub struct StreamStats {
    usage_plan: UsagePlan,
    finish_plan: FinishPlan,
    usage: Usage,
    finish_reason: String,
    saw_usage: bool,
}

impl StreamStats {
    pub fn new(usage_plan: Option<UsagePlan>, finish_plan: Option<FinishPlan>) -> Self {
        Self {
            usage_plan: usage_plan.unwrap_or_default(),
            finish_plan: finish_plan.unwrap_or_default(),
            ..Self::default()
        }
    }

    /// Feed one SSE `data:` payload. Empty payloads and `[DONE]` markers
    /// are skipped; unparsable payloads are ignored.
    pub fn on_sse_data_json(&mut self, payload: &str) {
        let trimmed = payload.trim();
        if trimmed.is_empty() || trimmed == "[DONE]" {
            return;
        }
        let Ok(doc) = serde_json::from_str::<Value>(trimmed) else {
            return;
        };
        self.on_document(&doc);
    }

    /// Extract from a full (non-stream) response document, or one parsed
    /// stream event.
    pub fn on_document(&mut self, doc: &Value) {
        self.merge_usage(doc);
        if self.finish_reason.is_empty()
            && let Some(reason) = self.extract_finish(doc)
        {
            self.finish_reason = reason;
        }
    }

    /// `(usage, finish_reason, saw_any_usage)` with the total normalized.
    pub fn result(&self) -> (Usage, String, bool) {
        (
            self.usage.normalized(),
            self.finish_reason.clone(),
            self.saw_usage,
        )
    }

    fn merge_usage(&mut self, doc: &Value) {
        let (input, output, total, cached, cache_write) = self.extract_usage(doc);

        merge_field(&mut self.usage.input_tokens, input);
        merge_field(&mut self.usage.output_tokens, output);
        merge_field(&mut self.usage.cached_tokens, cached);
        merge_field(&mut self.usage.cache_write_tokens, cache_write);
        // A total snapshot only counts when the event carries both sides
        // or is total-only; one-sided events would understate the total.
        let both_sides = input > 0 && output > 0;
        let total_only = input == 0 && output == 0;
        if total > 0 && (both_sides || total_only) {
            merge_field(&mut self.usage.total_tokens, total);
        }

        if input > 0 || output > 0 || total > 0 {
            self.saw_usage = true;
        }
    }

    fn extract_usage(&self, doc: &Value) -> (u64, u64, u64, u64, u64) {
        let plan = &self.usage_plan;
        let mode = plan.mode.unwrap_or(UsageMode::OpenAI);

        let (mut input, mut output, mut total, mut cached, mut cache_write) = match mode {
            UsageMode::OpenAI => extract_openai(doc),
            UsageMode::Anthropic => extract_anthropic(doc),
            UsageMode::Gemini => extract_gemini(doc),
            UsageMode::Custom => {
                let input = plan.input_expr.as_ref().map_or(0, |e| e.eval_u64(doc));
                let output = plan.output_expr.as_ref().map_or(0, |e| e.eval_u64(doc));
                let total = plan.total_expr.as_ref().map_or(0, |e| e.eval_u64(doc));
                (input, output, total, 0, 0)
            }
        };

        // Configured paths override the mode as an escape hatch.
        if let Some(path) = &plan.input_path {
            input = path.get_u64(doc).unwrap_or(0);
        }
        if let Some(path) = &plan.output_path {
            output = path.get_u64(doc).unwrap_or(0);
        }
        if let Some(path) = &plan.total_path {
            total = path.get_u64(doc).unwrap_or(0);
        }
        if let Some(path) = &plan.cached_path {
            cached = path.get_u64(doc).unwrap_or(0);
        }
        if let Some(path) = &plan.cache_write_path {
            cache_write = path.get_u64(doc).unwrap_or(0);
        }
        (input, output, total, cached, cache_write)
    }

    fn extract_finish(&self, doc: &Value) -> Option<String> {
        if let Some(path) = &self.finish_plan.path {
            return path.get_str(doc).filter(|s| !s.is_empty());
        }
        match self.finish_plan.mode.unwrap_or(FinishMode::OpenAI) {
            FinishMode::OpenAI => first_string(doc, &["$.choices[*].finish_reason"]),
            FinishMode::Anthropic => {
                first_string(doc, &["$.delta.stop_reason", "$.stop_reason"])
            }
            FinishMode::Gemini => first_string(doc, &["$.candidates[*].finishReason"]),
            FinishMode::Custom => None,
        }
    }
}

fn merge_field(field: &mut u64, incoming: u64) {
    if incoming > *field {
        *field = incoming;
    }
}

fn first_string(doc: &Value, paths: &[&str]) -> Option<String> {
    for raw in paths {
        let path = JsonPath::parse(raw).ok()?;
        for value in path.get(doc) {
            if let Some(s) = value.as_str()
                && !s.is_empty()
            {
                return Some(s.to_string());
            }
        }
    }
    None
}

fn path_u64(doc: &Value, raw: &str) -> u64 {
    JsonPath::parse(raw)
        .ok()
        .and_then(|p| p.get_u64(doc))
        .unwrap_or(0)
}

fn extract_openai(doc: &Value) -> (u64, u64, u64, u64, u64) {
    let input = max_of(doc, &["$.usage.prompt_tokens", "$.usage.input_tokens"]);
    let output = max_of(doc, &["$.usage.completion_tokens", "$.usage.output_tokens"]);
    let total = path_u64(doc, "$.usage.total_tokens");
    let cached = max_of(
        doc,
        &[
            "$.usage.prompt_tokens_details.cached_tokens",
            "$.usage.input_tokens_details.cached_tokens",
            "$.usage.cached_tokens",
        ],
    );
    (input, output, total, cached, 0)
}

fn extract_anthropic(doc: &Value) -> (u64, u64, u64, u64, u64) {
    let input = max_of(doc, &["$.message.usage.input_tokens", "$.usage.input_tokens"]);
    let output = max_of(
        doc,
        &["$.message.usage.output_tokens", "$.usage.output_tokens"],
    );
    let cached = max_of(
        doc,
        &[
            "$.message.usage.cache_read_input_tokens",
            "$.usage.cache_read_input_tokens",
        ],
    );
    let cache_write = max_of(
        doc,
        &[
            "$.message.usage.cache_creation_input_tokens",
            "$.usage.cache_creation_input_tokens",
        ],
    );
    (input, output, 0, cached, cache_write)
}

fn extract_gemini(doc: &Value) -> (u64, u64, u64, u64, u64) {
    let usage = doc.get("usageMetadata").unwrap_or(&Value::Null);
    let input = path_u64(usage, "$.promptTokenCount");
    let output = path_u64(usage, "$.candidatesTokenCount") + path_u64(usage, "$.thoughtsTokenCount");
    let total = path_u64(usage, "$.totalTokenCount");
    let cached = path_u64(usage, "$.cachedContentTokenCount");
    (input, output, total, cached, 0)
}

fn max_of(doc: &Value, paths: &[&str]) -> u64 {
    paths.iter().map(|p| path_u64(doc, p)).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn openai_stats() -> StreamStats {
        StreamStats::new(
            Some(UsagePlan {
                mode: Some(UsageMode::OpenAI),
                ..UsagePlan::default()
            }),
            Some(FinishPlan {
                mode: Some(FinishMode::OpenAI),
                ..FinishPlan::default()
            }),
        )
    }

    #[test]
    fn later_zero_never_overwrites_positive() {
        let mut stats = openai_stats();
        stats.on_sse_data_json(
            r#"{"usage":{"prompt_tokens":10,"completion_tokens":0,"total_tokens":0}}"#,
        );
        stats.on_sse_data_json(
            r#"{"usage":{"prompt_tokens":0,"completion_tokens":4,"total_tokens":0}}"#,
        );
        let (usage, _, ok) = stats.result();
        assert!(ok);
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 4);
        assert_eq!(usage.total_tokens, 14);
    }

    #[test]
    fn per_field_max_across_events() {
        let mut stats = openai_stats();
        stats.on_sse_data_json(r#"{"usage":{"prompt_tokens":3,"completion_tokens":1}}"#);
        stats.on_sse_data_json(r#"{"usage":{"prompt_tokens":3,"completion_tokens":7}}"#);
        let (usage, _, _) = stats.result();
        assert_eq!(usage.output_tokens, 7);
    }

    #[test]
    fn one_sided_total_snapshot_is_rejected() {
        let mut stats = openai_stats();
        stats.on_sse_data_json(r#"{"usage":{"prompt_tokens":10,"total_tokens":3}}"#);
        let (usage, _, _) = stats.result();
        // The one-sided total is ignored; normalization derives 10.
        assert_eq!(usage.total_tokens, 10);
    }

    #[test]
    fn total_only_snapshot_is_accepted() {
        let mut stats = openai_stats();
        stats.on_sse_data_json(r#"{"usage":{"total_tokens":42}}"#);
        let (usage, _, ok) = stats.result();
        assert!(ok);
        assert_eq!(usage.total_tokens, 42);
    }

    #[test]
    fn done_and_empty_are_skipped() {
        let mut stats = openai_stats();
        stats.on_sse_data_json("");
        stats.on_sse_data_json("[DONE]");
        stats.on_sse_data_json("not json");
        let (_, _, ok) = stats.result();
        assert!(!ok);
    }

    #[test]
    fn first_finish_reason_wins() {
        let mut stats = openai_stats();
        stats.on_sse_data_json(r#"{"choices":[{"finish_reason":null}]}"#);
        stats.on_sse_data_json(r#"{"choices":[{"finish_reason":"tool_calls"}]}"#);
        stats.on_sse_data_json(r#"{"choices":[{"finish_reason":"stop"}]}"#);
        let (_, finish, _) = stats.result();
        assert_eq!(finish, "tool_calls");
    }

    #[test]
    fn anthropic_merges_message_and_delta_usage() {
        let mut stats = StreamStats::new(
            Some(UsagePlan {
                mode: Some(UsageMode::Anthropic),
                ..UsagePlan::default()
            }),
            Some(FinishPlan {
                mode: Some(FinishMode::Anthropic),
                ..FinishPlan::default()
            }),
        );
        stats.on_sse_data_json(
            r#"{"type":"message_start","message":{"usage":{"input_tokens":12,"cache_read_input_tokens":5}}}"#,
        );
        stats.on_sse_data_json(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":4}}"#,
        );
        let (usage, finish, _) = stats.result();
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 4);
        assert_eq!(usage.cached_tokens, 5);
        assert_eq!(finish, "end_turn");
    }

    #[test]
    fn gemini_counts_thoughts_and_total() {
        let mut stats = StreamStats::new(
            Some(UsagePlan {
                mode: Some(UsageMode::Gemini),
                ..UsagePlan::default()
            }),
            Some(FinishPlan {
                mode: Some(FinishMode::Gemini),
                ..FinishPlan::default()
            }),
        );
        stats.on_sse_data_json(
            r#"{"candidates":[{"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":1,"candidatesTokenCount":2,"thoughtsTokenCount":3,"totalTokenCount":6}}"#,
        );
        let (usage, finish, _) = stats.result();
        assert_eq!(usage.output_tokens, 5);
        assert_eq!(usage.total_tokens, 6);
        assert_eq!(finish, "STOP");
    }

    #[test]
    fn custom_expressions_and_path_overrides() {
        let plan = UsagePlan {
            mode: Some(UsageMode::Custom),
            input_expr: Some(nextrouter_dsl::UsageExpr::parse("$.u.a + $.u.b").unwrap()),
            output_expr: Some(nextrouter_dsl::UsageExpr::parse("$.u.out").unwrap()),
            ..UsagePlan::default()
        };
        let finish = FinishPlan {
            mode: Some(FinishMode::Custom),
            path: Some(JsonPath::parse("$.done_reason").unwrap()),
        };
        let mut stats = StreamStats::new(Some(plan), Some(finish));
        stats.on_sse_data_json(r#"{"u":{"a":1,"b":2,"out":3},"done_reason":"finished"}"#);
        let (usage, reason, _) = stats.result();
        assert_eq!(usage.input_tokens, 3);
        assert_eq!(usage.output_tokens, 3);
        assert_eq!(reason, "finished");
    }
}
