//! Heuristic token estimation used when the upstream reported no usage.
//! Character-class counting with per-provider multipliers; deliberately
//! cheap, never a substitute for upstream numbers.

use serde_json::Value;

use nextrouter_dsl::UsageMode;
use nextrouter_protocol::api::Api;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateProvider {
    OpenAI,
    Claude,
    Gemini,
}

impl EstimateProvider {
    pub fn from_usage_mode(mode: Option<UsageMode>) -> Self {
        match mode {
            Some(UsageMode::Anthropic) => EstimateProvider::Claude,
            Some(UsageMode::Gemini) => EstimateProvider::Gemini,
            _ => EstimateProvider::OpenAI,
        }
    }

    /// Tokens-per-unit weights: (word run, digit run, CJK char, emoji,
    /// URL delimiter, math symbol, other symbol).
    fn weights(&self) -> (f64, f64, f64, f64, f64, f64, f64) {
        match self {
            EstimateProvider::OpenAI => (1.3, 0.8, 1.0, 2.0, 0.5, 1.0, 0.4),
            EstimateProvider::Claude => (1.35, 0.9, 1.2, 2.0, 0.6, 1.1, 0.45),
            EstimateProvider::Gemini => (1.25, 0.7, 0.9, 2.0, 0.5, 1.0, 0.4),
        }
    }
}

/// Estimate the token count of free text.
pub fn estimate_tokens(provider: EstimateProvider, text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let (w_word, w_digit, w_cjk, w_emoji, w_url, w_math, w_sym) = provider.weights();

    let mut words = 0u64;
    let mut digit_runs = 0u64;
    let mut cjk = 0u64;
    let mut emoji = 0u64;
    let mut url_delims = 0u64;
    let mut math = 0u64;
    let mut symbols = 0u64;

    let mut in_word = false;
    let mut in_digits = false;
    for ch in text.chars() {
        let (word, digit) = (ch.is_ascii_alphabetic(), ch.is_ascii_digit());
        if word && !in_word {
            words += 1;
        }
        if digit && !in_digits {
            digit_runs += 1;
        }
        in_word = word;
        in_digits = digit;
        if word || digit || ch.is_whitespace() {
            continue;
        }
        if is_cjk(ch) {
            cjk += 1;
        } else if is_emoji(ch) {
            emoji += 1;
        } else if matches!(ch, '/' | ':' | '?' | '&' | '#' | '.' | '-' | '_' | '=') {
            url_delims += 1;
        } else if matches!(ch, '+' | '*' | '<' | '>' | '%' | '^' | '~' | '|') {
            math += 1;
        } else {
            symbols += 1;
        }
    }

    let estimate = words as f64 * w_word
        + digit_runs as f64 * w_digit
        + cjk as f64 * w_cjk
        + emoji as f64 * w_emoji
        + url_delims as f64 * w_url
        + math as f64 * w_math
        + symbols as f64 * w_sym;
    estimate.ceil().max(1.0) as u64
}

/// Chat-completions prompts pay a per-message framing overhead.
pub fn chat_prompt_overhead(message_count: usize) -> u64 {
    (message_count as u64) * 3 + 3
}

/// Best-effort prompt text for estimation, by client dialect.
pub fn prompt_text(api: Api, body: &Value) -> (String, usize) {
    let mut out = String::new();
    let mut message_count = 0;

    match api {
        Api::ChatCompletions | Api::Responses | Api::ClaudeMessages | Api::Embeddings => {
            if let Some(system) = body.get("system") {
                collect_text(system, &mut out);
            }
            if let Some(instructions) = body.get("instructions") {
                collect_text(instructions, &mut out);
            }
            let items = body
                .get("messages")
                .or_else(|| body.get("input"))
                .and_then(Value::as_array);
            if let Some(items) = items {
                message_count = items.len();
                for item in items {
                    collect_text(item.get("content").unwrap_or(item), &mut out);
                }
            }
        }
        Api::GeminiGenerateContent | Api::GeminiStreamGenerateContent => {
            if let Some(system) = body
                .get("system_instruction")
                .or_else(|| body.get("systemInstruction"))
            {
                collect_text(system, &mut out);
            }
            if let Some(contents) = body.get("contents").and_then(Value::as_array) {
                message_count = contents.len();
                for content in contents {
                    collect_text(content, &mut out);
                }
            }
        }
    }
    (out, message_count)
}

/// Best-effort completion text from a response document (any dialect) or
/// from accumulated stream-delta payloads.
pub fn completion_text(doc: &Value) -> String {
    let mut out = String::new();
    // OpenAI chat: choices[].message.content / choices[].delta.content
    if let Some(choices) = doc.get("choices").and_then(Value::as_array) {
        for choice in choices {
            for key in ["message", "delta"] {
                if let Some(content) = choice.get(key).and_then(|m| m.get("content")) {
                    collect_text(content, &mut out);
                }
            }
        }
    }
    // Claude: content[].text / delta.text
    if let Some(content) = doc.get("content") {
        collect_text(content, &mut out);
    }
    if let Some(delta) = doc.get("delta").and_then(|d| d.get("text")) {
        collect_text(delta, &mut out);
    }
    // Gemini: candidates[].content.parts[].text
    if let Some(candidates) = doc.get("candidates").and_then(Value::as_array) {
        for candidate in candidates {
            if let Some(content) = candidate.get("content") {
                collect_text(content, &mut out);
            }
        }
    }
    out
}

/// Pull every plausible text leaf out of a message-ish JSON fragment.
fn collect_text(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push_str(s);
            out.push('\n');
        }
        Value::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        Value::Object(map) => {
            for key in ["text", "content", "parts"] {
                if let Some(inner) = map.get(key) {
                    collect_text(inner, out);
                }
            }
        }
        _ => {}
    }
}

fn is_cjk(ch: char) -> bool {
    matches!(ch as u32,
        0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0x3040..=0x30FF | 0xAC00..=0xD7AF | 0xF900..=0xFAFF)
}

fn is_emoji(ch: char) -> bool {
    matches!(ch as u32, 0x1F300..=0x1FAFF | 0x2600..=0x27BF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn word_text_estimates_proportionally() {
        let short = estimate_tokens(EstimateProvider::OpenAI, "hello world");
        let long = estimate_tokens(
            EstimateProvider::OpenAI,
            "hello world this is a much longer sentence with many words",
        );
        assert!(short >= 2);
        assert!(long > short * 3);
    }

    #[test]
    fn cjk_counts_per_char() {
        let tokens = estimate_tokens(EstimateProvider::OpenAI, "你好世界");
        assert_eq!(tokens, 4);
    }

    #[test]
    fn empty_text_is_zero() {
        assert_eq!(estimate_tokens(EstimateProvider::Claude, ""), 0);
    }

    #[test]
    fn chat_overhead_formula() {
        assert_eq!(chat_prompt_overhead(0), 3);
        assert_eq!(chat_prompt_overhead(4), 15);
    }

    #[test]
    fn prompt_text_by_dialect() {
        let (text, count) = prompt_text(
            Api::ChatCompletions,
            &json!({"messages": [
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "hi"},
            ]}),
        );
        assert!(text.contains("sys"));
        assert!(text.contains("hi"));
        assert_eq!(count, 2);

        let (text, count) = prompt_text(
            Api::GeminiGenerateContent,
            &json!({"contents": [{"parts": [{"text": "ping"}]}]}),
        );
        assert!(text.contains("ping"));
        assert_eq!(count, 1);
    }

    #[test]
    fn completion_text_by_dialect() {
        assert!(
            completion_text(&json!({"choices": [{"message": {"content": "abc"}}]}))
                .contains("abc")
        );
        assert!(
            completion_text(&json!({"content": [{"type": "text", "text": "def"}]}))
                .contains("def")
        );
        assert!(
            completion_text(&json!({"candidates": [{"content": {"parts": [{"text": "ghi"}]}}]}))
                .contains("ghi")
        );
    }
}
