//! Finish-reason vocabulary mappings between the three provider dialects.
//!
//! OpenAI `stop|length|tool_calls|content_filter`
//! Claude `end_turn|max_tokens|tool_use|stop_sequence|refusal`
//! Gemini `STOP|MAX_TOKENS|SAFETY|RECITATION|…`

pub fn claude_to_openai(reason: &str) -> &'static str {
    match reason {
        "end_turn" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        "stop_sequence" => "stop",
        "refusal" => "content_filter",
        _ => "stop",
    }
}

pub fn openai_to_claude(reason: &str) -> &'static str {
    match reason {
        "stop" => "end_turn",
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        "content_filter" => "refusal",
        _ => "end_turn",
    }
}

pub fn gemini_to_openai(reason: &str) -> &'static str {
    match reason {
        "STOP" => "stop",
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => "content_filter",
        "MALFORMED_FUNCTION_CALL" | "UNEXPECTED_TOOL_CALL" => "tool_calls",
        _ => "stop",
    }
}

pub fn openai_to_gemini(reason: &str) -> &'static str {
    match reason {
        "stop" => "STOP",
        "length" => "MAX_TOKENS",
        "content_filter" => "SAFETY",
        // Gemini has no dedicated tool-call finish; STOP is what the API emits.
        "tool_calls" | "function_call" => "STOP",
        _ => "STOP",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_round_trip() {
        assert_eq!(claude_to_openai("end_turn"), "stop");
        assert_eq!(claude_to_openai("tool_use"), "tool_calls");
        assert_eq!(openai_to_claude("length"), "max_tokens");
        assert_eq!(openai_to_claude("tool_calls"), "tool_use");
    }

    #[test]
    fn gemini_mapping() {
        assert_eq!(gemini_to_openai("STOP"), "stop");
        assert_eq!(gemini_to_openai("MAX_TOKENS"), "length");
        assert_eq!(gemini_to_openai("SAFETY"), "content_filter");
        assert_eq!(openai_to_gemini("length"), "MAX_TOKENS");
    }

    #[test]
    fn unknown_reasons_default() {
        assert_eq!(claude_to_openai("weird"), "stop");
        assert_eq!(gemini_to_openai("OTHER"), "stop");
    }
}
