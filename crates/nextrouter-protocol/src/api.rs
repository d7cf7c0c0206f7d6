use serde::{Deserialize, Serialize};

/// Logical client-facing API dialect. Drives plan selection, codec dispatch
/// and metric extraction; never inferred from the URL alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Api {
    ChatCompletions,
    Responses,
    Embeddings,
    ClaudeMessages,
    GeminiGenerateContent,
    GeminiStreamGenerateContent,
}

impl Api {
    pub fn as_str(&self) -> &'static str {
        match self {
            Api::ChatCompletions => "chat.completions",
            Api::Responses => "responses",
            Api::Embeddings => "embeddings",
            Api::ClaudeMessages => "claude.messages",
            Api::GeminiGenerateContent => "gemini.generateContent",
            Api::GeminiStreamGenerateContent => "gemini.streamGenerateContent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "chat.completions" => Some(Api::ChatCompletions),
            "responses" => Some(Api::Responses),
            "embeddings" => Some(Api::Embeddings),
            "claude.messages" => Some(Api::ClaudeMessages),
            "gemini.generateContent" => Some(Api::GeminiGenerateContent),
            "gemini.streamGenerateContent" => Some(Api::GeminiStreamGenerateContent),
            _ => None,
        }
    }

    pub fn is_gemini(&self) -> bool {
        matches!(
            self,
            Api::GeminiGenerateContent | Api::GeminiStreamGenerateContent
        )
    }
}

impl std::fmt::Display for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a Gemini-native path `/v1beta/models/{model}:{action}` into
/// `(model, action)`. Query strings are left to the caller.
pub fn parse_gemini_model_path(path: &str) -> Option<(&str, &str)> {
    let rest = path
        .strip_prefix("/v1beta/models/")
        .or_else(|| path.strip_prefix("/v1/models/"))?;
    let rest = rest.split('?').next().unwrap_or(rest);
    let (model, action) = rest.split_once(':')?;
    if model.is_empty() || action.is_empty() {
        return None;
    }
    Some((model, action))
}

/// Rewrite the model segment of a Gemini-native path, preserving the action
/// and any query string.
pub fn rewrite_gemini_model_path(path: &str, new_model: &str) -> Option<String> {
    let (before, rest) = if let Some(rest) = path.strip_prefix("/v1beta/models/") {
        ("/v1beta/models/", rest)
    } else if let Some(rest) = path.strip_prefix("/v1/models/") {
        ("/v1/models/", rest)
    } else {
        return None;
    };
    let (model_and_action, query) = match rest.split_once('?') {
        Some((head, query)) => (head, Some(query)),
        None => (rest, None),
    };
    let (_, action) = model_and_action.split_once(':')?;
    let mut out = format!("{before}{new_model}:{action}");
    if let Some(query) = query {
        out.push('?');
        out.push_str(query);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_round_trip() {
        for api in [
            Api::ChatCompletions,
            Api::Responses,
            Api::Embeddings,
            Api::ClaudeMessages,
            Api::GeminiGenerateContent,
            Api::GeminiStreamGenerateContent,
        ] {
            assert_eq!(Api::parse(api.as_str()), Some(api));
        }
        assert_eq!(Api::parse("chat"), None);
    }

    #[test]
    fn gemini_path_parse() {
        assert_eq!(
            parse_gemini_model_path("/v1beta/models/gemini-2.0-flash:generateContent"),
            Some(("gemini-2.0-flash", "generateContent"))
        );
        assert_eq!(
            parse_gemini_model_path("/v1beta/models/g:streamGenerateContent?alt=sse"),
            Some(("g", "streamGenerateContent"))
        );
        assert_eq!(parse_gemini_model_path("/v1/chat/completions"), None);
    }

    #[test]
    fn gemini_path_rewrite_keeps_action_and_query() {
        assert_eq!(
            rewrite_gemini_model_path(
                "/v1beta/models/old:streamGenerateContent?alt=sse",
                "new-model"
            )
            .as_deref(),
            Some("/v1beta/models/new-model:streamGenerateContent?alt=sse")
        );
        assert_eq!(rewrite_gemini_model_path("/v1/messages", "m"), None);
    }
}
