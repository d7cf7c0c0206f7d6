//! Mode-string dispatch over the closed codec set. The DSL validator is
//! the only place new modes can be admitted.

use bytes::Bytes;
use serde_json::Value;

use nextrouter_protocol::sse::SseEvent;

use crate::{claude2openai, gemini2openai, openai2claude, openai2gemini, openai2responses,
    responses2openai};

/// The closed codec set is addressed by these mode strings; the DSL
/// validator re-exports them as its allowlists, so admitting a new mode
/// means extending both the enum and the dispatch below.
macro_rules! mode_enum {
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

mode_enum!(ReqMapMode, {
    OpenAIChatToOpenAIResponses => "openai_chat_to_openai_responses",
    AnthropicToOpenAIChat => "anthropic_to_openai_chat",
    GeminiToOpenAIChat => "gemini_to_openai_chat",
    OpenAIChatToAnthropicMessages => "openai_chat_to_anthropic_messages",
    OpenAIChatToGeminiGenerateContent => "openai_chat_to_gemini_generate_content",
});

mode_enum!(RespMapMode, {
    OpenAIResponsesToOpenAIChat => "openai_responses_to_openai_chat",
    AnthropicToOpenAIChat => "anthropic_to_openai_chat",
    GeminiToOpenAIChat => "gemini_to_openai_chat",
    OpenAIToAnthropicMessages => "openai_to_anthropic_messages",
    OpenAIToGeminiChat => "openai_to_gemini_chat",
    OpenAIToGeminiGenerateContent => "openai_to_gemini_generate_content",
});

mode_enum!(SseParseMode, {
    OpenAIResponsesToOpenAIChatChunks => "openai_responses_to_openai_chat_chunks",
    AnthropicToOpenAIChunks => "anthropic_to_openai_chunks",
    OpenAIToAnthropicChunks => "openai_to_anthropic_chunks",
    OpenAIToGeminiChunks => "openai_to_gemini_chunks",
    GeminiToOpenAIChatChunks => "gemini_to_openai_chat_chunks",
});

/// Request-side context a codec may need beyond the body itself: Gemini
/// native requests carry the model in the URL, and the stream flag lives
/// outside the Gemini body.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamCtx<'a> {
    pub model: &'a str,
    pub stream: bool,
}

pub fn map_request(mode: ReqMapMode, body: &Value, ctx: StreamCtx<'_>) -> Value {
    match mode {
        ReqMapMode::OpenAIChatToOpenAIResponses => openai2responses::request::map_request(body),
        ReqMapMode::AnthropicToOpenAIChat => claude2openai::request::map_request(body),
        ReqMapMode::GeminiToOpenAIChat => gemini2openai::request::map_request(body, ctx),
        ReqMapMode::OpenAIChatToAnthropicMessages => openai2claude::request::map_request(body),
        ReqMapMode::OpenAIChatToGeminiGenerateContent => {
            openai2gemini::request::map_request(body)
        }
    }
}

pub fn map_response(mode: RespMapMode, body: &Value) -> Value {
    match mode {
        RespMapMode::OpenAIResponsesToOpenAIChat => responses2openai::response::map_response(body),
        RespMapMode::AnthropicToOpenAIChat => claude2openai::response::map_response(body),
        RespMapMode::GeminiToOpenAIChat => gemini2openai::response::map_response(body),
        RespMapMode::OpenAIToAnthropicMessages => openai2claude::response::map_response(body),
        // Both Gemini targets produce the generateContent response shape.
        RespMapMode::OpenAIToGeminiChat | RespMapMode::OpenAIToGeminiGenerateContent => {
            openai2gemini::response::map_response(body)
        }
    }
}

/// A streaming SSE re-dialecter. The engine groups upstream bytes into
/// events and writes whatever frames come back, in order.
///
/// Contract (shared by every implementation):
/// - events with an empty payload and `[DONE]` markers pass through
///   unchanged (the latter triggers the terminal frame exactly once);
/// - `finish` flushes trailing state and emits the terminal
///   `data: [DONE]` if the upstream never sent one;
/// - `role: "assistant"` appears in at most one chunk per choice index.
pub trait SseTransform: Send {
    fn on_event(&mut self, event: &SseEvent) -> Vec<Bytes>;
    fn finish(&mut self) -> Vec<Bytes>;
}

pub fn make_sse_transform(mode: SseParseMode, model_hint: &str) -> Box<dyn SseTransform> {
    match mode {
        SseParseMode::OpenAIResponsesToOpenAIChatChunks => {
            Box::new(responses2openai::stream::ResponsesToChatChunks::new(model_hint))
        }
        SseParseMode::AnthropicToOpenAIChunks => {
            Box::new(claude2openai::stream::ClaudeToChatChunks::new(model_hint))
        }
        SseParseMode::OpenAIToAnthropicChunks => {
            Box::new(openai2claude::stream::ChatToClaudeChunks::new(model_hint))
        }
        SseParseMode::OpenAIToGeminiChunks => {
            Box::new(openai2gemini::stream::ChatToGeminiChunks::new(model_hint))
        }
        SseParseMode::GeminiToOpenAIChatChunks => {
            Box::new(gemini2openai::stream::GeminiToChatChunks::new(model_hint))
        }
    }
}
