//! Dialect round-trip: a Claude messages request mapped to OpenAI chat and
//! back preserves model, roles, text content, tool calls, and system text.

use serde_json::json;

use nextrouter_transform::{ReqMapMode, StreamCtx, map_request};

#[test]
fn claude_to_openai_and_back_preserves_request() {
    let original = json!({
        "model": "claude-haiku-4-5",
        "system": "you are terse",
        "messages": [
            {"role": "user", "content": "what's the weather in SF?"},
            {"role": "assistant", "content": [
                {"type": "text", "text": "checking"},
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather",
                 "input": {"city": "SF"}},
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "sunny"},
            ]},
        ],
        "max_tokens": 128,
    });

    let as_openai = map_request(
        ReqMapMode::AnthropicToOpenAIChat,
        &original,
        StreamCtx::default(),
    );
    let back = map_request(
        ReqMapMode::OpenAIChatToAnthropicMessages,
        &as_openai,
        StreamCtx::default(),
    );

    assert_eq!(back["model"], "claude-haiku-4-5");
    assert_eq!(back["system"], "you are terse");
    assert_eq!(back["max_tokens"], 128);

    let messages = back["messages"].as_array().unwrap();
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "what's the weather in SF?");

    assert_eq!(messages[1]["role"], "assistant");
    let blocks = messages[1]["content"].as_array().unwrap();
    assert_eq!(blocks[0]["type"], "text");
    assert_eq!(blocks[0]["text"], "checking");
    assert_eq!(blocks[1]["type"], "tool_use");
    assert_eq!(blocks[1]["id"], "toolu_1");
    assert_eq!(blocks[1]["name"], "get_weather");
    assert_eq!(blocks[1]["input"], json!({"city": "SF"}));

    assert_eq!(messages[2]["role"], "user");
    assert_eq!(messages[2]["content"][0]["type"], "tool_result");
    assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_1");
    assert_eq!(messages[2]["content"][0]["content"], "sunny");
}

#[test]
fn gemini_request_maps_through_openai_with_context() {
    let gemini = json!({
        "contents": [{"role": "user", "parts": [{"text": "hello"}]}],
        "generationConfig": {"maxOutputTokens": 10},
    });
    let as_openai = map_request(
        ReqMapMode::GeminiToOpenAIChat,
        &gemini,
        StreamCtx {
            model: "gemini-2.0-flash",
            stream: true,
        },
    );
    assert_eq!(as_openai["model"], "gemini-2.0-flash");
    assert_eq!(as_openai["stream"], true);
    assert_eq!(as_openai["max_tokens"], 10);

    let back = map_request(
        ReqMapMode::OpenAIChatToGeminiGenerateContent,
        &as_openai,
        StreamCtx::default(),
    );
    assert_eq!(back["contents"][0]["parts"][0]["text"], "hello");
    assert_eq!(back["generationConfig"]["maxOutputTokens"], 10);
}
