//! Document-level codecs between the four client/provider API dialects
//! (OpenAI chat completions, OpenAI Responses, Claude messages, Gemini
//! generateContent) and their SSE stream variants.
//!
//! Every codec is a pure function over `serde_json::Value`; the set is
//! closed and dispatched by the DSL mode strings (`req_map`, `resp_map`,
//! `sse_parse`).

mod chunks;
pub mod dispatch;
mod util;

pub mod claude2openai;
pub mod gemini2openai;
pub mod openai2claude;
pub mod openai2gemini;
pub mod openai2responses;
pub mod responses2openai;

pub use dispatch::{
    ReqMapMode, RespMapMode, SseParseMode, SseTransform, StreamCtx, map_request, map_response,
    make_sse_transform,
};
