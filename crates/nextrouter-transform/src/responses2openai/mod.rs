//! OpenAI Responses → OpenAI chat completions.

pub mod response;
pub mod stream;
