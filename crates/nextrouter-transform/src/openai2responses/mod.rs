//! OpenAI chat completions → OpenAI Responses.

pub mod request;
