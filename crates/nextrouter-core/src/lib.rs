//! The request/response execution engine: binds an HTTP request context to
//! `(provider, key, api, stream)`, applies the provider's DSL plan, drives
//! the upstream exchange, translates the reply, and extracts metrics.

pub mod config;
pub mod engine;
pub mod estimate;
pub mod gzip;
pub mod meta;
pub mod pipeline;
pub mod sink;
pub mod tail;
pub mod transport;
pub mod usage;

pub use config::EngineConfig;
pub use engine::{ClientRequest, EngineResponse, ProxyCall, ProxyEngine};
pub use sink::{LogSink, ResultSink};
pub use transport::TransportManager;
