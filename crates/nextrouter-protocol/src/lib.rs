pub mod api;
pub mod finish;
pub mod ids;
pub mod sse;
