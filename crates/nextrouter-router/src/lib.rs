//! HTTP front-end: client API routes, api-tag and stream detection,
//! provider resolution, and error-envelope mapping. All transformation
//! semantics live in the core.

mod keystore;
mod model_router;
mod routes;
mod token_bindings;

pub use keystore::{JsonKeystore, Keystore};
pub use model_router::ModelRouter;
pub use routes::{RouterState, proxy_router};
pub use token_bindings::TokenBindings;
