mod error;
mod result;

pub use error::{ErrorEnvelope, ProxyError};
pub use result::{ProviderKey, ProviderSource, ProxyResult, Usage, UsageStage};
