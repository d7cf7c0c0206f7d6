pub mod error;
pub mod expr;
pub mod model;
pub mod parser;
pub mod path;
pub mod registry;
pub mod usage_expr;

pub use error::ConfigError;
pub use expr::{Expr, ExprScope};
pub use model::*;
pub use path::{JsonOp, JsonPath};
pub use registry::Registry;
pub use usage_expr::UsageExpr;
