/// Load-time configuration failures. Any of these aborts the whole reload
/// and leaves the previously loaded registry intact.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{file}: {0}", file = .file)]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{file}:{line}: {message}")]
    Syntax {
        file: String,
        line: usize,
        message: String,
    },
    #[error("{file}:{line}: unknown directive `{name}`")]
    UnknownDirective {
        file: String,
        line: usize,
        name: String,
    },
    #[error("{file}:{line}: `{name}` has been removed; {help}")]
    RemovedDirective {
        file: String,
        line: usize,
        name: String,
        help: String,
    },
    #[error("{file}:{line}: unknown {what} `{value}` (allowed: {allowed})")]
    UnknownEnum {
        file: String,
        line: usize,
        what: String,
        value: String,
        allowed: String,
    },
    #[error("{file}:{line}: invalid JSON path `{path}`: {message}")]
    InvalidPath {
        file: String,
        line: usize,
        path: String,
        message: String,
    },
    #[error("{file}:{line}: invalid expression `{expr}`: {message}")]
    InvalidExpr {
        file: String,
        line: usize,
        expr: String,
        message: String,
    },
    #[error("{file}:{line}: {message}")]
    MissingField {
        file: String,
        line: usize,
        message: String,
    },
    #[error("include cycle detected at {file}")]
    IncludeCycle { file: String },
    #[error("include depth exceeds {max} at {file}")]
    IncludeDepth { file: String, max: usize },
    #[error("duplicate provider `{name}` (first defined in {first}, again in {second})")]
    DuplicateProvider {
        name: String,
        first: String,
        second: String,
    },
}
