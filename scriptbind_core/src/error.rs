//! Error types for scriptbind

use thiserror::Error;

/// Result type for scriptbind operations
pub type Result<T> = std::result::Result<T, ScriptbindError>;

/// Errors raised while wiring, resolving or evaluating
#[derive(Error, Debug)]
pub enum ScriptbindError {
    /// No binding or singleton exists for the requested key
    #[error("No binding for {type_name} (tag: {tag})")]
    UnboundType { type_name: String, tag: String },

    /// A concrete type could not be default-constructed
    #[error("Cannot instantiate {type_name}: {reason}")]
    Instantiation { type_name: String, reason: String },

    /// A constructor parameter has an abstract type missing from the registry
    #[error("Parameter `{parameter}` of {owner} requires {type_name}, which is not bound")]
    ParameterNotBound {
        type_name: String,
        parameter: String,
        owner: String,
    },

    /// Resolution revisited a type already on the construction path
    #[error("Cyclic dependency: {}", chain.join(" -> "))]
    CyclicDependency { chain: Vec<String> },

    /// The introspector has no metadata for a type
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// An instance did not hold the requested Rust type
    #[error("Instance is not a {expected}")]
    Downcast { expected: String },

    /// Declared contract and reflected signature disagree
    #[error("Signature mismatch for `{symbol}`: declared {expected}, found {actual}")]
    SignatureMismatch {
        symbol: String,
        expected: String,
        actual: String,
    },

    /// No fragment has been evaluated, or the symbol does not exist on it
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// Compile or runtime failure inside evaluated code
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Evaluation did not finish in time
    #[error("Evaluation timed out after {0} ms")]
    EvaluationTimeout(u64),

    /// The configured code host refuses to evaluate anything
    #[error("Code evaluation is disabled")]
    BackendDisabled,

    /// Invalid configuration
    #[error("Config error at {path}: {message}")]
    ConfigError { path: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
