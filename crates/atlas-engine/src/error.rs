//! Error types for the generator engine.

use atlas_core::SyntaxError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type AtlasResult<T> = Result<T, AtlasError>;

/// Errors that can occur while configuring, compiling or running generators.
#[derive(Debug, Error)]
pub enum AtlasError {
    /// The generator source could not be parsed.
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    /// The registration decorator was applied incorrectly.
    #[error("invalid decorator `{decorator}` at {file}:{line}: {message}")]
    InvalidDecorator {
        decorator: String,
        file: String,
        line: u32,
        message: String,
    },

    /// An `oid` annotation was not a string literal.
    #[error("{file}:{line}: value passed to 'oid' must be a string literal in `{call}`")]
    InvalidOid { call: String, file: String, line: u32 },

    /// A strategy identifier did not name a known strategy.
    #[error("unrecognized strategy `{0}` (expected one of: dfs, randomized)")]
    UnknownStrategy(String),

    /// A strategy was asked to resolve an operator it does not know.
    #[error("strategy `{strategy}` does not implement operator `{op}`")]
    UnknownOperator { strategy: String, op: String },

    /// Deregistering a hook that is not registered on the generator.
    #[error("hook was not registered on generator `{generator}`")]
    HookNotRegistered { generator: String },

    /// A name used by generator code is not bound anywhere.
    #[error("{file}:{line}: name `{name}` is not defined")]
    NameNotFound { name: String, file: String, line: u32 },

    /// An operation was applied to values of the wrong type.
    #[error("{file}:{line}: {message}")]
    Type {
        message: String,
        file: String,
        line: u32,
    },

    /// A function, builtin or operator received unusable arguments.
    #[error("invalid arguments to `{function}`: {message}")]
    InvalidArguments { function: String, message: String },

    /// A run signalled skip outside of an enumeration.
    #[error("run of generator `{generator}` was skipped and produced no value")]
    RunSkipped { generator: String },

    /// A generator handle outlived the generator it refers to.
    #[error("generator `{0}` has been dropped")]
    GeneratorDropped(String),

    /// A replayed run diverged from the recorded trace.
    #[error("trace mismatch at choice {position}: {message}")]
    TraceMismatch { position: usize, message: String },

    /// A model-backed strategy or training call failed.
    #[error("model error: {0}")]
    Model(String),

    /// A hook reported a failure.
    #[error("hook error: {0}")]
    Hook(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O error (file operations).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl AtlasError {
    /// Create an argument error for `function`.
    pub fn invalid_arguments(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            function: function.into(),
            message: message.into(),
        }
    }
}
