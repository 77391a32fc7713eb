use ramses_frame::{Code, DecodeError, Verb};

/// Errors raised by the registry, the command builders and the layout loader.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A layout file could not be read.
    #[error("failed to load layout: {0}")]
    LoadFailed(String),

    /// The embedded layout schema could not be compiled.
    #[error("failed to compile schema: {0}")]
    CompileFailed(String),

    /// A layout document failed schema or consistency checks.
    #[error("layout validation failed: {message}")]
    ValidationFailed { message: String },

    /// The document is not valid JSON, or does not deserialize.
    #[error("layout is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Outbound frame uses a code the registry has no schema for.
    #[error("no schema registered for code {0}")]
    UnknownCode(Code),

    /// Outbound frame uses a verb the code does not support.
    #[error("verb {verb} is not valid for code {code}")]
    VerbNotAllowed { code: Code, verb: Verb },

    /// Outbound payload does not parse under its code's schema.
    #[error("payload does not match schema for {code}: {reason}")]
    PayloadMismatch { code: Code, reason: String },

    /// Outbound payload is longer than the radio length field can describe.
    #[error("payload for {code} is {len} bytes, limit is {limit}")]
    PayloadTooLong { code: Code, len: usize, limit: usize },

    /// A command builder was given an out-of-range argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

pub type Result<T> = std::result::Result<T, SchemaError>;
