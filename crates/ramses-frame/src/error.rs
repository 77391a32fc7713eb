/// Errors that can occur while decoding a frame line.
///
/// Every variant is recoverable: the offending line is dropped and the caller
/// moves on to the next one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The line does not have the shape of a frame at all.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The declared payload length disagrees with the payload actually present.
    #[error("payload length mismatch (declared {declared} bytes, found {actual})")]
    LengthMismatch { declared: usize, actual: usize },

    /// The RF checksum failed, either as reported by the gateway or as verified locally.
    #[error("checksum invalid: {0}")]
    ChecksumInvalid(String),

    /// The gateway firmware annotated the line with an error other than a checksum failure.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// An address field is malformed or the address combination is impossible.
    #[error("bad address {value:?}: {reason}")]
    BadAddress { value: String, reason: String },
}

impl DecodeError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }

    pub(crate) fn bad_address(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadAddress {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Short stable name, used as a diagnostics key.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Malformed(_) => "malformed",
            DecodeError::LengthMismatch { .. } => "length_mismatch",
            DecodeError::ChecksumInvalid(_) => "checksum_invalid",
            DecodeError::Gateway(_) => "gateway",
            DecodeError::BadAddress { .. } => "bad_address",
        }
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;
