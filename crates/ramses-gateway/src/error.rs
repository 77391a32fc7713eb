use ramses_frame::{Address, Code};
use ramses_schema::SchemaError;
use ramses_transport::TransportError;

use crate::dispatcher::RequestId;
use crate::model::{AppliedDelta, EntityId};

/// Errors that stop or prevent a gateway run.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Transport-level error. Fatal to the pipeline.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Registry or layout error.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A worker thread could not be started or panicked.
    #[error("worker thread failed: {0}")]
    Thread(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// A message could not be folded into the entity model in full.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    /// The message implies a binding that contradicts an established one.
    /// The existing binding is kept.
    #[error("{device} is bound to {existing}, message claims {claimed}")]
    BindingConflict {
        device: Address,
        existing: EntityId,
        claimed: EntityId,
    },

    /// The payload of a known code failed its schema.
    #[error("payload of {code} does not match its schema: {reason}")]
    SchemaMismatch { code: Code, reason: String },
}

/// Result of a partially applied message: what was written, and what was not.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{} error(s) applying message (first: {})", errors.len(), first_error(errors))]
pub struct ApplyFailure {
    pub applied: AppliedDelta,
    pub errors: Vec<ApplyError>,
}

fn first_error(errors: &[ApplyError]) -> String {
    errors
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

/// Terminal failure of an outbound command, delivered to its caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Every attempt timed out.
    #[error("no acknowledgement after {attempts} attempt(s)")]
    Exhausted { attempts: u32 },

    /// The command was cancelled before completing.
    #[error("command cancelled")]
    Cancelled,

    /// The command failed registry validation and was never queued.
    #[error("invalid command: {0}")]
    Invalid(String),

    /// The dispatcher shut down with the command still pending.
    #[error("dispatcher shut down")]
    Shutdown,

    /// No pending command has this id.
    #[error("unknown request id {0}")]
    UnknownRequest(RequestId),
}

/// Why an RF binding handshake gave up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    /// A respondent heard no offer in time.
    #[error("no bind offer heard")]
    NoOffer,

    /// A supplicant's offers went unaccepted.
    #[error("offer not accepted after {offers} attempt(s)")]
    NoAccept { offers: u8 },

    /// A respondent's accepts went unconfirmed.
    #[error("accept not confirmed after {accepts} attempt(s)")]
    NoConfirm { accepts: u8 },

    /// The gateway stopped mid-handshake.
    #[error("gateway shut down during binding")]
    Shutdown,
}
