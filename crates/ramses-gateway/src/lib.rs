//! RAMSES-II gateway core.
//!
//! Sits between a line transport and the application:
//! - [`DedupBuffer`] collapses repeated receptions and orders admitted messages
//! - [`Model`] folds messages into systems, zones, DHW circuits and devices
//! - [`Dispatcher`] paces outbound commands and correlates their replies
//! - [`GatewayDetector`] learns which gateway echoes our transmissions
//! - [`BindSession`] runs the RF binding handshake
//!
//! [`Pipeline`] runs these stages single-threaded with no I/O. [`Gateway`]
//! runs them on a reader and a writer thread over a live transport.

pub mod binding;
pub mod config;
pub mod dedup;
pub mod detect;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod model;
pub mod pipeline;
pub mod subscription;

pub use binding::{BindRole, BindSession, BindState, BindStep, Binding};
pub use config::{
    Backoff, BindConfig, DedupConfig, DispatchConfig, GatewayConfig, StalenessConfig,
};
pub use dedup::{Admission, DedupBuffer, DedupStats, Fingerprint, Origin};
pub use detect::{GatewayDetector, GatewayNotice};
pub use diagnostics::{
    CollectingSink, Diagnostic, DiagnosticRecord, DiagnosticsSink, TracingSink,
};
pub use dispatcher::{CommandState, DispatchEvent, Dispatcher, RequestId, Transmit};
pub use error::{ApplyError, ApplyFailure, BindError, DispatchError, GatewayError, Result};
pub use filter::{DeviceFilter, Rejection};
pub use gateway::{CommandHandle, CommandResult, Gateway, Stopped};
pub use model::{
    AppliedDelta, EntityId, FieldState, Liveness, Model, Relations, Snapshot, StateChange,
};
pub use pipeline::{Ingested, LineOutcome, Pipeline};
pub use subscription::{Closed, Filter, Subscription};
