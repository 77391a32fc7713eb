//! RAMSES-II command registry and typed payloads.
//!
//! The [`Registry`] maps each command code to a payload schema and parser.
//! Lookups never fail: unknown codes decode to an opaque payload. Payloads
//! that do not fit their code's schema are kept and flagged as malformed.
//!
//! Outbound traffic is built with [`Command`], which also records the reply
//! a command expects. Installation layouts are loaded with [`LayoutLoader`]
//! and validated against an embedded JSON Schema.

pub mod codes;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod layout;
pub mod message;
mod parsers;
pub mod payload;
pub mod registry;
pub mod units;
mod validator;

pub use command::{
    address_matches, Command, DhwModeRequest, Priority, ReplyPredicate, ZoneModeRequest,
};
pub use config::RegistryConfig;
pub use device::DeviceType;
pub use error::{Result, SchemaError};
pub use layout::{DhwSpec, LayoutLoader, SystemLayout, SystemSpec, ZoneSpec};
pub use message::Message;
pub use payload::{
    DeviceRole, Field, FieldClass, FieldKind, Index, Payload, Record, SystemMode, Value, ZoneMode,
};
pub use registry::{CommandSchema, IndexKind, Registry};
