//! Line-framed transport boundary for RAMSES-II serial gateways.
//!
//! A gateway (HGI80 or evofw3 firmware) speaks one ASCII frame per line. This
//! crate knows nothing about the protocol inside those lines; it only moves
//! them:
//! - [`LineReader`] / [`LineWriter`] over any `Read` / `Write`
//! - [`LineSource`] / [`LineSink`] traits consumed by the gateway core
//! - [`GatewayStream`] for serial device nodes and TCP serial bridges
//!
//! This is the lowest layer of the workspace.

#[cfg(feature = "async")]
pub mod codec;
pub mod error;
pub mod line;
pub mod stream;

#[cfg(feature = "async")]
pub use codec::LineCodec;
pub use error::{Result, TransportError};
pub use line::{LineReader, LineSink, LineSource, LineWriter, DEFAULT_MAX_LINE};
pub use stream::GatewayStream;
