//! RAMSES-II RF protocol core.
//!
//! Decodes the line protocol spoken by HGI80 and evofw3 gateways, folds the
//! traffic into a model of heating systems, and sends paced, acknowledged
//! commands back out.
//!
//! # Crate Structure
//!
//! - [`transport`]: line-framed source and sink over serial ports or TCP bridges
//! - [`frame`]: the frame codec, addresses, verbs and command codes
//! - [`schema`]: the command registry, typed payloads and command builders
//! - [`gateway`]: dedup, entity model, dispatcher and the threaded runtime
//!   (behind the `gateway` feature)

/// Re-export transport types.
pub mod transport {
    pub use ramses_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use ramses_frame::*;
}

/// Re-export registry and payload types.
pub mod schema {
    pub use ramses_schema::*;
}

/// Re-export gateway types (requires `gateway` feature).
#[cfg(feature = "gateway")]
pub mod gateway {
    pub use ramses_gateway::*;
}
