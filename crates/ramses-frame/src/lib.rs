//! RAMSES-II frame codec.
//!
//! A gateway line such as
//!
//! ```text
//! 045  I --- 01:145038 --:------ 01:145038 3B00 002 FCC8
//! ```
//!
//! decodes into a [`Frame`]: verb, sequence number, three address slots,
//! command code and payload, plus reception metadata. Decoding is pure and
//! never panics on bad input; every failure is a recoverable [`DecodeError`].

pub mod address;
pub mod checksum;
pub mod code;
pub mod codec;
pub mod error;
pub mod verb;

pub use address::{Address, NULL_SLOT};
pub use code::Code;
pub use codec::{
    decode_frame, decode_frame_with, encode_frame, encode_frame_with, from_hex, resolve_slots,
    to_hex, Frame, FrameConfig, LOG_TIMESTAMP_FORMAT, MAX_PAYLOAD,
};
pub use error::{DecodeError, Result};
pub use verb::Verb;
