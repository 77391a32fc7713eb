use std::collections::HashSet;
use std::fmt;

use ramses_frame::{Address, Frame};

/// Why a frame was dropped before deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// An address slot holds a blocked device.
    Blocked(Address),
    /// The source is not on the known list, which is enforced.
    Unknown(Address),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Blocked(addr) => write!(f, "blocked device {addr}"),
            Rejection::Unknown(addr) => write!(f, "unknown device {addr}"),
        }
    }
}

/// Known-list and block-list filtering of inbound frames.
///
/// Gateway-class sources always pass the known-list check: they are our own
/// echoes or a second gateway on the same system.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    known: HashSet<Address>,
    blocked: HashSet<Address>,
    enforce_known: bool,
}

impl DeviceFilter {
    pub fn new(
        known: impl IntoIterator<Item = Address>,
        blocked: impl IntoIterator<Item = Address>,
        enforce_known: bool,
    ) -> Self {
        Self {
            known: known.into_iter().collect(),
            blocked: blocked.into_iter().collect(),
            enforce_known,
        }
    }

    /// Add devices to the known list, e.g. from a seeded layout.
    pub fn extend_known(&mut self, devices: impl IntoIterator<Item = Address>) {
        self.known.extend(devices);
    }

    pub fn check(&self, frame: &Frame) -> Result<(), Rejection> {
        if let Some(blocked) = frame
            .addrs()
            .iter()
            .flatten()
            .find(|addr| self.blocked.contains(addr))
        {
            return Err(Rejection::Blocked(*blocked));
        }
        let src = frame.src();
        if self.enforce_known && !src.is_gateway() && !self.known.contains(&src) {
            return Err(Rejection::Unknown(src));
        }
        Ok(())
    }

    pub fn is_known(&self, address: &Address) -> bool {
        self.known.contains(address)
    }

    pub fn is_blocked(&self, address: &Address) -> bool {
        self.blocked.contains(address)
    }

    pub fn has_known_list(&self) -> bool {
        !self.known.is_empty()
    }

    pub fn enforces_known(&self) -> bool {
        self.enforce_known
    }
}
