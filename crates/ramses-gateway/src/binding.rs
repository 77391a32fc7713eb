//! RF binding handshake (`1FC9`).
//!
//! ```text
//! supplicant                              respondent
//!    I 1FC9 offer    (to itself)      ->
//!                                     <-  W 1FC9 accept (to supplicant)
//!    I 1FC9 confirm  (to respondent)  ->
//! ```
//!
//! [`BindSession`] performs no I/O. Feed it admitted messages and the clock,
//! and transmit the commands it returns. Offers and accepts are resent until
//! the peer answers; a supplicant whose confirm is never echoed counts itself
//! bound once its confirms run out.

use std::time::Instant;

use ramses_frame::{Address, Code, Frame, Verb};
use ramses_schema::{address_matches, codes, Command, Message};
use tracing::{debug, info, warn};

use crate::config::BindConfig;
use crate::error::BindError;

/// Side of the handshake a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindRole {
    /// Offers its codes and waits for a device to accept them.
    Supplicant,
    /// Listens for an offer and accepts it.
    Respondent,
}

/// Where a session is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    /// Respondent listening for an offer.
    AwaitingOffer,
    /// Supplicant sending offers until one is accepted.
    Offering,
    /// Respondent sending accepts until `supplicant` confirms.
    Accepting { supplicant: Address },
    /// Supplicant sending its confirm until it hears the echo.
    Confirming { respondent: Address },
    Bound { peer: Address },
    Failed,
}

/// A completed binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub role: BindRole,
    pub peer: Address,
    /// Codes the peer listed in its offer or accept.
    pub codes: Vec<Code>,
}

/// What the caller should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum BindStep {
    Send(Command),
    Bound(Binding),
    Failed(BindError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Offer,
    Accept,
    Confirm,
}

fn phase(frame: &Frame) -> Option<Phase> {
    if frame.code() != codes::RF_BIND {
        return None;
    }
    let to_self = frame.dst() == frame.src() || frame.dst().is_broadcast();
    match frame.verb() {
        Verb::Info if to_self => Some(Phase::Offer),
        Verb::Info => Some(Phase::Confirm),
        Verb::Write if !to_self => Some(Phase::Accept),
        _ => None,
    }
}

/// Codes listed in a bind payload, without `1FC9` itself.
fn listed_codes(frame: &Frame) -> Vec<Code> {
    frame
        .payload()
        .chunks_exact(6)
        .map(|entry| Code::new(u16::from_be_bytes([entry[1], entry[2]])))
        .filter(|code| *code != codes::RF_BIND)
        .collect()
}

/// One run of the binding handshake for `device`.
#[derive(Debug)]
pub struct BindSession {
    role: BindRole,
    device: Address,
    idx: u8,
    codes: Vec<Code>,
    config: BindConfig,
    state: BindState,
    deadline: Option<Instant>,
    sends: u8,
    last_sent: Option<Command>,
    peer_codes: Vec<Code>,
}

impl BindSession {
    /// Offer `codes` from `device`.
    pub fn supplicant(device: Address, codes: impl Into<Vec<Code>>, config: BindConfig) -> Self {
        Self::new(BindRole::Supplicant, BindState::Offering, device, codes.into(), config)
    }

    /// Accept the first offer heard, answering with `codes` from `device`.
    pub fn respondent(device: Address, codes: impl Into<Vec<Code>>, config: BindConfig) -> Self {
        Self::new(BindRole::Respondent, BindState::AwaitingOffer, device, codes.into(), config)
    }

    fn new(
        role: BindRole,
        state: BindState,
        device: Address,
        codes: Vec<Code>,
        config: BindConfig,
    ) -> Self {
        Self {
            role,
            device,
            idx: 0x00,
            codes,
            config,
            state,
            deadline: None,
            sends: 0,
            last_sent: None,
            peer_codes: Vec::new(),
        }
    }

    /// Use `idx` (zone or domain) as the first byte of every entry.
    pub fn with_index(mut self, idx: u8) -> Self {
        self.idx = idx;
        self
    }

    pub fn role(&self) -> BindRole {
        self.role
    }

    pub fn device(&self) -> Address {
        self.device
    }

    pub fn state(&self) -> BindState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, BindState::Bound { .. } | BindState::Failed)
    }

    /// When [`poll`](Self::poll) next has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Arm the timers. A supplicant returns its first offer.
    pub fn start(&mut self, now: Instant) -> Option<BindStep> {
        self.deadline = Some(now + self.config.wait_timeout);
        match self.state {
            BindState::Offering => {
                debug!(device = %self.device, "offering bind");
                let offer = Command::rf_bind(Verb::Info, self.device, self.device, self.idx, &self.codes);
                Some(self.send(offer))
            }
            BindState::AwaitingOffer => {
                debug!(device = %self.device, "listening for bind offers");
                None
            }
            _ => None,
        }
    }

    /// Advance on an admitted message.
    pub fn on_message(&mut self, message: &Message, now: Instant) -> Option<BindStep> {
        let frame = message.frame();
        let phase = phase(frame)?;
        let to_us = address_matches(self.device, frame.dst());
        let from_us = address_matches(self.device, frame.src());

        match (self.state, phase) {
            (BindState::AwaitingOffer, Phase::Offer) if !from_us => {
                let supplicant = frame.src();
                info!(device = %self.device, %supplicant, "bind offer heard, accepting");
                self.peer_codes = listed_codes(frame);
                self.enter(BindState::Accepting { supplicant }, now);
                let accept = Command::rf_bind(Verb::Write, self.device, supplicant, self.idx, &self.codes);
                Some(self.send(accept))
            }
            (BindState::Offering, Phase::Accept) if to_us && !from_us => {
                let respondent = frame.src();
                info!(device = %self.device, %respondent, "bind accepted, confirming");
                self.peer_codes = listed_codes(frame);
                self.enter(BindState::Confirming { respondent }, now);
                let confirmed = if self.peer_codes.is_empty() {
                    &self.codes
                } else {
                    &self.peer_codes
                };
                let confirm = Command::rf_bind(Verb::Info, self.device, respondent, self.idx, confirmed);
                Some(self.send(confirm))
            }
            (BindState::Accepting { supplicant }, Phase::Confirm)
                if frame.src() == supplicant && to_us =>
            {
                Some(self.finish(supplicant))
            }
            (BindState::Confirming { respondent }, Phase::Confirm)
                if frame.dst() == respondent && from_us =>
            {
                Some(self.finish(respondent))
            }
            // the respondent missed our confirm
            (BindState::Confirming { respondent }, Phase::Accept)
                if frame.src() == respondent && to_us =>
            {
                self.resend(now, self.config.confirm_limit)
            }
            _ => None,
        }
    }

    /// Expire the current phase if its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<BindStep> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        match self.state {
            BindState::AwaitingOffer => Some(self.fail(BindError::NoOffer)),
            BindState::Offering => self
                .resend(now, self.config.send_limit)
                .or_else(|| Some(self.fail(BindError::NoAccept { offers: self.sends }))),
            BindState::Accepting { .. } => self
                .resend(now, self.config.send_limit)
                .or_else(|| Some(self.fail(BindError::NoConfirm { accepts: self.sends }))),
            BindState::Confirming { respondent } => {
                self.resend(now, self.config.confirm_limit).or_else(|| {
                    warn!(device = %self.device, %respondent, "confirm echo not heard, assuming bound");
                    Some(self.finish(respondent))
                })
            }
            BindState::Bound { .. } | BindState::Failed => {
                self.deadline = None;
                None
            }
        }
    }

    fn enter(&mut self, state: BindState, now: Instant) {
        self.state = state;
        self.sends = 0;
        self.deadline = Some(now + self.config.wait_timeout);
    }

    fn send(&mut self, command: Command) -> BindStep {
        let command = command.with_retries(0);
        self.sends += 1;
        self.last_sent = Some(command.clone());
        BindStep::Send(command)
    }

    fn resend(&mut self, now: Instant, limit: u8) -> Option<BindStep> {
        if self.sends >= limit {
            return None;
        }
        let command = self.last_sent.clone()?;
        self.deadline = Some(now + self.config.wait_timeout);
        debug!(device = %self.device, attempt = self.sends + 1, "resending bind frame");
        Some(self.send(command))
    }

    fn finish(&mut self, peer: Address) -> BindStep {
        info!(device = %self.device, %peer, role = ?self.role, "bound");
        self.state = BindState::Bound { peer };
        self.deadline = None;
        self.last_sent = None;
        BindStep::Bound(Binding {
            role: self.role,
            peer,
            codes: std::mem::take(&mut self.peer_codes),
        })
    }

    fn fail(&mut self, error: BindError) -> BindStep {
        warn!(device = %self.device, %error, "binding failed");
        self.state = BindState::Failed;
        self.deadline = None;
        self.last_sent = None;
        BindStep::Failed(error)
    }
}
