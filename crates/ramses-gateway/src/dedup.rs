//! Duplicate suppression and ordering.
//!
//! A frame is often heard more than once: relayed by a repeater, or echoed
//! back by the gateway after transmission. Receptions of the same
//! fingerprint within the window collapse into one admitted message; every
//! admitted message gets the next sequence number.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use chrono::{NaiveDateTime, TimeDelta};
use ramses_frame::{Address, Code, Frame};
use ramses_schema::{address_matches, Message};
use tracing::trace;

use crate::config::DedupConfig;

/// Identity of a frame for duplicate detection. The verb and sequence
/// number are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub src: Address,
    pub dst: Address,
    pub code: Code,
    pub payload: Bytes,
}

impl Fingerprint {
    pub fn of(frame: &Frame) -> Self {
        Self {
            src: frame.src(),
            dst: frame.dst(),
            code: frame.code(),
            payload: frame.payload().clone(),
        }
    }

    /// Like equality, but the gateway placeholder matches any gateway.
    fn matches_echo(&self, frame: &Frame) -> bool {
        self.code == frame.code()
            && self.dst == frame.dst()
            && self.payload == *frame.payload()
            && address_matches(self.src, frame.src())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Heard from another device.
    Foreign,
    /// The gateway's echo of one of our own transmissions.
    Echo,
}

/// Outcome of offering a message to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { seq: u64, origin: Origin },
    Duplicate { count: u32, first_seen: NaiveDateTime },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    pub admitted: u64,
    pub duplicates: u64,
    pub echoes: u64,
    /// Fingerprints currently inside the window.
    pub tracked: usize,
}

#[derive(Debug)]
struct Entry {
    first_seen: NaiveDateTime,
    count: u32,
}

#[derive(Debug)]
struct PendingEcho {
    fingerprint: Fingerprint,
    expires: NaiveDateTime,
}

/// Sliding-window duplicate filter keyed on message timestamps.
///
/// Eviction is lazy: entries older than the window, measured against the
/// newest timestamp seen so far, are dropped on each admission.
#[derive(Debug)]
pub struct DedupBuffer {
    window: TimeDelta,
    echo_window: TimeDelta,
    entries: HashMap<Fingerprint, Entry>,
    echoes: VecDeque<PendingEcho>,
    newest: Option<NaiveDateTime>,
    next_seq: u64,
    stats: DedupStats,
}

impl DedupBuffer {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            window: to_delta(config.window),
            echo_window: to_delta(config.echo_window),
            entries: HashMap::new(),
            echoes: VecDeque::new(),
            newest: None,
            next_seq: 1,
            stats: DedupStats::default(),
        }
    }

    pub fn admit(&mut self, message: &Message) -> Admission {
        self.admit_frame(message.frame())
    }

    pub fn admit_frame(&mut self, frame: &Frame) -> Admission {
        let at = frame.dtm();
        self.evict(at);

        let fingerprint = Fingerprint::of(frame);
        // an expected echo opens a new window even if the same frame was just heard
        let echo = self.take_echo(frame);
        if let Some(entry) = self.entries.get_mut(&fingerprint).filter(|_| !echo) {
            if (at - entry.first_seen).abs() <= self.window {
                entry.count += 1;
                self.stats.duplicates += 1;
                trace!(code = %frame.code(), count = entry.count, "duplicate reception");
                return Admission::Duplicate {
                    count: entry.count,
                    first_seen: entry.first_seen,
                };
            }
        }
        self.entries.insert(
            fingerprint,
            Entry {
                first_seen: at,
                count: 1,
            },
        );

        let origin = if echo {
            self.stats.echoes += 1;
            Origin::Echo
        } else {
            Origin::Foreign
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.admitted += 1;
        Admission::Admitted { seq, origin }
    }

    /// Register an own transmission so its echo is tagged [`Origin::Echo`].
    pub fn expect_echo(&mut self, frame: &Frame, sent_at: NaiveDateTime) {
        self.echoes.push_back(PendingEcho {
            fingerprint: Fingerprint::of(frame),
            expires: sent_at + self.echo_window,
        });
    }

    /// True if `frame` would be admitted as the echo of an own transmission.
    pub fn awaits_echo(&self, frame: &Frame) -> bool {
        self.echoes
            .iter()
            .any(|echo| echo.expires >= frame.dtm() && echo.fingerprint.matches_echo(frame))
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            tracked: self.entries.len(),
            ..self.stats
        }
    }

    /// Sequence number the next admitted message will get.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    fn take_echo(&mut self, frame: &Frame) -> bool {
        match self
            .echoes
            .iter()
            .position(|echo| echo.fingerprint.matches_echo(frame))
        {
            Some(pos) => {
                self.echoes.remove(pos);
                true
            }
            None => false,
        }
    }

    fn evict(&mut self, at: NaiveDateTime) {
        let newest = match self.newest {
            Some(newest) if newest >= at => newest,
            _ => {
                self.newest = Some(at);
                at
            }
        };
        let window = self.window;
        self.entries
            .retain(|_, entry| newest - entry.first_seen <= window);
        self.echoes.retain(|echo| echo.expires >= newest);
    }
}

impl Default for DedupBuffer {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use ramses_frame::decode_frame;

    use super::*;

    const SYNC: &str = " I --- 01:145038 --:------ 01:145038 1F09 003 FF04B5";

    fn at(ms: i64) -> NaiveDateTime {
        let base: NaiveDateTime = "2024-01-01T12:00:00".parse().unwrap();
        base + TimeDelta::milliseconds(ms)
    }

    fn frame(line: &str, ms: i64) -> Frame {
        decode_frame(line, at(ms)).unwrap()
    }

    #[test]
    fn repeats_inside_window_are_duplicates() {
        let mut dedup = DedupBuffer::default();
        assert_eq!(
            dedup.admit_frame(&frame(SYNC, 0)),
            Admission::Admitted {
                seq: 1,
                origin: Origin::Foreign
            }
        );
        assert_eq!(
            dedup.admit_frame(&frame(SYNC, 120)),
            Admission::Duplicate {
                count: 2,
                first_seen: at(0)
            }
        );
        assert!(matches!(
            dedup.admit_frame(&frame(SYNC, 499)),
            Admission::Duplicate { count: 3, .. }
        ));

        let stats = dedup.stats();
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.duplicates, 2);
    }

    #[test]
    fn same_frame_after_window_is_admitted_again() {
        let mut dedup = DedupBuffer::default();
        assert!(dedup.admit_frame(&frame(SYNC, 0)).is_admitted());
        assert_eq!(
            dedup.admit_frame(&frame(SYNC, 600)),
            Admission::Admitted {
                seq: 2,
                origin: Origin::Foreign
            }
        );
        assert_eq!(dedup.stats().tracked, 1);
    }

    #[test]
    fn different_payload_is_not_a_duplicate() {
        let mut dedup = DedupBuffer::default();
        assert!(dedup.admit_frame(&frame(SYNC, 0)).is_admitted());
        let other = " I --- 01:145038 --:------ 01:145038 1F09 003 FF04B6";
        assert!(dedup.admit_frame(&frame(other, 10)).is_admitted());
    }

    #[test]
    fn verb_does_not_affect_fingerprint() {
        let mut dedup = DedupBuffer::default();
        let rp = "RP --- 01:145038 18:013393 --:------ 30C9 003 0107D0";
        let i = " I --- 01:145038 18:013393 --:------ 30C9 003 0107D0";
        assert!(dedup.admit_frame(&frame(rp, 0)).is_admitted());
        assert!(!dedup.admit_frame(&frame(i, 5)).is_admitted());
    }

    #[test]
    fn late_arrival_within_window_is_still_a_duplicate() {
        let mut dedup = DedupBuffer::default();
        assert!(dedup.admit_frame(&frame(SYNC, 300)).is_admitted());
        assert!(matches!(
            dedup.admit_frame(&frame(SYNC, 100)),
            Admission::Duplicate { count: 2, .. }
        ));
    }

    #[test]
    fn own_transmission_is_tagged_as_echo() {
        let mut dedup = DedupBuffer::default();
        let sent = frame("RQ --- 18:000730 01:145038 --:------ 30C9 001 02", 0);
        dedup.expect_echo(&sent, at(0));

        let echo = frame("RQ --- 18:013393 01:145038 --:------ 30C9 001 02", 40);
        assert_eq!(
            dedup.admit_frame(&echo),
            Admission::Admitted {
                seq: 1,
                origin: Origin::Echo
            }
        );
        assert_eq!(dedup.stats().echoes, 1);

        // consumed: a later identical frame is foreign
        let again = frame("RQ --- 18:013393 01:145038 --:------ 30C9 001 02", 900);
        assert_eq!(
            dedup.admit_frame(&again),
            Admission::Admitted {
                seq: 2,
                origin: Origin::Foreign
            }
        );
    }

    #[test]
    fn echo_of_a_repeated_command_is_not_a_duplicate() {
        let mut dedup = DedupBuffer::default();
        let line = "RQ --- 18:013393 01:145038 --:------ 30C9 001 02";
        let sent = frame("RQ --- 18:000730 01:145038 --:------ 30C9 001 02", 0);

        dedup.expect_echo(&sent, at(0));
        assert!(dedup.awaits_echo(&frame(line, 30)));
        assert!(matches!(
            dedup.admit_frame(&frame(line, 30)),
            Admission::Admitted { origin: Origin::Echo, .. }
        ));

        assert!(!dedup.awaits_echo(&frame(line, 40)));

        // the same request again, well inside the window
        dedup.expect_echo(&sent, at(250));
        assert_eq!(
            dedup.admit_frame(&frame(line, 280)),
            Admission::Admitted {
                seq: 2,
                origin: Origin::Echo
            }
        );
        // a relayed copy of that echo is still a duplicate
        assert!(matches!(
            dedup.admit_frame(&frame(line, 300)),
            Admission::Duplicate { count: 2, .. }
        ));
        assert_eq!(dedup.stats().echoes, 2);
    }

    #[test]
    fn expected_echo_expires() {
        let mut dedup = DedupBuffer::default();
        let sent = frame("RQ --- 18:000730 01:145038 --:------ 30C9 001 02", 0);
        dedup.expect_echo(&sent, at(0));

        assert!(dedup.admit_frame(&frame(SYNC, 1500)).is_admitted());
        let late = frame("RQ --- 18:013393 01:145038 --:------ 30C9 001 02", 1600);
        assert_eq!(
            dedup.admit_frame(&late),
            Admission::Admitted {
                seq: 2,
                origin: Origin::Foreign
            }
        );
    }
}
