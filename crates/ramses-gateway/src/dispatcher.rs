//! Outbound command scheduling.
//!
//! The dispatcher is a state machine with no I/O and no clock of its own:
//! callers feed it the current [`Instant`] and the messages they receive,
//! and poll it for the next frame to transmit. One command is in flight at a
//! time. A command is sent, waits for its own echo, then for its reply; a
//! missed deadline puts it back at the front of its priority class after a
//! backoff delay until its retry budget runs out.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use ramses_frame::Frame;
use ramses_schema::{address_matches, Command, Message, Priority, Registry};
use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::error::DispatchError;

pub type RequestId = u64;

const PRIORITIES: [Priority; 3] = [Priority::High, Priority::Default, Priority::Low];
const FINISHED_HISTORY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Queued,
    Sent,
    AwaitingAck,
    Acked,
    Failed,
}

/// A frame the caller should write to the gateway now.
#[derive(Debug, Clone, PartialEq)]
pub struct Transmit {
    pub id: RequestId,
    pub frame: Frame,
    pub line: String,
    /// 1 for the first transmission.
    pub attempt: u32,
}

/// Progress reported by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// Completed; `reply` is `None` for commands that expect no reply.
    Acked {
        id: RequestId,
        reply: Option<Message>,
    },
    /// A deadline passed and the command was requeued.
    Retrying { id: RequestId, attempt: u32 },
    Failed { id: RequestId, error: DispatchError },
}

impl DispatchEvent {
    pub fn id(&self) -> RequestId {
        match self {
            DispatchEvent::Acked { id, .. }
            | DispatchEvent::Retrying { id, .. }
            | DispatchEvent::Failed { id, .. } => *id,
        }
    }

    /// True for outcomes that end the command.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DispatchEvent::Retrying { .. })
    }
}

#[derive(Debug)]
struct Pending {
    id: RequestId,
    command: Command,
    retries_left: u8,
    attempts: u32,
    /// Queued commands are not sent before this.
    not_before: Option<Instant>,
}

#[derive(Debug)]
struct InFlight {
    pending: Pending,
    state: CommandState,
    deadline: Instant,
}

#[derive(Debug)]
pub struct Dispatcher {
    config: DispatchConfig,
    registry: Arc<Registry>,
    queues: HashMap<Priority, VecDeque<Pending>>,
    in_flight: Option<InFlight>,
    last_transmit: Option<Instant>,
    next_id: RequestId,
    finished: VecDeque<(RequestId, CommandState)>,
    shut_down: bool,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self::with_registry(config, Arc::new(Registry::new()))
    }

    /// Dispatcher validating commands against `registry`.
    pub fn with_registry(config: DispatchConfig, registry: Arc<Registry>) -> Self {
        Self {
            config,
            registry,
            queues: PRIORITIES
                .iter()
                .map(|priority| (*priority, VecDeque::new()))
                .collect(),
            in_flight: None,
            last_transmit: None,
            next_id: 1,
            finished: VecDeque::new(),
            shut_down: false,
        }
    }

    /// Validate and queue a command.
    pub fn enqueue(&mut self, command: Command) -> Result<RequestId, DispatchError> {
        if self.shut_down {
            return Err(DispatchError::Shutdown);
        }
        self.registry
            .validate(command.frame())
            .map_err(|err| DispatchError::Invalid(err.to_string()))?;

        let id = self.next_id;
        self.next_id += 1;
        let retries_left = command.retries().unwrap_or(self.config.max_retries);
        debug!(id, command = %command, "command queued");
        self.queue(command.priority()).push_back(Pending {
            id,
            command,
            retries_left,
            attempts: 0,
            not_before: None,
        });
        Ok(id)
    }

    /// Next frame to send, if the line is free and pacing allows it.
    pub fn poll_transmit(&mut self, now: Instant) -> Option<Transmit> {
        if self.in_flight.is_some() || !self.gap_elapsed(now) {
            return None;
        }
        let mut pending = self.take_ready(now)?;
        pending.attempts += 1;
        pending.not_before = None;

        let transmit = Transmit {
            id: pending.id,
            frame: pending.command.frame().clone(),
            line: pending.command.to_line(),
            attempt: pending.attempts,
        };
        debug!(id = transmit.id, attempt = transmit.attempt, "transmitting");
        self.last_transmit = Some(now);
        self.in_flight = Some(InFlight {
            pending,
            state: CommandState::Sent,
            deadline: now + self.config.echo_timeout,
        });
        Some(transmit)
    }

    /// Offer a received message for correlation with the command in flight,
    /// or with a command waiting out its backoff after a missed reply.
    pub fn on_message(&mut self, message: &Message, now: Instant) -> Option<DispatchEvent> {
        if self.in_flight.is_none() {
            return self.complete_requeued(message);
        }
        let flight = self.in_flight.as_mut()?;
        let command = &flight.pending.command;

        if let Some(reply) = command.expected_reply() {
            if reply.matches(message.frame()) {
                return self.complete(Some(message.clone()));
            }
        }

        if flight.state == CommandState::Sent && is_echo(command.frame(), message.frame()) {
            if command.expects_reply() {
                flight.state = CommandState::AwaitingAck;
                flight.deadline = now + self.config.reply_timeout;
                debug!(id = flight.pending.id, "echo received, awaiting reply");
                return None;
            }
            return self.complete(None);
        }
        self.complete_requeued(message)
    }

    /// Expire the command in flight if its deadline has passed.
    pub fn poll_timeouts(&mut self, now: Instant) -> Option<DispatchEvent> {
        let expired = self
            .in_flight
            .as_ref()
            .is_some_and(|flight| now >= flight.deadline);
        if !expired {
            return None;
        }
        let flight = self.in_flight.take()?;
        let mut pending = flight.pending;
        let id = pending.id;

        if pending.retries_left == 0 {
            warn!(id, attempts = pending.attempts, "command exhausted its retries");
            self.record(id, CommandState::Failed);
            return Some(DispatchEvent::Failed {
                id,
                error: DispatchError::Exhausted {
                    attempts: pending.attempts,
                },
            });
        }

        pending.retries_left -= 1;
        pending.not_before = Some(now + self.config.backoff.delay(pending.attempts));
        let attempt = pending.attempts + 1;
        debug!(id, attempt, state = ?flight.state, "command timed out, requeued");
        let priority = pending.command.priority();
        self.queue(priority).push_front(pending);
        Some(DispatchEvent::Retrying { id, attempt })
    }

    /// Withdraw a command, queued or in flight.
    pub fn cancel(&mut self, id: RequestId) -> Result<DispatchEvent, DispatchError> {
        let in_flight = self
            .in_flight
            .as_ref()
            .is_some_and(|flight| flight.pending.id == id);
        let found = if in_flight {
            self.in_flight = None;
            true
        } else {
            self.queues.values_mut().any(|queue| {
                let before = queue.len();
                queue.retain(|pending| pending.id != id);
                queue.len() != before
            })
        };
        if !found {
            return Err(DispatchError::UnknownRequest(id));
        }
        debug!(id, "command cancelled");
        self.record(id, CommandState::Failed);
        Ok(DispatchEvent::Failed {
            id,
            error: DispatchError::Cancelled,
        })
    }

    /// Fail everything pending and refuse further commands.
    pub fn shutdown(&mut self) -> Vec<DispatchEvent> {
        self.shut_down = true;
        let mut ids: Vec<RequestId> = self.in_flight.take().map(|f| f.pending.id).into_iter().collect();
        for priority in PRIORITIES {
            ids.extend(self.queue(priority).drain(..).map(|pending| pending.id));
        }
        ids.into_iter()
            .map(|id| {
                self.record(id, CommandState::Failed);
                DispatchEvent::Failed {
                    id,
                    error: DispatchError::Shutdown,
                }
            })
            .collect()
    }

    /// Earliest instant at which polling could make progress.
    pub fn next_deadline(&self) -> Option<Instant> {
        if let Some(flight) = &self.in_flight {
            return Some(flight.deadline);
        }
        let earliest = self
            .queues
            .values()
            .flat_map(|queue| queue.iter())
            .map(|pending| pending.not_before)
            .min()?;
        let gap = self.last_transmit.map(|last| last + self.config.min_gap);
        match (earliest, gap) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b).or(Some(Instant::now())),
        }
    }

    pub fn state(&self, id: RequestId) -> Option<CommandState> {
        if let Some(flight) = self.in_flight.as_ref().filter(|f| f.pending.id == id) {
            return Some(flight.state);
        }
        let queued = self
            .queues
            .values()
            .flat_map(|queue| queue.iter())
            .any(|pending| pending.id == id);
        if queued {
            return Some(CommandState::Queued);
        }
        self.finished
            .iter()
            .find(|(finished, _)| *finished == id)
            .map(|(_, state)| *state)
    }

    /// Commands queued or in flight.
    pub fn pending(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum::<usize>() + usize::from(self.in_flight.is_some())
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn complete(&mut self, reply: Option<Message>) -> Option<DispatchEvent> {
        let flight = self.in_flight.take()?;
        let id = flight.pending.id;
        debug!(id, attempts = flight.pending.attempts, "command acknowledged");
        self.record(id, CommandState::Acked);
        Some(DispatchEvent::Acked { id, reply })
    }

    /// A late reply to a command that was already sent at least once.
    fn complete_requeued(&mut self, message: &Message) -> Option<DispatchEvent> {
        for priority in PRIORITIES {
            let queue = self.queue(priority);
            let found = queue.iter().position(|pending| {
                pending.attempts > 0
                    && pending
                        .command
                        .expected_reply()
                        .is_some_and(|reply| reply.matches(message.frame()))
            });
            let Some(pending) = found.and_then(|pos| queue.remove(pos)) else {
                continue;
            };
            debug!(id = pending.id, attempts = pending.attempts, "late reply for requeued command");
            self.record(pending.id, CommandState::Acked);
            return Some(DispatchEvent::Acked {
                id: pending.id,
                reply: Some(message.clone()),
            });
        }
        None
    }

    fn gap_elapsed(&self, now: Instant) -> bool {
        self.last_transmit
            .is_none_or(|last| now >= last + self.config.min_gap)
    }

    /// First sendable command, highest class first, FIFO within a class.
    fn take_ready(&mut self, now: Instant) -> Option<Pending> {
        for priority in PRIORITIES {
            let queue = self.queue(priority);
            let ready = queue
                .iter()
                .position(|pending| pending.not_before.is_none_or(|at| now >= at));
            if let Some(pos) = ready {
                return queue.remove(pos);
            }
        }
        None
    }

    fn queue(&mut self, priority: Priority) -> &mut VecDeque<Pending> {
        self.queues.entry(priority).or_default()
    }

    fn record(&mut self, id: RequestId, state: CommandState) {
        if self.finished.len() == FINISHED_HISTORY {
            self.finished.pop_front();
        }
        self.finished.push_back((id, state));
    }
}

/// The gateway's echo of `sent`: same frame, with the placeholder source
/// replaced by the gateway's own id.
fn is_echo(sent: &Frame, heard: &Frame) -> bool {
    sent.verb() == heard.verb()
        && sent.code() == heard.code()
        && sent.dst() == heard.dst()
        && sent.payload() == heard.payload()
        && address_matches(sent.src(), heard.src())
}
