//! Threaded gateway runtime.
//!
//! A reader thread pulls lines from the transport and runs them through the
//! pipeline; a writer thread drains the dispatcher queue, pacing frames and
//! sleeping until the dispatcher's next deadline. The model sits behind a
//! `RwLock` so queries never wait on each other; dedup, gateway detection and
//! dispatcher are each behind a `Mutex`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{
    Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use ramses_frame::Address;
use ramses_schema::{Command, Message, Registry, SystemLayout};
use ramses_transport::{GatewayStream, LineReader, LineSink, LineSource, LineWriter, TransportError};
use tracing::{debug, info, trace, warn};

use crate::binding::{BindSession, BindStep, Binding};
use crate::config::GatewayConfig;
use crate::dedup::{Admission, DedupBuffer, DedupStats};
use crate::detect::GatewayDetector;
use crate::dispatcher::{DispatchEvent, Dispatcher, RequestId};
use crate::error::{BindError, DispatchError, GatewayError, Result};
use crate::model::{AppliedDelta, EntityId, Liveness, Model, Snapshot};
use crate::pipeline::Intake;
use crate::subscription::{Filter, Subscribers, Subscription};

/// Longest the writer sleeps with nothing scheduled.
const IDLE_WAIT: Duration = Duration::from_millis(500);

/// Final result of a command: the reply (if one was expected) or the failure.
pub type CommandResult = std::result::Result<Option<Message>, DispatchError>;

struct Shared {
    intake: RwLock<Intake>,
    detector: Mutex<GatewayDetector>,
    dedup: Mutex<DedupBuffer>,
    model: RwLock<Model>,
    dispatcher: Mutex<Dispatcher>,
    /// Signalled when the dispatcher has new work; paired with `dispatcher`.
    wake: Condvar,
    waiters: Mutex<HashMap<RequestId, SyncSender<CommandResult>>>,
    subscribers: Subscribers,
    /// Raw admitted messages, for binding sessions.
    taps: Mutex<Vec<Sender<Message>>>,
    running: AtomicBool,
    fault: Mutex<Option<TransportError>>,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn ingest(&self, line: &str, received_at: NaiveDateTime) {
        let intake = read(&self.intake);
        let Ok(message) = intake.decode(line, received_at) else {
            return;
        };
        let echo = lock(&self.dedup).awaits_echo(message.frame());
        intake.detect(&mut lock(&self.detector), &message, echo);
        if intake.screen(line, &message).is_err() {
            return;
        }
        drop(intake);

        let admission = lock(&self.dedup).admit(&message);
        if let Admission::Admitted { seq, origin } = admission {
            trace!(seq, ?origin, code = %message.code(), "admitted");
            let result = write(&self.model).apply(&message, seq);
            let (delta, _) = read(&self.intake).settle(&message, result);
            self.subscribers.publish(&delta.changes);
            lock(&self.taps).retain(|tap| tap.send(message.clone()).is_ok());
        }

        // duplicates are correlated too, but never reach the model
        let event = lock(&self.dispatcher).on_message(&message, Instant::now());
        if let Some(event) = event {
            self.deliver(event);
            self.wake.notify_all();
        }
    }

    /// Hand a terminal outcome to whoever is waiting on the command.
    fn deliver(&self, event: DispatchEvent) {
        let (id, result) = match event {
            DispatchEvent::Acked { id, reply } => (id, Ok(reply)),
            DispatchEvent::Failed { id, error } => (id, Err(error)),
            DispatchEvent::Retrying { id, attempt } => {
                debug!(id, attempt, "retrying command");
                return;
            }
        };
        if let Some(waiter) = lock(&self.waiters).remove(&id) {
            // the handle may already be gone
            let _ = waiter.send(result);
        }
    }

    fn fail(&self, err: TransportError) {
        warn!(error = %err, "transport failed, stopping gateway");
        lock(&self.fault).get_or_insert(err);
        self.stop();
    }

    fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let events = lock(&self.dispatcher).shutdown();
        for event in events {
            self.deliver(event);
        }
        self.wake.notify_all();
        debug!(subscribers = self.subscribers.len(), "closing subscriptions");
        self.subscribers.close();
        lock(&self.taps).clear();
    }
}

/// What is left after the gateway stops.
#[derive(Debug)]
pub struct Stopped<R> {
    /// The line source, with any partially read line still buffered.
    pub source: R,
    /// The transport error that stopped the gateway, if any.
    pub fault: Option<TransportError>,
}

/// A running gateway over a line source and sink.
pub struct Gateway<R> {
    shared: Arc<Shared>,
    reader: Option<JoinHandle<R>>,
    writer: Option<JoinHandle<()>>,
}

impl Gateway<LineReader<GatewayStream>> {
    /// Open a serial device or `host:port` bridge and start the gateway on it.
    pub fn open(target: &str, config: &GatewayConfig) -> Result<Self> {
        let stream = GatewayStream::open(target)?;
        stream.set_read_timeout(Some(config.poll_interval))?;
        let writer = LineWriter::new(stream.try_clone()?);
        info!(gateway = target, "gateway opened");
        Self::start(LineReader::new(stream), writer, config)
    }
}

impl<R: LineSource + Send + 'static> Gateway<R> {
    /// Start the reader and writer threads.
    ///
    /// `source` should return [`TransportError::Timeout`] periodically when
    /// idle, or shutdown waits for the next line.
    pub fn start<W: LineSink + Send + 'static>(
        source: R,
        sink: W,
        config: &GatewayConfig,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(Registry::with_config(config.registry()));
        let shared = Arc::new(Shared {
            intake: RwLock::new(Intake::new(config, Arc::clone(&registry))),
            detector: Mutex::new(GatewayDetector::new(config)),
            dedup: Mutex::new(DedupBuffer::new(config.dedup())),
            model: RwLock::new(Model::new(config.staleness)),
            dispatcher: Mutex::new(Dispatcher::with_registry(config.dispatch(), registry)),
            wake: Condvar::new(),
            waiters: Mutex::new(HashMap::new()),
            subscribers: Subscribers::default(),
            taps: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
            fault: Mutex::new(None),
        });

        let writer_shared = Arc::clone(&shared);
        let writer = thread::Builder::new()
            .name("ramses-writer".into())
            .spawn(move || write_loop(&writer_shared, sink))
            .map_err(|err| GatewayError::Thread(err.to_string()))?;

        let reader_shared = Arc::clone(&shared);
        let reader = thread::Builder::new()
            .name("ramses-reader".into())
            .spawn(move || read_loop(&reader_shared, source));
        let reader = match reader {
            Ok(handle) => handle,
            Err(err) => {
                shared.stop();
                let _ = writer.join();
                return Err(GatewayError::Thread(err.to_string()));
            }
        };

        Ok(Self {
            shared,
            reader: Some(reader),
            writer: Some(writer),
        })
    }

    /// Queue a command. The handle resolves when it completes or fails.
    pub fn enqueue(&self, command: Command) -> std::result::Result<CommandHandle, DispatchError> {
        if !self.shared.is_running() {
            return Err(DispatchError::Shutdown);
        }
        let command = read(&self.shared.intake).address(command);
        let (tx, rx) = mpsc::sync_channel(1);

        let mut dispatcher = lock(&self.shared.dispatcher);
        let id = dispatcher.enqueue(command)?;
        lock(&self.shared.waiters).insert(id, tx);
        drop(dispatcher);
        self.shared.wake.notify_all();

        Ok(CommandHandle {
            id,
            rx,
            shared: Arc::downgrade(&self.shared),
        })
    }

    /// Queue a command and block until it completes.
    pub fn send(&self, command: Command) -> CommandResult {
        self.enqueue(command)?.wait()
    }

    /// Run an RF binding handshake to completion, blocking the caller.
    ///
    /// Bind frames go through the dispatcher like any command; the session
    /// sees every admitted message, our own echoes included.
    pub fn bind(&self, mut session: BindSession) -> std::result::Result<Binding, BindError> {
        if !self.shared.is_running() {
            return Err(BindError::Shutdown);
        }
        let (tx, rx) = mpsc::channel();
        lock(&self.shared.taps).push(tx);

        let mut step = session.start(Instant::now());
        loop {
            match step.take() {
                Some(BindStep::Send(command)) => match self.enqueue(command) {
                    Ok(_) => {}
                    Err(DispatchError::Shutdown) => return Err(BindError::Shutdown),
                    Err(err) => warn!(error = %err, "bind frame refused"),
                },
                Some(BindStep::Bound(binding)) => return Ok(binding),
                Some(BindStep::Failed(err)) => return Err(err),
                None => {}
            }

            let wait = session
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_WAIT);
            step = match rx.recv_timeout(wait) {
                Ok(message) => {
                    let now = Instant::now();
                    session
                        .on_message(&message, now)
                        .or_else(|| session.poll(now))
                }
                Err(RecvTimeoutError::Timeout) => session.poll(Instant::now()),
                Err(RecvTimeoutError::Disconnected) => return Err(BindError::Shutdown),
            };
        }
    }

    pub fn subscribe(&self, filter: Filter) -> Subscription {
        self.shared.subscribers.add(filter)
    }

    pub fn query(&self, id: &EntityId) -> Option<Snapshot> {
        read(&self.shared.model).query(id)
    }

    pub fn query_address(&self, address: Address) -> Option<Snapshot> {
        read(&self.shared.model).query_address(address)
    }

    pub fn liveness(&self, id: &EntityId) -> Liveness {
        read(&self.shared.model).liveness(id, Local::now().naive_local())
    }

    pub fn systems(&self) -> Vec<Address> {
        read(&self.shared.model).systems()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        read(&self.shared.model).snapshots()
    }

    /// Install a known layout; its devices join the known list.
    pub fn seed(&self, layout: &SystemLayout) -> AppliedDelta {
        write(&self.shared.intake)
            .filter_mut()
            .extend_known(layout.devices());
        let delta = write(&self.shared.model).seed(layout);
        self.shared.subscribers.publish(&delta.changes);
        delta
    }

    pub fn reset_binding(&self, device: Address) -> bool {
        write(&self.shared.model).reset_binding(device)
    }

    /// The gateway echoing our transmissions, once one has been heard.
    pub fn active_gateway(&self) -> Option<Address> {
        lock(&self.shared.detector).active()
    }

    pub fn dedup_stats(&self) -> DedupStats {
        lock(&self.shared.dedup).stats()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Stop both threads, failing pending commands, and return the source.
    pub fn shutdown(mut self) -> Result<Stopped<R>> {
        self.shared.stop();
        self.join_workers()
    }

    /// Wait until the transport ends on its own, then stop.
    pub fn join(mut self) -> Result<Stopped<R>> {
        let source = self.join_reader()?;
        self.shared.stop();
        self.join_writer()?;
        Ok(Stopped {
            source,
            fault: lock(&self.shared.fault).take(),
        })
    }

    fn join_workers(&mut self) -> Result<Stopped<R>> {
        self.join_writer()?;
        let source = self.join_reader()?;
        Ok(Stopped {
            source,
            fault: lock(&self.shared.fault).take(),
        })
    }

    fn join_reader(&mut self) -> Result<R> {
        let handle = self
            .reader
            .take()
            .ok_or_else(|| GatewayError::Thread("reader already joined".into()))?;
        handle
            .join()
            .map_err(|_| GatewayError::Thread("reader thread panicked".into()))
    }

    fn join_writer(&mut self) -> Result<()> {
        match self.writer.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| GatewayError::Thread("writer thread panicked".into())),
            None => Ok(()),
        }
    }
}

impl<R> Drop for Gateway<R> {
    fn drop(&mut self) {
        if self.reader.is_some() || self.writer.is_some() {
            self.shared.stop();
        }
    }
}

/// Pending result of a queued command.
#[derive(Debug)]
pub struct CommandHandle {
    id: RequestId,
    rx: Receiver<CommandResult>,
    shared: Weak<Shared>,
}

impl CommandHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Block until the command completes or fails.
    pub fn wait(self) -> CommandResult {
        self.rx.recv().unwrap_or(Err(DispatchError::Shutdown))
    }

    /// Block for at most `timeout`; `None` if the command is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CommandResult> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(DispatchError::Shutdown)),
        }
    }

    /// Withdraw the command. Waiters see [`DispatchError::Cancelled`].
    pub fn cancel(&self) -> std::result::Result<(), DispatchError> {
        let shared = self.shared.upgrade().ok_or(DispatchError::Shutdown)?;
        let event = lock(&shared.dispatcher).cancel(self.id)?;
        shared.deliver(event);
        shared.wake.notify_all();
        Ok(())
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn read_loop<R: LineSource>(shared: &Shared, mut source: R) -> R {
    while shared.is_running() {
        match source.read_line() {
            Ok(line) => shared.ingest(&line, Local::now().naive_local()),
            Err(err) if err.is_timeout() => continue,
            Err(err) => {
                shared.fail(err);
                break;
            }
        }
    }
    debug!("reader stopped");
    source
}

fn write_loop<W: LineSink>(shared: &Shared, mut sink: W) {
    let mut dispatcher = lock(&shared.dispatcher);
    while shared.is_running() {
        let now = Instant::now();
        if let Some(event) = dispatcher.poll_timeouts(now) {
            shared.deliver(event);
        }

        if let Some(transmit) = dispatcher.poll_transmit(now) {
            drop(dispatcher);
            lock(&shared.dedup).expect_echo(&transmit.frame, Local::now().naive_local());
            trace!(id = transmit.id, line = %transmit.line, "writing");
            if let Err(err) = sink.write_line(&transmit.line) {
                shared.fail(err);
                return;
            }
            dispatcher = lock(&shared.dispatcher);
            continue;
        }

        let wait = dispatcher
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
            .unwrap_or(IDLE_WAIT)
            .max(Duration::from_millis(1));
        dispatcher = shared
            .wake
            .wait_timeout(dispatcher, wait)
            .map(|(guard, _)| guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner().0);
    }
    debug!("writer stopped");
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
