//! Single-threaded processing pipeline.
//!
//! ```text
//! line -> decode -> gateway detection -> filter -> dedup -> model
//!                                                    \-> dispatcher correlation
//! ```
//!
//! [`Pipeline`] owns every stage and performs no I/O, so it can replay a
//! captured log or be driven by a test with a synthetic clock. The threaded
//! [`Gateway`](crate::Gateway) runs the same stages behind locks.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDateTime;
use ramses_frame::{Address, DecodeError, FrameConfig};
use ramses_schema::{Command, Message, Registry, SystemLayout};

use crate::config::GatewayConfig;
use crate::dedup::{Admission, DedupBuffer, Origin};
use crate::detect::GatewayDetector;
use crate::diagnostics::{Diagnostic, DiagnosticsSink, TracingSink};
use crate::dispatcher::{DispatchEvent, Dispatcher, RequestId, Transmit};
use crate::error::{ApplyError, DispatchError, Result};
use crate::filter::{DeviceFilter, Rejection};
use crate::model::{AppliedDelta, Model};

/// What became of one input line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Blank or comment-only line.
    Empty,
    Rejected(DecodeError),
    Filtered(Rejection),
    /// Already admitted within the window. A repeated reply can still
    /// complete a command.
    Duplicate {
        count: u32,
        dispatch: Option<DispatchEvent>,
    },
    Admitted(Box<Ingested>),
}

impl LineOutcome {
    pub fn ingested(&self) -> Option<&Ingested> {
        match self {
            LineOutcome::Admitted(ingested) => Some(ingested),
            _ => None,
        }
    }
}

/// An admitted message and its effects.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub message: Message,
    pub seq: u64,
    pub origin: Origin,
    pub delta: AppliedDelta,
    /// Problems applying the message; `delta` holds what did apply.
    pub errors: Vec<ApplyError>,
    pub dispatch: Option<DispatchEvent>,
}

/// Stateless front of the pipeline: decoding, filtering and reporting.
pub(crate) struct Intake {
    registry: Arc<Registry>,
    frame_config: FrameConfig,
    filter: DeviceFilter,
    gateway_id: Address,
    sink: Arc<dyn DiagnosticsSink>,
}

impl Intake {
    pub(crate) fn new(config: &GatewayConfig, registry: Arc<Registry>) -> Self {
        Self {
            registry,
            frame_config: config.frame(),
            filter: DeviceFilter::new(
                config.known_list.iter().copied(),
                config.block_list.iter().copied(),
                config.enforce_known_list,
            ),
            gateway_id: config.gateway_id,
            sink: Arc::new(TracingSink),
        }
    }

    pub(crate) fn set_sink(&mut self, sink: Arc<dyn DiagnosticsSink>) {
        self.sink = sink;
    }

    pub(crate) fn filter_mut(&mut self) -> &mut DeviceFilter {
        &mut self.filter
    }

    /// Decode one line.
    pub(crate) fn decode(
        &self,
        line: &str,
        received_at: NaiveDateTime,
    ) -> std::result::Result<Message, LineOutcome> {
        if is_blank(line) {
            return Err(LineOutcome::Empty);
        }
        self.registry
            .decode_with(line, received_at, &self.frame_config)
            .map_err(|error| {
                self.sink.report(Diagnostic::Decode {
                    line,
                    error: &error,
                });
                LineOutcome::Rejected(error)
            })
    }

    /// Apply the known and block lists to a decoded line.
    pub(crate) fn screen(&self, line: &str, message: &Message) -> std::result::Result<(), LineOutcome> {
        self.filter.check(message.frame()).map_err(|reason| {
            self.sink.report(Diagnostic::Filtered { line, reason });
            LineOutcome::Filtered(reason)
        })
    }

    /// Let `detector` learn from a decoded frame and report what it found.
    pub(crate) fn detect(&self, detector: &mut GatewayDetector, message: &Message, echo: bool) {
        for notice in detector.observe(message.frame(), echo, &self.filter) {
            self.sink.report(Diagnostic::Gateway(notice));
        }
    }

    /// Report apply errors and split the result into what applied and what failed.
    pub(crate) fn settle(
        &self,
        message: &Message,
        result: std::result::Result<AppliedDelta, crate::error::ApplyFailure>,
    ) -> (AppliedDelta, Vec<ApplyError>) {
        match result {
            Ok(delta) => (delta, Vec::new()),
            Err(failure) => {
                for error in &failure.errors {
                    self.sink.report(Diagnostic::Apply { message, error });
                }
                (failure.applied, failure.errors)
            }
        }
    }

    /// Send builder commands from our own gateway id.
    pub(crate) fn address(&self, command: Command) -> Command {
        if command.src() == Address::HGI_DEFAULT && self.gateway_id != Address::HGI_DEFAULT {
            command.with_src(self.gateway_id)
        } else {
            command
        }
    }
}

fn is_blank(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with('#')
}

pub struct Pipeline {
    intake: Intake,
    detector: GatewayDetector,
    dedup: DedupBuffer,
    model: Model,
    dispatcher: Dispatcher,
}

impl Pipeline {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(Registry::with_config(config.registry()));
        Ok(Self {
            intake: Intake::new(config, Arc::clone(&registry)),
            detector: GatewayDetector::new(config),
            dedup: DedupBuffer::new(config.dedup()),
            model: Model::new(config.staleness),
            dispatcher: Dispatcher::with_registry(config.dispatch(), registry),
        })
    }

    /// Report diagnostics to `sink` instead of the log.
    pub fn with_sink(mut self, sink: impl DiagnosticsSink + 'static) -> Self {
        self.intake.set_sink(Arc::new(sink));
        self
    }

    /// Run one line through every stage.
    pub fn process_line(
        &mut self,
        line: &str,
        received_at: NaiveDateTime,
        now: Instant,
    ) -> LineOutcome {
        let message = match self.intake.decode(line, received_at) {
            Ok(message) => message,
            Err(outcome) => return outcome,
        };
        let echo = self.dedup.awaits_echo(message.frame());
        self.intake.detect(&mut self.detector, &message, echo);
        if let Err(outcome) = self.intake.screen(line, &message) {
            return outcome;
        }
        self.process_message(message, now)
    }

    /// Run an already decoded message through dedup, model and dispatcher.
    pub fn process_message(&mut self, message: Message, now: Instant) -> LineOutcome {
        let (seq, origin) = match self.dedup.admit(&message) {
            Admission::Admitted { seq, origin } => (seq, origin),
            Admission::Duplicate { count, .. } => {
                let dispatch = self.dispatcher.on_message(&message, now);
                return LineOutcome::Duplicate { count, dispatch };
            }
        };
        let result = self.model.apply(&message, seq);
        let (delta, errors) = self.intake.settle(&message, result);
        let dispatch = self.dispatcher.on_message(&message, now);
        LineOutcome::Admitted(Box::new(Ingested {
            message,
            seq,
            origin,
            delta,
            errors,
            dispatch,
        }))
    }

    pub fn enqueue(&mut self, command: Command) -> std::result::Result<RequestId, DispatchError> {
        let command = self.intake.address(command);
        self.dispatcher.enqueue(command)
    }

    /// Next frame to write; its echo is expected from `sent_at`.
    pub fn poll_transmit(&mut self, now: Instant, sent_at: NaiveDateTime) -> Option<Transmit> {
        let transmit = self.dispatcher.poll_transmit(now)?;
        self.dedup.expect_echo(&transmit.frame, sent_at);
        Some(transmit)
    }

    pub fn poll_timeouts(&mut self, now: Instant) -> Option<DispatchEvent> {
        self.dispatcher.poll_timeouts(now)
    }

    pub fn cancel(&mut self, id: RequestId) -> std::result::Result<DispatchEvent, DispatchError> {
        self.dispatcher.cancel(id)
    }

    /// Install a layout into the model and add its devices to the known list.
    pub fn seed(&mut self, layout: &SystemLayout) -> AppliedDelta {
        self.intake.filter_mut().extend_known(layout.devices());
        self.model.seed(layout)
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    pub fn dedup(&self) -> &DedupBuffer {
        &self.dedup
    }

    /// The gateway echoing our transmissions, once one has been heard.
    pub fn active_gateway(&self) -> Option<Address> {
        self.detector.active()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use ramses_schema::FieldKind;

    use super::*;
    use crate::diagnostics::CollectingSink;
    use crate::model::EntityId;

    fn at(ms: i64) -> NaiveDateTime {
        let base: NaiveDateTime = "2024-01-01T12:00:00".parse().unwrap();
        base + TimeDelta::milliseconds(ms)
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        let mut pipeline = Pipeline::new(&GatewayConfig::default()).unwrap();
        let now = Instant::now();
        assert_eq!(pipeline.process_line("   ", at(0), now), LineOutcome::Empty);
        assert_eq!(
            pipeline.process_line("# evofw3 0.7.1", at(0), now),
            LineOutcome::Empty
        );
    }

    #[test]
    fn bad_line_is_reported_and_skipped() {
        let sink = CollectingSink::new();
        let mut pipeline = Pipeline::new(&GatewayConfig::default())
            .unwrap()
            .with_sink(sink.clone());
        let now = Instant::now();

        let outcome = pipeline.process_line(
            " I --- 01:145038 --:------ 01:145038 3B00 003 FCC8",
            at(0),
            now,
        );
        assert!(matches!(
            outcome,
            LineOutcome::Rejected(DecodeError::LengthMismatch { .. })
        ));
        assert_eq!(sink.count("length_mismatch"), 1);

        let outcome = pipeline.process_line(
            "RP --- 01:145038 18:013393 --:------ 30C9 003 0107D0",
            at(10),
            now,
        );
        assert_eq!(outcome.ingested().unwrap().seq, 1);
    }

    #[test]
    fn blocked_device_never_reaches_the_model() {
        let config = GatewayConfig {
            block_list: vec!["04:189076".parse().unwrap()],
            ..GatewayConfig::default()
        };
        let mut pipeline = Pipeline::new(&config).unwrap();
        let outcome = pipeline.process_line(
            " I --- 04:189076 --:------ 01:145038 3150 002 0164",
            at(0),
            Instant::now(),
        );
        assert!(matches!(outcome, LineOutcome::Filtered(Rejection::Blocked(_))));
        assert!(pipeline.model().is_empty());
        assert_eq!(pipeline.dedup().next_seq(), 1);
    }

    #[test]
    fn command_round_trip_through_the_pipeline() {
        let config = GatewayConfig {
            gateway_id: "18:013393".parse().unwrap(),
            ..GatewayConfig::default()
        };
        let mut pipeline = Pipeline::new(&config).unwrap();
        let ctl = "01:145038".parse().unwrap();
        let now = Instant::now();

        let id = pipeline.enqueue(Command::get_zone_temp(ctl, 1)).unwrap();
        let tx = pipeline.poll_transmit(now, at(0)).unwrap();
        assert_eq!(tx.line, "RQ --- 18:013393 01:145038 --:------ 30C9 001 01");

        let echo = pipeline.process_line(&tx.line, at(30), now);
        assert_eq!(echo.ingested().unwrap().origin, Origin::Echo);

        let reply = pipeline.process_line(
            "RP --- 01:145038 18:013393 --:------ 30C9 003 010834",
            at(80),
            now,
        );
        let ingested = reply.ingested().unwrap();
        assert!(matches!(
            ingested.dispatch,
            Some(DispatchEvent::Acked { id: acked, .. }) if acked == id
        ));
        assert_eq!(
            pipeline
                .model()
                .query(&EntityId::zone(ctl, 1))
                .unwrap()
                .get(FieldKind::Temperature),
            Some(&ramses_schema::Value::Float(21.0))
        );
    }

    #[test]
    fn echo_reveals_the_active_gateway() {
        let sink = CollectingSink::new();
        let config = GatewayConfig {
            known_list: vec!["01:145038".parse().unwrap()],
            ..GatewayConfig::default()
        };
        let mut pipeline = Pipeline::new(&config).unwrap().with_sink(sink.clone());
        let ctl = "01:145038".parse().unwrap();
        let now = Instant::now();
        assert_eq!(pipeline.active_gateway(), None);

        pipeline.enqueue(Command::get_zone_temp(ctl, 1)).unwrap();
        pipeline.poll_transmit(now, at(0)).unwrap();
        let echo = pipeline.process_line("RQ --- 18:013393 01:145038 --:------ 30C9 001 01", at(30), now);
        assert_eq!(echo.ingested().unwrap().origin, Origin::Echo);
        assert_eq!(pipeline.active_gateway(), Some("18:013393".parse().unwrap()));
        assert_eq!(sink.count("gateway_detected"), 1);
        assert_eq!(sink.count("gateway_not_known"), 1);

        let foreign = "RQ --- 18:200202 01:145038 --:------ 30C9 001 02";
        pipeline.process_line(foreign, at(1000), now);
        pipeline.process_line(foreign, at(5000), now);
        assert_eq!(sink.count("foreign_gateway"), 1);
    }

    #[test]
    fn blocked_gateway_is_reported_before_its_echo_is_dropped() {
        let sink = CollectingSink::new();
        let config = GatewayConfig {
            block_list: vec!["18:013393".parse().unwrap()],
            ..GatewayConfig::default()
        };
        let mut pipeline = Pipeline::new(&config).unwrap().with_sink(sink.clone());
        let ctl = "01:145038".parse().unwrap();
        let now = Instant::now();

        pipeline.enqueue(Command::get_zone_temp(ctl, 1)).unwrap();
        pipeline.poll_transmit(now, at(0)).unwrap();
        let echo = pipeline.process_line("RQ --- 18:013393 01:145038 --:------ 30C9 001 01", at(30), now);
        assert!(matches!(echo, LineOutcome::Filtered(Rejection::Blocked(_))));
        assert_eq!(sink.count("gateway_blocked"), 1);
    }

    #[test]
    fn seeding_extends_known_list() {
        let config = GatewayConfig {
            enforce_known_list: true,
            ..GatewayConfig::default()
        };
        let mut pipeline = Pipeline::new(&config).unwrap();
        let line = " I --- 04:189076 --:------ 01:145038 3150 002 0164";
        assert!(matches!(
            pipeline.process_line(line, at(0), Instant::now()),
            LineOutcome::Filtered(Rejection::Unknown(_))
        ));

        let layout = ramses_schema::LayoutLoader::new()
            .unwrap()
            .parse_str(
                r#"{"systems":[{"controller":"01:145038",
                    "zones":[{"index":1,"actuators":["04:189076"]}]}]}"#,
            )
            .unwrap();
        pipeline.seed(&layout);
        assert!(pipeline
            .process_line(line, at(1000), Instant::now())
            .ingested()
            .is_some());
    }
}
