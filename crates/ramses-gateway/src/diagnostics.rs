//! Reporting of traffic the pipeline could not use.
//!
//! Decode and apply failures are part of normal radio traffic, so they are
//! reported to a sink rather than returned as errors.

use std::sync::{Arc, Mutex};

use ramses_frame::DecodeError;
use ramses_schema::Message;
use tracing::{debug, error, info, warn};

use crate::detect::GatewayNotice;
use crate::error::ApplyError;
use crate::filter::Rejection;

#[derive(Debug, Clone, Copy)]
pub enum Diagnostic<'a> {
    /// A line failed to decode.
    Decode {
        line: &'a str,
        error: &'a DecodeError,
    },
    /// A filter dropped a frame.
    Filtered {
        line: &'a str,
        reason: Rejection,
    },
    /// A message applied only partly, or not at all.
    Apply {
        message: &'a Message,
        error: &'a ApplyError,
    },
    /// Something learned about the gateways on the air.
    Gateway(GatewayNotice),
}

impl Diagnostic<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Diagnostic::Decode { error, .. } => error.kind(),
            Diagnostic::Filtered { .. } => "filtered",
            Diagnostic::Apply {
                error: ApplyError::BindingConflict { .. },
                ..
            } => "binding_conflict",
            Diagnostic::Apply {
                error: ApplyError::SchemaMismatch { .. },
                ..
            } => "schema_mismatch",
            Diagnostic::Gateway(notice) => notice.kind(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Diagnostic::Decode { line, error } => format!("{error}: {line}"),
            Diagnostic::Filtered { line, reason } => format!("{reason}: {line}"),
            Diagnostic::Apply { message, error } => format!("{error}: {}", message.encode()),
            Diagnostic::Gateway(notice) => notice.to_string(),
        }
    }
}

pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic<'_>);
}

/// Logs diagnostics through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn report(&self, diagnostic: Diagnostic<'_>) {
        match diagnostic {
            Diagnostic::Filtered { .. } => {
                debug!(kind = diagnostic.kind(), "{}", diagnostic.describe());
            }
            Diagnostic::Gateway(notice @ GatewayNotice::Detected(_)) => {
                info!(kind = notice.kind(), "{notice}");
            }
            Diagnostic::Gateway(notice) if notice.is_error() => {
                error!(kind = notice.kind(), "{notice}");
            }
            _ => warn!(kind = diagnostic.kind(), "{}", diagnostic.describe()),
        }
    }
}

/// One collected diagnostic, owned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticRecord {
    pub kind: &'static str,
    pub detail: String,
}

/// Keeps every diagnostic in memory. Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    records: Arc<Mutex<Vec<DiagnosticRecord>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DiagnosticRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.records().iter().filter(|r| r.kind == kind).count()
    }
}

impl DiagnosticsSink for CollectingSink {
    fn report(&self, diagnostic: Diagnostic<'_>) {
        if let Ok(mut records) = self.records.lock() {
            records.push(DiagnosticRecord {
                kind: diagnostic.kind(),
                detail: diagnostic.describe(),
            });
        }
    }
}

impl<T: DiagnosticsSink + ?Sized> DiagnosticsSink for Arc<T> {
    fn report(&self, diagnostic: Diagnostic<'_>) {
        (**self).report(diagnostic);
    }
}
