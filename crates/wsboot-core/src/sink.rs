use serde::{Deserialize, Serialize};

use crate::errors::ErrorPhase;

/// A fatal condition for the presentation layer to show.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub phase: ErrorPhase,
    pub message: String,
}

impl ErrorReport {
    pub fn new(phase: ErrorPhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
        }
    }
}

pub trait ErrorSink: Send + Sync {
    fn report(&self, report: ErrorReport);
}

impl<F> ErrorSink for F
where
    F: Fn(ErrorReport) + Send + Sync,
{
    fn report(&self, report: ErrorReport) {
        self(report)
    }
}

/// Sink that only logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn report(&self, report: ErrorReport) {
        tracing::error!(phase = ?report.phase, message = %report.message, "{}", report.phase.title());
    }
}
