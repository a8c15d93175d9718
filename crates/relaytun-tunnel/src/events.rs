//! Dial outcome events for usage reporting.

use std::fmt;
use std::time::SystemTime;

use tracing::debug;

/// What happened to a dial attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialEventKind {
    Succeeded,
    Failed,
}

impl DialEventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "dial.succeeded",
            Self::Failed => "dial.failed",
        }
    }
}

/// A single dial outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialEvent {
    pub kind: DialEventKind,
    /// Destination, e.g. `host:22@prod` or the auth-server sentinel.
    pub target: String,
    /// Failing stage, for failed dials.
    pub stage: Option<&'static str>,
    /// Filled in with the current time by [`record_event`] when unset.
    pub timestamp: Option<SystemTime>,
}

impl DialEvent {
    pub fn succeeded(target: impl Into<String>) -> Self {
        Self {
            kind: DialEventKind::Succeeded,
            target: target.into(),
            stage: None,
            timestamp: None,
        }
    }

    pub fn failed(target: impl Into<String>, stage: &'static str) -> Self {
        Self {
            kind: DialEventKind::Failed,
            target: target.into(),
            stage: Some(stage),
            timestamp: None,
        }
    }
}

impl fmt::Display for DialEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.target)?;
        if let Some(stage) = self.stage {
            write!(f, " (stage: {stage})")?;
        }
        Ok(())
    }
}

/// Sink for dial events, supplied by the host.
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: DialEvent);
}

/// Stamp and forward `event`, or discard it when no recorder is configured.
pub fn record_event(recorder: Option<&dyn EventRecorder>, mut event: DialEvent) {
    let Some(recorder) = recorder else {
        debug!(event = %event, "Event recorder not initialized, discarding event");
        return;
    };
    if event.timestamp.is_none() {
        event.timestamp = Some(SystemTime::now());
    }
    recorder.record(event);
}
