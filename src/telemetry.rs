use std::fmt;
use std::time::Duration;

/// Named points of interest in the worker loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Allocate,
    AllocateFail,
    Evaluate,
    Save,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Allocate => "allocate.client.evaluator",
            Self::AllocateFail => "allocate_fail.client.evaluator",
            Self::Evaluate => "evaluate.client.evaluator",
            Self::Save => "save.client.evaluator",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

impl Outcome {
    pub fn from_result<T, E: fmt::Display>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => Self::Failure(e.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub evaluation_id: Option<u64>,
    pub elapsed: Duration,
    pub outcome: Outcome,
}

/// Sink for worker events
pub trait Telemetry: Send + Sync {
    fn publish(&self, event: Event);
}

/// Writes every event to the log
#[derive(Debug, Default)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn publish(&self, event: Event) {
        let id = event
            .evaluation_id
            .map_or_else(String::new, |id| format!(" evaluation={id}"));
        let elapsed_ms = event.elapsed.as_millis();

        match &event.outcome {
            Outcome::Success => log::info!("{}{id} elapsed={elapsed_ms}ms", event.kind),
            Outcome::Failure(reason) => {
                log::warn!("{}{id} elapsed={elapsed_ms}ms failed: {reason}", event.kind)
            }
        }
    }
}
