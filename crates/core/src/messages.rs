//! Payloads published on a job channel.
//!
//! Three shapes travel on the channel, always as JSON text:
//!
//! ```text
//! {"iteration": 3, "cost": -1.5}                          progress
//! {"final": true, "description": "...", "result": {...}}  terminal success
//! {"error": "ExecutionError: ..."}                        terminal failure
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One progress report emitted by a running solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub iteration: i64,
    pub cost: f64,
}

/// The single terminal event of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalEvent {
    Success { description: String, result: Value },
    Failure { error: String },
}

/// Anything a worker publishes on a job channel.
#[derive(Debug, Clone, PartialEq)]
pub enum JobMessage {
    Progress(ProgressEvent),
    Final(FinalEvent),
}

impl JobMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final(_))
    }

    /// Render the message in its wire form.
    pub fn to_payload(&self) -> String {
        let value = match self {
            Self::Progress(p) => json!({ "iteration": p.iteration, "cost": p.cost }),
            Self::Final(FinalEvent::Success {
                description,
                result,
            }) => json!({ "final": true, "description": description, "result": result }),
            Self::Final(FinalEvent::Failure { error }) => json!({ "error": error }),
        };
        value.to_string()
    }
}

impl From<ProgressEvent> for JobMessage {
    fn from(event: ProgressEvent) -> Self {
        Self::Progress(event)
    }
}

impl From<FinalEvent> for JobMessage {
    fn from(event: FinalEvent) -> Self {
        Self::Final(event)
    }
}

/// Whether a raw channel payload closes the job's stream.
///
/// A payload is terminal when it carries `"final": true` or a top-level
/// `"error"` key. Payloads that are not JSON objects are never terminal.
pub fn is_terminal_payload(payload: &str) -> bool {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => {
            map.get("final").and_then(Value::as_bool).unwrap_or(false) || map.contains_key("error")
        }
        _ => false,
    }
}
