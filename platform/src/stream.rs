//! Tagged stream events produced by platform SSE endpoints.
//!
//! Every execution stream obeys one ordering contract: an initial `state`
//! event, zero or more progress/step/data events, then exactly one
//! terminal event (`done` or `error`).

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{PlatformError, PlatformResult};

/// Overall status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStatus {
    #[default]
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "completed" | "complete" | "success" => Self::Completed,
            "failed" | "error" => Self::Failed,
            _ => Self::Running,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Status of a single workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "completed" | "complete" | "success" => Self::Completed,
            "failed" | "error" => Self::Failed,
            _ => Self::Running,
        }
    }
}

/// One tagged event from an execution stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Initial (and occasionally repeated) execution state.
    State {
        status: ExecutionStatus,
        total_steps: Option<u32>,
    },
    /// A workflow step changed status.
    Step {
        name: String,
        status: StepStatus,
        output: Option<String>,
    },
    /// A chunk of stdout.
    Data { text: String },
    /// A chunk of stderr.
    Stderr { text: String },
    /// Diagnostic line from the platform itself.
    Log { line: String },
    Progress { completed: u32, total: u32 },
    /// Synthetic marker: the stream was re-established mid-execution.
    Reconnect { attempt: u32 },
    /// Terminal failure.
    Error { message: String },
    /// Terminal success.
    Done { exit_code: Option<i32> },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }
}

/// A stream event plus its envelope fields.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFrame {
    pub event: StreamEvent,
    pub timestamp: Option<DateTime<Utc>>,
    pub execution_id: Option<String>,
    pub step_name: Option<String>,
}

impl StreamFrame {
    pub fn new(event: StreamEvent) -> Self {
        Self {
            event,
            timestamp: None,
            execution_id: None,
            step_name: None,
        }
    }

    #[must_use]
    pub fn with_execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }

    /// Decode a frame from an SSE event type and its JSON data block.
    ///
    /// The data block has already been unwrapped from nested framing by
    /// the SSE layer; `data` is its payload object.
    pub fn decode(event_type: &str, data: &Value) -> PlatformResult<Self> {
        let obj = data.as_object();
        let text_field = |name: &str| -> Option<String> {
            obj.and_then(|o| o.get(name))
                .and_then(Value::as_str)
                .map(String::from)
        };
        let u32_field = |name: &str| -> Option<u32> {
            obj.and_then(|o| o.get(name))
                .and_then(Value::as_u64)
                .map(|v| v as u32)
        };

        // Bare-string data blocks are output chunks with no envelope.
        let payload = || -> String {
            data.as_str()
                .map(String::from)
                .or_else(|| text_field("output"))
                .or_else(|| text_field("text"))
                .or_else(|| text_field("message"))
                .unwrap_or_default()
        };

        let event = match event_type {
            "state" => StreamEvent::State {
                status: ExecutionStatus::parse(&text_field("status").unwrap_or_default()),
                total_steps: u32_field("total_steps"),
            },
            "step" => StreamEvent::Step {
                name: text_field("name")
                    .or_else(|| text_field("step_name"))
                    .unwrap_or_default(),
                status: StepStatus::parse(&text_field("status").unwrap_or_default()),
                output: text_field("output"),
            },
            "data" | "stdout" => StreamEvent::Data { text: payload() },
            "stderr" => StreamEvent::Stderr { text: payload() },
            "log" => StreamEvent::Log { line: payload() },
            "progress" => StreamEvent::Progress {
                completed: u32_field("completed").unwrap_or(0),
                total: u32_field("total").unwrap_or(0),
            },
            "reconnect" => StreamEvent::Reconnect {
                attempt: u32_field("attempt").unwrap_or(1),
            },
            "error" => StreamEvent::Error { message: payload() },
            "done" | "complete" => StreamEvent::Done {
                exit_code: obj
                    .and_then(|o| o.get("exit_code"))
                    .and_then(Value::as_i64)
                    .map(|v| v as i32),
            },
            other => {
                return Err(PlatformError::EventDecode(format!(
                    "unknown event type '{other}'"
                )))
            }
        };

        let timestamp = text_field("timestamp").and_then(|t| {
            DateTime::parse_from_rfc3339(&t)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        });

        Ok(Self {
            event,
            timestamp,
            execution_id: text_field("execution_id"),
            step_name: text_field("step_name").or_else(|| text_field("step")),
        })
    }
}

/// Reduced per-execution state, updated as frames arrive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionState {
    pub execution_id: Option<String>,
    pub status: ExecutionStatus,
    pub total_steps: u32,
    pub completed_steps: u32,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl ExecutionState {
    /// Fold one frame into the state record.
    pub fn observe(&mut self, frame: &StreamFrame) {
        if let Some(id) = &frame.execution_id {
            self.execution_id = Some(id.clone());
        }
        match &frame.event {
            StreamEvent::State {
                status,
                total_steps,
            } => {
                self.status = *status;
                if let Some(total) = total_steps {
                    self.total_steps = self.total_steps.max(*total);
                }
            }
            StreamEvent::Step { status, .. } => {
                if *status == StepStatus::Completed {
                    self.completed_steps += 1;
                }
                if *status == StepStatus::Failed {
                    self.status = ExecutionStatus::Failed;
                }
            }
            StreamEvent::Progress { completed, total } => {
                self.completed_steps = self.completed_steps.max(*completed);
                self.total_steps = self.total_steps.max(*total);
            }
            StreamEvent::Reconnect { .. } => self.retry_count += 1,
            StreamEvent::Error { message } => {
                self.status = ExecutionStatus::Failed;
                self.last_error = Some(message.clone());
            }
            StreamEvent::Done { .. } => self.status = ExecutionStatus::Completed,
            StreamEvent::Data { .. } | StreamEvent::Stderr { .. } | StreamEvent::Log { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decode_state() {
        let frame = StreamFrame::decode(
            "state",
            &json!({"status": "running", "execution_id": "ex-1", "total_steps": 5}),
        )
        .unwrap();
        assert_eq!(
            frame.event,
            StreamEvent::State {
                status: ExecutionStatus::Running,
                total_steps: Some(5)
            }
        );
        assert_eq!(frame.execution_id.as_deref(), Some("ex-1"));
    }

    #[test]
    fn test_decode_bare_string_data() {
        let frame = StreamFrame::decode("data", &json!("hello\n")).unwrap();
        assert_eq!(
            frame.event,
            StreamEvent::Data {
                text: "hello\n".to_string()
            }
        );
    }

    #[test]
    fn test_decode_unknown_type() {
        assert!(StreamFrame::decode("mystery", &json!({})).is_err());
    }

    #[test]
    fn test_state_fold_counts_steps() {
        let mut state = ExecutionState::default();
        state.observe(&StreamFrame::decode("state", &json!({"status":"running","total_steps":3})).unwrap());
        state.observe(
            &StreamFrame::decode("step", &json!({"name":"build","status":"completed"})).unwrap(),
        );
        state.observe(
            &StreamFrame::decode("step", &json!({"name":"test","status":"completed"})).unwrap(),
        );
        state.observe(&StreamFrame::decode("done", &json!({"exit_code":0})).unwrap());

        assert_eq!(state.total_steps, 3);
        assert_eq!(state.completed_steps, 2);
        assert_eq!(state.status, ExecutionStatus::Completed);
    }

    #[test]
    fn test_reconnect_increments_retry() {
        let mut state = ExecutionState::default();
        state.observe(&StreamFrame::new(StreamEvent::Reconnect { attempt: 1 }));
        state.observe(&StreamFrame::new(StreamEvent::Reconnect { attempt: 2 }));
        assert_eq!(state.retry_count, 2);
    }

    #[test]
    fn test_terminal_detection() {
        assert!(StreamEvent::Done { exit_code: None }.is_terminal());
        assert!(StreamEvent::Error {
            message: "boom".to_string()
        }
        .is_terminal());
        assert!(!StreamEvent::Data {
            text: String::new()
        }
        .is_terminal());
    }
}
