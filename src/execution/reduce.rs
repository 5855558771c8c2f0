//! Stream reduction and result rendering.
//!
//! The reducer folds stream frames into an output buffer plus the
//! per-execution state record, preserving arrival order exactly. Stdout
//! is never truncated; step-output echoes are clipped to a small
//! threshold.

use automcp_platform::{ExecutionState, ExecutionStatus, StepStatus, StreamEvent, StreamFrame};

/// Step-output echoes longer than this are clipped with an ellipsis.
pub const STEP_ECHO_LIMIT: usize = 200;

pub fn truncate_echo(text: &str) -> String {
    if text.chars().count() <= STEP_ECHO_LIMIT {
        return text.to_string();
    }
    let clipped: String = text.chars().take(STEP_ECHO_LIMIT).collect();
    format!("{clipped}…")
}

/// Identity of the execution, for the rendered header.
#[derive(Debug, Clone)]
pub struct RenderMeta {
    pub title: String,
    pub runner: String,
}

#[derive(Debug, Default)]
pub struct StreamReducer {
    state: ExecutionState,
    /// Concatenated stdout, byte-exact in arrival order.
    stdout: String,
    /// Interleaved human-readable body: stdout, marked stderr, step notes.
    body: String,
}

impl StreamReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Fold one frame into the buffers and the state record.
    pub fn handle(&mut self, frame: &StreamFrame) {
        self.state.observe(frame);
        match &frame.event {
            StreamEvent::Data { text } => {
                self.stdout.push_str(text);
                self.body.push_str(text);
            }
            StreamEvent::Stderr { text } => {
                for line in text.lines() {
                    self.body.push_str("[stderr] ");
                    self.body.push_str(line);
                    self.body.push('\n');
                }
            }
            StreamEvent::Log { line } => {
                self.body.push_str("[log] ");
                self.body.push_str(line);
                self.body.push('\n');
            }
            StreamEvent::Step {
                name,
                status,
                output,
            } => {
                let marker = match status {
                    StepStatus::Running => "▸",
                    StepStatus::Completed => "✔",
                    StepStatus::Failed => "✘",
                };
                self.body.push_str(&format!("{marker} Step: {name}\n"));
                if let Some(output) = output {
                    if !output.is_empty() {
                        self.body.push_str(&truncate_echo(output));
                        self.body.push('\n');
                    }
                }
            }
            StreamEvent::Reconnect { attempt } => {
                self.body
                    .push_str(&format!("[reconnected, attempt {attempt}]\n"));
            }
            StreamEvent::Progress { completed, total } => {
                self.body.push_str(&format!("[{completed}/{total}]\n"));
            }
            StreamEvent::State { .. } => {}
            StreamEvent::Error { message } => {
                self.body.push_str(&format!("[error] {message}\n"));
            }
            StreamEvent::Done { .. } => {}
        }
    }

    /// Render the final human-readable result.
    pub fn render(&self, meta: &RenderMeta) -> String {
        let mut out = String::new();
        out.push_str(&format!("## {}\n", meta.title));
        out.push_str(&format!("Runner: {}\n", meta.runner));
        if self.state.total_steps > 0 {
            out.push_str(&format!(
                "Progress: {}/{} steps\n",
                self.state.completed_steps, self.state.total_steps
            ));
        }
        out.push('\n');

        if !self.body.is_empty() {
            out.push_str(&self.body);
            if !self.body.ends_with('\n') {
                out.push('\n');
            }
        }

        out.push_str("---\n");
        match self.state.status {
            ExecutionStatus::Failed => {
                let reason = self.state.last_error.as_deref().unwrap_or("unknown error");
                out.push_str(&format!("✘ Failed: {reason}\n"));
            }
            _ => out.push_str("✔ Completed successfully\n"),
        }
        if self.state.total_steps > 0 {
            out.push_str(&format!(
                "Steps completed: {}/{}\n",
                self.state.completed_steps, self.state.total_steps
            ));
        }
        if self.state.retry_count > 0 {
            out.push_str(&format!("Retries: {}\n", self.state.retry_count));
        }
        out
    }

    pub fn succeeded(&self) -> bool {
        self.state.status == ExecutionStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn frame(event_type: &str, data: serde_json::Value) -> StreamFrame {
        StreamFrame::decode(event_type, &data).unwrap()
    }

    fn meta() -> RenderMeta {
        RenderMeta {
            title: "Tool: deploy".to_string(),
            runner: "default".to_string(),
        }
    }

    #[test]
    fn test_stdout_concatenation_preserves_order() {
        let mut reducer = StreamReducer::new();
        for chunk in ["alpha ", "beta ", "gamma"] {
            reducer.handle(&frame("data", json!(chunk)));
        }
        assert_eq!(reducer.stdout(), "alpha beta gamma");
    }

    #[test]
    fn test_stderr_is_marked_not_merged() {
        let mut reducer = StreamReducer::new();
        reducer.handle(&frame("data", json!("out\n")));
        reducer.handle(&frame("stderr", json!("warning: low disk\n")));
        reducer.handle(&frame("done", json!({})));

        let rendered = reducer.render(&meta());
        assert!(rendered.contains("out\n"));
        assert!(rendered.contains("[stderr] warning: low disk"));
        assert_eq!(reducer.stdout(), "out\n");
    }

    #[test]
    fn test_full_stdout_never_truncated() {
        let mut reducer = StreamReducer::new();
        let long = "x".repeat(STEP_ECHO_LIMIT * 10);
        reducer.handle(&frame("data", json!(long.clone())));
        assert_eq!(reducer.stdout().len(), long.len());
        assert!(reducer.render(&meta()).contains(&long));
    }

    #[test]
    fn test_step_echo_is_clipped() {
        let mut reducer = StreamReducer::new();
        let long = "y".repeat(STEP_ECHO_LIMIT * 2);
        reducer.handle(&frame(
            "step",
            json!({"name": "build", "status": "completed", "output": long}),
        ));
        let rendered = reducer.render(&meta());
        assert!(rendered.contains('…'));
        assert!(!rendered.contains(&"y".repeat(STEP_ECHO_LIMIT + 1)));
    }

    #[test]
    fn test_footer_success_with_steps_and_retries() {
        let mut reducer = StreamReducer::new();
        reducer.handle(&frame("state", json!({"status": "running", "total_steps": 5})));
        for name in ["a", "b"] {
            reducer.handle(&frame("step", json!({"name": name, "status": "completed"})));
        }
        reducer.handle(&frame("reconnect", json!({"attempt": 1})));
        for name in ["c", "d", "e"] {
            reducer.handle(&frame("step", json!({"name": name, "status": "completed"})));
        }
        reducer.handle(&frame("done", json!({"exit_code": 0})));

        assert!(reducer.succeeded());
        let rendered = reducer.render(&meta());
        assert!(rendered.contains("Steps completed: 5/5"));
        assert!(rendered.contains("Retries: 1"));
        assert!(rendered.contains("✔ Completed successfully"));
    }

    #[test]
    fn test_failure_footer_includes_partial_output() {
        let mut reducer = StreamReducer::new();
        reducer.handle(&frame("data", json!("partial work\n")));
        reducer.handle(&frame("error", json!({"message": "disk full"})));

        assert!(!reducer.succeeded());
        let rendered = reducer.render(&meta());
        assert!(rendered.contains("partial work"));
        assert!(rendered.contains("✘ Failed: disk full"));
    }

    #[test]
    fn test_truncate_echo_char_boundary() {
        let text = "é".repeat(STEP_ECHO_LIMIT + 5);
        let clipped = truncate_echo(&text);
        assert!(clipped.ends_with('…'));
        assert_eq!(clipped.chars().count(), STEP_ECHO_LIMIT + 1);
    }
}
