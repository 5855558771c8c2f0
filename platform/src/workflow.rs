//! Workflow execution with resume-by-execution-id semantics.
//!
//! A transport-level disconnect mid-stream is recoverable for workflows:
//! the wrapper requests continuation from the last known execution id,
//! emits a synthetic `reconnect` event downstream, and carries on. Retries
//! are bounded; on exhaustion an `error` event terminates the stream.

use std::time::Duration;

use futures::{future::BoxFuture, FutureExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
    client::PlatformClient,
    error::PlatformResult,
    sse::FrameStream,
    stream::{StreamEvent, StreamFrame},
    types::WorkflowExecutionRequest,
};

/// Bounds on stream re-establishment.
#[derive(Debug, Clone, Copy)]
pub struct ResumePolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ResumePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ResumePolicy {
    /// delay = min(base_delay * 2^(attempt-1), max_delay)
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 2u64.saturating_pow(exponent);
        let delay = (self.base_delay.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay.as_millis() as u64))
    }
}

/// Re-establishes a stream from an execution id.
pub type ResumeFn =
    Box<dyn FnMut(String) -> BoxFuture<'static, PlatformResult<FrameStream>> + Send>;

pub struct WorkflowClient {
    client: PlatformClient,
    policy: ResumePolicy,
}

impl WorkflowClient {
    pub fn new(client: PlatformClient) -> Self {
        Self {
            client,
            policy: ResumePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_resume_policy(mut self, policy: ResumePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Execute a workflow, returning a stream that survives mid-flight
    /// disconnects up to the resume policy's bounds.
    pub async fn execute_workflow(
        &self,
        request: WorkflowExecutionRequest,
        runner: &str,
    ) -> PlatformResult<FrameStream> {
        let initial = self.start(&request, runner).await?;

        let client = self.client.clone();
        let runner = runner.to_string();
        let definition = request.definition.clone();
        let params = request.params.clone();
        let resume: ResumeFn = Box::new(move |execution_id: String| {
            let client = client.clone();
            let runner = runner.clone();
            let request = WorkflowExecutionRequest {
                definition: definition.clone(),
                params: params.clone(),
                resume_from_execution_id: Some(execution_id),
            };
            async move {
                client
                    .post_stream(
                        &["workflows", "execute"],
                        &serde_json::to_value(&request)?,
                    )
                    .await
            }
            .boxed()
        });

        Ok(resumable_stream(initial, resume, self.policy))
    }

    async fn start(
        &self,
        request: &WorkflowExecutionRequest,
        runner: &str,
    ) -> PlatformResult<FrameStream> {
        let mut body = serde_json::to_value(request)?;
        body["runner"] = json!(runner);
        self.client.post_stream(&["workflows", "execute"], &body).await
    }
}

/// Wrap a stream so recoverable interruptions trigger bounded resumes.
///
/// Each successful re-establishment emits one synthetic
/// [`StreamEvent::Reconnect`] frame before upstream frames continue.
pub fn resumable_stream(initial: FrameStream, resume: ResumeFn, policy: ResumePolicy) -> FrameStream {
    let (tx, mut rx) = mpsc::channel::<PlatformResult<StreamFrame>>(64);
    tokio::spawn(drive(initial, resume, policy, tx));
    futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed()
}

async fn drive(
    mut stream: FrameStream,
    mut resume: ResumeFn,
    policy: ResumePolicy,
    tx: mpsc::Sender<PlatformResult<StreamFrame>>,
) {
    let mut attempt: u32 = 0;
    let mut last_execution_id: Option<String> = None;

    loop {
        match stream.next().await {
            Some(Ok(frame)) => {
                if let Some(id) = &frame.execution_id {
                    last_execution_id = Some(id.clone());
                }
                let terminal = frame.event.is_terminal();
                // Receiver dropped means the caller abandoned the
                // execution; stop promptly.
                if tx.send(Ok(frame)).await.is_err() {
                    return;
                }
                if terminal {
                    return;
                }
            }
            Some(Err(e)) if e.is_recoverable() && last_execution_id.is_some() => {
                let execution_id = last_execution_id.clone().unwrap_or_default();
                attempt += 1;
                if attempt > policy.max_attempts {
                    warn!(
                        execution_id = %execution_id,
                        attempts = attempt - 1,
                        "Workflow resume attempts exhausted"
                    );
                    let _ = tx
                        .send(Ok(StreamFrame {
                            event: StreamEvent::Error {
                                message: format!(
                                    "connection lost and not recovered after {} attempts",
                                    attempt - 1
                                ),
                            },
                            timestamp: None,
                            execution_id: Some(execution_id),
                            step_name: None,
                        }))
                        .await;
                    return;
                }

                tokio::time::sleep(policy.backoff(attempt)).await;
                match resume(execution_id.clone()).await {
                    Ok(next) => {
                        info!(
                            execution_id = %execution_id,
                            attempt,
                            "Workflow stream re-established"
                        );
                        stream = next;
                        let reconnect = StreamFrame {
                            event: StreamEvent::Reconnect { attempt },
                            timestamp: None,
                            execution_id: Some(execution_id),
                            step_name: None,
                        };
                        if tx.send(Ok(reconnect)).await.is_err() {
                            return;
                        }
                    }
                    Err(resume_err) => {
                        warn!(
                            execution_id = %execution_id,
                            attempt,
                            error = %resume_err,
                            "Workflow resume attempt failed"
                        );
                        // Loop again; the attempt counter bounds us.
                        stream = futures::stream::iter(vec![Err(resume_err)]).boxed();
                    }
                }
            }
            Some(Err(e)) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use futures::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::{error::PlatformError, stream::StepStatus};

    fn frame(event: StreamEvent, execution_id: &str) -> PlatformResult<StreamFrame> {
        Ok(StreamFrame::new(event).with_execution_id(execution_id))
    }

    fn step(name: &str, status: StepStatus, id: &str) -> PlatformResult<StreamFrame> {
        frame(
            StreamEvent::Step {
                name: name.to_string(),
                status,
                output: None,
            },
            id,
        )
    }

    #[test]
    fn test_backoff_growth() {
        let policy = ResumePolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(7), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_resume_emits_single_reconnect() {
        let initial: FrameStream = futures::stream::iter(vec![
            frame(
                StreamEvent::State {
                    status: crate::stream::ExecutionStatus::Running,
                    total_steps: Some(5),
                },
                "ex-1",
            ),
            step("one", StepStatus::Completed, "ex-1"),
            step("two", StepStatus::Completed, "ex-1"),
            Err(PlatformError::StreamInterrupted {
                execution_id: Some("ex-1".to_string()),
            }),
        ])
        .boxed();

        let resume: ResumeFn = Box::new(|id: String| {
            assert_eq!(id, "ex-1");
            async move {
                Ok(futures::stream::iter(vec![
                    step("three", StepStatus::Completed, "ex-1"),
                    step("four", StepStatus::Completed, "ex-1"),
                    step("five", StepStatus::Completed, "ex-1"),
                    frame(StreamEvent::Done { exit_code: Some(0) }, "ex-1"),
                ])
                .boxed() as FrameStream)
            }
            .boxed()
        });

        let policy = ResumePolicy {
            base_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let mut stream = resumable_stream(initial, resume, policy);

        let mut reconnects = 0;
        let mut completed_steps = 0;
        let mut terminal = None;
        while let Some(item) = stream.next().await {
            match item.unwrap().event {
                StreamEvent::Reconnect { .. } => reconnects += 1,
                StreamEvent::Step {
                    status: StepStatus::Completed,
                    ..
                } => completed_steps += 1,
                e if e.is_terminal() => terminal = Some(e),
                _ => {}
            }
        }

        assert_eq!(reconnects, 1);
        assert_eq!(completed_steps, 5);
        assert_eq!(terminal, Some(StreamEvent::Done { exit_code: Some(0) }));
    }

    #[tokio::test]
    async fn test_resume_exhaustion_emits_error() {
        let initial: FrameStream = futures::stream::iter(vec![
            frame(
                StreamEvent::State {
                    status: crate::stream::ExecutionStatus::Running,
                    total_steps: None,
                },
                "ex-2",
            ),
            Err(PlatformError::StreamInterrupted {
                execution_id: Some("ex-2".to_string()),
            }),
        ])
        .boxed();

        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_fn = calls.clone();
        let resume: ResumeFn = Box::new(move |_id| {
            calls_in_fn.fetch_add(1, Ordering::SeqCst);
            async {
                Err(PlatformError::StreamInterrupted {
                    execution_id: Some("ex-2".to_string()),
                })
            }
            .boxed()
        });

        let policy = ResumePolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let mut stream = resumable_stream(initial, resume, policy);

        let mut last = None;
        while let Some(item) = stream.next().await {
            last = Some(item.unwrap().event);
        }
        match last {
            Some(StreamEvent::Error { message }) => {
                assert!(message.contains("not recovered"));
            }
            other => panic!("expected terminal error, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unrecoverable_error_passes_through() {
        let initial: FrameStream = futures::stream::iter(vec![Err(PlatformError::EventDecode(
            "bad".to_string(),
        ))])
        .boxed();
        let resume: ResumeFn = Box::new(|_| async { panic!("must not resume") }.boxed());

        let mut stream = resumable_stream(initial, resume, ResumePolicy::default());
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_request_serializes_resume_point() {
        let request = WorkflowExecutionRequest {
            definition: json!({"name": "deploy"}),
            params: serde_json::Map::new(),
            resume_from_execution_id: Some("ex-3".to_string()),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["resume_from_execution_id"], "ex-3");
    }
}
