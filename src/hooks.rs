//! Lifecycle hooks observed on every call boundary.
//!
//! A composite observer fans events out synchronously, in registration
//! order. Observer failure is contained: a panicking observer is logged
//! and never reaches the dispatch path.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::{error::ServerError, metrics::ServerMetrics, session::Session};

/// Observer of server lifecycle events. All methods default to no-ops so
/// observers implement only what they care about.
#[allow(unused_variables)]
pub trait ServerHook: Send + Sync {
    fn on_server_start(&self) {}
    fn on_server_stop(&self) {}
    fn on_session_start(&self, session: &Session) {}
    fn on_session_end(&self, session: &Session, duration: Duration) {}
    fn on_tool_call(
        &self,
        session_id: &str,
        tool: &str,
        duration: Duration,
        error: Option<&ServerError>,
    ) {
    }
    fn on_resource_read(
        &self,
        session_id: &str,
        uri: &str,
        duration: Duration,
        error: Option<&ServerError>,
    ) {
    }
    fn on_prompt_call(
        &self,
        session_id: &str,
        prompt: &str,
        duration: Duration,
        error: Option<&ServerError>,
    ) {
    }
    fn on_error(&self, session_id: &str, error: &ServerError) {}
}

/// Observer that ignores everything. Useful as a default and in tests.
pub struct NoopHook;

impl ServerHook for NoopHook {}

/// Fans events out to every registered observer, in order.
pub struct CompositeHook {
    observers: Vec<Arc<dyn ServerHook>>,
}

impl CompositeHook {
    pub fn new(observers: Vec<Arc<dyn ServerHook>>) -> Self {
        Self { observers }
    }

    fn each(&self, event: &str, mut deliver: impl FnMut(&dyn ServerHook)) {
        for observer in &self.observers {
            if catch_unwind(AssertUnwindSafe(|| deliver(observer.as_ref()))).is_err() {
                warn!(event, "Hook observer panicked; continuing");
            }
        }
    }
}

impl ServerHook for CompositeHook {
    fn on_server_start(&self) {
        self.each("server_start", |o| o.on_server_start());
    }

    fn on_server_stop(&self) {
        self.each("server_stop", |o| o.on_server_stop());
    }

    fn on_session_start(&self, session: &Session) {
        self.each("session_start", |o| o.on_session_start(session));
    }

    fn on_session_end(&self, session: &Session, duration: Duration) {
        self.each("session_end", |o| o.on_session_end(session, duration));
    }

    fn on_tool_call(
        &self,
        session_id: &str,
        tool: &str,
        duration: Duration,
        error: Option<&ServerError>,
    ) {
        self.each("tool_call", |o| {
            o.on_tool_call(session_id, tool, duration, error)
        });
    }

    fn on_resource_read(
        &self,
        session_id: &str,
        uri: &str,
        duration: Duration,
        error: Option<&ServerError>,
    ) {
        self.each("resource_read", |o| {
            o.on_resource_read(session_id, uri, duration, error)
        });
    }

    fn on_prompt_call(
        &self,
        session_id: &str,
        prompt: &str,
        duration: Duration,
        error: Option<&ServerError>,
    ) {
        self.each("prompt_call", |o| {
            o.on_prompt_call(session_id, prompt, duration, error)
        });
    }

    fn on_error(&self, session_id: &str, error: &ServerError) {
        self.each("error", |o| o.on_error(session_id, error));
    }
}

/// Structured-log observer.
pub struct LoggingHook;

impl ServerHook for LoggingHook {
    fn on_server_start(&self) {
        info!("Server started");
    }

    fn on_server_stop(&self) {
        info!("Server stopped");
    }

    fn on_session_start(&self, session: &Session) {
        info!(session_id = %session.id, user_id = %session.user_id, "Session started");
    }

    fn on_session_end(&self, session: &Session, duration: Duration) {
        info!(
            session_id = %session.id,
            duration_secs = duration.as_secs(),
            "Session ended"
        );
    }

    fn on_tool_call(
        &self,
        session_id: &str,
        tool: &str,
        duration: Duration,
        error: Option<&ServerError>,
    ) {
        match error {
            None => info!(
                session_id,
                tool,
                duration_ms = duration.as_millis() as u64,
                "Tool call completed"
            ),
            Some(e) => warn!(
                session_id,
                tool,
                duration_ms = duration.as_millis() as u64,
                error = %e,
                "Tool call failed"
            ),
        }
    }

    fn on_resource_read(
        &self,
        session_id: &str,
        uri: &str,
        duration: Duration,
        error: Option<&ServerError>,
    ) {
        match error {
            None => info!(session_id, uri, duration_ms = duration.as_millis() as u64, "Resource read"),
            Some(e) => warn!(session_id, uri, error = %e, "Resource read failed"),
        }
    }

    fn on_prompt_call(
        &self,
        session_id: &str,
        prompt: &str,
        duration: Duration,
        error: Option<&ServerError>,
    ) {
        match error {
            None => info!(session_id, prompt, "Prompt rendered"),
            Some(e) => warn!(session_id, prompt, error = %e, "Prompt render failed"),
        }
    }

    fn on_error(&self, session_id: &str, error: &ServerError) {
        error!(session_id, kind = error.kind(), error = %error, "Server error");
    }
}

/// One captured fault with its context.
#[derive(Debug, Clone)]
pub struct CapturedError {
    pub session_id: String,
    pub tool: Option<String>,
    pub kind: &'static str,
    pub message: String,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Bounded in-memory capture of faults, standing in for an external
/// telemetry sink. Oldest entries are dropped past the capacity.
pub struct ErrorCaptureHook {
    entries: Mutex<std::collections::VecDeque<CapturedError>>,
    capacity: usize,
}

impl ErrorCaptureHook {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(std::collections::VecDeque::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    fn push(&self, entry: CapturedError) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<CapturedError> {
        self.entries.lock().iter().cloned().collect()
    }
}

impl Default for ErrorCaptureHook {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerHook for ErrorCaptureHook {
    fn on_tool_call(
        &self,
        session_id: &str,
        tool: &str,
        _duration: Duration,
        error: Option<&ServerError>,
    ) {
        if let Some(error) = error {
            self.push(CapturedError {
                session_id: session_id.to_string(),
                tool: Some(tool.to_string()),
                kind: error.kind(),
                message: error.to_string(),
                at: chrono::Utc::now(),
            });
        }
    }

    fn on_error(&self, session_id: &str, error: &ServerError) {
        self.push(CapturedError {
            session_id: session_id.to_string(),
            tool: None,
            kind: error.kind(),
            message: error.to_string(),
            at: chrono::Utc::now(),
        });
    }
}

/// Feeds the in-process metrics counters.
pub struct MetricsHook {
    metrics: Arc<ServerMetrics>,
}

impl MetricsHook {
    pub fn new(metrics: Arc<ServerMetrics>) -> Self {
        Self { metrics }
    }
}

impl ServerHook for MetricsHook {
    fn on_session_start(&self, _session: &Session) {
        self.metrics.session_started();
    }

    fn on_session_end(&self, _session: &Session, _duration: Duration) {
        self.metrics.session_ended();
    }

    fn on_tool_call(
        &self,
        _session_id: &str,
        tool: &str,
        duration: Duration,
        error: Option<&ServerError>,
    ) {
        self.metrics
            .record_call(tool, error.is_none(), duration.as_millis() as u64);
    }

    fn on_resource_read(
        &self,
        _session_id: &str,
        _uri: &str,
        _duration: Duration,
        _error: Option<&ServerError>,
    ) {
        self.metrics.record_resource_read();
    }

    fn on_prompt_call(
        &self,
        _session_id: &str,
        _prompt: &str,
        _duration: Duration,
        _error: Option<&ServerError>,
    ) {
        self.metrics.record_prompt_call();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Recorder {
        calls: AtomicUsize,
    }

    impl ServerHook for Recorder {
        fn on_tool_call(
            &self,
            _session_id: &str,
            _tool: &str,
            _duration: Duration,
            _error: Option<&ServerError>,
        ) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicker;

    impl ServerHook for Panicker {
        fn on_tool_call(
            &self,
            _session_id: &str,
            _tool: &str,
            _duration: Duration,
            _error: Option<&ServerError>,
        ) {
            panic!("observer bug");
        }
    }

    #[test]
    fn test_panicking_observer_does_not_block_later_ones() {
        let recorder = Arc::new(Recorder {
            calls: AtomicUsize::new(0),
        });
        let composite = CompositeHook::new(vec![Arc::new(Panicker), recorder.clone()]);

        composite.on_tool_call("s1", "deploy", Duration::from_millis(1), None);
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_capture_is_bounded() {
        let capture = ErrorCaptureHook::with_capacity(2);
        for i in 0..5 {
            capture.on_error(&format!("s{i}"), &ServerError::Internal);
        }
        let entries = capture.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].session_id, "s3");
        assert_eq!(entries[1].session_id, "s4");
    }

    #[test]
    fn test_capture_records_tool_failures_only() {
        let capture = ErrorCaptureHook::new();
        capture.on_tool_call("s1", "deploy", Duration::ZERO, None);
        capture.on_tool_call(
            "s1",
            "deploy",
            Duration::ZERO,
            Some(&ServerError::Internal),
        );
        let entries = capture.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tool.as_deref(), Some("deploy"));
        assert_eq!(entries[0].kind, "internal");
    }

    #[test]
    fn test_metrics_hook_feeds_counters() {
        let metrics = Arc::new(ServerMetrics::new());
        let hook = MetricsHook::new(metrics.clone());

        let session = Session::anonymous("s1");
        hook.on_session_start(&session);
        hook.on_tool_call("s1", "deploy", Duration::from_millis(5), None);
        hook.on_session_end(&session, Duration::from_secs(1));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_calls, 1);
        assert_eq!(snapshot.active_sessions, 0);
    }
}
