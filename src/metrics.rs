//! In-process metrics for server operations.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Counters for server activity.
pub struct ServerMetrics {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    active_sessions: AtomicU64,
    resource_reads: AtomicU64,
    prompt_calls: AtomicU64,
    tool_stats: DashMap<String, ToolStats>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            resource_reads: AtomicU64::new(0),
            prompt_calls: AtomicU64::new(0),
            tool_stats: DashMap::new(),
        }
    }

    pub fn record_call(&self, tool: &str, success: bool, duration_ms: u64) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_calls.fetch_add(1, Ordering::Relaxed);
        }
        self.tool_stats
            .entry(tool.to_string())
            .or_default()
            .record(success, duration_ms);
    }

    pub fn record_resource_read(&self) {
        self.resource_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prompt_call(&self) {
        self.prompt_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_started(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_ended(&self) {
        // Saturating: a restart-era end event must not wrap the gauge.
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            resource_reads: self.resource_reads.load(Ordering::Relaxed),
            prompt_calls: self.prompt_calls.load(Ordering::Relaxed),
        }
    }

    pub fn tool_snapshot(&self, tool: &str) -> Option<ToolSnapshot> {
        self.tool_stats.get(tool).map(|stats| stats.snapshot())
    }

    pub fn all_tool_snapshots(&self) -> Vec<(String, ToolSnapshot)> {
        self.tool_stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-tool outcome and latency counters.
#[derive(Default)]
pub struct ToolStats {
    success: AtomicU64,
    failure: AtomicU64,
    total_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl ToolStats {
    fn record(&self, success: bool, ms: u64) {
        if success {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure.fetch_add(1, Ordering::Relaxed);
        }
        self.total_ms.fetch_add(ms, Ordering::Relaxed);

        let mut current = self.min_ms.load(Ordering::Relaxed);
        // 0 doubles as "unset" for min; real zero-latency calls still win.
        while current == 0 || ms < current {
            match self
                .min_ms
                .compare_exchange_weak(current, ms.max(1), Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let mut current = self.max_ms.load(Ordering::Relaxed);
        while ms > current {
            match self
                .max_ms
                .compare_exchange_weak(current, ms, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn snapshot(&self) -> ToolSnapshot {
        let success = self.success.load(Ordering::Relaxed);
        let failure = self.failure.load(Ordering::Relaxed);
        let count = success + failure;
        ToolSnapshot {
            success,
            failure,
            avg_ms: if count > 0 {
                self.total_ms.load(Ordering::Relaxed) / count
            } else {
                0
            },
            min_ms: self.min_ms.load(Ordering::Relaxed),
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub active_sessions: u64,
    pub resource_reads: u64,
    pub prompt_calls: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSnapshot {
    pub success: u64,
    pub failure: u64,
    pub avg_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}
