//! Bounded pool for the sandboxed script engine.
//!
//! Shared process-wide resource: capacity is fixed at init and exposes no
//! setter. Acquisition fails fast when the caller's context is already
//! cancelled; otherwise it waits for a permit.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{ServerError, ServerResult};

/// Process-wide cap on concurrent script-engine use.
pub const SANDBOX_CAPACITY: usize = 10;

/// Upper bound on script content accepted for on-demand tools.
const MAX_CONTENT_BYTES: usize = 128 * 1024;

/// Vets script content before it is dispatched upstream.
pub trait ScriptEngine: Send + Sync {
    /// Returns a rejection reason, or `Ok` when the content is acceptable.
    fn lint(&self, tool_name: &str, content: &str) -> Result<(), String>;
}

/// Default engine: size and control-character checks.
pub struct BasicLint;

impl ScriptEngine for BasicLint {
    fn lint(&self, tool_name: &str, content: &str) -> Result<(), String> {
        if content.trim().is_empty() {
            return Err(format!("tool '{tool_name}' has empty content"));
        }
        if content.len() > MAX_CONTENT_BYTES {
            return Err(format!(
                "tool '{tool_name}' content exceeds {MAX_CONTENT_BYTES} bytes"
            ));
        }
        if content
            .chars()
            .any(|c| c.is_control() && c != '\n' && c != '\t' && c != '\r')
        {
            return Err(format!(
                "tool '{tool_name}' content contains control characters"
            ));
        }
        Ok(())
    }
}

pub struct SandboxPool {
    permits: Arc<Semaphore>,
    engine: Arc<dyn ScriptEngine>,
}

impl SandboxPool {
    pub fn new(engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(SANDBOX_CAPACITY)),
            engine,
        }
    }

    /// Run the engine's lint under a pool permit.
    pub async fn check(
        &self,
        cancel: &CancellationToken,
        tool_name: &str,
        content: &str,
    ) -> ServerResult<()> {
        if cancel.is_cancelled() {
            return Err(ServerError::validation(
                "request cancelled before script check",
            ));
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ServerError::validation(
                    "request cancelled while waiting for the script engine",
                ));
            }
            permit = self.permits.acquire() => permit,
        };
        let _permit = permit.map_err(|_| ServerError::Internal)?;

        self.engine
            .lint(tool_name, content)
            .map_err(ServerError::Validation)
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Default for SandboxPool {
    fn default() -> Self {
        Self::new(Arc::new(BasicLint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lint_accepts_scripts() {
        let pool = SandboxPool::default();
        let cancel = CancellationToken::new();
        assert!(pool.check(&cancel, "t", "echo hi").await.is_ok());
        assert_eq!(pool.available_permits(), SANDBOX_CAPACITY);
    }

    #[tokio::test]
    async fn test_lint_rejects_empty_and_oversized() {
        let pool = SandboxPool::default();
        let cancel = CancellationToken::new();

        assert!(pool.check(&cancel, "t", "   ").await.is_err());

        let big = "x".repeat(MAX_CONTENT_BYTES + 1);
        assert!(pool.check(&cancel, "t", &big).await.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_context_fails_fast() {
        let pool = SandboxPool::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pool.check(&cancel, "t", "echo hi").await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn test_basic_lint_control_characters() {
        assert!(BasicLint.lint("t", "line1\nline2\tok").is_ok());
        assert!(BasicLint.lint("t", "bad\u{0007}bell").is_err());
    }
}
