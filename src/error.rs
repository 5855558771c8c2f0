//! Server error taxonomy.
//!
//! Every variant renders to an MCP error-result at the dispatch boundary;
//! the distinction between an error-result and a transport error is
//! load-bearing (transport errors tear the stream down, error-results do
//! not). Only faults the recovery middleware cannot see become transport
//! errors.

use automcp_platform::PlatformError;
use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Missing or ill-typed argument.
    #[error("{0}")]
    Validation(String),

    #[error("Authentication required")]
    Authentication,

    #[error("Permission denied: tool '{tool}' requires one of [{}]", .required.join(", "))]
    Authorization { tool: String, required: Vec<String> },

    #[error("Rate limit exceeded for session '{session_id}'; retry shortly")]
    RateLimited { session_id: String },

    #[error("Policy denied execution of '{name}': {reason}{}", render_issues(.issues))]
    PolicyDenied {
        name: String,
        reason: String,
        issues: Vec<String>,
    },

    #[error(transparent)]
    Upstream(#[from] PlatformError),

    /// The upstream ran the tool and reported failure.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Operation '{tool}' timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    /// Recovered fault. The generic message is all the caller sees; the
    /// real detail travels through the error-capture hook.
    #[error("An internal error occurred")]
    Internal,
}

fn render_issues(issues: &[String]) -> String {
    if issues.is_empty() {
        String::new()
    } else {
        format!(" (issues: {})", issues.join("; "))
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(e: serde_json::Error) -> Self {
        // Response-shaping failure, not caller input; detail goes to the
        // log, the caller sees the generic message.
        tracing::error!(error = %e, "JSON conversion failed");
        Self::Internal
    }
}

impl ServerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Short tag for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Authentication => "authentication",
            Self::Authorization { .. } => "authorization",
            Self::RateLimited { .. } => "rate_limited",
            Self::PolicyDenied { .. } => "policy_denied",
            Self::Upstream(_) | Self::ExecutionFailed(_) => "upstream",
            Self::Timeout { .. } => "timeout",
            Self::Internal => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_message_names_permissions() {
        let err = ServerError::Authorization {
            tool: "delete_user".to_string(),
            required: vec!["admin".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("Permission denied"));
        assert!(text.contains("admin"));
    }

    #[test]
    fn test_timeout_message() {
        let err = ServerError::Timeout {
            tool: "slow".to_string(),
            seconds: 1,
        };
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_policy_denied_with_issues() {
        let err = ServerError::PolicyDenied {
            name: "wf".to_string(),
            reason: "untrusted runner".to_string(),
            issues: vec!["step 2 mounts /".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("untrusted runner"));
        assert!(text.contains("step 2"));
    }

    #[test]
    fn test_internal_is_generic() {
        assert_eq!(ServerError::Internal.to_string(), "An internal error occurred");
    }
}
