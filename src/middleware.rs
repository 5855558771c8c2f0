//! The per-call middleware chain.
//!
//! A middleware wraps a handler and returns a handler; declaration order
//! equals execution order. The fixed chain, outermost first: recovery,
//! timeout, logging, rate-limit, auth, permission. Inner layers propagate
//! `ServerError` freely; recovery is the single point converting every
//! failure (including panics) into an MCP error-result so the transport
//! never tears down on a per-call fault.

use std::{sync::Arc, time::Duration};

use futures::{future::BoxFuture, FutureExt};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    error::{ServerError, ServerResult},
    hooks::ServerHook,
    rate_limit::SessionRateLimiter,
    registry::ToolRegistry,
    session::Session,
};

/// One inbound tool invocation.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub tool: String,
    pub arguments: Map<String, Value>,
}

impl CallRequest {
    pub fn new(tool: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            tool: tool.into(),
            arguments,
        }
    }
}

/// Context threaded through the chain into the handler.
#[derive(Clone)]
pub struct CallContext {
    pub session_id: String,
    /// Snapshot taken at dispatch; per-session mutation goes through the
    /// store, not this copy.
    pub session: Option<Session>,
    pub request_id: String,
    pub cancel: CancellationToken,
}

impl CallContext {
    pub fn new(session_id: impl Into<String>, session: Option<Session>) -> Self {
        Self {
            session_id: session_id.into(),
            session,
            request_id: uuid::Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
        }
    }
}

/// A normal MCP call result. `error` set means an error-result: the body
/// denotes failure but the transport stays open.
#[derive(Debug)]
pub struct CallReply {
    pub text: String,
    pub structured: Option<Value>,
    pub error: Option<ServerError>,
}

impl CallReply {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
            error: None,
        }
    }

    /// A success reply carrying both rendered text and structured JSON.
    pub fn json(value: Value) -> Self {
        Self {
            text: serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
            structured: Some(value),
            error: None,
        }
    }

    pub fn failure(error: ServerError) -> Self {
        Self {
            text: error.to_string(),
            structured: None,
            error: Some(error),
        }
    }

    /// Failure with a richer body than the error display (e.g. partial
    /// upstream output retained for debugging).
    pub fn failure_with_text(error: ServerError, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

pub type HandlerFuture = BoxFuture<'static, ServerResult<CallReply>>;

/// The handler shape every middleware wraps.
pub type ToolHandler = Arc<dyn Fn(CallContext, CallRequest) -> HandlerFuture + Send + Sync>;

pub trait Middleware: Send + Sync {
    fn wrap(&self, next: ToolHandler) -> ToolHandler;
}

/// Compose middlewares around a handler. Wrapping happens in reverse so
/// the declared order is the execution order, outermost first.
pub fn compose(inner: ToolHandler, chain: &[Arc<dyn Middleware>]) -> ToolHandler {
    chain
        .iter()
        .rev()
        .fold(inner, |next, middleware| middleware.wrap(next))
}

/// The required chain for a configured server, outermost first.
pub fn standard_chain(
    config: Arc<Config>,
    registry: Arc<ToolRegistry>,
    limiter: Arc<SessionRateLimiter>,
    hooks: Arc<dyn ServerHook>,
) -> Vec<Arc<dyn Middleware>> {
    vec![
        Arc::new(RecoveryMiddleware { hooks }),
        Arc::new(TimeoutMiddleware {
            config: config.clone(),
            registry: registry.clone(),
        }),
        Arc::new(LoggingMiddleware),
        Arc::new(RateLimitMiddleware { limiter }),
        Arc::new(AuthMiddleware {
            require_auth: config.require_auth,
        }),
        Arc::new(PermissionMiddleware { registry }),
    ]
}

// --- Recovery ---

/// Converts every escaping failure, panics included, into an error-result
/// so the transport connection survives. The caller only ever sees the
/// generic internal message for a panic; the detail goes to the hooks.
pub struct RecoveryMiddleware {
    pub hooks: Arc<dyn ServerHook>,
}

impl Middleware for RecoveryMiddleware {
    fn wrap(&self, next: ToolHandler) -> ToolHandler {
        let hooks = self.hooks.clone();
        Arc::new(move |ctx: CallContext, req: CallRequest| {
            let hooks = hooks.clone();
            let next = next.clone();
            async move {
                let outcome = std::panic::AssertUnwindSafe(next(ctx.clone(), req))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(reply)) => Ok(reply),
                    Ok(Err(err)) => {
                        hooks.on_error(&ctx.session_id, &err);
                        Ok(CallReply::failure(err))
                    }
                    Err(panic) => {
                        let detail = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "non-string panic payload".to_string());
                        error!(
                            session_id = %ctx.session_id,
                            panic = %detail,
                            "Recovered panic in tool handler"
                        );
                        let err = ServerError::Internal;
                        hooks.on_error(&ctx.session_id, &err);
                        Ok(CallReply::failure(err))
                    }
                }
            }
            .boxed()
        })
    }
}

// --- Timeout ---

pub struct TimeoutMiddleware {
    pub config: Arc<Config>,
    pub registry: Arc<ToolRegistry>,
}

impl TimeoutMiddleware {
    /// Resolve the execution target and its deadline.
    ///
    /// Calls arriving through the generic dispatch tools carry the real
    /// target in their arguments, not in the MCP-level tool name, so the
    /// deadline must be keyed by that inner name. Precedence: config
    /// `tool_timeouts` override, then a whitelisted tool's fixed timeout,
    /// then an inline definition's own `timeout_seconds`, then the
    /// long-running class, then the global default.
    fn resolve(config: &Config, registry: &ToolRegistry, req: &CallRequest) -> (String, u64) {
        let inline_def = req.arguments.get("tool_def").and_then(Value::as_object);
        let target = match req.tool.as_str() {
            "execute_tool" | "create_on_demand_tool" | "execute_whitelisted_tool" => req
                .arguments
                .get("tool_name")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .or_else(|| inline_def.and_then(|d| d.get("name")).and_then(Value::as_str))
                .unwrap_or(&req.tool)
                .to_string(),
            "execute_workflow" => req
                .arguments
                .get("workflow_def")
                .and_then(Value::as_object)
                .and_then(|d| d.get("name"))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(&req.tool)
                .to_string(),
            _ => req.tool.clone(),
        };

        if let Some(&secs) = config.tool_timeouts.get(&target) {
            return (target, secs);
        }
        if let Some(secs) = registry.whitelisted(&target).and_then(|t| t.timeout_seconds) {
            return (target, secs);
        }
        if let Some(secs) = inline_def
            .and_then(|d| d.get("timeout_seconds"))
            .and_then(Value::as_u64)
        {
            return (target, secs);
        }

        let long_running = registry.get(&req.tool).map(|d| d.long_running).unwrap_or(false)
            || registry.get(&target).map(|d| d.long_running).unwrap_or(false)
            || registry
                .whitelisted(&target)
                .map(|t| t.tool.long_running)
                .unwrap_or(false)
            || inline_def
                .and_then(|d| d.get("long_running"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
        let seconds = config.timeout_for(&target, long_running);
        (target, seconds)
    }
}

impl Middleware for TimeoutMiddleware {
    fn wrap(&self, next: ToolHandler) -> ToolHandler {
        let config = self.config.clone();
        let registry = self.registry.clone();
        Arc::new(move |ctx: CallContext, req: CallRequest| {
            let next = next.clone();
            let (target, seconds) = Self::resolve(&config, &registry, &req);
            async move {
                tokio::select! {
                    result = next(ctx.clone(), req) => result,
                    _ = tokio::time::sleep(Duration::from_secs(seconds)) => {
                        // Propagate cancellation so the executor abandons
                        // the upstream stream; any partial payload is
                        // dropped with the inner future.
                        ctx.cancel.cancel();
                        Err(ServerError::Timeout { tool: target, seconds })
                    }
                }
            }
            .boxed()
        })
    }
}

// --- Logging ---

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn wrap(&self, next: ToolHandler) -> ToolHandler {
        Arc::new(move |ctx: CallContext, req: CallRequest| {
            let next = next.clone();
            async move {
                let start = std::time::Instant::now();
                let tool = req.tool.clone();
                debug!(session_id = %ctx.session_id, tool = %tool, "Tool call started");
                let result = next(ctx.clone(), req).await;
                let duration_ms = start.elapsed().as_millis() as u64;
                match &result {
                    Ok(reply) if !reply.is_error() => {
                        info!(session_id = %ctx.session_id, tool = %tool, duration_ms, "Tool call succeeded");
                    }
                    Ok(reply) => {
                        warn!(
                            session_id = %ctx.session_id,
                            tool = %tool,
                            duration_ms,
                            error = %reply.text,
                            "Tool call returned error-result"
                        );
                    }
                    Err(err) => {
                        warn!(
                            session_id = %ctx.session_id,
                            tool = %tool,
                            duration_ms,
                            error = %err,
                            "Tool call failed"
                        );
                    }
                }
                result
            }
            .boxed()
        })
    }
}

// --- Rate limit ---

pub struct RateLimitMiddleware {
    pub limiter: Arc<SessionRateLimiter>,
}

impl Middleware for RateLimitMiddleware {
    fn wrap(&self, next: ToolHandler) -> ToolHandler {
        let limiter = self.limiter.clone();
        Arc::new(move |ctx: CallContext, req: CallRequest| {
            let next = next.clone();
            let limiter = limiter.clone();
            async move {
                limiter.check(&ctx.session_id)?;
                next(ctx, req).await
            }
            .boxed()
        })
    }
}

// --- Auth ---

pub struct AuthMiddleware {
    pub require_auth: bool,
}

impl Middleware for AuthMiddleware {
    fn wrap(&self, next: ToolHandler) -> ToolHandler {
        let require_auth = self.require_auth;
        Arc::new(move |ctx: CallContext, req: CallRequest| {
            let next = next.clone();
            async move {
                if require_auth {
                    match &ctx.session {
                        Some(session) if session.is_authenticated() => {
                            debug!(
                                session_id = %ctx.session_id,
                                user_id = %session.user_id,
                                email = %session.email,
                                "Authenticated call"
                            );
                        }
                        _ => return Err(ServerError::Authentication),
                    }
                }
                next(ctx, req).await
            }
            .boxed()
        })
    }
}

// --- Permission ---

/// Enforces the tool's required permission list on every invocation,
/// independent of list-time filtering (defense in depth).
pub struct PermissionMiddleware {
    pub registry: Arc<ToolRegistry>,
}

impl Middleware for PermissionMiddleware {
    fn wrap(&self, next: ToolHandler) -> ToolHandler {
        let registry = self.registry.clone();
        Arc::new(move |ctx: CallContext, req: CallRequest| {
            let next = next.clone();
            let required = registry
                .get(&req.tool)
                .map(|d| d.required_permissions.clone())
                .unwrap_or_default();
            async move {
                if !required.is_empty() {
                    let allowed = ctx
                        .session
                        .as_ref()
                        .map(|s| required.iter().any(|p| s.has(p)))
                        .unwrap_or(false);
                    if !allowed {
                        return Err(ServerError::Authorization {
                            tool: req.tool.clone(),
                            required,
                        });
                    }
                }
                next(ctx, req).await
            }
            .boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::{
        config::{RateLimitConfig, WhitelistedTool, LONG_RUNNING_TIMEOUT_SECS},
        hooks::NoopHook,
    };

    fn ok_handler(text: &'static str) -> ToolHandler {
        Arc::new(move |_ctx, _req| async move { Ok(CallReply::success(text)) }.boxed())
    }

    fn context(session: Option<Session>) -> CallContext {
        let id = session
            .as_ref()
            .map(|s| s.id.clone())
            .unwrap_or_else(|| "anon".to_string());
        CallContext::new(id, session)
    }

    fn request(tool: &str) -> CallRequest {
        CallRequest::new(tool, Map::new())
    }

    fn request_with(tool: &str, args: serde_json::Value) -> CallRequest {
        CallRequest::new(tool, args.as_object().cloned().unwrap_or_default())
    }

    struct OrderProbe {
        label: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Middleware for OrderProbe {
        fn wrap(&self, next: ToolHandler) -> ToolHandler {
            let label = self.label;
            let seen = self.seen.clone();
            Arc::new(move |ctx, req| {
                let next = next.clone();
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(label);
                    next(ctx, req).await
                }
                .boxed()
            })
        }
    }

    #[tokio::test]
    async fn test_declaration_order_is_execution_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(OrderProbe {
                label: "first",
                seen: seen.clone(),
            }),
            Arc::new(OrderProbe {
                label: "second",
                seen: seen.clone(),
            }),
            Arc::new(OrderProbe {
                label: "third",
                seen: seen.clone(),
            }),
        ];
        let handler = compose(ok_handler("done"), &chain);
        handler(context(None), request("t")).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_recovery_turns_panic_into_error_result() {
        let panicking: ToolHandler =
            Arc::new(|_ctx, _req| async { panic!("handler exploded") }.boxed());
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(RecoveryMiddleware {
            hooks: Arc::new(NoopHook),
        })];
        let handler = compose(panicking, &chain);

        let reply = handler(context(None), request("t")).await.unwrap();
        assert!(reply.is_error());
        assert_eq!(reply.text, "An internal error occurred");
        assert!(!reply.text.contains("exploded"));
    }

    #[tokio::test]
    async fn test_recovery_converts_inner_errors() {
        let failing: ToolHandler = Arc::new(|_ctx, _req| {
            async { Err(ServerError::validation("tool_name parameter is required")) }.boxed()
        });
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(RecoveryMiddleware {
            hooks: Arc::new(NoopHook),
        })];
        let handler = compose(failing, &chain);

        let reply = handler(context(None), request("t")).await.unwrap();
        assert!(reply.is_error());
        assert!(reply.text.contains("tool_name parameter is required"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_and_cancels() {
        let mut config = Config::default();
        config.tool_timeouts.insert("slow".to_string(), 1);
        let registry = Arc::new(ToolRegistry::from_config(&config));

        let observed_cancel = Arc::new(Mutex::new(None::<CancellationToken>));
        let inner_cancel = observed_cancel.clone();
        let never_finishes: ToolHandler = Arc::new(move |ctx: CallContext, _req| {
            *inner_cancel.lock().unwrap() = Some(ctx.cancel.clone());
            async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(CallReply::success("too late"))
            }
            .boxed()
        });

        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(RecoveryMiddleware {
                hooks: Arc::new(NoopHook),
            }),
            Arc::new(TimeoutMiddleware {
                config: Arc::new(config),
                registry,
            }),
        ];
        let handler = compose(never_finishes, &chain);

        let reply = handler(context(None), request("slow")).await.unwrap();
        assert!(reply.is_error());
        assert!(reply.text.contains("timed out"));
        assert!(observed_cancel.lock().unwrap().as_ref().unwrap().is_cancelled());
    }

    #[test]
    fn test_timeout_resolves_target_through_generic_dispatch() {
        let mut config = Config::default();
        config.tool_timeouts.insert("slow".to_string(), 1);
        let registry = ToolRegistry::from_config(&config);

        let (target, seconds) = TimeoutMiddleware::resolve(
            &config,
            &registry,
            &request_with("execute_tool", json!({"tool_name": "slow"})),
        );
        assert_eq!(target, "slow");
        assert_eq!(seconds, 1);

        // Inline definitions resolve through tool_def.name.
        let (target, seconds) = TimeoutMiddleware::resolve(
            &config,
            &registry,
            &request_with(
                "create_on_demand_tool",
                json!({"tool_def": {"name": "slow", "content": "sleep 99"}}),
            ),
        );
        assert_eq!(target, "slow");
        assert_eq!(seconds, 1);
    }

    #[test]
    fn test_timeout_config_override_beats_whitelist_fixed() {
        let mut config = Config::default();
        config.whitelisted_tools = vec![WhitelistedTool {
            name: "db_query".to_string(),
            timeout_seconds: Some(600),
            ..Default::default()
        }];
        config.tool_timeouts.insert("db_query".to_string(), 5);
        let registry = ToolRegistry::from_config(&config);

        let (_, seconds) =
            TimeoutMiddleware::resolve(&config, &registry, &request_with("db_query", json!({})));
        assert_eq!(seconds, 5);

        // Without the override, the fixed whitelist timeout applies,
        // including through the generic dispatch tool.
        config.tool_timeouts.clear();
        let (target, seconds) = TimeoutMiddleware::resolve(
            &config,
            &registry,
            &request_with("execute_whitelisted_tool", json!({"tool_name": "db_query"})),
        );
        assert_eq!(target, "db_query");
        assert_eq!(seconds, 600);
    }

    #[test]
    fn test_timeout_inline_definition_timeout_honored() {
        let config = Config::default();
        let registry = ToolRegistry::from_config(&config);
        let (_, seconds) = TimeoutMiddleware::resolve(
            &config,
            &registry,
            &request_with(
                "execute_tool",
                json!({"tool_name": "t", "tool_def": {"name": "t", "timeout_seconds": 90}}),
            ),
        );
        assert_eq!(seconds, 90);
    }

    #[test]
    fn test_timeout_workflow_long_running_class() {
        let config = Config::default();
        let registry = ToolRegistry::from_config(&config);
        let (target, seconds) = TimeoutMiddleware::resolve(
            &config,
            &registry,
            &request_with("execute_workflow", json!({"workflow_def": {"name": "deploy"}})),
        );
        assert_eq!(target, "deploy");
        assert_eq!(seconds, LONG_RUNNING_TIMEOUT_SECS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_for_generic_dispatch_path() {
        let mut config = Config::default();
        config.tool_timeouts.insert("slow".to_string(), 1);
        let registry = Arc::new(ToolRegistry::from_config(&config));

        let never_finishes: ToolHandler = Arc::new(|_ctx, _req| {
            async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(CallReply::success("too late"))
            }
            .boxed()
        });

        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(RecoveryMiddleware {
                hooks: Arc::new(NoopHook),
            }),
            Arc::new(TimeoutMiddleware {
                config: Arc::new(config),
                registry,
            }),
        ];
        let handler = compose(never_finishes, &chain);

        let reply = handler(
            context(None),
            request_with("execute_tool", json!({"tool_name": "slow"})),
        )
        .await
        .unwrap();
        assert!(reply.is_error());
        assert!(reply.text.contains("timed out"));
        assert!(reply.text.contains("slow"));
    }

    #[tokio::test]
    async fn test_rate_limit_denial_names_session() {
        let limiter = Arc::new(SessionRateLimiter::new(RateLimitConfig {
            rps: 0.001,
            burst: 1,
        }));
        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(RecoveryMiddleware {
                hooks: Arc::new(NoopHook),
            }),
            Arc::new(RateLimitMiddleware { limiter }),
        ];
        let handler = compose(ok_handler("ok"), &chain);

        let session = Session::new("sess-42", "u", "u@x", vec![]);
        let first = handler(context(Some(session.clone())), request("t"))
            .await
            .unwrap();
        assert!(!first.is_error());

        let second = handler(context(Some(session)), request("t")).await.unwrap();
        assert!(second.is_error());
        assert!(second.text.contains("sess-42"));
    }

    #[tokio::test]
    async fn test_auth_required_rejects_anonymous() {
        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(RecoveryMiddleware {
                hooks: Arc::new(NoopHook),
            }),
            Arc::new(AuthMiddleware { require_auth: true }),
        ];
        let handler = compose(ok_handler("ok"), &chain);

        let reply = handler(context(None), request("t")).await.unwrap();
        assert!(reply.is_error());
        assert!(reply.text.contains("Authentication required"));

        let anonymous = Session::anonymous("s");
        let reply = handler(context(Some(anonymous)), request("t")).await.unwrap();
        assert!(reply.is_error());

        let user = Session::new("s", "u-1", "u@x", vec![]);
        let reply = handler(context(Some(user)), request("t")).await.unwrap();
        assert!(!reply.is_error());
    }

    #[tokio::test]
    async fn test_permission_denied_names_requirement() {
        let mut config = Config::default();
        config.whitelisted_tools = vec![WhitelistedTool {
            name: "delete_user".to_string(),
            required_permissions: vec!["admin".to_string()],
            ..Default::default()
        }];
        let registry = Arc::new(ToolRegistry::from_config(&config));

        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(RecoveryMiddleware {
                hooks: Arc::new(NoopHook),
            }),
            Arc::new(PermissionMiddleware { registry }),
        ];
        let handler = compose(ok_handler("ok"), &chain);

        let session = Session::new("s", "u", "u@x", vec!["user".to_string()]);
        let reply = handler(context(Some(session)), request("delete_user"))
            .await
            .unwrap();
        assert!(reply.is_error());
        assert!(reply.text.contains("Permission denied"));
        assert!(reply.text.contains("admin"));

        let admin = Session::new("s", "u", "u@x", vec!["admin".to_string()]);
        let reply = handler(context(Some(admin)), request("delete_user"))
            .await
            .unwrap();
        assert!(!reply.is_error());
    }

    #[tokio::test]
    async fn test_unrestricted_tool_allows_anonymous() {
        let registry = Arc::new(ToolRegistry::from_config(&Config::default()));
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(PermissionMiddleware { registry })];
        let handler = compose(ok_handler("ok"), &chain);

        let reply = handler(context(None), request("list_sources")).await.unwrap();
        assert!(!reply.is_error());
    }
}
