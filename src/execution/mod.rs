//! The streaming executor.
//!
//! Drives one tool or workflow call end-to-end: policy validation, runner
//! selection, integration folding, upstream dispatch, and reduction of
//! the event stream into a terminal MCP result.

mod reduce;

use std::{sync::Arc, time::Duration};

use automcp_platform::{
    FrameStream, PlatformClient, ToolDefinition, WorkflowExecutionRequest,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::{
    config::{Config, WhitelistedTool},
    error::{ServerError, ServerResult},
    integrations::IntegrationRegistry,
    middleware::{CallContext, CallReply},
    sandbox::SandboxPool,
};

pub use reduce::{truncate_echo, RenderMeta, StreamReducer, STEP_ECHO_LIMIT};

/// Image applied when nothing else supplied one before dispatch.
pub const DEFAULT_TOOL_IMAGE: &str = "alpine:3.20";

/// Arguments accepted by `execute_tool` and `create_on_demand_tool`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExecuteToolArgs {
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub tool_def: Option<ToolDefinition>,
    #[serde(default)]
    pub integrations: Vec<String>,
    #[serde(default)]
    pub runner: String,
}

/// Arguments accepted by `execute_workflow`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExecuteWorkflowArgs {
    #[serde(default)]
    pub workflow_def: Value,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub runner: String,
}

pub struct Executor {
    platform: Arc<PlatformClient>,
    integrations: Arc<IntegrationRegistry>,
    config: Arc<Config>,
    sandbox: Arc<SandboxPool>,
}

impl Executor {
    pub fn new(
        platform: Arc<PlatformClient>,
        integrations: Arc<IntegrationRegistry>,
        config: Arc<Config>,
        sandbox: Arc<SandboxPool>,
    ) -> Self {
        Self {
            platform,
            integrations,
            config,
            sandbox,
        }
    }

    /// Resolve the runner for a request.
    ///
    /// `auto` asks the registry for the best available; empty or
    /// `default` means the literal `default` runner; anything else passes
    /// through unchanged.
    pub async fn select_runner(&self, requested: &str) -> ServerResult<String> {
        match requested {
            "auto" => self.find_best_runner().await,
            "" | "default" => Ok("default".to_string()),
            other => Ok(other.to_string()),
        }
    }

    /// Healthiest runner with the fewest active executions.
    pub async fn find_best_runner(&self) -> ServerResult<String> {
        let runners = self.platform.list_runners().await?;
        runners
            .iter()
            .filter(|r| r.health.as_ref().map(|h| h.is_healthy()).unwrap_or(false))
            .min_by_key(|r| r.active_executions)
            .map(|r| r.name.clone())
            .ok_or_else(|| ServerError::ExecutionFailed("no healthy runner available".to_string()))
    }

    /// `execute_tool`: dispatch a named or inline-defined tool.
    pub async fn execute_tool(
        &self,
        ctx: &CallContext,
        args: ExecuteToolArgs,
    ) -> ServerResult<CallReply> {
        if args.tool_name.is_empty() {
            return Err(ServerError::validation("tool_name parameter is required"));
        }
        let definition = args
            .tool_def
            .clone()
            .unwrap_or_else(|| ToolDefinition::new(args.tool_name.clone()));
        self.dispatch_tool(ctx, &args.tool_name, definition, &args)
            .await
    }

    /// `create_on_demand_tool`: vet the submitted content, then dispatch.
    pub async fn create_on_demand_tool(
        &self,
        ctx: &CallContext,
        args: ExecuteToolArgs,
    ) -> ServerResult<CallReply> {
        let definition = args
            .tool_def
            .clone()
            .ok_or_else(|| ServerError::validation("tool_def parameter is required"))?;
        if definition.name.is_empty() {
            return Err(ServerError::validation("tool_def.name is required"));
        }
        self.sandbox
            .check(&ctx.cancel, &definition.name, &definition.content)
            .await?;
        let name = definition.name.clone();
        self.dispatch_tool(ctx, &name, definition, &args).await
    }

    /// Execute a pre-configured whitelisted tool with caller-supplied
    /// argument values.
    pub async fn execute_whitelisted(
        &self,
        ctx: &CallContext,
        tool: &WhitelistedTool,
        arguments: Map<String, Value>,
    ) -> ServerResult<CallReply> {
        for spec in &tool.arguments {
            if spec.required && !arguments.contains_key(&spec.name) {
                return Err(ServerError::validation(format!(
                    "missing required argument '{}' for tool '{}'",
                    spec.name, tool.name
                )));
            }
        }

        let mut definition = tool.tool.clone();
        if definition.name.is_empty() {
            definition.name = tool.name.clone();
        }
        definition.args.extend(arguments.clone());
        if let Some(seconds) = tool.timeout_seconds {
            definition.timeout_seconds = Some(seconds);
        }

        let request = ExecuteToolArgs {
            tool_name: tool.name.clone(),
            args: arguments,
            tool_def: None,
            integrations: tool.integrations.clone(),
            runner: tool.runner.clone(),
        };
        self.dispatch_tool(ctx, &tool.name, definition, &request)
            .await
    }

    async fn dispatch_tool(
        &self,
        ctx: &CallContext,
        name: &str,
        definition: ToolDefinition,
        args: &ExecuteToolArgs,
    ) -> ServerResult<CallReply> {
        let runner = self.select_runner(&args.runner).await?;

        if self.config.capabilities.enable_opa_policies {
            let verdict = self
                .platform
                .validate_tool_execution(name, &args.args, &runner)
                .await?;
            if !verdict.allowed {
                return Err(ServerError::PolicyDenied {
                    name: name.to_string(),
                    reason: verdict.message,
                    issues: verdict.issues,
                });
            }
        }

        let mut definition = self
            .integrations
            .apply_all(&definition, &args.integrations)?;
        // A definition with a script body must name an image by dispatch
        // time; integrations get first claim.
        if definition.image.is_none() && !definition.content.is_empty() {
            definition.image = Some(DEFAULT_TOOL_IMAGE.to_string());
        }

        // Same precedence the timeout middleware enforces locally: config
        // override, then the definition's own timeout, then the class
        // defaults. Keeps the advisory value sent upstream in step with
        // the deadline enforced here.
        let timeout = Duration::from_secs(
            self.config
                .tool_timeouts
                .get(name)
                .copied()
                .or(definition.timeout_seconds)
                .unwrap_or_else(|| self.config.timeout_for(name, definition.long_running)),
        );

        info!(tool = %name, runner = %runner, "Dispatching tool execution");
        let stream = self
            .platform
            .execute_tool_with_timeout(name, &definition, &runner, timeout, &args.args)
            .await?;

        let meta = RenderMeta {
            title: format!("Tool: {name}"),
            runner,
        };
        self.reduce_stream(ctx, stream, meta).await
    }

    /// `execute_workflow`: validate, dispatch with resume support, reduce.
    pub async fn execute_workflow(
        &self,
        ctx: &CallContext,
        args: ExecuteWorkflowArgs,
    ) -> ServerResult<CallReply> {
        if args.workflow_def.is_null() {
            return Err(ServerError::validation("workflow_def parameter is required"));
        }
        let name = args
            .workflow_def
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("workflow")
            .to_string();
        let runner = self.select_runner(&args.runner).await?;

        if self.config.capabilities.enable_opa_policies {
            let verdict = self
                .platform
                .validate_workflow_execution(&args.workflow_def, &args.params, &runner)
                .await?;
            if !verdict.allowed {
                return Err(ServerError::PolicyDenied {
                    name: name.clone(),
                    reason: verdict.message,
                    issues: verdict.issues,
                });
            }
        }

        info!(workflow = %name, runner = %runner, "Dispatching workflow execution");
        let request = WorkflowExecutionRequest {
            definition: args.workflow_def.clone(),
            params: args.params.clone(),
            resume_from_execution_id: None,
        };
        let stream = self
            .platform
            .workflow_client()
            .execute_workflow(request, &runner)
            .await?;

        let meta = RenderMeta {
            title: format!("Workflow: {name}"),
            runner,
        };
        self.reduce_stream(ctx, stream, meta).await
    }

    /// Reduce a frame stream to a terminal reply, abandoning promptly on
    /// cancellation (accumulated partial output is discarded).
    pub async fn reduce_stream(
        &self,
        ctx: &CallContext,
        mut stream: FrameStream,
        meta: RenderMeta,
    ) -> ServerResult<CallReply> {
        let mut reducer = StreamReducer::new();
        loop {
            let item = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    debug!(title = %meta.title, "Execution cancelled; abandoning stream");
                    return Err(ServerError::ExecutionFailed(
                        "execution cancelled".to_string(),
                    ));
                }
                item = stream.next() => item,
            };
            match item {
                Some(Ok(frame)) => {
                    let terminal = frame.event.is_terminal();
                    reducer.handle(&frame);
                    if terminal {
                        break;
                    }
                }
                Some(Err(e)) => {
                    // Stream-level failure: keep what arrived for debugging.
                    let rendered = reducer.render(&meta);
                    return Ok(CallReply::failure_with_text(
                        ServerError::Upstream(e),
                        rendered,
                    ));
                }
                None => break,
            }
        }

        let rendered = reducer.render(&meta);
        if reducer.succeeded() {
            Ok(CallReply::success(rendered))
        } else {
            let reason = reducer
                .state()
                .last_error
                .clone()
                .unwrap_or_else(|| "execution failed".to_string());
            Ok(CallReply::failure_with_text(
                ServerError::ExecutionFailed(reason),
                rendered,
            ))
        }
    }
}
