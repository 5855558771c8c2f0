//! The innermost tool handler the middleware chain wraps.

use std::sync::Arc;

use automcp_platform::{CreateSourceOptions, DiscoverSourceRequest, PlatformClient, ToolSummary};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::{
    config::Config,
    error::{ServerError, ServerResult},
    execution::{ExecuteToolArgs, ExecuteWorkflowArgs, Executor, RenderMeta},
    middleware::{CallContext, CallReply, CallRequest, ToolHandler},
    registry::{search_tools, ToolRegistry, ToolSearchQuery},
};

pub(crate) struct HandlerDeps {
    pub config: Arc<Config>,
    pub registry: Arc<ToolRegistry>,
    pub platform: Arc<PlatformClient>,
    pub executor: Arc<Executor>,
}

/// Build the base handler closure over the shared dependencies.
pub(crate) fn base_handler(deps: Arc<HandlerDeps>) -> ToolHandler {
    Arc::new(move |ctx: CallContext, req: CallRequest| {
        let deps = deps.clone();
        async move { dispatch(&deps, &ctx, req).await }.boxed()
    })
}

fn parse_args<T: DeserializeOwned>(arguments: Map<String, Value>) -> ServerResult<T> {
    serde_json::from_value(Value::Object(arguments))
        .map_err(|e| ServerError::validation(format!("invalid arguments: {e}")))
}

fn required_str(arguments: &Map<String, Value>, name: &str) -> ServerResult<String> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| ServerError::validation(format!("{name} parameter is required")))
}

async fn dispatch(
    deps: &HandlerDeps,
    ctx: &CallContext,
    req: CallRequest,
) -> ServerResult<CallReply> {
    // Whitelist mode resolves by the tool's own name.
    if let Some(tool) = deps.registry.whitelisted(&req.tool) {
        let tool = tool.clone();
        return deps.executor.execute_whitelisted(ctx, &tool, req.arguments).await;
    }

    match req.tool.as_str() {
        "execute_tool" => {
            let args: ExecuteToolArgs = parse_args(req.arguments)?;
            deps.executor.execute_tool(ctx, args).await
        }
        "execute_workflow" => {
            let args: ExecuteWorkflowArgs = parse_args(req.arguments)?;
            deps.executor.execute_workflow(ctx, args).await
        }
        "create_on_demand_tool" => {
            if !deps.config.capabilities.allow_dynamic_tools {
                return Err(ServerError::validation(
                    "dynamic tool creation is disabled on this server",
                ));
            }
            let args: ExecuteToolArgs = parse_args(req.arguments)?;
            deps.executor.create_on_demand_tool(ctx, args).await
        }
        "execute_whitelisted_tool" => {
            let name = required_str(&req.arguments, "tool_name")?;
            let tool = deps
                .config
                .whitelisted_tools
                .iter()
                .find(|t| t.name == name)
                .cloned()
                .ok_or_else(|| {
                    ServerError::validation(format!("'{name}' is not a whitelisted tool"))
                })?;
            let values = req
                .arguments
                .get("args")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            deps.executor.execute_whitelisted(ctx, &tool, values).await
        }

        "list_runners" => {
            let runners = deps.platform.list_runners().await?;
            Ok(CallReply::json(serde_json::to_value(runners)?))
        }
        "check_runner_health" => {
            let name = required_str(&req.arguments, "runner")?;
            let runner = deps.platform.get_runner(&name).await?;
            let healthy = runner
                .health
                .as_ref()
                .map(|h| h.is_healthy())
                .unwrap_or(false);
            let mut value = serde_json::to_value(&runner)?;
            value["healthy"] = json!(healthy);
            Ok(CallReply::json(value))
        }
        "find_available_runner" => {
            let name = deps.executor.find_best_runner().await?;
            Ok(CallReply::success(format!("Best available runner: {name}")))
        }

        "list_sources" => {
            let sources = deps.platform.list_sources().await?;
            Ok(CallReply::json(serde_json::to_value(sources)?))
        }
        "list_agents" => {
            let agents = deps.platform.list_agents().await?;
            Ok(CallReply::json(serde_json::to_value(agents)?))
        }
        "list_integrations" => {
            let integrations = deps.platform.list_integrations().await?;
            Ok(CallReply::json(serde_json::to_value(integrations)?))
        }
        "list_secrets" => {
            let secrets = deps.platform.list_secrets().await?;
            Ok(CallReply::json(serde_json::to_value(secrets)?))
        }

        "search_tools" => {
            let query: ToolSearchQuery = parse_args(req.arguments)?;
            let corpus = collect_source_tools(&deps.platform).await?;
            let page = search_tools(&corpus, &query);
            Ok(CallReply::json(serde_json::to_value(page)?))
        }

        "list_kb" => {
            let limit = req.arguments.get("limit").and_then(Value::as_u64).map(|v| v as u32);
            let items = deps.platform.list_knowledge("", limit).await?;
            Ok(CallReply::json(serde_json::to_value(items)?))
        }
        "search_kb" => {
            let query = required_str(&req.arguments, "query")?;
            let limit = req.arguments.get("limit").and_then(Value::as_u64).map(|v| v as u32);
            let items = deps.platform.list_knowledge(&query, limit).await?;
            Ok(CallReply::json(serde_json::to_value(items)?))
        }
        "get_kb" => {
            let uuid = required_str(&req.arguments, "uuid")?;
            let item = deps.platform.get_knowledge(&uuid).await?;
            Ok(CallReply::json(serde_json::to_value(item)?))
        }

        "create_runner" | "delete_runner" | "create_source" | "create_integration"
        | "chat_with_agent" | "execute_tool_from_source" | "discover_source" => {
            if !deps.config.capabilities.allow_platform_apis {
                return Err(ServerError::validation(format!(
                    "'{}' requires platform APIs to be enabled",
                    req.tool
                )));
            }
            let req = req.clone();
            dispatch_advanced(deps, ctx, req).await
        }

        other => Err(ServerError::validation(format!("Unknown tool '{other}'"))),
    }
}

async fn dispatch_advanced(
    deps: &HandlerDeps,
    ctx: &CallContext,
    req: CallRequest,
) -> ServerResult<CallReply> {
    match req.tool.as_str() {
        "create_runner" => {
            let name = required_str(&req.arguments, "name")?;
            let runner = deps.platform.create_runner(&name).await?;
            Ok(CallReply::json(serde_json::to_value(runner)?))
        }
        "delete_runner" => {
            let name = required_str(&req.arguments, "name")?;
            deps.platform.delete_runner(&name).await?;
            Ok(CallReply::success(format!("Runner '{name}' deleted")))
        }
        "create_source" => {
            let url = required_str(&req.arguments, "url")?;
            let options = CreateSourceOptions {
                name: req
                    .arguments
                    .get("name")
                    .and_then(Value::as_str)
                    .map(String::from),
                runner: req
                    .arguments
                    .get("runner")
                    .and_then(Value::as_str)
                    .map(String::from),
                ..Default::default()
            };
            let source = deps.platform.create_source(&url, &options).await?;
            Ok(CallReply::json(serde_json::to_value(source)?))
        }
        "create_integration" => {
            let provider = required_str(&req.arguments, "provider")?;
            if provider != "github" {
                return Err(ServerError::validation(format!(
                    "unsupported integration provider '{provider}'"
                )));
            }
            let url = deps.platform.create_github_integration().await?;
            Ok(CallReply::success(format!(
                "Complete the installation at: {url}"
            )))
        }
        "chat_with_agent" => {
            let agent = required_str(&req.arguments, "agent")?;
            let message = required_str(&req.arguments, "message")?;
            let session_id = req
                .arguments
                .get("session_id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty());
            let stream = deps.platform.send_message(&agent, &message, session_id).await?;
            deps.executor
                .reduce_stream(
                    ctx,
                    stream,
                    RenderMeta {
                        title: format!("Agent: {agent}"),
                        runner: "n/a".to_string(),
                    },
                )
                .await
        }
        "execute_tool_from_source" => {
            let source_uuid = required_str(&req.arguments, "source_uuid")?;
            let tool_name = required_str(&req.arguments, "tool_name")?;
            let metadata = deps.platform.get_source_metadata(&source_uuid).await?;
            if !metadata.tools.iter().any(|t| t.name == tool_name) {
                return Err(ServerError::validation(format!(
                    "tool '{tool_name}' not found in source {source_uuid}"
                )));
            }
            let args = ExecuteToolArgs {
                tool_name,
                args: req
                    .arguments
                    .get("args")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
                runner: req
                    .arguments
                    .get("runner")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                ..Default::default()
            };
            deps.executor.execute_tool(ctx, args).await
        }
        "discover_source" => {
            let url = required_str(&req.arguments, "url")?;
            let request = DiscoverSourceRequest {
                url,
                runner: req
                    .arguments
                    .get("runner")
                    .and_then(Value::as_str)
                    .map(String::from),
                ..Default::default()
            };
            let metadata = deps.platform.discover_source(&request).await?;
            Ok(CallReply::json(serde_json::to_value(metadata)?))
        }
        other => Err(ServerError::validation(format!("Unknown tool '{other}'"))),
    }
}

/// Pull every source's tool listing for search, tagging each summary
/// with its source.
async fn collect_source_tools(platform: &PlatformClient) -> ServerResult<Vec<ToolSummary>> {
    let sources = platform.list_sources().await?;
    let mut corpus = Vec::new();
    for source in sources {
        match platform.get_source_metadata(&source.uuid).await {
            Ok(metadata) => {
                for mut tool in metadata.tools {
                    tool.source_uuid.get_or_insert_with(|| source.uuid.clone());
                    corpus.push(tool);
                }
            }
            // One broken source must not hide the rest of the catalog.
            Err(e) => tracing::warn!(source = %source.uuid, error = %e, "Skipping source metadata"),
        }
    }
    Ok(corpus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{integrations::IntegrationRegistry, sandbox::SandboxPool};

    fn deps(config: Config) -> Arc<HandlerDeps> {
        let config = Arc::new(config);
        let platform = Arc::new(PlatformClient::new("http://127.0.0.1:9", None).unwrap());
        Arc::new(HandlerDeps {
            registry: Arc::new(ToolRegistry::from_config(&config)),
            executor: Arc::new(Executor::new(
                platform.clone(),
                Arc::new(IntegrationRegistry::builtin()),
                config.clone(),
                Arc::new(SandboxPool::default()),
            )),
            platform,
            config,
        })
    }

    fn ctx() -> CallContext {
        CallContext::new("s1", None)
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected() {
        let handler = base_handler(deps(Config::default()));
        let err = handler(ctx(), CallRequest::new("not_a_tool", Map::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_execute_tool_requires_name() {
        let handler = base_handler(deps(Config::default()));
        let err = handler(ctx(), CallRequest::new("execute_tool", Map::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("tool_name parameter is required"));
    }

    #[tokio::test]
    async fn test_dynamic_tools_gated() {
        let handler = base_handler(deps(Config::default()));
        let err = handler(ctx(), CallRequest::new("create_on_demand_tool", Map::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[tokio::test]
    async fn test_platform_apis_gated_even_when_invoked_by_name() {
        let handler = base_handler(deps(Config::default()));
        let mut args = Map::new();
        args.insert("name".to_string(), json!("r1"));
        let err = handler(ctx(), CallRequest::new("delete_runner", args))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("platform APIs"));
    }

    #[tokio::test]
    async fn test_whitelisted_tool_unknown_name() {
        let handler = base_handler(deps(Config::default()));
        let mut args = Map::new();
        args.insert("tool_name".to_string(), json!("ghost"));
        let err = handler(ctx(), CallRequest::new("execute_whitelisted_tool", args))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a whitelisted tool"));
    }
}
