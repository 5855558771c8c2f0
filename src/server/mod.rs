//! MCP dispatcher: registers tools, resources, and prompts with the
//! transport and routes inbound calls through the middleware chain.

mod handlers;
mod prompts;
mod resources;

use std::{borrow::Cow, sync::Arc, time::Instant};

use automcp_platform::PlatformClient;
use rmcp::{
    model::{
        AnnotateAble, CallToolRequestParam, CallToolResult, Content, GetPromptRequestParam,
        GetPromptResult,
        Implementation, ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult,
        ListToolsResult, PaginatedRequestParam, Prompt, PromptArgument, PromptMessage,
        PromptMessageRole, RawResource, RawResourceTemplate, ReadResourceRequestParam,
        ReadResourceResult, RequestId, ResourceContents, ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
    ErrorData, RoleServer, ServerHandler,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    config::Config,
    error::ServerError,
    execution::Executor,
    filter::{FilterChain, FilterContext, QuotaPredicate},
    hooks::{CompositeHook, ErrorCaptureHook, LoggingHook, MetricsHook, ServerHook},
    integrations::IntegrationRegistry,
    metrics::ServerMetrics,
    middleware::{compose, standard_chain, CallContext, CallReply, CallRequest, ToolHandler},
    rate_limit::{RateLimiterHook, SessionRateLimiter},
    registry::{argument_schema, ToolRegistry},
    sandbox::SandboxPool,
    session::{Session, SessionStore},
};

pub use prompts::{PromptArgSpec, PromptRegistry, RegisteredPrompt};
pub use resources::{read_resource, EXAMPLES_TEMPLATE, STATIC_RESOURCES};

use handlers::{base_handler, HandlerDeps};

/// Caller identity extracted from the transport context.
#[derive(Debug, Clone)]
struct ClientIdentity {
    session_id: String,
    user_id: String,
    email: String,
    permissions: Vec<String>,
}

#[derive(Clone)]
pub struct GatewayServer {
    config: Arc<Config>,
    registry: Arc<ToolRegistry>,
    filters: Arc<FilterChain>,
    sessions: Arc<SessionStore>,
    hooks: Arc<CompositeHook>,
    handler: ToolHandler,
    platform: Arc<PlatformClient>,
    prompts: Arc<PromptRegistry>,
    metrics: Arc<ServerMetrics>,
    error_capture: Arc<ErrorCaptureHook>,
    environment: Arc<str>,
}

impl GatewayServer {
    pub fn new(
        config: Config,
        platform: PlatformClient,
        prompts: Arc<PromptRegistry>,
        extra_hooks: Vec<Arc<dyn ServerHook>>,
        quota: Option<QuotaPredicate>,
    ) -> Self {
        let config = Arc::new(config);
        let platform = Arc::new(platform);

        let metrics = Arc::new(ServerMetrics::new());
        let error_capture = Arc::new(ErrorCaptureHook::new());
        let limiter = Arc::new(SessionRateLimiter::new(config.rate_limit));

        let mut observers: Vec<Arc<dyn ServerHook>> = vec![
            Arc::new(LoggingHook),
            error_capture.clone(),
            Arc::new(MetricsHook::new(metrics.clone())),
            Arc::new(RateLimiterHook::new(limiter.clone())),
        ];
        observers.extend(extra_hooks);
        let hooks = Arc::new(CompositeHook::new(observers));

        let sessions = Arc::new(SessionStore::new(
            std::time::Duration::from_secs(config.session_timeout_seconds),
            hooks.clone(),
        ));

        let registry = Arc::new(ToolRegistry::from_config(&config));
        let integrations = Arc::new(IntegrationRegistry::with_user_templates(
            &config.integration_templates,
        ));
        let executor = Arc::new(Executor::new(
            platform.clone(),
            integrations,
            config.clone(),
            Arc::new(SandboxPool::default()),
        ));

        let filters = Arc::new(FilterChain::from_config(&config, quota));

        let inner = base_handler(Arc::new(HandlerDeps {
            config: config.clone(),
            registry: registry.clone(),
            platform: platform.clone(),
            executor,
        }));
        let chain = standard_chain(
            config.clone(),
            registry.clone(),
            limiter,
            hooks.clone(),
        );
        let handler = compose(inner, &chain);

        let environment: Arc<str> = std::env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "production".to_string())
            .into();

        Self {
            config,
            registry,
            filters,
            sessions,
            hooks,
            handler,
            platform,
            prompts,
            metrics,
            error_capture,
            environment,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    pub fn error_capture(&self) -> &Arc<ErrorCaptureHook> {
        &self.error_capture
    }

    pub fn hooks(&self) -> &Arc<CompositeHook> {
        &self.hooks
    }

    fn resolve_identity(context: &RequestContext<RoleServer>) -> ClientIdentity {
        if let Some(parts) = context.extensions.get::<axum::http::request::Parts>() {
            let header = |name: &str| {
                parts
                    .headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
            };
            ClientIdentity {
                session_id: header("mcp-session-id").unwrap_or_else(|| "anonymous".to_string()),
                user_id: header("x-user-id").unwrap_or_default(),
                email: header("x-user-email").unwrap_or_default(),
                permissions: header("x-user-permissions")
                    .map(|s| split_csv(&s))
                    .unwrap_or_default(),
            }
        } else {
            // stdio transport is single-user; identity comes from the
            // launching environment.
            ClientIdentity {
                session_id: "stdio".to_string(),
                user_id: std::env::var("AUTOMCP_USER_ID").unwrap_or_default(),
                email: std::env::var("AUTOMCP_USER_EMAIL").unwrap_or_default(),
                permissions: std::env::var("AUTOMCP_USER_PERMISSIONS")
                    .map(|s| split_csv(&s))
                    .unwrap_or_default(),
            }
        }
    }

    /// Sessions exist in the store only for authenticated callers;
    /// anonymous callers get a per-call context with no stored state.
    fn ensure_session(&self, identity: &ClientIdentity) -> Option<Session> {
        if identity.user_id.is_empty() {
            return None;
        }
        if let Some(session) = self.sessions.get(&identity.session_id) {
            return Some(session);
        }
        match self.sessions.create(
            &identity.session_id,
            &identity.user_id,
            &identity.email,
            identity.permissions.clone(),
        ) {
            Ok(session) => Some(session),
            // Lost a race with a concurrent call for the same session.
            Err(_) => self.sessions.get(&identity.session_id),
        }
    }

    fn call_context(&self, context: &RequestContext<RoleServer>) -> (ClientIdentity, CallContext) {
        let identity = Self::resolve_identity(context);
        let session = self.ensure_session(&identity);
        let ctx = CallContext {
            session_id: identity.session_id.clone(),
            session,
            request_id: request_id_string(&context.id),
            cancel: CancellationToken::new(),
        };
        (identity, ctx)
    }

    fn visible_tools(&self, session: Option<&Session>) -> Vec<Tool> {
        let filter_ctx = FilterContext::new(session, &self.environment);
        let descriptors = self
            .filters
            .apply(&filter_ctx, self.registry.descriptors().to_vec());
        descriptors
            .into_iter()
            .map(|descriptor| Tool {
                name: Cow::Owned(descriptor.name),
                title: None,
                description: Some(Cow::Owned(descriptor.description)),
                input_schema: Arc::new(argument_schema(&descriptor.arguments)),
                output_schema: None,
                annotations: None,
                icons: None,
            })
            .collect()
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn request_id_string(id: &RequestId) -> String {
    match id {
        RequestId::String(s) => s.to_string(),
        RequestId::Number(n) => n.to_string(),
    }
}

fn to_call_result(reply: CallReply) -> CallToolResult {
    if reply.is_error() {
        CallToolResult::error(vec![Content::text(reply.text)])
    } else {
        CallToolResult::success(vec![Content::text(reply.text)])
    }
}

fn to_error_data(error: &ServerError) -> ErrorData {
    match error {
        ServerError::Validation(message) => ErrorData::invalid_params(message.clone(), None),
        other => ErrorData::internal_error(other.to_string(), None),
    }
}

impl ServerHandler for GatewayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: self.config.server_name.clone(),
                title: Some(self.config.server_name.clone()),
                version: self.config.server_version.clone(),
                website_url: None,
                icons: None,
            },
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .enable_prompts()
                .build(),
            instructions: Some(
                "Exposes the automation platform's tools, workflows, and catalog. \
                 Use execute_tool/execute_workflow to run things; listers and \
                 resources are read-only."
                    .to_string(),
            ),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let identity = Self::resolve_identity(&context);
        let session = self.ensure_session(&identity);
        let tools = self.visible_tools(session.as_ref());
        debug!(session_id = %identity.session_id, count = tools.len(), "Listing tools");
        Ok(ListToolsResult {
            next_cursor: None,
            tools,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let (identity, ctx) = self.call_context(&context);
        let req = CallRequest::new(
            request.name.to_string(),
            request.arguments.unwrap_or_default(),
        );
        let tool = req.tool.clone();

        let started = Instant::now();
        let reply = match (self.handler)(ctx, req).await {
            Ok(reply) => reply,
            // The recovery middleware converts everything; this arm only
            // fires if the chain was assembled without it.
            Err(err) => CallReply::failure(err),
        };
        self.hooks.on_tool_call(
            &identity.session_id,
            &tool,
            started.elapsed(),
            reply.error.as_ref(),
        );
        Ok(to_call_result(reply))
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        let resources = STATIC_RESOURCES
            .iter()
            .map(|(uri, name, description)| {
                let mut raw = RawResource::new(*uri, name.to_string());
                raw.description = Some(description.to_string());
                raw.mime_type = Some("application/json".to_string());
                raw.no_annotation()
            })
            .collect();
        Ok(ListResourcesResult {
            next_cursor: None,
            resources,
        })
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, ErrorData> {
        let template = RawResourceTemplate {
            uri_template: EXAMPLES_TEMPLATE.to_string(),
            name: "examples".to_string(),
            title: None,
            description: Some("Workflow examples matching a query".to_string()),
            mime_type: Some("application/json".to_string()),
        };
        Ok(ListResourceTemplatesResult {
            next_cursor: None,
            resource_templates: vec![template.no_annotation()],
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        let identity = Self::resolve_identity(&context);
        let started = Instant::now();
        let result = read_resource(&self.platform, &request.uri).await;
        self.hooks.on_resource_read(
            &identity.session_id,
            &request.uri,
            started.elapsed(),
            result.as_ref().err(),
        );
        match result {
            Ok(value) => {
                let text = serde_json::to_string_pretty(&value)
                    .unwrap_or_else(|_| value.to_string());
                Ok(ReadResourceResult {
                    contents: vec![ResourceContents::text(text, request.uri)],
                })
            }
            Err(err) => Err(to_error_data(&err)),
        }
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, ErrorData> {
        let prompts = self
            .prompts
            .list()
            .into_iter()
            .map(|prompt| {
                let arguments: Vec<PromptArgument> = prompt
                    .arguments
                    .iter()
                    .map(|arg| PromptArgument {
                        name: arg.name.clone(),
                        title: None,
                        description: Some(arg.description.clone()),
                        required: Some(arg.required),
                    })
                    .collect();
                Prompt::new(
                    prompt.name,
                    Some(prompt.description),
                    (!arguments.is_empty()).then_some(arguments),
                )
            })
            .collect();
        Ok(ListPromptsResult {
            next_cursor: None,
            prompts,
        })
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, ErrorData> {
        let identity = Self::resolve_identity(&context);
        let started = Instant::now();
        let arguments = request.arguments.unwrap_or_default();
        let result = self.prompts.render(&request.name, &arguments);
        self.hooks.on_prompt_call(
            &identity.session_id,
            &request.name,
            started.elapsed(),
            result.as_ref().err(),
        );
        match result {
            Ok(text) => Ok(GetPromptResult {
                description: self.prompts.get(&request.name).map(|p| p.description),
                messages: vec![PromptMessage::new_text(PromptMessageRole::User, text)],
            }),
            Err(err) => Err(to_error_data(&err)),
        }
    }
}
