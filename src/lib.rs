//! MCP gateway for a remote automation platform.
//!
//! ## Modules
//!
//! - [`server`]: MCP dispatcher (tools, resources, prompts)
//! - [`middleware`]: the per-call chain (recovery, timeout, logging,
//!   rate-limit, auth, permission)
//! - [`execution`]: the streaming executor for tools and workflows
//! - [`registry`]: catalog and whitelist tool registration
//! - [`integrations`]: integration-template engine
//! - [`filter`]: tool visibility filters
//! - [`session`]: per-client session store
//! - [`hooks`]: lifecycle observers

pub mod config;
pub mod error;
pub mod execution;
pub mod filter;
pub mod hooks;
pub mod integrations;
pub mod metrics;
pub mod middleware;
pub mod rate_limit;
pub mod registry;
pub mod sandbox;
pub mod server;
pub mod session;

pub use config::{Capabilities, Config, RateLimitConfig, WhitelistedTool};
pub use error::{ServerError, ServerResult};
pub use execution::{ExecuteToolArgs, ExecuteWorkflowArgs, Executor};
pub use filter::{FilterChain, FilterContext, ToolFilter};
pub use hooks::{CompositeHook, ErrorCaptureHook, LoggingHook, MetricsHook, ServerHook};
pub use integrations::{IntegrationRegistry, IntegrationTemplate};
pub use metrics::ServerMetrics;
pub use middleware::{CallContext, CallReply, CallRequest, Middleware, ToolHandler};
pub use rate_limit::SessionRateLimiter;
pub use registry::{ToolDescriptor, ToolRegistry};
pub use sandbox::{SandboxPool, ScriptEngine};
pub use server::{GatewayServer, PromptRegistry, RegisteredPrompt};
pub use session::{Session, SessionStore};
