//! Client for the automation platform's REST and SSE APIs.
//!
//! ## Modules
//!
//! - [`client`]: REST endpoints and SSE-returning execution calls
//! - [`sse`]: SSE frame parsing and the typed event stream adapter
//! - [`stream`]: tagged stream events and per-execution state
//! - [`workflow`]: workflow execution with resume-by-execution-id

pub mod client;
pub mod error;
pub mod sse;
pub mod stream;
pub mod types;
pub mod workflow;

pub use client::PlatformClient;
pub use error::{PlatformError, PlatformResult};
pub use sse::{FrameStream, SseFrame, SseParser};
pub use stream::{ExecutionState, ExecutionStatus, StepStatus, StreamEvent, StreamFrame};
pub use types::{
    Agent, ComponentHealth, CreateSourceOptions, DiscoverSourceRequest, FileMount, Integration,
    KnowledgeItem, KnowledgeQueryRequest, PolicyVerdict, Runner, RunnerHealth, Secret, Source,
    SourceMetadata, ToolArgSpec, ToolDefinition, ToolSummary, VolumeMount,
    WorkflowExecutionRequest,
};
pub use workflow::{resumable_stream, ResumeFn, ResumePolicy, WorkflowClient};
