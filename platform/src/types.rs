//! Wire types for the automation platform REST API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Declared argument of a tool, as published by a source or configured
/// for a whitelisted tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ToolArgSpec {
    pub name: String,

    /// Scalar or composite type name: `string`, `number`, `int`,
    /// `boolean`, `object`, `array`. Unknown or empty means `string`.
    #[serde(default, rename = "type")]
    pub arg_type: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub required: bool,

    /// Closed set of accepted values, when the argument is an enum.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl ToolArgSpec {
    pub fn new(name: impl Into<String>, arg_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arg_type: arg_type.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }
}

/// A file copied into the execution environment before the tool runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMount {
    pub source: String,
    pub destination: String,
}

impl FileMount {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

/// A volume mounted into the execution environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub source: String,
    pub destination: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

/// The executable payload dispatched to the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ToolDefinition {
    pub name: String,

    /// Execution flavor: `docker`, `python`, `bash`.
    #[serde(default, rename = "type")]
    pub tool_type: String,

    /// Container image. If unset, an integration pass or the dispatch
    /// default must supply one before the definition leaves the process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Script body.
    #[serde(default)]
    pub content: String,

    /// Bound argument values.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub args: serde_json::Map<String, serde_json::Value>,

    /// `KEY` or `KEY=VALUE` entries, ordered.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub with_files: Vec<FileMount>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub with_volumes: Vec<VolumeMount>,

    /// Sidecar services, opaque to this client.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub with_services: Vec<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub long_running: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Env entries keyed by the part before `=` (whole entry when bare).
    pub fn env_key(entry: &str) -> &str {
        entry.split_once('=').map(|(k, _)| k).unwrap_or(entry)
    }
}

/// Health of one platform subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ComponentHealth {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.as_str(), "ok" | "healthy" | "ready")
    }
}

/// Per-subsystem health blocks returned by `GET /runners/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunnerHealth {
    #[serde(default)]
    pub runner: ComponentHealth,
    #[serde(default)]
    pub tool_manager: ComponentHealth,
    #[serde(default)]
    pub agent_manager: ComponentHealth,
}

impl RunnerHealth {
    pub fn is_healthy(&self) -> bool {
        self.runner.is_healthy() && self.tool_manager.is_healthy() && self.agent_manager.is_healthy()
    }
}

/// An execution host for tools and workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Runner {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<RunnerHealth>,
    /// Number of executions currently placed on this runner.
    #[serde(default)]
    pub active_executions: u32,
}

/// A catalog of tools, usually backed by a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Source {
    pub uuid: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<String>,
    #[serde(default)]
    pub tool_count: u32,
}

/// Summary of a tool published by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ToolSummary {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub tool_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ToolArgSpec>,
    #[serde(default)]
    pub long_running: bool,
}

/// Tool listing attached to a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SourceMetadata {
    pub uuid: String,
    #[serde(default)]
    pub tools: Vec<ToolSummary>,
}

/// Request body for `POST /sources/discover`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiscoverSourceRequest {
    pub url: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<String>,
}

/// Options for `POST /sources`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreateSourceOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Agent {
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Integration {
    pub name: String,
    #[serde(default, rename = "type")]
    pub integration_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Secret {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct KnowledgeItem {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// Request body for `POST /knowledge/query`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KnowledgeQueryRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// Verdict from the policy validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PolicyVerdict {
    #[serde(default)]
    pub allowed: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

/// Request body for `POST /workflows/execute`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkflowExecutionRequest {
    /// Workflow definition, passed through opaquely.
    pub definition: serde_json::Value,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub params: serde_json::Map<String, serde_json::Value>,
    /// Continuation point for a previously interrupted execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_from_execution_id: Option<String>,
}
