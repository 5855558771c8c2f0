//! Server configuration.
//!
//! Precedence, lowest to highest: built-in defaults, config file (JSON or
//! YAML by extension), environment variables, explicit runtime flags
//! (applied by the binary after [`Config::load`]).

use std::{collections::HashMap, path::Path};

use automcp_platform::{ToolArgSpec, ToolDefinition};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ServerError, ServerResult},
    integrations::IntegrationTemplate,
};

pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 3600;
/// Global per-call deadline when no override applies.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 20 * 60;
/// Deadline for operations pre-declared as long-running.
pub const LONG_RUNNING_TIMEOUT_SECS: u64 = 45 * 60;

/// Token bucket parameters applied per session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub rps: f64,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rps: 10.0,
            burst: 20,
        }
    }
}

/// Capability toggles gating what gets registered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default = "default_true")]
    pub enable_runners: bool,
    #[serde(default)]
    pub allow_platform_apis: bool,
    #[serde(default)]
    pub enable_opa_policies: bool,
    #[serde(default = "default_true")]
    pub enable_documentation: bool,
    #[serde(default)]
    pub allow_dynamic_tools: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            enable_runners: true,
            allow_platform_apis: false,
            enable_opa_policies: false,
            enable_documentation: true,
            allow_dynamic_tools: false,
        }
    }
}

/// Weekday/hour window inside which maintenance tools are hidden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHours {
    /// ISO weekday numbers, Monday = 1.
    pub weekdays: Vec<u32>,
    /// Window start, inclusive, local hour.
    pub start_hour: u32,
    /// Window end, exclusive, local hour.
    pub end_hour: u32,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            weekdays: vec![1, 2, 3, 4, 5],
            start_hour: 9,
            end_hour: 17,
        }
    }
}

/// A pre-configured tool exposed individually over MCP.
///
/// Immutable at runtime; loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WhitelistedTool {
    /// `tool_name` is accepted as a legacy alias.
    #[serde(alias = "tool_name")]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Complete embedded definition dispatched on invocation.
    #[serde(default)]
    pub tool: ToolDefinition,

    /// Integration templates applied, in order, before dispatch.
    #[serde(default)]
    pub integrations: Vec<String>,

    /// Fixed runner; empty means `default`.
    #[serde(default)]
    pub runner: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    /// Declared arguments, turned into the MCP argument schema.
    #[serde(default)]
    pub arguments: Vec<ToolArgSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_server_name")]
    pub server_name: String,

    #[serde(default = "default_server_version")]
    pub server_version: String,

    /// Platform API base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_session_timeout")]
    pub session_timeout_seconds: u64,

    #[serde(default)]
    pub require_auth: bool,

    #[serde(default)]
    pub enable_time_restrictions: bool,

    #[serde(default)]
    pub business_hours: BusinessHours,

    /// Per-tool feature flags; a tool mapped to `false` is hidden.
    #[serde(default)]
    pub feature_flags: HashMap<String, bool>,

    /// Tool name to required permission list.
    #[serde(default)]
    pub tool_permissions: HashMap<String, Vec<String>>,

    /// Per-tool timeout overrides, seconds.
    #[serde(default)]
    pub tool_timeouts: HashMap<String, u64>,

    #[serde(default)]
    pub whitelisted_tools: Vec<WhitelistedTool>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub capabilities: Capabilities,

    /// User-defined integration templates, merged over the builtins.
    #[serde(default)]
    pub integration_templates: Vec<IntegrationTemplate>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            server_version: default_server_version(),
            api_url: default_api_url(),
            api_key: None,
            session_timeout_seconds: default_session_timeout(),
            require_auth: false,
            enable_time_restrictions: false,
            business_hours: BusinessHours::default(),
            feature_flags: HashMap::new(),
            tool_permissions: HashMap::new(),
            tool_timeouts: HashMap::new(),
            whitelisted_tools: Vec::new(),
            rate_limit: RateLimitConfig::default(),
            capabilities: Capabilities::default(),
            integration_templates: Vec::new(),
        }
    }
}

impl Config {
    /// Load: defaults, then the optional file, then environment.
    pub fn load(path: Option<&Path>) -> ServerResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ServerResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ServerError::validation(format!("cannot read config {}: {e}", path.display()))
        })?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        if is_yaml {
            serde_yaml::from_str(&raw)
                .map_err(|e| ServerError::validation(format!("invalid YAML config: {e}")))
        } else {
            serde_json::from_str(&raw)
                .map_err(|e| ServerError::validation(format!("invalid JSON config: {e}")))
        }
    }

    /// Environment overrides sit between the file and runtime flags.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_bool("AUTOMCP_ENABLE_RUNNERS") {
            self.capabilities.enable_runners = v;
        }
        if let Some(v) = env_bool("AUTOMCP_ALLOW_PLATFORM_APIS") {
            self.capabilities.allow_platform_apis = v;
        }
        if let Some(v) = env_bool("AUTOMCP_REQUIRE_AUTH") {
            self.require_auth = v;
        }
        if let Some(v) = env_bool("AUTOMCP_OPA_ENFORCE") {
            self.capabilities.enable_opa_policies = v;
        }
        if let Ok(url) = std::env::var("AUTOMCP_API_URL") {
            if !url.is_empty() {
                self.api_url = url;
            }
        }
        if let Ok(key) = std::env::var("AUTOMCP_API_KEY") {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }
    }

    fn validate(&self) -> ServerResult<()> {
        if self.rate_limit.rps <= 0.0 {
            return Err(ServerError::validation("rate_limit.rps must be positive"));
        }
        if self.rate_limit.burst == 0 {
            return Err(ServerError::validation("rate_limit.burst must be positive"));
        }
        let mut seen = std::collections::HashSet::new();
        for tool in &self.whitelisted_tools {
            if tool.name.is_empty() {
                return Err(ServerError::validation("whitelisted tool without a name"));
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(ServerError::validation(format!(
                    "duplicate whitelisted tool '{}'",
                    tool.name
                )));
            }
            let mut args = std::collections::HashSet::new();
            for arg in &tool.arguments {
                if !args.insert(arg.name.as_str()) {
                    return Err(ServerError::validation(format!(
                        "duplicate argument '{}' on whitelisted tool '{}'",
                        arg.name, tool.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whitelist mode is active whenever any whitelisted tool is present.
    pub fn whitelist_mode(&self) -> bool {
        !self.whitelisted_tools.is_empty()
    }

    /// Effective timeout for a tool call, in seconds.
    pub fn timeout_for(&self, tool: &str, long_running: bool) -> u64 {
        if let Some(&secs) = self.tool_timeouts.get(tool) {
            return secs;
        }
        if long_running {
            return LONG_RUNNING_TIMEOUT_SECS;
        }
        DEFAULT_TOOL_TIMEOUT_SECS
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn default_server_name() -> String {
    "automcp".to_string()
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_api_url() -> String {
    "https://api.automation.local".to_string()
}

fn default_session_timeout() -> u64 {
    DEFAULT_SESSION_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.require_auth);
        assert!(!config.capabilities.allow_platform_apis);
        assert!(config.capabilities.enable_runners);
        assert_eq!(config.session_timeout_seconds, 3600);
        assert!(!config.whitelist_mode());
    }

    #[test]
    fn test_whitelist_legacy_alias() {
        let json = r#"{"whitelisted_tools": [{"tool_name": "db_query"}]}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.whitelisted_tools[0].name, "db_query");
        assert!(config.whitelist_mode());
    }

    #[test]
    fn test_duplicate_whitelist_rejected() {
        let mut config = Config::default();
        config.whitelisted_tools = vec![
            WhitelistedTool {
                name: "x".to_string(),
                ..Default::default()
            },
            WhitelistedTool {
                name: "x".to_string(),
                ..Default::default()
            },
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_argument_rejected() {
        let mut config = Config::default();
        config.whitelisted_tools = vec![WhitelistedTool {
            name: "x".to_string(),
            arguments: vec![ToolArgSpec::new("a", "string"), ToolArgSpec::new("a", "int")],
            ..Default::default()
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_resolution() {
        let mut config = Config::default();
        config.tool_timeouts.insert("slow".to_string(), 1);

        assert_eq!(config.timeout_for("slow", false), 1);
        assert_eq!(config.timeout_for("other", false), DEFAULT_TOOL_TIMEOUT_SECS);
        assert_eq!(config.timeout_for("other", true), LONG_RUNNING_TIMEOUT_SECS);
        // Explicit override beats the long-running class.
        assert_eq!(config.timeout_for("slow", true), 1);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("AUTOMCP_REQUIRE_AUTH", "true");
        std::env::set_var("AUTOMCP_ALLOW_PLATFORM_APIS", "1");
        std::env::set_var("AUTOMCP_ENABLE_RUNNERS", "off");

        let mut config = Config::default();
        config.apply_env();

        assert!(config.require_auth);
        assert!(config.capabilities.allow_platform_apis);
        assert!(!config.capabilities.enable_runners);

        std::env::remove_var("AUTOMCP_REQUIRE_AUTH");
        std::env::remove_var("AUTOMCP_ALLOW_PLATFORM_APIS");
        std::env::remove_var("AUTOMCP_ENABLE_RUNNERS");
    }

    #[test]
    #[serial]
    fn test_env_garbage_ignored() {
        std::env::set_var("AUTOMCP_REQUIRE_AUTH", "maybe");
        let mut config = Config::default();
        config.apply_env();
        assert!(!config.require_auth);
        std::env::remove_var("AUTOMCP_REQUIRE_AUTH");
    }

    #[test]
    fn test_yaml_config() {
        let yaml = "server_name: gateway\nrate_limit:\n  rps: 5\n  burst: 10\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server_name, "gateway");
        assert_eq!(config.rate_limit.burst, 10);
    }
}
