//! Tool registry: the static catalog and the dynamic whitelist.
//!
//! The two registration modes are exclusive: a non-empty whitelist hides
//! the catalog entirely and every whitelisted tool is registered as an
//! individually-named MCP tool with a typed argument schema.

mod catalog;
mod schema;
mod search;

use std::collections::HashMap;

use automcp_platform::ToolArgSpec;

use crate::config::{Config, WhitelistedTool};

pub use schema::{argument_schema, map_arg_type};
pub use search::{search_tools, SearchPage, ToolSearchQuery, MAX_PAGE_SIZE};

/// Deployment environments a tool can be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentClass {
    Development,
    Production,
}

/// Registry-facing description of one callable tool.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub arguments: Vec<ToolArgSpec>,
    /// Caller must hold at least one of these (admin always qualifies).
    /// Empty means unrestricted.
    pub required_permissions: Vec<String>,
    /// When set, the tool only exists in that environment.
    pub environment: Option<EnvironmentClass>,
    /// Maintenance-class tools are hidden during business hours.
    pub maintenance: bool,
    pub long_running: bool,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            arguments: Vec::new(),
            required_permissions: Vec::new(),
            environment: None,
            maintenance: false,
            long_running: false,
        }
    }

    #[must_use]
    pub fn with_arg(mut self, arg: ToolArgSpec) -> Self {
        debug_assert!(
            !self.arguments.iter().any(|a| a.name == arg.name),
            "duplicate argument name"
        );
        self.arguments.push(arg);
        self
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.required_permissions = permissions;
        self
    }

    #[must_use]
    pub fn maintenance(mut self) -> Self {
        self.maintenance = true;
        self
    }

    #[must_use]
    pub fn long_running(mut self) -> Self {
        self.long_running = true;
        self
    }

    #[must_use]
    pub fn environment(mut self, class: EnvironmentClass) -> Self {
        self.environment = Some(class);
        self
    }
}

/// Which registration mode the registry was built in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryMode {
    Catalog,
    Whitelist,
}

pub struct ToolRegistry {
    mode: RegistryMode,
    descriptors: Vec<ToolDescriptor>,
    whitelist: HashMap<String, WhitelistedTool>,
}

impl ToolRegistry {
    pub fn from_config(config: &Config) -> Self {
        if config.whitelist_mode() {
            let mut descriptors = Vec::with_capacity(config.whitelisted_tools.len());
            let mut whitelist = HashMap::with_capacity(config.whitelisted_tools.len());
            for tool in &config.whitelisted_tools {
                descriptors.push(Self::whitelist_descriptor(tool));
                whitelist.insert(tool.name.clone(), tool.clone());
            }
            let mut registry = Self {
                mode: RegistryMode::Whitelist,
                descriptors,
                whitelist,
            };
            registry.apply_permission_overrides(&config.tool_permissions);
            registry
        } else {
            let mut registry = Self {
                mode: RegistryMode::Catalog,
                descriptors: catalog::catalog_descriptors(&config.capabilities),
                whitelist: HashMap::new(),
            };
            registry.apply_permission_overrides(&config.tool_permissions);
            registry
        }
    }

    fn whitelist_descriptor(tool: &WhitelistedTool) -> ToolDescriptor {
        let mut descriptor = ToolDescriptor::new(
            tool.name.clone(),
            if tool.description.is_empty() {
                format!("Run the pre-configured tool '{}'", tool.name)
            } else {
                tool.description.clone()
            },
        )
        .with_permissions(tool.required_permissions.clone());
        if tool.tool.long_running {
            descriptor = descriptor.long_running();
        }
        descriptor.arguments = tool.arguments.clone();
        descriptor
    }

    /// Config `tool_permissions` replaces a descriptor's requirement list.
    fn apply_permission_overrides(&mut self, overrides: &HashMap<String, Vec<String>>) {
        for descriptor in &mut self.descriptors {
            if let Some(perms) = overrides.get(&descriptor.name) {
                descriptor.required_permissions = perms.clone();
            }
        }
    }

    pub fn mode(&self) -> RegistryMode {
        self.mode
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn whitelisted(&self, name: &str) -> Option<&WhitelistedTool> {
        self.whitelist.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitelist_mode_registers_only_configured() {
        let mut config = Config::default();
        config.whitelisted_tools = vec![WhitelistedTool {
            name: "db_query".to_string(),
            arguments: vec![ToolArgSpec::new("query", "string").required()],
            ..Default::default()
        }];

        let registry = ToolRegistry::from_config(&config);
        assert_eq!(registry.mode(), RegistryMode::Whitelist);
        assert_eq!(registry.descriptors().len(), 1);

        let descriptor = registry.get("db_query").unwrap();
        assert_eq!(descriptor.arguments.len(), 1);
        assert!(descriptor.arguments[0].required);
        assert!(registry.whitelisted("db_query").is_some());
        assert!(registry.get("execute_tool").is_none());
    }

    #[test]
    fn test_catalog_mode_base_set() {
        let registry = ToolRegistry::from_config(&Config::default());
        assert_eq!(registry.mode(), RegistryMode::Catalog);
        for name in [
            "execute_tool",
            "execute_workflow",
            "create_on_demand_tool",
            "execute_whitelisted_tool",
            "list_runners",
            "search_tools",
            "check_runner_health",
        ] {
            assert!(registry.get(name).is_some(), "missing {name}");
        }
        // Advanced mutators stay off without allow_platform_apis.
        assert!(registry.get("create_runner").is_none());
        assert!(registry.get("discover_source").is_none());
    }

    #[test]
    fn test_catalog_advanced_set() {
        let mut config = Config::default();
        config.capabilities.allow_platform_apis = true;
        let registry = ToolRegistry::from_config(&config);
        for name in [
            "create_runner",
            "delete_runner",
            "create_source",
            "create_integration",
            "chat_with_agent",
            "execute_tool_from_source",
            "discover_source",
        ] {
            assert!(registry.get(name).is_some(), "missing {name}");
        }
    }

    #[test]
    fn test_permission_overrides_apply() {
        let mut config = Config::default();
        config
            .tool_permissions
            .insert("execute_tool".to_string(), vec!["operator".to_string()]);
        let registry = ToolRegistry::from_config(&config);
        assert_eq!(
            registry.get("execute_tool").unwrap().required_permissions,
            vec!["operator".to_string()]
        );
    }
}
