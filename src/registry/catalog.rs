//! The fixed catalog registered when no whitelist is configured.

use automcp_platform::ToolArgSpec;

use super::ToolDescriptor;
use crate::config::Capabilities;

fn arg(name: &str, arg_type: &str, description: &str) -> ToolArgSpec {
    ToolArgSpec::new(name, arg_type).with_description(description)
}

pub(super) fn catalog_descriptors(capabilities: &Capabilities) -> Vec<ToolDescriptor> {
    let mut tools = vec![
        ToolDescriptor::new(
            "execute_tool",
            "Execute a tool on the automation platform and stream its output",
        )
        .with_arg(arg("tool_name", "string", "Name of the tool to execute").required())
        .with_arg(arg("args", "object", "Argument values passed to the tool"))
        .with_arg(arg(
            "tool_def",
            "object",
            "Inline tool definition; overrides catalog lookup",
        ))
        .with_arg(arg(
            "integrations",
            "array",
            "Integration templates applied before dispatch",
        ))
        .with_arg(arg(
            "runner",
            "string",
            "Runner to execute on; 'auto' picks the best available",
        )),
        ToolDescriptor::new(
            "execute_workflow",
            "Execute a multi-step workflow and stream per-step progress",
        )
        .with_arg(arg("workflow_def", "object", "Workflow definition").required())
        .with_arg(arg("params", "object", "Workflow parameters"))
        .with_arg(arg("runner", "string", "Runner to execute on"))
        .long_running(),
        ToolDescriptor::new(
            "create_on_demand_tool",
            "Define and immediately execute a one-off tool",
        )
        .with_arg(arg("tool_def", "object", "Complete tool definition").required())
        .with_arg(arg(
            "integrations",
            "array",
            "Integration templates applied before dispatch",
        ))
        .with_arg(arg("runner", "string", "Runner to execute on")),
        ToolDescriptor::new(
            "execute_whitelisted_tool",
            "Execute a pre-configured tool by name",
        )
        .with_arg(arg("tool_name", "string", "Whitelisted tool name").required())
        .with_arg(arg("args", "object", "Argument values passed to the tool")),
        ToolDescriptor::new("list_sources", "List tool sources registered on the platform"),
        ToolDescriptor::new("list_agents", "List conversational agents"),
        ToolDescriptor::new("list_integrations", "List configured integrations"),
        ToolDescriptor::new("list_secrets", "List secret names available to tools"),
        ToolDescriptor::new("search_tools", "Search tools across all sources")
            .with_arg(arg("query", "string", "Case-insensitive substring match").required())
            .with_arg(arg("type", "string", "Restrict to a tool type"))
            .with_arg(arg("source_uuid", "string", "Restrict to one source"))
            .with_arg(arg(
                "long_running_only",
                "boolean",
                "Only return long-running tools",
            ))
            .with_arg(arg("page", "number", "1-based page number"))
            .with_arg(arg("page_size", "number", "Results per page (1-50)")),
        ToolDescriptor::new("list_kb", "List knowledge base entries")
            .with_arg(arg("limit", "number", "Maximum entries returned")),
        ToolDescriptor::new("search_kb", "Search the knowledge base")
            .with_arg(arg("query", "string", "Search query").required())
            .with_arg(arg("limit", "number", "Maximum entries returned")),
        ToolDescriptor::new("get_kb", "Fetch one knowledge base entry")
            .with_arg(arg("uuid", "string", "Entry UUID").required()),
    ];

    if capabilities.enable_runners {
        tools.push(ToolDescriptor::new(
            "list_runners",
            "List execution runners and their health",
        ));
        tools.push(
            ToolDescriptor::new(
                "check_runner_health",
                "Report per-subsystem health for one runner",
            )
            .with_arg(arg("runner", "string", "Runner name").required()),
        );
        tools.push(ToolDescriptor::new(
            "find_available_runner",
            "Pick the healthiest, least-loaded runner",
        ));
    }

    if capabilities.allow_platform_apis {
        tools.extend([
            ToolDescriptor::new("create_runner", "Register a new runner")
                .with_arg(arg("name", "string", "Runner name").required())
                .maintenance(),
            ToolDescriptor::new("delete_runner", "Remove a runner")
                .with_arg(arg("name", "string", "Runner name").required())
                .maintenance(),
            ToolDescriptor::new("create_source", "Register a tool source")
                .with_arg(arg("url", "string", "Repository URL").required())
                .with_arg(arg("name", "string", "Display name"))
                .with_arg(arg("runner", "string", "Runner used for discovery")),
            ToolDescriptor::new("create_integration", "Create a platform integration")
                .with_arg(
                    arg("provider", "string", "Integration provider")
                        .required()
                        .with_options(vec!["github".to_string()]),
                ),
            ToolDescriptor::new("chat_with_agent", "Send a message to an agent")
                .with_arg(arg("agent", "string", "Agent name").required())
                .with_arg(arg("message", "string", "Message text").required())
                .with_arg(arg("session_id", "string", "Conversation to continue")),
            ToolDescriptor::new(
                "execute_tool_from_source",
                "Execute a tool published by a specific source",
            )
            .with_arg(arg("source_uuid", "string", "Source UUID").required())
            .with_arg(arg("tool_name", "string", "Tool name within the source").required())
            .with_arg(arg("args", "object", "Argument values"))
            .with_arg(arg("runner", "string", "Runner to execute on")),
            ToolDescriptor::new("discover_source", "Inspect a source URL without registering it")
                .with_arg(arg("url", "string", "Repository URL").required())
                .with_arg(arg("runner", "string", "Runner used for discovery")),
        ]);
    }

    tools
}
