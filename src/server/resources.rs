//! Read-only JSON resources backed by the platform catalog.

use automcp_platform::PlatformClient;
use serde_json::Value;

use crate::error::{ServerError, ServerResult};

pub const RESOURCE_SCHEME: &str = "automcp";

/// Static resources served by every configuration.
pub const STATIC_RESOURCES: &[(&str, &str, &str)] = &[
    ("automcp://runners", "runners", "Execution runners and their health"),
    ("automcp://sources", "sources", "Registered tool sources"),
    ("automcp://agents", "agents", "Conversational agents"),
    ("automcp://integrations", "integrations", "Configured integrations"),
    ("automcp://knowledge", "knowledge", "Knowledge base entries"),
];

/// Templated resource querying the composer's example library.
pub const EXAMPLES_TEMPLATE: &str = "automcp://examples/{query}/{limit}";

/// Resolve a resource URI to its JSON content.
pub async fn read_resource(platform: &PlatformClient, uri: &str) -> ServerResult<Value> {
    match uri {
        "automcp://runners" => Ok(serde_json::to_value(platform.list_runners().await?)?),
        "automcp://sources" => Ok(serde_json::to_value(platform.list_sources().await?)?),
        "automcp://agents" => Ok(serde_json::to_value(platform.list_agents().await?)?),
        "automcp://integrations" => {
            Ok(serde_json::to_value(platform.list_integrations().await?)?)
        }
        "automcp://knowledge" => {
            Ok(serde_json::to_value(platform.list_knowledge("", None).await?)?)
        }
        other => {
            if let Some((query, limit)) = parse_examples_uri(other) {
                return Ok(platform.query_examples(&query, limit).await?);
            }
            Err(ServerError::validation(format!("unknown resource '{other}'")))
        }
    }
}

/// Parse `automcp://examples/{query}/{limit}`.
fn parse_examples_uri(uri: &str) -> Option<(String, u32)> {
    let rest = uri.strip_prefix("automcp://examples/")?;
    let (query, limit) = rest.rsplit_once('/')?;
    if query.is_empty() {
        return None;
    }
    let limit: u32 = limit.parse().ok()?;
    Some((query.to_string(), limit))
}
