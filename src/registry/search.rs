//! Paginated tool search across source catalogs.

use automcp_platform::ToolSummary;
use serde::{Deserialize, Serialize};

pub const MAX_PAGE_SIZE: u32 = 50;
const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolSearchQuery {
    #[serde(default)]
    pub query: String,
    #[serde(default, rename = "type")]
    pub tool_type: Option<String>,
    #[serde(default)]
    pub source_uuid: Option<String>,
    #[serde(default)]
    pub long_running_only: bool,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub items: Vec<ToolSummary>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

/// Case-insensitive substring match over name and description, filtered
/// and paginated. `page` is 1-based; `page_size` clamps to [1, 50].
pub fn search_tools(tools: &[ToolSummary], query: &ToolSearchQuery) -> SearchPage {
    let needle = query.query.to_lowercase();
    let page = query.page.max(1);
    let page_size = if query.page_size == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        query.page_size.clamp(1, MAX_PAGE_SIZE)
    };

    let matches: Vec<&ToolSummary> = tools
        .iter()
        .filter(|tool| {
            if !needle.is_empty()
                && !tool.name.to_lowercase().contains(&needle)
                && !tool.description.to_lowercase().contains(&needle)
            {
                return false;
            }
            if let Some(tool_type) = &query.tool_type {
                if !tool_type.is_empty() && &tool.tool_type != tool_type {
                    return false;
                }
            }
            if let Some(source) = &query.source_uuid {
                if !source.is_empty() && tool.source_uuid.as_deref() != Some(source.as_str()) {
                    return false;
                }
            }
            if query.long_running_only && !tool.long_running {
                return false;
            }
            true
        })
        .collect();

    let total = matches.len() as u64;
    let start = ((page - 1) * page_size) as usize;
    let items = matches
        .into_iter()
        .skip(start)
        .take(page_size as usize)
        .cloned()
        .collect();

    SearchPage {
        items,
        page,
        page_size,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, description: &str) -> ToolSummary {
        ToolSummary {
            name: name.to_string(),
            description: description.to_string(),
            ..Default::default()
        }
    }

    fn corpus() -> Vec<ToolSummary> {
        vec![
            tool("deploy_app", "Deploy an application"),
            tool("db_backup", "Back up the Database"),
            ToolSummary {
                long_running: true,
                source_uuid: Some("src-1".to_string()),
                tool_type: "docker".to_string(),
                ..tool("migrate_db", "Run database migrations")
            },
        ]
    }

    #[test]
    fn test_case_insensitive_substring() {
        let page = search_tools(
            &corpus(),
            &ToolSearchQuery {
                query: "DATABASE".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(page.total, 2);
    }

    #[test]
    fn test_filters_compose() {
        let page = search_tools(
            &corpus(),
            &ToolSearchQuery {
                query: "db".to_string(),
                long_running_only: true,
                source_uuid: Some("src-1".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].name, "migrate_db");
    }

    #[test]
    fn test_page_size_clamped() {
        let page = search_tools(
            &corpus(),
            &ToolSearchQuery {
                page_size: 500,
                ..Default::default()
            },
        );
        assert_eq!(page.page_size, MAX_PAGE_SIZE);

        let page = search_tools(
            &corpus(),
            &ToolSearchQuery {
                page_size: 0,
                ..Default::default()
            },
        );
        assert_eq!(page.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_pagination_past_end() {
        let page = search_tools(
            &corpus(),
            &ToolSearchQuery {
                page: 9,
                page_size: 2,
                ..Default::default()
            },
        );
        assert!(page.items.is_empty());
        assert_eq!(page.total, 3);
    }

}
