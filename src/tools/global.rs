//! Introspection actions any tool can enable through its `global_actions` table.

use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use super::action::{ActionSpec, ExecutionMeta, GlobalAction, GlobalResponse};

pub const GET_TOOL_DESCRIPTION: &str = "get_tool_description";
pub const LIST_ALL_ACTIONS: &str = "list_all_actions";

pub struct GetToolDescription {
    spec: ActionSpec,
}

impl GetToolDescription {
    pub fn new() -> Self {
        Self {
            spec: ActionSpec::new("GetToolDescription", "Get tool description")
                .description("Returns the full schema document of this tool")
                .tags(["introspection"])
                .global(),
        }
    }
}

impl GlobalAction for GetToolDescription {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    fn execute_global(&self, meta: &ExecutionMeta, tool_schema: Option<&Value>) -> GlobalResponse {
        match tool_schema {
            Some(schema) => GlobalResponse::executed(schema.clone()),
            None => GlobalResponse::not_executed(json!({
                "error": format!("no schema cached for tool '{}'", meta.tool_name)
            })),
        }
    }
}

pub struct ListAllActions {
    spec: ActionSpec,
}

impl ListAllActions {
    pub fn new() -> Self {
        Self {
            spec: ActionSpec::new("ListAllActions", "List all actions")
                .description("Lists the actions this tool exposes")
                .tags(["introspection"])
                .global(),
        }
    }
}

impl GlobalAction for ListAllActions {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    fn execute_global(&self, meta: &ExecutionMeta, tool_schema: Option<&Value>) -> GlobalResponse {
        let Some(actions) = tool_schema
            .and_then(|schema| schema.get("Actions"))
            .and_then(Value::as_array)
        else {
            return GlobalResponse::not_executed(json!({
                "error": format!("no schema cached for tool '{}'", meta.tool_name)
            }));
        };
        let listed: Vec<Value> = actions
            .iter()
            .map(|action| {
                json!({
                    "name": action["name"],
                    "display_name": action["display_name"],
                    "description": action["description"],
                })
            })
            .collect();
        GlobalResponse::executed(json!({ "actions": listed }))
    }
}

pub fn all() -> Vec<Arc<dyn GlobalAction>> {
    vec![
        Arc::new(GetToolDescription::new()),
        Arc::new(ListAllActions::new()),
    ]
}

/// Resolves the `global_actions` table of a tool into handlers.
pub fn enabled(table: &BTreeMap<String, bool>) -> Vec<Arc<dyn GlobalAction>> {
    let mut handlers: Vec<Arc<dyn GlobalAction>> = Vec::new();
    for (key, on) in table {
        if !on {
            continue;
        }
        match key.as_str() {
            GET_TOOL_DESCRIPTION => handlers.push(Arc::new(GetToolDescription::new())),
            LIST_ALL_ACTIONS => handlers.push(Arc::new(ListAllActions::new())),
            other => warn!("Ignoring unknown global action '{}'", other),
        }
    }
    handlers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ExecutionMeta {
        ExecutionMeta {
            tenant_id: "acme".into(),
            tool_name: "slack".into(),
        }
    }

    #[test]
    fn enabled_skips_disabled_and_unknown_entries() {
        let mut table = BTreeMap::new();
        table.insert(GET_TOOL_DESCRIPTION.to_string(), true);
        table.insert(LIST_ALL_ACTIONS.to_string(), false);
        table.insert("reboot_everything".to_string(), true);
        let handlers = enabled(&table);
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].spec().name, "GetToolDescription");
    }

    #[test]
    fn list_all_actions_reads_the_cached_document() {
        let doc = json!({
            "Actions": [
                { "name": "slack_send_message", "display_name": "Send", "description": "d", "parameters": {} }
            ]
        });
        let response = ListAllActions::new().execute_global(&meta(), Some(&doc));
        assert!(response.execution_details.executed);
        assert_eq!(
            response.response_data["actions"][0],
            json!({ "name": "slack_send_message", "display_name": "Send", "description": "d" })
        );
    }

    #[test]
    fn missing_document_is_reported_as_not_executed() {
        let response = GetToolDescription::new().execute_global(&meta(), None);
        assert!(!response.execution_details.executed);
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded["execution_details"], json!({ "executed": false }));
    }
}
