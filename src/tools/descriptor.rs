use regex::Regex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use super::action::{Action, ActionSpec, GlobalAction};
use super::schema::SchemaError;
use super::trigger::Trigger;

/// Tenant bucket holding platform-provided tools.
pub const DEFAULT_TENANT: &str = "default";

static ACRONYM_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").expect("static regex"));
static WORD_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z\d])([A-Z])").expect("static regex"));

/// `GetHTTPResponse` -> `get_http_response`, `list-members` -> `list_members`.
pub fn to_snake_case(word: &str) -> String {
    let word = ACRONYM_BOUNDARY.replace_all(word, "${1}_${2}");
    let word = WORD_BOUNDARY.replace_all(&word, "${1}_${2}");
    word.replace('-', "_").to_lowercase()
}

pub fn normalize_tool_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Tool-qualified action/trigger name, e.g. `strava_get_athlete`.
pub fn qualified_name(tool_name: &str, item_name: &str) -> String {
    format!("{}_{}", normalize_tool_name(tool_name), to_snake_case(item_name))
}

/// Registry key of a tool within a tenant bucket, e.g. `slack_default`.
pub fn registry_key(tool_name: &str, tenant_id: &str) -> String {
    format!("{}_{}", normalize_tool_name(tool_name), tenant_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSource {
    /// Implemented in Rust and registered at startup.
    Builtin,
    /// Declarative manifest compiled into the binary.
    Embedded(String),
    /// Tenant manifest on disk.
    Custom(PathBuf),
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolSource::Builtin => write!(f, "builtin"),
            ToolSource::Embedded(path) => write!(f, "embedded:{}", path),
            ToolSource::Custom(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Clone)]
pub enum ActionHandler {
    Local(Arc<dyn Action>),
    Global(Arc<dyn GlobalAction>),
}

impl ActionHandler {
    pub fn spec(&self) -> &ActionSpec {
        match self {
            ActionHandler::Local(action) => action.spec(),
            ActionHandler::Global(action) => action.spec(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("tool name must not be empty")]
    EmptyName,
    #[error("tool '{tool}' declares action '{name}' more than once")]
    DuplicateAction { tool: String, name: String },
    #[error("tool '{tool}' declares trigger '{name}' more than once")]
    DuplicateTrigger { tool: String, name: String },
}

/// One integration for one tenant. Built once, then shared read-only.
pub struct ToolDescriptor {
    name: String,
    tenant: String,
    description: Option<String>,
    version: Option<String>,
    source: ToolSource,
    triggers: Vec<(String, Arc<dyn Trigger>)>,
    action_order: Vec<String>,
    action_index: HashMap<String, ActionHandler>,
    trigger_index: HashMap<String, usize>,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("tenant", &self.tenant)
            .field("source", &self.source)
            .field("actions", &self.action_order)
            .finish()
    }
}

impl ToolDescriptor {
    pub fn builder(name: impl Into<String>) -> ToolBuilder {
        ToolBuilder {
            name: name.into(),
            tenant: DEFAULT_TENANT.to_string(),
            description: None,
            version: None,
            source: ToolSource::Builtin,
            actions: Vec::new(),
            global_actions: Vec::new(),
            triggers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn identifier(&self) -> String {
        registry_key(&self.name, &self.tenant)
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn source(&self) -> &ToolSource {
        &self.source
    }

    pub fn action(&self, qualified: &str) -> Option<&ActionHandler> {
        self.action_index.get(qualified)
    }

    /// Qualified action names, local actions first.
    pub fn action_names(&self) -> &[String] {
        &self.action_order
    }

    pub fn trigger(&self, qualified: &str) -> Option<&Arc<dyn Trigger>> {
        self.trigger_index
            .get(qualified)
            .map(|&idx| &self.triggers[idx].1)
    }

    /// Triggers in declaration order with their qualified names.
    pub fn triggers(&self) -> impl Iterator<Item = (&str, &Arc<dyn Trigger>)> {
        self.triggers.iter().map(|(name, t)| (name.as_str(), t))
    }

    pub fn schema_document(&self) -> Result<Value, SchemaError> {
        let mut actions = Vec::with_capacity(self.action_order.len());
        for qualified in &self.action_order {
            if let Some(handler) = self.action_index.get(qualified) {
                actions.push(handler.spec().schema_entry(qualified)?);
            }
        }
        let mut triggers = Vec::with_capacity(self.triggers.len());
        for (qualified, trigger) in &self.triggers {
            triggers.push(trigger.spec().schema_entry(qualified)?);
        }
        Ok(json!({
            "Name": self.name,
            "UniqueKey": self.name.replace(' ', "_"),
            "Description": self.description,
            "CustomID": self.tenant,
            "Actions": actions,
            "Triggers": triggers,
        }))
    }
}

pub struct ToolBuilder {
    name: String,
    tenant: String,
    description: Option<String>,
    version: Option<String>,
    source: ToolSource,
    actions: Vec<Arc<dyn Action>>,
    global_actions: Vec<Arc<dyn GlobalAction>>,
    triggers: Vec<Arc<dyn Trigger>>,
}

impl ToolBuilder {
    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = tenant.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn source(mut self, source: ToolSource) -> Self {
        self.source = source;
        self
    }

    pub fn action(mut self, action: Arc<dyn Action>) -> Self {
        self.actions.push(action);
        self
    }

    pub fn global_actions(mut self, actions: Vec<Arc<dyn GlobalAction>>) -> Self {
        self.global_actions.extend(actions);
        self
    }

    pub fn trigger(mut self, trigger: Arc<dyn Trigger>) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn build(self) -> Result<ToolDescriptor, DescriptorError> {
        let name = normalize_tool_name(&self.name);
        if name.is_empty() {
            return Err(DescriptorError::EmptyName);
        }

        let mut action_order = Vec::new();
        let mut action_index = HashMap::new();
        for action in self.actions {
            let qualified = qualified_name(&name, &action.spec().name);
            if action_index.contains_key(&qualified) {
                return Err(DescriptorError::DuplicateAction {
                    tool: name,
                    name: qualified,
                });
            }
            action_order.push(qualified.clone());
            action_index.insert(qualified, ActionHandler::Local(action));
        }
        // Local definitions shadow globals of the same name.
        for global in self.global_actions {
            let qualified = qualified_name(&name, &global.spec().name);
            if action_index.contains_key(&qualified) {
                continue;
            }
            action_order.push(qualified.clone());
            action_index.insert(qualified, ActionHandler::Global(global));
        }

        let mut triggers = Vec::new();
        let mut trigger_index = HashMap::new();
        for trigger in self.triggers {
            let qualified = qualified_name(&name, &trigger.spec().name);
            if trigger_index.contains_key(&qualified) {
                return Err(DescriptorError::DuplicateTrigger {
                    tool: name,
                    name: qualified,
                });
            }
            trigger_index.insert(qualified.clone(), triggers.len());
            triggers.push((qualified, trigger));
        }

        Ok(ToolDescriptor {
            name,
            tenant: self.tenant,
            description: self.description,
            version: self.version,
            source: self.source,
            triggers,
            action_order,
            action_index,
            trigger_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{EchoAction, StaticTrigger};
    use crate::tools::global;

    #[test]
    fn snake_case_handles_acronyms_and_dashes() {
        assert_eq!(to_snake_case("GetAthlete"), "get_athlete");
        assert_eq!(to_snake_case("GetHTTPResponse"), "get_http_response");
        assert_eq!(to_snake_case("list-members"), "list_members");
        assert_eq!(to_snake_case("send_message"), "send_message");
        assert_eq!(to_snake_case("Item2Value"), "item2_value");
    }

    #[test]
    fn qualified_names_lowercase_the_tool() {
        assert_eq!(qualified_name("Strava", "GetAthlete"), "strava_get_athlete");
        assert_eq!(registry_key("Slack", DEFAULT_TENANT), "slack_default");
    }

    #[test]
    fn local_action_shadows_global_of_same_name() {
        let tool = ToolDescriptor::builder("Slack")
            .action(Arc::new(EchoAction::new("ListAllActions")))
            .global_actions(global::all())
            .build()
            .unwrap();
        assert!(matches!(
            tool.action("slack_list_all_actions"),
            Some(ActionHandler::Local(_))
        ));
        assert!(matches!(
            tool.action("slack_get_tool_description"),
            Some(ActionHandler::Global(_))
        ));
        assert_eq!(
            tool.action_names(),
            ["slack_list_all_actions", "slack_get_tool_description"]
        );
    }

    #[test]
    fn duplicate_actions_are_rejected() {
        let result = ToolDescriptor::builder("slack")
            .action(Arc::new(EchoAction::new("SendMessage")))
            .action(Arc::new(EchoAction::new("send_message")))
            .build();
        assert!(matches!(
            result,
            Err(DescriptorError::DuplicateAction { name, .. }) if name == "slack_send_message"
        ));
    }

    #[test]
    fn schema_document_lists_actions_and_triggers() {
        let tool = ToolDescriptor::builder("Slack")
            .tenant("acme")
            .description("Team chat")
            .action(Arc::new(EchoAction::new("SendMessage")))
            .trigger(Arc::new(StaticTrigger::new("MessagePosted", "type", "message")))
            .build()
            .unwrap();
        let doc = tool.schema_document().unwrap();
        assert_eq!(doc["Name"], "slack");
        assert_eq!(doc["CustomID"], "acme");
        assert_eq!(doc["Actions"][0]["name"], "slack_send_message");
        assert_eq!(doc["Triggers"][0]["name"], "slack_message_posted");
        assert_eq!(tool.identifier(), "slack_acme");
    }
}
