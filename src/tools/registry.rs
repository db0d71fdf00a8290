use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::NotFound;
use super::descriptor::{DEFAULT_TENANT, ToolDescriptor, normalize_tool_name, registry_key};
use super::schema::SchemaError;

pub type SharedRegistry = Arc<RwLock<Registry>>;

/// tenant -> (tool identifier -> descriptor), plus the schema document cached
/// per identifier.
#[derive(Default)]
pub struct Registry {
    tools: HashMap<String, HashMap<String, Arc<ToolDescriptor>>>,
    schemas: HashMap<String, Value>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from the startup tool list. Tools whose schema
    /// cannot be generated are skipped with a warning.
    pub fn init(tools: Vec<ToolDescriptor>) -> Self {
        let mut registry = Self::new();
        for tool in tools {
            let identifier = tool.identifier();
            if let Err(e) = registry.register(tool) {
                warn!("Skipping tool {}: {}", identifier, e);
            }
        }
        info!(
            "Tool registry ready: {} tools across {} tenants",
            registry.len(),
            registry.tools.len()
        );
        registry
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Adds or replaces the tool for its (tenant, identifier) and rebuilds its
    /// cached schema. Nothing changes if the schema cannot be generated.
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
    ) -> Result<Option<Arc<ToolDescriptor>>, SchemaError> {
        let identifier = descriptor.identifier();
        let schema = descriptor.schema_document()?;
        self.schemas.insert(identifier.clone(), schema);
        let previous = self
            .tools
            .entry(descriptor.tenant().to_string())
            .or_default()
            .insert(identifier, Arc::new(descriptor));
        Ok(previous)
    }

    /// Tenant entry if present, otherwise the default entry. Never the reverse.
    pub fn resolve(&self, tool_name: &str, tenant_id: &str) -> Result<Arc<ToolDescriptor>, NotFound> {
        let tool_name = normalize_tool_name(tool_name);
        if let Some(tool) = self
            .tools
            .get(tenant_id)
            .and_then(|bucket| bucket.get(&registry_key(&tool_name, tenant_id)))
        {
            return Ok(tool.clone());
        }
        self.tools
            .get(DEFAULT_TENANT)
            .and_then(|bucket| bucket.get(&registry_key(&tool_name, DEFAULT_TENANT)))
            .cloned()
            .ok_or(NotFound::Tool {
                tool: tool_name,
                tenant: tenant_id.to_string(),
            })
    }

    pub fn schema(&self, identifier: &str) -> Option<&Value> {
        self.schemas.get(identifier)
    }

    pub fn unregister(&mut self, tool_name: &str, tenant_id: &str) -> Option<Arc<ToolDescriptor>> {
        let identifier = registry_key(tool_name, tenant_id);
        let removed = self
            .tools
            .get_mut(tenant_id)
            .and_then(|bucket| bucket.remove(&identifier));
        if removed.is_some() {
            self.schemas.remove(&identifier);
        }
        if self.tools.get(tenant_id).is_some_and(HashMap::is_empty) {
            self.tools.remove(tenant_id);
        }
        removed
    }

    /// Swaps a tenant's whole bucket. Returns one message per tool that could
    /// not be registered.
    pub fn replace_tenant(&mut self, tenant_id: &str, tools: Vec<ToolDescriptor>) -> Vec<String> {
        if let Some(old) = self.tools.remove(tenant_id) {
            for identifier in old.keys() {
                self.schemas.remove(identifier);
            }
        }
        let mut errors = Vec::new();
        for tool in tools {
            let identifier = tool.identifier();
            if tool.tenant() != tenant_id {
                errors.push(format!(
                    "{}: belongs to tenant '{}', not '{}'",
                    identifier,
                    tool.tenant(),
                    tenant_id
                ));
                continue;
            }
            if let Err(e) = self.register(tool) {
                errors.push(format!("{}: {}", identifier, e));
            }
        }
        errors
    }

    /// Tools a tenant can reach: its own plus defaults it does not override.
    pub fn visible_tools(&self, tenant_id: &str) -> Vec<Arc<ToolDescriptor>> {
        let mut by_name: HashMap<String, Arc<ToolDescriptor>> = HashMap::new();
        for bucket in [DEFAULT_TENANT, tenant_id] {
            if let Some(tools) = self.tools.get(bucket) {
                for tool in tools.values() {
                    by_name.insert(tool.name().to_string(), tool.clone());
                }
            }
        }
        let mut tools: Vec<_> = by_name.into_values().collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    /// Schema documents for a tenant, or for a single resolved tool.
    pub fn list_schemas(&self, tenant_id: &str, tool_name: Option<&str>) -> Result<Vec<Value>, NotFound> {
        let tools = match tool_name {
            Some(name) => vec![self.resolve(name, tenant_id)?],
            None => self.visible_tools(tenant_id),
        };
        Ok(tools
            .iter()
            .filter_map(|tool| self.schemas.get(&tool.identifier()).cloned())
            .collect())
    }

    pub fn len(&self) -> usize {
        self.tools.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::EchoAction;

    fn slack(tenant: &str, action: &str) -> ToolDescriptor {
        ToolDescriptor::builder("Slack")
            .tenant(tenant)
            .action(Arc::new(EchoAction::new(action)))
            .build()
            .unwrap()
    }

    #[test]
    fn tenant_entry_wins_over_default() {
        let mut registry = Registry::new();
        registry.register(slack(DEFAULT_TENANT, "SendMessage")).unwrap();
        registry.register(slack("acme", "SendMessage")).unwrap();

        let resolved = registry.resolve("SLACK", "acme").unwrap();
        assert_eq!(resolved.tenant(), "acme");
        assert_eq!(resolved.identifier(), "slack_acme");
    }

    #[test]
    fn missing_tenant_entry_falls_back_to_default() {
        let mut registry = Registry::new();
        registry.register(slack(DEFAULT_TENANT, "SendMessage")).unwrap();

        let resolved = registry.resolve("slack", "acme").unwrap();
        assert_eq!(resolved.identifier(), "slack_default");
    }

    #[test]
    fn default_lookup_never_sees_tenant_tools() {
        let mut registry = Registry::new();
        registry.register(slack("acme", "SendMessage")).unwrap();

        assert!(matches!(
            registry.resolve("slack", DEFAULT_TENANT),
            Err(NotFound::Tool { .. })
        ));
        assert!(registry.resolve("slack", "globex").is_err());
    }

    #[test]
    fn reregistering_rebuilds_the_schema() {
        let mut registry = Registry::new();
        registry.register(slack("acme", "SendMessage")).unwrap();
        let previous = registry.register(slack("acme", "PostReply")).unwrap();
        assert!(previous.is_some());

        let schema = registry.schema("slack_acme").unwrap();
        assert_eq!(schema["Actions"][0]["name"], "slack_post_reply");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_drops_the_cached_schema() {
        let mut registry = Registry::new();
        registry.register(slack("acme", "SendMessage")).unwrap();
        assert!(registry.unregister("slack", "acme").is_some());
        assert!(registry.schema("slack_acme").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn replace_tenant_swaps_the_bucket() {
        let mut registry = Registry::new();
        registry.register(slack(DEFAULT_TENANT, "SendMessage")).unwrap();
        registry.register(slack("acme", "SendMessage")).unwrap();

        let jira = ToolDescriptor::builder("jira")
            .tenant("acme")
            .action(Arc::new(EchoAction::new("CreateIssue")))
            .build()
            .unwrap();
        let errors = registry.replace_tenant("acme", vec![jira, slack("globex", "X")]);
        assert_eq!(errors.len(), 1);

        assert_eq!(registry.resolve("slack", "acme").unwrap().tenant(), DEFAULT_TENANT);
        assert!(registry.schema("slack_acme").is_none());
        assert!(registry.schema("jira_acme").is_some());
    }

    #[test]
    fn list_schemas_merges_default_and_tenant_tools() {
        let mut registry = Registry::new();
        registry.register(slack(DEFAULT_TENANT, "SendMessage")).unwrap();
        registry.register(slack("acme", "PostReply")).unwrap();
        registry
            .register(
                ToolDescriptor::builder("jira")
                    .action(Arc::new(EchoAction::new("CreateIssue")))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let docs = registry.list_schemas("acme", None).unwrap();
        let ids: Vec<(&str, &str)> = docs
            .iter()
            .map(|d| (d["Name"].as_str().unwrap(), d["CustomID"].as_str().unwrap()))
            .collect();
        assert_eq!(ids, vec![("jira", "default"), ("slack", "acme")]);

        assert!(registry.list_schemas("acme", Some("github")).is_err());
    }
}
