use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::schema::{FieldSpec, ParsedRequest, SchemaError, parameters_schema};

/// Vendor credentials and request decorations handed to every action.
/// Recognised keys: `headers`, `base_url`, `query_params`, `request_body`.
pub type AuthContext = Map<String, Value>;

/// Tenant context injected into metadata-flagged and global actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionMeta {
    pub tenant_id: String,
    pub tool_name: String,
}

/// Static description of one action. Immutable once its tool is registered.
#[derive(Debug, Clone)]
pub struct ActionSpec {
    /// Unqualified name, e.g. `GetAthlete`. The registry qualifies it per tool.
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub request: Vec<FieldSpec>,
    pub response: Vec<FieldSpec>,
    pub required_scopes: Vec<String>,
    pub requires_execution_metadata: bool,
    pub is_global: bool,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            description: None,
            tags: Vec::new(),
            request: Vec::new(),
            response: Vec::new(),
            required_scopes: Vec::new(),
            requires_execution_metadata: false,
            is_global: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn request(mut self, fields: Vec<FieldSpec>) -> Self {
        self.request = fields;
        self
    }

    pub fn response(mut self, fields: Vec<FieldSpec>) -> Self {
        self.response = fields;
        self
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_execution_metadata(mut self) -> Self {
        self.requires_execution_metadata = true;
        self
    }

    pub fn global(mut self) -> Self {
        self.is_global = true;
        self
    }

    pub fn request_model(&self) -> String {
        format!("{}Request", self.name)
    }

    pub fn response_model(&self) -> String {
        format!("{}Response", self.name)
    }

    /// Entry for the `Actions` list of a tool's schema document.
    pub fn schema_entry(&self, qualified_name: &str) -> Result<Value, SchemaError> {
        Ok(json!({
            "name": qualified_name,
            "display_name": self.display_name,
            "tags": self.tags,
            "description": self.description,
            "parameters": parameters_schema(&self.request_model(), &self.request)?,
            "response": parameters_schema(&self.response_model(), &self.response)?,
            "required_scopes": self.required_scopes,
        }))
    }
}

#[async_trait]
pub trait Action: Send + Sync {
    fn spec(&self) -> &ActionSpec;

    async fn execute(&self, request: ParsedRequest, auth: &AuthContext) -> Result<Value>;

    /// Called instead of [`Action::execute`] when the action spec is flagged with
    /// `requires_execution_metadata`.
    async fn execute_with_meta_data(
        &self,
        request: ParsedRequest,
        auth: &AuthContext,
        _meta: &ExecutionMeta,
    ) -> Result<Value> {
        self.execute(request, auth).await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionDetails {
    pub executed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalResponse {
    pub execution_details: ExecutionDetails,
    pub response_data: Value,
}

impl GlobalResponse {
    pub fn executed(response_data: Value) -> Self {
        Self {
            execution_details: ExecutionDetails { executed: true },
            response_data,
        }
    }

    pub fn not_executed(response_data: Value) -> Self {
        Self {
            execution_details: ExecutionDetails { executed: false },
            response_data,
        }
    }
}

/// Actions available on every tool that opts in. They see tenant metadata and
/// the tool's cached schema document, never a business payload.
pub trait GlobalAction: Send + Sync {
    fn spec(&self) -> &ActionSpec;

    fn execute_global(&self, meta: &ExecutionMeta, tool_schema: Option<&Value>) -> GlobalResponse;
}
