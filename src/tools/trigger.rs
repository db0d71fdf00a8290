use async_trait::async_trait;
use serde_json::{Value, json};

use super::action::AuthContext;
use super::schema::{FieldSpec, ParsedRequest, SchemaError, parameters_schema};

#[derive(Debug, Clone)]
pub struct TriggerSpec {
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub payload: Vec<FieldSpec>,
    pub config: Vec<FieldSpec>,
    pub instructions: String,
}

impl TriggerSpec {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            description: None,
            payload: Vec::new(),
            config: Vec::new(),
            instructions: String::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn payload(mut self, fields: Vec<FieldSpec>) -> Self {
        self.payload = fields;
        self
    }

    pub fn config(mut self, fields: Vec<FieldSpec>) -> Self {
        self.config = fields;
        self
    }

    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.instructions = text.into();
        self
    }

    pub fn config_model(&self) -> String {
        format!("{}Config", self.name)
    }

    pub fn schema_entry(&self, qualified_name: &str) -> Result<Value, SchemaError> {
        Ok(json!({
            "name": qualified_name,
            "display_name": self.display_name,
            "description": self.description,
            "payload": parameters_schema(&format!("{}Payload", self.name), &self.payload)?,
            "config": parameters_schema(&self.config_model(), &self.config)?,
            "instructions": self.instructions,
        }))
    }
}

/// Output of a successful match: who the event belongs to and its canonical body.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedPayload {
    pub connection_data: Value,
    pub payload: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook already exists: {0}")]
    AlreadyExists(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait Trigger: Send + Sync {
    fn spec(&self) -> &TriggerSpec;

    /// `Ok(None)` means the payload belongs to some other trigger.
    fn check_and_convert(&self, payload: &Value) -> anyhow::Result<Option<ConvertedPayload>>;

    async fn set_webhook_url(
        &self,
        auth: &AuthContext,
        webhook_url: &str,
        config: ParsedRequest,
    ) -> Result<Value, WebhookError>;
}
