pub mod action;
pub mod builtin;
pub mod descriptor;
pub mod dispatcher;
pub mod global;
pub mod manifest;
pub mod pipeline;
pub mod registry;
pub mod schema;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;

use serde::Serialize;
use serde_json::Value;

pub use dispatcher::{DispatchRequest, Dispatcher};
pub use pipeline::TriggerPipeline;
pub use registry::{Registry, SharedRegistry};

/// Resolution failures. Everything else is reported inside a result envelope.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NotFound {
    #[error("Tool '{tool}' not found for tenant '{tenant}'")]
    Tool { tool: String, tenant: String },
    #[error("Action '{action}' not found in tool '{tool}'")]
    Action { tool: String, action: String },
    #[error("Trigger '{trigger}' not found in tool '{tool}'")]
    Trigger { tool: String, trigger: String },
    #[error("No trigger of tool '{tool}' matched the payload")]
    NoMatchingTrigger { tool: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureEnvelope {
    pub status: &'static str,
    pub details: String,
}

impl FailureEnvelope {
    pub fn new(details: impl Into<String>) -> Self {
        Self {
            status: "failure",
            details: details.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionResult {
    Success(Value),
    Failure(FailureEnvelope),
}

impl ActionResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, ActionResult::Failure(_))
    }

    pub fn into_value(self) -> Value {
        match self {
            ActionResult::Success(value) => value,
            ActionResult::Failure(envelope) => serde_json::json!({
                "status": envelope.status,
                "details": envelope.details,
            }),
        }
    }
}
