use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

use super::action::{AuthContext, ExecutionMeta};
use super::descriptor::{ActionHandler, ToolDescriptor, qualified_name};
use super::registry::SharedRegistry;
use super::schema::parse_request;
use super::{ActionResult, FailureEnvelope, NotFound};

const EXECUTION_ERROR_PREFIX: &str = "Error executing action with error: ";

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub tool_name: String,
    pub action_name: String,
    pub tenant_id: String,
    pub request_data: Value,
    pub auth: AuthContext,
}

/// Routes action calls to the resolved tool. Only resolution failures are
/// returned as `Err`; everything else comes back as an [`ActionResult`].
#[derive(Clone)]
pub struct Dispatcher {
    registry: SharedRegistry,
}

impl Dispatcher {
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    pub async fn dispatch(&self, req: DispatchRequest) -> Result<ActionResult, NotFound> {
        let (tool, qualified, handler, tool_schema) = {
            let registry = self.registry.read().await;
            let tool = registry.resolve(&req.tool_name, &req.tenant_id)?;
            let (qualified, handler) = find_action(&tool, &req.action_name)?;
            let schema = registry.schema(&tool.identifier()).cloned();
            (tool, qualified, handler, schema)
        };

        let meta = ExecutionMeta {
            tenant_id: req.tenant_id.clone(),
            tool_name: tool.name().to_string(),
        };
        let spec = handler.spec().clone();
        info!(
            "Executing {} on tool {} ({}) for tenant {}",
            qualified,
            tool.name(),
            tool.tenant(),
            req.tenant_id
        );

        let parsed = match parse_request(&spec.request_model(), &spec.request, &req.request_data) {
            Ok(parsed) => parsed,
            Err(e) => {
                info!("Rejected request for {}: {}", qualified, e);
                return Ok(ActionResult::Failure(FailureEnvelope::new(format!(
                    "{}{}",
                    EXECUTION_ERROR_PREFIX, e
                ))));
            }
        };

        let outcome = match handler {
            ActionHandler::Global(action) => {
                let response = action.execute_global(&meta, tool_schema.as_ref());
                return Ok(match serde_json::to_value(response) {
                    Ok(value) => ActionResult::Success(value),
                    Err(e) => ActionResult::Failure(FailureEnvelope::new(format!(
                        "{}{}",
                        EXECUTION_ERROR_PREFIX, e
                    ))),
                });
            }
            ActionHandler::Local(action) => {
                let auth = req.auth;
                let with_meta = spec.requires_execution_metadata;
                // Action bodies run on a worker task so a panic stays contained.
                tokio::spawn(async move {
                    if with_meta {
                        action.execute_with_meta_data(parsed, &auth, &meta).await
                    } else {
                        action.execute(parsed, &auth).await
                    }
                })
                .await
            }
        };

        Ok(match outcome {
            Ok(Ok(value)) => ActionResult::Success(value),
            Ok(Err(e)) => {
                error!(
                    "Error executing {} on tool {} for tenant {}: {:?}",
                    qualified,
                    tool.name(),
                    req.tenant_id,
                    e
                );
                ActionResult::Failure(FailureEnvelope::new(format!(
                    "{}{}",
                    EXECUTION_ERROR_PREFIX, e
                )))
            }
            Err(join_err) => {
                error!(
                    "Action {} on tool {} aborted: {}",
                    qualified,
                    tool.name(),
                    join_err
                );
                ActionResult::Failure(FailureEnvelope::new(format!(
                    "{}{}",
                    EXECUTION_ERROR_PREFIX, join_err
                )))
            }
        })
    }
}

/// Accepts the qualified name (`slack_send_message`) or the bare action name
/// (`send_message`, `SendMessage`).
fn find_action(tool: &Arc<ToolDescriptor>, action_name: &str) -> Result<(String, ActionHandler), NotFound> {
    if let Some(handler) = tool.action(action_name) {
        return Ok((action_name.to_string(), handler.clone()));
    }
    let qualified = qualified_name(tool.name(), action_name);
    match tool.action(&qualified) {
        Some(handler) => Ok((qualified, handler.clone())),
        None => Err(NotFound::Action {
            tool: tool.name().to_string(),
            action: action_name.to_string(),
        }),
    }
}
