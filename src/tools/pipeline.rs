use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info};

use super::action::AuthContext;
use super::descriptor::{ToolDescriptor, qualified_name};
use super::registry::SharedRegistry;
use super::schema::parse_request;
use super::trigger::{Trigger, WebhookError};
use super::{FailureEnvelope, NotFound};

pub const WEBHOOK_URL_KEY: &str = "webhook_url";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Registration {
    pub status: &'static str,
    pub connection_data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WebhookResult {
    Registered(Registration),
    Failure(FailureEnvelope),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformedPayload {
    pub trigger_name: String,
    pub connection_data: Value,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TransformResult {
    Matched(TransformedPayload),
    Failure(FailureEnvelope),
}

/// Inbound side of a tool: webhook subscription and payload conversion.
#[derive(Clone)]
pub struct TriggerPipeline {
    registry: SharedRegistry,
}

impl TriggerPipeline {
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    async fn resolve(&self, tool_name: &str, tenant_id: &str) -> Result<Arc<ToolDescriptor>, NotFound> {
        self.registry.read().await.resolve(tool_name, tenant_id)
    }

    pub async fn set_webhook_url(
        &self,
        tool_name: &str,
        tenant_id: &str,
        trigger_name: &str,
        auth: &AuthContext,
        mut trigger_config: Map<String, Value>,
    ) -> Result<WebhookResult, NotFound> {
        let tool = self.resolve(tool_name, tenant_id).await?;
        let (qualified, trigger) = find_trigger(&tool, trigger_name)?;

        let webhook_url = match trigger_config.remove(WEBHOOK_URL_KEY) {
            Some(Value::String(url)) if !url.trim().is_empty() => url,
            _ => {
                return Ok(WebhookResult::Failure(FailureEnvelope::new(
                    "webhook_url is required in trigger config",
                )));
            }
        };
        info!(
            "Setting webhook URL for trigger {} on tool {} to {}",
            qualified,
            tool.name(),
            webhook_url
        );

        let spec = trigger.spec();
        let config = match parse_request(&spec.config_model(), &spec.config, &Value::Object(trigger_config)) {
            Ok(config) => config,
            Err(e) => return Ok(WebhookResult::Failure(FailureEnvelope::new(e.to_string()))),
        };

        Ok(match trigger.set_webhook_url(auth, &webhook_url, config).await {
            Ok(connection_data) => WebhookResult::Registered(Registration {
                status: "success",
                connection_data,
            }),
            Err(WebhookError::AlreadyExists(detail)) => {
                error!(
                    "Webhook URL already exists for trigger {} on tool {}: {}",
                    qualified,
                    tool.name(),
                    detail
                );
                WebhookResult::Failure(FailureEnvelope::new("Webhook URL already exists"))
            }
            Err(WebhookError::Other(e)) => {
                error!(
                    "Error setting webhook URL for trigger {} on tool {}: {:?}",
                    qualified,
                    tool.name(),
                    e
                );
                WebhookResult::Failure(FailureEnvelope::new(e.to_string()))
            }
        })
    }

    /// First matching trigger wins. A conversion error stops the scan.
    pub async fn transform_trigger_payload(
        &self,
        tool_name: &str,
        tenant_id: &str,
        raw_payload: &Value,
    ) -> Result<TransformResult, NotFound> {
        let tool = self.resolve(tool_name, tenant_id).await?;

        for (qualified, trigger) in tool.triggers() {
            match trigger.check_and_convert(raw_payload) {
                Ok(Some(converted)) => {
                    info!("Payload for tool {} matched trigger {}", tool.name(), qualified);
                    return Ok(TransformResult::Matched(TransformedPayload {
                        trigger_name: qualified.to_string(),
                        connection_data: converted.connection_data,
                        payload: converted.payload,
                    }));
                }
                Ok(None) => continue,
                Err(e) => {
                    error!(
                        "Error transforming payload with trigger {} on tool {}: {:?}",
                        qualified,
                        tool.name(),
                        e
                    );
                    return Ok(TransformResult::Failure(FailureEnvelope::new(format!(
                        "Error transforming payload with trigger {}: {}",
                        qualified, e
                    ))));
                }
            }
        }

        Err(NotFound::NoMatchingTrigger {
            tool: tool.name().to_string(),
        })
    }
}

fn find_trigger(tool: &ToolDescriptor, trigger_name: &str) -> Result<(String, Arc<dyn Trigger>), NotFound> {
    if let Some(trigger) = tool.trigger(trigger_name) {
        return Ok((trigger_name.to_string(), trigger.clone()));
    }
    let qualified = qualified_name(tool.name(), trigger_name);
    match tool.trigger(&qualified) {
        Some(trigger) => Ok((qualified, trigger.clone())),
        None => Err(NotFound::Trigger {
            tool: tool.name().to_string(),
            trigger: trigger_name.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::Registry;
    use crate::tools::testing::StaticTrigger;
    use serde_json::json;

    fn pipeline_with(triggers: Vec<Arc<StaticTrigger>>) -> TriggerPipeline {
        let mut builder = ToolDescriptor::builder("slack");
        for trigger in triggers {
            builder = builder.trigger(trigger);
        }
        let registry = Registry::init(vec![builder.build().unwrap()]);
        TriggerPipeline::new(registry.into_shared())
    }

    fn config(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn second_trigger_match_stops_the_scan() {
        let first = Arc::new(StaticTrigger::new("ReactionAdded", "type", "reaction"));
        let second = Arc::new(StaticTrigger::new("MessagePosted", "type", "message"));
        let third = Arc::new(StaticTrigger::new("AnyMessage", "type", "message"));
        let pipeline = pipeline_with(vec![first.clone(), second.clone(), third.clone()]);

        let result = pipeline
            .transform_trigger_payload("slack", "acme", &json!({ "type": "message", "team": "T1" }))
            .await
            .unwrap();

        match result {
            TransformResult::Matched(matched) => {
                assert_eq!(matched.trigger_name, "slack_message_posted");
                assert_eq!(matched.connection_data, json!({ "team": "T1" }));
                assert_eq!(matched.payload["converted_by"], "MessagePosted");
            }
            other => panic!("expected a match, got {:?}", other),
        }
        assert_eq!(first.evaluations(), 1);
        assert_eq!(second.evaluations(), 1);
        assert_eq!(third.evaluations(), 0);
    }

    #[tokio::test]
    async fn conversion_error_aborts_without_falling_through() {
        let broken = Arc::new(StaticTrigger::new("Broken", "type", "message").erroring());
        let valid = Arc::new(StaticTrigger::new("MessagePosted", "type", "message"));
        let pipeline = pipeline_with(vec![broken, valid.clone()]);

        let result = pipeline
            .transform_trigger_payload("slack", "acme", &json!({ "type": "message" }))
            .await
            .unwrap();
        assert!(matches!(result, TransformResult::Failure(_)));
        assert_eq!(valid.evaluations(), 0);
    }

    #[tokio::test]
    async fn unmatched_payload_is_not_found() {
        let pipeline = pipeline_with(vec![Arc::new(StaticTrigger::new("MessagePosted", "type", "message"))]);
        let result = pipeline
            .transform_trigger_payload("slack", "acme", &json!({ "type": "file_shared" }))
            .await;
        assert!(matches!(result, Err(NotFound::NoMatchingTrigger { .. })));
    }

    #[tokio::test]
    async fn webhook_registration_strips_the_url_from_config() {
        let pipeline = pipeline_with(vec![Arc::new(StaticTrigger::new("MessagePosted", "type", "message"))]);
        let result = pipeline
            .set_webhook_url(
                "slack",
                "acme",
                "slack_message_posted",
                &AuthContext::new(),
                config(json!({ "webhook_url": "https://hooks.example.com/a", "channel": "C1" })),
            )
            .await
            .unwrap();
        let encoded = serde_json::to_value(result).unwrap();
        assert_eq!(encoded["status"], "success");
        assert_eq!(
            encoded["connection_data"],
            json!({ "webhook_url": "https://hooks.example.com/a", "config": { "channel": "C1" } })
        );
    }

    #[tokio::test]
    async fn duplicate_registration_has_its_own_message() {
        let pipeline = pipeline_with(vec![Arc::new(
            StaticTrigger::new("MessagePosted", "type", "message").already_registered(),
        )]);
        let result = pipeline
            .set_webhook_url(
                "slack",
                "acme",
                "message_posted",
                &AuthContext::new(),
                config(json!({ "webhook_url": "https://hooks.example.com/a", "channel": "C1" })),
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            WebhookResult::Failure(FailureEnvelope::new("Webhook URL already exists"))
        );
    }

    #[tokio::test]
    async fn bad_config_and_unknown_trigger() {
        let pipeline = pipeline_with(vec![Arc::new(StaticTrigger::new("MessagePosted", "type", "message"))]);

        let missing_url = pipeline
            .set_webhook_url("slack", "acme", "message_posted", &AuthContext::new(), config(json!({ "channel": "C1" })))
            .await
            .unwrap();
        assert!(matches!(missing_url, WebhookResult::Failure(_)));

        let invalid = pipeline
            .set_webhook_url(
                "slack",
                "acme",
                "message_posted",
                &AuthContext::new(),
                config(json!({ "webhook_url": "https://hooks.example.com/a" })),
            )
            .await
            .unwrap();
        match invalid {
            WebhookResult::Failure(envelope) => assert!(envelope.details.contains("channel")),
            other => panic!("expected failure, got {:?}", other),
        }

        let unknown = pipeline
            .set_webhook_url("slack", "acme", "file_shared", &AuthContext::new(), Map::new())
            .await;
        assert!(matches!(unknown, Err(NotFound::Trigger { .. })));
    }
}
