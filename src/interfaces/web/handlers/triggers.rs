use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::super::AppState;
use super::{ApiResponse, body, default_tenant, not_found, reply, require};
use crate::tools::action::AuthContext;

#[derive(Deserialize)]
pub struct SetWebhookRequest {
    tool_name: String,
    #[serde(default = "default_tenant", alias = "client_id")]
    tenant_id: String,
    trigger_name: String,
    #[serde(default, alias = "authorization_data")]
    authorisation_data: AuthContext,
    #[serde(default)]
    trigger_config: Map<String, Value>,
}

pub async fn set_webhook_url_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<SetWebhookRequest>, JsonRejection>,
) -> ApiResponse {
    let req = match body(payload) {
        Ok(req) => req,
        Err(response) => return response,
    };
    if let Err(response) = require("tool_name", &req.tool_name)
        .and_then(|_| require("trigger_name", &req.trigger_name))
    {
        return response;
    }

    match state
        .pipeline
        .set_webhook_url(
            &req.tool_name,
            &req.tenant_id,
            &req.trigger_name,
            &req.authorisation_data,
            req.trigger_config,
        )
        .await
    {
        Ok(result) => reply(result),
        Err(e) => not_found(e),
    }
}

#[derive(Deserialize)]
pub struct TransformRequest {
    tool_name: String,
    #[serde(default = "default_tenant", alias = "client_id")]
    tenant_id: String,
    request: Value,
}

pub async fn transform_payload_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<TransformRequest>, JsonRejection>,
) -> ApiResponse {
    let req = match body(payload) {
        Ok(req) => req,
        Err(response) => return response,
    };
    if let Err(response) = require("tool_name", &req.tool_name) {
        return response;
    }

    match state
        .pipeline
        .transform_trigger_payload(&req.tool_name, &req.tenant_id, &req.request)
        .await
    {
        Ok(result) => reply(result),
        Err(e) => not_found(e),
    }
}
