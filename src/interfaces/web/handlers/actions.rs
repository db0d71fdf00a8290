use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::Deserialize;
use serde_json::Value;

use super::super::AppState;
use super::{ApiResponse, body, default_tenant, not_found, require};
use crate::tools::DispatchRequest;
use crate::tools::action::AuthContext;

#[derive(Deserialize)]
pub struct ExecuteActionRequest {
    tool_name: String,
    action_name: String,
    #[serde(default = "default_tenant", alias = "client_id")]
    tenant_id: String,
    #[serde(default)]
    request_data: Value,
    #[serde(default, alias = "authorization_data")]
    authorisation_data: AuthContext,
}

pub async fn execute_action_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteActionRequest>, JsonRejection>,
) -> ApiResponse {
    let req = match body(payload) {
        Ok(req) => req,
        Err(response) => return response,
    };
    if let Err(response) = require("tool_name", &req.tool_name)
        .and_then(|_| require("action_name", &req.action_name))
    {
        return response;
    }

    let result = state
        .dispatcher
        .dispatch(DispatchRequest {
            tool_name: req.tool_name,
            action_name: req.action_name,
            tenant_id: req.tenant_id,
            request_data: req.request_data,
            auth: req.authorisation_data,
        })
        .await;

    match result {
        Ok(outcome) => (axum::http::StatusCode::OK, Json(outcome.into_value())),
        Err(e) => not_found(e),
    }
}
