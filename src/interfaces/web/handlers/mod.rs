pub(crate) mod actions;
pub(crate) mod jobs;
pub(crate) mod tools;
pub(crate) mod triggers;

use axum::{Json, extract::rejection::JsonRejection, http::StatusCode};
use serde::Serialize;
use serde_json::{Value, json};

use crate::tools::descriptor::DEFAULT_TENANT;
use crate::tools::{FailureEnvelope, NotFound};

pub(crate) type ApiResponse = (StatusCode, Json<Value>);

pub(crate) fn default_tenant() -> String {
    DEFAULT_TENANT.to_string()
}

pub(crate) fn reply<T: Serialize>(body: T) -> ApiResponse {
    match serde_json::to_value(body) {
        Ok(value) => (StatusCode::OK, Json(value)),
        Err(e) => failure(e.to_string()),
    }
}

/// Handled failures still answer 200; the envelope carries the details.
pub(crate) fn failure(details: impl Into<String>) -> ApiResponse {
    let envelope = FailureEnvelope::new(details);
    (
        StatusCode::OK,
        Json(json!({ "status": envelope.status, "details": envelope.details })),
    )
}

pub(crate) fn not_found(err: NotFound) -> ApiResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "status": "failure", "details": err.to_string() })),
    )
}

pub(crate) fn bad_request(details: impl Into<String>) -> ApiResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "status": "failure", "details": details.into() })),
    )
}

/// Unwraps a JSON body, turning any rejection into a 400.
pub(crate) fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiResponse> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

pub(crate) fn require(field: &str, value: &str) -> Result<(), ApiResponse> {
    if value.trim().is_empty() {
        return Err(bad_request(format!("{} is required", field)));
    }
    Ok(())
}
