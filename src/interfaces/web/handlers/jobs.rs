use axum::extract::{Path, State};
use serde_json::json;
use tracing::error;

use super::super::AppState;
use super::{ApiResponse, failure, reply};

pub async fn list_jobs_endpoint(
    Path(tenant): Path<String>,
    State(state): State<AppState>,
) -> ApiResponse {
    match state.scheduler.jobs(&tenant).await {
        Ok(jobs) => reply(json!({ "jobs": jobs })),
        Err(e) => {
            error!("Failed to list jobs for tenant {}: {:?}", tenant, e);
            failure(e.to_string())
        }
    }
}
