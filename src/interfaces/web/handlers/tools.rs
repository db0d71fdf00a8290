use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use super::super::AppState;
use super::{ApiResponse, body, default_tenant, failure, not_found, reply, require};
use crate::tools::NotFound;
use crate::tools::descriptor::normalize_tool_name;
use crate::tools::manifest::Installed;

#[derive(Deserialize)]
pub struct ToolsQuery {
    #[serde(default = "default_tenant", alias = "client_id")]
    tenant_id: String,
    tool_name: Option<String>,
}

pub async fn list_tool_schemas_endpoint(
    State(state): State<AppState>,
    Query(query): Query<ToolsQuery>,
) -> ApiResponse {
    let registry = state.registry.read().await;
    match registry.list_schemas(&query.tenant_id, query.tool_name.as_deref()) {
        Ok(tools) => reply(json!({ "tools": tools })),
        Err(e) => not_found(e),
    }
}

pub async fn list_tenant_tools_endpoint(
    Path(tenant): Path<String>,
    State(state): State<AppState>,
) -> ApiResponse {
    let registry = state.registry.read().await;
    let tools: Vec<_> = registry
        .visible_tools(&tenant)
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name(),
                "tenant": tool.tenant(),
                "version": tool.version(),
                "source": tool.source().to_string(),
                "actions": tool.action_names(),
            })
        })
        .collect();
    reply(json!({ "tools": tools }))
}

#[derive(Deserialize)]
pub struct InstallToolRequest {
    manifest: String,
}

pub async fn install_tool_endpoint(
    Path(tenant): Path<String>,
    State(state): State<AppState>,
    payload: Result<Json<InstallToolRequest>, JsonRejection>,
) -> ApiResponse {
    let req = match body(payload) {
        Ok(req) => req,
        Err(response) => return response,
    };
    if let Err(response) = require("manifest", &req.manifest) {
        return response;
    }

    let (descriptor, outcome) = match state.store.install(&tenant, &req.manifest).await {
        Ok(installed) => installed,
        Err(e) => {
            warn!("Rejected custom tool for tenant {}: {:#}", tenant, e);
            return failure(format!("{:#}", e));
        }
    };
    let name = descriptor.name().to_string();
    let version = descriptor.version().map(str::to_string);
    if let Err(e) = state.registry.write().await.register(descriptor) {
        error!("Installed tool {} for tenant {} could not be registered: {}", name, tenant, e);
        return failure(e.to_string());
    }

    reply(json!({
        "status": "success",
        "tool": name,
        "tenant": tenant,
        "version": version,
        "upgraded": matches!(outcome, Installed::Upgraded { .. }),
    }))
}

pub async fn remove_tool_endpoint(
    Path((tenant, tool)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResponse {
    if let Err(e) = state.store.remove(&tenant, &tool).await {
        let registered = state
            .registry
            .read()
            .await
            .resolve(&tool, &tenant)
            .is_ok_and(|found| found.tenant() == tenant);
        if !registered {
            return not_found(NotFound::Tool {
                tool: normalize_tool_name(&tool),
                tenant,
            });
        }
        return failure(format!("{:#}", e));
    }
    state.registry.write().await.unregister(&tool, &tenant);
    reply(json!({ "status": "success", "tool": normalize_tool_name(&tool), "tenant": tenant }))
}

/// Reloads every manifest of the tenant from disk and swaps its bucket.
pub async fn sync_tenant_tools_endpoint(
    Path(tenant): Path<String>,
    State(state): State<AppState>,
) -> ApiResponse {
    let tools = match state.store.load_tenant(&tenant).await {
        Ok(tools) => tools,
        Err(e) => return failure(format!("{:#}", e)),
    };
    let names: Vec<String> = tools.iter().map(|t| t.name().to_string()).collect();
    let errors = state.registry.write().await.replace_tenant(&tenant, tools);
    for err in &errors {
        warn!("Sync for tenant {}: {}", tenant, err);
    }
    reply(json!({ "status": "success", "tools": names, "errors": errors }))
}
