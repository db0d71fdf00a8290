use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;

use super::handlers::{actions, jobs, tools, triggers};
use super::{AppState, sse_logs_endpoint};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/actions/execute", post(actions::execute_action_endpoint))
        .route("/api/tools", get(tools::list_tool_schemas_endpoint))
        .route("/api/triggers/webhook", post(triggers::set_webhook_url_endpoint))
        .route("/api/triggers/transform", post(triggers::transform_payload_endpoint))
        .route(
            "/api/tenants/{tenant}/tools",
            get(tools::list_tenant_tools_endpoint).post(tools::install_tool_endpoint),
        )
        .route(
            "/api/tenants/{tenant}/tools/sync",
            post(tools::sync_tenant_tools_endpoint),
        )
        .route(
            "/api/tenants/{tenant}/tools/{tool}",
            delete(tools::remove_tool_endpoint),
        )
        .route("/api/tenants/{tenant}/jobs", get(jobs::list_jobs_endpoint))
        .route("/api/logs", get(sse_logs_endpoint))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.api_port))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
