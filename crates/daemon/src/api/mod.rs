// HTTP surface of the contents service.

pub mod contents;
pub mod cors;
pub mod error;

use std::time::Instant;

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use self::contents::{delete_contents, get_contents, patch_contents, post_contents, put_contents};
use self::error::{
    attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope, ApiError,
    ErrorCode,
};
use crate::config::ServerConfig;
use crate::store::ContentsStore;

pub const API_BASE: &str = "/api/notebooks";

/// Full application router: contents API, health check and middleware.
pub fn router(store: ContentsStore, server: &ServerConfig) -> Router {
    let contents = get(get_contents)
        .post(post_contents)
        .put(put_contents)
        .patch(patch_contents)
        .delete(delete_contents);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route(API_BASE, contents.clone())
        .route(&format!("{API_BASE}/"), contents.clone())
        .route(&format!("{API_BASE}/{{*path}}"), contents)
        .with_state(store);

    apply_middleware(app, server.max_body_bytes).layer(cors::cors_layer(&server.cors_origins))
}

fn apply_middleware(router: Router, max_body_bytes: usize) -> Router {
    router
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            ApiError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
