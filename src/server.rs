//! Axum router construction and route mapping.
//!
//! The [`app`] function wires every image endpoint to its handler, adds
//! the token auth middleware and the ambient layers (tracing, CORS, body
//! limit, metrics), and returns a ready-to-serve [`axum::Router`].

use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, RawQuery, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::errors::ApiError;
use crate::handlers::images::{self, UploadForm};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

// -- OpenAPI specification ----------------------------------------------------

/// OpenAPI documentation for the image API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "imagestore API",
        version = "0.1.0",
        description = "Per-user image store"
    ),
    paths(
        health_check,
        crate::handlers::images::upload_image,
        crate::handlers::images::list_images,
        crate::handlers::images::delete_image,
        crate::handlers::images::instance_weight,
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Image", description = "Image upload, listing and deletion"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`] with all routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let openapi = ApiDoc::openapi();
    let observability = state.config.observability.clone();
    let body_limit = usize::try_from(state.config.server.max_upload_size).unwrap_or(usize::MAX);

    let mut router: Router<Arc<AppState>> = Router::new()
        .route("/image/upload", post(handle_upload))
        .route("/image/list", get(handle_list))
        .route("/image/list/weight", get(handle_weight))
        .route("/image/delete", delete(handle_delete));

    if observability.health_check {
        router = router.route("/health", get(health_check));
    }
    if observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    let router = router
        // Swagger UI at /docs, OpenAPI spec at /openapi.json
        .merge(SwaggerUi::new("/docs").url("/openapi.json", openapi))
        .with_state(state.clone())
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(middleware::from_fn_with_state(state, auth_middleware))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    if observability.metrics {
        // Outermost, so it captures the full request lifecycle.
        router.layer(middleware::from_fn(metrics_middleware))
    } else {
        router
    }
}

// -- Auth middleware ---------------------------------------------------------

/// Paths that bypass authentication.
const AUTH_SKIP_PATHS: &[&str] = &["/health", "/metrics", "/docs", "/openapi.json"];

/// API token middleware.
///
/// The `Authorization` header carries the token, optionally prefixed with
/// `Bearer `.  A token store failure is logged and answered like an unknown
/// token.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let path = req.uri().path();

    if !state.config.auth.enabled
        || AUTH_SKIP_PATHS.iter().any(|skip| path == *skip)
        || path.starts_with("/docs/")
    {
        return Ok(next.run(req).await);
    }

    let Some(header) = req.headers().get("authorization") else {
        return Err(ApiError::unauthorized("Missing authorization key."));
    };
    let raw = header.to_str().unwrap_or("");
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();

    let known = match state.tokens.verify(token).await {
        Ok(known) => known,
        Err(e) => {
            error!("Token lookup failed: {:#}", e);
            false
        }
    };
    if !known {
        warn!("Rejected request to {} with an unknown API token", path);
        return Err(ApiError::unauthorized("Invalid API Token."));
    }

    debug!("Auth OK for {}", path);
    Ok(next.run(req).await)
}

// -- Health check ------------------------------------------------------------

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

// -- Query parameter parsing helper ------------------------------------------

/// Parse raw query string into a HashMap.  The last occurrence of a
/// repeated key wins.
fn parse_query(raw: Option<String>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(qs) = raw {
        for part in qs.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            map.insert(decode_component(k), decode_component(v));
        }
    }
    map
}

/// Percent-decode a query component, treating `+` as a space.
fn decode_component(s: &str) -> String {
    let s = s.replace('+', " ");
    percent_encoding::percent_decode_str(&s)
        .decode_utf8_lossy()
        .into_owned()
}

/// Value of the `user` header, if present and valid UTF-8.
fn user_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get("user")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

// -- Route handlers ----------------------------------------------------------

/// `POST /image/upload`.  A request that is not multipart at all is handled
/// like an empty form.
async fn handle_upload(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let form = match multipart {
        Ok(multipart) => images::read_upload_form(multipart).await?,
        Err(rejection) => {
            debug!("Upload without multipart body: {}", rejection);
            UploadForm::default()
        }
    };
    images::upload_image(state, form).await
}

/// `GET /image/list`.
async fn handle_list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, ApiError> {
    let query = parse_query(raw_query);
    images::list_images(state, user_header(&headers), &query).await
}

/// `DELETE /image/delete`.
async fn handle_delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    images::delete_image(state, user_header(&headers), &body).await
}

/// `GET /image/list/weight`.
async fn handle_weight(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    images::instance_weight(state).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query() {
        let query = parse_query(Some("page=2&offset=5&sortBy=size&ascending".to_string()));
        assert_eq!(query.get("page").map(String::as_str), Some("2"));
        assert_eq!(query.get("offset").map(String::as_str), Some("5"));
        assert_eq!(query.get("sortBy").map(String::as_str), Some("size"));
        assert_eq!(query.get("ascending").map(String::as_str), Some(""));
    }

    #[test]
    fn test_parse_query_decodes() {
        let query = parse_query(Some("sortBy=da%74e&x=a+b".to_string()));
        assert_eq!(query.get("sortBy").map(String::as_str), Some("date"));
        assert_eq!(query.get("x").map(String::as_str), Some("a b"));
    }

    #[test]
    fn test_parse_query_empty() {
        assert!(parse_query(None).is_empty());
        assert!(parse_query(Some(String::new())).is_empty());
    }

    #[test]
    fn test_user_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(user_header(&headers), None);
        headers.insert("user", "alice".parse().unwrap());
        assert_eq!(user_header(&headers).as_deref(), Some("alice"));
    }
}
