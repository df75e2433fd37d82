//! HTTP surface: admin JSON API and public playlist endpoints

pub mod admin;
pub mod public;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::error::{FetchError, ImportError, StoreError};
use crate::fetcher::PlaylistFetcher;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Arc<AppConfig>,
    pub fetcher: PlaylistFetcher,
    /// Cancelled on shutdown; in-flight imports roll back at their commit point
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(store: Store, config: AppConfig, shutdown: CancellationToken) -> Self {
        let fetcher = PlaylistFetcher::new(config.fetch.clone());
        Self {
            store,
            config: Arc::new(config),
            fetcher,
            shutdown,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route(
            "/api/playlists",
            get(admin::list_playlists)
                .post(admin::create_playlist)
                .layer(DefaultBodyLimit::max(admin::UPLOAD_MAX_BYTES + 64 * 1024)),
        )
        .route("/api/playlists/inline", post(admin::create_inline_playlist))
        .route("/api/playlists/{id}", axum::routing::delete(admin::delete_playlist))
        .route("/api/playlists/{id}/reimport", post(admin::reimport_playlist))
        .route("/api/channels", get(admin::list_channels))
        .route("/api/users", get(admin::list_users).post(admin::create_user))
        .route(
            "/api/users/{id}",
            get(admin::get_user).put(admin::update_user).delete(admin::delete_user),
        )
        .route("/api/users/{id}/playlist", put(admin::set_user_playlist))
        .route(
            "/api/users/{id}/channels",
            get(admin::user_channels).put(admin::set_user_channels),
        )
        .route(
            "/api/users/{id}/packages",
            get(admin::user_packages).put(admin::set_user_packages),
        )
        .route("/api/packages", get(admin::list_packages).post(admin::create_package))
        .route(
            "/api/packages/{id}",
            get(admin::get_package).delete(admin::delete_package),
        )
        .route(
            "/api/packages/{id}/channels",
            get(admin::package_channels).put(admin::set_package_channels),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/api/health", get(admin::health))
        .route("/public/m3u/{file}", get(public::playlist_file))
        .route("/public/users/{app_key}/playlist.m3u", get(public::user_playlist))
        .route("/playlist.m3u", get(public::default_playlist))
        .merge(admin)
        .layer(middleware::from_fn_with_state(state.clone(), cors))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Serve until the shutdown token is cancelled
pub async fn run_server(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    if state.config.auth_disabled() {
        info!("Admin auth disabled (no token, loopback only)");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// Run store or fetch work on the blocking pool
pub(crate) async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("worker task failed: {}", e)))?
}

// ---- errors ------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound,
    Unauthorized,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::Unauthorized => return (StatusCode::UNAUTHORIZED, "unauthorized").into_response(),
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::Invalid(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(e: ImportError) -> Self {
        match e {
            ImportError::Store(inner) => inner.into(),
            e if e.is_rejection() => ApiError::BadRequest(e.to_string()),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(e: FetchError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

// ---- middleware --------------------------------------------------------

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let res = next.run(req).await;
    info!("{} {} {} {:?}", method, path, res.status().as_u16(), start.elapsed());
    res
}

/// Echo allowed origins; every OPTIONS request ends here with 204
async fn cors(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let allowed = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .filter(|origin| {
            state
                .config
                .cors_origins
                .iter()
                .any(|o| o.trim().eq_ignore_ascii_case(origin))
        })
        .and_then(|origin| HeaderValue::from_str(origin).ok());

    let mut res = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    if let Some(origin) = allowed {
        let headers = res.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Authorization, Content-Type"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
        );
    }
    res
}

async fn require_admin(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.config.auth_disabled() {
        return Ok(next.run(req).await);
    }

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or("");
    if token.is_empty() || token != state.config.admin_token.trim() {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
