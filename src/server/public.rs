//! Public playlist endpoints for player apps. Failures are bare status codes.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{error, warn};

use super::AppState;
use crate::error::StoreError;
use crate::fetcher::PlaylistFetcher;
use crate::m3u_writer::{self, write_m3u};
use crate::models::{Owner, SourceKind, User};
use crate::store::Store;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppKeyQuery {
    pub app_key: Option<String>,
}

/// `GET /public/m3u/{id}.m3u`
pub async fn playlist_file(State(state): State<AppState>, Path(file): Path<String>) -> Response {
    let Some(id) = file
        .strip_suffix(".m3u")
        .and_then(|id| id.parse::<i64>().ok())
    else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let (store, fetcher) = (state.store.clone(), state.fetcher.clone());
    respond(move || playlist_body(&store, &fetcher, id)).await
}

/// `GET /public/users/{appKey}/playlist.m3u`
pub async fn user_playlist(State(state): State<AppState>, Path(app_key): Path<String>) -> Response {
    let (store, fetcher) = (state.store.clone(), state.fetcher.clone());
    respond(move || {
        let user = store.get_user_by_app_key(&app_key).map_err(store_status)?;
        user_body(&store, &fetcher, &user)
    })
    .await
}

/// `GET /playlist.m3u?appKey=`: explicit key, then the configured default,
/// then the newest user
pub async fn default_playlist(
    State(state): State<AppState>,
    Query(query): Query<AppKeyQuery>,
) -> Response {
    let explicit = query
        .app_key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty());
    let configured = state.config.fallback_app_key().map(String::from);
    let (store, fetcher) = (state.store.clone(), state.fetcher.clone());

    respond(move || {
        let app_key = match explicit.or(configured) {
            Some(key) => key,
            None => store
                .newest_app_key()
                .map_err(store_status)?
                .ok_or(StatusCode::NOT_FOUND)?,
        };
        let user = store.get_user_by_app_key(&app_key).map_err(store_status)?;
        user_body(&store, &fetcher, &user)
    })
    .await
}

async fn respond<F>(f: F) -> Response
where
    F: FnOnce() -> Result<String, StatusCode> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(f).await.unwrap_or_else(|e| {
        error!("Playlist worker failed: {}", e);
        Err(StatusCode::INTERNAL_SERVER_ERROR)
    });

    match result {
        Ok(body) => (
            [
                (header::CONTENT_TYPE, m3u_writer::CONTENT_TYPE),
                (header::CACHE_CONTROL, "no-store"),
            ],
            body,
        )
            .into_response(),
        Err(status) => status.into_response(),
    }
}

/// A user's own channels, else their packages' channels, else their playlist
fn user_body(store: &Store, fetcher: &PlaylistFetcher, user: &User) -> Result<String, StatusCode> {
    let owner = Owner::User(user.id);
    if store.owner_has_channels(owner).map_err(store_status)? {
        let channels = store.list_owner_channels(owner).map_err(store_status)?;
        return Ok(write_m3u(&channels));
    }

    let packaged = store.list_user_package_channels(user.id).map_err(store_status)?;
    if !packaged.is_empty() {
        return Ok(write_m3u(&packaged));
    }

    match user.playlist_id {
        Some(id) => playlist_body(store, fetcher, id),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// Inline content verbatim, or the upstream body for url playlists
fn playlist_body(store: &Store, fetcher: &PlaylistFetcher, id: i64) -> Result<String, StatusCode> {
    let (playlist, content) = store.get_playlist(id).map_err(store_status)?;
    let body = match playlist.source_kind {
        SourceKind::Inline => content,
        SourceKind::Url => fetcher.fetch_text(&playlist.source_url).map_err(|e| {
            warn!("playlist {}: upstream fetch failed: {}", id, e);
            StatusCode::BAD_GATEWAY
        })?,
    };
    Ok(with_trailing_newline(body))
}

fn with_trailing_newline(mut body: String) -> String {
    if !body.ends_with('\n') {
        body.push('\n');
    }
    body
}

fn store_status(e: StoreError) -> StatusCode {
    match e {
        StoreError::NotFound => StatusCode::NOT_FOUND,
        other => {
            error!("Playlist lookup failed: {}", other);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
