//! Admin JSON API handlers

use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection, FromRequest, Multipart, Path, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use super::{blocking, ApiError, AppState};
use crate::models::{timestamp_now, Channel, Owner, Package, Playlist, SourceKind, User};
use crate::store::MAX_CHANNEL_LIST;

type JsonBody<T> = Result<Json<T>, JsonRejection>;

/// Largest playlist file accepted by a multipart upload
pub const UPLOAD_MAX_BYTES: usize = 10 * 1024 * 1024;

/// Playlist as returned to the admin UI
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistView {
    #[serde(flatten)]
    pub playlist: Playlist,
    pub public_url: String,
}

impl From<Playlist> for PlaylistView {
    fn from(playlist: Playlist) -> Self {
        let public_url = playlist.public_url();
        Self { playlist, public_url }
    }
}

#[derive(Deserialize)]
pub struct CreatePlaylistRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Deserialize)]
pub struct InlinePlaylistRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelQuery {
    pub playlist_id: Option<String>,
    pub q: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPlaylistRequest {
    pub playlist_id: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelIdsRequest {
    #[serde(default)]
    pub channel_ids: Vec<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageIdsRequest {
    #[serde(default)]
    pub package_ids: Vec<i64>,
}

#[derive(Deserialize)]
pub struct CreatePackageRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: i64,
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "time": timestamp_now(),
        "authRequired": !state.config.auth_disabled(),
    }))
}

// ---- playlists ---------------------------------------------------------

pub async fn list_playlists(State(state): State<AppState>) -> Result<Json<Vec<PlaylistView>>, ApiError> {
    let store = state.store.clone();
    let playlists = blocking(move || Ok(store.list_playlists()?)).await?;
    Ok(Json(playlists.into_iter().map(PlaylistView::from).collect()))
}

/// `POST /api/playlists`: a multipart upload creates an inline playlist,
/// anything else is a JSON url playlist
pub async fn create_playlist(State(state): State<AppState>, req: Request) -> Result<Response, ApiError> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"));

    if is_multipart {
        let multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        upload_playlist(state, multipart).await
    } else {
        let body = Json::<CreatePlaylistRequest>::from_request(req, &state).await;
        create_url_playlist(state, body).await
    }
}

/// Create a url playlist, then fetch and import it. The row is kept when the
/// first import fails so it can be reimported later.
async fn create_url_playlist(
    state: AppState,
    body: JsonBody<CreatePlaylistRequest>,
) -> Result<Response, ApiError> {
    let Json(req) = body?;
    let store = state.store.clone();
    let fetcher = state.fetcher.clone();
    let cancel = state.shutdown.clone();

    let playlist = blocking(move || {
        let playlist = store.create_playlist_from_url(&req.name, &req.url)?;
        let imported = fetcher
            .fetch_text(&playlist.source_url)
            .map_err(ApiError::from)
            .and_then(|text| Ok(store.import_playlist(playlist.id, &text, &cancel)?));
        if let Err(e) = imported {
            warn!("playlist {}: initial import failed: {:?}", playlist.id, e);
            return Err(e);
        }
        Ok(playlist)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(PlaylistView::from(playlist))).into_response())
}

/// Multipart fields `file` (required) and `name`. Without a name the file
/// name minus its extension is used.
async fn upload_playlist(state: AppState, mut multipart: Multipart) -> Result<Response, ApiError> {
    let mut name = String::new();
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("name") => name = field.text().await.map_err(multipart_error)?.trim().to_string(),
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let mut bytes = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    if bytes.len() + chunk.len() > UPLOAD_MAX_BYTES {
                        return Err(ApiError::BadRequest("file too large".to_string()));
                    }
                    bytes.extend_from_slice(&chunk);
                }
                file = Some((file_name, bytes));
            }
            _ => {}
        }
    }

    let (file_name, bytes) = file.ok_or_else(|| ApiError::BadRequest("missing file".to_string()))?;
    if name.is_empty() {
        name = std::path::Path::new(&file_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().trim().to_string())
            .unwrap_or_default();
    }
    let content = String::from_utf8_lossy(&bytes).into_owned();

    let store = state.store.clone();
    let cancel = state.shutdown.clone();
    let playlist = blocking(move || {
        let playlist = store.create_inline_playlist(&name, &content)?;
        store.import_playlist(playlist.id, &content, &cancel)?;
        Ok(playlist)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(PlaylistView::from(playlist))).into_response())
}

fn multipart_error(e: MultipartError) -> ApiError {
    ApiError::BadRequest(e.body_text())
}

pub async fn create_inline_playlist(
    State(state): State<AppState>,
    body: JsonBody<InlinePlaylistRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body?;
    let store = state.store.clone();
    let cancel = state.shutdown.clone();

    let playlist = blocking(move || {
        let playlist = store.create_inline_playlist(&req.name, &req.content)?;
        store.import_playlist(playlist.id, &req.content, &cancel)?;
        Ok(playlist)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(PlaylistView::from(playlist))))
}

pub async fn delete_playlist(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let store = state.store.clone();
    blocking(move || Ok(store.delete_playlist(id)?)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Re-run the import: url playlists are fetched again, inline playlists reuse
/// their stored content
pub async fn reimport_playlist(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let store = state.store.clone();
    let fetcher = state.fetcher.clone();
    let cancel = state.shutdown.clone();

    let report = blocking(move || {
        let (playlist, content) = store.get_playlist(id)?;
        let text = match playlist.source_kind {
            SourceKind::Url => fetcher.fetch_text(&playlist.source_url)?,
            SourceKind::Inline if content.trim().is_empty() => {
                return Err(ApiError::BadRequest("content is required".to_string()));
            }
            SourceKind::Inline => content,
        };
        Ok(store.import_playlist(id, &text, &cancel)?)
    })
    .await?;

    Ok(Json(json!({ "ok": true, "imported": report.imported })))
}

pub async fn list_channels(
    State(state): State<AppState>,
    Query(query): Query<ChannelQuery>,
) -> Result<Json<Vec<Channel>>, ApiError> {
    let playlist_id = match query.playlist_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(v) => Some(
            v.parse::<i64>()
                .map_err(|_| ApiError::BadRequest("invalid playlistId".to_string()))?,
        ),
    };
    let q = query.q.unwrap_or_default();

    let store = state.store.clone();
    let channels =
        blocking(move || Ok(store.search_channels(playlist_id, &q, MAX_CHANNEL_LIST)?)).await?;
    Ok(Json(channels))
}

// ---- users -------------------------------------------------------------

pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    let store = state.store.clone();
    Ok(Json(blocking(move || Ok(store.list_users()?)).await?))
}

pub async fn create_user(
    State(state): State<AppState>,
    body: JsonBody<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body?;
    let store = state.store.clone();
    let user = blocking(move || Ok(store.create_user(&req.username, &req.display_name)?)).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<User>, ApiError> {
    let store = state.store.clone();
    Ok(Json(blocking(move || Ok(store.get_user(id)?)).await?))
}

/// Rename a user or change their display name; omitted fields are kept
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: JsonBody<UpdateUserRequest>,
) -> Result<Json<User>, ApiError> {
    let Json(req) = body?;
    let store = state.store.clone();
    let user = blocking(move || {
        Ok(store.update_user(id, req.username.as_deref(), req.display_name.as_deref())?)
    })
    .await?;
    Ok(Json(user))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let store = state.store.clone();
    blocking(move || Ok(store.delete_user(id)?)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Assign a playlist to the user; `null` clears it
pub async fn set_user_playlist(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: JsonBody<SetPlaylistRequest>,
) -> Result<Json<User>, ApiError> {
    let Json(req) = body?;
    let store = state.store.clone();
    let user = blocking(move || {
        store.set_user_playlist(id, req.playlist_id.filter(|&p| p > 0))?;
        Ok(store.get_user(id)?)
    })
    .await?;
    Ok(Json(user))
}

pub async fn user_channels(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Channel>>, ApiError> {
    let store = state.store.clone();
    let channels = blocking(move || {
        store.get_user(id)?;
        Ok(store.list_owner_channels(Owner::User(id))?)
    })
    .await?;
    Ok(Json(channels))
}

pub async fn set_user_channels(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: JsonBody<ChannelIdsRequest>,
) -> Result<Json<Vec<Channel>>, ApiError> {
    let Json(req) = body?;
    replace_owner_channels(&state, Owner::User(id), req.channel_ids).await
}

pub async fn user_packages(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Package>>, ApiError> {
    let store = state.store.clone();
    let packages = blocking(move || {
        store.get_user(id)?;
        Ok(store.list_user_packages(id)?)
    })
    .await?;
    Ok(Json(packages))
}

pub async fn set_user_packages(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: JsonBody<PackageIdsRequest>,
) -> Result<Json<Vec<Package>>, ApiError> {
    let Json(req) = body?;
    let store = state.store.clone();
    let packages = blocking(move || {
        store.get_user(id)?;
        store.set_user_packages(id, &req.package_ids)?;
        Ok(store.list_user_packages(id)?)
    })
    .await?;
    Ok(Json(packages))
}

// ---- packages ----------------------------------------------------------

pub async fn list_packages(State(state): State<AppState>) -> Result<Json<Vec<Package>>, ApiError> {
    let store = state.store.clone();
    Ok(Json(blocking(move || Ok(store.list_packages()?)).await?))
}

pub async fn create_package(
    State(state): State<AppState>,
    body: JsonBody<CreatePackageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body?;
    let store = state.store.clone();
    let package = blocking(move || Ok(store.create_package(&req.name, req.price)?)).await?;
    Ok((StatusCode::CREATED, Json(package)))
}

pub async fn get_package(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Package>, ApiError> {
    let store = state.store.clone();
    Ok(Json(blocking(move || Ok(store.get_package(id)?)).await?))
}

pub async fn delete_package(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let store = state.store.clone();
    blocking(move || Ok(store.delete_package(id)?)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn package_channels(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Channel>>, ApiError> {
    let store = state.store.clone();
    let channels = blocking(move || {
        store.get_package(id)?;
        Ok(store.list_owner_channels(Owner::Package(id))?)
    })
    .await?;
    Ok(Json(channels))
}

pub async fn set_package_channels(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: JsonBody<ChannelIdsRequest>,
) -> Result<Json<Vec<Channel>>, ApiError> {
    let Json(req) = body?;
    replace_owner_channels(&state, Owner::Package(id), req.channel_ids).await
}

/// Replace a user's or package's selection and return the stored list
async fn replace_owner_channels(
    state: &AppState,
    owner: Owner,
    channel_ids: Vec<i64>,
) -> Result<Json<Vec<Channel>>, ApiError> {
    let store = state.store.clone();
    let cancel = state.shutdown.clone();
    let channels = blocking(move || {
        match owner {
            Owner::User(id) => store.get_user(id).map(|_| ())?,
            Owner::Package(id) => store.get_package(id).map(|_| ())?,
            Owner::Playlist(_) => return Err(ApiError::NotFound),
        }
        store.replace_selection(owner, &channel_ids, &cancel)?;
        Ok(store.list_owner_channels(owner)?)
    })
    .await?;
    Ok(Json(channels))
}
