//! File routes: download, listing, upload and delete.
//!
//! Every successful mutation is announced through the change notifier so that
//! streaming sessions re-check their watched directory.

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use skiff_core::ObjectStore;
use tracing::{debug, info};

/// Create file routes
pub fn file_routes(state: AppState) -> Router {
    Router::new()
        .route("/files/", get(list_root))
        .route(
            "/files/{*path}",
            get(get_file).put(put_file).delete(delete_file),
        )
        .with_state(state)
}

/// How a directory listing is rendered for a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListingFormat {
    Json,
    Text,
    Redirect,
}

fn header_lowercase(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn listing_format(headers: &HeaderMap) -> ListingFormat {
    if header_lowercase(headers, header::ACCEPT).contains("application/json") {
        return ListingFormat::Json;
    }

    let agent = header_lowercase(headers, header::USER_AGENT);
    if agent.contains("curl") || agent.contains("wget") {
        return ListingFormat::Text;
    }

    ListingFormat::Redirect
}

async fn list_root(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    list(&state, "", &headers).await
}

async fn list(state: &AppState, path: &str, headers: &HeaderMap) -> ApiResult<Response> {
    let format = listing_format(headers);

    if format == ListingFormat::Redirect {
        if let Some(frontend) = &state.frontend_url {
            return Ok(Redirect::temporary(&format!("{}/{}", frontend, path)).into_response());
        }
    }

    let directory = state.snapshotter.snapshot(path).await?;
    match format {
        ListingFormat::Text => Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            directory.to_text(),
        )
            .into_response()),
        _ => Ok(Json(directory).into_response()),
    }
}

/// Download an object, or list a directory when the path ends with `/`
async fn get_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    if path.is_empty() || path.ends_with('/') {
        return list(&state, &path, &headers).await;
    }

    let data = state.store.get(&path).await?;
    debug!("GET {} ({} bytes)", path, data.len());
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response())
}

/// Upload an object
async fn put_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    if path.ends_with('/') {
        return Err(ApiError::BadRequest(format!(
            "cannot upload to directory {}",
            path
        )));
    }

    let size = body.len();
    state.store.put(&path, body).await?;
    info!("Uploaded {} ({} bytes)", path, size);
    state.notifier.notify();
    Ok(StatusCode::CREATED)
}

/// Delete an object
async fn delete_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<StatusCode> {
    state.store.delete(&path).await?;
    info!("Deleted {}", path);
    state.notifier.notify();
    Ok(StatusCode::NO_CONTENT)
}
