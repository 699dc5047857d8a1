//! Thumbnail route for the references carried by directory entries

use super::error::ApiResult;
use super::state::AppState;
use axum::{
    Router,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};

/// Create thumbnail routes
pub fn thumbnail_routes(state: AppState) -> Router {
    Router::new()
        .route("/thumbnails/{etag}/{*path}", get(get_thumbnail))
        .with_state(state)
}

async fn get_thumbnail(
    State(state): State<AppState>,
    Path((etag, path)): Path<(String, String)>,
) -> ApiResult<Response> {
    let png = state.thumbnailer.thumbnail(&etag, &path).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/png"),
            // A reference names one version of the image
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable"),
        ],
        png,
    )
        .into_response())
}
