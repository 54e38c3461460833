//! HTTP adapter for the replaydeck asset cache.
//!
//! Provides the handler that streams an audio asset by id. Mounting it is
//! left to the service that owns the router:
//!
//! ```no_run
//! use axum::{Router, routing::get};
//! use replaydeck_assets::AssetCache;
//!
//! fn routes(cache: AssetCache) -> Router {
//!     Router::new()
//!         .route("/audios/{id}/stream", get(replaydeck_http::stream_audio))
//!         .with_state(cache)
//! }
//! ```

pub mod error;

pub use error::{ApiError, ErrorBody, ErrorDetail};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use replaydeck_assets::{AssetCache, AssetId};
use tokio_util::io::ReaderStream;

/// `GET` handler streaming the audio asset `{id}` from the local cache.
///
/// The asset is fetched from remote storage on first request. The response
/// carries `Content-Type` guessed from the file extension and
/// `Content-Length`.
pub async fn stream_audio(
    State(cache): State<AssetCache>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let file = cache.get_local_file(AssetId::new(id)).await?;
    let reader = file.open().await?;
    tracing::debug!(id, path = ?file.path(), bytes = file.len(), "Streaming audio");

    let headers = [
        (
            header::CONTENT_TYPE,
            HeaderValue::from_static(file.content_type()),
        ),
        (header::CONTENT_LENGTH, HeaderValue::from(file.len())),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(reader))).into_response())
}
