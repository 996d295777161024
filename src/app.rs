//! HTTP surface: routes, handlers, middleware.
//!
//! Handlers resolve paths and attach response metadata; byte delivery
//! itself goes through [`Ranged`] so status, length, and content-range
//! arithmetic stay in one place.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path as UrlPath, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use thiserror::Error;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::config::Config;
use crate::library::{Library, MediaFile};
use crate::media;
use crate::range::RangeError;
use crate::upload::{UploadError, Uploader};
use crate::{KnownSize, Ranged};

/// Shared application context, built once at startup and passed to every
/// handler through axum state.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub library: Arc<Library>,
    pub uploader: Arc<Uploader>,
}

/// Errors a handler surfaces to the client.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("file not found")]
    NotFound,

    #[error("path escapes the serving root")]
    InvalidPath,

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            AppError::NotFound
        } else {
            AppError::Io(err)
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "not found").into_response(),
            AppError::InvalidPath => (StatusCode::FORBIDDEN, "invalid path").into_response(),
            AppError::Range(err) => err.into_response(),
            AppError::Upload(UploadError::TooLarge) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "upload too large").into_response()
            }
            AppError::Upload(
                err @ (UploadError::NotMultipart
                | UploadError::MissingFile
                | UploadError::Multipart(_)),
            ) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
            AppError::Upload(UploadError::Io(err)) | AppError::Io(err) => {
                error!(%err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
        }
    }
}

/// Builds the application router.
pub fn router(ctx: AppContext) -> Router {
    let mut app = Router::new()
        .route("/api/media", get(list_media))
        .route("/api/upload", post(upload))
        .route("/media/{*path}", get(stream_media))
        .route("/covers/{*path}", get(serve_cover));

    if let Some(assets) = &ctx.config.assets_dir {
        app = app.fallback_service(ServeDir::new(assets));
    }

    app.layer(middleware::from_fn(log_requests))
        .layer(CatchPanicLayer::new())
        .with_state(ctx)
}

async fn list_media(State(ctx): State<AppContext>) -> Result<Json<Vec<MediaFile>>, AppError> {
    let files = ctx.library.list().await?;
    Ok(Json(files))
}

async fn stream_media(
    State(ctx): State<AppContext>,
    UrlPath(path): UrlPath<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let full = resolve_under(ctx.library.root(), &path)?;
    serve_file(&full, &headers, true).await
}

async fn serve_cover(
    State(ctx): State<AppContext>,
    UrlPath(path): UrlPath<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let full = resolve_under(&ctx.config.covers_dir, &path)?;
    serve_file(&full, &headers, false).await
}

async fn upload(State(ctx): State<AppContext>, request: Request) -> Result<Response, AppError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_owned();

    let outcome = ctx
        .uploader
        .receive(&content_type, request.into_body().into_data_stream())
        .await?;

    ctx.library.invalidate().await;
    info!(file = %outcome.file, "upload stored");

    Ok((StatusCode::CREATED, Json(outcome)).into_response())
}

/// Opens `path` and answers with a 200 or 206 range response. Content
/// type, disposition, and cache headers are attached here; the range
/// core never sets them.
async fn serve_file(
    path: &Path,
    headers: &HeaderMap,
    media_headers: bool,
) -> Result<Response, AppError> {
    let file = tokio::fs::File::open(path).await?;
    let body = KnownSize::file(file).await?;
    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());

    let mut response = Ranged::new(range, body).try_respond()?.into_response();
    let response_headers = response.headers_mut();

    let content_type = HeaderValue::try_from(media::content_type(path))
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));
    response_headers.insert(header::CONTENT_TYPE, content_type);

    if media_headers {
        if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            if let Ok(value) = HeaderValue::try_from(format!("inline; filename=\"{name}\"")) {
                response_headers.insert(header::CONTENT_DISPOSITION, value);
            }
        }

        // MPEG-TS segments change underneath live players; keep them out
        // of caches
        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("ts"))
        {
            response_headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-store, must-revalidate"),
            );
            response_headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
            response_headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
        }
    }

    Ok(response)
}

/// Joins a client-supplied relative path onto `root`, rejecting anything
/// that could step outside it.
fn resolve_under(root: &Path, requested: &str) -> Result<PathBuf, AppError> {
    if requested.is_empty() {
        return Err(AppError::InvalidPath);
    }

    let relative = Path::new(requested);
    let plain = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if !plain {
        return Err(AppError::InvalidPath);
    }

    Ok(root.join(relative))
}

/// One line per request: method, path, status, elapsed.
async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed = ?started.elapsed(),
        "request"
    );
    response
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use assert_matches::assert_matches;

    use super::{resolve_under, AppError};

    #[test]
    fn test_resolve_under_joins_plain_paths() {
        let resolved = resolve_under(Path::new("/srv/media"), "shows/pilot.mkv").unwrap();
        assert_eq!(PathBuf::from("/srv/media/shows/pilot.mkv"), resolved);
    }

    #[test]
    fn test_resolve_under_rejects_traversal() {
        assert_matches!(
            resolve_under(Path::new("/srv/media"), "../etc/passwd"),
            Err(AppError::InvalidPath)
        );
        assert_matches!(
            resolve_under(Path::new("/srv/media"), "shows/../../etc/passwd"),
            Err(AppError::InvalidPath)
        );
    }

    #[test]
    fn test_resolve_under_rejects_absolute_and_empty() {
        assert_matches!(
            resolve_under(Path::new("/srv/media"), "/etc/passwd"),
            Err(AppError::InvalidPath)
        );
        assert_matches!(
            resolve_under(Path::new("/srv/media"), ""),
            Err(AppError::InvalidPath)
        );
    }
}
