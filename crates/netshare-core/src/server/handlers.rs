//! Request handlers and router for the sharing server.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::multipart::{Field, Multipart, MultipartRejection};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::paths;

/// Read-only state shared by every request.
#[derive(Debug, Clone)]
pub(crate) struct AppState {
    /// Canonical served directory
    pub root: Arc<PathBuf>,
}

/// Build the router serving `state.root`.
pub(crate) fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(|| async { "OK" }))
        .route("/upload", post(upload))
        .route("/{*path}", get(serve_file))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors)
}

fn panic_response(_err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    tracing::error!("request handler panicked");
    ApiError::internal("internal server error").into_response()
}

// ============================================================================
// Directory listing
// ============================================================================

/// One entry of the root directory listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListingEntry {
    /// File or directory name
    pub name: String,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Whether this entry is a directory
    pub is_dir: bool,
}

/// JSON form of `GET /`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    /// Served directory
    pub root: String,
    /// Entries sorted by name
    pub entries: Vec<ListingEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListingQuery {
    format: Option<String>,
}

fn wants_json(headers: &HeaderMap, query: &ListingQuery) -> bool {
    if query.format.as_deref() == Some("json") {
        return true;
    }
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json") && !accept.contains("text/html"))
}

async fn read_listing(root: &FsPath) -> std::io::Result<Vec<ListingEntry>> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(root).await?;
    while let Some(entry) = dir.next_entry().await? {
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        entries.push(ListingEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            is_dir: metadata.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_listing(entries: &[ListingEntry]) -> String {
    let mut rows = String::new();
    for entry in entries {
        let name = escape_html(&entry.name);
        if entry.is_dir {
            rows.push_str(&format!("<li>{name}/</li>\n"));
        } else {
            rows.push_str(&format!(
                "<li><a href=\"/{name}\">{name}</a> <small>({} bytes)</small></li>\n",
                entry.size
            ));
        }
    }

    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>NetShare</title></head>\n\
         <body>\n<h1>Shared files</h1>\n<ul>\n{rows}</ul>\n\
         <form method=\"post\" action=\"/upload\" enctype=\"multipart/form-data\">\n\
         <input type=\"file\" name=\"file\" multiple>\n\
         <button type=\"submit\">Upload</button>\n</form>\n</body>\n</html>\n"
    )
}

/// GET / - Listing of the served root.
async fn index(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let entries = read_listing(&state.root).await?;

    if wants_json(&headers, &query) {
        let listing = Listing {
            root: state.root.display().to_string(),
            entries,
        };
        return Ok(Json(listing).into_response());
    }
    Ok(Html(render_listing(&entries)).into_response())
}

// ============================================================================
// File serving
// ============================================================================

/// GET /{path} - Stream a file under the root.
async fn serve_file(
    State(state): State<AppState>,
    Path(relative): Path<String>,
) -> ApiResult<Response> {
    let resolved = match paths::resolve_file(&state.root, &relative).await {
        Ok(path) => path,
        Err(e) => {
            tracing::debug!(path = %relative, error = %e, "rejected file request");
            return Err(ApiError::not_found(format!("'{relative}' not found")));
        }
    };

    let file = tokio::fs::File::open(&resolved).await?;
    let len = file.metadata().await?.len();
    let mime = mime_guess::from_path(&resolved).first_or_octet_stream();
    let content_type = HeaderValue::from_str(mime.as_ref())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    tracing::debug!(path = %relative, bytes = len, "serving file");

    let headers = [
        (header::CONTENT_TYPE, content_type),
        (header::CONTENT_LENGTH, HeaderValue::from(len)),
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
    ];
    Ok((StatusCode::OK, headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

// ============================================================================
// Upload
// ============================================================================

/// Body of a successful upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Always `"success"`
    pub status: String,
    /// Human-readable summary
    pub message: String,
    /// Stored file names
    pub files: Vec<String>,
}

/// Query of `POST /upload`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct UploadQuery {
    /// Directory under the root to store files in
    dir: Option<String>,
}

/// POST /upload - Store every file part in the root, or in `?dir=` under it.
async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<UploadResponse>> {
    let mut multipart =
        multipart.map_err(|e| ApiError::bad_request(format!("expected multipart/form-data: {e}")))?;
    let dir = paths::upload_dir(&state.root, query.dir.as_deref()).await?;

    let mut stored = Vec::new();
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read multipart field: {e}")))?
    {
        let Some(raw_name) = field.file_name().map(String::from) else {
            continue;
        };
        let name = paths::sanitize_file_name(&raw_name)
            .ok_or_else(|| ApiError::bad_request(format!("invalid file name '{raw_name}'")))?;

        let target = dir.join(&name);
        let partial = dir.join(format!(".{name}.{}.part", Uuid::new_v4()));
        let written = match receive_part(&mut field, &partial, &target).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                tracing::warn!(file = %name, "upload failed: {}", e.message);
                return Err(e);
            }
        };

        tracing::info!(file = %name, bytes = written, "received upload");
        stored.push(name);
    }

    if stored.is_empty() {
        return Err(ApiError::bad_request("no file parts in request"));
    }

    Ok(Json(UploadResponse {
        status: "success".into(),
        message: format!("uploaded {} file(s)", stored.len()),
        files: stored,
    }))
}

/// Stream one part into `partial`, then move it over `target`.
async fn receive_part(field: &mut Field, partial: &FsPath, target: &FsPath) -> ApiResult<u64> {
    let mut file = tokio::fs::File::create(partial).await?;
    let mut written = 0u64;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::bad_request(format!("upload interrupted: {e}")))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);
    tokio::fs::rename(partial, target).await?;
    Ok(written)
}
