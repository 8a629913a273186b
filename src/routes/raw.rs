//! Raw download routes
//!
//! `/api/raw` serves the bytes of the virtual filesystem: a single regular
//! file is delegated to tower-http's file service (byte ranges, conditional
//! requests), a named pipe answers with headers only, and a directory is
//! streamed as an archive in the requested container format. `/api/unzip`
//! is the reverse direction for zip archives.

use std::io::Write;

use axum::{
    body::{Body, Bytes},
    extract::{Path as UrlPath, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower::util::ServiceExt;
use tower_http::services::ServeFile;

use crate::archive::{self, ArchiveFormat, ArchiveWriter};
use crate::error::{AppError, Result};
use crate::files;
use crate::fsutil;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(raw_root))
        .route("/*path", get(raw))
}

pub fn unzip_router() -> Router<AppState> {
    Router::new().route("/*path", post(unzip))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawQuery {
    /// Comma-separated sub-paths to include in an archive export.
    files: Option<String>,
    /// Archive format token; empty means zip.
    algo: Option<String>,
    /// `inline=true` switches the disposition from attachment to inline.
    inline: Option<String>,
}

async fn raw_root(
    State(state): State<AppState>,
    Query(query): Query<RawQuery>,
    request: Request,
) -> Result<Response> {
    serve(state, String::new(), query, request).await
}

async fn raw(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
    Query(query): Query<RawQuery>,
    request: Request,
) -> Result<Response> {
    serve(state, path, query, request).await
}

async fn serve(
    state: AppState,
    raw_path: String,
    query: RawQuery,
    request: Request,
) -> Result<Response> {
    // Download-disabled answers 202, not 403. Clients depend on it.
    if !state.permissions().download {
        return Ok(StatusCode::ACCEPTED.into_response());
    }

    let vpath = fsutil::clean(&raw_path);
    if !state.checker().check(&vpath) {
        return Err(AppError::PermissionDenied);
    }

    let host = fsutil::to_host(state.root(), &vpath);
    let meta = tokio::fs::metadata(&host).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AppError::NotFound(vpath.clone()),
        _ => AppError::Storage(e),
    })?;

    if meta.is_dir() {
        stream_archive(state, vpath, query).await
    } else if files::is_named_pipe(&meta.file_type()) {
        // Header-only: a FIFO read would block until a writer appears.
        Response::builder()
            .header(header::CONTENT_DISPOSITION, disposition(&query, &vpath))
            .body(Body::empty())
            .map_err(|e| AppError::Internal(e.to_string()))
    } else {
        serve_single_file(&host, &vpath, &query, request).await
    }
}

fn disposition(query: &RawQuery, vpath: &str) -> String {
    if query.inline.as_deref() == Some("true") {
        return "inline".to_string();
    }
    let name = vpath.rsplit('/').next().unwrap_or("");
    format!("attachment; filename*=utf-8''{}", urlencoding::encode(name))
}

/// Byte-range and conditional-request handling comes from `ServeFile`; only
/// the disposition header is ours.
async fn serve_single_file(
    host: &std::path::Path,
    vpath: &str,
    query: &RawQuery,
    request: Request,
) -> Result<Response> {
    let disposition = disposition(query, vpath);

    let response = ServeFile::new(host)
        .oneshot(request)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let mut response = response.map(Body::new);
    response.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        disposition
            .parse()
            .map_err(|_| AppError::Internal("unencodable disposition".to_string()))?,
    );
    Ok(response)
}

/// Splits the `files` parameter and joins each name under the resource root.
///
/// Names arrive URL-encoded a second time by the client; literal `+` is
/// pre-substituted so it survives decoding as a plus sign, not a space. An
/// empty parameter selects the resource root itself.
fn parse_targets(vpath: &str, files: Option<&str>) -> Result<Vec<String>> {
    let raw = files.unwrap_or("").trim();
    if raw.is_empty() {
        return Ok(vec![vpath.to_string()]);
    }

    let raw = raw.replace('+', "%2B");
    let mut targets = Vec::new();
    for name in raw.split(',') {
        let decoded = urlencoding::decode(name)
            .map_err(|_| AppError::InvalidInput(format!("undecodable file name: {:?}", name)))?;
        targets.push(fsutil::clean(&format!("{}/{}", vpath, decoded)));
    }
    Ok(targets)
}

/// Streams an archive of the selected paths.
///
/// The format token is resolved before any header byte: once the container
/// starts streaming, errors can only abort the body. The walk runs on a
/// blocking task feeding a bounded channel; if the client disconnects, the
/// channel closes and the walk aborts on its next write.
async fn stream_archive(state: AppState, vpath: String, query: RawQuery) -> Result<Response> {
    let format = ArchiveFormat::parse(query.algo.as_deref().unwrap_or(""))?;
    let targets = parse_targets(&vpath, query.files.as_deref())?;
    let common = fsutil::common_prefix('/', &targets);

    let resource_name = vpath.rsplit('/').next().unwrap_or("");
    let base = if resource_name.is_empty() || resource_name == "." {
        "archive"
    } else {
        resource_name
    };
    let filename = format!("{}{}", base, format.extension());

    tracing::info!(
        path = %vpath,
        format = ?format,
        targets = targets.len(),
        "Streaming archive export"
    );

    let (tx, rx) = tokio::sync::mpsc::channel::<std::io::Result<Bytes>>(16);

    let root = state.root().to_path_buf();
    let checker = state.checker().clone();
    tokio::task::spawn_blocking(move || {
        let sink: archive::Sink = Box::new(ChannelWriter { tx: tx.clone() });
        let result = ArchiveWriter::new(format, sink).and_then(|mut writer| {
            archive::export(&root, checker.as_ref(), &mut writer, &targets, &common)?;
            writer.finish()
        });
        if let Err(e) = result {
            tracing::warn!(error = %e, "Archive export aborted");
            let _ = tx.blocking_send(Err(e));
        }
    });

    let stream =
        futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|b| (b, rx)) });

    Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename*=utf-8''{}",
                urlencoding::encode(&filename)
            ),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// `std::io::Write` adapter pushing archive bytes into the response channel.
struct ChannelWriter {
    tx: tokio::sync::mpsc::Sender<std::io::Result<Bytes>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "client disconnected")
            })?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// POST /api/unzip/*path — extracts a zip archive next to itself.
async fn unzip(State(state): State<AppState>, UrlPath(path): UrlPath<String>) -> Result<Response> {
    if !state.permissions().create {
        return Err(AppError::PermissionDenied);
    }

    let vpath = fsutil::clean(&path);
    if !state.checker().check(&vpath) {
        return Err(AppError::PermissionDenied);
    }

    let root = state.root().to_path_buf();
    let target = vpath.clone();
    let extracted = tokio::task::spawn_blocking(move || archive::unzip(&root, &target))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(Json(serde_json::json!({ "extracted": extracted })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_files_param_selects_the_resource_itself() {
        assert_eq!(parse_targets("/docs", None).unwrap(), vec!["/docs"]);
        assert_eq!(parse_targets("/docs", Some("")).unwrap(), vec!["/docs"]);
    }

    #[test]
    fn files_param_joined_under_resource_root() {
        let targets = parse_targets("/docs", Some("a.txt,sub%2Fb.txt")).unwrap();
        assert_eq!(targets, vec!["/docs/a.txt", "/docs/sub/b.txt"]);
    }

    #[test]
    fn literal_plus_survives_decoding() {
        let targets = parse_targets("/", Some("a+b.txt")).unwrap();
        assert_eq!(targets, vec!["/a+b.txt"]);
    }

    #[test]
    fn traversal_in_files_param_is_contained() {
        let targets = parse_targets("/docs", Some("..%2F..%2Fetc")).unwrap();
        assert_eq!(targets, vec!["/etc"]);
    }

    #[test]
    fn disposition_escapes_filename() {
        let q = RawQuery::default();
        assert_eq!(
            disposition(&q, "/dir/naïve file.txt"),
            "attachment; filename*=utf-8''na%C3%AFve%20file.txt"
        );

        let inline = RawQuery {
            inline: Some("true".to_string()),
            ..Default::default()
        };
        assert_eq!(disposition(&inline, "/a.txt"), "inline");
    }
}
