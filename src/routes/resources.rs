//! Resource routes
//!
//! Stat/listing, deletion, single-shot writes and move/copy for entries of
//! the virtual filesystem. The write path holds a no-partial-file
//! guarantee: a failed body stream removes the destination before the
//! error surfaces.

use std::time::UNIX_EPOCH;

use axum::{
    body::Body,
    extract::{Path as UrlPath, Query, Request, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::files::FileInfo;
use crate::fsutil;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", root_routes())
        .route(
            "/*path",
            get(get_resource)
                .delete(delete_resource)
                .post(write_resource)
                .put(write_resource)
                .patch(patch_resource),
        )
}

/// Method router for the virtual root itself.
///
/// Mounted twice: as `/` inside the nested router and at the trailing-slash
/// spelling of the mount point, which nesting alone does not match.
pub fn root_routes() -> axum::routing::MethodRouter<AppState> {
    get(get_root).delete(delete_root)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WriteQuery {
    /// `override=true` allows POST onto an existing file.
    #[serde(rename = "override")]
    override_flag: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PatchQuery {
    /// `copy` duplicates, `rename` moves.
    action: Option<String>,
    /// Destination virtual path, URL-encoded by the client.
    destination: Option<String>,
    #[serde(rename = "override")]
    override_flag: Option<String>,
    /// `rename=true` picks a free `name(N).ext` instead of overwriting.
    rename: Option<String>,
}

fn flag(v: &Option<String>) -> bool {
    v.as_deref() == Some("true")
}

async fn get_root(State(state): State<AppState>) -> Result<Json<FileInfo>> {
    stat(&state, "/").await
}

async fn get_resource(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
) -> Result<Json<FileInfo>> {
    stat(&state, &path).await
}

async fn stat(state: &AppState, raw_path: &str) -> Result<Json<FileInfo>> {
    let vpath = fsutil::clean(raw_path);
    if !state.checker().check(&vpath) {
        return Err(AppError::PermissionDenied);
    }

    let info = FileInfo::stat(state.root(), &vpath, true, state.checker().as_ref()).await?;
    Ok(Json(info))
}

/// The virtual root itself cannot be deleted.
async fn delete_root() -> Result<Response> {
    Err(AppError::PermissionDenied)
}

async fn delete_resource(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
) -> Result<Response> {
    if !state.permissions().delete {
        return Err(AppError::PermissionDenied);
    }

    let vpath = fsutil::clean(&path);
    if vpath == "/" {
        return Err(AppError::PermissionDenied);
    }
    if !state.checker().check(&vpath) {
        return Err(AppError::PermissionDenied);
    }

    let host = fsutil::to_host(state.root(), &vpath);
    let meta = tokio::fs::metadata(&host).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AppError::NotFound(vpath.clone()),
        _ => AppError::Storage(e),
    })?;

    if meta.is_dir() {
        tokio::fs::remove_dir_all(&host).await?;
    } else {
        tokio::fs::remove_file(&host).await?;
    }

    tracing::info!(path = %vpath, "Resource deleted");
    Ok(StatusCode::OK.into_response())
}

/// POST/PUT `/api/resources/*path` — directory creation (trailing slash,
/// POST only) or single-shot file write.
async fn write_resource(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
    Query(query): Query<WriteQuery>,
    method: Method,
    request: Request,
) -> Result<Response> {
    let is_put = method == Method::PUT;
    if is_put {
        if !state.permissions().modify {
            return Err(AppError::PermissionDenied);
        }
    } else if !state.permissions().create {
        return Err(AppError::PermissionDenied);
    }

    let vpath = fsutil::clean(&path);
    if !state.checker().check(&vpath) {
        return Err(AppError::PermissionDenied);
    }

    // Trailing slash means "make a directory".
    if path.ends_with('/') {
        if is_put {
            return Ok(StatusCode::METHOD_NOT_ALLOWED.into_response());
        }
        tokio::fs::create_dir_all(fsutil::to_host(state.root(), &vpath)).await?;
        return Ok(StatusCode::OK.into_response());
    }

    let host = fsutil::to_host(state.root(), &vpath);

    // PUT always overwrites; POST needs override for an existing file.
    if !is_put
        && !flag(&query.override_flag)
        && tokio::fs::try_exists(&host).await.unwrap_or(false)
    {
        return Err(AppError::Conflict(vpath));
    }

    if let Some(parent) = host.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if let Err(e) = write_body(&host, request.into_body()).await {
        // No partial destination survives a failed write.
        let _ = tokio::fs::remove_file(&host).await;
        return Err(e);
    }

    let meta = tokio::fs::metadata(&host).await?;
    let mtime_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let etag = format!("\"{:x}{:x}\"", mtime_ns, meta.len());

    tracing::info!(path = %vpath, size = meta.len(), "Resource written");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::ETAG, etag)
        .body(Body::empty())
        .map_err(|e| AppError::Internal(e.to_string()))
}

async fn write_body(host: &std::path::Path, body: Body) -> Result<()> {
    let mut file = tokio::fs::File::create(host).await?;
    let mut stream = body.into_data_stream();

    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| AppError::InvalidInput(format!("body stream failed: {}", e)))?;
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

/// PATCH `/api/resources/*path?action=copy|rename&destination=...`
async fn patch_resource(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
    Query(query): Query<PatchQuery>,
) -> Result<Response> {
    let action = query.action.as_deref().unwrap_or("rename");
    match action {
        "copy" => {
            if !state.permissions().create {
                return Err(AppError::PermissionDenied);
            }
        }
        "rename" => {
            if !state.permissions().rename {
                return Err(AppError::PermissionDenied);
            }
        }
        other => {
            return Err(AppError::InvalidInput(format!("unknown action: {:?}", other)));
        }
    }

    let src = fsutil::clean(&path);
    let raw_dst = query
        .destination
        .as_deref()
        .ok_or_else(|| AppError::InvalidInput("missing destination".to_string()))?;
    let decoded = urlencoding::decode(raw_dst)
        .map_err(|_| AppError::InvalidInput("undecodable destination".to_string()))?;
    let mut dst = fsutil::clean(&decoded);

    if !state.checker().check(&src) || !state.checker().check(&dst) {
        return Err(AppError::PermissionDenied);
    }
    if src == "/" || dst == "/" {
        return Err(AppError::PermissionDenied);
    }

    fsutil::check_parent(&src, &dst)?;

    let dst_exists =
        tokio::fs::try_exists(fsutil::to_host(state.root(), &dst)).await.unwrap_or(false);
    if dst_exists {
        if flag(&query.rename) {
            dst = fsutil::add_version_suffix(state.root(), &dst);
        } else if !flag(&query.override_flag) {
            return Err(AppError::Conflict(dst));
        }
    }

    let src_host = fsutil::to_host(state.root(), &src);
    let dst_host = fsutil::to_host(state.root(), &dst);

    let copy = action == "copy";
    tokio::task::spawn_blocking(move || {
        if copy {
            fsutil::copy_all(&src_host, &dst_host)
        } else {
            fsutil::move_all(&src_host, &dst_host)
        }
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?
    .map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AppError::NotFound(src.clone()),
        _ => AppError::Storage(e),
    })?;

    tracing::info!(action, src = %src, dst = %dst, "Resource patched");
    Ok(StatusCode::OK.into_response())
}
