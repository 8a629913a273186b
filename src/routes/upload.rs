//! Resumable upload routes
//!
//! The resumable.js-style protocol: each chunk arrives as one multipart
//! request carrying a `file` field plus `resumable*` query parameters. The
//! request whose chunk number equals the declared total triggers
//! reassembly into the destination path under the virtual root.
//!
//! Endpoints:
//! - GET  /api/upload — resume probe; a hit discards the staging area
//! - POST /api/upload — stage one chunk (create permission)
//! - PUT  /api/upload — stage one chunk (modify permission)

use axum::{
    extract::{Multipart, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::fsutil;
use crate::state::AppState;
use crate::upload::reassemble;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(probe).post(upload_chunk).put(upload_chunk))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ResumableQuery {
    resumable_identifier: Option<String>,
    resumable_chunk_number: Option<u64>,
    resumable_total_chunks: Option<u64>,
    resumable_relative_path: Option<String>,
}

/// Resume probe. 201 when the chunk is already staged (and the staging
/// area is discarded, signalling the client to restart), 404 otherwise.
async fn probe(
    State(state): State<AppState>,
    Query(query): Query<ResumableQuery>,
) -> Result<Response> {
    let id = query
        .resumable_identifier
        .as_deref()
        .ok_or_else(|| AppError::InvalidInput("missing resumableIdentifier".to_string()))?;
    let index = query
        .resumable_chunk_number
        .ok_or_else(|| AppError::InvalidInput("missing resumableChunkNumber".to_string()))?;

    if state.chunk_store().probe_chunk(id, index).await? {
        Ok((StatusCode::CREATED, "chunk already exists").into_response())
    } else {
        Ok(StatusCode::NOT_FOUND.into_response())
    }
}

async fn upload_chunk(
    State(state): State<AppState>,
    Query(query): Query<ResumableQuery>,
    method: Method,
    mut multipart: Multipart,
) -> Result<Response> {
    if method == Method::PUT {
        if !state.permissions().modify {
            return Err(AppError::PermissionDenied);
        }
    } else if !state.permissions().create {
        return Err(AppError::PermissionDenied);
    }

    let id = query
        .resumable_identifier
        .as_deref()
        .ok_or_else(|| AppError::InvalidInput("missing resumableIdentifier".to_string()))?;
    let index = query
        .resumable_chunk_number
        .ok_or_else(|| AppError::InvalidInput("missing resumableChunkNumber".to_string()))?;
    let total = query
        .resumable_total_chunks
        .ok_or_else(|| AppError::InvalidInput("missing resumableTotalChunks".to_string()))?;
    let rel_path = query
        .resumable_relative_path
        .as_deref()
        .ok_or_else(|| AppError::InvalidInput("missing resumableRelativePath".to_string()))?;

    let mut data = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("malformed multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            data = Some(field.bytes().await.map_err(|e| {
                AppError::InvalidInput(format!("malformed multipart body: {}", e))
            })?);
        }
    }
    let data = data
        .ok_or_else(|| AppError::InvalidInput("missing multipart field \"file\"".to_string()))?;

    state.chunk_store().write_chunk(id, index, &data).await?;

    // The final chunk triggers reassembly into the destination.
    if index == total {
        let dest_vpath = fsutil::clean(rel_path);
        if !state.checker().check(&dest_vpath) {
            return Err(AppError::PermissionDenied);
        }

        let dest = fsutil::to_host(state.root(), &dest_vpath);
        let written = reassemble(state.chunk_store(), id, total, &dest).await?;
        tracing::info!(path = %dest_vpath, bytes = written, "Resumable upload complete");
    }

    Ok(StatusCode::OK.into_response())
}
