//! File endpoints: token-gated chunked upload and single-use download

use crate::auth::Claims;
use crate::ephemeral::TokenKind;
use crate::error::{WebError, WebResult};
use crate::models::FileKind;
use crate::state::AppState;
use crate::uploads::{ChunkOutcome, ChunkRequest};
use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Serialize)]
pub struct UploadUrl {
    pub upload_url: String,
}

#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/files/request-upload",
    responses((status = 200, description = "Upload token minted"))
))]
pub async fn request_upload(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> WebResult<Json<UploadUrl>> {
    let payload = crate::uploads::mint_upload_payload(&claims.sub);
    let token = state
        .ephemeral
        .mint_token(TokenKind::Upload, payload, state.config.upload_token_ttl)
        .await;

    Ok(Json(UploadUrl {
        upload_url: format!("/files/upload/{token}"),
    }))
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
}

#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/files/upload/{token}",
    responses((status = 200, description = "Chunk accepted or file assembled"))
))]
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> WebResult<Json<UploadResponse>> {
    let mut job_id = None;
    let mut file_type = None;
    let mut session_id = None;
    let mut chunk_index = None;
    let mut total_chunks = None;
    let mut bytes = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| WebError::BadRequest(e.to_string()))?
    {
        match field.name().unwrap_or_default() {
            "job_id" => job_id = Some(field.text().await.unwrap_or_default()),
            "file_type" => file_type = Some(field.text().await.unwrap_or_default()),
            "session_id" => session_id = Some(field.text().await.unwrap_or_default()),
            "chunk_index" => {
                chunk_index = field.text().await.ok().and_then(|v| v.parse().ok())
            }
            "total_chunks" => {
                total_chunks = field.text().await.ok().and_then(|v| v.parse().ok())
            }
            "file" => {
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| WebError::BadRequest(e.to_string()))?
                        .to_vec(),
                )
            }
            _ => {}
        }
    }

    let req = ChunkRequest {
        token,
        user_id: claims.sub,
        job_id: job_id.ok_or(WebError::BadRequest("missing job_id".to_string()))?,
        file_type: file_type
            .as_deref()
            .and_then(|s| FileKind::from_str(s).ok())
            .ok_or(WebError::BadRequest("missing or invalid file_type".to_string()))?,
        session_id: session_id.ok_or(WebError::BadRequest("missing session_id".to_string()))?,
        chunk_index: chunk_index.ok_or(WebError::BadRequest("missing chunk_index".to_string()))?,
        total_chunks: total_chunks.ok_or(WebError::BadRequest("missing total_chunks".to_string()))?,
        bytes: bytes.ok_or(WebError::BadRequest("missing file".to_string()))?,
    };

    match state.uploads.accept_chunk(req).await? {
        ChunkOutcome::Waiting => Ok(Json(UploadResponse {
            message: "chunk accepted, waiting for remaining parts".to_string(),
        })),
        ChunkOutcome::Assembled(file) => Ok(Json(UploadResponse {
            message: format!("file assembled: {}", file.id),
        })),
    }
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct RequestDownloadRequest {
    pub file_id: String,
}

#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/files/request-download",
    request_body = RequestDownloadRequest,
    responses((status = 200, description = "Download token minted"))
))]
pub async fn request_download(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RequestDownloadRequest>,
) -> WebResult<Json<UploadUrl>> {
    // Confirm the file exists before handing out a token for it.
    state.uploads.get_file(&req.file_id).await?;

    let payload = crate::ephemeral::TokenPayload {
        user_id: claims.sub,
        file_id: Some(req.file_id),
        ..Default::default()
    };
    let token = state
        .ephemeral
        .mint_token(TokenKind::Download, payload, state.config.download_token_ttl)
        .await;

    Ok(Json(UploadUrl {
        upload_url: format!("/files/download/{token}"),
    }))
}

#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/files/download/{token}",
    responses((status = 200, description = "File bytes"))
))]
pub async fn download(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Extension(claims): Extension<Claims>,
) -> WebResult<Response> {
    let payload = state
        .ephemeral
        .consume_token(TokenKind::Download, &token, &claims.sub)
        .await
        .ok_or(WebError::AuthInvalid)?;

    let file_id = payload
        .file_id
        .ok_or_else(|| WebError::Internal("download token missing file_id".to_string()))?;
    let file = state.uploads.get_file(&file_id).await?;

    let bytes = tokio::fs::read(&file.full_path).await?;

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from(bytes),
    )
        .into_response())
}
