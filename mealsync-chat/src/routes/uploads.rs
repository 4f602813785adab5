use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use mealsync_shared::errors::{AppError, AppResult, ErrorCode};
use mealsync_shared::types::ApiResponse;

use crate::error::ChatError;
use crate::uploads::{image_extension, MAX_IMAGE_BYTES};
use crate::AppState;

/// Request body limit for `/uploads`: the image plus multipart framing.
pub const BODY_LIMIT: usize = MAX_IMAGE_BYTES + 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
}

fn too_large() -> AppError {
    AppError::new(
        ErrorCode::PayloadTooLarge,
        format!("image exceeds {} MB", MAX_IMAGE_BYTES / (1024 * 1024)),
    )
}

/// Accepts one image in the `file` field; the returned URL becomes a message attachment.
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<ApiResponse<UploadResponse>>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("failed to read multipart: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        if image_extension(&content_type).is_none() {
            return Err(AppError::new(
                ErrorCode::UnsupportedMediaType,
                "unsupported image format, accepted: jpeg, png, webp, gif",
            ));
        }

        let data = field.bytes().await.map_err(|e| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                too_large()
            } else {
                AppError::bad_request(format!("failed to read file: {e}"))
            }
        })?;

        if data.len() > MAX_IMAGE_BYTES {
            return Err(too_large());
        }

        let url = state
            .service
            .upload_image(data.to_vec(), &content_type)
            .await
            .map_err(|e| match e {
                ChatError::Persistence(cause) => {
                    tracing::error!(error = %cause, "image upload failed");
                    AppError::new(ErrorCode::UploadFailed, "image upload failed")
                }
                other => AppError::from(other),
            })?;

        return Ok((StatusCode::CREATED, Json(ApiResponse::ok(UploadResponse { url }))));
    }

    Err(AppError::bad_request("no file provided"))
}
