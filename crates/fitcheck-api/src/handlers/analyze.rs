//! Workout video upload and analysis.

use axum::extract::{Multipart, State};
use axum::Json;
use fitcheck_models::{AnalysisRequest, MediaType, StructuredAnalysis};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Multipart field carrying the video.
pub const VIDEO_FIELD: &str = "video";

/// A validated upload, before any pipeline work.
#[derive(Debug)]
struct Upload {
    filename: Option<String>,
    media_type: MediaType,
    data: Vec<u8>,
}

/// POST /analyze
///
/// Accepts a multipart form with a required `video` field. Returns the
/// reconciled workout analysis, or an `{error, kind}` document.
pub async fn analyze_video(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<StructuredAnalysis>> {
    let upload = read_upload(multipart, state.config.max_upload_size).await?;

    info!(
        filename = upload.filename.as_deref().unwrap_or("-"),
        media_type = %upload.media_type,
        bytes = upload.data.len(),
        "Received workout video"
    );

    let mut request = AnalysisRequest::new(upload.data, upload.media_type);
    if let Some(filename) = upload.filename {
        request = request.with_filename(filename);
    }

    let analysis = state
        .orchestrator
        .run(request)
        .await
        .map_err(|e| ApiError::from(e).redact_internal(state.config.is_production()))?;
    Ok(Json(analysis))
}

async fn read_upload(mut multipart: Multipart, max_size: usize) -> ApiResult<Upload> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::invalid_input(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some(VIDEO_FIELD) {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        let media_type = MediaType::resolve(filename.as_deref(), field.content_type())?;
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::invalid_input(format!("Failed to read upload: {}", e)))?;

        if data.is_empty() {
            return Err(ApiError::invalid_input("Uploaded video is empty"));
        }
        if data.len() > max_size {
            return Err(ApiError::invalid_input(format!(
                "Uploaded video exceeds {} bytes",
                max_size
            )));
        }

        return Ok(Upload {
            filename,
            media_type,
            data: data.to_vec(),
        });
    }

    Err(ApiError::invalid_input(format!(
        "Missing required '{}' field",
        VIDEO_FIELD
    )))
}
