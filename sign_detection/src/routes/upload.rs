use crate::{
    inference_service::InferenceError, routes::UPLOAD_ROUTE, server::SharedState,
};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::instrument;

const FILE_FIELD: &str = "file";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No file uploaded")]
    MissingFile,
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Failed to read upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Processing failed: {0}")]
    Processing(InferenceError),
    #[error("Processing task failed: {0}")]
    Task(#[from] JoinError),
}

impl From<InferenceError> for UploadError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::Decode(reason) => UploadError::InvalidImage(reason),
            other => UploadError::Processing(other),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            UploadError::MissingFile | UploadError::InvalidImage(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            UploadError::Multipart(err) => (err.status(), self.to_string()),
            UploadError::Processing(_) | UploadError::Task(_) => {
                tracing::error!("Upload failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct UploadResponse {
    pub processed_image_url: String,
    pub detected_labels: Vec<String>,
}

async fn read_file_field(multipart: &mut Multipart) -> Result<Vec<u8>, UploadError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FILE_FIELD) {
            let data = field.bytes().await?;
            return Ok(data.to_vec());
        }
    }
    Err(UploadError::MissingFile)
}

#[instrument(skip(state, multipart))]
pub async fn upload(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, UploadError> {
    state.metrics.record_request(UPLOAD_ROUTE);

    let mut multipart = multipart.map_err(|rejection| {
        tracing::debug!("Request is not multipart: {}", rejection);
        UploadError::MissingFile
    })?;
    let image_data = read_file_field(&mut multipart).await?;
    tracing::debug!("Received upload of {} bytes", image_data.len());

    let start = Instant::now();
    let service = state.inference_service.clone();
    let processed =
        tokio::task::spawn_blocking(move || service.handle_upload(&image_data)).await??;
    state
        .metrics
        .record_inference_duration(start.elapsed().as_millis() as u64, UPLOAD_ROUTE);
    state.metrics.record_detected_labels(&processed.labels);

    Ok(Json(UploadResponse {
        processed_image_url: processed.image_url,
        detected_labels: processed.labels,
    }))
}
