use actix_web::error::BlockingError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::classifier::ClassifierError;
use crate::history::StoreError;
use crate::images::ImageError;
use crate::models::ErrorBody;

/// Errors surfaced by the HTTP layer. Every lower layer rolls up into this.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("No image URI provided")]
    MissingImage,

    #[error("Result is empty, cannot save prediction")]
    NothingToSave,

    #[error("{0} not found")]
    NotFound(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("background task was cancelled")]
    Blocking,

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Image(#[from] ImageError),
}

impl From<BlockingError> for AppError {
    fn from(_: BlockingError) -> Self {
        AppError::Blocking
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingImage | AppError::Upload(_) => StatusCode::BAD_REQUEST,
            AppError::NothingToSave => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Classifier(ClassifierError::Decode(_)) => StatusCode::BAD_REQUEST,
            AppError::Classifier(ClassifierError::ModelLoad { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Image(ImageError::InvalidReference(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}
