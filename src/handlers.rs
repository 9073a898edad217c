use actix_multipart::Multipart;
use actix_web::{web, HttpResponse, Result};
use futures_util::StreamExt;
use image::ImageFormat;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::AppError;
use crate::models::{IndexView, OpenResultRequest, SaveResponse, UploadResponse};

/// Collects the uploaded image. With several fields, the last one wins.
async fn read_upload(mut payload: Multipart) -> Result<Vec<u8>, AppError> {
    let mut bytes = Vec::new();

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| AppError::Upload(e.to_string()))?;
        bytes.clear();

        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(|e| AppError::Upload(e.to_string()))?;
            bytes.extend_from_slice(&data);
        }
    }

    if bytes.is_empty() {
        warn!("upload contained no image data");
        return Err(AppError::MissingImage);
    }
    Ok(bytes)
}

async fn store_upload(
    state: &web::Data<AppState>,
    payload: Multipart,
) -> Result<String, AppError> {
    let bytes = read_upload(payload).await?;
    let state = state.clone();
    let reference = web::block(move || state.uploads.save(&bytes)).await??;
    debug!(image = reference.as_str(), "stored upload");
    Ok(reference.as_str().to_string())
}

pub async fn index() -> HttpResponse {
    HttpResponse::Ok().json(IndexView {
        upload: "/images",
        open_result: "/results",
        predict: "/predict",
        history: "/history",
    })
}

pub async fn upload(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let image = store_upload(&state, payload).await?;
    Ok(HttpResponse::Created().json(UploadResponse { image }))
}

/// Upload and classify in one request.
pub async fn predict(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let image = store_upload(&state, payload).await?;
    let view = state
        .results
        .open(&image, &state.uploads, state.classifier.clone())
        .await?;
    Ok(HttpResponse::Ok().json(view))
}

pub async fn open_result(
    state: web::Data<AppState>,
    body: web::Json<OpenResultRequest>,
) -> Result<HttpResponse, AppError> {
    let view = state
        .results
        .open(&body.image, &state.uploads, state.classifier.clone())
        .await?;
    Ok(HttpResponse::Ok().json(view))
}

pub async fn get_result(
    state: web::Data<AppState>,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(state.results.view(id.into_inner())?))
}

/// Leaves a result screen without saving.
pub async fn close_result(
    state: web::Data<AppState>,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    state.results.close(id.into_inner())?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn save_result(
    state: web::Data<AppState>,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let record = state
        .results
        .save(id.into_inner(), state.images.clone(), state.history.clone())
        .await?;

    if let Err(e) = state.notify_history_updated().await {
        warn!(error = %e, "history reload after save failed");
    }

    Ok(HttpResponse::Created().json(SaveResponse {
        record,
        next: "/history",
    }))
}

pub async fn get_history(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let view = state.history_screen.reload(&state.history).await?;
    Ok(HttpResponse::Ok().json(view))
}

pub async fn delete_history(
    state: web::Data<AppState>,
    id: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let view = state
        .history_screen
        .delete(&state.history, &state.images, id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(view))
}

pub async fn history_image(
    state: web::Data<AppState>,
    id: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let id = id.into_inner();
    let lookup = state.clone();
    let bytes = web::block(move || -> Result<Vec<u8>, AppError> {
        let record = lookup
            .history
            .get(id)?
            .ok_or_else(|| AppError::NotFound(format!("prediction {id}")))?;
        let path = lookup.images.resolve(&record.image_path)?;
        Ok(std::fs::read(path).map_err(crate::images::ImageError::from)?)
    })
    .await??;

    Ok(HttpResponse::Ok()
        .content_type(content_type(&bytes))
        .body(bytes))
}

fn content_type(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::WebP) => "image/webp",
        Ok(ImageFormat::Bmp) => "image/bmp",
        _ => "application/octet-stream",
    }
}
