use std::sync::Arc;

use actix_cors::Cors;
use actix_web::web;
use tracing::info;

use crate::classifier::{ImageClassifier, TractLoader};
use crate::config::{Config, ConfigError};
use crate::error::AppError;
use crate::handlers;
use crate::history::{HistoryStore, StoreError};
use crate::images::{ImageError, ImageStore, UploadDir};
use crate::screens::{HistoryScreen, ResultScreens};

/// Everything the routes share. Built once at startup.
pub struct AppState {
    pub classifier: Arc<ImageClassifier>,
    pub history: HistoryStore,
    pub images: ImageStore,
    pub uploads: UploadDir,
    pub results: ResultScreens,
    pub history_screen: HistoryScreen,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Image(#[from] ImageError),
}

impl AppState {
    pub fn new(
        classifier: ImageClassifier,
        history: HistoryStore,
        images: ImageStore,
        uploads: UploadDir,
    ) -> Self {
        AppState {
            classifier: Arc::new(classifier),
            history,
            images,
            uploads,
            results: ResultScreens::new(),
            history_screen: HistoryScreen::new(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        let database = config.database_path()?;
        let history = HistoryStore::open(&database)?;
        let images = ImageStore::open(config.images_dir()?)?;
        let uploads = UploadDir::new()?;
        info!(
            database = %database.display(),
            images = %images.root().display(),
            uploads = %uploads.path().display(),
            "storage ready"
        );

        let classifier = ImageClassifier::new(config.classifier.clone(), TractLoader);
        Ok(AppState::new(classifier, history, images, uploads))
    }

    /// Result screens call this after a save so the history screen re-reads the store.
    pub async fn notify_history_updated(&self) -> Result<(), AppError> {
        self.history_screen.reload(&self.history).await.map(|_| ())
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(handlers::index)))
        .service(web::resource("/images").route(web::post().to(handlers::upload)))
        .service(web::resource("/predict").route(web::post().to(handlers::predict)))
        .service(web::resource("/results").route(web::post().to(handlers::open_result)))
        .service(
            web::resource("/results/{id}")
                .route(web::get().to(handlers::get_result))
                .route(web::delete().to(handlers::close_result)),
        )
        .service(
            web::resource("/results/{id}/save").route(web::post().to(handlers::save_result)),
        )
        .service(web::resource("/history").route(web::get().to(handlers::get_history)))
        .service(
            web::resource("/history/{id}").route(web::delete().to(handlers::delete_history)),
        )
        .service(
            web::resource("/history/{id}/image").route(web::get().to(handlers::history_image)),
        );
}

/// Browser access is limited to the configured origins. Requests without an
/// `Origin` header are unaffected.
pub fn cors(allowed_origins: &[String]) -> Cors {
    allowed_origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allow_any_method()
        .allow_any_header()
}
