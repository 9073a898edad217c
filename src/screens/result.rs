//! The result screen: show a picked image, classify it, and optionally save it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use actix_web::web;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier::{Classification, ImageClassifier};
use crate::error::AppError;
use crate::history::{HistoryStore, NewPrediction, PredictionRecord};
use crate::images::{ImageRef, ImageStore, UploadDir};
use crate::models::ResultView;

/// Open screens kept at once; opening another closes the oldest.
pub const MAX_OPEN_RESULTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultState {
    AwaitingImage,
    Classifying,
    ShowingResult,
    Saving,
    Saved,
}

#[derive(Debug)]
pub struct ResultScreen {
    image: ImageRef,
    state: ResultState,
    classification: Option<Classification>,
    result_text: String,
    /// Registration order among open screens.
    order: u64,
}

impl ResultScreen {
    /// An empty reference means there is nothing to show; the screen never
    /// opens. Only images handed out by `uploads` can be shown.
    pub fn open(image: &str, uploads: &UploadDir) -> Result<Self, AppError> {
        if image.trim().is_empty() {
            warn!("No image URI provided");
            return Err(AppError::MissingImage);
        }
        let image = uploads.resolve(image)?;
        debug!(image = image.as_str(), "displaying image");
        Ok(ResultScreen {
            image,
            state: ResultState::AwaitingImage,
            classification: None,
            result_text: String::new(),
            order: 0,
        })
    }

    pub fn image(&self) -> &ImageRef {
        &self.image
    }

    pub fn state(&self) -> ResultState {
        self.state
    }

    pub fn result_text(&self) -> &str {
        &self.result_text
    }

    pub fn begin_classification(&mut self) {
        self.state = ResultState::Classifying;
    }

    pub fn show(&mut self, classification: Classification) {
        self.result_text = classification
            .top()
            .map(|top| top.display_text())
            .unwrap_or_default();
        self.classification = Some(classification);
        self.state = ResultState::ShowingResult;
    }

    /// Moves to `Saving` and hands back what to persist: the source image and
    /// the text currently on screen.
    pub fn begin_save(&mut self) -> Result<(ImageRef, String), AppError> {
        if self.state != ResultState::ShowingResult || self.result_text.is_empty() {
            error!(state = ?self.state, "Result is empty, cannot save prediction");
            return Err(AppError::NothingToSave);
        }
        self.state = ResultState::Saving;
        Ok((self.image.clone(), self.result_text.clone()))
    }

    pub fn save_failed(&mut self) {
        self.state = ResultState::ShowingResult;
    }

    pub fn saved(&mut self) {
        self.state = ResultState::Saved;
    }

    pub fn view(&self, id: Uuid) -> ResultView {
        let (categories, inference_ms) = match &self.classification {
            Some(c) => (c.categories.clone(), c.inference_time.as_millis() as u64),
            None => (Vec::new(), 0),
        };
        ResultView {
            id,
            state: self.state,
            image: self.image.as_str().to_string(),
            result_text: self.result_text.clone(),
            categories,
            inference_ms,
        }
    }
}

/// Open result screens, keyed by session id.
pub struct ResultScreens {
    sessions: Mutex<HashMap<Uuid, ResultScreen>>,
    capacity: usize,
    next_order: AtomicU64,
}

impl Default for ResultScreens {
    fn default() -> Self {
        Self::with_capacity(MAX_OPEN_RESULTS)
    }
}

impl ResultScreens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ResultScreens {
            sessions: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            next_order: AtomicU64::new(0),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<Uuid, ResultScreen>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a screen for `image` and classifies it on the blocking pool.
    pub async fn open(
        &self,
        image: &str,
        uploads: &UploadDir,
        classifier: Arc<ImageClassifier>,
    ) -> Result<ResultView, AppError> {
        let mut screen = ResultScreen::open(image, uploads)?;
        screen.begin_classification();

        let source = screen.image().clone();
        let classification = web::block(move || -> Result<Classification, AppError> {
            let bytes = source.read()?;
            Ok(classifier.classify(&bytes)?)
        })
        .await?
        .map_err(|e| {
            error!(error = %e, "classification failed");
            e
        })?;
        screen.show(classification);
        screen.order = self.next_order.fetch_add(1, Ordering::Relaxed);

        let id = Uuid::new_v4();
        let view = screen.view(id);
        let mut sessions = self.sessions();
        while sessions.len() >= self.capacity {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, screen)| screen.order)
                .map(|(id, _)| *id);
            match oldest {
                Some(oldest) => {
                    debug!(id = %oldest, "closing oldest result screen");
                    sessions.remove(&oldest);
                }
                None => break,
            }
        }
        sessions.insert(id, screen);
        Ok(view)
    }

    /// Leaves the screen without saving.
    pub fn close(&self, id: Uuid) -> Result<(), AppError> {
        match self.sessions().remove(&id) {
            Some(_) => {
                debug!(id = %id, "closed result screen");
                Ok(())
            }
            None => Err(AppError::NotFound(format!("result screen {id}"))),
        }
    }

    pub fn view(&self, id: Uuid) -> Result<ResultView, AppError> {
        self.sessions()
            .get(&id)
            .map(|screen| screen.view(id))
            .ok_or_else(|| AppError::NotFound(format!("result screen {id}")))
    }

    /// Copies the image into `images`, records the displayed text in
    /// `history`, and closes the screen. On failure the screen stays open
    /// showing its result and no record exists.
    pub async fn save(
        &self,
        id: Uuid,
        images: ImageStore,
        history: HistoryStore,
    ) -> Result<PredictionRecord, AppError> {
        let (source, result) = {
            let mut sessions = self.sessions();
            let screen = sessions
                .get_mut(&id)
                .ok_or_else(|| AppError::NotFound(format!("result screen {id}")))?;
            screen.begin_save()?
        };

        let outcome = web::block(move || persist(&images, &history, &source, result))
            .await
            .map_err(AppError::from)
            .and_then(|r| r);

        let mut sessions = self.sessions();
        match outcome {
            Ok(record) => {
                info!(id = record.id, result = %record.result, "prediction saved");
                if let Some(mut screen) = sessions.remove(&id) {
                    screen.saved();
                }
                Ok(record)
            }
            Err(e) => {
                error!(error = %e, "failed to save prediction");
                if let Some(screen) = sessions.get_mut(&id) {
                    screen.save_failed();
                }
                Err(e)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn persist(
    images: &ImageStore,
    history: &HistoryStore,
    source: &ImageRef,
    result: String,
) -> Result<PredictionRecord, AppError> {
    let image_path = images.save_copy(source)?;
    let prediction = NewPrediction {
        image_path: image_path.clone(),
        result,
    };
    match history.insert(&prediction) {
        Ok(record) => Ok(record),
        Err(e) => {
            if let Err(cleanup) = images.remove(&image_path) {
                warn!(error = %cleanup, "could not remove orphaned image copy");
            }
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::testing::{png_bytes, FlakyLoader};
    use crate::classifier::{Category, ClassifierOptions, RawScores};
    use crate::images::{file_uri, ImageError};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn benign() -> Classification {
        Classification {
            categories: vec![Category {
                index: 0,
                label: "Benign".to_string(),
                score: 0.9753,
            }],
            inference_time: Duration::from_millis(12),
        }
    }

    fn classifier(scores: Vec<f32>) -> Arc<ImageClassifier> {
        Arc::new(ImageClassifier::new(
            ClassifierOptions::default(),
            FlakyLoader {
                failures: 0,
                scores: RawScores::F32(scores),
                attempts: Arc::new(AtomicUsize::new(0)),
            },
        ))
    }

    #[test]
    fn empty_reference_never_opens() {
        let uploads = UploadDir::new().unwrap();
        assert!(matches!(ResultScreen::open("", &uploads), Err(AppError::MissingImage)));
        assert!(matches!(ResultScreen::open("  ", &uploads), Err(AppError::MissingImage)));
    }

    #[test]
    fn images_outside_the_upload_dir_never_open() {
        let uploads = UploadDir::new().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let picked = elsewhere.path().join("picked.png");
        std::fs::write(&picked, png_bytes(4, 4)).unwrap();

        let err = ResultScreen::open(&file_uri(&picked), &uploads).unwrap_err();
        assert!(matches!(err, AppError::Image(ImageError::InvalidReference(_))));
    }

    #[test]
    fn walks_through_the_states() {
        let uploads = UploadDir::new().unwrap();
        let picked = uploads.save(&png_bytes(4, 4)).unwrap();
        let mut screen = ResultScreen::open(picked.as_str(), &uploads).unwrap();
        assert_eq!(screen.state(), ResultState::AwaitingImage);

        screen.begin_classification();
        assert_eq!(screen.state(), ResultState::Classifying);

        screen.show(benign());
        assert_eq!(screen.state(), ResultState::ShowingResult);
        assert_eq!(screen.result_text(), "Benign 97.53%");

        let (image, text) = screen.begin_save().unwrap();
        assert_eq!(screen.state(), ResultState::Saving);
        assert_eq!(image, picked);
        assert_eq!(text, "Benign 97.53%");

        screen.saved();
        assert_eq!(screen.state(), ResultState::Saved);
    }

    #[test]
    fn cannot_save_before_a_result_or_without_text() {
        let uploads = UploadDir::new().unwrap();
        let picked = uploads.save(&png_bytes(4, 4)).unwrap();
        let mut screen = ResultScreen::open(picked.as_str(), &uploads).unwrap();
        assert!(matches!(screen.begin_save(), Err(AppError::NothingToSave)));

        screen.show(Classification {
            categories: Vec::new(),
            inference_time: Duration::ZERO,
        });
        assert_eq!(screen.result_text(), "");
        assert!(matches!(screen.begin_save(), Err(AppError::NothingToSave)));
    }

    #[actix_web::test]
    async fn save_records_displayed_text_and_closes_the_screen() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadDir::new().unwrap();
        let picked = uploads.save(&png_bytes(10, 10)).unwrap();

        let screens = ResultScreens::new();
        let view = screens
            .open(picked.as_str(), &uploads, classifier(vec![0.9753, 0.0247]))
            .await
            .unwrap();
        assert_eq!(view.result_text, "Benign 97.53%");
        assert_eq!(screens.len(), 1);

        let images = ImageStore::open(dir.path().join("images")).unwrap();
        let history = HistoryStore::open_in_memory().unwrap();
        let record = screens
            .save(view.id, images.clone(), history.clone())
            .await
            .unwrap();

        assert_eq!(record.result, view.result_text);
        assert_ne!(record.image_path, view.image);
        assert!(images.resolve(&record.image_path).unwrap().exists());
        assert_eq!(history.list_all().unwrap(), vec![record]);
        assert!(screens.is_empty());
    }

    #[actix_web::test]
    async fn failed_copy_leaves_no_record_and_keeps_the_screen() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadDir::new().unwrap();
        let picked = uploads.save(&png_bytes(10, 10)).unwrap();

        let screens = ResultScreens::new();
        let view = screens
            .open(picked.as_str(), &uploads, classifier(vec![0.2, 0.8]))
            .await
            .unwrap();

        std::fs::remove_file(picked.path()).unwrap();
        let images = ImageStore::open(dir.path().join("images")).unwrap();
        let history = HistoryStore::open_in_memory().unwrap();
        let err = screens.save(view.id, images, history.clone()).await;

        assert!(err.is_err());
        assert!(history.list_all().unwrap().is_empty());
        assert_eq!(screens.view(view.id).unwrap().state, ResultState::ShowingResult);
    }

    #[actix_web::test]
    async fn missing_upload_is_a_bad_reference() {
        let uploads = UploadDir::new().unwrap();
        let picked = uploads.save(&png_bytes(4, 4)).unwrap();
        std::fs::remove_file(picked.path()).unwrap();

        let err = ResultScreens::new()
            .open(picked.as_str(), &uploads, classifier(vec![0.9, 0.1]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Image(ImageError::InvalidReference(_))));
    }

    #[actix_web::test]
    async fn closing_without_saving_forgets_the_screen() {
        let uploads = UploadDir::new().unwrap();
        let picked = uploads.save(&png_bytes(4, 4)).unwrap();
        let screens = ResultScreens::new();

        let view = screens
            .open(picked.as_str(), &uploads, classifier(vec![0.9, 0.1]))
            .await
            .unwrap();
        screens.close(view.id).unwrap();

        assert!(screens.is_empty());
        assert!(matches!(screens.close(view.id), Err(AppError::NotFound(_))));
    }

    #[actix_web::test]
    async fn opening_past_capacity_closes_the_oldest() {
        let uploads = UploadDir::new().unwrap();
        let picked = uploads.save(&png_bytes(4, 4)).unwrap();
        let screens = ResultScreens::with_capacity(2);
        let classifier = classifier(vec![0.9, 0.1]);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let view = screens
                .open(picked.as_str(), &uploads, Arc::clone(&classifier))
                .await
                .unwrap();
            ids.push(view.id);
        }

        assert_eq!(screens.len(), 2);
        assert!(matches!(screens.view(ids[0]), Err(AppError::NotFound(_))));
        assert!(screens.view(ids[1]).is_ok());
        assert!(screens.view(ids[2]).is_ok());
    }
}
