//! The history screen: every saved prediction, with per-row delete.

use std::sync::{Mutex, MutexGuard, PoisonError};

use actix_web::web;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::history::{HistoryStore, PredictionRecord};
use crate::images::ImageStore;
use crate::models::{HistoryItem, HistoryView};

pub const EMPTY_PLACEHOLDER: &str = "No history found";

/// Rows currently rendered on the history screen.
#[derive(Default)]
pub struct HistoryScreen {
    rows: Mutex<Vec<PredictionRecord>>,
}

impl HistoryScreen {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, Vec<PredictionRecord>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-reads the store and replaces the rendered rows.
    pub async fn reload(&self, store: &HistoryStore) -> Result<HistoryView, AppError> {
        let store = store.clone();
        let predictions = web::block(move || store.list_all()).await??;
        debug!("Number of predictions: {}", predictions.len());

        let mut rows = self.rows();
        *rows = predictions;
        Ok(render(&rows))
    }

    /// Deletes the record with `id`, its image copy, and its row. Deleting
    /// something already gone is not an error.
    pub async fn delete(
        &self,
        store: &HistoryStore,
        images: &ImageStore,
        id: i64,
    ) -> Result<HistoryView, AppError> {
        let row = self.rows().iter().find(|r| r.id == id).cloned();
        let store = store.clone();
        let images = images.clone();
        let removed = web::block(move || {
            let record = match row {
                Some(record) => Some(record),
                None => store.get(id)?,
            };
            let Some(record) = record else {
                return Ok(false);
            };
            let removed = store.delete(&record)?;
            if removed {
                if let Err(e) = images.remove(&record.image_path) {
                    warn!(error = %e, id, "could not remove image copy");
                }
            }
            Ok::<_, AppError>(removed)
        })
        .await??;
        info!(id, removed, "deleted prediction");

        let mut rows = self.rows();
        rows.retain(|r| r.id != id);
        Ok(render(&rows))
    }

    pub fn view(&self) -> HistoryView {
        render(&self.rows())
    }
}

fn render(rows: &[PredictionRecord]) -> HistoryView {
    let empty = rows.is_empty();
    HistoryView {
        items: rows.iter().map(HistoryItem::from).collect(),
        list_visible: !empty,
        placeholder: empty.then_some(EMPTY_PLACEHOLDER),
        home: "/",
    }
}
