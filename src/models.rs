use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::Category;
use crate::history::PredictionRecord;
use crate::screens::result::ResultState;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub image: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OpenResultRequest {
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct ResultView {
    pub id: Uuid,
    pub state: ResultState,
    pub image: String,
    /// Top label and score, e.g. `Benign 97.53%`. Empty when nothing passed the threshold.
    pub result_text: String,
    pub categories: Vec<Category>,
    pub inference_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct SaveResponse {
    pub record: PredictionRecord,
    pub next: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HistoryItem {
    pub id: i64,
    pub image_path: String,
    pub image_url: String,
    pub result: String,
}

impl From<&PredictionRecord> for HistoryItem {
    fn from(record: &PredictionRecord) -> Self {
        HistoryItem {
            id: record.id,
            image_path: record.image_path.clone(),
            image_url: format!("/history/{}/image", record.id),
            result: record.result.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryView {
    pub items: Vec<HistoryItem>,
    pub list_visible: bool,
    pub placeholder: Option<&'static str>,
    pub home: &'static str,
}

#[derive(Debug, Serialize)]
pub struct IndexView {
    pub upload: &'static str,
    pub open_result: &'static str,
    pub predict: &'static str,
    pub history: &'static str,
}
