//! Saved classification results.
//!
//! One SQLite table, `history_prediction`, holds every record a user chose
//! to save. Records are never updated: they are inserted, listed, or deleted.

pub mod store;

use serde::Serialize;
use thiserror::Error;

pub use store::HistoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("could not prepare database location: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported schema version {found}, expected {expected}")]
    SchemaVersion { found: i64, expected: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PredictionRecord {
    pub id: i64,
    /// `file://` URI of the private copy of the classified image.
    pub image_path: String,
    pub result: String,
}

/// A record before the database assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPrediction {
    pub image_path: String,
    pub result: String,
}
