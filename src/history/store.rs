use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::{NewPrediction, PredictionRecord, StoreError};

const SCHEMA_VERSION: i64 = 1;

/// Handle to the history database.
///
/// Cloning shares the same connection. Build one at startup and hand clones
/// to whoever needs it.
#[derive(Clone)]
pub struct HistoryStore {
    conn: Arc<Mutex<Connection>>,
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(StoreError::SchemaVersion {
            found: version,
            expected: SCHEMA_VERSION,
        });
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS history_prediction (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            imagePath TEXT NOT NULL,
            result TEXT NOT NULL
        )",
        [],
    )?;

    if version < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<PredictionRecord> {
    Ok(PredictionRecord {
        id: row.get(0)?,
        image_path: row.get(1)?,
        result: row.get(2)?,
    })
}

impl HistoryStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        Ok(HistoryStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, prediction: &NewPrediction) -> Result<PredictionRecord, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO history_prediction (imagePath, result) VALUES (?1, ?2)",
            params![prediction.image_path, prediction.result],
        )?;
        let record = PredictionRecord {
            id: conn.last_insert_rowid(),
            image_path: prediction.image_path.clone(),
            result: prediction.result.clone(),
        };
        debug!(id = record.id, "inserted prediction");
        Ok(record)
    }

    /// Inserts `record`, replacing any row with the same id.
    pub fn upsert(&self, record: &PredictionRecord) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO history_prediction (id, imagePath, result) VALUES (?1, ?2, ?3)",
            params![record.id, record.image_path, record.result],
        )?;
        Ok(())
    }

    /// All records in storage order.
    pub fn list_all(&self) -> Result<Vec<PredictionRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, imagePath, result FROM history_prediction")?;
        let records = stmt
            .query_map([], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn get(&self, id: i64) -> Result<Option<PredictionRecord>, StoreError> {
        let record = self
            .conn()
            .query_row(
                "SELECT id, imagePath, result FROM history_prediction WHERE id = ?1",
                params![id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Removes the row matching `record`'s id. Returns false if there was none.
    pub fn delete(&self, record: &PredictionRecord) -> Result<bool, StoreError> {
        self.delete_by_id(record.id)
    }

    pub fn delete_by_id(&self, id: i64) -> Result<bool, StoreError> {
        let removed = self
            .conn()
            .execute("DELETE FROM history_prediction WHERE id = ?1", params![id])?;
        debug!(id, removed, "deleted prediction");
        Ok(removed > 0)
    }
}
