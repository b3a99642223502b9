use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Row};

use super::Database;
use crate::error::{AppError, Result};
use crate::models::comparison::{Classification, ComparisonRecord, NewComparison};

/// Append-only history of completed comparisons.
#[derive(Clone, Debug)]
pub struct ComparisonLedger {
    db: Database,
}

impl ComparisonLedger {
    /// Creates a ledger over the given database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist one comparison in a single INSERT and return its id.
    pub fn record(&self, entry: &NewComparison) -> Result<i64> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO comparisons
             (image1_name, image1_blob, image2_name, image2_blob, similarity, result, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.image1.name,
                entry.image1.bytes.as_ref(),
                entry.image2.name,
                entry.image2.bytes.as_ref(),
                f64::from(entry.similarity),
                entry.classification.as_str(),
                timestamp,
            ],
        )?;
        let id = conn.last_insert_rowid();
        log::debug!(
            "Recorded comparison {} ({} vs {}): {:.4} {}",
            id,
            entry.image1.name,
            entry.image2.name,
            entry.similarity,
            entry.classification
        );
        Ok(id)
    }

    /// All stored comparisons in insertion order.
    pub fn list_all(&self) -> Result<Vec<ComparisonRecord>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, image1_name, image1_blob, image2_name, image2_blob, similarity, result, timestamp
             FROM comparisons ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], RawRow::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    /// Number of stored comparisons.
    pub fn count(&self) -> Result<usize> {
        let conn = self.db.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM comparisons", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

struct RawRow {
    id: i64,
    image1_name: String,
    image1_bytes: Vec<u8>,
    image2_name: String,
    image2_bytes: Vec<u8>,
    similarity: f64,
    result: String,
    timestamp: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            image1_name: row.get(1)?,
            image1_bytes: row.get(2)?,
            image2_name: row.get(3)?,
            image2_bytes: row.get(4)?,
            similarity: row.get(5)?,
            result: row.get(6)?,
            timestamp: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<ComparisonRecord> {
        let classification = self
            .result
            .parse::<Classification>()
            .map_err(|e| AppError::StorageUnavailable(format!("corrupt row {}: {}", self.id, e)))?;
        let created_at = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| AppError::StorageUnavailable(format!("corrupt row {}: {}", self.id, e)))?
            .with_timezone(&Utc);

        Ok(ComparisonRecord {
            id: self.id,
            image1_name: self.image1_name,
            image1_bytes: self.image1_bytes,
            image2_name: self.image2_name,
            image2_bytes: self.image2_bytes,
            similarity: self.similarity as f32,
            classification,
            created_at,
        })
    }
}
