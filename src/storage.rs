use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};

use crate::alert::{AlertLevel, DetectionEvent};
use crate::config::StorageSettings;
use crate::detect::Detection;
use crate::error::PersistError;
use crate::export::format_timestamp;

/// Durable destination for detection events.
///
/// Called only from the persistence worker, never on the capture or inference path.
pub trait PersistenceSink: Send {
    fn describe(&self) -> String;

    /// Stores one record and returns its row id.
    fn persist(&mut self, record: &DetectionRecord) -> Result<i64, PersistError>;
}

/// Row-shaped view of a `DetectionEvent` plus the still written for it, if any.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionRecord {
    pub timestamp: DateTime<Utc>,
    pub weapon_count: usize,
    pub alert_level: AlertLevel,
    pub detection_types: Vec<String>,
    pub image_path: Option<String>,
    pub detections: Vec<Detection>,
}

impl DetectionRecord {
    pub fn from_event(event: &DetectionEvent, image_path: Option<String>) -> Self {
        Self {
            timestamp: event.timestamp(),
            weapon_count: event.weapon_count(),
            alert_level: event.level(),
            detection_types: event.detection_types().to_vec(),
            image_path,
            detections: event.detections().to_vec(),
        }
    }

    fn timestamp_text(&self) -> String {
        format_timestamp(self.timestamp)
    }

    fn detection_types_text(&self) -> Option<String> {
        if self.detection_types.is_empty() {
            None
        } else {
            Some(self.detection_types.join(", "))
        }
    }

    fn metadata_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string(&self.detections)?)
    }
}

/// A row read back from `weapon_detections`.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredDetection {
    pub id: i64,
    pub timestamp: String,
    pub weapon_count: i64,
    pub alert_level: String,
    pub detection_types: Option<String>,
    pub image_path: Option<String>,
    pub metadata: Option<String>,
}

impl StoredDetection {
    pub fn detections(&self) -> Result<Vec<Detection>, PersistError> {
        match self.metadata.as_deref() {
            Some(raw) => Ok(serde_json::from_str(raw)?),
            None => Ok(Vec::new()),
        }
    }
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection, PersistError> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

/// Opens the sink the storage settings describe.
pub fn open_sink(settings: &StorageSettings) -> Result<Box<dyn PersistenceSink>, PersistError> {
    match settings.db_path.as_deref() {
        Some(path) => Ok(Box::new(SqliteDetectionStore::open(path)?)),
        None => Ok(Box::new(InMemoryDetectionStore::default())),
    }
}

pub struct SqliteDetectionStore {
    conn: Connection,
    path: String,
}

impl SqliteDetectionStore {
    pub fn open(db_path: &str) -> Result<Self, PersistError> {
        let conn = open_db_connection(db_path)?;
        let mut store = Self {
            conn,
            path: db_path.to_string(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<(), PersistError> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS weapon_detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
              weapon_count INTEGER NOT NULL,
              alert_level TEXT NOT NULL
                CHECK (alert_level IN ('high', 'medium', 'low', 'safe')),
              detection_types TEXT,
              image_path TEXT,
              metadata TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_detections_timestamp ON weapon_detections(timestamp);
            "#,
        )?;
        Ok(())
    }

    /// All rows, oldest first.
    pub fn load_all(&self) -> Result<Vec<StoredDetection>, PersistError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, timestamp, weapon_count, alert_level, detection_types, image_path, metadata
            FROM weapon_detections ORDER BY id ASC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredDetection {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                weapon_count: row.get(2)?,
                alert_level: row.get(3)?,
                detection_types: row.get(4)?,
                image_path: row.get(5)?,
                metadata: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<i64, PersistError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM weapon_detections", [], |row| row.get(0))?)
    }
}

impl PersistenceSink for SqliteDetectionStore {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.path)
    }

    fn persist(&mut self, record: &DetectionRecord) -> Result<i64, PersistError> {
        let weapon_count = i64::try_from(record.weapon_count)
            .map_err(|_| PersistError::Unavailable("weapon count exceeds i64 range".into()))?;
        self.conn.execute(
            r#"
            INSERT INTO weapon_detections(timestamp, weapon_count, alert_level, detection_types, image_path, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.timestamp_text(),
                weapon_count,
                record.alert_level.as_str(),
                record.detection_types_text(),
                record.image_path,
                record.metadata_json()?,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

/// Sink used when no database is configured and by tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDetectionStore {
    rows: Vec<StoredDetection>,
}

impl InMemoryDetectionStore {
    pub fn rows(&self) -> &[StoredDetection] {
        &self.rows
    }
}

impl PersistenceSink for InMemoryDetectionStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn persist(&mut self, record: &DetectionRecord) -> Result<i64, PersistError> {
        let id = self.rows.len() as i64 + 1;
        self.rows.push(StoredDetection {
            id,
            timestamp: record.timestamp_text(),
            weapon_count: record.weapon_count as i64,
            alert_level: record.alert_level.as_str().to_string(),
            detection_types: record.detection_types_text(),
            image_path: record.image_path.clone(),
            metadata: Some(record.metadata_json()?),
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertClassifier;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn event(classes: &[(&str, f32)]) -> DetectionEvent {
        let detections = classes
            .iter()
            .enumerate()
            .map(|(i, (name, conf))| {
                Detection::new([0, 0, 20 + i as u32, 20], *conf, i as u32, *name).unwrap()
            })
            .collect();
        AlertClassifier::default()
            .build_event(Utc.timestamp_opt(1_700_000_000, 0).unwrap(), detections)
            .unwrap()
    }

    #[test]
    fn sqlite_store_persists_rows_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("detections.db");
        let mut store = SqliteDetectionStore::open(path.to_str().unwrap()).unwrap();

        let first = DetectionRecord::from_event(&event(&[("knife", 0.7)]), None);
        let second = DetectionRecord::from_event(
            &event(&[("gun", 0.9), ("knife", 0.6)]),
            Some("captures/alert.jpg".to_string()),
        );
        let id1 = store.persist(&first).unwrap();
        let id2 = store.persist(&second).unwrap();
        assert!(id2 > id1);

        let rows = store.load_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].alert_level, "medium");
        assert_eq!(rows[1].alert_level, "high");
        assert_eq!(rows[1].weapon_count, 2);
        assert_eq!(rows[1].detection_types.as_deref(), Some("gun, knife"));
        assert_eq!(rows[1].image_path.as_deref(), Some("captures/alert.jpg"));
        assert_eq!(rows[1].detections().unwrap(), second.detections);
        assert_eq!(rows[0].timestamp, "2023-11-14T22:13:20.000000000Z");
    }

    #[test]
    fn sqlite_schema_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("detections.db");
        let path = path.to_str().unwrap();
        {
            let mut store = SqliteDetectionStore::open(path).unwrap();
            store
                .persist(&DetectionRecord::from_event(&event(&[("gun", 0.9)]), None))
                .unwrap();
        }
        let store = SqliteDetectionStore::open(path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn sqlite_rejects_unknown_alert_level() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("detections.db");
        let store = SqliteDetectionStore::open(path.to_str().unwrap()).unwrap();
        let err = store.conn.execute(
            "INSERT INTO weapon_detections(weapon_count, alert_level) VALUES (1, 'critical')",
            [],
        );
        assert!(err.is_err());
    }

    #[test]
    fn in_memory_store_assigns_sequential_ids() {
        let mut store = InMemoryDetectionStore::default();
        let record = DetectionRecord::from_event(&event(&[("gun", 0.9)]), None);
        assert_eq!(store.persist(&record).unwrap(), 1);
        assert_eq!(store.persist(&record).unwrap(), 2);
        assert_eq!(store.rows()[0].alert_level, "high");
    }
}
