//! Append-only alert record stores.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection};
use serde::Deserialize;

use super::AlertRecord;
use crate::error::AlertError;

const STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Durable sink for alert records. Records are never updated or deleted.
pub trait AlertStore: Send + Sync {
    fn append(&self, record: &AlertRecord) -> Result<(), AlertError>;
}

/// Firebase Realtime Database REST push: `POST {db}/{path}.json`.
pub struct FirebaseAlertStore {
    agent: ureq::Agent,
    push_url: String,
    auth: Option<String>,
}

#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

impl FirebaseAlertStore {
    pub fn new(database_url: &str, path: &str, auth: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(STORE_TIMEOUT).build();
        let push_url = format!(
            "{}/{}.json",
            database_url.trim_end_matches('/'),
            path.trim_matches('/')
        );
        Self {
            agent,
            push_url,
            auth,
        }
    }

    pub fn push_url(&self) -> &str {
        &self.push_url
    }
}

impl AlertStore for FirebaseAlertStore {
    fn append(&self, record: &AlertRecord) -> Result<(), AlertError> {
        let mut request = self.agent.post(&self.push_url);
        if let Some(auth) = &self.auth {
            request = request.query("auth", auth);
        }
        let response = request.send_json(record).map_err(|err| match err {
            ureq::Error::Status(code, _) => AlertError::Store(format!("status {code}")),
            ureq::Error::Transport(transport) => AlertError::Store(transport.to_string()),
        })?;
        let pushed: PushResponse = response
            .into_json()
            .map_err(|err| AlertError::Store(format!("unexpected response: {err}")))?;
        log::debug!("alert stored under push key {}", pushed.name);
        Ok(())
    }
}

/// Local alert log in SQLite.
pub struct SqliteAlertStore {
    conn: Mutex<Connection>,
}

impl SqliteAlertStore {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> anyhow::Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("alert store lock poisoned"))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS alerts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              status TEXT NOT NULL,
              confidence REAL NOT NULL,
              timestamp TEXT NOT NULL,
              image_url TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AlertError> {
        self.conn
            .lock()
            .map_err(|_| AlertError::Store("alert store lock poisoned".into()))
    }

    pub fn count(&self) -> Result<u64, AlertError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))
            .map_err(|err| AlertError::Store(err.to_string()))?;
        Ok(count as u64)
    }

    /// All records in insertion order.
    pub fn list(&self) -> Result<Vec<AlertRecord>, AlertError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT status, confidence, timestamp, image_url FROM alerts ORDER BY id ASC")
            .map_err(|err| AlertError::Store(err.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|err| AlertError::Store(err.to_string()))?;
        let mut records = Vec::new();
        for row in rows {
            let (status, confidence, timestamp, image_url) =
                row.map_err(|err| AlertError::Store(err.to_string()))?;
            records.push(AlertRecord::new(
                status,
                confidence as f32,
                timestamp,
                image_url,
            )?);
        }
        Ok(records)
    }
}

impl AlertStore for SqliteAlertStore {
    fn append(&self, record: &AlertRecord) -> Result<(), AlertError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO alerts (status, confidence, timestamp, image_url) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.status(),
                record.confidence() as f64,
                record.timestamp(),
                record.image_url()
            ],
        )
        .map_err(|err| AlertError::Store(err.to_string()))?;
        Ok(())
    }
}

/// In-process store for tests.
#[derive(Default)]
pub struct MemoryAlertStore {
    records: Mutex<Vec<AlertRecord>>,
    fail: AtomicBool,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<AlertRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl AlertStore for MemoryAlertStore {
    fn append(&self, record: &AlertRecord) -> Result<(), AlertError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AlertError::Store("memory store set to fail".into()));
        }
        self.records
            .lock()
            .map_err(|_| AlertError::Store("memory store lock poisoned".into()))?
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str) -> AlertRecord {
        AlertRecord::new("Shoplifting", 0.87, "2026-10-19T12:00:00.000Z", url).unwrap()
    }

    #[test]
    fn sqlite_store_appends_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteAlertStore::open(&dir.path().join("alerts.db")).unwrap();
        store.append(&record("https://i.ibb.co/a.jpg")).unwrap();
        store.append(&record("https://i.ibb.co/b.jpg")).unwrap();
        assert_eq!(store.count().unwrap(), 2);
        let records = store.list().unwrap();
        assert_eq!(records[0].image_url(), "https://i.ibb.co/a.jpg");
        assert_eq!(records[1].image_url(), "https://i.ibb.co/b.jpg");
        assert!((records[0].confidence() - 0.87).abs() < 1e-6);
    }

    #[test]
    fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.db");
        SqliteAlertStore::open(&path)
            .unwrap()
            .append(&record("https://i.ibb.co/a.jpg"))
            .unwrap();
        assert_eq!(SqliteAlertStore::open(&path).unwrap().count().unwrap(), 1);
    }

    #[test]
    fn firebase_push_url_is_built_from_database_and_path() {
        let store = FirebaseAlertStore::new("https://demo.firebaseio.com/", "/alerts/", None);
        assert_eq!(store.push_url(), "https://demo.firebaseio.com/alerts.json");
    }

    #[test]
    fn firebase_store_reports_unreachable_database() {
        let store = FirebaseAlertStore::new("http://127.0.0.1:9", "alerts", None);
        assert!(matches!(
            store.append(&record("https://i.ibb.co/a.jpg")),
            Err(AlertError::Store(_))
        ));
    }
}
