use crate::domain::models::CachedFocusSession;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Advisory local record of ended focus sessions. Append and list only.
pub trait FocusSessionCacheRepository: Send + Sync {
    fn append(&self, session: &CachedFocusSession, recorded_at: DateTime<Utc>) -> Result<(), InfraError>;
    fn list_all(&self) -> Result<Vec<CachedFocusSession>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteFocusSessionCache {
    db_path: PathBuf,
}

impl SqliteFocusSessionCache {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl FocusSessionCacheRepository for SqliteFocusSessionCache {
    fn append(&self, session: &CachedFocusSession, recorded_at: DateTime<Utc>) -> Result<(), InfraError> {
        session.validate().map_err(InfraError::InvalidState)?;
        let payload = serde_json::to_string(session)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO focus_session_cache (payload, recorded_at) VALUES (?1, ?2)",
            params![payload, recorded_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<CachedFocusSession>, InfraError> {
        let connection = self.connect()?;
        let mut statement =
            connection.prepare("SELECT payload FROM focus_session_cache ORDER BY id ASC")?;
        let payloads = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        payloads
            .into_iter()
            .map(|payload| serde_json::from_str(&payload).map_err(InfraError::from))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryFocusSessionCache {
    sessions: Mutex<Vec<CachedFocusSession>>,
}

impl FocusSessionCacheRepository for InMemoryFocusSessionCache {
    fn append(&self, session: &CachedFocusSession, _recorded_at: DateTime<Utc>) -> Result<(), InfraError> {
        session.validate().map_err(InfraError::InvalidState)?;
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|error| InfraError::InvalidState(format!("session cache lock poisoned: {error}")))?;
        sessions.push(session.clone());
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<CachedFocusSession>, InfraError> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|error| InfraError::InvalidState(format!("session cache lock poisoned: {error}")))?;
        Ok(sessions.clone())
    }
}
