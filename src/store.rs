//! Persisted endpoints and identifiers.
//!
//! The scheduler only reads candidates and writes status transitions; each
//! write is a single UPDATE keyed by identifier id, so concurrent workers
//! never need more than the connection mutex.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::model::{normalize_endpoint, CheckOutcome, Endpoint, Identifier, Status};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Store connection lock poisoned")]
    Poisoned,
    #[error("Unknown identifier id {0}")]
    UnknownIdentifier(i64),
    #[error("Store task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait CredentialStore: Send + Sync {
    fn list_endpoints(&self) -> StoreResult<Vec<Endpoint>>;

    /// Endpoints without any `SUCCESS` identifier.
    fn endpoints_without_success(&self) -> StoreResult<Vec<Endpoint>>;

    /// Identifiers below the failure ceiling, newest expiration first.
    fn list_candidates(&self, endpoint: &Endpoint) -> StoreResult<Vec<Identifier>>;

    /// Most recently added identifier whose last status is `SUCCESS`.
    fn known_good_identifier(&self, endpoint: &Endpoint) -> StoreResult<Option<Identifier>>;

    /// Atomic status transition; bumps the failure counter unless the
    /// status is `SUCCESS` or `SKIPPED`.
    fn record_status(&self, identifier_id: i64, outcome: &CheckOutcome) -> StoreResult<()>;

    /// Returns `false` when the pair was already present.
    fn add_identifier(
        &self,
        endpoint: &str,
        identifier: &str,
        expiration: Option<NaiveDate>,
    ) -> StoreResult<bool>;

    fn identifier(&self, identifier_id: i64) -> StoreResult<Option<Identifier>>;
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS endpoints (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS identifiers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        endpoint_id INTEGER NOT NULL REFERENCES endpoints(id),
        identifier TEXT NOT NULL,
        expiration DATE,
        status TEXT,
        error TEXT,
        region_match BOOLEAN,
        category_match BOOLEAN,
        failed INTEGER NOT NULL DEFAULT 0,
        UNIQUE(endpoint_id, identifier)
    );
";

const IDENTIFIER_COLUMNS: &str = "i.id, i.endpoint_id, i.identifier, i.expiration, i.status, \
     i.error, i.failed, i.region_match, i.category_match";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    max_failed_attempts: u32,
}

impl SqliteStore {
    pub fn open(path: &Path, max_failed_attempts: u32) -> StoreResult<Self> {
        Self::with_connection(Connection::open(path)?, max_failed_attempts)
    }

    pub fn open_in_memory(max_failed_attempts: u32) -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, max_failed_attempts)
    }

    fn with_connection(conn: Connection, max_failed_attempts: u32) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            max_failed_attempts,
        })
    }

    pub fn max_failed_attempts(&self) -> u32 {
        self.max_failed_attempts
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn endpoint_id(conn: &Connection, url: &str) -> StoreResult<Option<i64>> {
        Ok(conn
            .query_row("SELECT id FROM endpoints WHERE url = ?1", [url], |row| row.get(0))
            .optional()?)
    }

    fn read_endpoint(row: &Row<'_>) -> rusqlite::Result<Endpoint> {
        Ok(Endpoint {
            id: row.get(0)?,
            url: row.get(1)?,
        })
    }

    fn read_identifier(row: &Row<'_>) -> rusqlite::Result<Identifier> {
        let status: Option<String> = row.get(4)?;
        let failed: i64 = row.get(6)?;
        Ok(Identifier {
            id: row.get(0)?,
            endpoint_id: row.get(1)?,
            value: row.get(2)?,
            expiration: row.get(3)?,
            status: status.and_then(|s| s.parse().ok()),
            message: row.get(5)?,
            failure_count: failed.max(0) as u32,
            region_match: row.get(7)?,
            category_match: row.get(8)?,
        })
    }
}

impl CredentialStore for SqliteStore {
    fn list_endpoints(&self) -> StoreResult<Vec<Endpoint>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, url FROM endpoints ORDER BY id")?;
        let rows = stmt.query_map([], Self::read_endpoint)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn endpoints_without_success(&self) -> StoreResult<Vec<Endpoint>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT e.id, e.url FROM endpoints e
             LEFT JOIN identifiers i ON i.endpoint_id = e.id AND i.status = ?1
             WHERE i.id IS NULL
             ORDER BY e.id",
        )?;
        let rows = stmt.query_map([Status::Success.as_str()], Self::read_endpoint)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn list_candidates(&self, endpoint: &Endpoint) -> StoreResult<Vec<Identifier>> {
        let conn = self.lock()?;
        // NULL expirations sort last under DESC in SQLite
        let sql = format!(
            "SELECT {IDENTIFIER_COLUMNS} FROM identifiers i
             WHERE i.endpoint_id = ?1 AND i.failed < ?2
             ORDER BY i.expiration DESC, i.id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![endpoint.id, self.max_failed_attempts],
            Self::read_identifier,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn known_good_identifier(&self, endpoint: &Endpoint) -> StoreResult<Option<Identifier>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {IDENTIFIER_COLUMNS} FROM identifiers i
             WHERE i.endpoint_id = ?1 AND i.status = ?2
             ORDER BY i.id DESC LIMIT 1"
        );
        Ok(conn
            .query_row(
                &sql,
                params![endpoint.id, Status::Success.as_str()],
                Self::read_identifier,
            )
            .optional()?)
    }

    fn record_status(&self, identifier_id: i64, outcome: &CheckOutcome) -> StoreResult<()> {
        let conn = self.lock()?;
        let bump: i64 = if outcome.status.counts_as_failure() { 1 } else { 0 };
        let changed = conn.execute(
            "UPDATE identifiers
             SET status = ?1,
                 error = ?2,
                 region_match = COALESCE(?3, region_match),
                 category_match = COALESCE(?4, category_match),
                 failed = failed + ?5
             WHERE id = ?6",
            params![
                outcome.status.as_str(),
                outcome.message,
                outcome.region_match,
                outcome.category_match,
                bump,
                identifier_id
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownIdentifier(identifier_id));
        }
        Ok(())
    }

    fn add_identifier(
        &self,
        endpoint: &str,
        identifier: &str,
        expiration: Option<NaiveDate>,
    ) -> StoreResult<bool> {
        let url = normalize_endpoint(endpoint);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("INSERT OR IGNORE INTO endpoints (url) VALUES (?1)", [&url])?;
        let endpoint_id = match Self::endpoint_id(&tx, &url)? {
            Some(id) => id,
            None => return Err(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows)),
        };
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO identifiers (endpoint_id, identifier, expiration)
             VALUES (?1, ?2, ?3)",
            params![endpoint_id, identifier.trim(), expiration],
        )?;
        tx.commit()?;
        Ok(inserted > 0)
    }

    fn identifier(&self, identifier_id: i64) -> StoreResult<Option<Identifier>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {IDENTIFIER_COLUMNS} FROM identifiers i WHERE i.id = ?1");
        Ok(conn
            .query_row(&sql, [identifier_id], Self::read_identifier)
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_identifier_normalizes_and_dedupes() {
        let store = SqliteStore::open_in_memory(3).unwrap();
        assert!(store.add_identifier("http://p.test/", "00:1A:79:00:00:01", None).unwrap());
        assert!(!store.add_identifier("http://p.test", "00:1A:79:00:00:01", None).unwrap());
        assert!(store.add_identifier("http://p.test", "00:1A:79:00:00:02", None).unwrap());

        let endpoints = store.list_endpoints().unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].url, "http://p.test");
    }

    #[test]
    fn test_record_unknown_identifier_fails() {
        let store = SqliteStore::open_in_memory(3).unwrap();
        let err = store
            .record_status(42, &CheckOutcome::new(Status::Error, "boom"))
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownIdentifier(42)));
    }

    #[test]
    fn test_flags_survive_updates_without_flags() {
        let store = SqliteStore::open_in_memory(3).unwrap();
        store.add_identifier("http://p.test", "AA", None).unwrap();
        let id = store.list_candidates(&store.list_endpoints().unwrap()[0]).unwrap()[0].id;

        store
            .record_status(id, &CheckOutcome::new(Status::Content, "nothing").with_flags(true, false))
            .unwrap();
        store
            .record_status(id, &CheckOutcome::new(Status::Login, "no token"))
            .unwrap();

        let ident = store.identifier(id).unwrap().unwrap();
        assert_eq!(ident.status, Some(Status::Login));
        assert_eq!(ident.message.as_deref(), Some("no token"));
        assert_eq!(ident.region_match, Some(true));
        assert_eq!(ident.category_match, Some(false));
        assert_eq!(ident.failure_count, 2);
    }
}
