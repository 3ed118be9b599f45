//! Credential storage using SQLite.

use super::{CredentialRecord, CredentialStore, CredentialUpdate, StoreError};
use crate::connector::ConnectorKind;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SELECT_COLUMNS: &str = r#"
    SELECT id, identity, connector,
           access_token, refresh_token,
           access_token_expiry, refresh_token_expiry,
           connected, created_at, updated_at
    FROM connector_credentials
"#;

/// Credential storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE connector_credentials (
///     id TEXT PRIMARY KEY,              -- UUID v4
///     identity TEXT NOT NULL,
///     connector TEXT NOT NULL,
///     access_token TEXT,                -- Ciphertext (optional)
///     refresh_token TEXT,               -- Ciphertext (optional)
///     access_token_expiry INTEGER,      -- Epoch seconds (optional)
///     refresh_token_expiry INTEGER,     -- Epoch seconds (optional)
///     connected INTEGER NOT NULL,
///     created_at TEXT NOT NULL,         -- ISO 8601 timestamp
///     updated_at TEXT NOT NULL,         -- ISO 8601 timestamp
///     UNIQUE(identity, connector)
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in Mutex for safe concurrent access
/// - Writes run inside a transaction and roll back on any error
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /// Creates or opens a credential store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`:memory:` for tests)
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS connector_credentials (
                id TEXT PRIMARY KEY,
                identity TEXT NOT NULL,
                connector TEXT NOT NULL,
                access_token TEXT,
                refresh_token TEXT,
                access_token_expiry INTEGER,
                refresh_token_expiry INTEGER,
                connected INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(identity, connector)
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_connector_connected ON connector_credentials(connector, connected)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Lock)
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn find_by_identity(
        &self,
        identity: &str,
        connector: ConnectorKind,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let conn = self.lock()?;
        Ok(select_by_identity(&conn, identity, connector)?)
    }

    fn find_active_by_connector(
        &self,
        connector: ConnectorKind,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE connector = ?1 AND connected = 1 ORDER BY updated_at DESC LIMIT 2",
            SELECT_COLUMNS
        ))?;

        let mut records = stmt
            .query_map(params![connector], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        if records.len() > 1 {
            return Err(StoreError::MultipleActive(connector));
        }

        Ok(records.pop())
    }

    fn upsert(
        &self,
        identity: &str,
        connector: ConnectorKind,
        update: &CredentialUpdate,
    ) -> Result<CredentialRecord, StoreError> {
        let mut conn = self.lock()?;
        // Dropping an uncommitted transaction rolls it back
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            r#"
            INSERT INTO connector_credentials (
                id, identity, connector,
                access_token, access_token_expiry,
                refresh_token, refresh_token_expiry,
                connected, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)
            ON CONFLICT(identity, connector) DO UPDATE SET
                access_token = COALESCE(excluded.access_token, connector_credentials.access_token),
                access_token_expiry = COALESCE(excluded.access_token_expiry, connector_credentials.access_token_expiry),
                refresh_token = COALESCE(excluded.refresh_token, connector_credentials.refresh_token),
                refresh_token_expiry = COALESCE(excluded.refresh_token_expiry, connector_credentials.refresh_token_expiry),
                connected = 1,
                updated_at = excluded.updated_at
            "#,
            params![
                Uuid::new_v4().to_string(),
                identity,
                connector,
                update.access_token,
                update.access_token_expiry,
                update.refresh_token,
                update.refresh_token_expiry,
                now,
            ],
        )?;

        let record = select_by_identity(&tx, identity, connector)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)?;

        tx.commit()?;
        Ok(record)
    }

    fn soft_disconnect(&self, identity: &str, connector: ConnectorKind) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let rows_affected = tx.execute(
            r#"
            UPDATE connector_credentials SET
                access_token = NULL,
                refresh_token = NULL,
                access_token_expiry = NULL,
                refresh_token_expiry = NULL,
                connected = 0,
                updated_at = ?3
            WHERE identity = ?1 AND connector = ?2
            "#,
            params![identity, connector, Utc::now().to_rfc3339()],
        )?;

        tx.commit()?;
        Ok(rows_affected > 0)
    }
}

fn select_by_identity(
    conn: &Connection,
    identity: &str,
    connector: ConnectorKind,
) -> rusqlite::Result<Option<CredentialRecord>> {
    conn.query_row(
        &format!("{} WHERE identity = ?1 AND connector = ?2", SELECT_COLUMNS),
        params![identity, connector],
        record_from_row,
    )
    .optional()
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CredentialRecord> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;

    Ok(CredentialRecord {
        id,
        identity: row.get(1)?,
        connector: row.get(2)?,
        access_token: row.get(3)?,
        refresh_token: row.get(4)?,
        access_token_expiry: row.get(5)?,
        refresh_token_expiry: row.get(6)?,
        connected: row.get(7)?,
        created_at: parse_timestamp(row, 8)?,
        updated_at: parse_timestamp(row, 9)?,
    })
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl ToSql for ConnectorKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ConnectorKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}
