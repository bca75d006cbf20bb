//! SQLite datastore shared by all services

use anyhow::{Context, Result, anyhow};
use log::debug;
use rusqlite::Connection;
use std::{
    path::Path,
    sync::{Arc, Mutex},
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS settings (
        id            INTEGER PRIMARY KEY,
        name          TEXT NOT NULL UNIQUE,
        int_value     INTEGER,
        string_value  TEXT
    );

    CREATE TABLE IF NOT EXISTS certificates (
        id             INTEGER PRIMARY KEY,
        name           TEXT NOT NULL,
        description    TEXT,
        serial_number  TEXT NOT NULL,
        status         INTEGER NOT NULL,
        type           INTEGER NOT NULL,
        certificate    TEXT,
        key            TEXT,
        created_on     TEXT,
        revoked_on     TEXT,
        user_id        INTEGER
    );

    CREATE TABLE IF NOT EXISTS notifications (
        id           INTEGER PRIMARY KEY,
        type         INTEGER,
        description  TEXT,
        user_id      INTEGER,
        enabled      INTEGER
    );

    CREATE TABLE IF NOT EXISTS notification_settings (
        id               INTEGER PRIMARY KEY,
        name             TEXT,
        notification_id  INTEGER,
        int_value        INTEGER,
        string_value     TEXT
    );

    CREATE TABLE IF NOT EXISTS users (
        id              INTEGER PRIMARY KEY,
        name            TEXT NOT NULL UNIQUE,
        email           TEXT UNIQUE,
        password        TEXT,
        role_code       INTEGER NOT NULL DEFAULT 2,
        status_code     INTEGER NOT NULL DEFAULT 2,
        activation_key  TEXT,
        avatar          TEXT,
        created_time    TEXT,
        user_detail_id  INTEGER
    );

    CREATE TABLE IF NOT EXISTS user_details (
        id            INTEGER PRIMARY KEY,
        age           INTEGER,
        phone         TEXT,
        url           TEXT,
        deposit       REAL,
        location      TEXT,
        bio           TEXT,
        created_time  TEXT
    );

    CREATE TABLE IF NOT EXISTS zones (
        id           INTEGER PRIMARY KEY,
        zone_id      INTEGER NOT NULL,
        name         TEXT NOT NULL,
        description  TEXT
    );
"#;

/// Handle to the application database
///
/// Cheap to clone, all clones share one connection.
#[derive(Clone)]
pub struct Datastore {
    conn: Arc<Mutex<Connection>>,
}

impl Datastore {
    /// Open (or create) the database file and make sure the schema exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("opening datastore at {path:?}");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("failed to create database directory")?;
        }

        let conn = Connection::open(path).context("failed to open database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("failed to set journal mode")?;

        Self::with_schema(conn)
    }

    /// Create an in-memory datastore (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::with_schema(conn)
    }

    fn with_schema(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("failed to create database schema")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with exclusive access to the connection
    pub fn with_conn<T, E>(&self, f: impl FnOnce(&mut Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<anyhow::Error>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("failed to lock datastore: poisoned"))?;

        f(&mut conn)
    }
}
