//! Session bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Apply `SessionConfig` pragmas before handing out a session.
//!
//! # Invariants
//! - Schema is not touched here; migrations are an explicit engine call.

use super::{DbError, DbResult, Session};
use crate::config::SessionConfig;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Opens a SQLite database file as a new session.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_session(path: impl AsRef<Path>, config: &SessionConfig) -> DbResult<Session> {
    open_with("file", config, || Connection::open(path))
}

/// Opens a private in-memory database as a new session.
///
/// Every in-memory session is a separate database.
pub fn open_session_in_memory(config: &SessionConfig) -> DbResult<Session> {
    open_with("memory", config, Connection::open_in_memory)
}

fn open_with(
    mode: &'static str,
    config: &SessionConfig,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Session> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let conn = open().map_err(|err| {
        error!(
            "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
            started_at.elapsed().as_millis(),
            err
        );
        DbError::Open(err)
    })?;

    if let Err(err) = configure_connection(&conn, config) {
        error!(
            "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={}",
            started_at.elapsed().as_millis(),
            err
        );
        return Err(DbError::Bootstrap(err));
    }

    info!(
        "event=db_open module=db status=ok mode={mode} duration_ms={} foreign_keys={}",
        started_at.elapsed().as_millis(),
        config.foreign_keys
    );
    Ok(Session::new(conn))
}

fn configure_connection(conn: &Connection, config: &SessionConfig) -> rusqlite::Result<()> {
    let foreign_keys = if config.foreign_keys { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};"))?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    Ok(())
}
