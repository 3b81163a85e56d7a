//! Connection bootstrap for the reminder store.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Apply store pragmas and pending migrations before handing a connection out.
//!
//! # Invariants
//! - Returned connections carry a busy timeout and the latest schema.
//! - File connections run in WAL mode so `remindly add` and the running
//!   scheduler can share one database file.

use super::migrations::apply_migrations;
use super::DbResult;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    File,
    Memory,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Memory => "memory",
        }
    }
}

/// Opens (creating when missing) and migrates a database file.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    bootstrap(Mode::File, || Connection::open(path))
}

/// Opens a private in-memory database with the full schema.
pub fn open_db_in_memory() -> DbResult<Connection> {
    bootstrap(Mode::Memory, Connection::open_in_memory)
}

fn bootstrap(
    mode: Mode,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode_name = mode.as_str();

    let mut conn = open().map_err(|err| {
        error!(
            "event=db_open module=db status=error mode={mode_name} duration_ms={} error_code=db_open_failed error={err}",
            started_at.elapsed().as_millis()
        );
        err
    })?;

    match prepare(&mut conn, mode) {
        Ok(version) => {
            info!(
                "event=db_open module=db status=ok mode={mode_name} schema_version={version} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode_name} duration_ms={} error_code=db_bootstrap_failed error={err}",
                started_at.elapsed().as_millis()
            );
            Err(err)
        }
    }
}

fn prepare(conn: &mut Connection, mode: Mode) -> DbResult<u32> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    if mode == Mode::File {
        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !journal.eq_ignore_ascii_case("wal") {
            info!("event=db_open module=db status=skip reason=wal_unavailable journal_mode={journal}");
        }
    }
    apply_migrations(conn)
}
