// Astro Engine — Session Store
// Durable per-user conversation state in SQLite via rusqlite.
//
// Module layout:
//   schema        — idempotent table creation
//   sessions      — chat_sessions row CRUD, processed-message ledger, SessionBackend impl
//   subscriptions — subscription ledger, PaymentGateway impl
//   locks         — per-user async mutex map
//   lease         — SessionStore / SessionLease (the only way handlers touch state)

use crate::atoms::error::EngineResult;
use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

mod lease;
mod locks;
mod schema;
#[allow(clippy::module_inception)]
mod sessions;
mod subscriptions;

// ── Re-exports ──────────────────────────────────────────────────────────────

pub use lease::{SessionLease, SessionStore};
pub use locks::UserLocks;

/// Thread-safe database wrapper.
pub struct SqliteStore {
    /// The SQLite connection, protected by a Mutex.
    /// `pub` for tests that need to reach under the API.
    pub conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and initialize tables.
    pub fn open(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!("[store] Opening session store at {:?}", path);

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        schema::run_migrations(&conn)?;

        Ok(SqliteStore { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(SqliteStore { conn: Mutex::new(conn) })
    }
}
