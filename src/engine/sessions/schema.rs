// Database schema and migrations for the conversation store.
// Called once by SqliteStore::open() after WAL is enabled.
// Adding a new table or column: append an idempotent CREATE TABLE IF NOT EXISTS
// or ALTER TABLE … ADD COLUMN (errors are silently swallowed) at the end of
// run_migrations() — never modify existing SQL to keep upgrade paths clean.

use crate::atoms::error::EngineResult;
use log::info;
use rusqlite::Connection;

pub(crate) fn run_migrations(conn: &Connection) -> EngineResult<()> {
    // ── Core tables ──────────────────────────────────────────────────
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS chat_sessions (
            user_id TEXT PRIMARY KEY,
            profile_complete INTEGER NOT NULL DEFAULT 0,
            current_node TEXT NOT NULL,
            navigation_stack TEXT NOT NULL DEFAULT '[]',
            pending_input TEXT,
            preferred_language TEXT NOT NULL DEFAULT 'en',
            last_activity_at TEXT NOT NULL,
            subscription_tier TEXT NOT NULL DEFAULT 'free',
            profile_json TEXT NOT NULL DEFAULT '{}',
            attributes_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS processed_messages (
            message_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            processed_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_processed_messages_at
            ON processed_messages(processed_at);

        CREATE TABLE IF NOT EXISTS subscriptions (
            user_id TEXT PRIMARY KEY,
            tier TEXT NOT NULL DEFAULT 'free',
            expires_at TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;

    info!("[store] Schema ready");
    Ok(())
}
