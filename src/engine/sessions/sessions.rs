use super::SqliteStore;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::SessionBackend;
use crate::atoms::types::{BirthProfile, NodeId, Session, SubscriptionTier};
use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;

/// Raw `chat_sessions` row before JSON / timestamp decoding.
struct SessionRow {
    user_id: String,
    profile_complete: bool,
    current_node: String,
    navigation_stack: String,
    pending_input: Option<String>,
    preferred_language: String,
    last_activity_at: String,
    subscription_tier: String,
    profile_json: String,
    attributes_json: String,
    created_at: String,
}

fn parse_ts(field: &str, raw: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| EngineError::Store(format!("bad {} '{}': {}", field, raw, e)))
}

impl SessionRow {
    fn into_session(self) -> EngineResult<Session> {
        let navigation_stack: Vec<NodeId> = serde_json::from_str(&self.navigation_stack)?;
        let profile: BirthProfile = serde_json::from_str(&self.profile_json)?;
        let attributes: BTreeMap<String, String> = serde_json::from_str(&self.attributes_json)?;
        let subscription_tier = SubscriptionTier::parse(&self.subscription_tier).ok_or_else(|| {
            EngineError::Store(format!("unknown tier '{}' for {}", self.subscription_tier, self.user_id))
        })?;
        Ok(Session {
            last_activity_at: parse_ts("last_activity_at", &self.last_activity_at)?,
            created_at: parse_ts("created_at", &self.created_at)?,
            user_id: self.user_id,
            profile_complete: self.profile_complete,
            current_node: self.current_node,
            navigation_stack,
            pending_input: self.pending_input,
            preferred_language: self.preferred_language,
            subscription_tier,
            profile,
            attributes,
        })
    }
}

impl SqliteStore {
    // ── Session CRUD ───────────────────────────────────────────────────

    pub fn get_session(&self, user_id: &str) -> EngineResult<Option<Session>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT user_id, profile_complete, current_node, navigation_stack, pending_input,
                        preferred_language, last_activity_at, subscription_tier, profile_json,
                        attributes_json, created_at
                 FROM chat_sessions WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(SessionRow {
                        user_id: row.get(0)?,
                        profile_complete: row.get::<_, i64>(1)? != 0,
                        current_node: row.get(2)?,
                        navigation_stack: row.get(3)?,
                        pending_input: row.get(4)?,
                        preferred_language: row.get(5)?,
                        last_activity_at: row.get(6)?,
                        subscription_tier: row.get(7)?,
                        profile_json: row.get(8)?,
                        attributes_json: row.get(9)?,
                        created_at: row.get(10)?,
                    })
                },
            )
            .optional()?;
        drop(conn);

        row.map(SessionRow::into_session).transpose()
    }

    /// Upsert the session row and mark `message_id` processed in one transaction.
    pub fn put_session(&self, session: &Session, message_id: Option<&str>) -> EngineResult<()> {
        let stack = serde_json::to_string(&session.navigation_stack)?;
        let profile = serde_json::to_string(&session.profile)?;
        let attributes = serde_json::to_string(&session.attributes)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO chat_sessions (user_id, profile_complete, current_node, navigation_stack,
                 pending_input, preferred_language, last_activity_at, subscription_tier,
                 profile_json, attributes_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, datetime('now'))
             ON CONFLICT(user_id) DO UPDATE SET
                 profile_complete = excluded.profile_complete,
                 current_node = excluded.current_node,
                 navigation_stack = excluded.navigation_stack,
                 pending_input = excluded.pending_input,
                 preferred_language = excluded.preferred_language,
                 last_activity_at = excluded.last_activity_at,
                 subscription_tier = excluded.subscription_tier,
                 profile_json = excluded.profile_json,
                 attributes_json = excluded.attributes_json,
                 updated_at = datetime('now')",
            params![
                session.user_id,
                session.profile_complete as i64,
                session.current_node,
                stack,
                session.pending_input,
                session.preferred_language,
                session.last_activity_at.to_rfc3339(),
                session.subscription_tier.as_str(),
                profile,
                attributes,
                session.created_at.to_rfc3339(),
            ],
        )?;
        if let Some(mid) = message_id {
            tx.execute(
                "INSERT OR IGNORE INTO processed_messages (message_id, user_id) VALUES (?1, ?2)",
                params![mid, session.user_id],
            )?;
        }
        tx.commit()?;

        debug!("[store] Saved session {} at {}", session.user_id, session.current_node);
        Ok(())
    }

    pub fn message_seen(&self, message_id: &str) -> EngineResult<bool> {
        let conn = self.conn.lock();
        let seen: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM processed_messages WHERE message_id = ?1",
                params![message_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(seen.is_some())
    }

    /// Drop processed-message ids older than `max_age_days`.
    /// Returns the number of rows deleted.
    pub fn prune_processed(&self, max_age_days: i64) -> EngineResult<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM processed_messages WHERE processed_at < datetime('now', ?1)",
            params![format!("-{} days", max_age_days)],
        )?;
        if deleted > 0 {
            info!("[store] Pruned {} processed message id(s) older than {}d", deleted, max_age_days);
        }
        Ok(deleted)
    }

    pub fn session_count(&self) -> EngineResult<i64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM chat_sessions", [], |r| r.get(0))?)
    }
}

impl SessionBackend for SqliteStore {
    fn load(&self, user_id: &str) -> EngineResult<Option<Session>> {
        self.get_session(user_id)
    }

    fn save(&self, session: &Session, message_id: Option<&str>) -> EngineResult<()> {
        self.put_session(session, message_id)
    }

    fn is_processed(&self, message_id: &str) -> EngineResult<bool> {
        self.message_seen(message_id)
    }
}
