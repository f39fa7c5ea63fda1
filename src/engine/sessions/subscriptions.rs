// Subscription ledger. Written by whatever records payments (out of scope
// here); the engine reads it through the PaymentGateway seam.

use super::SqliteStore;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::PaymentGateway;
use crate::atoms::types::{Subscription, SubscriptionTier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl SqliteStore {
    pub fn upsert_subscription(
        &self,
        user_id: &str,
        tier: SubscriptionTier,
        expires_at: Option<DateTime<Utc>>,
    ) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO subscriptions (user_id, tier, expires_at, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(user_id) DO UPDATE SET
                 tier = excluded.tier,
                 expires_at = excluded.expires_at,
                 updated_at = datetime('now')",
            params![user_id, tier.as_str(), expires_at.map(|t| t.to_rfc3339())],
        )?;
        Ok(())
    }

    /// Stored subscription, or free when the user has none.
    pub fn get_subscription(&self, user_id: &str) -> EngineResult<Subscription> {
        let conn = self.conn.lock();
        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT tier, expires_at FROM subscriptions WHERE user_id = ?1",
                params![user_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        drop(conn);

        let Some((tier, expires_at)) = row else {
            return Ok(Subscription::free());
        };
        let tier = SubscriptionTier::parse(&tier)
            .ok_or_else(|| EngineError::Store(format!("unknown tier '{}' for {}", tier, user_id)))?;
        let expires_at = match expires_at {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| EngineError::Store(format!("bad expires_at '{}': {}", raw, e)))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };
        Ok(Subscription { tier, expires_at })
    }
}

#[async_trait]
impl PaymentGateway for SqliteStore {
    async fn status(&self, user_id: &str) -> EngineResult<Subscription> {
        self.get_subscription(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn unknown_user_is_free() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get_subscription("u").unwrap(), Subscription::free());
    }

    #[tokio::test]
    async fn status_reflects_latest_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();
        let exp = Utc::now() + Duration::days(30);
        store.upsert_subscription("u", SubscriptionTier::Essential, None).unwrap();
        store.upsert_subscription("u", SubscriptionTier::Premium, Some(exp)).unwrap();
        let sub = store.status("u").await.unwrap();
        assert_eq!(sub.tier, SubscriptionTier::Premium);
        assert_eq!(sub.effective_tier(Utc::now()), SubscriptionTier::Premium);
        assert_eq!(sub.effective_tier(exp + Duration::seconds(1)), SubscriptionTier::Free);
    }
}
