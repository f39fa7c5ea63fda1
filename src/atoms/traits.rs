// ── Astro Atoms: Collaborator Traits ───────────────────────────────────────
// Narrow seams between the engine core and everything it does not own.
// Network-backed collaborators are only ever called through a resilience
// `Guard`; the engine never awaits them directly.

use async_trait::async_trait;
use serde_json::Value;

use crate::atoms::error::EngineResult;
use crate::atoms::types::{GeoPoint, OutboundReply, Session, Subscription};

/// Opaque calculation service: structured birth input → structured result.
/// Pure and idempotent from the engine's point of view.
#[async_trait]
pub trait Calculator: Send + Sync {
    async fn compute(&self, kind: &str, input: &Value) -> EngineResult<Value>;
}

/// Text lookup keyed by (key, locale). Implementations fall back to the
/// default locale, then to the key itself; they never fail.
pub trait Translator: Send + Sync {
    fn translate(&self, key: &str, locale: &str, params: &[(&str, &str)]) -> String;
    fn supports(&self, locale: &str) -> bool;
}

/// Read-only subscription lookup.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn status(&self, user_id: &str) -> EngineResult<Subscription>;
}

/// Place name → coordinates. `Ok(None)` means the service answered but knows
/// no such place, which is a user error rather than an outage.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn locate(&self, place: &str) -> EngineResult<Option<GeoPoint>>;
}

/// Free-form text generation (answers to user questions).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> EngineResult<String>;
}

/// Outbound delivery to the messaging provider.
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send(&self, to: &str, reply: &OutboundReply) -> EngineResult<()>;
}

/// Durable session persistence. Callers go through `SessionStore::acquire`
/// so every load/save for a user happens under that user's lease.
pub trait SessionBackend: Send + Sync {
    fn load(&self, user_id: &str) -> EngineResult<Option<Session>>;
    /// Persist the session and, atomically with it, mark `message_id` processed.
    fn save(&self, session: &Session, message_id: Option<&str>) -> EngineResult<()>;
    fn is_processed(&self, message_id: &str) -> EngineResult<bool>;
}
