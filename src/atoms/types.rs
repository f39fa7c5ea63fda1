// ── Astro Atoms: Shared Types ──────────────────────────────────────────────
// Plain data shared across the engine: sessions, canonical inbound events,
// outbound reply shapes, collaborator results. No I/O here.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::atoms::constants::{ONBOARDING_FIRST_FIELD, ONBOARDING_FIRST_NODE};

/// Menu node identifier.
pub type NodeId = String;

// ── Subscription ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Essential,
    Premium,
}

impl SubscriptionTier {
    pub const ALL: [SubscriptionTier; 3] = [Self::Free, Self::Essential, Self::Premium];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Essential => "essential",
            Self::Premium => "premium",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Some(Self::Free),
            "essential" => Some(Self::Essential),
            "premium" => Some(Self::Premium),
            _ => None,
        }
    }
}

/// Payment collaborator answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub tier: SubscriptionTier,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn free() -> Self {
        Self { tier: SubscriptionTier::Free, expires_at: None }
    }

    /// Tier in force at `now`; an expired subscription counts as free.
    pub fn effective_tier(&self, now: DateTime<Utc>) -> SubscriptionTier {
        match self.expires_at {
            Some(exp) if exp <= now => SubscriptionTier::Free,
            _ => self.tier,
        }
    }
}

// ── Session ────────────────────────────────────────────────────────────────

/// Birth data collected during onboarding. Fields fill in step by step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BirthProfile {
    pub birth_date: Option<NaiveDate>,
    /// `None` once past the time step means the user did not know it.
    pub birth_time: Option<NaiveTime>,
    pub birth_place: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
}

/// Durable per-user conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub profile_complete: bool,
    pub current_node: NodeId,
    pub navigation_stack: Vec<NodeId>,
    pub pending_input: Option<String>,
    pub preferred_language: String,
    pub last_activity_at: DateTime<Utc>,
    pub subscription_tier: SubscriptionTier,
    pub profile: BirthProfile,
    /// Derived category memberships (sun sign, life path…) computed at
    /// onboarding confirmation.
    pub attributes: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// First-contact session, parked on the first onboarding prompt.
    pub fn new_default(user_id: &str, locale: &str, now: DateTime<Utc>) -> Self {
        Session {
            user_id: user_id.to_string(),
            profile_complete: false,
            current_node: ONBOARDING_FIRST_NODE.to_string(),
            navigation_stack: Vec::new(),
            pending_input: Some(ONBOARDING_FIRST_FIELD.to_string()),
            preferred_language: locale.to_string(),
            last_activity_at: now,
            subscription_tier: SubscriptionTier::Free,
            profile: BirthProfile::default(),
            attributes: BTreeMap::new(),
            created_at: now,
        }
    }

    /// Record activity. Never moves the clock backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }

    /// Whether the idle time since the last processed event exceeds `timeout_secs`.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout_secs: i64) -> bool {
        (now - self.last_activity_at).num_seconds() > timeout_secs
    }
}

// ── Inbound events ─────────────────────────────────────────────────────────

/// Kind-specific payload of a normalized inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Text { body: String },
    ButtonReply { id: String, label: String },
    ListReply { id: String, label: String },
    /// `reference` is the provider media id, or `"lat,lon"` for a location pin.
    Media { media_type: String, reference: String },
    Unsupported { original_type: String },
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Text { .. } => "text",
            EventKind::ButtonReply { .. } => "button_reply",
            EventKind::ListReply { .. } => "list_reply",
            EventKind::Media { .. } => "media",
            EventKind::Unsupported { .. } => "unsupported",
        }
    }
}

/// Provider-independent inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEvent {
    pub message_id: Option<String>,
    pub user_id: String,
    pub display_name: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: EventKind,
}

/// Inbound message that could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEvent {
    /// Present when the sender could still be identified, so a
    /// "could not understand" reply can be sent.
    pub user_id: Option<String>,
    pub message_id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Event(CanonicalEvent),
    Malformed(MalformedEvent),
}

// ── Outbound replies ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyButton {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ListRow>,
}

/// The four reply shapes the messaging provider accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundReply {
    Text {
        body: String,
    },
    Buttons {
        body: String,
        buttons: Vec<ReplyButton>,
    },
    List {
        body: String,
        button_label: String,
        sections: Vec<ListSection>,
    },
    Media {
        media_type: String,
        reference: String,
        caption: Option<String>,
    },
}

impl OutboundReply {
    pub fn text(body: impl Into<String>) -> Self {
        OutboundReply::Text { body: body.into() }
    }

    /// Main text of the reply (caption for media).
    pub fn body(&self) -> &str {
        match self {
            OutboundReply::Text { body }
            | OutboundReply::Buttons { body, .. }
            | OutboundReply::List { body, .. } => body,
            OutboundReply::Media { caption, .. } => caption.as_deref().unwrap_or(""),
        }
    }

    /// Put a notice paragraph in front of the body, keeping the shape.
    pub fn prepend_notice(mut self, notice: &str) -> Self {
        if notice.is_empty() {
            return self;
        }
        match &mut self {
            OutboundReply::Text { body }
            | OutboundReply::Buttons { body, .. }
            | OutboundReply::List { body, .. } => {
                *body = format!("{}\n\n{}", notice, body);
            }
            OutboundReply::Media { caption, .. } => {
                *caption = Some(match caption.take() {
                    Some(c) => format!("{}\n\n{}", notice, c),
                    None => notice.to_string(),
                });
            }
        }
        self
    }

    /// Selectable ids carried by the reply (buttons or list rows).
    pub fn option_ids(&self) -> Vec<&str> {
        match self {
            OutboundReply::Buttons { buttons, .. } => buttons.iter().map(|b| b.id.as_str()).collect(),
            OutboundReply::List { sections, .. } => sections
                .iter()
                .flat_map(|s| s.rows.iter().map(|r| r.id.as_str()))
                .collect(),
            _ => vec![],
        }
    }
}

/// A reply addressed to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: String,
    pub reply: OutboundReply,
}

// ── Collaborator results ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub display_name: String,
    pub timezone: Option<String>,
}

// ── Helpers ────────────────────────────────────────────────────────────────

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_utf8(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
