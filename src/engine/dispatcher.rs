// ── Astro Engine: Dispatcher ───────────────────────────────────────────────
//
// One processor per inbound message kind, chosen by an exhaustive match over
// the closed EventKind enum. A new kind is a new variant plus a new arm; the
// compiler points at every place that needs it.
//
// Incomplete profiles never reach a processor: the onboarding gate takes the
// event whatever its kind.

use crate::atoms::error::EngineError;
use crate::atoms::types::{CanonicalEvent, EventKind, OutboundReply, Session};
use crate::engine::actions;
use crate::engine::fields;
use crate::engine::menu::{FieldKind, Trigger};
use crate::engine::navigator::Transition;
use crate::engine::onboarding;
use crate::engine::state::Turn;
use async_trait::async_trait;
use log::{debug, warn};

#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, turn: &Turn<'_>, event: &CanonicalEvent, session: &mut Session) -> OutboundReply;
}

pub struct TextProcessor;
pub struct ButtonReplyProcessor;
pub struct ListReplyProcessor;
pub struct MediaProcessor;
pub struct UnsupportedProcessor;

pub fn processor_for(kind: &EventKind) -> &'static dyn Processor {
    match kind {
        EventKind::Text { .. } => &TextProcessor,
        EventKind::ButtonReply { .. } => &ButtonReplyProcessor,
        EventKind::ListReply { .. } => &ListReplyProcessor,
        EventKind::Media { .. } => &MediaProcessor,
        EventKind::Unsupported { .. } => &UnsupportedProcessor,
    }
}

pub async fn route(turn: &Turn<'_>, event: &CanonicalEvent, session: &mut Session) -> OutboundReply {
    if !session.profile_complete {
        return onboarding::handle(turn, event, session).await;
    }
    processor_for(&event.kind).process(turn, event, session).await
}

/// Registry trigger carried by an event, if its kind has one.
pub fn trigger_of(kind: &EventKind) -> Option<Trigger<'_>> {
    match kind {
        EventKind::Text { body } => Some(Trigger::Keyword(body)),
        EventKind::ButtonReply { id, .. } | EventKind::ListReply { id, .. } => Some(Trigger::Id(id)),
        EventKind::Media { .. } | EventKind::Unsupported { .. } => None,
    }
}

// ── Processors ─────────────────────────────────────────────────────────────

#[async_trait]
impl Processor for TextProcessor {
    async fn process(&self, turn: &Turn<'_>, event: &CanonicalEvent, session: &mut Session) -> OutboundReply {
        let EventKind::Text { body } = &event.kind else {
            return turn.current(session);
        };
        let trigger = Trigger::Keyword(body);
        // Back / main menu win over a pending prompt.
        if let Some(control) = turn.menus.registry.control(&trigger) {
            turn.navigator().control(session, control);
            return turn.current(session);
        }
        if session.pending_input.is_some() {
            return accept_field(turn, session, body).await;
        }
        select(turn, session, trigger).await
    }
}

#[async_trait]
impl Processor for ButtonReplyProcessor {
    async fn process(&self, turn: &Turn<'_>, event: &CanonicalEvent, session: &mut Session) -> OutboundReply {
        match &event.kind {
            EventKind::ButtonReply { id, .. } => select_id(turn, session, id).await,
            _ => turn.current(session),
        }
    }
}

#[async_trait]
impl Processor for ListReplyProcessor {
    async fn process(&self, turn: &Turn<'_>, event: &CanonicalEvent, session: &mut Session) -> OutboundReply {
        match &event.kind {
            EventKind::ListReply { id, .. } => select_id(turn, session, id).await,
            _ => turn.current(session),
        }
    }
}

#[async_trait]
impl Processor for MediaProcessor {
    async fn process(&self, turn: &Turn<'_>, event: &CanonicalEvent, session: &mut Session) -> OutboundReply {
        if let EventKind::Media { media_type, reference } = &event.kind {
            if media_type == "location" && pending_kind(turn, session) == Some(FieldKind::Place) {
                return accept_field(turn, session, reference).await;
            }
            debug!("[dispatch] {} sent {} at '{}'", session.user_id, media_type, session.current_node);
        }
        let notice = turn.renderer(session).t("reply.media_not_expected");
        turn.current(session).prepend_notice(&notice)
    }
}

#[async_trait]
impl Processor for UnsupportedProcessor {
    async fn process(&self, turn: &Turn<'_>, event: &CanonicalEvent, session: &mut Session) -> OutboundReply {
        if let EventKind::Unsupported { original_type } = &event.kind {
            debug!("[dispatch] Unsupported '{}' from {}", original_type, session.user_id);
        }
        let notice = turn.renderer(session).t("reply.unsupported");
        turn.current(session).prepend_notice(&notice)
    }
}

// ── Shared steps ───────────────────────────────────────────────────────────

/// Button / list ids. While a prompt is pending, an id the registry does not
/// know (a language or confirmation option) is the field value.
async fn select_id(turn: &Turn<'_>, session: &mut Session, id: &str) -> OutboundReply {
    let trigger = Trigger::Id(id);
    if session.pending_input.is_some() && turn.menus.registry.resolve(&trigger).is_none() {
        return accept_field(turn, session, id).await;
    }
    select(turn, session, trigger).await
}

async fn select(turn: &Turn<'_>, session: &mut Session, trigger: Trigger<'_>) -> OutboundReply {
    match turn.navigator().select(session, trigger) {
        Transition::Moved => turn.current(session),
        Transition::Invoke(id) => match turn.tree().node(&id) {
            Some(node) => actions::invoke(turn, session, node, None).await,
            None => turn.current(session),
        },
        Transition::Rejected => {
            debug!("[dispatch] {:?} not available at '{}' for {}", trigger, session.current_node, session.user_id);
            not_available(turn, session)
        }
    }
}

fn not_available(turn: &Turn<'_>, session: &Session) -> OutboundReply {
    let r = turn.renderer(session);
    match turn.tree().node(&session.current_node) {
        Some(node) => r.not_available(turn.tree(), node, session.subscription_tier),
        None => OutboundReply::text(r.t("reply.not_available")),
    }
}

fn pending_kind(turn: &Turn<'_>, session: &Session) -> Option<FieldKind> {
    session.pending_input.as_ref()?;
    turn.tree().node(&session.current_node)?.field.as_ref().map(|f| f.kind)
}

/// Validate input for the pending prompt. Accepted: run the node's action,
/// then return to the menu that opened the prompt. Rejected: hint and stay.
async fn accept_field(turn: &Turn<'_>, session: &mut Session, input: &str) -> OutboundReply {
    let Some(node) = turn.tree().node(&session.current_node) else {
        return turn.current(session);
    };
    let Some(field) = &node.field else {
        return turn.current(session);
    };

    match fields::validate(field.kind, input, turn.today()) {
        Ok(value) => {
            let reply = actions::invoke(turn, session, node, Some(&value)).await;
            turn.navigator().back(session);
            reply
        }
        Err(EngineError::Validation(hint)) => {
            let notice = turn.renderer(session).t(&hint);
            turn.current(session).prepend_notice(&notice)
        }
        Err(e) => {
            warn!("[dispatch] Field '{}' rejected input for {}: {}", field.tag, session.user_id, e);
            turn.current(session)
        }
    }
}
