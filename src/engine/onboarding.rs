// ── Astro Engine: Onboarding Gate ──────────────────────────────────────────
//
// Linear birth-profile capture for users whose profile is incomplete:
//
//   birth date → birth time → birth place → language → confirmation
//
// Each step is a text-prompt node outside the browsable tree. The session's
// current node is the step, so an abandoned onboarding resumes where it
// stopped. Invalid input re-prompts the same step with a hint. "back" returns
// to the previous step. Confirmation computes the derived attributes and
// lands the user on the menu root.

use crate::atoms::constants::{ONBOARDING_FIRST_FIELD, ONBOARDING_FIRST_NODE};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{BirthProfile, CanonicalEvent, EventKind, GeoPoint, OutboundReply, Session, SubscriptionTier};
use crate::engine::actions::birth_input;
use crate::engine::collaborators::calculation::{local_profile_categories, PROFILE_CATEGORIES};
use crate::engine::dispatcher::trigger_of;
use crate::engine::fields::{self, Confirmation, FieldValue, PlaceInput};
use crate::engine::menu::{ControlInput, FieldKind, FieldSpec, MenuNode, NodeKind, Render};
use crate::engine::render::Renderer;
use crate::engine::state::Turn;
use chrono::NaiveDate;
use log::{info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Timezone recorded when a place could not be resolved.
const FALLBACK_TIMEZONE: &str = "UTC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardingStep {
    BirthDate,
    BirthTime,
    BirthPlace,
    Language,
    Confirm,
}

impl OnboardingStep {
    pub const ALL: [OnboardingStep; 5] =
        [Self::BirthDate, Self::BirthTime, Self::BirthPlace, Self::Language, Self::Confirm];

    pub fn node_id(&self) -> &'static str {
        match self {
            Self::BirthDate => ONBOARDING_FIRST_NODE,
            Self::BirthTime => "onboarding.birth_time",
            Self::BirthPlace => "onboarding.birth_place",
            Self::Language => "onboarding.language",
            Self::Confirm => "onboarding.confirm",
        }
    }

    pub fn field_tag(&self) -> &'static str {
        match self {
            Self::BirthDate => ONBOARDING_FIRST_FIELD,
            Self::BirthTime => "awaiting-birth-time",
            Self::BirthPlace => "awaiting-birth-place",
            Self::Language => "awaiting-language",
            Self::Confirm => "awaiting-confirmation",
        }
    }

    pub fn field_kind(&self) -> FieldKind {
        match self {
            Self::BirthDate => FieldKind::Date,
            Self::BirthTime => FieldKind::Time,
            Self::BirthPlace => FieldKind::Place,
            Self::Language => FieldKind::Language,
            Self::Confirm => FieldKind::Confirmation,
        }
    }

    /// The prompt node inserted into every MenuTree. The node id doubles as
    /// its translation key.
    pub fn node(&self) -> MenuNode {
        MenuNode {
            id: self.node_id().to_string(),
            kind: NodeKind::TextPrompt,
            title: self.node_id().to_string(),
            prompt: None,
            children: vec![],
            visibility: SubscriptionTier::ALL.to_vec(),
            action: None,
            render: Render::Buttons,
            keywords: vec![],
            global: false,
            field: Some(FieldSpec { tag: self.field_tag().to_string(), kind: self.field_kind() }),
            media: None,
        }
    }

    pub fn from_node(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.node_id() == id)
    }

    pub fn next(&self) -> Option<Self> {
        let i = Self::ALL.iter().position(|s| s == self)?;
        Self::ALL.get(i + 1).copied()
    }

    pub fn prev(&self) -> Option<Self> {
        let i = Self::ALL.iter().position(|s| s == self)?;
        i.checked_sub(1).and_then(|p| Self::ALL.get(p).copied())
    }

    pub fn parse(&self, input: &str, today: NaiveDate) -> EngineResult<FieldValue> {
        fields::validate(self.field_kind(), input, today)
    }
}

// ── Gate ───────────────────────────────────────────────────────────────────

/// Handle one event for a user whose profile is incomplete.
pub async fn handle(turn: &Turn<'_>, event: &CanonicalEvent, session: &mut Session) -> OutboundReply {
    if turn.created {
        let r = turn.renderer(session);
        info!("[onboarding] Welcoming {}", session.user_id);
        return step_prompt(turn, session, OnboardingStep::BirthDate).prepend_notice(&r.t("onboarding.welcome"));
    }

    let step = match OnboardingStep::from_node(&session.current_node) {
        Some(step) => step,
        None => return move_to(turn, session, OnboardingStep::BirthDate),
    };
    let r = turn.renderer(session);

    let control = trigger_of(&event.kind).and_then(|t| turn.menus.registry.control(&t));
    if control == Some(ControlInput::Back) {
        return move_to(turn, session, step.prev().unwrap_or(step));
    }

    let input = match &event.kind {
        EventKind::Text { body } => body.as_str(),
        EventKind::ButtonReply { id, .. } | EventKind::ListReply { id, .. } => id.as_str(),
        EventKind::Media { media_type, reference } if media_type == "location" && step == OnboardingStep::BirthPlace => {
            reference.as_str()
        }
        EventKind::Media { .. } => {
            return step_prompt(turn, session, step).prepend_notice(&r.t("reply.media_not_expected"));
        }
        EventKind::Unsupported { .. } => {
            return step_prompt(turn, session, step).prepend_notice(&r.t("reply.unsupported"));
        }
    };

    let value = match step.parse(input, turn.today()) {
        Ok(value) => value,
        // "menu" / "hi" mid-onboarding just shows the step again.
        Err(_) if control == Some(ControlInput::MainMenu) => return step_prompt(turn, session, step),
        Err(EngineError::Validation(hint)) => {
            return step_prompt(turn, session, step).prepend_notice(&r.t(&hint));
        }
        Err(e) => {
            warn!("[onboarding] Unexpected validation failure for {}: {}", session.user_id, e);
            return step_prompt(turn, session, step);
        }
    };

    match value {
        FieldValue::Date(date) => {
            session.profile.birth_date = Some(date);
            move_to(turn, session, OnboardingStep::BirthTime)
        }
        FieldValue::Time(time) => {
            session.profile.birth_time = time;
            move_to(turn, session, OnboardingStep::BirthPlace)
        }
        FieldValue::Place(place) => accept_place(turn, session, place).await,
        FieldValue::Language(locale) => {
            session.preferred_language = locale.to_string();
            move_to(turn, session, OnboardingStep::Confirm)
        }
        FieldValue::Confirmation(Confirmation::Yes) => complete(turn, session).await,
        FieldValue::Confirmation(Confirmation::Restart) => {
            info!("[onboarding] {} restarting", session.user_id);
            session.profile = BirthProfile::default();
            let notice = r.t("onboarding.restart");
            move_to(turn, session, OnboardingStep::BirthDate).prepend_notice(&notice)
        }
        FieldValue::Text(_) => step_prompt(turn, session, step),
    }
}

fn move_to(turn: &Turn<'_>, session: &mut Session, step: OnboardingStep) -> OutboundReply {
    turn.navigator().set_position(session, step.node_id());
    step_prompt(turn, session, step)
}

fn step_prompt(turn: &Turn<'_>, session: &Session, step: OnboardingStep) -> OutboundReply {
    let r = turn.renderer(session);
    let body = match step {
        OnboardingStep::Confirm => {
            let fields = profile_fields(&r, session);
            r.tp(step.node_id(), &as_params(&fields))
        }
        _ => r.t(step.node_id()),
    };
    r.field_prompt(body, Some(step.field_kind()), false)
}

// ── Birth place ────────────────────────────────────────────────────────────

async fn accept_place(turn: &Turn<'_>, session: &mut Session, place: PlaceInput) -> OutboundReply {
    let name = match place {
        PlaceInput::Pin { latitude, longitude } => {
            let profile = &mut session.profile;
            profile.birth_place = Some(format!("{:.4}, {:.4}", latitude, longitude));
            profile.latitude = Some(latitude);
            profile.longitude = Some(longitude);
            profile.timezone = None;
            return move_to(turn, session, OnboardingStep::Language);
        }
        PlaceInput::Named(name) => name,
    };

    let engine = turn.engine;
    let key = name.to_lowercase();
    let geocoder = Arc::clone(&engine.services.geocoder);
    let found = engine
        .guards
        .geocoding
        .call(
            || {
                let geocoder = Arc::clone(&geocoder);
                let name = name.clone();
                async move { geocoder.locate(&name).await }
            },
            || engine.geo_cache.recall(&key),
        )
        .await;

    let degraded = found.is_degraded();
    let mut notice = None;
    match found.value {
        Some(point) => {
            if !degraded {
                engine.geo_cache.remember(key, point.clone());
            }
            apply_point(&mut session.profile, &name, point);
        }
        None if degraded => {
            warn!("[onboarding] Geocoding unavailable; keeping '{}' without coordinates", name);
            let profile = &mut session.profile;
            profile.birth_place = Some(name);
            profile.latitude = None;
            profile.longitude = None;
            profile.timezone = Some(FALLBACK_TIMEZONE.to_string());
            notice = Some("onboarding.place_offline");
        }
        None => {
            let r = turn.renderer(session);
            return step_prompt(turn, session, OnboardingStep::BirthPlace)
                .prepend_notice(&r.t("onboarding.place_not_found"));
        }
    }

    let reply = move_to(turn, session, OnboardingStep::Language);
    match notice {
        Some(key) => reply.prepend_notice(&turn.renderer(session).t(key)),
        None => reply,
    }
}

fn apply_point(profile: &mut BirthProfile, typed: &str, point: GeoPoint) {
    profile.birth_place = Some(typed.to_string());
    profile.latitude = Some(point.latitude);
    profile.longitude = Some(point.longitude);
    profile.timezone = point.timezone.or_else(|| Some(FALLBACK_TIMEZONE.to_string()));
}

// ── Confirmation ───────────────────────────────────────────────────────────

async fn complete(turn: &Turn<'_>, session: &mut Session) -> OutboundReply {
    let engine = turn.engine;
    let input = birth_input(session);
    let calculator = Arc::clone(&engine.services.calculator);
    let profile = session.profile.clone();
    let result = engine
        .guards
        .calculation
        .call(
            || {
                let calculator = Arc::clone(&calculator);
                let input = input.clone();
                async move { calculator.compute(PROFILE_CATEGORIES, &input).await }
            },
            || local_profile_categories(&profile),
        )
        .await;

    let mut attributes = attributes_from(&result.value);
    if attributes.is_empty() {
        warn!("[onboarding] Calculation returned no categories for {}; using local ones", session.user_id);
        attributes = attributes_from(&local_profile_categories(&profile));
    }
    session.attributes = attributes;
    session.profile_complete = true;
    turn.navigator().main_menu(session);
    info!(
        "[onboarding] {} completed onboarding ({} attributes{})",
        session.user_id,
        session.attributes.len(),
        if result.is_degraded() { ", offline" } else { "" }
    );

    let r = turn.renderer(session);
    let lines = attribute_lines(&r, &session.attributes);
    let notice = r.tp("onboarding.complete", &[("attributes", &lines)]);
    turn.current(session).prepend_notice(&notice)
}

/// String and number members of a JSON object.
fn attributes_from(value: &Value) -> BTreeMap<String, String> {
    let Some(obj) = value.as_object() else {
        return BTreeMap::new();
    };
    obj.iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) if !s.is_empty() => Some((k.clone(), s.clone())),
            Value::Number(n) => Some((k.clone(), n.to_string())),
            _ => None,
        })
        .collect()
}

fn attribute_lines(r: &Renderer<'_>, attributes: &BTreeMap<String, String>) -> String {
    attributes
        .iter()
        .map(|(k, v)| {
            let key = format!("attr.{}", k);
            let label = r.t(&key);
            // Untranslated attribute: show its raw name.
            let label = if label == key { k.clone() } else { label };
            format!("• {}: {}", label, v)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Profile summary ────────────────────────────────────────────────────────

/// Placeholder values for the confirmation and profile summary templates.
pub fn profile_fields(r: &Renderer<'_>, session: &Session) -> Vec<(&'static str, String)> {
    let p = &session.profile;
    let none = r.t("profile.none");
    vec![
        ("date", p.birth_date.map(|d| d.format("%d/%m/%Y").to_string()).unwrap_or_else(|| none.clone())),
        (
            "time",
            match p.birth_time {
                Some(t) => t.format("%H:%M").to_string(),
                None if p.birth_date.is_some() => r.t("onboarding.time_unknown"),
                None => none.clone(),
            },
        ),
        ("place", p.birth_place.clone().unwrap_or(none)),
        ("language", r.t(&format!("language.{}", session.preferred_language))),
    ]
}

pub fn as_params<'a>(fields: &'a [(&'static str, String)]) -> Vec<(&'a str, &'a str)> {
    fields.iter().map(|(k, v)| (*k, v.as_str())).collect()
}
