// ── Astro Engine: Action Invocation ────────────────────────────────────────
//
// Runs the collaborator call bound to a terminal node or an accepted prompt
// and renders the result. Every network call goes through its Guard:
//   calculation → live result, else last known result (marked stale), else
//                 "temporarily unavailable"
//   generation  → live answer, else the "astrologers are busy" template
// The caller decides where the user stands afterwards; nothing here moves
// the session except the language switch.

use crate::atoms::types::{OutboundReply, Session};
use crate::engine::fields::FieldValue;
use crate::engine::menu::{ActionRef, MenuNode};
use crate::engine::onboarding::{as_params, profile_fields};
use crate::engine::render::Renderer;
use crate::engine::state::Turn;
use log::{info, warn};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Structured birth data handed to the calculation collaborator.
pub fn birth_input(session: &Session) -> Value {
    let p = &session.profile;
    json!({
        "user_id": session.user_id,
        "birth_date": p.birth_date.map(|d| d.format("%Y-%m-%d").to_string()),
        "birth_time": p.birth_time.map(|t| t.format("%H:%M").to_string()),
        "birth_place": p.birth_place,
        "latitude": p.latitude,
        "longitude": p.longitude,
        "timezone": p.timezone,
        "locale": session.preferred_language,
        "tier": session.subscription_tier.as_str(),
    })
}

pub async fn invoke(turn: &Turn<'_>, session: &mut Session, node: &MenuNode, input: Option<&FieldValue>) -> OutboundReply {
    let Some(action) = &node.action else {
        warn!("[actions] Node '{}' has no action", node.id);
        return turn.current(session);
    };
    info!("[actions] {} → {} ({:?})", session.user_id, node.id, action);

    match action {
        ActionRef::Calculation { kind } => calculate(turn, session, node, kind, input).await,
        ActionRef::Generation { kind } => generate(turn, session, node, kind, input).await,
        ActionRef::Profile => {
            let r = turn.renderer(session);
            let fields = profile_fields(&r, session);
            r.result("", &r.tp("profile.summary", &as_params(&fields)))
        }
        ActionRef::SetLanguage => match input {
            Some(FieldValue::Language(locale)) => {
                session.preferred_language = (*locale).to_string();
                let r = turn.renderer(session);
                let name = r.t(&format!("language.{}", locale));
                r.result("", &r.tp("settings.language_saved", &[("language", &name)]))
            }
            _ => {
                warn!("[actions] set_language on '{}' without a language value", node.id);
                turn.current(session)
            }
        },
    }
}

// ── Calculation ────────────────────────────────────────────────────────────

async fn calculate(
    turn: &Turn<'_>,
    session: &Session,
    node: &MenuNode,
    kind: &str,
    input: Option<&FieldValue>,
) -> OutboundReply {
    let engine = turn.engine;
    let mut payload = birth_input(session);
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("date".into(), json!(turn.today().format("%Y-%m-%d").to_string()));
        if let Some(value) = input {
            obj.insert("input".into(), json!(value.as_input()));
        }
    }
    let cache_key = format!("{}|{}", kind, payload);

    let calculator = Arc::clone(&engine.services.calculator);
    let result = engine
        .guards
        .calculation
        .call(
            || {
                let calculator = Arc::clone(&calculator);
                let payload = payload.clone();
                async move { calculator.compute(kind, &payload).await.map(Some) }
            },
            || engine.calc_cache.recall(&cache_key),
        )
        .await;

    let r = turn.renderer(session);
    let heading = r.t(&node.title);
    let degraded = result.is_degraded();
    match result.value {
        Some(value) => {
            if !degraded {
                engine.calc_cache.remember(cache_key, value.clone());
            }
            let reply = r.result(&heading, &value_text(&value));
            if degraded {
                reply.prepend_notice(&r.t("reply.stale"))
            } else {
                reply
            }
        }
        None => r.result(&heading, &r.t("reply.unavailable")),
    }
}

/// Readable text for a calculation result: its `text` member when present,
/// otherwise one `key: value` line per member.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(obj) => match obj.get("text").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => object_lines(obj),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn object_lines(obj: &Map<String, Value>) -> String {
    obj.iter()
        .map(|(k, v)| {
            let label = k.replace('_', " ");
            match v {
                Value::String(s) => format!("• {}: {}", label, s),
                other => format!("• {}: {}", label, other),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Generation ─────────────────────────────────────────────────────────────

async fn generate(
    turn: &Turn<'_>,
    session: &Session,
    node: &MenuNode,
    kind: &str,
    input: Option<&FieldValue>,
) -> OutboundReply {
    let engine = turn.engine;
    let r = turn.renderer(session);
    let question = input.map(FieldValue::as_input).unwrap_or_default();
    let system = system_prompt(&r, session);
    let prompt = format!("[{}] {}", kind, question);

    let generator = Arc::clone(&engine.services.generator);
    let answer = engine
        .guards
        .generation
        .call(
            || {
                let generator = Arc::clone(&generator);
                let system = system.clone();
                let prompt = prompt.clone();
                async move { generator.generate(&system, &prompt).await.map(Some) }
            },
            || None,
        )
        .await;

    let heading = r.t(&node.title);
    match answer.value {
        Some(text) if !text.trim().is_empty() => r.result(&heading, text.trim()),
        _ => r.result(&heading, &r.t("generation.busy")),
    }
}

fn system_prompt(r: &Renderer<'_>, session: &Session) -> String {
    let language = r.t(&format!("language.{}", session.preferred_language));
    let mut system = r.tp("generation.system", &[("language", &language)]);
    if !session.attributes.is_empty() {
        let traits: Vec<String> = session.attributes.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        system.push_str(&format!("\nUser profile: {}", traits.join(", ")));
    }
    system
}
