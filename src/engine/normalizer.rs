// ── Astro Engine: Message Normalizer ───────────────────────────────────────
//
// WhatsApp Cloud API webhook payload → canonical events.
//
//   entry[].changes[].value.messages[]   one Normalized per message
//   entry[].changes[].value.statuses[]   delivery receipts, ignored
//   entry[].changes[].value.contacts[]   display name for the sender
//
// Never panics and never fails as a whole: a message that cannot be read
// becomes a MalformedEvent carrying whatever identity could be recovered.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{CanonicalEvent, EventKind, MalformedEvent, Normalized};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_json::Value;

/// Message types whose payload is a provider media id.
const MEDIA_TYPES: &[&str] = &["image", "audio", "video", "document", "sticker"];

pub fn normalize_bytes(body: &[u8]) -> EngineResult<Vec<Normalized>> {
    let payload: Value =
        serde_json::from_slice(body).map_err(|e| EngineError::Malformed(format!("body is not JSON: {}", e)))?;
    Ok(normalize(&payload))
}

pub fn normalize(payload: &Value) -> Vec<Normalized> {
    let mut out = Vec::new();
    let Some(entries) = payload["entry"].as_array() else {
        warn!("[normalizer] Payload has no entry array");
        out.push(Normalized::Malformed(MalformedEvent {
            user_id: None,
            message_id: None,
            reason: "payload has no entry array".into(),
        }));
        return out;
    };

    for change in entries.iter().filter_map(|e| e["changes"].as_array()).flatten() {
        let value = &change["value"];
        match value["messages"].as_array() {
            Some(messages) => out.extend(messages.iter().map(|m| normalize_message(m, value))),
            None => {
                let statuses = value["statuses"].as_array().map_or(0, Vec::len);
                debug!("[normalizer] Skipping change with {} status update(s)", statuses);
            }
        }
    }
    out
}

fn normalize_message(msg: &Value, value: &Value) -> Normalized {
    let message_id = msg["id"].as_str().filter(|s| !s.is_empty()).map(str::to_string);
    let malformed = |user_id: Option<&str>, reason: String| {
        Normalized::Malformed(MalformedEvent {
            user_id: user_id.map(str::to_string),
            message_id: message_id.clone(),
            reason,
        })
    };

    let Some(from) = msg["from"].as_str().filter(|s| !s.is_empty()) else {
        return malformed(None, "message has no sender".into());
    };
    if message_id.is_none() {
        return malformed(Some(from), "message has no id".into());
    }
    let msg_type = msg["type"].as_str().unwrap_or("");
    let Some(kind) = event_kind(msg, msg_type) else {
        return malformed(Some(from), format!("'{}' message is missing its payload", msg_type));
    };

    Normalized::Event(CanonicalEvent {
        message_id,
        user_id: from.to_string(),
        display_name: display_name(value, from),
        timestamp: msg["timestamp"]
            .as_str()
            .and_then(|t| t.parse::<i64>().ok())
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        kind,
    })
}

fn event_kind(msg: &Value, msg_type: &str) -> Option<EventKind> {
    match msg_type {
        "text" => msg["text"]["body"].as_str().map(|body| EventKind::Text { body: body.to_string() }),
        "interactive" => {
            let interactive = &msg["interactive"];
            match interactive["type"].as_str()? {
                "button_reply" => {
                    let (id, label) = reply_parts(&interactive["button_reply"])?;
                    Some(EventKind::ButtonReply { id, label })
                }
                "list_reply" => {
                    let (id, label) = reply_parts(&interactive["list_reply"])?;
                    Some(EventKind::ListReply { id, label })
                }
                other => Some(EventKind::Unsupported { original_type: format!("interactive.{}", other) }),
            }
        }
        // Template quick-reply buttons.
        "button" => {
            let label = msg["button"]["text"].as_str()?;
            let id = msg["button"]["payload"].as_str().unwrap_or(label);
            Some(EventKind::ButtonReply { id: id.to_string(), label: label.to_string() })
        }
        "location" => {
            let lat = msg["location"]["latitude"].as_f64()?;
            let lon = msg["location"]["longitude"].as_f64()?;
            Some(EventKind::Media { media_type: "location".into(), reference: format!("{},{}", lat, lon) })
        }
        t if MEDIA_TYPES.contains(&t) => msg[t]["id"].as_str().map(|id| EventKind::Media {
            media_type: t.to_string(),
            reference: id.to_string(),
        }),
        "" => None,
        other => Some(EventKind::Unsupported { original_type: other.to_string() }),
    }
}

fn reply_parts(reply: &Value) -> Option<(String, String)> {
    let id = reply["id"].as_str().filter(|s| !s.is_empty())?;
    let title = reply["title"].as_str().unwrap_or_default();
    Some((id.to_string(), title.to_string()))
}

fn display_name(value: &Value, from: &str) -> Option<String> {
    value["contacts"]
        .as_array()?
        .iter()
        .find(|c| c["wa_id"].as_str() == Some(from))
        .and_then(|c| c["profile"]["name"].as_str())
        .map(str::to_string)
}
