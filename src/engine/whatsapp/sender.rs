// WhatsApp Cloud API — Outbound delivery
// OutboundReply → Graph API `/messages` payloads.
//
//   Text     one `text` message per chunk (bodies over the cap are split)
//   Buttons  `interactive.button`, up to three reply buttons
//   List     `interactive.list`, sections of rows
//   Media    `image` / `document` / … by media id or public link

use crate::atoms::constants::{MEDIA_CAPTION_MAX, TEXT_BODY_MAX};
use crate::atoms::error::EngineResult;
use crate::atoms::traits::ReplySender;
use crate::atoms::types::{truncate_utf8, OutboundReply};
use crate::engine::channels;
use crate::engine::http::{pinned_client, send_checked};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use serde_json::{json, Value};

use super::config::WhatsAppConfig;

/// Media types that accept a caption.
const CAPTIONED_MEDIA: &[&str] = &["image", "video", "document"];

pub struct WhatsAppSender {
    client: Client,
    config: WhatsAppConfig,
}

impl WhatsAppSender {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self { client: pinned_client(), config }
    }
}

#[async_trait]
impl ReplySender for WhatsAppSender {
    async fn send(&self, to: &str, reply: &OutboundReply) -> EngineResult<()> {
        let url = self.config.messages_url();
        for payload in payloads(to, reply) {
            let req = self
                .client
                .post(&url)
                .bearer_auth(&self.config.access_token)
                .json(&payload);
            send_checked("delivery", req).await?;
        }
        debug!("[whatsapp] Delivered {} reply to {}", kind_name(reply), to);
        Ok(())
    }
}

/// Stand-in used when no delivery credentials are configured.
pub struct LogSender;

#[async_trait]
impl ReplySender for LogSender {
    async fn send(&self, to: &str, reply: &OutboundReply) -> EngineResult<()> {
        info!("[whatsapp] (not sent) {} → {}: {}", kind_name(reply), to, truncate_utf8(reply.body(), 120));
        Ok(())
    }
}

fn kind_name(reply: &OutboundReply) -> &'static str {
    match reply {
        OutboundReply::Text { .. } => "text",
        OutboundReply::Buttons { .. } => "buttons",
        OutboundReply::List { .. } => "list",
        OutboundReply::Media { .. } => "media",
    }
}

// ── Payload builders ───────────────────────────────────────────────────

/// Messages a reply goes out as. Only text is ever split.
pub fn split_reply(reply: &OutboundReply) -> Vec<OutboundReply> {
    match reply {
        OutboundReply::Text { body } => channels::split_message(body, TEXT_BODY_MAX)
            .into_iter()
            .map(OutboundReply::text)
            .collect(),
        other => vec![other.clone()],
    }
}

fn envelope(to: &str, kind: &str, content: Value) -> Value {
    let mut msg = json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": kind,
    });
    msg[kind] = content;
    msg
}

/// Graph API request bodies for one reply, in send order.
pub fn payloads(to: &str, reply: &OutboundReply) -> Vec<Value> {
    match reply {
        OutboundReply::Text { body } => channels::split_message(body, TEXT_BODY_MAX)
            .into_iter()
            .map(|chunk| envelope(to, "text", json!({ "preview_url": false, "body": chunk })))
            .collect(),
        OutboundReply::Buttons { body, buttons } => {
            let buttons: Vec<Value> = buttons
                .iter()
                .map(|b| json!({ "type": "reply", "reply": { "id": b.id, "title": b.title } }))
                .collect();
            vec![envelope(
                to,
                "interactive",
                json!({
                    "type": "button",
                    "body": { "text": body },
                    "action": { "buttons": buttons },
                }),
            )]
        }
        OutboundReply::List { body, button_label, sections } => vec![envelope(
            to,
            "interactive",
            json!({
                "type": "list",
                "body": { "text": body },
                "action": { "button": button_label, "sections": sections },
            }),
        )],
        OutboundReply::Media { media_type, reference, caption } => {
            let mut media = if reference.starts_with("https://") || reference.starts_with("http://") {
                json!({ "link": reference })
            } else {
                json!({ "id": reference })
            };
            if let Some(caption) = caption.as_deref().filter(|_| CAPTIONED_MEDIA.contains(&media_type.as_str())) {
                media["caption"] = json!(truncate_utf8(caption, MEDIA_CAPTION_MAX));
            }
            vec![envelope(to, media_type, media)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{ListRow, ListSection, ReplyButton};

    #[test]
    fn long_text_is_split() {
        let body = "word ".repeat(1000);
        let out = payloads("15550001", &OutboundReply::text(body));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["type"], "text");
        assert_eq!(out[0]["to"], "15550001");
        assert!(out[0]["text"]["body"].as_str().unwrap().len() <= TEXT_BODY_MAX);
    }

    #[test]
    fn buttons_payload() {
        let reply = OutboundReply::Buttons {
            body: "Pick one".into(),
            buttons: vec![ReplyButton { id: "charts".into(), title: "Charts".into() }],
        };
        let out = payloads("1", &reply);
        let interactive = &out[0]["interactive"];
        assert_eq!(interactive["type"], "button");
        assert_eq!(interactive["body"]["text"], "Pick one");
        assert_eq!(interactive["action"]["buttons"][0]["reply"]["id"], "charts");
        assert_eq!(interactive["action"]["buttons"][0]["type"], "reply");
    }

    #[test]
    fn list_payload_skips_empty_descriptions() {
        let reply = OutboundReply::List {
            body: "Menu".into(),
            button_label: "Options".into(),
            sections: vec![ListSection {
                title: "Readings".into(),
                rows: vec![
                    ListRow { id: "daily".into(), title: "Daily".into(), description: Some("Today".into()) },
                    ListRow { id: "weekly".into(), title: "Weekly".into(), description: None },
                ],
            }],
        };
        let out = payloads("1", &reply);
        let action = &out[0]["interactive"]["action"];
        assert_eq!(action["button"], "Options");
        assert_eq!(action["sections"][0]["rows"][0]["description"], "Today");
        assert!(action["sections"][0]["rows"][1].get("description").is_none());
    }

    #[test]
    fn media_by_id_or_link() {
        let img = OutboundReply::Media {
            media_type: "image".into(),
            reference: "https://cdn.example.com/chart.png".into(),
            caption: Some("Your chart".into()),
        };
        let out = payloads("1", &img);
        assert_eq!(out[0]["image"]["link"], "https://cdn.example.com/chart.png");
        assert_eq!(out[0]["image"]["caption"], "Your chart");

        let audio = OutboundReply::Media { media_type: "audio".into(), reference: "M1".into(), caption: Some("x".into()) };
        let out = payloads("1", &audio);
        assert_eq!(out[0]["audio"]["id"], "M1");
        assert!(out[0]["audio"].get("caption").is_none());
    }
}
