// ── Astro Engine: Reply Rendering ──────────────────────────────────────────
//
// Menu node + session locale/tier → one OutboundReply.
//   • Shape follows the node's declared render type
//   • Buttons degrade to a list when more than 3 options are visible
//   • Media nodes send their attachment with the numbered options as caption
//   • Non-root menus carry Back / Main menu entries (list) or a text hint
//   • Titles and bodies are cut to the provider limits

use crate::atoms::constants::*;
use crate::atoms::traits::Translator;
use crate::atoms::types::{truncate_utf8, ListRow, ListSection, OutboundReply, ReplyButton, SubscriptionTier};
use crate::engine::fields::{CONFIRM_RESTART_ID, CONFIRM_YES_ID, LANGUAGE_OPTION_PREFIX};
use crate::engine::menu::{list_room, FieldKind, MenuNode, MenuTree, NodeKind, Render};

/// Selectable option: (structural id, display title).
pub type Choice = (String, String);

pub struct Renderer<'a> {
    tr: &'a dyn Translator,
    locale: String,
}

impl<'a> Renderer<'a> {
    pub fn new(tr: &'a dyn Translator, locale: &str) -> Self {
        Self { tr, locale: locale.to_string() }
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn t(&self, key: &str) -> String {
        self.tr.translate(key, &self.locale, &[])
    }

    pub fn tp(&self, key: &str, params: &[(&str, &str)]) -> String {
        self.tr.translate(key, &self.locale, params)
    }

    /// What the user sees after landing on `node`.
    pub fn node(&self, tree: &MenuTree, node: &MenuNode, tier: SubscriptionTier) -> OutboundReply {
        let reply = match node.kind {
            NodeKind::Menu => self.menu(tree, node, tier),
            NodeKind::TextPrompt => self.prompt(node, !tree.is_onboarding(&node.id)),
            // Terminal nodes are never a position; show their title only.
            NodeKind::TerminalAction => return OutboundReply::text(self.t(&node.title)),
        };
        match &node.media {
            Some(media) if node.render == Render::Media => OutboundReply::Media {
                media_type: media.media_type.clone(),
                reference: media.reference.clone(),
                caption: Some(truncate_utf8(reply.body(), MEDIA_CAPTION_MAX).to_string()),
            },
            _ => reply,
        }
    }

    pub fn menu(&self, tree: &MenuTree, node: &MenuNode, tier: SubscriptionTier) -> OutboundReply {
        let choices: Vec<Choice> = tree
            .visible_children(&node.id, tier)
            .into_iter()
            .map(|c| (c.id.clone(), self.t(&c.title)))
            .collect();
        let with_nav = node.id != tree.root();
        self.choices(self.t(node.body_key()), &choices, node.render, with_nav)
    }

    /// Text prompt body. Language and confirmation fields offer buttons.
    pub fn prompt(&self, node: &MenuNode, with_nav: bool) -> OutboundReply {
        let body = self.t(node.body_key());
        self.field_prompt(body, node.field.as_ref().map(|f| f.kind), with_nav)
    }

    pub fn field_prompt(&self, body: String, kind: Option<FieldKind>, with_nav: bool) -> OutboundReply {
        match kind {
            Some(FieldKind::Language) => {
                let choices: Vec<Choice> = SUPPORTED_LOCALES
                    .iter()
                    .map(|l| (format!("{}{}", LANGUAGE_OPTION_PREFIX, l), self.t(&format!("language.{}", l))))
                    .collect();
                self.choices(body, &choices, Render::Buttons, with_nav)
            }
            Some(FieldKind::Confirmation) => {
                let choices = vec![
                    (CONFIRM_YES_ID.to_string(), self.t("onboarding.confirm_yes")),
                    (CONFIRM_RESTART_ID.to_string(), self.t("onboarding.confirm_restart")),
                ];
                self.choices(body, &choices, Render::Buttons, with_nav)
            }
            _ if with_nav => OutboundReply::text(format!("{}\n\n{}", body, self.t("nav.hint"))),
            _ => OutboundReply::text(body),
        }
    }

    /// "Not available" notice in front of the current node's options.
    pub fn not_available(&self, tree: &MenuTree, current: &MenuNode, tier: SubscriptionTier) -> OutboundReply {
        self.node(tree, current, tier).prepend_notice(&self.t("reply.not_available"))
    }

    /// Action result with the navigation hint underneath.
    pub fn result(&self, heading: &str, body: &str) -> OutboundReply {
        let text = if heading.is_empty() {
            format!("{}\n\n{}", body, self.t("nav.hint"))
        } else {
            format!("*{}*\n\n{}\n\n{}", heading, body, self.t("nav.hint"))
        };
        OutboundReply::text(text)
    }

    pub fn choices(&self, body: String, choices: &[Choice], render: Render, with_nav: bool) -> OutboundReply {
        if choices.is_empty() {
            return if with_nav {
                OutboundReply::text(format!("{}\n\n{}", body, self.t("nav.hint")))
            } else {
                OutboundReply::text(body)
            };
        }

        match render {
            Render::Text | Render::Media => {
                let mut text = body;
                text.push('\n');
                for (i, (_, title)) in choices.iter().enumerate() {
                    text.push_str(&format!("\n{}. {}", i + 1, title));
                }
                text.push_str(&format!("\n\n{}", self.t("nav.numbers")));
                if with_nav {
                    text.push_str(&format!("\n{}", self.t("nav.hint")));
                }
                OutboundReply::text(text)
            }
            Render::Buttons if choices.len() <= MAX_REPLY_BUTTONS => {
                let body = if with_nav { format!("{}\n\n{}", body, self.t("nav.hint")) } else { body };
                OutboundReply::Buttons {
                    body: truncate_utf8(&body, INTERACTIVE_BODY_MAX).to_string(),
                    buttons: choices
                        .iter()
                        .map(|(id, title)| ReplyButton {
                            id: id.clone(),
                            title: truncate_utf8(title, BUTTON_TITLE_MAX).to_string(),
                        })
                        .collect(),
                }
            }
            Render::Buttons | Render::List => self.list(body, choices, with_nav),
        }
    }

    fn list(&self, body: String, choices: &[Choice], with_nav: bool) -> OutboundReply {
        let room = list_room(!with_nav);
        let mut sections = vec![ListSection {
            title: truncate_utf8(&self.t("menu.options"), ROW_TITLE_MAX).to_string(),
            rows: choices.iter().take(room).map(|(id, title)| row(id, title)).collect(),
        }];
        if with_nav {
            sections.push(ListSection {
                title: truncate_utf8(&self.t("nav.section"), ROW_TITLE_MAX).to_string(),
                rows: vec![row(NAV_BACK_ID, &self.t("nav.back")), row(NAV_MAIN_ID, &self.t("nav.main"))],
            });
        }
        sections.truncate(MAX_LIST_SECTIONS);
        OutboundReply::List {
            body: truncate_utf8(&body, INTERACTIVE_BODY_MAX).to_string(),
            button_label: truncate_utf8(&self.t("menu.choose"), BUTTON_TITLE_MAX).to_string(),
            sections,
        }
    }
}

fn row(id: &str, title: &str) -> ListRow {
    // Titles that do not fit keep their full text in the description.
    let fits = title.chars().count() <= ROW_TITLE_MAX;
    ListRow {
        id: id.to_string(),
        title: truncate_utf8(title, ROW_TITLE_MAX).to_string(),
        description: (!fits).then(|| truncate_utf8(title, ROW_DESCRIPTION_MAX).to_string()),
    }
}
