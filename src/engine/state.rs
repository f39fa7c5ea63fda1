// engine/state.rs — Shared engine state and the per-event pipeline.
// Engine owns the menu catalog, the session store, the collaborators and one
// resilience guard per collaborator. Everything else borrows it per event
// through a Turn.

use crate::atoms::constants::ONBOARDING_FIRST_NODE;
use crate::atoms::error::EngineResult;
use crate::atoms::traits::{Calculator, Geocoder, PaymentGateway, ReplySender, SessionBackend, TextGenerator, Translator};
use crate::atoms::types::{
    truncate_utf8, CanonicalEvent, GeoPoint, MalformedEvent, Normalized, Outbound, OutboundReply, Session,
    Subscription,
};
use crate::engine::config::{ConversationConfig, ResilienceConfig};
use crate::engine::dispatcher;
use crate::engine::menu::{MenuCatalog, MenuSet, MenuTree};
use crate::engine::navigator::Navigator;
use crate::engine::normalizer::normalize;
use crate::engine::render::Renderer;
use crate::engine::resilience::{Guard, LastKnown};
use crate::engine::sessions::SessionStore;
use crate::engine::whatsapp::sender::split_reply;
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::sync::Arc;

/// Entries kept per last-known-good cache.
const LAST_KNOWN_CAPACITY: usize = 4096;

// ── Settings ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub session_timeout_secs: i64,
    pub navigation_depth: usize,
    pub default_locale: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&ConversationConfig::default())
    }
}

impl EngineSettings {
    pub fn from_config(cfg: &ConversationConfig) -> Self {
        Self {
            session_timeout_secs: cfg.session_timeout_secs,
            navigation_depth: cfg.navigation_depth,
            default_locale: cfg.default_locale.clone(),
        }
    }
}

// ── Collaborators ──────────────────────────────────────────────────────────

pub struct Services {
    pub translator: Arc<dyn Translator>,
    pub calculator: Arc<dyn Calculator>,
    pub payments: Arc<dyn PaymentGateway>,
    pub geocoder: Arc<dyn Geocoder>,
    pub generator: Arc<dyn TextGenerator>,
    pub sender: Arc<dyn ReplySender>,
}

/// One guard per collaborator, so one outage never trips another's breaker.
pub struct Guards {
    pub calculation: Guard,
    pub payments: Guard,
    pub geocoding: Guard,
    pub generation: Guard,
    pub delivery: Guard,
}

impl Guards {
    pub fn from_config(cfg: &ResilienceConfig) -> Self {
        let guard = |name: &str| Guard::new(name, cfg.policy(), cfg.breaker_threshold, cfg.cooldown());
        Self {
            calculation: guard("calculation"),
            payments: guard("payments"),
            geocoding: guard("geocoding"),
            generation: guard("generation"),
            delivery: guard("delivery"),
        }
    }
}

impl Default for Guards {
    fn default() -> Self {
        Self::from_config(&ResilienceConfig::default())
    }
}

// ── Engine ─────────────────────────────────────────────────────────────────

pub struct Engine {
    catalog: MenuCatalog,
    store: SessionStore,
    pub services: Services,
    pub guards: Guards,
    pub settings: EngineSettings,
    /// Last live calculation result per (kind, input).
    pub calc_cache: LastKnown<String, Value>,
    /// Last live geocoding answer per lowercased place name.
    pub geo_cache: LastKnown<String, GeoPoint>,
}

impl Engine {
    pub fn new(
        menus: MenuSet,
        backend: Arc<dyn SessionBackend>,
        services: Services,
        guards: Guards,
        settings: EngineSettings,
    ) -> Self {
        info!(
            "[engine] Ready: {} menu nodes, depth {}, timeout {}s, locale '{}'",
            menus.tree.nodes().count(),
            settings.navigation_depth,
            settings.session_timeout_secs,
            settings.default_locale
        );
        Self {
            catalog: MenuCatalog::new(menus),
            store: SessionStore::new(backend),
            services,
            guards,
            settings,
            calc_cache: LastKnown::new(LAST_KNOWN_CAPACITY),
            geo_cache: LastKnown::new(LAST_KNOWN_CAPACITY),
        }
    }

    pub fn menus(&self) -> Arc<MenuSet> {
        self.catalog.snapshot()
    }

    /// Swap tree and registry. Events already in flight finish on the old set.
    pub fn reload_menus(&self, set: MenuSet) {
        self.catalog.swap(set);
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub async fn process_event(&self, event: &CanonicalEvent) -> Option<OutboundReply> {
        self.process_event_at(event, Utc::now()).await
    }

    /// Load → route → persist for one event, under the user's lease.
    /// `None` means the message id was already processed; nothing is sent.
    pub async fn process_event_at(&self, event: &CanonicalEvent, now: DateTime<Utc>) -> Option<OutboundReply> {
        let menus = self.catalog.snapshot();
        let lease = self.store.acquire(&event.user_id).await;

        if let Some(id) = &event.message_id {
            match lease.is_processed(id) {
                Ok(true) => {
                    info!("[engine] Duplicate delivery {} for {} ignored", id, event.user_id);
                    return None;
                }
                Ok(false) => {}
                Err(e) => {
                    error!("[engine] Dedupe lookup failed for {}: {}", event.user_id, e);
                    return Some(self.apology(&self.settings.default_locale));
                }
            }
        }

        let (mut session, created) = match lease.load_or_create(&self.settings.default_locale, now) {
            Ok(pair) => pair,
            Err(e) => {
                error!("[engine] Session load failed for {}: {}", event.user_id, e);
                return Some(self.apology(&self.settings.default_locale));
            }
        };

        self.refresh_tier(&mut session, now).await;

        let turn = Turn { engine: self, menus: &menus, now, created };
        let nav = turn.navigator();
        repair_position(&menus.tree, &nav, &mut session);

        // Onboarding never times out; an abandoned profile resumes where it stopped.
        let expired = !created
            && session.profile_complete
            && session.is_expired(now, self.settings.session_timeout_secs);
        if expired {
            info!("[engine] Session of {} expired; back to main menu", event.user_id);
            nav.main_menu(&mut session);
        }

        debug!(
            "[engine] {} {} at '{}'",
            event.user_id,
            event.kind.label(),
            session.current_node
        );
        let mut reply = dispatcher::route(&turn, event, &mut session).await;
        if expired {
            reply = reply.prepend_notice(&turn.renderer(&session).t("reply.session_expired"));
        }
        session.touch(now);

        if let Err(e) = menus.tree.check_session(&session) {
            error!("[engine] Refusing to persist inconsistent session for {}: {}", event.user_id, e);
            return Some(self.apology(&session.preferred_language));
        }
        if let Err(e) = lease.save(&session, event.message_id.as_deref()) {
            error!("[engine] Session save failed for {}: {}", event.user_id, e);
            return Some(self.apology(&session.preferred_language));
        }
        Some(reply)
    }

    /// "Could not understand" for a payload we could not normalize. Reads the
    /// session for its locale but never writes.
    pub async fn reply_malformed(&self, event: &MalformedEvent) -> Option<Outbound> {
        let user_id = event.user_id.as_deref()?;
        let lease = self.store.acquire(user_id).await;
        let locale = match lease.load() {
            Ok(Some(s)) => s.preferred_language,
            Ok(None) => self.settings.default_locale.clone(),
            Err(e) => {
                warn!("[engine] Could not read session of {} for malformed reply: {}", user_id, e);
                self.settings.default_locale.clone()
            }
        };
        let text = self.services.translator.translate("reply.could_not_understand", &locale, &[]);
        Some(Outbound { to: user_id.to_string(), reply: OutboundReply::text(text) })
    }

    /// Send through the delivery guard, one guarded call per message so a
    /// retry never repeats parts the user already has. The first part that
    /// cannot be delivered drops the rest; it is logged.
    pub async fn deliver(&self, to: &str, reply: &OutboundReply) {
        let parts = split_reply(reply);
        let total = parts.len();
        for (i, part) in parts.iter().enumerate() {
            let sender = Arc::clone(&self.services.sender);
            let result: EngineResult<()> = self
                .guards
                .delivery
                .run(|| {
                    let sender = Arc::clone(&sender);
                    async move { sender.send(to, part).await }
                })
                .await;
            if let Err(e) = result {
                error!(
                    "[engine] Dropping reply to {} at part {}/{} ({}): {}",
                    to,
                    i + 1,
                    total,
                    truncate_utf8(part.body(), 60),
                    e
                );
                return;
            }
        }
    }

    /// Normalize a webhook payload and process its messages. Users run
    /// concurrently; one user's messages queue on that user's lease in
    /// payload order.
    pub async fn handle_payload(&self, payload: &Value) -> usize {
        let items = normalize(payload);
        let count = items.len();
        let jobs = items.into_iter().map(|item| async move {
            match item {
                Normalized::Event(event) => {
                    if let Some(reply) = self.process_event(&event).await {
                        self.deliver(&event.user_id, &reply).await;
                    }
                }
                Normalized::Malformed(bad) => {
                    warn!("[engine] Malformed message ({:?}): {}", bad.message_id, bad.reason);
                    if let Some(out) = self.reply_malformed(&bad).await {
                        self.deliver(&out.to, &out.reply).await;
                    }
                }
            }
        });
        futures::future::join_all(jobs).await;
        count
    }

    fn apology(&self, locale: &str) -> OutboundReply {
        OutboundReply::text(self.services.translator.translate("reply.apology", locale, &[]))
    }

    /// Current tier from the payment collaborator; the stored tier when it is down.
    async fn refresh_tier(&self, session: &mut Session, now: DateTime<Utc>) {
        let payments = Arc::clone(&self.services.payments);
        let user_id = session.user_id.clone();
        let stored = session.subscription_tier;
        let status = self
            .guards
            .payments
            .call(
                || {
                    let payments = Arc::clone(&payments);
                    let user_id = user_id.clone();
                    async move { payments.status(&user_id).await }
                },
                || Subscription { tier: stored, expires_at: None },
            )
            .await;
        let tier = status.value.effective_tier(now);
        if tier != stored {
            info!("[engine] {} tier {} → {}", session.user_id, stored.as_str(), tier.as_str());
        }
        session.subscription_tier = tier;
    }
}

/// Sessions persisted against an older menu definition may point at a node
/// that no longer exists.
fn repair_position(tree: &MenuTree, nav: &Navigator<'_>, session: &mut Session) {
    let valid = tree.contains(&session.current_node)
        && (session.profile_complete || tree.is_onboarding(&session.current_node));
    if valid {
        return;
    }
    warn!("[engine] {} was at unknown node '{}'; repositioning", session.user_id, session.current_node);
    if session.profile_complete {
        nav.main_menu(session);
    } else {
        session.navigation_stack.clear();
        nav.set_position(session, ONBOARDING_FIRST_NODE);
    }
}

// ── Turn ───────────────────────────────────────────────────────────────────

/// Everything a handler needs for one event.
pub struct Turn<'a> {
    pub engine: &'a Engine,
    pub menus: &'a MenuSet,
    pub now: DateTime<Utc>,
    /// The session was created by this event.
    pub created: bool,
}

impl<'a> Turn<'a> {
    pub fn renderer(&self, session: &Session) -> Renderer<'a> {
        Renderer::new(self.engine.services.translator.as_ref(), &session.preferred_language)
    }

    pub fn navigator(&self) -> Navigator<'a> {
        Navigator::new(self.menus, self.engine.settings.navigation_depth)
    }

    pub fn tree(&self) -> &'a MenuTree {
        &self.menus.tree
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }

    /// Re-render the session's current node.
    pub fn current(&self, session: &Session) -> OutboundReply {
        let r = self.renderer(session);
        match self.tree().node(&session.current_node) {
            Some(node) => r.node(self.tree(), node, session.subscription_tier),
            None => OutboundReply::text(r.t("reply.apology")),
        }
    }
}
