// End-to-end conversation tests: real SQLite store (in memory or on disk),
// built-in menu and translations, stub collaborators.

use astro_engine::atoms::constants::{NAV_BACK_ID, ONBOARDING_FIRST_FIELD, ONBOARDING_FIRST_NODE};
use astro_engine::atoms::error::{EngineError, EngineResult};
use astro_engine::atoms::traits::{Calculator, Geocoder, ReplySender, SessionBackend, TextGenerator};
use astro_engine::atoms::types::{
    CanonicalEvent, EventKind, GeoPoint, MalformedEvent, OutboundReply, Session, SubscriptionTier,
};
use astro_engine::engine::collaborators::LocalCalculator;
use astro_engine::engine::resilience::{BreakerState, Guard, RetryPolicy};
use astro_engine::engine::translations::Catalog;
use astro_engine::{Engine, EngineSettings, Guards, MenuSet, Services, SqliteStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

// ── Stub collaborators ─────────────────────────────────────────────────────

/// Echoes the action kind and any field input.
struct EchoCalculator {
    calls: AtomicU32,
}

#[async_trait]
impl Calculator for EchoCalculator {
    async fn compute(&self, kind: &str, input: &Value) -> EngineResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if kind == "profile_categories" {
            return LocalCalculator.compute(kind, input).await;
        }
        let extra = input.get("input").and_then(Value::as_str).unwrap_or("-");
        Ok(json!({ "text": format!("result:{}:{}", kind, extra) }))
    }
}

/// Succeeds `healthy_calls` times, then fails with a transient error.
struct FlakyCalculator {
    calls: AtomicU32,
    healthy_calls: u32,
}

#[async_trait]
impl Calculator for FlakyCalculator {
    async fn compute(&self, kind: &str, _input: &Value) -> EngineResult<Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.healthy_calls {
            Ok(json!({ "text": format!("live {}", kind) }))
        } else {
            Err(EngineError::collaborator("calculation", "HTTP 503", true))
        }
    }
}

/// Sleeps before answering so concurrent events overlap.
struct SlowCalculator;

#[async_trait]
impl Calculator for SlowCalculator {
    async fn compute(&self, kind: &str, _input: &Value) -> EngineResult<Value> {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        Ok(json!({ "text": kind }))
    }
}

struct FixedGeocoder;

#[async_trait]
impl Geocoder for FixedGeocoder {
    async fn locate(&self, place: &str) -> EngineResult<Option<GeoPoint>> {
        if place.eq_ignore_ascii_case("atlantis") {
            return Ok(None);
        }
        Ok(Some(GeoPoint {
            latitude: 19.076,
            longitude: 72.8777,
            display_name: format!("{}, India", place),
            timezone: Some("Asia/Kolkata".into()),
        }))
    }
}

struct DownGeocoder;

#[async_trait]
impl Geocoder for DownGeocoder {
    async fn locate(&self, _place: &str) -> EngineResult<Option<GeoPoint>> {
        Err(EngineError::collaborator("geocoding", "HTTP 502", true))
    }
}

struct CannedGenerator;

#[async_trait]
impl TextGenerator for CannedGenerator {
    async fn generate(&self, _system: &str, prompt: &str) -> EngineResult<String> {
        Ok(format!("The stars say yes to: {}", prompt))
    }
}

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, OutboundReply)>>,
}

#[async_trait]
impl ReplySender for RecordingSender {
    async fn send(&self, to: &str, reply: &OutboundReply) -> EngineResult<()> {
        self.sent.lock().push((to.to_string(), reply.clone()));
        Ok(())
    }
}

/// Fails the first attempt at the `fail_at`-th message, then records everything.
struct StutteringSender {
    attempts: AtomicU32,
    fail_at: u32,
    sent: Mutex<Vec<OutboundReply>>,
}

#[async_trait]
impl ReplySender for StutteringSender {
    async fn send(&self, _to: &str, reply: &OutboundReply) -> EngineResult<()> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_at {
            return Err(EngineError::collaborator("delivery", "HTTP 500", true));
        }
        self.sent.lock().push(reply.clone());
        Ok(())
    }
}

/// Session backend that records the order of loads and saves.
struct RecordingBackend {
    inner: Arc<SqliteStore>,
    ops: Mutex<Vec<&'static str>>,
}

impl SessionBackend for RecordingBackend {
    fn load(&self, user_id: &str) -> EngineResult<Option<Session>> {
        self.ops.lock().push("load");
        self.inner.load(user_id)
    }

    fn save(&self, session: &Session, message_id: Option<&str>) -> EngineResult<()> {
        self.ops.lock().push("save");
        self.inner.save(session, message_id)
    }

    fn is_processed(&self, message_id: &str) -> EngineResult<bool> {
        self.inner.is_processed(message_id)
    }
}

/// Reads work, writes fail.
struct ReadOnlyBackend;

impl SessionBackend for ReadOnlyBackend {
    fn load(&self, _user_id: &str) -> EngineResult<Option<Session>> {
        Ok(None)
    }

    fn save(&self, _session: &Session, _message_id: Option<&str>) -> EngineResult<()> {
        Err(EngineError::Store("disk full".into()))
    }

    fn is_processed(&self, _message_id: &str) -> EngineResult<bool> {
        Ok(false)
    }
}

// ── Harness ────────────────────────────────────────────────────────────────

fn fast_guard(name: &str) -> Guard {
    let policy = RetryPolicy {
        timeout: std::time::Duration::from_secs(2),
        max_retries: 0,
        base_delay: std::time::Duration::ZERO,
        max_delay: std::time::Duration::ZERO,
    };
    Guard::new(name, policy, 5, std::time::Duration::from_secs(60))
}

fn fast_guards() -> Guards {
    Guards {
        calculation: fast_guard("calculation"),
        payments: fast_guard("payments"),
        geocoding: fast_guard("geocoding"),
        generation: fast_guard("generation"),
        delivery: fast_guard("delivery"),
    }
}

struct Harness {
    engine: Arc<Engine>,
    store: Arc<SqliteStore>,
    sender: Arc<RecordingSender>,
    next_id: AtomicU64,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

fn build(
    store: Arc<SqliteStore>,
    backend: Arc<dyn SessionBackend>,
    calculator: Arc<dyn Calculator>,
    geocoder: Arc<dyn Geocoder>,
) -> Harness {
    let sender = Arc::new(RecordingSender::default());
    let services = Services {
        translator: Arc::new(Catalog::builtin("en").unwrap()),
        calculator,
        payments: store.clone(),
        geocoder,
        generator: Arc::new(CannedGenerator),
        sender: sender.clone(),
    };
    let engine = Engine::new(
        MenuSet::builtin().unwrap(),
        backend,
        services,
        fast_guards(),
        EngineSettings::default(),
    );
    Harness { engine: Arc::new(engine), store, sender, next_id: AtomicU64::new(1) }
}

fn harness_with(calculator: Arc<dyn Calculator>, geocoder: Arc<dyn Geocoder>) -> Harness {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    build(store.clone(), store, calculator, geocoder)
}

fn harness() -> Harness {
    harness_with(Arc::new(EchoCalculator { calls: AtomicU32::new(0) }), Arc::new(FixedGeocoder))
}

impl Harness {
    fn event(&self, user: &str, kind: EventKind) -> CanonicalEvent {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        CanonicalEvent {
            message_id: Some(format!("wamid.{}", n)),
            user_id: user.to_string(),
            display_name: None,
            timestamp: None,
            kind,
        }
    }

    async fn send_at(&self, user: &str, kind: EventKind, now: DateTime<Utc>) -> OutboundReply {
        let event = self.event(user, kind);
        self.engine
            .process_event_at(&event, now)
            .await
            .expect("fresh message id is never a duplicate")
    }

    async fn text(&self, user: &str, body: &str) -> OutboundReply {
        self.send_at(user, EventKind::Text { body: body.into() }, t0()).await
    }

    async fn button(&self, user: &str, id: &str) -> OutboundReply {
        self.send_at(user, EventKind::ButtonReply { id: id.into(), label: id.into() }, t0()).await
    }

    fn session(&self, user: &str) -> Session {
        self.store.get_session(user).unwrap().expect("session exists")
    }

    /// A user who finished onboarding, standing at `node`.
    fn seed(&self, user: &str, node: &str, stack: &[&str]) {
        let mut s = Session::new_default(user, "en", t0());
        s.profile_complete = true;
        s.current_node = node.to_string();
        s.navigation_stack = stack.iter().map(|n| n.to_string()).collect();
        s.pending_input = None;
        s.profile.birth_date = NaiveDate::from_ymd_opt(1990, 8, 15);
        s.profile.birth_place = Some("Mumbai".into());
        self.store.put_session(&s, None).unwrap();
    }
}

// ── Onboarding ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn new_user_is_welcomed_and_asked_for_birth_date() {
    let h = harness();
    let reply = h.text("15550001", "hello").await;
    assert!(reply.body().contains("Welcome"), "{:?}", reply);
    assert!(reply.body().contains("date of birth"), "{:?}", reply);

    let s = h.session("15550001");
    assert!(!s.profile_complete);
    assert_eq!(s.current_node, ONBOARDING_FIRST_NODE);
    assert_eq!(s.pending_input.as_deref(), Some(ONBOARDING_FIRST_FIELD));
}

#[tokio::test]
async fn full_onboarding_lands_on_main_menu_with_attributes() {
    let h = harness();
    let user = "15550002";
    h.text(user, "hi").await;
    h.text(user, "15/08/1990").await;
    h.text(user, "6:30 pm").await;
    h.text(user, "Mumbai").await;
    h.button(user, "lang.en").await;
    let reply = h.text(user, "yes").await;

    assert!(reply.body().contains("Your profile is ready"), "{:?}", reply);
    assert!(reply.body().contains("Sun sign: Leo"), "{:?}", reply);

    let s = h.session(user);
    assert!(s.profile_complete);
    assert_eq!(s.current_node, "main");
    assert!(s.navigation_stack.is_empty());
    assert_eq!(s.pending_input, None);
    assert_eq!(s.attributes.get("sun_sign").map(String::as_str), Some("Leo"));
    assert_eq!(s.profile.timezone.as_deref(), Some("Asia/Kolkata"));
    assert_eq!(s.profile.birth_time.map(|t| t.to_string()).as_deref(), Some("18:30:00"));
}

#[tokio::test]
async fn invalid_onboarding_input_reprompts_same_step() {
    let h = harness();
    let user = "15550003";
    h.text(user, "hello").await;
    let reply = h.text(user, "next tuesday").await;
    assert!(reply.body().contains("DD/MM/YYYY"), "{:?}", reply);
    assert_eq!(h.session(user).current_node, ONBOARDING_FIRST_NODE);

    h.text(user, "15/08/1990").await;
    assert_eq!(h.session(user).current_node, "onboarding.birth_time");
    // Back returns to the date step.
    h.text(user, "back").await;
    assert_eq!(h.session(user).current_node, ONBOARDING_FIRST_NODE);
}

#[tokio::test]
async fn unknown_place_is_asked_again_and_outage_keeps_the_name() {
    let h = harness();
    let user = "15550004";
    h.text(user, "hello").await;
    h.text(user, "15/08/1990").await;
    h.text(user, "unknown").await;
    let reply = h.text(user, "Atlantis").await;
    assert!(reply.body().contains("could not find that place"), "{:?}", reply);
    assert_eq!(h.session(user).current_node, "onboarding.birth_place");

    let h = harness_with(Arc::new(LocalCalculator), Arc::new(DownGeocoder));
    h.text(user, "hello").await;
    h.text(user, "15/08/1990").await;
    h.text(user, "unknown").await;
    h.text(user, "Pune").await;
    let s = h.session(user);
    assert_eq!(s.current_node, "onboarding.language");
    assert_eq!(s.profile.birth_place.as_deref(), Some("Pune"));
    assert_eq!(s.profile.timezone.as_deref(), Some("UTC"));
}

// ── Navigation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn back_round_trip_and_back_at_root() {
    let h = harness();
    let user = "15550010";
    h.seed(user, "main", &[]);

    h.text(user, "horoscope").await;
    let s = h.session(user);
    assert_eq!(s.current_node, "horoscopes");
    assert_eq!(s.navigation_stack, vec!["main".to_string()]);

    h.button(user, NAV_BACK_ID).await;
    let s = h.session(user);
    assert_eq!(s.current_node, "main");
    assert!(s.navigation_stack.is_empty());

    // Back with an empty stack stays at the root.
    let reply = h.text(user, "back").await;
    let s = h.session(user);
    assert_eq!(s.current_node, "main");
    assert!(s.navigation_stack.is_empty());
    assert!(reply.body().contains("What would you like to explore"), "{:?}", reply);
}

#[tokio::test]
async fn unresolved_or_gated_selection_changes_nothing() {
    let h = harness();
    let user = "15550011";
    h.seed(user, "main", &[]);
    let before = h.session(user);

    // Not a child of the main menu.
    let reply = h.button(user, "horoscope.weekly").await;
    assert!(reply.body().contains("not available"), "{:?}", reply);
    let after = h.session(user);
    assert_eq!(after.current_node, before.current_node);
    assert_eq!(after.navigation_stack, before.navigation_stack);
    assert_eq!(after.pending_input, before.pending_input);

    // A child, but above the free tier.
    h.text(user, "horoscope").await;
    h.button(user, "horoscope.weekly").await;
    assert_eq!(h.session(user).current_node, "horoscopes");
}

#[tokio::test]
async fn paid_tier_unlocks_gated_actions() {
    let h = harness();
    let user = "15550012";
    h.seed(user, "horoscopes", &["main"]);
    h.store.upsert_subscription(user, SubscriptionTier::Essential, None).unwrap();

    let reply = h.button(user, "horoscope.weekly").await;
    assert!(reply.body().contains("result:weekly_horoscope"), "{:?}", reply);
    let s = h.session(user);
    assert_eq!(s.subscription_tier, SubscriptionTier::Essential);
    assert_eq!(s.current_node, "horoscopes");
}

#[tokio::test]
async fn global_prompt_accepts_input_then_returns() {
    let h = harness();
    let user = "15550013";
    h.seed(user, "settings", &["main"]);

    h.text(user, "compatibility").await;
    let s = h.session(user);
    assert_eq!(s.current_node, "compatibility");
    assert_eq!(s.pending_input.as_deref(), Some("awaiting-partner-birth-date"));

    let reply = h.text(user, "someday").await;
    assert!(reply.body().contains("DD/MM/YYYY"), "{:?}", reply);
    assert_eq!(h.session(user).current_node, "compatibility");

    let reply = h.text(user, "01/02/1992").await;
    assert!(reply.body().contains("result:compatibility:1992-02-01"), "{:?}", reply);
    let s = h.session(user);
    assert_eq!(s.current_node, "settings");
    assert_eq!(s.pending_input, None);
}

#[tokio::test]
async fn language_switch_changes_reply_locale() {
    let h = harness();
    let user = "15550014";
    h.seed(user, "settings", &["main"]);
    h.text(user, "language").await;
    h.button(user, "lang.es").await;
    assert_eq!(h.session(user).preferred_language, "es");
}

#[tokio::test]
async fn expired_session_restarts_at_main_menu() {
    let h = harness();
    let user = "15550015";
    h.seed(user, "charts", &["main"]);
    let later = t0() + Duration::hours(2);
    let reply = h.send_at(user, EventKind::Text { body: "menu".into() }, later).await;
    assert!(reply.body().contains("session expired"), "{:?}", reply);
    let s = h.session(user);
    assert_eq!(s.current_node, "main");
    assert!(s.navigation_stack.is_empty());
    assert_eq!(s.last_activity_at, later);
}

#[tokio::test]
async fn media_and_unsupported_messages_keep_position() {
    let h = harness();
    let user = "15550016";
    h.seed(user, "charts", &["main"]);
    let reply = h
        .send_at(user, EventKind::Media { media_type: "image".into(), reference: "M1".into() }, t0())
        .await;
    assert!(reply.body().contains("attachments"), "{:?}", reply);
    let reply = h
        .send_at(user, EventKind::Unsupported { original_type: "reaction".into() }, t0())
        .await;
    assert!(reply.body().contains("not supported"), "{:?}", reply);
    assert_eq!(h.session(user).current_node, "charts");
}

// ── Resilience ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn failing_calculator_degrades_then_breaker_fails_fast() {
    let calc = Arc::new(FlakyCalculator { calls: AtomicU32::new(0), healthy_calls: 0 });
    let h = harness_with(calc.clone(), Arc::new(FixedGeocoder));
    let user = "15550020";
    h.seed(user, "horoscopes", &["main"]);

    for _ in 0..5 {
        let reply = h.text(user, "daily").await;
        assert!(reply.body().contains("temporarily unavailable"), "{:?}", reply);
    }
    assert_eq!(calc.calls.load(Ordering::SeqCst), 5);
    assert_eq!(h.engine.guards.calculation.breaker().state(), BreakerState::Open);

    // Open breaker: the collaborator is not called at all.
    let reply = h.text(user, "daily").await;
    assert!(reply.body().contains("temporarily unavailable"), "{:?}", reply);
    assert_eq!(calc.calls.load(Ordering::SeqCst), 5);
    assert_eq!(h.session(user).current_node, "horoscopes");
}

#[tokio::test]
async fn last_known_result_is_served_stale() {
    let calc = Arc::new(FlakyCalculator { calls: AtomicU32::new(0), healthy_calls: 1 });
    let h = harness_with(calc, Arc::new(FixedGeocoder));
    let user = "15550021";
    h.seed(user, "horoscopes", &["main"]);

    let live = h.text(user, "daily").await;
    assert!(live.body().contains("live daily_horoscope"), "{:?}", live);
    let stale = h.text(user, "daily").await;
    assert!(stale.body().contains("live daily_horoscope"), "{:?}", stale);
    assert!(stale.body().contains("last known result"), "{:?}", stale);
}

// ── Store ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_delivery_is_processed_once() {
    let h = harness();
    let user = "15550030";
    h.seed(user, "main", &[]);
    let event = h.event(user, EventKind::Text { body: "horoscope".into() });

    assert!(h.engine.process_event_at(&event, t0()).await.is_some());
    assert!(h.engine.process_event_at(&event, t0()).await.is_none());
    let s = h.session(user);
    assert_eq!(s.current_node, "horoscopes");
    assert_eq!(s.navigation_stack, vec!["main".to_string()]);
}

#[tokio::test]
async fn malformed_event_answers_without_touching_state() {
    let h = harness();
    let user = "15550031";
    h.seed(user, "charts", &["main"]);
    let before = h.session(user);

    let bad = MalformedEvent { user_id: Some(user.into()), message_id: Some("wamid.x".into()), reason: "no body".into() };
    let out = h.engine.reply_malformed(&bad).await.expect("reply for a known sender");
    assert_eq!(out.to, user);
    assert!(out.reply.body().contains("could not understand"));
    assert_eq!(h.session(user), before);

    // A redelivered malformed message gets the same answer and still writes nothing.
    let again = h.engine.reply_malformed(&bad).await.expect("reply for a known sender");
    assert_eq!(again, out);
    assert_eq!(h.session(user), before);

    let stranger = MalformedEvent { user_id: Some("15559999".into()), message_id: None, reason: "x".into() };
    assert!(h.engine.reply_malformed(&stranger).await.is_some());
    assert!(h.store.get_session("15559999").unwrap().is_none());

    let anonymous = MalformedEvent { user_id: None, message_id: None, reason: "x".into() };
    assert!(h.engine.reply_malformed(&anonymous).await.is_none());
}

#[tokio::test]
async fn store_failure_answers_with_apology() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let h = build(
        store,
        Arc::new(ReadOnlyBackend),
        Arc::new(LocalCalculator),
        Arc::new(FixedGeocoder),
    );
    let reply = h.text("15550032", "hello").await;
    assert!(reply.body().contains("Something went wrong"), "{:?}", reply);
}

#[tokio::test]
async fn same_user_events_are_serialized() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let backend = Arc::new(RecordingBackend { inner: store.clone(), ops: Mutex::new(Vec::new()) });
    let h = build(store, backend.clone(), Arc::new(SlowCalculator), Arc::new(FixedGeocoder));
    let user = "15550033";
    h.seed(user, "horoscopes", &["main"]);

    let first = h.event(user, EventKind::Text { body: "daily".into() });
    let second = h.event(user, EventKind::Text { body: "back".into() });
    let (a, b) = tokio::join!(
        h.engine.process_event_at(&first, t0()),
        h.engine.process_event_at(&second, t0())
    );
    assert!(a.is_some() && b.is_some());
    assert_eq!(*backend.ops.lock(), vec!["load", "save", "load", "save"]);

    // The second event saw the first one's state and went back from it.
    let s = h.session(user);
    assert_eq!(s.current_node, "main");
    assert!(s.navigation_stack.is_empty());
}

#[tokio::test]
async fn sessions_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.db");
    let user = "15550034";
    {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let h = build(store.clone(), store, Arc::new(LocalCalculator), Arc::new(FixedGeocoder));
        h.text(user, "hello").await;
        h.text(user, "15/08/1990").await;
    }
    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let h = build(store.clone(), store, Arc::new(LocalCalculator), Arc::new(FixedGeocoder));
    assert_eq!(h.session(user).current_node, "onboarding.birth_time");
    let reply = h.text(user, "07:45").await;
    assert!(reply.body().contains("Where were you born"), "{:?}", reply);
}

// ── Webhook payload ────────────────────────────────────────────────────────

#[tokio::test]
async fn webhook_payload_is_answered_through_the_sender() {
    let h = harness();
    let payload = json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "WABA",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "contacts": [{ "wa_id": "15550040", "profile": { "name": "Asha" } }],
                    "messages": [
                        { "from": "15550040", "id": "wamid.A", "timestamp": "1767225600", "type": "text", "text": { "body": "hello" } },
                        { "from": "15550041", "id": "wamid.B", "type": "text", "text": {} }
                    ]
                }
            }]
        }]
    });

    assert_eq!(h.engine.handle_payload(&payload).await, 2);
    let sent = h.sender.sent.lock().clone();
    assert_eq!(sent.len(), 2);
    let welcome = sent.iter().find(|(to, _)| to == "15550040").expect("reply to the valid message");
    assert!(welcome.1.body().contains("Welcome"));
    let confused = sent.iter().find(|(to, _)| to == "15550041").expect("reply to the malformed message");
    assert!(confused.1.body().contains("could not understand"));
    assert!(h.store.get_session("15550041").unwrap().is_none());
}

#[tokio::test]
async fn long_reply_retry_resends_only_the_failed_part() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let sender = Arc::new(StutteringSender { attempts: AtomicU32::new(0), fail_at: 2, sent: Mutex::new(Vec::new()) });
    let services = Services {
        translator: Arc::new(Catalog::builtin("en").unwrap()),
        calculator: Arc::new(LocalCalculator),
        payments: store.clone(),
        geocoder: Arc::new(FixedGeocoder),
        generator: Arc::new(CannedGenerator),
        sender: sender.clone(),
    };
    let retrying = RetryPolicy {
        timeout: std::time::Duration::from_secs(2),
        max_retries: 2,
        base_delay: std::time::Duration::ZERO,
        max_delay: std::time::Duration::ZERO,
    };
    let guards = Guards { delivery: Guard::new("delivery", retrying, 5, std::time::Duration::from_secs(60)), ..fast_guards() };
    let engine = Engine::new(MenuSet::builtin().unwrap(), store.clone(), services, guards, EngineSettings::default());

    let body = format!("{}\n\n{}\n\n{}", "a".repeat(4000), "b".repeat(4000), "c".repeat(100));
    engine.deliver("15550040", &OutboundReply::text(body)).await;

    let sent = sender.sent.lock().clone();
    assert_eq!(sender.attempts.load(Ordering::SeqCst), 4);
    assert_eq!(sent.len(), 3);
    assert!(sent[0].body().starts_with('a'));
    assert!(sent[1].body().starts_with('b'));
    assert!(sent[2].body().starts_with('c'));
}
