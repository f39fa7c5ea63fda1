// ── Astro Atoms: Constants ─────────────────────────────────────────────────
// All named constants for the crate live here.

// ── Conversation defaults ──────────────────────────────────────────────────

/// Maximum number of entries kept on a session's navigation stack.
/// At capacity the oldest entry is dropped.
pub const DEFAULT_NAVIGATION_DEPTH: usize = 10;

/// Idle time after which the next event resets the session to the menu root.
pub const DEFAULT_SESSION_TIMEOUT_SECS: i64 = 30 * 60;

/// Locale used on first contact and as translation fallback.
pub const DEFAULT_LOCALE: &str = "en";

/// Locales the onboarding language step offers.
pub const SUPPORTED_LOCALES: &[&str] = &["en", "es", "hi"];

// ── Onboarding entry point ─────────────────────────────────────────────────
// A freshly created session is parked on the first onboarding prompt.
// Changing these ids orphans sessions persisted mid-onboarding.
pub const ONBOARDING_FIRST_NODE: &str = "onboarding.birth_date";
pub const ONBOARDING_FIRST_FIELD: &str = "awaiting-birth-date";

// ── Reserved navigation ids ────────────────────────────────────────────────
// Structural ids carried by the Back / Main menu buttons and list rows.
pub const NAV_BACK_ID: &str = "nav.back";
pub const NAV_MAIN_ID: &str = "nav.main";

/// Free-text keywords that mean "back".
pub const BACK_KEYWORDS: &[&str] = &["back", "0", "volver", "वापस"];

/// Free-text keywords that mean "main menu". Greetings land here too once
/// the profile is complete.
pub const MAIN_MENU_KEYWORDS: &[&str] = &["menu", "main menu", "home", "hi", "hello", "hola", "start", "नमस्ते"];

// ── Provider constraints (WhatsApp Cloud API) ──────────────────────────────

/// Reply buttons per interactive message.
pub const MAX_REPLY_BUTTONS: usize = 3;
/// Sections per interactive list.
pub const MAX_LIST_SECTIONS: usize = 10;
/// Rows per list section.
pub const MAX_LIST_ROWS: usize = 10;
/// Reply button title length (characters).
pub const BUTTON_TITLE_MAX: usize = 20;
/// List row title length (characters).
pub const ROW_TITLE_MAX: usize = 24;
/// List row description length (characters).
pub const ROW_DESCRIPTION_MAX: usize = 72;
/// Text message body length (characters). Longer replies are split.
pub const TEXT_BODY_MAX: usize = 4096;
/// Interactive message body length (characters).
pub const INTERACTIVE_BODY_MAX: usize = 1024;
/// Media caption length (characters).
pub const MEDIA_CAPTION_MAX: usize = 1024;

// ── Resilience defaults ────────────────────────────────────────────────────

/// Retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// First retry delay; doubles per attempt.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
/// Upper bound for a single backoff delay.
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;
/// Per-attempt deadline.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;
/// Consecutive failed calls before a breaker opens.
pub const DEFAULT_BREAKER_THRESHOLD: u32 = 5;
/// How long an open breaker fails fast.
pub const DEFAULT_BREAKER_COOLDOWN_SECS: u64 = 60;

// ── Housekeeping ───────────────────────────────────────────────────────────

/// Processed message ids older than this are pruned on startup.
pub const PROCESSED_MESSAGE_RETENTION_DAYS: i64 = 7;
