// ── Astro Engine: Configuration ────────────────────────────────────────────
// One TOML file, every field defaulted. Secrets can also come from the
// environment (see main.rs); nothing secret is ever logged.

use crate::atoms::constants::*;
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::resilience::RetryPolicy;
use crate::engine::whatsapp::WhatsAppConfig;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub whatsapp: WhatsAppConfig,
    pub conversation: ConversationConfig,
    pub resilience: ResilienceConfig,
    pub collaborators: CollaboratorConfig,
    pub storage: StorageConfig,
}

// ── Webhook server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind — "127.0.0.1" behind a reverse proxy, "0.0.0.0" otherwise
    pub bind_address: String,
    pub port: u16,
    /// Max requests per IP per minute (0 = unlimited)
    pub rate_limit_per_minute: u32,
    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            port: 8088,
            rate_limit_per_minute: 600,
            max_body_bytes: 1024 * 1024,
        }
    }
}

// ── Conversation ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub session_timeout_secs: i64,
    pub navigation_depth: usize,
    pub default_locale: String,
    /// Menu definition file; the built-in tree is used when unset.
    pub menu_path: Option<PathBuf>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            navigation_depth: DEFAULT_NAVIGATION_DEPTH,
            default_locale: DEFAULT_LOCALE.into(),
            menu_path: None,
        }
    }
}

// ── Resilience ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            breaker_cooldown_secs: DEFAULT_BREAKER_COOLDOWN_SECS,
        }
    }
}

impl ResilienceConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(MAX_RETRY_DELAY_MS),
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }
}

// ── Collaborators ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    /// Calculation service base URL. Unset = offline calculator only.
    pub calculation_url: Option<String>,
    pub geocoder_url: String,
    /// Nominatim's usage policy requires an identifying User-Agent.
    pub geocoder_user_agent: String,
    pub generation: GenerationConfig,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            calculation_url: None,
            geocoder_url: "https://nominatim.openstreetmap.org".into(),
            geocoder_user_agent: "astro-engine/0.1".into(),
            generation: GenerationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// OpenAI-compatible base URL (…/v1)
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            model: "gpt-4o-mini".into(),
        }
    }
}

// ── Storage ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Configured path, or `<data dir>/astro-engine/engine.db`.
    pub fn resolved_path(&self) -> PathBuf {
        match &self.database_path {
            Some(p) => p.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("astro-engine")
                .join("engine.db"),
        }
    }
}

// ── Loading ────────────────────────────────────────────────────────────

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        match path {
            Some(p) => {
                info!("[config] Loading {:?}", p);
                let text = std::fs::read_to_string(p)?;
                Self::from_toml_str(&text)
            }
            None => {
                info!("[config] No config file given — using defaults");
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.conversation.navigation_depth == 0 {
            return Err(EngineError::Config("conversation.navigation_depth must be at least 1".into()));
        }
        if self.conversation.session_timeout_secs <= 0 {
            return Err(EngineError::Config("conversation.session_timeout_secs must be positive".into()));
        }
        if !SUPPORTED_LOCALES.contains(&self.conversation.default_locale.as_str()) {
            return Err(EngineError::Config(format!(
                "conversation.default_locale '{}' is not one of {:?}",
                self.conversation.default_locale, SUPPORTED_LOCALES
            )));
        }
        if self.resilience.timeout_ms == 0 {
            return Err(EngineError::Config("resilience.timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.server.port, 8088);
        assert_eq!(cfg.conversation.navigation_depth, 10);
        assert_eq!(cfg.resilience.max_retries, 3);
        assert_eq!(cfg.resilience.breaker_threshold, 5);
        assert!(cfg.collaborators.calculation_url.is_none());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg = EngineConfig::from_toml_str(
            r#"
            [server]
            port = 9000

            [conversation]
            session_timeout_secs = 600
            default_locale = "es"

            [whatsapp]
            phone_number_id = "1234"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.bind_address, "127.0.0.1");
        assert_eq!(cfg.conversation.session_timeout_secs, 600);
        assert_eq!(cfg.conversation.default_locale, "es");
        assert_eq!(cfg.whatsapp.phone_number_id, "1234");
        assert_eq!(cfg.resilience.base_delay_ms, 1000);
    }

    #[test]
    fn rejects_unknown_locale_and_zero_depth() {
        assert!(EngineConfig::from_toml_str("[conversation]\ndefault_locale = \"fr\"").is_err());
        assert!(EngineConfig::from_toml_str("[conversation]\nnavigation_depth = 0").is_err());
    }

    #[test]
    fn policy_reflects_config() {
        let r = ResilienceConfig { timeout_ms: 500, max_retries: 1, ..ResilienceConfig::default() };
        let p = r.policy();
        assert_eq!(p.timeout, Duration::from_millis(500));
        assert_eq!(p.max_retries, 1);
    }
}
