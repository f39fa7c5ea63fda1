// WhatsApp Cloud API — Configuration
// WhatsAppConfig (credentials + Graph API endpoint)

use serde::{Deserialize, Serialize};

// ── Config Struct ──────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Graph API base URL, without the version segment
    pub api_url: String,
    /// Graph API version (e.g. "v21.0")
    pub api_version: String,
    /// Business phone number id that sends the replies
    pub phone_number_id: String,
    /// Permanent or system-user access token
    pub access_token: String,
    /// App secret used to sign webhook deliveries (X-Hub-Signature-256)
    pub app_secret: String,
    /// Token echoed back during the subscription handshake
    pub verify_token: String,
    /// Accept unsigned deliveries when no app secret is set. Local testing only.
    pub allow_unsigned: bool,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        WhatsAppConfig {
            api_url: "https://graph.facebook.com".into(),
            api_version: "v21.0".into(),
            phone_number_id: String::new(),
            access_token: String::new(),
            app_secret: String::new(),
            verify_token: String::new(),
            allow_unsigned: false,
        }
    }
}

impl WhatsAppConfig {
    /// `…/{version}/{phone_number_id}/messages`
    pub fn messages_url(&self) -> String {
        format!(
            "{}/{}/{}/messages",
            self.api_url.trim_end_matches('/'),
            self.api_version,
            self.phone_number_id
        )
    }

    /// Whether outbound delivery is possible. Without credentials the
    /// engine logs replies instead of sending them.
    pub fn can_send(&self) -> bool {
        !self.phone_number_id.is_empty() && !self.access_token.is_empty()
    }
}

// Secrets stay out of debug output.
impl std::fmt::Debug for WhatsAppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhatsAppConfig")
            .field("api_url", &self.api_url)
            .field("api_version", &self.api_version)
            .field("phone_number_id", &self.phone_number_id)
            .field("access_token", &if self.access_token.is_empty() { "" } else { "***" })
            .field("app_secret", &if self.app_secret.is_empty() { "" } else { "***" })
            .field("verify_token", &if self.verify_token.is_empty() { "" } else { "***" })
            .field("allow_unsigned", &self.allow_unsigned)
            .finish()
    }
}
