// Astro Engine — WhatsApp Cloud API
//
// Module layout:
//   config     — WhatsAppConfig (Graph API endpoint + credentials)
//   signature  — X-Hub-Signature-256 verification
//   sender     — WhatsAppSender (Graph /messages), LogSender
//   webhook    — run_server (raw TCP HTTP server: handshake, deliveries, health)

pub mod config;
pub mod sender;
pub mod signature;
pub mod webhook;

pub use config::WhatsAppConfig;
pub use sender::{LogSender, WhatsAppSender};
pub use signature::verify_signature;
pub use webhook::run_server;
