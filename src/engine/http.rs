// ── Astro Engine: Shared HTTP Client & Status Helpers ──────────────────────
//
// Used by the WhatsApp sender and the HTTP-backed collaborators.
//   • Retryable status detection (429, 5xx, 529)
//   • Certificate-pinned reqwest::Client factory (Mozilla roots only)
//   • Response → EngineError mapping that keeps the transient flag honest

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::truncate_utf8;
use reqwest::Client;
use rustls::ClientConfig;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

// ── Retryable status detection ─────────────────────────────────────────────

/// Check if an HTTP status code represents a transient/retryable error.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

/// Turn a non-success response into a collaborator error, reading at most a
/// short prefix of the body for the log line.
pub async fn status_error(collaborator: &str, resp: reqwest::Response) -> EngineError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    EngineError::collaborator(
        collaborator,
        format!("HTTP {}: {}", status, truncate_utf8(&body, 200)),
        is_retryable_status(status),
    )
}

/// Send a request and return the response if it was 2xx.
pub async fn send_checked(collaborator: &str, req: reqwest::RequestBuilder) -> EngineResult<reqwest::Response> {
    let resp = req.send().await?;
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(status_error(collaborator, resp).await)
    }
}

// ── Certificate-Pinned Client Factory ──────────────────────────────────────
//
// Builds a `reqwest::Client` on a `rustls::ClientConfig` that trusts only the
// Mozilla root certificates, so a CA installed on the host cannot intercept
// traffic to the messaging provider or collaborators.

fn pinned_tls_config() -> ClientConfig {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .expect("Failed to set default TLS protocol versions")
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

/// One connection pool, one TLS config for every outbound call.
static PINNED_CLIENT: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .use_preconfigured_tls(pinned_tls_config())
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .build()
        .expect("Failed to build certificate-pinned reqwest::Client")
});

/// Get the shared certificate-pinned HTTP client.
pub fn pinned_client() -> Client {
    PINNED_CLIENT.clone()
}
