// ── Astro Atoms: Error Types ───────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, DB, Collaborator, Config…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • Collaborator failures carry a `transient` flag so the resilience layer
//     knows whether another attempt can help.
//   • No variant carries secret material (tokens, app secrets) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML config / catalog parse failure.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Session store failure that is not a raw database error
    /// (corrupt row, lease mismatch, broken invariant).
    #[error("Session store error: {0}")]
    Store(String),

    /// External collaborator (geocoder, calculator, generator, delivery API) failure.
    #[error("Collaborator error: {name}: {message}")]
    Collaborator {
        name: String,
        message: String,
        transient: bool,
    },

    /// A guarded call exceeded its deadline.
    #[error("Timeout: {0} did not answer in time")]
    Timeout(String),

    /// The circuit breaker for a collaborator is open.
    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    /// Menu definition, registry, or engine configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inbound payload could not be understood.
    #[error("Malformed event: {0}")]
    Malformed(String),

    /// User-supplied field value rejected by a validator.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Webhook signature / verify-token failure.
    #[error("Auth error: {0}")]
    Auth(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create a collaborator error with name and message.
    pub fn collaborator(name: impl Into<String>, message: impl Into<String>, transient: bool) -> Self {
        Self::Collaborator {
            name: name.into(),
            message: message.into(),
            transient,
        }
    }

    /// Whether retrying the same call may succeed.
    /// Network errors and timeouts are transient; rejected input is not.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Network(e) => !e.is_builder() && !e.is_decode(),
            EngineError::Timeout(_) => true,
            EngineError::Collaborator { transient, .. } => *transient,
            EngineError::Io(_) => true,
            _ => false,
        }
    }
}

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;
