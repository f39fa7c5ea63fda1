// ── Astro Engine: Collaborators ────────────────────────────────────────────
// Concrete implementations of the collaborator traits in atoms::traits.
// Network-backed ones are only ever called through a resilience Guard.
//
// Module layout:
//   calculation.rs — HTTP calculation service + offline numerology fallback
//   geocoding.rs   — Nominatim-style place search
//   generation.rs  — OpenAI-compatible chat completions

pub mod calculation;
pub mod geocoding;
pub mod generation;

pub use calculation::{HttpCalculator, LocalCalculator};
pub use geocoding::NominatimGeocoder;
pub use generation::OpenAiGenerator;
