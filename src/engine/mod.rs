// Astro Engine — Conversational routing for a WhatsApp astrology concierge.
// Inbound webhook payload → canonical events → per-user session under a
// lease → onboarding gate or menu state machine → one outbound reply.

pub mod actions;
pub mod channels;
pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod fields;
pub mod http;
pub mod menu;
pub mod navigator;
pub mod normalizer;
pub mod onboarding;
pub mod render;
pub mod resilience;
pub mod sessions;
pub mod state;
pub mod translations;
pub mod whatsapp;
