// Astro Engine — library root
//
//   atoms   pure types, traits, constants and the error enum
//   engine  everything with behaviour: sessions, menus, dispatch, transport

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use engine::config::EngineConfig;
pub use engine::menu::MenuSet;
pub use engine::sessions::SqliteStore;
pub use engine::state::{Engine, EngineSettings, Guards, Services};
