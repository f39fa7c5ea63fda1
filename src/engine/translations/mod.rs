// ── Astro Engine: Translation Catalog ──────────────────────────────────────
// Embedded per-locale TOML tables, flattened to dotted keys.
// Lookup order: requested locale → default locale → the key itself.
// `{name}` placeholders are replaced from the params slice.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::Translator;
use log::{debug, info};
use std::collections::HashMap;

const EN: &str = include_str!("en.toml");
const ES: &str = include_str!("es.toml");
const HI: &str = include_str!("hi.toml");

pub struct Catalog {
    default_locale: String,
    tables: HashMap<String, HashMap<String, String>>,
}

fn flatten(prefix: &str, value: &toml::Value, out: &mut HashMap<String, String>) -> EngineResult<()> {
    match value {
        toml::Value::Table(t) => {
            for (k, v) in t {
                let key = if prefix.is_empty() { k.clone() } else { format!("{}.{}", prefix, k) };
                flatten(&key, v, out)?;
            }
            Ok(())
        }
        toml::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
            Ok(())
        }
        other => Err(EngineError::Config(format!(
            "translation '{}' must be a string, found {}",
            prefix,
            other.type_str()
        ))),
    }
}

impl Catalog {
    /// The en / es / hi catalogs shipped with the crate.
    pub fn builtin(default_locale: &str) -> EngineResult<Self> {
        Self::from_sources(default_locale, &[("en", EN), ("es", ES), ("hi", HI)])
    }

    pub fn from_sources(default_locale: &str, sources: &[(&str, &str)]) -> EngineResult<Self> {
        let mut tables = HashMap::new();
        for (locale, text) in sources {
            let value: toml::Value = toml::from_str(text)?;
            let mut table = HashMap::new();
            flatten("", &value, &mut table)?;
            info!("[i18n] Loaded {} strings for '{}'", table.len(), locale);
            tables.insert(locale.to_string(), table);
        }
        if !tables.contains_key(default_locale) {
            return Err(EngineError::Config(format!("no catalog for default locale '{}'", default_locale)));
        }
        Ok(Catalog { default_locale: default_locale.to_string(), tables })
    }

    fn lookup(&self, key: &str, locale: &str) -> Option<&str> {
        self.tables
            .get(locale)
            .and_then(|t| t.get(key))
            .or_else(|| self.tables.get(&self.default_locale).and_then(|t| t.get(key)))
            .map(String::as_str)
    }

    /// Keys present in the default locale but missing from `locale`.
    pub fn missing_keys(&self, locale: &str) -> Vec<String> {
        let (Some(base), Some(table)) = (self.tables.get(&self.default_locale), self.tables.get(locale)) else {
            return vec![];
        };
        let mut missing: Vec<String> = base.keys().filter(|k| !table.contains_key(*k)).cloned().collect();
        missing.sort();
        missing
    }

    /// Whether the default locale defines `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.tables.get(&self.default_locale).is_some_and(|t| t.contains_key(key))
    }

    pub fn locales(&self) -> Vec<&str> {
        let mut locales: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        locales.sort();
        locales
    }
}

pub fn substitute(template: &str, params: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in params {
        out = out.replace(&format!("{{{}}}", name), value);
    }
    out
}

impl Translator for Catalog {
    fn translate(&self, key: &str, locale: &str, params: &[(&str, &str)]) -> String {
        match self.lookup(key, locale) {
            Some(template) => substitute(template, params),
            None => {
                debug!("[i18n] Missing key '{}' ({})", key, locale);
                key.to_string()
            }
        }
    }

    fn supports(&self, locale: &str) -> bool {
        self.tables.contains_key(locale)
    }
}
