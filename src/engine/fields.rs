// ── Astro Engine: Field Validators ─────────────────────────────────────────
//
// Free-text input checks for text-prompt nodes and onboarding steps.
// A rejection is an EngineError::Validation carrying the translation key of
// the hint to show; the caller re-prompts without moving the user.

use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::menu::FieldKind;
use chrono::{Datelike, NaiveDate, NaiveTime};
use log::warn;
use regex::Regex;
use std::sync::LazyLock;

pub const HINT_DATE: &str = "hint.date";
pub const HINT_DATE_RANGE: &str = "hint.date_range";
pub const HINT_TIME: &str = "hint.time";
pub const HINT_PLACE: &str = "hint.place";
pub const HINT_LANGUAGE: &str = "hint.language";
pub const HINT_CONFIRM: &str = "hint.confirm";
pub const HINT_TEXT: &str = "hint.text";

/// Oldest accepted birth year.
const MIN_BIRTH_YEAR: i32 = 1900;
const PLACE_MIN_CHARS: usize = 2;
const PLACE_MAX_CHARS: usize = 100;
const FREE_TEXT_MAX_CHARS: usize = 500;

/// Option ids the onboarding language / confirmation replies carry.
pub const LANGUAGE_OPTION_PREFIX: &str = "lang.";
pub const CONFIRM_YES_ID: &str = "confirm.yes";
pub const CONFIRM_RESTART_ID: &str = "confirm.restart";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateOrder {
    DayMonthYear,
    YearMonthDay,
}

static DATE_PATTERNS: LazyLock<Vec<(Regex, DateOrder)>> = LazyLock::new(|| {
    [
        (r"^(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{4})$", DateOrder::DayMonthYear),
        (r"^(\d{4})-(\d{1,2})-(\d{1,2})$", DateOrder::YearMonthDay),
    ]
    .into_iter()
    .filter_map(|(pattern, order)| match Regex::new(pattern) {
        Ok(re) => Some((re, order)),
        Err(e) => {
            warn!("[fields] Failed to compile date pattern '{}': {}", pattern, e);
            None
        }
    })
    .collect()
});

static TIME_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})[:.](\d{2})\s*(am|pm|a\.m\.|p\.m\.)?$").ok()
});

// ── Field values ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Yes,
    Restart,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Date(NaiveDate),
    /// `None` = the user does not know.
    Time(Option<NaiveTime>),
    Place(PlaceInput),
    Language(&'static str),
    Confirmation(Confirmation),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaceInput {
    Named(String),
    Pin { latitude: f64, longitude: f64 },
}

impl FieldValue {
    /// Canonical text handed to collaborators.
    pub fn as_input(&self) -> String {
        match self {
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::Time(Some(t)) => t.format("%H:%M").to_string(),
            FieldValue::Time(None) => "unknown".into(),
            FieldValue::Place(PlaceInput::Named(p)) => p.clone(),
            FieldValue::Place(PlaceInput::Pin { latitude, longitude }) => format!("{:.5},{:.5}", latitude, longitude),
            FieldValue::Language(l) => (*l).to_string(),
            FieldValue::Confirmation(Confirmation::Yes) => "yes".into(),
            FieldValue::Confirmation(Confirmation::Restart) => "restart".into(),
            FieldValue::Text(t) => t.clone(),
        }
    }
}

/// Validate `input` as a `kind` field. `today` bounds dates.
pub fn validate(kind: FieldKind, input: &str, today: NaiveDate) -> EngineResult<FieldValue> {
    match kind {
        FieldKind::Date => parse_birth_date(input, today).map(FieldValue::Date),
        FieldKind::Time => parse_birth_time(input).map(FieldValue::Time),
        FieldKind::Place => parse_place(input).map(FieldValue::Place),
        FieldKind::Language => parse_language(input).map(FieldValue::Language),
        FieldKind::Confirmation => parse_confirmation(input).map(FieldValue::Confirmation),
        FieldKind::FreeText => validate_free_text(input).map(FieldValue::Text),
    }
}

fn reject(hint: &str) -> EngineError {
    EngineError::Validation(hint.to_string())
}

// ── Individual validators ──────────────────────────────────────────────────

pub fn parse_birth_date(input: &str, today: NaiveDate) -> EngineResult<NaiveDate> {
    let s = input.trim();
    for (re, order) in DATE_PATTERNS.iter() {
        let Some(caps) = re.captures(s) else { continue };
        let nums: Vec<u32> = (1..=3).filter_map(|i| caps.get(i)?.as_str().parse().ok()).collect();
        if nums.len() != 3 {
            return Err(reject(HINT_DATE));
        }
        let (y, m, d) = match order {
            DateOrder::DayMonthYear => (nums[2], nums[1], nums[0]),
            DateOrder::YearMonthDay => (nums[0], nums[1], nums[2]),
        };
        let date = NaiveDate::from_ymd_opt(y as i32, m, d).ok_or_else(|| reject(HINT_DATE))?;
        if date.year() < MIN_BIRTH_YEAR || date > today {
            return Err(reject(HINT_DATE_RANGE));
        }
        return Ok(date);
    }
    Err(reject(HINT_DATE))
}

pub fn parse_birth_time(input: &str) -> EngineResult<Option<NaiveTime>> {
    let s = input.trim().to_lowercase();
    if matches!(s.as_str(), "unknown" | "skip" | "don't know" | "dont know" | "no sé" | "no se" | "पता नहीं") {
        return Ok(None);
    }
    let re = TIME_PATTERN.as_ref().ok_or_else(|| reject(HINT_TIME))?;
    let caps = re.captures(&s).ok_or_else(|| reject(HINT_TIME))?;
    let mut hour: u32 = caps.get(1).and_then(|m| m.as_str().parse().ok()).ok_or_else(|| reject(HINT_TIME))?;
    let minute: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).ok_or_else(|| reject(HINT_TIME))?;

    if let Some(suffix) = caps.get(3) {
        if hour == 0 || hour > 12 {
            return Err(reject(HINT_TIME));
        }
        let pm = suffix.as_str().starts_with('p');
        hour = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, true) => h + 12,
            (h, false) => h,
        };
    }
    NaiveTime::from_hms_opt(hour, minute, 0).map(Some).ok_or_else(|| reject(HINT_TIME))
}

/// Location pins arrive as `"lat,lon"`.
pub fn parse_location_pin(reference: &str) -> Option<(f64, f64)> {
    let (lat, lon) = reference.split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lon: f64 = lon.trim().parse().ok()?;
    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)).then_some((lat, lon))
}

/// Place name, or a `"lat,lon"` pin.
pub fn parse_place(input: &str) -> EngineResult<PlaceInput> {
    let s = input.trim();
    if let Some((latitude, longitude)) = parse_location_pin(s) {
        return Ok(PlaceInput::Pin { latitude, longitude });
    }
    let chars = s.chars().count();
    if !(PLACE_MIN_CHARS..=PLACE_MAX_CHARS).contains(&chars) {
        return Err(reject(HINT_PLACE));
    }
    if !s.chars().any(char::is_alphabetic) {
        return Err(reject(HINT_PLACE));
    }
    Ok(PlaceInput::Named(s.to_string()))
}

pub fn parse_language(input: &str) -> EngineResult<&'static str> {
    let s = input.trim().to_lowercase();
    let s = s.strip_prefix(LANGUAGE_OPTION_PREFIX).unwrap_or(&s);
    match s {
        "en" | "english" | "inglés" | "ingles" | "1" => Ok("en"),
        "es" | "spanish" | "español" | "espanol" | "2" => Ok("es"),
        "hi" | "hindi" | "हिन्दी" | "हिंदी" | "3" => Ok("hi"),
        _ => Err(reject(HINT_LANGUAGE)),
    }
}

pub fn parse_confirmation(input: &str) -> EngineResult<Confirmation> {
    let s = input.trim().to_lowercase();
    if s == CONFIRM_YES_ID {
        return Ok(Confirmation::Yes);
    }
    if s == CONFIRM_RESTART_ID {
        return Ok(Confirmation::Restart);
    }
    match s.as_str() {
        "yes" | "y" | "confirm" | "ok" | "sí" | "si" | "हाँ" | "हां" => Ok(Confirmation::Yes),
        "no" | "n" | "restart" | "edit" | "नहीं" => Ok(Confirmation::Restart),
        _ => Err(reject(HINT_CONFIRM)),
    }
}

pub fn validate_free_text(input: &str) -> EngineResult<String> {
    let s = input.trim();
    let chars = s.chars().count();
    if chars == 0 || chars > FREE_TEXT_MAX_CHARS {
        return Err(reject(HINT_TEXT));
    }
    Ok(s.to_string())
}
