// Calculation collaborator: `POST {base}/compute/{kind}` with the birth input
// as the JSON body. The engine treats the result as opaque.
//
// LocalCalculator answers the few kinds that need no ephemeris (profile
// categories and numerology) so onboarding can complete offline.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::Calculator;
use crate::atoms::types::BirthProfile;
use crate::engine::http::{pinned_client, send_checked};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use log::debug;
use reqwest::Client;
use serde_json::{json, Value};

/// Kind computed at onboarding confirmation.
pub const PROFILE_CATEGORIES: &str = "profile_categories";

// ── HTTP ───────────────────────────────────────────────────────────────────

pub struct HttpCalculator {
    client: Client,
    base_url: String,
}

impl HttpCalculator {
    pub fn new(base_url: &str) -> Self {
        Self { client: pinned_client(), base_url: base_url.trim_end_matches('/').to_string() }
    }
}

#[async_trait]
impl Calculator for HttpCalculator {
    async fn compute(&self, kind: &str, input: &Value) -> EngineResult<Value> {
        let url = format!("{}/compute/{}", self.base_url, kind);
        debug!("[calc] POST {}", url);
        let resp = send_checked("calculation", self.client.post(&url).json(input)).await?;
        Ok(resp.json::<Value>().await?)
    }
}

// ── Offline ────────────────────────────────────────────────────────────────

pub struct LocalCalculator;

#[async_trait]
impl Calculator for LocalCalculator {
    async fn compute(&self, kind: &str, input: &Value) -> EngineResult<Value> {
        match kind {
            PROFILE_CATEGORIES => {
                let date = input_date(input)?;
                Ok(categories_for(date))
            }
            "life_path" => {
                let date = input_date(input)?;
                Ok(json!({ "text": life_path_number(date).to_string() }))
            }
            "name_number" => {
                let name = input.get("input").and_then(Value::as_str).unwrap_or_default();
                match name_number(name) {
                    Some(n) => Ok(json!({ "text": n.to_string() })),
                    None => Err(EngineError::collaborator("calculation", "name has no letters", false)),
                }
            }
            other => Err(EngineError::collaborator(
                "calculation",
                format!("no offline result for '{}'", other),
                false,
            )),
        }
    }
}

fn input_date(input: &Value) -> EngineResult<NaiveDate> {
    input
        .get("birth_date")
        .and_then(Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .ok_or_else(|| EngineError::collaborator("calculation", "birth_date missing", false))
}

/// Fallback profile categories: sun sign, element, life path.
pub fn local_profile_categories(profile: &BirthProfile) -> Value {
    match profile.birth_date {
        Some(date) => categories_for(date),
        None => json!({}),
    }
}

fn categories_for(date: NaiveDate) -> Value {
    let sign = sun_sign(date.month(), date.day());
    json!({
        "sun_sign": sign,
        "element": element(sign),
        "life_path": life_path_number(date).to_string(),
    })
}

// ── Tropical sun signs ─────────────────────────────────────────────────────

/// (month, last day in that month of the sign the month opens with, sign)
const SIGN_CUSPS: [(u32, u32, &str); 12] = [
    (1, 19, "Capricorn"),
    (2, 18, "Aquarius"),
    (3, 20, "Pisces"),
    (4, 19, "Aries"),
    (5, 20, "Taurus"),
    (6, 20, "Gemini"),
    (7, 22, "Cancer"),
    (8, 22, "Leo"),
    (9, 22, "Virgo"),
    (10, 22, "Libra"),
    (11, 21, "Scorpio"),
    (12, 21, "Sagittarius"),
];

pub fn sun_sign(month: u32, day: u32) -> &'static str {
    let (_, last_day, sign) = SIGN_CUSPS[(month.clamp(1, 12) - 1) as usize];
    if day <= last_day {
        sign
    } else {
        // Past the cusp: the sign that ends next month.
        SIGN_CUSPS[(month.clamp(1, 12) % 12) as usize].2
    }
}

fn element(sign: &str) -> &'static str {
    match sign {
        "Aries" | "Leo" | "Sagittarius" => "Fire",
        "Taurus" | "Virgo" | "Capricorn" => "Earth",
        "Gemini" | "Libra" | "Aquarius" => "Air",
        _ => "Water",
    }
}

// ── Numerology ─────────────────────────────────────────────────────────────

/// Digit sum reduced to one digit, keeping master numbers 11, 22 and 33.
fn reduce(mut n: u32) -> u32 {
    while n > 9 && !matches!(n, 11 | 22 | 33) {
        n = digit_sum(n);
    }
    n
}

fn digit_sum(mut n: u32) -> u32 {
    let mut sum = 0;
    while n > 0 {
        sum += n % 10;
        n /= 10;
    }
    sum
}

pub fn life_path_number(date: NaiveDate) -> u32 {
    let digits = digit_sum(date.year().unsigned_abs()) + digit_sum(date.month()) + digit_sum(date.day());
    reduce(digits)
}

/// Pythagorean name number; `None` when the name has no latin letters.
pub fn name_number(name: &str) -> Option<u32> {
    let total: u32 = name
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| (c.to_ascii_lowercase() as u32 - 'a' as u32) % 9 + 1)
        .sum();
    (total > 0).then(|| reduce(total))
}
