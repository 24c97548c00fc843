use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::canonical::{CanonicalRecord, value_text};

/// Fields that may carry a rating, in the order they are tried.
pub const RATING_KEYS: &[&str] = &[
    "track_condition",
    "trackcondition",
    "trackrating",
    "track_rating",
    "rating",
    "condition",
    "rating_code",
    "track_condition_code",
    "rating_short",
    "going",
    "going_desc",
    "going_description",
    "surface",
];

pub const MAX_SCAN_DEPTH: usize = 16;

pub const SYNTHETIC: &str = "Synthetic";

static ANNOTATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^)]*\)").expect("valid regex"));
static SYNTHETIC_ALIAS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(synthetic|polytrack|tapeta|all[\s-]*weather|aw|syn)$").expect("valid regex")
});
static LETTER_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([GFHDSLgfhdsl])\s*([0-9]{1,2})\s*$").expect("valid regex"));
static RATING_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(good|soft|heavy|firm|dead|slow)\s*([0-9]{1,2})\b").expect("valid regex")
});

/// Canonical display label (`Good4`, `Synthetic`, ...) for one piece of text.
pub fn display_rating(raw: &str) -> Option<String> {
    let stripped = ANNOTATION.replace_all(raw.trim(), "");
    let text = stripped.trim();
    if text.is_empty() {
        return None;
    }
    if SYNTHETIC_ALIAS.is_match(text) {
        return Some(SYNTHETIC.to_string());
    }
    if let Some(caps) = LETTER_CODE.captures(text)
        && let Some(word) = letter_word(&caps[1])
    {
        return Some(format!("{word}{}", &caps[2]));
    }
    let caps = RATING_WORD.captures(text)?;
    Some(format!("{}{}", capitalize(&caps[1]), &caps[2]))
}

/// First candidate that parses, skipping any that merely repeat the venue.
pub fn parse_rating<'a, I>(candidates: I, venue: Option<&str>) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let venue = venue_key(venue);
    candidates.into_iter().find_map(|candidate| {
        if is_venue(candidate, venue.as_deref()) {
            return None;
        }
        display_rating(candidate)
    })
}

pub fn extract_rating(record: &CanonicalRecord, venue: Option<&str>) -> Option<String> {
    let texts: Vec<String> = RATING_KEYS.iter().filter_map(|k| record.text(k)).collect();
    parse_rating(texts.iter().map(String::as_str), venue)
}

/// Depth-first search for the first rating anywhere inside a payload.
pub fn scan_for_rating(value: &Value, venue: Option<&str>) -> Option<String> {
    let venue = venue_key(venue);
    scan(value, venue.as_deref(), 0)
}

fn scan(value: &Value, venue: Option<&str>, depth: usize) -> Option<String> {
    if depth > MAX_SCAN_DEPTH {
        return None;
    }
    match value {
        Value::String(_) | Value::Number(_) => {
            let text = value_text(value)?;
            if is_venue(&text, venue) {
                return None;
            }
            display_rating(&text)
        }
        Value::Object(map) => map.values().find_map(|v| scan(v, venue, depth + 1)),
        Value::Array(items) => items.iter().find_map(|v| scan(v, venue, depth + 1)),
        Value::Bool(_) | Value::Null => None,
    }
}

fn venue_key(venue: Option<&str>) -> Option<String> {
    venue
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

fn is_venue(candidate: &str, venue: Option<&str>) -> bool {
    venue.is_some_and(|v| candidate.trim().to_lowercase() == v)
}

fn letter_word(code: &str) -> Option<&'static str> {
    match code.to_ascii_lowercase().as_str() {
        "g" => Some("Good"),
        "f" => Some("Firm"),
        "h" => Some("Heavy"),
        "d" => Some("Dead"),
        "s" => Some("Soft"),
        "l" => Some("Slow"),
        _ => None,
    }
}

fn capitalize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
