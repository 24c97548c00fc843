use serde_json::{Map, Value};

/// Version of [`FIELD_ALIASES`]; bump whenever an alias is added or reordered.
pub const ALIAS_SET_VERSION: u32 = 1;

pub const FIELD_ALIASES: &[(&str, &[&str])] = &[
    // meeting
    ("meeting_id", &["meetingid", "meeting_id", "meet_id", "meeting"]),
    ("meeting_date", &["meetingdate", "meeting_date", "date"]),
    ("venue", &["venue", "track", "course", "meetingname", "meeting_name"]),
    ("state", &["state", "jurisdiction", "country"]),
    // race
    ("race_id", &["raceid", "race_id"]),
    ("race_number", &["racenumber", "race_number", "raceno", "race_no", "race"]),
    // runner
    ("runner_id", &["runnerid", "runner_id"]),
    (
        "runner_number",
        &[
            "runnernumber",
            "runner_number",
            "number",
            "no",
            "saddlenumber",
            "saddle_number",
            "saddle_no",
            "saddle",
            "programnumber",
            "program_number",
            "progno",
            "prog_no",
            "book_number",
            "numberinbook",
            "number_in_book",
            "tabno",
            "tab_number",
            "cloth",
            "cloth_number",
        ],
    ),
    ("horse_name", &["horse", "horsename", "horse_name", "runnername", "runner_name", "name"]),
    // conditions; plain "track" is a venue alias, never a rating
    (
        "track_condition",
        &[
            "trackcondition",
            "track_condition",
            "trackrating",
            "track_rating",
            "rating",
            "condition",
            "rating_code",
        ],
    ),
    ("weather", &["weather", "weather_desc", "weatherdescription"]),
    ("rail", &["rail", "rail_position", "railposition"]),
    // status and timestamps
    ("scratched", &["scratched", "isscratched", "is_scratched", "scratch"]),
    ("updated_at", &["updated", "updatedat", "updated_at", "modified", "lastupdated", "last_updated"]),
];

/// One upstream row with its keys renamed to the canonical vocabulary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalRecord {
    fields: Map<String, Value>,
}

impl CanonicalRecord {
    pub fn from_value(raw: &Value) -> Self {
        match raw {
            Value::Object(map) => canonicalize(map),
            _ => Self::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.fields.insert(key.to_string(), value);
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(value_text)
    }

    /// Positive integer id/number; zero means "unset" upstream.
    pub fn int(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(value_int)
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(value_flag)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

pub fn canonicalize(raw: &Map<String, Value>) -> CanonicalRecord {
    let normalized: Vec<(String, &Value)> =
        raw.iter().map(|(k, v)| (normalize_key(k), v)).collect();

    let mut fields = Map::new();
    for (canon, aliases) in FIELD_ALIASES {
        let hit = aliases.iter().find_map(|alias| {
            normalized
                .iter()
                .find(|(key, _)| key == alias)
                .map(|(_, value)| *value)
        });
        if let Some(value) = hit {
            fields.insert((*canon).to_string(), value.clone());
        }
    }
    for (key, value) in normalized {
        if !fields.contains_key(&key) {
            fields.insert(key, value.clone());
        }
    }
    CanonicalRecord { fields }
}

/// Lowercase, with every run of non-alphanumeric characters collapsed to `_`.
pub fn normalize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_sep {
                out.push('_');
                pending_sep = false;
            }
            out.push(ch);
        } else {
            pending_sep = true;
        }
    }
    if pending_sep {
        out.push('_');
    }
    out
}

pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() { None } else { Some(t.to_string()) }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn value_int(value: &Value) -> Option<u64> {
    let parsed = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f > 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.filter(|v| *v != 0)
}

pub fn value_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "y" | "yes" | "t" => Some(true),
            "0" | "false" | "n" | "no" | "f" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
