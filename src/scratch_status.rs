use serde_json::Value;

use crate::canonical::{CanonicalRecord, value_flag};

pub const STATUS_KEYS: &[&str] = &[
    "scratched",
    "is_scratched",
    "scratch",
    "scratching",
    "status",
    "runner_status",
    "status_desc",
    "runner_status_desc",
    "runnerstate",
    "runner_state",
    "withdrawn",
    "wd",
    "wdr",
];

// Free-text columns routinely contain "scratch" or a bare `1`, so the broad
// scan only accepts exact keywords.
pub const BROAD_SCAN_KEYWORDS: &[&str] = &[
    "scratched",
    "scratching",
    "withdrawn",
    "late scratching",
    "wd",
    "wdr",
    "late wd",
    "late w/d",
    "w/d",
    "non-runner",
    "non runner",
    "nr",
];

const BROAD_SCAN_MAX_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchHeuristic {
    ExplicitOnly,
    ExplicitThenBroadScan,
}

impl ScratchHeuristic {
    pub fn from_flag(broad_scan: bool) -> Self {
        if broad_scan {
            Self::ExplicitThenBroadScan
        } else {
            Self::ExplicitOnly
        }
    }

    pub fn detect(self, row: &CanonicalRecord) -> Option<bool> {
        if let Some(found) = explicit_status(row) {
            return Some(found);
        }
        match self {
            Self::ExplicitOnly => None,
            Self::ExplicitThenBroadScan => broad_status_scan(row).then_some(true),
        }
    }
}

/// Classify one status value: booleans, withdrawal codes, emergency codes.
pub fn classify_status(value: &Value) -> Option<bool> {
    if let Some(flag) = value_flag(value) {
        return Some(flag);
    }
    let text = value.as_str()?.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }
    if text.contains("scratch") {
        return Some(true);
    }
    match text.as_str() {
        "withdrawn" | "wd" | "wdr" | "late wd" | "late w/d" | "w/d" => Some(true),
        "non-runner" | "non runner" | "nr" => Some(true),
        "em" | "emer" | "emergency" => Some(false),
        _ => None,
    }
}

pub fn explicit_status(row: &CanonicalRecord) -> Option<bool> {
    STATUS_KEYS
        .iter()
        .find_map(|key| row.get(key).and_then(classify_status))
}

pub fn broad_status_scan(row: &CanonicalRecord) -> bool {
    row.fields().values().any(|v| {
        v.as_str().is_some_and(|s| {
            let t = s.trim().to_lowercase();
            t.len() <= BROAD_SCAN_MAX_LEN && BROAD_SCAN_KEYWORDS.contains(&t.as_str())
        })
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ScratchHeuristic, classify_status};
    use crate::canonical::CanonicalRecord;

    #[test]
    fn status_codes_classify() {
        assert_eq!(classify_status(&json!("Late Scratching")), Some(true));
        assert_eq!(classify_status(&json!("W/D")), Some(true));
        assert_eq!(classify_status(&json!("Emergency")), Some(false));
        assert_eq!(classify_status(&json!("N")), Some(false));
        assert_eq!(classify_status(&json!("Accepted")), None);
    }

    #[test]
    fn explicit_column_wins_over_broad_scan() {
        let row = CanonicalRecord::from_value(&json!({"Status": "Emer", "Comment": "nr"}));
        assert_eq!(ScratchHeuristic::ExplicitThenBroadScan.detect(&row), Some(false));
    }

    #[test]
    fn broad_scan_needs_exact_keyword() {
        let hit = CanonicalRecord::from_value(&json!({"Flag": "Withdrawn", "RaceNo": "1"}));
        let miss = CanonicalRecord::from_value(&json!({"Gear": "scratch blinkers", "RaceNo": "1"}));
        assert_eq!(ScratchHeuristic::ExplicitThenBroadScan.detect(&hit), Some(true));
        assert_eq!(ScratchHeuristic::ExplicitThenBroadScan.detect(&miss), None);
        assert_eq!(ScratchHeuristic::ExplicitOnly.detect(&hit), None);
    }
}
