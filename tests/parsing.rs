use std::fs;
use std::path::PathBuf;

use serde_json::Value;

use raceday_updates::backfill::{MeetingRunners, flatten_form_rows};
use raceday_updates::canonical::CanonicalRecord;
use raceday_updates::identity::normalize_name;
use raceday_updates::rating::{extract_rating, scan_for_rating};
use raceday_updates::scratch_status::ScratchHeuristic;
use raceday_updates::upstream::parse_csv_rows;

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

fn payload_rows(name: &str) -> Vec<Value> {
    let raw: Value = serde_json::from_str(&read_fixture(name)).expect("fixture should parse");
    match raw {
        Value::Array(rows) => rows,
        Value::Object(mut obj) => match obj.remove("payLoad") {
            Some(Value::Array(rows)) => rows,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

#[test]
fn meeting_csv_fixture_builds_runner_index() {
    let rows = parse_csv_rows(&read_fixture("meeting_100.csv"));
    assert_eq!(rows.len(), 4);

    let mut runners = MeetingRunners::default();
    for row in &rows {
        runners.add_row(&CanonicalRecord::from_value(row), ScratchHeuristic::ExplicitOnly);
    }
    assert_eq!(runners.len(), 4);
    let fast = runners.by_id(55).expect("runner 55");
    assert_eq!(fast.runner_number, Some(7));
    assert_eq!(fast.race_number, Some(3));
    assert_eq!(fast.scratched, Some(true));
    assert_eq!(runners.by_name("quick step")[0].scratched, Some(false));
    assert_eq!(runners.race_numbers().into_iter().collect::<Vec<_>>(), vec![3, 5]);
}

#[test]
fn nested_form_fixture_flattens_with_status() {
    let rows = payload_rows("form_nested.json");
    let flat = flatten_form_rows(&rows);
    assert_eq!(flat.len(), 3);

    let mut runners = MeetingRunners::default();
    for row in &flat {
        runners.add_row(row, ScratchHeuristic::ExplicitThenBroadScan);
    }
    let beta = &runners.by_name("Beta Blue")[0];
    assert_eq!(beta.race_number, Some(1));
    assert_eq!(beta.scratched, Some(true));
    assert_eq!(runners.by_name("Gamma Ray")[0].scratched, Some(false));
    assert_eq!(runners.by_name("Alpha Star")[0].scratched, None);
}

#[test]
fn form_fixture_yields_a_scanned_rating() {
    let rows = payload_rows("form_nested.json");
    let found = rows.iter().find_map(|row| scan_for_rating(row, None));
    assert_eq!(found.as_deref(), Some("Soft6"));
}

#[test]
fn conditions_fixture_rows_canonicalize() {
    let rows = payload_rows("conditions.json");
    let ratings: Vec<Option<String>> = rows
        .iter()
        .map(|row| {
            let rec = CanonicalRecord::from_value(row);
            extract_rating(&rec, rec.text("venue").as_deref())
        })
        .collect();
    assert_eq!(ratings, vec![Some("Good4".to_string()), Some("Soft5".to_string())]);
}

#[test]
fn scratchings_fixture_names_normalize() {
    let rows = payload_rows("scratchings.json");
    let keys: Vec<Option<String>> = rows
        .iter()
        .map(|row| {
            CanonicalRecord::from_value(row)
                .text("horse_name")
                .as_deref()
                .and_then(normalize_name)
        })
        .collect();
    assert_eq!(keys[0].as_deref(), Some("fast lad"));
    assert_eq!(keys.len(), 4);
}

#[test]
fn csv_columns_are_scanned_left_to_right() {
    let rows = parse_csv_rows("TrackCondition,Comment\nSoft 6,Good 4 last start\n");
    let found = rows.iter().find_map(|row| scan_for_rating(row, None));
    assert_eq!(found.as_deref(), Some("Soft6"));
}
