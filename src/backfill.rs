use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use serde_json::Value;
use tracing::debug;

use crate::canonical::CanonicalRecord;
use crate::config::Endpoints;
use crate::error::FetchError;
use crate::identity::{normalize_name, normalize_venue};
use crate::scratch_status::ScratchHeuristic;
use crate::upstream::{Fetcher, PayloadFormat};

pub const DATE_PARAM_KEYS: &[&str] = &["meetingDate", "meeting_date", "date"];
pub const VENUE_PARAM_KEYS: &[&str] = &["venue", "track", "course", "meeting"];

const NESTED_RUNNER_KEYS: &[&str] = &["runners", "fields", "entries", "acceptances"];

pub type Params = Vec<(&'static str, String)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerIndexEntry {
    pub runner_id: Option<u64>,
    pub runner_number: Option<u64>,
    pub horse_name: Option<String>,
    pub race_number: Option<u64>,
    pub scratched: Option<bool>,
}

impl RunnerIndexEntry {
    pub fn from_row(row: &CanonicalRecord, heuristic: ScratchHeuristic) -> Option<Self> {
        let entry = Self {
            runner_id: row.int("runner_id"),
            runner_number: row.int("runner_number"),
            horse_name: row.text("horse_name"),
            race_number: row.int("race_number"),
            scratched: heuristic.detect(row),
        };
        let named = entry.name_key().is_some();
        (named || entry.runner_id.is_some()).then_some(entry)
    }

    pub fn name_key(&self) -> Option<String> {
        self.horse_name.as_deref().and_then(normalize_name)
    }
}

/// Runner records for one meeting, keyed by runner id and by normalized name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeetingRunners {
    by_id: HashMap<u64, RunnerIndexEntry>,
    by_name: HashMap<String, Vec<RunnerIndexEntry>>,
}

impl MeetingRunners {
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty() && self.by_name.is_empty()
    }

    pub fn add_row(&mut self, row: &CanonicalRecord, heuristic: ScratchHeuristic) {
        if let Some(entry) = RunnerIndexEntry::from_row(row, heuristic) {
            self.add(entry);
        }
    }

    pub fn add(&mut self, entry: RunnerIndexEntry) {
        if let Some(key) = entry.name_key() {
            let same_name = self.by_name.entry(key).or_default();
            if !same_name.contains(&entry) {
                same_name.push(entry.clone());
            }
        }
        if let Some(id) = entry.runner_id {
            self.by_id.insert(id, entry);
        }
    }

    pub fn absorb(&mut self, other: MeetingRunners) {
        for (id, entry) in other.by_id {
            self.by_id.entry(id).or_insert(entry);
        }
        for (key, entries) in other.by_name {
            let same_name = self.by_name.entry(key).or_default();
            for entry in entries {
                if !same_name.contains(&entry) {
                    same_name.push(entry);
                }
            }
        }
    }

    pub fn by_id(&self, runner_id: u64) -> Option<&RunnerIndexEntry> {
        self.by_id.get(&runner_id)
    }

    pub fn by_name(&self, name: &str) -> &[RunnerIndexEntry] {
        normalize_name(name)
            .and_then(|key| self.by_name.get(&key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn entries(&self) -> Vec<&RunnerIndexEntry> {
        let mut out: Vec<&RunnerIndexEntry> = self.by_id.values().collect();
        out.extend(
            self.by_name
                .values()
                .flatten()
                .filter(|e| e.runner_id.is_none()),
        );
        out.sort_by(|a, b| {
            (a.race_number, a.runner_number, a.runner_id, a.name_key())
                .cmp(&(b.race_number, b.runner_number, b.runner_id, b.name_key()))
        });
        out
    }

    pub fn race_numbers(&self) -> BTreeSet<u64> {
        self.entries().iter().filter_map(|e| e.race_number).collect()
    }

    pub fn has_race(&self, race_number: u64) -> bool {
        self.by_id.values().any(|e| e.race_number == Some(race_number))
            || self
                .by_name
                .values()
                .flatten()
                .any(|e| e.race_number == Some(race_number))
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }
}

/// Publishing the same meeting twice keeps every record already present.
#[derive(Debug, Default)]
pub struct BackfillIndex {
    meetings: Mutex<HashMap<u64, Arc<MeetingRunners>>>,
}

impl BackfillIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, meeting_id: u64) -> Option<Arc<MeetingRunners>> {
        self.meetings
            .lock()
            .expect("backfill index lock poisoned")
            .get(&meeting_id)
            .cloned()
    }

    pub fn publish(&self, meeting_id: u64, runners: MeetingRunners) -> Arc<MeetingRunners> {
        let mut guard = self.meetings.lock().expect("backfill index lock poisoned");
        let slot = guard
            .entry(meeting_id)
            .or_insert_with(|| Arc::new(MeetingRunners::default()));
        Arc::make_mut(slot).absorb(runners);
        Arc::clone(slot)
    }

    pub fn evict(&self, meeting_id: u64) {
        self.meetings
            .lock()
            .expect("backfill index lock poisoned")
            .remove(&meeting_id);
    }

    pub fn clear(&self) {
        self.meetings
            .lock()
            .expect("backfill index lock poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.meetings
            .lock()
            .expect("backfill index lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct MeetingTarget {
    pub meeting_id: u64,
    pub venue: Option<String>,
    pub date: Option<String>,
}

pub struct IndexBuilder<'a> {
    pub fetcher: &'a Fetcher,
    pub endpoints: &'a Endpoints,
    pub heuristic: ScratchHeuristic,
}

impl IndexBuilder<'_> {
    /// Runners for `target`, populating the index on first use and topping up
    /// any of `races_needed` the index does not represent yet.
    pub fn ensure(
        &self,
        index: &BackfillIndex,
        target: &MeetingTarget,
        races_needed: &BTreeSet<u64>,
    ) -> Arc<MeetingRunners> {
        let existing = index.get(target.meeting_id);
        let mut fresh = match existing {
            Some(_) => MeetingRunners::default(),
            None => self.populate(target),
        };

        let represented = |race: u64| {
            fresh.has_race(race) || existing.as_ref().is_some_and(|e| e.has_race(race))
        };
        let missing: Vec<u64> = races_needed
            .iter()
            .copied()
            .filter(|r| !represented(*r))
            .collect();
        if !missing.is_empty() {
            self.top_up(target.meeting_id, &missing, &mut fresh);
        }

        if fresh.is_empty() {
            return existing.unwrap_or_default();
        }
        debug!(
            meeting_id = target.meeting_id,
            runners = fresh.len(),
            "publishing backfill runners"
        );
        index.publish(target.meeting_id, fresh)
    }

    /// One-shot population: meeting CSV, then the form export, then
    /// venue/date searches. Stops at the first step that yields runners.
    pub fn populate(&self, target: &MeetingTarget) -> MeetingRunners {
        let mut runners = MeetingRunners::default();
        let by_meeting = meeting_params(target.meeting_id);

        self.absorb_rows(
            &mut runners,
            self.fetcher.fetch_csv(&self.endpoints.meeting_csv, &by_meeting),
            "meeting csv",
        );
        if !runners.is_empty() {
            return runners;
        }

        let mut form_params = by_meeting.clone();
        form_params.push(("raceNumber", "0".to_string()));
        match self.fetcher.fetch_json(&self.endpoints.form, &form_params) {
            Ok(rows) => {
                for row in flatten_form_rows(&rows) {
                    runners.add_row(&row, self.heuristic);
                }
            }
            Err(err) => debug!(meeting_id = target.meeting_id, %err, "form lookup failed"),
        }
        if !runners.is_empty() {
            return runners;
        }

        let (Some(venue), Some(date)) = (target.venue.as_deref(), target.date.as_deref()) else {
            return runners;
        };
        let searches = venue_search_params(date, venue);
        let sources = [
            (&self.endpoints.fields_json, PayloadFormat::Json),
            (&self.endpoints.meeting_csv, PayloadFormat::Csv),
            (&self.endpoints.fields_csv, PayloadFormat::Csv),
        ];
        for (url, format) in sources {
            for params in &searches {
                self.absorb_rows(
                    &mut runners,
                    self.fetcher.fetch(url, params, format),
                    "venue search",
                );
                if !runners.is_empty() {
                    return runners;
                }
            }
        }
        runners
    }

    pub fn top_up(&self, meeting_id: u64, missing: &[u64], runners: &mut MeetingRunners) {
        let json_results: Vec<Result<Vec<Value>, FetchError>> = missing
            .par_iter()
            .map(|race| {
                self.fetcher
                    .fetch_json(&self.endpoints.fields_json, &race_params(meeting_id, *race))
            })
            .collect();
        for result in json_results {
            self.absorb_rows(runners, result, "race fields json");
        }

        let still_missing: Vec<u64> = missing
            .iter()
            .copied()
            .filter(|r| !runners.has_race(*r))
            .collect();
        if still_missing.is_empty() {
            return;
        }
        let csv_results: Vec<Result<Vec<Value>, FetchError>> = still_missing
            .par_iter()
            .map(|race| {
                self.fetcher
                    .fetch_csv(&self.endpoints.fields_csv, &race_params(meeting_id, *race))
            })
            .collect();
        for result in csv_results {
            self.absorb_rows(runners, result, "race fields csv");
        }
    }

    fn absorb_rows(
        &self,
        runners: &mut MeetingRunners,
        result: Result<Vec<Value>, FetchError>,
        source: &str,
    ) {
        match result {
            Ok(rows) => {
                for raw in &rows {
                    runners.add_row(&CanonicalRecord::from_value(raw), self.heuristic);
                }
            }
            Err(err) => debug!(source, %err, "backfill source contributed nothing"),
        }
    }
}

/// The form export is either flat runner rows or race objects nesting their
/// runners; the latter are flattened with the race number stamped on.
pub fn flatten_form_rows(rows: &[Value]) -> Vec<CanonicalRecord> {
    let records: Vec<CanonicalRecord> = rows.iter().map(CanonicalRecord::from_value).collect();
    if records.iter().any(|r| r.contains("runner_id")) {
        return records;
    }

    let mut flat = Vec::new();
    for race in &records {
        let race_number = race.int("race_number");
        for key in NESTED_RUNNER_KEYS {
            let Some(Value::Array(nested)) = race.get(key) else {
                continue;
            };
            for runner in nested {
                let mut row = CanonicalRecord::from_value(runner);
                if let Some(rno) = race_number
                    && !row.contains("race_number")
                {
                    row.insert("race_number", Value::from(rno));
                }
                flat.push(row);
            }
        }
    }
    flat
}

pub fn meeting_params(meeting_id: u64) -> Params {
    vec![("meetingId", meeting_id.to_string())]
}

pub fn race_params(meeting_id: u64, race_number: u64) -> Params {
    vec![
        ("meetingId", meeting_id.to_string()),
        ("raceNumber", race_number.to_string()),
    ]
}

// date key x venue value (raw, normalized) x venue key
pub fn venue_search_params(date: &str, venue: &str) -> Vec<Params> {
    let mut variants: Vec<String> = Vec::new();
    for candidate in [Some(venue.trim().to_string()), normalize_venue(venue)]
        .into_iter()
        .flatten()
    {
        if !candidate.is_empty()
            && !variants
                .iter()
                .any(|v| v.to_lowercase() == candidate.to_lowercase())
        {
            variants.push(candidate);
        }
    }

    let mut out = Vec::new();
    for date_key in DATE_PARAM_KEYS {
        for value in &variants {
            for venue_key in VENUE_PARAM_KEYS {
                out.push(vec![(*date_key, date.to_string()), (*venue_key, value.clone())]);
            }
        }
    }
    out
}
