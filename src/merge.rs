use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::backfill::MeetingRunners;
use crate::canonical::CanonicalRecord;
use crate::identity::normalize_name;
use crate::model::{AggregatedResult, Conditions, Meeting, Race, ScratchedRunner};
use crate::rating::extract_rating;
use crate::timestamp::{parse_meeting_date, parse_timestamp, render_timestamp};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionsDraft {
    pub weather: Option<String>,
    pub track_condition: Option<String>,
    pub rail: Option<String>,
    pub updated_at: Option<DateTime<FixedOffset>>,
}

impl ConditionsDraft {
    // an untimestamped row never displaces a held snapshot
    fn superseded_by(&self, other: &ConditionsDraft) -> bool {
        match (self.updated_at, other.updated_at) {
            (Some(held), Some(incoming)) => incoming > held,
            (None, Some(_)) => true,
            (_, None) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveCondition {
    pub track_condition: String,
    pub weather: Option<String>,
    pub rail: Option<String>,
    pub updated_at: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerDraft {
    pub runner_number: Option<u64>,
    pub horse_name: Option<String>,
    pub runner_id: Option<u64>,
    pub updated_at: Option<DateTime<FixedOffset>>,
}

impl RunnerDraft {
    fn name_key(&self) -> Option<String> {
        self.horse_name.as_deref().and_then(normalize_name)
    }

    fn same_runner(&self, name_key: Option<&str>, runner_id: Option<u64>) -> bool {
        if let Some(key) = name_key
            && self.name_key().as_deref() == Some(key)
        {
            return true;
        }
        runner_id.is_some() && self.runner_id == runner_id
    }

    fn render(&self) -> ScratchedRunner {
        ScratchedRunner {
            runner_number: self.runner_number,
            horse_name: self.horse_name.clone(),
            runner_id: self.runner_id,
            updated_at: self.updated_at.as_ref().map(render_timestamp),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RaceDraft {
    pub scratchings: Vec<RunnerDraft>,
    reinstated_names: HashSet<String>,
    reinstated_ids: HashSet<u64>,
}

impl RaceDraft {
    fn is_reinstated(&self, name_key: Option<&str>, runner_id: Option<u64>) -> bool {
        name_key.is_some_and(|k| self.reinstated_names.contains(k))
            || runner_id.is_some_and(|id| self.reinstated_ids.contains(&id))
    }

    fn upsert(&mut self, runner: RunnerDraft) {
        let name_key = runner.name_key();
        let by_name = name_key.as_deref().and_then(|key| {
            self.scratchings
                .iter()
                .position(|e| e.name_key().as_deref() == Some(key))
        });
        let slot = by_name.or_else(|| {
            runner
                .runner_id
                .and_then(|id| self.scratchings.iter().position(|e| e.runner_id == Some(id)))
        });
        match slot {
            Some(idx) => self.scratchings[idx] = runner,
            None => self.scratchings.push(runner),
        }
    }

    fn sort(&mut self) {
        self.scratchings.sort_by(runner_order);
    }
}

fn runner_order(a: &RunnerDraft, b: &RunnerDraft) -> Ordering {
    let name = |r: &RunnerDraft| r.horse_name.as_deref().unwrap_or_default().to_lowercase();
    a.runner_number
        .is_none()
        .cmp(&b.runner_number.is_none())
        .then_with(|| a.runner_number.cmp(&b.runner_number))
        .then_with(|| name(a).cmp(&name(b)))
        .then_with(|| a.runner_id.cmp(&b.runner_id))
}

#[derive(Debug, Clone, Default)]
pub struct MeetingDraft {
    pub meeting_id: u64,
    pub venue: Option<String>,
    pub state: Option<String>,
    pub meeting_date: Option<String>,
    pub conditions: Option<ConditionsDraft>,
    pub races: BTreeMap<u64, RaceDraft>,
}

impl MeetingDraft {
    fn fill_identity(&mut self, row: &CanonicalRecord) {
        if self.venue.is_none() {
            self.venue = row.text("venue");
        }
        if self.state.is_none() {
            self.state = row.text("state");
        }
        if self.meeting_date.is_none() {
            self.meeting_date = row.text("meeting_date");
        }
    }

    pub fn has_rating(&self) -> bool {
        self.conditions
            .as_ref()
            .is_some_and(|c| c.track_condition.is_some())
    }

    pub fn race_numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.races.keys().copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeetingBook {
    meetings: BTreeMap<u64, MeetingDraft>,
}

impl MeetingBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn meetings(&self) -> impl Iterator<Item = &MeetingDraft> {
        self.meetings.values()
    }

    pub fn meeting(&self, meeting_id: u64) -> Option<&MeetingDraft> {
        self.meetings.get(&meeting_id)
    }

    pub fn meeting_ids(&self) -> Vec<u64> {
        self.meetings.keys().copied().collect()
    }

    fn meeting_for(&mut self, meeting_id: u64, row: &CanonicalRecord) -> &mut MeetingDraft {
        let meeting = self
            .meetings
            .entry(meeting_id)
            .or_insert_with(|| MeetingDraft {
                meeting_id,
                ..MeetingDraft::default()
            });
        meeting.fill_identity(row);
        meeting
    }

    pub fn apply_conditions(&mut self, rows: &[CanonicalRecord]) {
        for row in rows {
            self.apply_condition(row);
        }
    }

    pub fn apply_condition(&mut self, row: &CanonicalRecord) {
        let Some(meeting_id) = row.int("meeting_id") else {
            return;
        };
        let meeting = self.meeting_for(meeting_id, row);
        let incoming = ConditionsDraft {
            weather: row.text("weather"),
            track_condition: extract_rating(row, meeting.venue.as_deref()),
            rail: row.text("rail"),
            updated_at: row.text("updated_at").as_deref().and_then(parse_timestamp),
        };
        let replace = meeting
            .conditions
            .as_ref()
            .is_none_or(|held| held.superseded_by(&incoming));
        if replace {
            meeting.conditions = Some(incoming);
        }
    }

    /// Scratching rows for one batch. Rows explicitly marked not scratched
    /// reinstate their runner for the whole batch.
    pub fn apply_scratchings(&mut self, rows: &[CanonicalRecord]) {
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let (Some(meeting_id), Some(race_number)) =
                (row.int("meeting_id"), row.int("race_number"))
            else {
                continue;
            };
            let race = self
                .meeting_for(meeting_id, row)
                .races
                .entry(race_number)
                .or_default();
            if row.flag("scratched") == Some(false) {
                if let Some(key) = row.text("horse_name").as_deref().and_then(normalize_name) {
                    race.reinstated_names.insert(key);
                }
                if let Some(id) = row.int("runner_id") {
                    race.reinstated_ids.insert(id);
                }
                continue;
            }
            keyed.push((meeting_id, race_number, row));
        }

        for (meeting_id, race_number, row) in keyed {
            let runner = RunnerDraft {
                runner_number: row.int("runner_number"),
                horse_name: row.text("horse_name"),
                runner_id: row.int("runner_id"),
                updated_at: row.text("updated_at").as_deref().and_then(parse_timestamp),
            };
            let name_key = runner.name_key();
            if name_key.is_none() && runner.runner_id.is_none() {
                continue;
            }
            let Some(race) = self
                .meetings
                .get_mut(&meeting_id)
                .and_then(|m| m.races.get_mut(&race_number))
            else {
                continue;
            };
            if race.is_reinstated(name_key.as_deref(), runner.runner_id) {
                continue;
            }
            race.upsert(runner);
        }
    }

    /// Entries already present are only enriched, never overwritten.
    pub fn augment(&mut self, meeting_id: u64, runners: &MeetingRunners) {
        let Some(meeting) = self.meetings.get_mut(&meeting_id) else {
            return;
        };
        for entry in runners.entries() {
            let Some(race_number) = entry.race_number else {
                continue;
            };
            let race = meeting.races.entry(race_number).or_default();
            if entry.scratched != Some(true) {
                continue;
            }
            let name_key = entry.name_key();
            if let Some(existing) = race
                .scratchings
                .iter_mut()
                .find(|e| e.same_runner(name_key.as_deref(), entry.runner_id))
            {
                if existing.runner_number.is_none() {
                    existing.runner_number = entry.runner_number;
                }
                if existing.runner_id.is_none() {
                    existing.runner_id = entry.runner_id;
                }
                if existing.horse_name.is_none() {
                    existing.horse_name = entry.horse_name.clone();
                }
                continue;
            }
            if race.is_reinstated(name_key.as_deref(), entry.runner_id) {
                continue;
            }
            race.scratchings.push(RunnerDraft {
                runner_number: entry.runner_number,
                horse_name: entry.horse_name.clone(),
                runner_id: entry.runner_id,
                updated_at: None,
            });
        }
        for race in meeting.races.values_mut() {
            race.sort();
        }
    }

    /// Apply a meeting-scoped live rating: always when no rating is held,
    /// otherwise unless both sides are timestamped and the live one is older.
    pub fn apply_live_condition(&mut self, meeting_id: u64, live: LiveCondition) {
        let Some(meeting) = self.meetings.get_mut(&meeting_id) else {
            return;
        };
        let Some(held) = meeting.conditions.as_mut() else {
            meeting.conditions = Some(ConditionsDraft {
                weather: live.weather,
                track_condition: Some(live.track_condition),
                rail: live.rail,
                updated_at: live.updated_at,
            });
            return;
        };
        let stale = match (held.updated_at, live.updated_at) {
            (Some(h), Some(l)) => l < h,
            _ => false,
        };
        if held.track_condition.is_some() && stale {
            return;
        }
        held.track_condition = Some(live.track_condition);
        if let Some(ts) = live.updated_at
            && held.updated_at.is_none_or(|h| ts > h)
        {
            held.updated_at = Some(ts);
        }
        if held.weather.is_none() {
            held.weather = live.weather;
        }
        if held.rail.is_none() {
            held.rail = live.rail;
        }
    }

    pub fn apply_scanned_rating(&mut self, meeting_id: u64, rating: String) {
        let Some(meeting) = self.meetings.get_mut(&meeting_id) else {
            return;
        };
        meeting
            .conditions
            .get_or_insert_with(ConditionsDraft::default)
            .track_condition = Some(rating);
    }

    pub fn finish(self, date: NaiveDate) -> AggregatedResult {
        let meetings = self
            .meetings
            .into_values()
            .map(|m| {
                let races = m
                    .races
                    .into_iter()
                    .map(|(race_number, mut race)| {
                        race.sort();
                        Race {
                            race_number,
                            scratchings: race.scratchings.iter().map(RunnerDraft::render).collect(),
                        }
                    })
                    .collect();
                Meeting {
                    meeting_id: m.meeting_id,
                    venue: m.venue,
                    state: m.state,
                    conditions: m.conditions.map(|c| Conditions {
                        weather: c.weather,
                        track_condition: c.track_condition,
                        rail: c.rail,
                        updated_at: c.updated_at.as_ref().map(render_timestamp),
                    }),
                    races,
                }
            })
            .collect();
        AggregatedResult {
            date: date.format("%Y-%m-%d").to_string(),
            meetings,
        }
    }
}

pub fn matches_date(row: &CanonicalRecord, date: NaiveDate) -> bool {
    row.text("meeting_date")
        .as_deref()
        .and_then(parse_meeting_date)
        .is_none_or(|d| d == date)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::{LiveCondition, MeetingBook, matches_date};
    use crate::backfill::{MeetingRunners, RunnerIndexEntry};
    use crate::canonical::CanonicalRecord;

    fn rec(v: serde_json::Value) -> CanonicalRecord {
        CanonicalRecord::from_value(&v)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date")
    }

    #[test]
    fn freshest_condition_wins_in_either_order() {
        let older = rec(json!({"meetingId": 1, "trackCondition": "Soft 6", "updated": "2024-05-01T08:00:00Z"}));
        let newer = rec(json!({"meetingId": 1, "trackCondition": "Good 4", "updated": "2024-05-01T09:00:00Z"}));
        for rows in [[older.clone(), newer.clone()], [newer.clone(), older.clone()]] {
            let mut book = MeetingBook::new();
            book.apply_conditions(&rows);
            let out = book.finish(day());
            let cond = out.meetings[0].conditions.as_ref().expect("conditions");
            assert_eq!(cond.track_condition.as_deref(), Some("Good4"));
        }
    }

    #[test]
    fn untimestamped_row_never_replaces_timestamped() {
        let mut book = MeetingBook::new();
        book.apply_conditions(&[
            rec(json!({"meetingId": 1, "rating": "G3", "updated": "2024-05-01T08:00:00Z"})),
            rec(json!({"meetingId": 1, "rating": "H10"})),
        ]);
        let out = book.finish(day());
        let cond = out.meetings[0].conditions.as_ref().expect("conditions");
        assert_eq!(cond.track_condition.as_deref(), Some("Good3"));
    }

    #[test]
    fn later_row_for_same_name_replaces_earlier() {
        let mut book = MeetingBook::new();
        book.apply_scratchings(&[
            rec(json!({"meetingId": 1, "raceNumber": 2, "horseName": "Fast Lad", "runnerId": 10})),
            rec(json!({"meetingId": 1, "raceNumber": 2, "horseName": "fast-lad", "runnerId": 11, "runnerNumber": 4})),
        ]);
        let out = book.finish(day());
        let race = &out.meetings[0].races[0];
        assert_eq!(race.scratchings.len(), 1);
        assert_eq!(race.scratchings[0].runner_id, Some(11));
        assert_eq!(race.scratchings[0].runner_number, Some(4));
    }

    #[test]
    fn not_scratched_marker_reinstates_runner() {
        let mut book = MeetingBook::new();
        book.apply_scratchings(&[
            rec(json!({"meetingId": 1, "raceNumber": 2, "horseName": "Fast Lad", "scratched": true})),
            rec(json!({"meetingId": 1, "raceNumber": 2, "horseName": "Fast Lad", "scratched": "false"})),
            rec(json!({"meetingId": 1, "raceNumber": 2, "runnerId": 7})),
            rec(json!({"meetingId": 1, "raceNumber": 2})),
        ]);
        let out = book.finish(day());
        let race = &out.meetings[0].races[0];
        assert_eq!(race.scratchings.len(), 1);
        assert_eq!(race.scratchings[0].runner_id, Some(7));
    }

    #[test]
    fn augmentation_enriches_and_appends() {
        let mut book = MeetingBook::new();
        book.apply_scratchings(&[rec(json!({
            "meetingId": 100, "raceNumber": 3, "horseName": "Fast Lad", "runnerId": 55, "scratched": true
        }))]);
        let mut runners = MeetingRunners::default();
        runners.add(RunnerIndexEntry {
            runner_id: Some(55),
            runner_number: Some(7),
            horse_name: Some("Fast Lad".to_string()),
            race_number: Some(3),
            scratched: Some(true),
        });
        runners.add(RunnerIndexEntry {
            runner_id: Some(56),
            runner_number: Some(2),
            horse_name: Some("Other".to_string()),
            race_number: Some(3),
            scratched: Some(true),
        });
        runners.add(RunnerIndexEntry {
            runner_id: Some(80),
            runner_number: Some(1),
            horse_name: Some("Runs".to_string()),
            race_number: Some(5),
            scratched: Some(false),
        });
        book.augment(100, &runners);
        let out = book.finish(day());
        let meeting = &out.meetings[0];
        let race3 = meeting.race(3).expect("race 3");
        assert_eq!(race3.scratchings.len(), 2);
        assert_eq!(race3.scratchings[0].runner_id, Some(56));
        assert_eq!(race3.scratchings[1].runner_id, Some(55));
        assert_eq!(race3.scratchings[1].runner_number, Some(7));
        assert!(meeting.race(5).expect("race 5").scratchings.is_empty());
    }

    #[test]
    fn live_condition_seeds_or_overrides() {
        let mut book = MeetingBook::new();
        book.apply_scratchings(&[rec(json!({"meetingId": 3, "raceNumber": 1, "horseName": "X"}))]);
        book.apply_live_condition(
            3,
            LiveCondition {
                track_condition: "Good4".to_string(),
                weather: Some("Fine".to_string()),
                rail: None,
                updated_at: None,
            },
        );
        let out = book.finish(day());
        let cond = out.meetings[0].conditions.as_ref().expect("conditions");
        assert_eq!(cond.track_condition.as_deref(), Some("Good4"));
        assert_eq!(cond.weather.as_deref(), Some("Fine"));
    }

    #[test]
    fn date_filter_only_rejects_well_formed_mismatch() {
        assert!(matches_date(&rec(json!({"meetingDate": "2024-05-01"})), day()));
        assert!(!matches_date(&rec(json!({"meetingDate": "2024-05-02"})), day()));
        assert!(matches_date(&rec(json!({"meetingDate": "2024-05-02T00:00:00"})), day()));
        assert!(matches_date(&rec(json!({})), day()));
    }

    #[test]
    fn scratchings_sort_numbered_first() {
        let mut book = MeetingBook::new();
        book.apply_scratchings(&[
            rec(json!({"meetingId": 1, "raceNumber": 1, "horseName": "zulu"})),
            rec(json!({"meetingId": 1, "raceNumber": 1, "horseName": "Bravo", "runnerNumber": 9})),
            rec(json!({"meetingId": 1, "raceNumber": 1, "horseName": "Alpha"})),
            rec(json!({"meetingId": 1, "raceNumber": 1, "horseName": "Charlie", "runnerNumber": 2})),
        ]);
        let out = book.finish(day());
        let names: Vec<_> = out.meetings[0].races[0]
            .scratchings
            .iter()
            .filter_map(|s| s.horse_name.clone())
            .collect();
        assert_eq!(names, ["Charlie", "Bravo", "Alpha", "zulu"]);
    }
}
