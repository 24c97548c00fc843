use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backfill::{
    BackfillIndex, IndexBuilder, MeetingRunners, MeetingTarget, Params, meeting_params,
    venue_search_params,
};
use crate::canonical::CanonicalRecord;
use crate::config::{Endpoints, UpdatesConfig};
use crate::error::{FetchError, Result, UpdatesError};
use crate::http_client::HttpTransport;
use crate::identity::normalize_name;
use crate::merge::{LiveCondition, MeetingBook, matches_date};
use crate::model::AggregatedResult;
use crate::rating::{RATING_KEYS, extract_rating, scan_for_rating};
use crate::scratch_status::ScratchHeuristic;
use crate::timestamp::parse_timestamp;
use crate::upstream::{Fetcher, PayloadFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryFeed {
    Scratchings,
    Conditions,
}

impl PrimaryFeed {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "scratchings" => Some(Self::Scratchings),
            "conditions" => Some(Self::Conditions),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Scratchings => "scratchings",
            Self::Conditions => "conditions",
        }
    }
}

/// The provider honours a different subset of these per endpoint.
pub fn date_param_shapes(date: NaiveDate) -> Vec<Params> {
    let day = date.format("%Y-%m-%d").to_string();
    vec![
        Vec::new(),
        vec![("date", day.clone())],
        vec![("meetingDate", day.clone())],
        vec![("date_from", day.clone()), ("date_to", day.clone())],
        vec![("startDate", day.clone()), ("endDate", day)],
    ]
}

type ScratchKey = (Option<u64>, Option<u64>, Option<u64>, Option<String>);

fn scratch_key(row: &CanonicalRecord) -> ScratchKey {
    (
        row.int("meeting_id"),
        row.int("race_number"),
        row.int("runner_id"),
        row.text("horse_name").as_deref().and_then(normalize_name),
    )
}

fn condition_key(row: &CanonicalRecord) -> (Option<u64>, Option<String>, Vec<Option<String>>) {
    (
        row.int("meeting_id"),
        row.text("updated_at"),
        RATING_KEYS.iter().map(|k| row.text(k)).collect(),
    )
}

fn dedup_by<K, F>(rows: Vec<CanonicalRecord>, key: F) -> Vec<CanonicalRecord>
where
    K: Eq + Hash,
    F: Fn(&CanonicalRecord) -> K,
{
    let mut seen = HashSet::new();
    rows.into_iter().filter(|row| seen.insert(key(row))).collect()
}

struct RatingSource<'a> {
    url: &'a str,
    params: Params,
    format: PayloadFormat,
}

/// The reconciliation engine: one `aggregate` call per target date.
pub struct Aggregator {
    fetcher: Fetcher,
    endpoints: Endpoints,
    index: Arc<BackfillIndex>,
    heuristic: ScratchHeuristic,
    pool: Option<rayon::ThreadPool>,
}

impl Aggregator {
    pub fn new(
        fetcher: Fetcher,
        endpoints: Endpoints,
        index: Arc<BackfillIndex>,
        heuristic: ScratchHeuristic,
        parallelism: usize,
    ) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .build()
            .ok();
        Self {
            fetcher,
            endpoints,
            index,
            heuristic,
            pool,
        }
    }

    pub fn from_config(config: &UpdatesConfig, index: Arc<BackfillIndex>) -> Result<Self> {
        let transport = HttpTransport::new(config.timeout)
            .map_err(|err| UpdatesError::Config(format!("{err:#}")))?;
        Ok(Self::new(
            Fetcher::new(Arc::new(transport), config.api_key.clone()),
            config.endpoints(),
            index,
            ScratchHeuristic::from_flag(config.broad_scratch_scan),
            config.fetch_parallelism,
        ))
    }

    pub fn index(&self) -> &Arc<BackfillIndex> {
        &self.index
    }

    pub fn aggregate(&self, date: NaiveDate) -> Result<AggregatedResult> {
        with_fetch_pool(&self.pool, || self.run(date))
    }

    /// Unfiltered rows of one primary feed, as the provider sends them.
    pub fn raw_rows(&self, feed: PrimaryFeed) -> Result<Vec<Value>> {
        let url = match feed {
            PrimaryFeed::Scratchings => &self.endpoints.scratchings,
            PrimaryFeed::Conditions => &self.endpoints.conditions,
        };
        Ok(self.fetcher.fetch_json(url, &[])?)
    }

    fn run(&self, date: NaiveDate) -> Result<AggregatedResult> {
        let (scratchings, conditions) = rayon::join(
            || self.fetch_primary(PrimaryFeed::Scratchings, date),
            || self.fetch_primary(PrimaryFeed::Conditions, date),
        );
        let (scratch_rows, condition_rows) = match (scratchings, conditions) {
            (Err(s), Err(c)) => {
                return Err(UpdatesError::Aggregation {
                    date: date.to_string(),
                    scratchings: s.to_string(),
                    conditions: c.to_string(),
                });
            }
            (s, c) => (
                primary_or_empty(PrimaryFeed::Scratchings, s),
                primary_or_empty(PrimaryFeed::Conditions, c),
            ),
        };

        let scratch_rows = dedup_by(keep_date(scratch_rows, date), scratch_key);
        let condition_rows = dedup_by(keep_date(condition_rows, date), condition_key);

        let mut book = MeetingBook::new();
        book.apply_conditions(&condition_rows);
        book.apply_scratchings(&scratch_rows);

        self.augment(&mut book, date);
        self.backfill_conditions(&mut book, date);

        let result = book.finish(date);
        let counts = result.counts();
        info!(
            %date,
            scratching_rows = scratch_rows.len(),
            condition_rows = condition_rows.len(),
            meetings = counts.meetings,
            races = counts.races,
            scratchings = counts.scratchings,
            "aggregated updates"
        );
        Ok(result)
    }

    fn fetch_primary(
        &self,
        feed: PrimaryFeed,
        date: NaiveDate,
    ) -> std::result::Result<Vec<CanonicalRecord>, FetchError> {
        let url = match feed {
            PrimaryFeed::Scratchings => &self.endpoints.scratchings,
            PrimaryFeed::Conditions => &self.endpoints.conditions,
        };
        let results: Vec<std::result::Result<Vec<Value>, FetchError>> = date_param_shapes(date)
            .par_iter()
            .map(|params| self.fetcher.fetch_json(url, params))
            .collect();

        let mut rows = Vec::new();
        let mut last_err = None;
        let mut any_ok = false;
        for result in results {
            match result {
                Ok(batch) => {
                    any_ok = true;
                    rows.extend(batch.iter().map(CanonicalRecord::from_value));
                }
                Err(err) => {
                    debug!(feed = feed.label(), %err, "parameter shape failed");
                    last_err = Some(err);
                }
            }
        }
        match last_err {
            Some(err) if !any_ok => Err(err),
            _ => Ok(rows),
        }
    }

    fn augment(&self, book: &mut MeetingBook, date: NaiveDate) {
        let targets: Vec<(MeetingTarget, BTreeSet<u64>)> = book
            .meetings()
            .map(|m| {
                let target = MeetingTarget {
                    meeting_id: m.meeting_id,
                    venue: m.venue.clone(),
                    date: Some(m.meeting_date.clone().unwrap_or_else(|| date.to_string())),
                };
                (target, m.race_numbers().collect())
            })
            .collect();

        let builder = IndexBuilder {
            fetcher: &self.fetcher,
            endpoints: &self.endpoints,
            heuristic: self.heuristic,
        };
        let found: Vec<(u64, Arc<MeetingRunners>)> = targets
            .par_iter()
            .map(|(target, races)| (target.meeting_id, builder.ensure(&self.index, target, races)))
            .collect();
        for (meeting_id, runners) in found {
            book.augment(meeting_id, &runners);
        }
    }

    fn backfill_conditions(&self, book: &mut MeetingBook, date: NaiveDate) {
        let live: Vec<(u64, Option<LiveCondition>)> = book
            .meetings()
            .map(|m| (m.meeting_id, m.venue.clone()))
            .collect::<Vec<_>>()
            .par_iter()
            .map(|(meeting_id, venue)| (*meeting_id, self.live_condition(*meeting_id, venue.as_deref())))
            .collect();
        for (meeting_id, found) in live {
            if let Some(found) = found {
                book.apply_live_condition(meeting_id, found);
            }
        }

        let unrated: Vec<MeetingTarget> = book
            .meetings()
            .filter(|m| !m.has_rating())
            .map(|m| MeetingTarget {
                meeting_id: m.meeting_id,
                venue: m.venue.clone(),
                date: Some(m.meeting_date.clone().unwrap_or_else(|| date.to_string())),
            })
            .collect();
        if unrated.is_empty() {
            return;
        }
        let scanned: Vec<(u64, Option<String>)> = unrated
            .par_iter()
            .map(|target| (target.meeting_id, self.scan_rating(target)))
            .collect();
        for (meeting_id, rating) in scanned {
            if let Some(rating) = rating {
                book.apply_scanned_rating(meeting_id, rating);
            }
        }
    }

    /// Freshest rating-bearing row the conditions feed returns for one meeting.
    pub fn live_condition(&self, meeting_id: u64, venue: Option<&str>) -> Option<LiveCondition> {
        let rows = match self
            .fetcher
            .fetch_json(&self.endpoints.conditions, &meeting_params(meeting_id))
        {
            Ok(rows) => rows,
            Err(err) => {
                debug!(meeting_id, %err, "live condition lookup failed");
                return None;
            }
        };

        let mut best: Option<LiveCondition> = None;
        for raw in &rows {
            let row = CanonicalRecord::from_value(raw);
            if row.int("meeting_id").is_some_and(|id| id != meeting_id) {
                continue;
            }
            let row_venue = row.text("venue");
            let Some(rating) = extract_rating(&row, row_venue.as_deref().or(venue)) else {
                continue;
            };
            let candidate = LiveCondition {
                track_condition: rating,
                weather: row.text("weather"),
                rail: row.text("rail"),
                updated_at: row.text("updated_at").as_deref().and_then(parse_timestamp),
            };
            let fresher = match (&best, candidate.updated_at) {
                (None, _) => true,
                (Some(held), Some(ts)) => held.updated_at.is_none_or(|h| ts > h),
                (Some(_), None) => false,
            };
            if fresher {
                best = Some(candidate);
            }
        }
        best
    }

    fn scan_rating(&self, target: &MeetingTarget) -> Option<String> {
        let venue = target.venue.as_deref();
        for source in self.rating_sources(target) {
            let rows = match self.fetcher.fetch(source.url, &source.params, source.format) {
                Ok(rows) => rows,
                Err(err) => {
                    debug!(meeting_id = target.meeting_id, url = source.url, %err, "rating source failed");
                    continue;
                }
            };
            if let Some(found) = rows.iter().find_map(|row| scan_for_rating(row, venue)) {
                debug!(meeting_id = target.meeting_id, url = source.url, rating = %found, "rating recovered by scan");
                return Some(found);
            }
        }
        None
    }

    fn rating_sources(&self, target: &MeetingTarget) -> Vec<RatingSource<'_>> {
        let searches = match (target.venue.as_deref(), target.date.as_deref()) {
            (Some(venue), Some(date)) => venue_search_params(date, venue),
            _ => Vec::new(),
        };
        let by_meeting = meeting_params(target.meeting_id);
        let mut form_params = by_meeting.clone();
        form_params.push(("raceNumber", "0".to_string()));

        let mut sources = vec![RatingSource {
            url: &self.endpoints.form,
            params: form_params,
            format: PayloadFormat::Json,
        }];
        sources.extend(searches.iter().map(|params| RatingSource {
            url: &self.endpoints.fields_json,
            params: params.clone(),
            format: PayloadFormat::Json,
        }));
        sources.push(RatingSource {
            url: &self.endpoints.meeting_csv,
            params: by_meeting,
            format: PayloadFormat::Csv,
        });
        for params in searches {
            sources.push(RatingSource {
                url: &self.endpoints.meeting_csv,
                params: params.clone(),
                format: PayloadFormat::Csv,
            });
            sources.push(RatingSource {
                url: &self.endpoints.fields_csv,
                params,
                format: PayloadFormat::Csv,
            });
        }
        sources
    }
}

fn primary_or_empty(
    feed: PrimaryFeed,
    result: std::result::Result<Vec<CanonicalRecord>, FetchError>,
) -> Vec<CanonicalRecord> {
    match result {
        Ok(rows) => rows,
        Err(err) => {
            warn!(feed = feed.label(), %err, "primary feed failed; continuing with partial data");
            Vec::new()
        }
    }
}

fn keep_date(rows: Vec<CanonicalRecord>, date: NaiveDate) -> Vec<CanonicalRecord> {
    rows.into_iter().filter(|row| matches_date(row, date)).collect()
}

fn with_fetch_pool<T>(pool: &Option<rayon::ThreadPool>, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    if let Some(pool) = pool.as_ref() {
        pool.install(action)
    } else {
        action()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::{PrimaryFeed, condition_key, date_param_shapes, dedup_by, scratch_key};
    use crate::canonical::CanonicalRecord;

    fn rec(v: serde_json::Value) -> CanonicalRecord {
        CanonicalRecord::from_value(&v)
    }

    #[test]
    fn five_param_shapes_starting_unfiltered() {
        let shapes = date_param_shapes(NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date"));
        assert_eq!(shapes.len(), 5);
        assert!(shapes[0].is_empty());
        assert_eq!(shapes[3], vec![("date_from", "2024-05-01".to_string()), ("date_to", "2024-05-01".to_string())]);
    }

    #[test]
    fn scratch_dedup_uses_normalized_name() {
        let rows = vec![
            rec(json!({"meetingId": 1, "raceNumber": 2, "runnerId": 5, "horseName": "Fast Lad"})),
            rec(json!({"meetingId": 1, "raceNumber": 2, "runnerId": 5, "horseName": "FAST  LAD"})),
            rec(json!({"meetingId": 1, "raceNumber": 2, "runnerId": 6, "horseName": "Fast Lad"})),
        ];
        assert_eq!(dedup_by(rows, scratch_key).len(), 2);
    }

    #[test]
    fn condition_dedup_keys_on_timestamp_and_rating() {
        let rows = vec![
            rec(json!({"meetingId": 1, "updated": "2024-05-01T08:00:00Z", "trackCondition": "G4"})),
            rec(json!({"meetingId": 1, "updated": "2024-05-01T08:00:00Z", "trackCondition": "G4", "weather": "Fine"})),
            rec(json!({"meetingId": 1, "updated": "2024-05-01T09:00:00Z", "trackCondition": "G4"})),
        ];
        assert_eq!(dedup_by(rows, condition_key).len(), 2);
    }

    #[test]
    fn feed_names_parse() {
        assert_eq!(PrimaryFeed::parse("Conditions"), Some(PrimaryFeed::Conditions));
        assert_eq!(PrimaryFeed::parse("form"), None);
    }
}
