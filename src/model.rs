use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScratchedRunner {
    pub runner_number: Option<u64>,
    pub horse_name: Option<String>,
    pub runner_id: Option<u64>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Race {
    pub race_number: u64,
    pub scratchings: Vec<ScratchedRunner>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    pub weather: Option<String>,
    pub track_condition: Option<String>,
    pub rail: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    pub meeting_id: u64,
    pub venue: Option<String>,
    pub state: Option<String>,
    pub conditions: Option<Conditions>,
    pub races: Vec<Race>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub date: String,
    pub meetings: Vec<Meeting>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCounts {
    pub meetings: usize,
    pub races: usize,
    pub scratchings: usize,
}

impl AggregatedResult {
    pub fn counts(&self) -> UpdateCounts {
        let races = self.meetings.iter().map(|m| m.races.len()).sum();
        let scratchings = self
            .meetings
            .iter()
            .flat_map(|m| m.races.iter())
            .map(|r| r.scratchings.len())
            .sum();
        UpdateCounts {
            meetings: self.meetings.len(),
            races,
            scratchings,
        }
    }

    pub fn only_meeting(mut self, meeting_id: u64) -> Self {
        self.meetings.retain(|m| m.meeting_id == meeting_id);
        self
    }

    pub fn meeting(&self, meeting_id: u64) -> Option<&Meeting> {
        self.meetings.iter().find(|m| m.meeting_id == meeting_id)
    }
}

impl Meeting {
    pub fn race(&self, race_number: u64) -> Option<&Race> {
        self.races.iter().find(|r| r.race_number == race_number)
    }
}
