use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tracing::debug;

use crate::error::Result;
use crate::model::AggregatedResult;

/// Date-keyed snapshots for a serving layer. Builds run outside the lock, so
/// two callers racing on a cold date may both build; the first insert wins.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    snapshots: Mutex<HashMap<NaiveDate, Arc<AggregatedResult>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, date: NaiveDate) -> Option<Arc<AggregatedResult>> {
        self.snapshots
            .lock()
            .expect("snapshot cache lock poisoned")
            .get(&date)
            .cloned()
    }

    pub fn get_or_build<F>(&self, date: NaiveDate, build: F) -> Result<Arc<AggregatedResult>>
    where
        F: FnOnce(NaiveDate) -> Result<AggregatedResult>,
    {
        if let Some(hit) = self.get(date) {
            return Ok(hit);
        }
        let built = Arc::new(build(date)?);
        let mut guard = self.snapshots.lock().expect("snapshot cache lock poisoned");
        Ok(Arc::clone(guard.entry(date).or_insert(built)))
    }

    /// Rebuild unconditionally and replace whatever is cached. A failed build
    /// leaves the previous snapshot in place.
    pub fn prewarm<F>(&self, date: NaiveDate, build: F) -> Result<Arc<AggregatedResult>>
    where
        F: FnOnce(NaiveDate) -> Result<AggregatedResult>,
    {
        let built = Arc::new(build(date)?);
        debug!(%date, "snapshot prewarmed");
        self.snapshots
            .lock()
            .expect("snapshot cache lock poisoned")
            .insert(date, Arc::clone(&built));
        Ok(built)
    }

    pub fn evict(&self, date: NaiveDate) {
        self.snapshots
            .lock()
            .expect("snapshot cache lock poisoned")
            .remove(&date);
    }

    pub fn clear(&self) {
        self.snapshots
            .lock()
            .expect("snapshot cache lock poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.snapshots
            .lock()
            .expect("snapshot cache lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
