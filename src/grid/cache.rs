use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::GridSnapshot;

/// Last good live snapshot per region, valid for a fixed TTL.
///
/// Owned by whoever builds the [`super::FallbackSource`]; there is no
/// process-wide instance.
#[derive(Debug)]
pub struct SnapshotCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, GridSnapshot)>>,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, snapshot: GridSnapshot) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(snapshot.region.clone(), (Instant::now(), snapshot));
        }
    }

    /// Returns the cached snapshot for `region` if it is younger than the TTL.
    pub fn get(&self, region: &str) -> Option<GridSnapshot> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(region)
            .filter(|(stored, _)| stored.elapsed() < self.ttl)
            .map(|(_, snapshot)| snapshot.clone())
    }
}
