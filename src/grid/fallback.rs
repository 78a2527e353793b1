use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{SnapshotCache, SnapshotReading, SnapshotSource};
use crate::model::Provenance;
use crate::synthetic::SyntheticGrid;

/// Live source with cached and synthetic fallbacks.
///
/// Never fails: a live error degrades to the last cached live snapshot for
/// the region, then to the synthetic generator, with confidence lowered to
/// match.
pub struct FallbackSource {
    primary: Box<dyn SnapshotSource>,
    cache: SnapshotCache,
    synthetic: SyntheticGrid,
}

impl FallbackSource {
    pub fn new(
        primary: Box<dyn SnapshotSource>,
        cache: SnapshotCache,
        synthetic: SyntheticGrid,
    ) -> Self {
        Self {
            primary,
            cache,
            synthetic,
        }
    }

    /// Reads the best available snapshot for `region` at `at`.
    pub fn read(&self, region: &str, at: DateTime<Utc>) -> SnapshotReading {
        match self.primary.fetch(region, at) {
            Ok(snapshot) => {
                self.cache.insert(snapshot.clone());
                SnapshotReading::new(snapshot, Provenance::Live)
            }
            Err(e) => {
                warn!(
                    region,
                    source = self.primary.name(),
                    error = %e,
                    "grid snapshot fetch failed, using fallback"
                );
                if let Some(mut snapshot) = self.cache.get(region) {
                    debug!(region, cached_at = %snapshot.at, "serving cached snapshot");
                    snapshot.at = at;
                    SnapshotReading::new(snapshot, Provenance::Cached)
                } else {
                    SnapshotReading::new(self.synthetic.snapshot(region, at), Provenance::Synthetic)
                }
            }
        }
    }
}
