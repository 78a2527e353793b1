use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{GridSnapshot, SnapshotSource};
use crate::error::FetchError;

/// Workers allowed to outlive their timeout before fetches fail fast.
pub const MAX_STALLED_WORKERS: usize = 4;

/// Bounds the latency of another source.
///
/// The inner fetch runs on a detached worker thread. If it does not answer
/// within the timeout the caller gets [`FetchError::Timeout`]; the worker is
/// left to finish on its own and its late result is discarded. A provider
/// that never returns therefore pins one thread per timed-out fetch, which
/// at the default 15-minute tick is one per region per tick. Once
/// `max_stalled` workers are outstanding, further fetches fail immediately
/// with [`FetchError::Provider`] until one of them exits.
pub struct TimeoutSource {
    inner: Arc<dyn SnapshotSource>,
    timeout: Duration,
    in_flight: Arc<AtomicUsize>,
    max_stalled: usize,
}

impl TimeoutSource {
    pub fn new(inner: Arc<dyn SnapshotSource>, timeout: Duration) -> Self {
        Self::with_stall_limit(inner, timeout, MAX_STALLED_WORKERS)
    }

    pub fn with_stall_limit(
        inner: Arc<dyn SnapshotSource>,
        timeout: Duration,
        max_stalled: usize,
    ) -> Self {
        Self {
            inner,
            timeout,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_stalled,
        }
    }

    /// Workers that have not returned yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Releases a worker slot when the worker exits, panics included.
struct Slot(Arc<AtomicUsize>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl SnapshotSource for TimeoutSource {
    fn fetch(&self, region: &str, at: DateTime<Utc>) -> Result<GridSnapshot, FetchError> {
        if self.in_flight.fetch_add(1, Ordering::AcqRel) >= self.max_stalled {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(FetchError::Provider(format!(
                "{} fetch workers still stalled",
                self.max_stalled
            )));
        }
        let slot = Slot(Arc::clone(&self.in_flight));

        let (tx, rx) = mpsc::sync_channel(1);
        let inner = Arc::clone(&self.inner);
        let region = region.to_string();

        thread::Builder::new()
            .name(format!("fetch-{}", inner.name()))
            .spawn(move || {
                let _slot = slot;
                // receiver may already be gone after a timeout
                let _ = tx.send(inner.fetch(&region, at));
            })
            .map_err(|e| FetchError::Provider(format!("cannot spawn fetch worker: {e}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(FetchError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(FetchError::Provider(
                "fetch worker exited without a result".to_string(),
            )),
        }
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow(Duration);

    impl SnapshotSource for Slow {
        fn fetch(&self, region: &str, at: DateTime<Utc>) -> Result<GridSnapshot, FetchError> {
            thread::sleep(self.0);
            Ok(GridSnapshot {
                region: region.to_string(),
                at,
                indicative_price: 42.0,
                renewable_forecast_mw: 900.0,
                grid_demand_mw: 800.0,
                curtailment_risk: false,
            })
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[test]
    fn fast_source_passes_through() {
        let src = TimeoutSource::new(Arc::new(Slow(Duration::ZERO)), Duration::from_secs(2));
        let snap = src.fetch("ON", Utc::now()).unwrap();
        assert_eq!(snap.indicative_price, 42.0);
    }

    #[test]
    fn slow_source_times_out() {
        let src = TimeoutSource::new(
            Arc::new(Slow(Duration::from_millis(500))),
            Duration::from_millis(20),
        );
        let err = src.fetch("ON", Utc::now()).unwrap_err();
        assert!(matches!(err, FetchError::Timeout { timeout_ms: 20 }));
    }

    #[test]
    fn stalled_workers_are_capped() {
        let src = TimeoutSource::with_stall_limit(
            Arc::new(Slow(Duration::from_millis(300))),
            Duration::from_millis(10),
            2,
        );
        for _ in 0..2 {
            let err = src.fetch("ON", Utc::now()).unwrap_err();
            assert!(matches!(err, FetchError::Timeout { .. }));
        }
        assert_eq!(src.in_flight(), 2);
        let err = src.fetch("ON", Utc::now()).unwrap_err();
        assert!(matches!(err, FetchError::Provider(_)));

        thread::sleep(Duration::from_millis(600));
        assert_eq!(src.in_flight(), 0);
        assert!(matches!(
            src.fetch("ON", Utc::now()),
            Err(FetchError::Timeout { .. })
        ));
    }
}
