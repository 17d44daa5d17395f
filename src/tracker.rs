// One refresh cycle: fetch, decode, reconcile. Only one cycle runs at a time.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::feed::FeedSource;
use crate::markers::MarkerLayer;
use crate::poller::CycleRunner;
use crate::reconcile::{CycleReport, ReconcileContext};
use crate::siri;

struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Tracker<S> {
    source: S,
    context: Mutex<ReconcileContext>,
    layer: Mutex<MarkerLayer>,
    in_flight: AtomicBool,
}

impl<S: FeedSource> Tracker<S> {
    pub fn new(source: S, context: ReconcileContext) -> Self {
        Self {
            source,
            context: Mutex::new(context),
            layer: Mutex::new(MarkerLayer::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Context first, then layer. Every caller takes them in this order.
    pub fn lock(&self) -> (MutexGuard<'_, ReconcileContext>, MutexGuard<'_, MarkerLayer>) {
        let context = self.context.lock().unwrap_or_else(PoisonError::into_inner);
        let layer = self.layer.lock().unwrap_or_else(PoisonError::into_inner);
        (context, layer)
    }

    pub fn layer(&self) -> MutexGuard<'_, MarkerLayer> {
        self.layer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Runs a cycle, or returns `Ok(None)` if another one is already in flight.
    pub async fn refresh(&self) -> Result<Option<CycleReport>> {
        let Some(_flight) = FlightGuard::acquire(&self.in_flight) else {
            return Ok(None);
        };

        let documents = self.source.fetch_all().await?;
        let observations = siri::parse_documents(&documents)?;

        let (mut context, mut layer) = self.lock();
        let report = context.run_cycle(&observations, Utc::now(), &mut *layer);
        Ok(Some(report))
    }
}

impl<S: FeedSource> CycleRunner for Tracker<S> {
    async fn run_cycle(&self, reason: &'static str) {
        match self.refresh().await {
            Ok(Some(report)) => info!(
                reason,
                created = report.created,
                updated = report.updated,
                removed = report.removed,
                stale = report.skipped_stale,
                "Refreshed {} vehicle activities",
                report.observed
            ),
            Ok(None) => debug!(reason, "Refresh already in flight, skipping"),
            Err(e) => warn!(reason, "Refresh failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use crate::fleet::{Classifier, InterestSets};
    use crate::siri::tests::{activity, delivery};
    use bytes::Bytes;
    use chrono::Duration;
    use std::sync::Arc;
    use tokio::sync::Notify;

    struct StaticFeed(Vec<String>);

    impl FeedSource for StaticFeed {
        async fn fetch_all(&self) -> Result<Vec<Bytes>> {
            Ok(self.0.iter().map(|doc| Bytes::from(doc.clone())).collect())
        }
    }

    struct GatedFeed {
        entered: Notify,
        release: Notify,
        doc: String,
    }

    impl FeedSource for GatedFeed {
        async fn fetch_all(&self) -> Result<Vec<Bytes>> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(vec![Bytes::from(self.doc.clone())])
        }
    }

    struct FailingFeed;

    impl FeedSource for FailingFeed {
        async fn fetch_all(&self) -> Result<Vec<Bytes>> {
            Err(TrackerError::Config("unreachable".into()))
        }
    }

    fn context() -> ReconcileContext {
        ReconcileContext::new(Classifier::default(), InterestSets::default(), Duration::seconds(900))
    }

    fn fresh() -> String {
        Utc::now().to_rfc3339()
    }

    #[tokio::test]
    async fn refresh_combines_feeds() {
        let feed = StaticFeed(vec![
            delivery(&[activity("50", "10050", &fresh(), "53.48", "-2.24")]),
            delivery(&[activity("X50", "17001", &fresh(), "53.47", "-2.25")]),
        ]);
        let tracker = Tracker::new(feed, context());

        let report = tracker.refresh().await.unwrap().unwrap();
        assert_eq!(report.created, 2);

        let views = tracker.layer().views();
        assert_eq!(views[0].vehicle_type, "ADL E400");
        assert_eq!(views[1].vehicle_type, "Volvo B5LH G2");
        assert!(!tracker.is_refreshing());
    }

    #[tokio::test]
    async fn malformed_feed_aborts_cycle() {
        let feed = StaticFeed(vec![
            delivery(&[activity("50", "10050", &fresh(), "53.48", "-2.24")]),
            "<Siri><VehicleActivity></Siri>".to_string(),
        ]);
        let tracker = Tracker::new(feed, context());

        assert!(tracker.refresh().await.is_err());
        assert!(tracker.layer().is_empty());
        assert!(!tracker.is_refreshing());
    }

    #[tokio::test]
    async fn fetch_failure_releases_flight() {
        let tracker = Tracker::new(FailingFeed, context());
        assert!(tracker.refresh().await.is_err());
        assert!(!tracker.is_refreshing());
    }

    #[tokio::test]
    async fn overlapping_refresh_is_skipped() {
        let feed = GatedFeed {
            entered: Notify::new(),
            release: Notify::new(),
            doc: delivery(&[activity("50", "10050", &fresh(), "53.48", "-2.24")]),
        };
        let tracker = Arc::new(Tracker::new(feed, context()));

        let first = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.refresh().await })
        };
        tracker.source.entered.notified().await;

        assert!(tracker.is_refreshing());
        assert!(tracker.refresh().await.unwrap().is_none());

        tracker.source.release.notify_one();
        let report = first.await.unwrap().unwrap().unwrap();
        assert_eq!(report.created, 1);
        assert!(!tracker.is_refreshing());
    }
}
