// Schedules refresh cycles: at startup, on a fixed interval, after the map
// view settles, and straight away when the filter changes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    ViewSettled,
    FilterChanged,
}

pub trait CycleRunner: Send + Sync + 'static {
    fn run_cycle(&self, reason: &'static str) -> impl Future<Output = ()> + Send;
}

pub struct Poller<R> {
    runner: Arc<R>,
    interval: Duration,
    debounce: Duration,
    triggers: mpsc::UnboundedReceiver<Trigger>,
}

impl<R: CycleRunner> Poller<R> {
    pub fn new(
        runner: Arc<R>,
        interval: Duration,
        debounce: Duration,
    ) -> (Self, mpsc::UnboundedSender<Trigger>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let poller = Self {
            runner,
            interval,
            debounce,
            triggers: rx,
        };
        (poller, tx)
    }

    /// Cycles are spawned rather than awaited so that the runner can skip a
    /// trigger that lands while a cycle is still in flight.
    fn spawn_cycle(&self, reason: &'static str) {
        let runner = self.runner.clone();
        tokio::spawn(async move { runner.run_cycle(reason).await });
    }

    /// Runs until every trigger sender is dropped.
    pub async fn run(mut self) {
        info!(
            "Polling every {:?}, settle debounce {:?}",
            self.interval, self.debounce
        );

        // The first tick completes immediately, which gives the startup fetch.
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut settle_at: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.spawn_cycle("interval"),
                _ = time::sleep_until(settle_at.unwrap_or_else(Instant::now)), if settle_at.is_some() => {
                    settle_at = None;
                    self.spawn_cycle("view settled");
                }
                trigger = self.triggers.recv() => match trigger {
                    Some(Trigger::ViewSettled) => {
                        debug!("View moved, rescheduling refresh");
                        settle_at = Some(Instant::now() + self.debounce);
                    }
                    Some(Trigger::FilterChanged) => self.spawn_cycle("filter changed"),
                    None => break,
                },
            }
        }

        info!("Poller stopped");
    }
}
