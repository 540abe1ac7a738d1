//! Tick-driven dispatch of checks

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::prober::Prober;
use super::{DEFAULT_TICK, FALLBACK_INTERVAL};
use crate::model::{Service, ServiceId};
use crate::source::SharedSource;

/// Interval actually used to schedule `service`
pub fn effective_interval(service: &Service, fallback: Duration) -> Duration {
    service.interval_or(fallback)
}

/// Whether a service last dispatched at `last` is due at `now`
pub fn is_due(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    match last {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= interval,
    }
}

/// Periodic scheduler.
///
/// Dispatch times live only in memory, so every active service is due on
/// the first tick after a restart.
pub struct Scheduler {
    source: SharedSource,
    prober: Arc<Prober>,
    period: Duration,
    fallback_interval: Duration,
    last_dispatch: HashMap<ServiceId, Instant>,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new(source: SharedSource, prober: Arc<Prober>) -> Self {
        Self {
            source,
            prober,
            period: DEFAULT_TICK,
            fallback_interval: FALLBACK_INTERVAL,
            last_dispatch: HashMap::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.period = tick;
        self
    }

    pub fn with_fallback_interval(mut self, interval: Duration) -> Self {
        self.fallback_interval = interval;
        self
    }

    /// Track dispatched checks on `tracker` so the caller can wait for them
    pub fn with_tracker(mut self, tracker: TaskTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Dispatch every active service that is due at `now` and return their ids.
    /// Dispatched checks run in the background; this does not wait for them.
    pub async fn tick(&mut self, now: Instant) -> Vec<ServiceId> {
        let services = match self.source.active_services().await {
            Ok(services) => services,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load active services, skipping tick");
                return Vec::new();
            }
        };

        let mut dispatched = Vec::new();
        for service in services {
            let interval = effective_interval(&service, self.fallback_interval);
            if !is_due(self.last_dispatch.get(&service.id).copied(), now, interval) {
                continue;
            }

            self.last_dispatch.insert(service.id, now);
            dispatched.push(service.id);

            let prober = Arc::clone(&self.prober);
            self.tracker.spawn(async move {
                prober.run_check(&service).await;
            });
        }

        if !dispatched.is_empty() {
            tracing::debug!(count = dispatched.len(), "Dispatched checks");
        }
        dispatched
    }

    /// Tick until `shutdown` is cancelled. Checks already in flight are left
    /// to finish.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(tick = ?self.period, fallback = ?self.fallback_interval, "Scheduler started");

        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                now = ticker.tick() => {
                    self.tick(now).await;
                }
                _ = shutdown.cancelled() => {
                    tracing::info!(in_flight = self.tracker.len(), "Scheduler stopped");
                    break;
                }
            }
        }
    }

    pub fn start(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
