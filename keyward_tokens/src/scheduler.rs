use std::{sync::Arc, time::Duration};

use keyward_clock::DurationSecs;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use crate::{
    expiry::DEFAULT_EXPIRY_THRESHOLD, CredentialState, ExpiryEvaluator, RefreshCoordinator,
};

/// Default period between proactive expiry checks
pub const DEFAULT_PROACTIVE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Configuration for the proactive refresh timer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    interval: Duration,
    threshold: DurationSecs,
}

impl Default for SchedulerConfig {
    /// Checks every 5 minutes for credentials expiring within 10 minutes
    fn default() -> Self {
        Self {
            interval: DEFAULT_PROACTIVE_INTERVAL,
            threshold: DEFAULT_EXPIRY_THRESHOLD,
        }
    }
}

impl SchedulerConfig {
    /// Constructs a new scheduler configuration
    pub fn new(interval: Duration, threshold: DurationSecs) -> Self {
        Self {
            interval,
            threshold,
        }
    }
}

/// A background task that renews credentials before requests need it to
///
/// While credentials are held, the scheduler wakes up on a fixed interval and
/// asks the coordinator to renew if the access credential is about to expire.
/// The timer restarts whenever a new pair is stored and stops while no
/// credentials are held. Proactive failures are logged and otherwise ignored;
/// a request that later receives a 401 will still trigger renewal.
///
/// Dropping the scheduler stops the background task.
#[derive(Debug)]
pub struct ProactiveScheduler {
    task: JoinHandle<()>,
}

impl ProactiveScheduler {
    /// Spawns the scheduler onto the current tokio runtime
    pub fn spawn(
        coordinator: Arc<RefreshCoordinator>,
        evaluator: Arc<ExpiryEvaluator>,
        config: SchedulerConfig,
    ) -> Self {
        let states = coordinator.store().subscribe();
        let task = tokio::spawn(forever_schedule(coordinator, evaluator, states, config));
        Self { task }
    }

    /// Stops the background task
    pub fn shutdown(self) {
        // Dropping aborts the task
    }

    /// Whether the background task has stopped
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ProactiveScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn forever_schedule(
    coordinator: Arc<RefreshCoordinator>,
    evaluator: Arc<ExpiryEvaluator>,
    mut states: watch::Receiver<CredentialState>,
    config: SchedulerConfig,
) {
    loop {
        let present = states.borrow_and_update().is_present();

        if !present {
            tracing::trace!("no credentials held, proactive refresh idle");
            if states.changed().await.is_err() {
                tracing::info!("credential store dropped, halting proactive refresh");
                return;
            }
            continue;
        }

        tracing::debug!(
            interval_secs = config.interval.as_secs(),
            "starting proactive refresh timer"
        );

        let mut ticker = time::interval_at(Instant::now() + config.interval, config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        tracing::info!("credential store dropped, halting proactive refresh");
                        return;
                    }
                    break;
                }
                _ = ticker.tick() => {
                    tick(&coordinator, &evaluator, config.threshold).await;
                }
            }
        }
    }
}

async fn tick(
    coordinator: &RefreshCoordinator,
    evaluator: &ExpiryEvaluator,
    threshold: DurationSecs,
) {
    if coordinator.is_renewing() {
        tracing::trace!("renewal already in flight, skipping proactive check");
        return;
    }

    if !evaluator.is_access_expiring_soon(threshold) {
        tracing::trace!("access credential not expiring yet");
        return;
    }

    tracing::debug!("access credential expiring soon, renewing proactively");
    if let Err(error) = coordinator.renew().await {
        tracing::debug!(
            error = (&error as &dyn std::error::Error),
            "proactive renewal failed"
        );
    }
}
