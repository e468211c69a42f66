//! Adaptive polling worker for deployment status

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::models::deployment::DeploymentState;
use crate::storage::settings::PollingSettings;
use crate::utils::{calc_exp_backoff, BackoffOptions};

/// Polling cadence configuration
#[derive(Debug, Clone)]
pub struct PollingPolicy {
    pub initial_delay: Duration,
    pub building_interval: Duration,
    pub ready_interval: Duration,
    pub error_interval: Duration,
    pub backoff: BackoffOptions,
    pub max_polling_time: Duration,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self::from_settings(&PollingSettings::default())
    }
}

impl PollingPolicy {
    pub fn from_settings(settings: &PollingSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            building_interval: Duration::from_millis(settings.building_interval_ms),
            ready_interval: Duration::from_millis(settings.ready_interval_ms),
            error_interval: Duration::from_millis(settings.error_interval_ms),
            backoff: BackoffOptions {
                multiplier: settings.backoff_multiplier,
                max_delay: Duration::from_millis(settings.max_backoff_ms),
            },
            max_polling_time: Duration::from_millis(settings.max_polling_time_ms),
        }
    }

    /// Base interval for the last displayed state
    pub fn interval_for(&self, state: &DeploymentState) -> Duration {
        match state {
            DeploymentState::Ready => self.ready_interval,
            DeploymentState::Error | DeploymentState::Canceled => self.error_interval,
            _ => self.building_interval,
        }
    }

    /// Interval before the next tick, backed off by consecutive errors
    pub fn next_interval(&self, state: &DeploymentState, consecutive_errors: u32) -> Duration {
        calc_exp_backoff(self.interval_for(state), &self.backoff, consecutive_errors)
    }
}

/// What a tick observed, used to schedule the next one
#[derive(Debug, Clone, PartialEq)]
pub struct PollSample {
    pub display_state: DeploymentState,
    pub consecutive_errors: u32,
}

/// Callback run on every tick
pub type TickFn = Arc<dyn Fn() -> BoxFuture<'static, PollSample> + Send + Sync>;

/// Scheduling status of a poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollerStatus {
    /// Waiting for the next tick
    Scheduled,
    /// A tick is executing
    Running,
    Stopped,
}

struct PollerInner {
    generation: u64,
    status: PollerStatus,
    cancel: Option<oneshot::Sender<()>>,
}

/// Self-rescheduling poller with backoff and a hard duration ceiling.
///
/// At most one schedule is active; `start` replaces the previous one and
/// `stop` guarantees that no pending tick fires afterwards.
#[derive(Clone)]
pub struct AdaptivePoller {
    policy: PollingPolicy,
    inner: Arc<Mutex<PollerInner>>,
}

impl AdaptivePoller {
    pub fn new(policy: PollingPolicy) -> Self {
        Self {
            policy,
            inner: Arc::new(Mutex::new(PollerInner {
                generation: 0,
                status: PollerStatus::Stopped,
                cancel: None,
            })),
        }
    }

    pub fn policy(&self) -> &PollingPolicy {
        &self.policy
    }

    pub fn status(&self) -> PollerStatus {
        self.lock().status
    }

    pub fn is_running(&self) -> bool {
        self.status() != PollerStatus::Stopped
    }

    /// Start polling, cancelling any previous schedule first
    pub fn start(&self, on_tick: TickFn) {
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let generation = {
            let mut inner = self.lock();
            if let Some(previous) = inner.cancel.take() {
                debug!("Existing polling schedule cancelled");
                let _ = previous.send(());
            }
            inner.generation += 1;
            inner.status = PollerStatus::Scheduled;
            inner.cancel = Some(cancel_tx);
            inner.generation
        };

        info!(
            "Adaptive polling started (initial delay {:?}, ceiling {:?})",
            self.policy.initial_delay, self.policy.max_polling_time
        );

        tokio::spawn(run(
            self.policy.clone(),
            self.inner.clone(),
            generation,
            on_tick,
            cancel_rx,
        ));
    }

    /// Cancel any pending tick. Safe to call when not running.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if inner.status == PollerStatus::Stopped {
            return;
        }
        inner.generation += 1;
        inner.status = PollerStatus::Stopped;
        if let Some(cancel) = inner.cancel.take() {
            let _ = cancel.send(());
        }
        debug!("Polling stopped");
    }

    fn lock(&self) -> MutexGuard<'_, PollerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Move to `status` if `generation` is still the active schedule
fn transition(inner: &Mutex<PollerInner>, generation: u64, status: PollerStatus) -> bool {
    let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
    if inner.generation != generation {
        return false;
    }
    inner.status = status;
    if status == PollerStatus::Stopped {
        inner.cancel = None;
    }
    true
}

async fn run(
    policy: PollingPolicy,
    inner: Arc<Mutex<PollerInner>>,
    generation: u64,
    on_tick: TickFn,
    mut cancel: oneshot::Receiver<()>,
) {
    let deadline = Instant::now() + policy.max_polling_time;
    let mut delay = policy.initial_delay;

    loop {
        tokio::select! {
            biased;
            _ = &mut cancel => {
                return;
            }
            _ = sleep_until(deadline) => {
                if transition(&inner, generation, PollerStatus::Stopped) {
                    warn!("Polling timeout reached after {:?}, stopping", policy.max_polling_time);
                }
                return;
            }
            _ = sleep(delay) => {}
        }

        if !transition(&inner, generation, PollerStatus::Running) {
            return;
        }

        let sample = on_tick().await;

        if !transition(&inner, generation, PollerStatus::Scheduled) {
            return;
        }

        delay = policy.next_interval(&sample.display_state, sample.consecutive_errors);
        debug!(
            "Next poll scheduled in {:?} for state {}",
            delay, sample.display_state
        );
    }
}
