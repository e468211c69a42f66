//! Deployment tracking state machine
//!
//! `IDLE -> DEPLOYING {QUEUED, INITIALIZING, BUILDING} -> {READY, ERROR, CANCELED} -> IDLE`
//!
//! The machine owns the deploy session (active flag, start time, error count),
//! drives the adaptive poller and mirrors the session into durable storage so a
//! restart can resume tracking without triggering another build.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::deploy::session::{PersistentSession, SessionSnapshot};
use crate::deploy::validate::validate_webhook_url;
use crate::errors::DeployError;
use crate::http::gateway::DeployGateway;
use crate::models::deployment::{DeploymentRecord, DeploymentState};
use crate::storage::secrets::{SecretKey, SecretStore};
use crate::storage::settings::PollingSettings;
use crate::utils::Clock;
use crate::workers::poller::{AdaptivePoller, PollSample, PollerStatus, PollingPolicy, TickFn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// State machine options
#[derive(Debug, Clone)]
pub struct MachineOptions {
    /// A persisted session older than this is abandoned on resume
    pub session_max_age: Duration,

    /// One extra status check this long after a successful trigger
    pub post_trigger_check: Duration,

    /// One extra status check this long after tracking ends
    pub post_reset_check: Duration,
}

impl Default for MachineOptions {
    fn default() -> Self {
        Self {
            session_max_age: Duration::from_secs(600),
            post_trigger_check: Duration::from_secs(2),
            post_reset_check: Duration::from_secs(1),
        }
    }
}

impl MachineOptions {
    pub fn from_settings(settings: &PollingSettings) -> Self {
        Self {
            session_max_age: Duration::from_secs(settings.session_max_age_secs),
            ..Self::default()
        }
    }
}

/// State transitions published to UI subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeployEvent {
    DeployStarted {
        started_at: DateTime<Utc>,
    },
    DeployTriggerFailed {
        message: String,
    },
    DisplayStateChanged {
        state: DeploymentState,
    },
    /// A build nobody here triggered was seen while idle
    ExternalBuildDetected {
        deployment_id: String,
    },
    TrackingResumed {
        started_at: DateTime<Utc>,
    },
    /// Tracking ended on a terminal state
    DeploymentFinished {
        deployment_id: String,
        state: DeploymentState,
    },
    /// A stale or corrupted persisted session was discarded
    SessionReset,
    StatusCheckFailed {
        message: String,
        consecutive_errors: u32,
    },
}

/// What `ingest_status_sample` did with a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Answer to a request issued before one already applied
    OutOfOrder,
    /// Deployment created before the tracked one started
    Stale,
    /// Display updated, tracking unchanged
    Updated,
    /// Tracking ended on READY
    Completed,
    /// Tracking ended on ERROR or CANCELED
    Failed,
    /// An in-progress build started being tracked
    TrackingStarted,
    /// Nothing to track, polling stopped
    PollingStopped,
}

/// What `resume_from_session` found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Idle,
    Resumed,
    /// Stale or corrupted session cleared
    Cleared,
}

/// Point-in-time view for the operator UI
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploySnapshot {
    pub is_active: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub display_state: DeploymentState,
    pub label: &'static str,
    pub badge: &'static str,
    pub consecutive_errors: u32,
    pub poller: PollerStatus,
    pub last_deployment: Option<DeploymentRecord>,
}

/// Local tracking of one in-flight deployment.
///
/// `is_active` implies `started_at.is_some()`.
#[derive(Debug, Default)]
struct DeploySession {
    is_active: bool,
    started_at: Option<DateTime<Utc>>,
    consecutive_errors: u32,
    last_state: Option<DeploymentState>,
    last_record: Option<DeploymentRecord>,
    last_applied_seq: u64,
}

impl DeploySession {
    fn display_state(&self) -> DeploymentState {
        match &self.last_state {
            Some(state) => state.clone(),
            None if self.is_active => DeploymentState::Building,
            None => DeploymentState::Ready,
        }
    }

    fn activate(&mut self, started_at: DateTime<Utc>) {
        self.is_active = true;
        self.started_at = Some(started_at);
    }

    fn deactivate(&mut self) {
        self.is_active = false;
        self.started_at = None;
    }
}

/// Deployment orchestrator, one per process
pub struct DeploymentStateMachine {
    gateway: Arc<dyn DeployGateway>,
    secrets: Arc<dyn SecretStore>,
    session: PersistentSession,
    poller: AdaptivePoller,
    clock: Arc<dyn Clock>,
    options: MachineOptions,
    state: Mutex<DeploySession>,
    next_seq: AtomicU64,
    request_in_flight: AtomicBool,
    shut_down: AtomicBool,
    checks: Mutex<Vec<JoinHandle<()>>>,
    events: broadcast::Sender<DeployEvent>,
    this: Weak<DeploymentStateMachine>,
}

impl DeploymentStateMachine {
    pub fn new(
        gateway: Arc<dyn DeployGateway>,
        secrets: Arc<dyn SecretStore>,
        session: PersistentSession,
        policy: PollingPolicy,
        clock: Arc<dyn Clock>,
        options: MachineOptions,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new_cyclic(|this| Self {
            gateway,
            secrets,
            session,
            poller: AdaptivePoller::new(policy),
            clock,
            options,
            state: Mutex::new(DeploySession::default()),
            next_seq: AtomicU64::new(0),
            request_in_flight: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            checks: Mutex::new(Vec::new()),
            events,
            this: this.clone(),
        })
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> broadcast::Receiver<DeployEvent> {
        self.events.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_active
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock().started_at
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.lock().consecutive_errors
    }

    pub fn poller_status(&self) -> PollerStatus {
        self.poller.status()
    }

    /// Last known state, `BUILDING` while deploying and `READY` otherwise
    pub fn current_display_state(&self) -> DeploymentState {
        self.lock().display_state()
    }

    pub fn snapshot(&self) -> DeploySnapshot {
        let session = self.lock();
        let display_state = session.display_state();
        DeploySnapshot {
            is_active: session.is_active,
            started_at: session.started_at,
            label: display_state.label(),
            badge: display_state.badge_asset(),
            display_state,
            consecutive_errors: session.consecutive_errors,
            poller: self.poller.status(),
            last_deployment: session.last_record.clone(),
        }
    }

    /// Trigger a new build and start tracking it.
    ///
    /// Rejected with `AlreadyDeploying` while a session is active; no request
    /// is made in that case. A failed trigger resets the session and is not retried.
    pub async fn request_deploy(&self) -> Result<(), DeployError> {
        if self.is_active() {
            debug!("Deploy requested while already deploying");
            return Err(DeployError::AlreadyDeploying);
        }

        let webhook = self
            .secrets
            .get(SecretKey::WebhookAddress)
            .await
            .map_err(|e| DeployError::Storage(e.to_string()))?
            .ok_or_else(|| DeployError::NotConfigured("webhook URL".to_string()))?;
        validate_webhook_url(webhook.expose_secret())?;

        let started_at = self.clock.now();
        {
            let mut session = self.lock();
            if session.is_active {
                return Err(DeployError::AlreadyDeploying);
            }
            session.activate(started_at);
            session.consecutive_errors = 0;
            session.last_state = None;
        }
        info!("Deployment started at {}", started_at);
        self.emit(DeployEvent::DeployStarted { started_at });

        if let Err(e) = self.session.save(started_at).await {
            warn!("Failed to persist deployment session: {}", e);
        }
        self.start_polling();

        match self.gateway.trigger_build().await {
            Ok(()) => {
                self.schedule_check(self.options.post_trigger_check);
                Ok(())
            }
            Err(e) => {
                warn!("Build trigger failed: {}", e);
                self.lock().deactivate();
                self.end_tracking().await;
                self.emit(DeployEvent::DeployTriggerFailed {
                    message: e.to_string(),
                });
                Err(DeployError::Gateway(e))
            }
        }
    }

    /// Reconcile a status sample with the tracked session
    pub async fn ingest_status_sample(&self, record: DeploymentRecord) -> IngestOutcome {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.ingest_sequenced(record, seq).await
    }

    /// Fetch the latest deployment once and ingest it.
    ///
    /// Skipped while a previous status request is still running.
    pub async fn poll_once(&self) -> PollSample {
        if self.request_in_flight.swap(true, Ordering::AcqRel) {
            debug!("Status request already in progress, skipping");
            return self.poll_sample();
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.gateway.get_latest_deployment().await;
        self.request_in_flight.store(false, Ordering::Release);

        match result {
            Ok(record) => {
                self.ingest_sequenced(record, seq).await;
            }
            Err(e) => {
                let consecutive_errors = {
                    let mut session = self.lock();
                    session.consecutive_errors = session.consecutive_errors.saturating_add(1);
                    session.consecutive_errors
                };
                debug!(
                    "Status check failed ({} consecutive): {}",
                    consecutive_errors, e
                );
                self.emit(DeployEvent::StatusCheckFailed {
                    message: e.to_string(),
                    consecutive_errors,
                });
            }
        }

        self.poll_sample()
    }

    /// Restore tracking from the persisted session after a restart
    pub async fn resume_from_session(&self) -> Result<ResumeOutcome, DeployError> {
        let snapshot = self
            .session
            .load()
            .await
            .map_err(|e| DeployError::Storage(e.to_string()))?;

        let started_at = match snapshot {
            SessionSnapshot::Absent => return Ok(ResumeOutcome::Idle),
            SessionSnapshot::Corrupted => {
                warn!("Persisted deployment session is corrupted, clearing it");
                return self.discard_session().await;
            }
            SessionSnapshot::Active { started_at } => started_at,
        };

        if PersistentSession::is_stale(started_at, self.clock.now(), self.options.session_max_age)
        {
            info!(
                "Persisted deployment session from {} is stale, clearing it",
                started_at
            );
            return self.discard_session().await;
        }

        {
            let mut session = self.lock();
            if session.is_active {
                return Ok(ResumeOutcome::Resumed);
            }
            session.activate(started_at);
            session.consecutive_errors = 0;
        }
        info!("Resuming tracking of deployment started at {}", started_at);
        self.emit(DeployEvent::TrackingResumed { started_at });
        self.start_polling();

        Ok(ResumeOutcome::Resumed)
    }

    async fn discard_session(&self) -> Result<ResumeOutcome, DeployError> {
        self.session
            .clear()
            .await
            .map_err(|e| DeployError::Storage(e.to_string()))?;
        self.emit(DeployEvent::SessionReset);
        Ok(ResumeOutcome::Cleared)
    }

    async fn ingest_sequenced(&self, record: DeploymentRecord, seq: u64) -> IngestOutcome {
        let (outcome, display_changed) = {
            let mut session = self.lock();

            if seq <= session.last_applied_seq {
                debug!("Dropping out-of-order status sample for {}", record.id);
                return IngestOutcome::OutOfOrder;
            }
            session.last_applied_seq = seq;
            session.consecutive_errors = 0;

            if let (true, Some(started_at)) = (session.is_active, session.started_at) {
                if record.created_at < started_at {
                    debug!(
                        "Ignoring deployment {} created at {} before tracked start {}",
                        record.id, record.created_at, started_at
                    );
                    return IngestOutcome::Stale;
                }
            }

            let display_changed = session.last_state.as_ref() != Some(&record.state);
            session.last_state = Some(record.state.clone());
            session.last_record = Some(record.clone());

            let outcome = match &record.state {
                DeploymentState::Ready if session.is_active => {
                    session.deactivate();
                    IngestOutcome::Completed
                }
                DeploymentState::Error | DeploymentState::Canceled if session.is_active => {
                    session.deactivate();
                    IngestOutcome::Failed
                }
                DeploymentState::Building if !session.is_active => {
                    session.activate(record.created_at);
                    IngestOutcome::TrackingStarted
                }
                DeploymentState::Ready
                | DeploymentState::Error
                | DeploymentState::Canceled
                | DeploymentState::Building => IngestOutcome::Updated,
                _ if !session.is_active => IngestOutcome::PollingStopped,
                _ => IngestOutcome::Updated,
            };
            (outcome, display_changed)
        };

        if display_changed {
            debug!("Deployment {} is now {}", record.id, record.state);
            self.emit(DeployEvent::DisplayStateChanged {
                state: record.state.clone(),
            });
        }

        match outcome {
            IngestOutcome::Completed | IngestOutcome::Failed => {
                if outcome == IngestOutcome::Completed {
                    info!("Deployment {} is ready", record.id);
                } else {
                    warn!("Deployment {} ended as {}", record.id, record.state);
                }
                self.end_tracking().await;
                self.emit(DeployEvent::DeploymentFinished {
                    deployment_id: record.id,
                    state: record.state,
                });
            }
            IngestOutcome::TrackingStarted => {
                info!("Detected deployment {} building elsewhere", record.id);
                if let Err(e) = self.session.save(record.created_at).await {
                    warn!("Failed to persist deployment session: {}", e);
                }
                self.ensure_polling();
                self.emit(DeployEvent::ExternalBuildDetected {
                    deployment_id: record.id,
                });
            }
            IngestOutcome::Updated if record.state == DeploymentState::Building => {
                self.ensure_polling();
            }
            IngestOutcome::PollingStopped => {
                debug!("Nothing to track in state {}, stopping polling", record.state);
                self.poller.stop();
            }
            _ => {}
        }

        outcome
    }

    /// Stop polling for process shutdown. The persisted session is kept so
    /// the next start resumes tracking.
    ///
    /// Pending one-off checks are cancelled and none are scheduled afterwards,
    /// so nothing can restart the poller once this returns.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.cancel_checks();
        self.poller.stop();
    }

    /// Stop polling, clear the persisted session, then check once more
    async fn end_tracking(&self) {
        self.poller.stop();
        if let Err(e) = self.session.clear().await {
            warn!("Failed to clear deployment session: {}", e);
        }
        self.schedule_check(self.options.post_reset_check);
    }

    fn ensure_polling(&self) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        if !self.poller.is_running() {
            self.start_polling();
        }
    }

    fn start_polling(&self) {
        let this = self.this.clone();
        let on_tick: TickFn = Arc::new(move || {
            let this = this.clone();
            Box::pin(async move {
                match this.upgrade() {
                    Some(machine) => machine.poll_once().await,
                    None => PollSample {
                        display_state: DeploymentState::Ready,
                        consecutive_errors: 0,
                    },
                }
            })
        });
        self.poller.start(on_tick);
    }

    /// Run one ad-hoc status check after `delay`
    fn schedule_check(&self, delay: Duration) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        let this = self.this.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(machine) = this.upgrade() {
                machine.poll_once().await;
            }
        });

        let mut checks = self.checks.lock().unwrap_or_else(|e| e.into_inner());
        checks.retain(|h| !h.is_finished());
        checks.push(handle);
    }

    fn cancel_checks(&self) {
        let mut checks = self.checks.lock().unwrap_or_else(|e| e.into_inner());
        for handle in checks.drain(..) {
            handle.abort();
        }
    }

    fn poll_sample(&self) -> PollSample {
        let session = self.lock();
        PollSample {
            display_state: session.display_state(),
            consecutive_errors: session.consecutive_errors,
        }
    }

    fn emit(&self, event: DeployEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, DeploySession> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for DeploymentStateMachine {
    fn drop(&mut self) {
        self.cancel_checks();
        self.poller.stop();
    }
}
