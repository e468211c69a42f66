//! Test doubles shared by the integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use vercelwp::deploy::machine::{DeploymentStateMachine, MachineOptions};
use vercelwp::deploy::session::{MemorySessionStore, PersistentSession};
use vercelwp::errors::GatewayError;
use vercelwp::http::gateway::DeployGateway;
use vercelwp::models::deployment::{DeploymentRecord, DeploymentState, Environment};
use vercelwp::models::status::ServiceStatus;
use vercelwp::storage::secrets::{MemorySecretStore, SecretKey};
use vercelwp::utils::Clock;
use vercelwp::workers::poller::PollingPolicy;

pub const WEBHOOK: &str = "https://api.vercel.com/v1/integrations/deploy/prj_x/abc";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

pub fn record(id: &str, state: DeploymentState, created_at: DateTime<Utc>) -> DeploymentRecord {
    DeploymentRecord {
        id: id.to_string(),
        state,
        created_at,
        branch: "main".to_string(),
        commit_message: None,
        author: None,
        environment: Environment::Production,
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Gateway returning scripted answers and counting calls
pub struct FakeGateway {
    latest: Mutex<Result<DeploymentRecord, GatewayError>>,
    trigger: Mutex<Result<(), GatewayError>>,
    trigger_calls: AtomicUsize,
    latest_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(Err(GatewayError::NoData)),
            trigger: Mutex::new(Ok(())),
            trigger_calls: AtomicUsize::new(0),
            latest_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_latest(&self, latest: Result<DeploymentRecord, GatewayError>) {
        *self.latest.lock().unwrap() = latest;
    }

    pub fn set_trigger(&self, trigger: Result<(), GatewayError>) {
        *self.trigger.lock().unwrap() = trigger;
    }

    pub fn trigger_calls(&self) -> usize {
        self.trigger_calls.load(Ordering::SeqCst)
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeployGateway for FakeGateway {
    async fn trigger_build(&self) -> Result<(), GatewayError> {
        self.trigger_calls.fetch_add(1, Ordering::SeqCst);
        self.trigger.lock().unwrap().clone()
    }

    async fn get_latest_deployment(&self) -> Result<DeploymentRecord, GatewayError> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        self.latest.lock().unwrap().clone()
    }

    async fn list_deployments(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<DeploymentRecord>, GatewayError> {
        let mut records = vec![self.latest.lock().unwrap().clone()?];
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn get_service_status(&self) -> Result<ServiceStatus, GatewayError> {
        Ok(ServiceStatus::all_operational(t0()))
    }
}

/// State machine wired to fakes
pub struct Harness {
    pub machine: Arc<DeploymentStateMachine>,
    pub gateway: Arc<FakeGateway>,
    pub session: PersistentSession,
    pub store: Arc<MemorySessionStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_webhook(WEBHOOK)
    }

    pub fn with_webhook(webhook: &str) -> Self {
        let gateway = Arc::new(FakeGateway::new());
        let store = Arc::new(MemorySessionStore::new());
        let session = PersistentSession::new(store.clone());
        let clock = Arc::new(ManualClock::new(t0()));
        let secrets = Arc::new(MemorySecretStore::with_values(&[(
            SecretKey::WebhookAddress,
            webhook,
        )]));

        let machine = DeploymentStateMachine::new(
            gateway.clone(),
            secrets,
            session.clone(),
            PollingPolicy::default(),
            clock.clone(),
            MachineOptions::default(),
        );

        Self {
            machine,
            gateway,
            session,
            store,
            clock,
        }
    }
}
