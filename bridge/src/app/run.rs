//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::deploy::machine::{DeployEvent, DeploymentStateMachine, ResumeOutcome};
use crate::errors::BridgeError;
use crate::server::serve::serve;
use crate::server::state::ServerState;

/// Run the bridge until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), BridgeError> {
    info!("Initializing vercelwp bridge...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager =
        ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start bridge: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), BridgeError> {
    options.layout.setup().await?;

    let app_state = Arc::new(AppState::init(&options.layout, &options.settings).await?);
    shutdown_manager.with_app_state(app_state.clone())?;

    init_event_logger(
        app_state.machine.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    if options.resume_session {
        resume_session(&app_state.machine).await;
    }

    if options.enable_server {
        init_server(
            options,
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    Ok(())
}

async fn resume_session(machine: &DeploymentStateMachine) {
    match machine.resume_from_session().await {
        Ok(ResumeOutcome::Resumed) => info!("Resumed tracking of a deployment in progress"),
        Ok(ResumeOutcome::Cleared) => info!("Discarded a stale deployment session"),
        Ok(ResumeOutcome::Idle) => {}
        Err(e) => warn!("Unable to resume deployment session: {}", e),
    }
}

fn init_event_logger(
    machine: Arc<DeploymentStateMachine>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), BridgeError> {
    let mut events = machine.subscribe();
    drop(machine);

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => return,
                event = events.recv() => match event {
                    Ok(event) => log_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Deployment event log skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    });

    shutdown_manager.with_event_logger_handle(handle)
}

fn log_event(event: &DeployEvent) {
    match serde_json::to_string(event) {
        Ok(json) => info!(target: "vercelwp::events", "{}", json),
        Err(e) => warn!("Unable to encode deployment event: {}", e),
    }
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), BridgeError> {
    info!("Initializing local HTTP server...");

    let server_state = ServerState::new(
        app_state.machine.clone(),
        app_state.gateway.clone(),
        app_state.migrator.clone(),
        app_state.content.clone(),
        Some(app_state.content_file.clone()),
        app_state.site.clone(),
        app_state.clock.clone(),
    );

    let server_handle = serve(
        &options.settings.server,
        Arc::new(server_state),
        async move {
            let _ = shutdown_rx.recv().await;
        },
    )
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handle: Option<JoinHandle<Result<(), BridgeError>>>,
    event_logger_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            server_handle: None,
            event_logger_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), BridgeError> {
        if self.app_state.is_some() {
            return Err(BridgeError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_event_logger_handle(&mut self, handle: JoinHandle<()>) -> Result<(), BridgeError> {
        if self.event_logger_handle.is_some() {
            return Err(BridgeError::ShutdownError(
                "event_logger_handle already set".to_string(),
            ));
        }
        self.event_logger_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), BridgeError>>,
    ) -> Result<(), BridgeError> {
        if self.server_handle.is_some() {
            return Err(BridgeError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), BridgeError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), BridgeError> {
        info!("Shutting down vercelwp bridge...");

        // 1. HTTP server
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| BridgeError::ShutdownError(e.to_string()))??;
        }

        // 2. Deployment tracking
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        // 3. Event logger
        if let Some(handle) = self.event_logger_handle.take() {
            handle
                .await
                .map_err(|e| BridgeError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
