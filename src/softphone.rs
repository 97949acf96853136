//! Softphone orchestrator
//!
//! Builds the component graph, pumps the engine event stream into the call
//! machine / supervisor / transfer coordinator, and owns the best-effort
//! logout teardown. Routing is sequential: events are applied in arrival
//! order on one logical thread.

use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::api::{agents, ApiClient};
use crate::call::CallMachine;
use crate::config::SoftphoneConfig;
use crate::connection::ConnectionSupervisor;
use crate::engine::{EngineEvent, SignalingEngine};
use crate::events::EventBus;
use crate::models::{AgentStatus, PresenceUpdate};
use crate::notify::NotificationCenter;
use crate::roster::RosterService;
use crate::session::SessionContext;
use crate::store::{CallLog, Favorites, StoreError, TransferHistory};
use crate::transfer::TransferCoordinator;

#[derive(Error, Debug)]
pub enum SoftphoneError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Softphone {
    config: SoftphoneConfig,
    ctx: SessionContext,
    engine: Arc<dyn SignalingEngine>,
    client: ApiClient,
    notifications: Arc<NotificationCenter>,
    machine: Arc<CallMachine>,
    supervisor: Arc<ConnectionSupervisor>,
    transfers: Arc<TransferCoordinator>,
    roster: Arc<RosterService>,
    favorites: Arc<Favorites>,
    history: Arc<TransferHistory>,
    call_log: Arc<CallLog>,
    pump: Mutex<Option<JoinHandle<()>>>,
    presence_task: Mutex<Option<JoinHandle<()>>>,
}

impl Softphone {
    /// Build the component graph. `presence_feed` is the backend push stream
    /// (the caller bridges its transport of choice onto the bus).
    pub async fn new(
        config: SoftphoneConfig,
        engine: Arc<dyn SignalingEngine>,
        presence_feed: &EventBus<PresenceUpdate>,
    ) -> Result<Arc<Self>, SoftphoneError> {
        config.validate().map_err(SoftphoneError::Config)?;

        let ctx = SessionContext::new();
        let notifications = Arc::new(NotificationCenter::new(config.notification_ttl_secs));
        let client = ApiClient::new(&config.backend_url);

        let history =
            Arc::new(TransferHistory::open(&config.data_dir, config.transfer_history_limit).await?);
        let call_log = Arc::new(CallLog::open(&config.data_dir, config.call_log_limit).await?);
        let favorites = Arc::new(Favorites::open(&config.data_dir).await?);

        let (supervisor, reachable_rx) = ConnectionSupervisor::new(
            engine.clone(),
            ctx.clone(),
            notifications.clone(),
            &config,
        );

        let machine = CallMachine::new(
            engine.clone(),
            ctx.clone(),
            reachable_rx,
            notifications.clone(),
            call_log.clone(),
        );

        let transfers = TransferCoordinator::new(
            machine.clone(),
            engine.clone(),
            ctx.clone(),
            notifications.clone(),
            history.clone(),
            config.transfer_confirm_timeout_ms,
        );

        let roster = RosterService::new(
            client.clone(),
            ctx.clone(),
            &config.extension,
            config.roster_poll_interval_secs,
            supervisor.clone(),
        );
        roster.spawn_push_loop(presence_feed.subscribe());

        Ok(Arc::new(Self {
            config,
            ctx,
            engine,
            client,
            notifications,
            machine,
            supervisor,
            transfers,
            roster,
            favorites,
            history,
            call_log,
            pump: Mutex::new(None),
            presence_task: Mutex::new(None),
        }))
    }

    /// Start the event pump, the health loop and the first registration.
    pub async fn start(&self) {
        let machine = self.machine.clone();
        let supervisor = self.supervisor.clone();
        let transfers = self.transfers.clone();
        let cancel = self.ctx.cancellation();
        let mut events = self.engine.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => {
                            route_event(&machine, &supervisor, &transfers, event).await;
                        }
                        None => break,
                    },
                }
            }
        });
        if let Some(old) = self.pump.lock().unwrap().replace(handle) {
            old.abort();
        }

        self.spawn_presence_mirror();
        self.roster.spawn_poll_loop();
        self.supervisor.start().await;
    }

    /// Publish this agent's presence to the backend whenever the call state
    /// flips between idle and in-call, so colleagues' rosters stay current.
    fn spawn_presence_mirror(&self) {
        let client = self.client.clone();
        let extension = self.config.extension.clone();
        let ctx = self.ctx.clone();
        let cancel = self.ctx.cancellation();
        let mut changes = self.machine.subscribe();

        let handle = tokio::spawn(async move {
            let mut published: Option<AgentStatus> = None;
            loop {
                let snapshot = tokio::select! {
                    _ = cancel.cancelled() => break,
                    snapshot = changes.recv() => match snapshot {
                        Some(snapshot) => snapshot,
                        None => break,
                    },
                };
                if !ctx.is_active() {
                    break;
                }
                let presence = if snapshot.status.is_in_call() {
                    AgentStatus::OnCall
                } else {
                    AgentStatus::Registered
                };
                if published == Some(presence) {
                    continue;
                }
                published = Some(presence);
                if let Err(e) = agents::update_presence(&client, &extension, presence).await {
                    tracing::debug!("presence update failed: {}", e);
                }
            }
        });
        if let Some(old) = self.presence_task.lock().unwrap().replace(handle) {
            old.abort();
        }
    }

    /// Best-effort multi-step teardown. The guard goes down first, so async
    /// work finishing late lands as a no-op; every following step is
    /// independently caught so one failure cannot block the rest.
    pub async fn logout(&self) {
        if !self.ctx.begin_logout() {
            return;
        }
        tracing::info!("logout started");

        if let Err(e) = agents::notify_logout(&self.client, &self.config.extension).await {
            tracing::warn!("logout: backend notification failed: {}", e);
        }
        if let Err(e) = self.engine.cancel_attended_transfer().await {
            tracing::debug!("logout: no consultation to cancel: {}", e);
        }
        if let Err(e) = self.engine.end_call().await {
            tracing::debug!("logout: no call to end: {}", e);
        }
        if let Err(e) = self.engine.unregister().await {
            tracing::warn!("logout: unregister failed: {}", e);
        }

        // loops and timers observe the cancelled token; drop our tasks too
        if let Some(pump) = self.pump.lock().unwrap().take() {
            pump.abort();
        }
        if let Some(task) = self.presence_task.lock().unwrap().take() {
            task.abort();
        }
        self.client.set_token(None);

        tracing::info!("logged out");
    }

    /// Install the backend bearer token after login.
    pub fn set_auth_token(&self, token: Option<String>) {
        self.client.set_token(token);
    }

    pub fn config(&self) -> &SoftphoneConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn notifications(&self) -> &Arc<NotificationCenter> {
        &self.notifications
    }

    pub fn calls(&self) -> &Arc<CallMachine> {
        &self.machine
    }

    pub fn connection(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    pub fn transfers(&self) -> &Arc<TransferCoordinator> {
        &self.transfers
    }

    pub fn roster(&self) -> &Arc<RosterService> {
        &self.roster
    }

    pub fn favorites(&self) -> &Arc<Favorites> {
        &self.favorites
    }

    pub fn transfer_history(&self) -> &Arc<TransferHistory> {
        &self.history
    }

    pub fn call_log(&self) -> &Arc<CallLog> {
        &self.call_log
    }
}

/// Apply one engine event to the owning component. Routing is sequential,
/// preserving the engine's emission order.
async fn route_event(
    machine: &CallMachine,
    supervisor: &ConnectionSupervisor,
    transfers: &TransferCoordinator,
    event: EngineEvent,
) {
    match event {
        EngineEvent::SessionStateChanged { session, state } => {
            machine.on_session_state(session, state).await;
        }
        EngineEvent::IncomingCall {
            session,
            remote_identity,
        } => {
            machine.on_incoming_call(session, remote_identity).await;
        }
        EngineEvent::Progress { session, code } => {
            machine.on_progress(session, code).await;
        }
        EngineEvent::CallFailed {
            session,
            status_code,
            reason_phrase,
        } => {
            machine
                .on_call_failed(session, status_code, &reason_phrase)
                .await;
        }
        EngineEvent::MediaFailure { session } => {
            machine.on_media_failure(session).await;
        }
        EngineEvent::IceFailure { session } => {
            machine.on_ice_failure(session).await;
        }
        EngineEvent::RegistrationChanged { state } => {
            supervisor.on_registration_event(state).await;
        }
        EngineEvent::RegistrationFailed { error } => {
            supervisor.on_registration_failed(error).await;
        }
        EngineEvent::TransferConfirmed { target } => {
            transfers.on_transfer_confirmed(&target).await;
        }
        EngineEvent::TransferFailed { target, reason } => {
            transfers.on_transfer_failed(&target, &reason).await;
        }
    }
}
