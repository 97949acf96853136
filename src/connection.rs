//! Connection/registration supervisor
//!
//! Reconciles SIP registration state, contact-URI expiry and backend
//! presence into a single `reachable` boolean published on a watch channel,
//! and drives reconnection with exponential backoff. Registration-state
//! bursts are debounced so dependent UI and backend calls see one transition
//! instead of flicker.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::config::SoftphoneConfig;
use crate::engine::{RegistrationState, SignalingEngine};
use crate::models::AgentStatus;
use crate::notify::NotificationCenter;
use crate::reachability::is_reachable;
use crate::session::SessionContext;

/// Random spread added to every reconnect delay to avoid thundering herds.
const JITTER_MS: u64 = 250;

/// Read-only view of connection bookkeeping.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub registration: RegistrationState,
    pub reachable: bool,
    pub retry_count: u32,
    pub backoff_delay_ms: u64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub exhausted: bool,
}

struct ConnInner {
    registration: RegistrationState,
    retry_count: u32,
    backoff_delay_ms: u64,
    last_attempt_at: Option<DateTime<Utc>>,
    backend_presence: Option<AgentStatus>,
    exhausted: bool,
    pending_registration: Option<RegistrationState>,
    applied_transitions: u64,
}

pub struct ConnectionSupervisor {
    me: Weak<ConnectionSupervisor>,
    engine: Arc<dyn SignalingEngine>,
    ctx: SessionContext,
    notifications: Arc<NotificationCenter>,
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: u32,
    debounce_ms: u64,
    health_interval_secs: u64,
    inner: RwLock<ConnInner>,
    reachable_tx: watch::Sender<bool>,
    debounce_task: Mutex<Option<JoinHandle<()>>>,
    retry_task: Mutex<Option<JoinHandle<()>>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    pub fn new(
        engine: Arc<dyn SignalingEngine>,
        ctx: SessionContext,
        notifications: Arc<NotificationCenter>,
        config: &SoftphoneConfig,
    ) -> (Arc<Self>, watch::Receiver<bool>) {
        let (reachable_tx, reachable_rx) = watch::channel(false);
        let supervisor = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            engine,
            ctx,
            notifications,
            base_delay_ms: config.reconnect_base_delay_ms,
            max_delay_ms: config.reconnect_max_delay_ms,
            max_attempts: config.reconnect_max_attempts,
            debounce_ms: config.registration_debounce_ms,
            health_interval_secs: config.health_check_interval_secs,
            inner: RwLock::new(ConnInner {
                registration: RegistrationState::Unregistered,
                retry_count: 0,
                backoff_delay_ms: config.reconnect_base_delay_ms,
                last_attempt_at: None,
                backend_presence: None,
                exhausted: false,
                pending_registration: None,
                applied_transitions: 0,
            }),
            reachable_tx,
            debounce_task: Mutex::new(None),
            retry_task: Mutex::new(None),
            health_task: Mutex::new(None),
        });
        (supervisor, reachable_rx)
    }

    /// Pre-jitter reconnect delay: `min(base * 2^retry, cap)`.
    pub fn backoff_delay_ms(retry_count: u32, base_ms: u64, cap_ms: u64) -> u64 {
        let shift = retry_count.min(20);
        base_ms.saturating_mul(1u64 << shift).min(cap_ms)
    }

    /// Kick off the first registration and the health loop.
    pub async fn start(&self) {
        self.spawn_health_loop();
        {
            let mut inner = self.inner.write().await;
            inner.registration = RegistrationState::Registering;
            inner.last_attempt_at = Some(Utc::now());
        }
        if let Err(e) = self.engine.register().await {
            tracing::warn!("initial registration failed: {}", e);
            self.apply_registration(RegistrationState::Failed).await;
        }
    }

    pub async fn snapshot(&self) -> ConnectionSnapshot {
        let inner = self.inner.read().await;
        ConnectionSnapshot {
            registration: inner.registration,
            reachable: *self.reachable_tx.borrow(),
            retry_count: inner.retry_count,
            backoff_delay_ms: inner.backoff_delay_ms,
            last_attempt_at: inner.last_attempt_at,
            exhausted: inner.exhausted,
        }
    }

    /// Number of registration transitions actually applied (post-debounce).
    pub async fn applied_transitions(&self) -> u64 {
        self.inner.read().await.applied_transitions
    }

    /// Registration-state notification from the engine. Bursts inside the
    /// debounce window collapse; only the last state in a burst is applied.
    pub async fn on_registration_event(&self, state: RegistrationState) {
        if !self.ctx.is_active() {
            return;
        }
        self.inner.write().await.pending_registration = Some(state);

        let weak = self.me.clone();
        let window = std::time::Duration::from_millis(self.debounce_ms);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let Some(me) = weak.upgrade() else { return };
            if !me.ctx.is_active() {
                return;
            }
            let pending = me.inner.write().await.pending_registration.take();
            if let Some(state) = pending {
                me.apply_registration(state).await;
            }
        });
        if let Some(old) = self.debounce_task.lock().unwrap().replace(handle) {
            old.abort();
        }
    }

    /// Explicit registration failure from the engine.
    pub async fn on_registration_failed(&self, error: String) {
        if !self.ctx.is_active() {
            return;
        }
        tracing::warn!("registration failed: {}", error);
        self.notifications
            .error(format!("Registration failed: {}", error));
        self.on_registration_event(RegistrationState::Failed).await;
    }

    /// Backend presence for this agent's own extension, fed by the roster.
    pub async fn on_presence_update(&self, status: AgentStatus) {
        if !self.ctx.is_active() {
            return;
        }
        self.inner.write().await.backend_presence = Some(status);
        self.recompute_reachability().await;
    }

    /// Re-derive `reachable` from contact data and backend presence.
    pub async fn recompute_reachability(&self) {
        let contact = self.engine.contact_info().await;
        let backend = self.inner.read().await.backend_presence;
        let reachable = is_reachable(&contact, backend, Utc::now());
        let changed = self.reachable_tx.send_if_modified(|current| {
            if *current != reachable {
                *current = reachable;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::info!("agent reachability changed to {}", reachable);
        }
    }

    async fn apply_registration(&self, state: RegistrationState) {
        if !self.ctx.is_active() {
            return;
        }
        let lost = {
            let mut inner = self.inner.write().await;
            let previous = inner.registration;
            inner.registration = state;
            inner.applied_transitions += 1;
            if previous != state {
                tracing::info!("registration {} -> {}", previous, state);
            }
            match state {
                RegistrationState::Registered => {
                    inner.retry_count = 0;
                    inner.backoff_delay_ms = self.base_delay_ms;
                    inner.exhausted = false;
                    false
                }
                RegistrationState::Failed | RegistrationState::Unregistered => true,
                RegistrationState::Registering => false,
            }
        };

        self.recompute_reachability().await;

        if lost {
            self.schedule_reconnect().await;
        }
    }

    /// Schedule the next reconnect attempt, or surface exhaustion once the
    /// attempt cap is hit.
    fn schedule_reconnect(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
        if !self.ctx.is_active() {
            return;
        }
        let delay_ms = {
            let mut inner = self.inner.write().await;
            if inner.exhausted {
                return;
            }
            if inner.retry_count >= self.max_attempts {
                inner.exhausted = true;
                tracing::error!(
                    "giving up after {} reconnect attempts, manual reload required",
                    inner.retry_count
                );
                self.notifications
                    .error("Maximum reconnection attempts reached - reload required");
                return;
            }
            let delay =
                Self::backoff_delay_ms(inner.retry_count, self.base_delay_ms, self.max_delay_ms);
            inner.retry_count += 1;
            inner.backoff_delay_ms = delay;
            inner.last_attempt_at = Some(Utc::now());
            delay
        };

        let weak = self.me.clone();
        let cancel = self.ctx.cancellation();
        let handle = tokio::spawn(async move {
            let jitter = rand::thread_rng().gen_range(0..=JITTER_MS);
            let wait = std::time::Duration::from_millis(delay_ms + jitter);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
            let Some(me) = weak.upgrade() else { return };
            if !me.ctx.is_active() {
                return;
            }
            {
                let mut inner = me.inner.write().await;
                // a successful registration may have landed while we slept
                if inner.registration == RegistrationState::Registered {
                    return;
                }
                inner.registration = RegistrationState::Registering;
                tracing::info!("reconnect attempt {} after {}ms", inner.retry_count, delay_ms);
            }
            if let Err(e) = me.engine.register().await {
                tracing::warn!("re-registration failed: {}", e);
                me.apply_registration(RegistrationState::Failed).await;
            }
        });
        if let Some(old) = self.retry_task.lock().unwrap().replace(handle) {
            old.abort();
        }
        })
    }

    /// Periodic transport liveness probe; a dead transport feeds the same
    /// reconnection path as a registration loss.
    fn spawn_health_loop(&self) {
        let weak = self.me.clone();
        let cancel = self.ctx.cancellation();
        let period = std::time::Duration::from_secs(self.health_interval_secs.max(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick completes immediately
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let Some(me) = weak.upgrade() else { break };
                if !me.ctx.is_active() {
                    break;
                }
                if me.engine.is_transport_alive().await {
                    // registration may have lapsed purely by expiry
                    me.recompute_reachability().await;
                } else {
                    tracing::warn!("transport health probe failed, treating as disconnect");
                    me.on_registration_event(RegistrationState::Failed).await;
                }
            }
        });
        if let Some(old) = self.health_task.lock().unwrap().replace(handle) {
            old.abort();
        }
    }
}
