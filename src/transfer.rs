//! Transfer coordinator
//!
//! Layers blind and attended transfer semantics over an established call
//! without touching the call machine's record directly: the coordinator only
//! invokes machine operations (hold/unhold) and lets engine session events
//! settle the machine after completion. At most one transfer is in flight at
//! a time.
//!
//! Blind transfers wait up to a configured window for a confirmation event;
//! with no confirmation the transfer is assumed complete and recorded as
//! `CompletedUnconfirmed` - an optimistic policy, not an observed success.

use std::sync::{Arc, Mutex, Weak};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::call::{CallError, CallMachine, CallStatus};
use crate::engine::{EngineError, SessionHandle, SignalingEngine};
use crate::models::{TransferKind, TransferOutcome, TransferRecord};
use crate::notify::NotificationCenter;
use crate::session::SessionContext;
use crate::store::{StoreError, TransferHistory};

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("A transfer is already in progress")]
    TransferInProgress,

    #[error("Cannot transfer while {0}")]
    CannotTransferWrongState(CallStatus),

    #[error("Invalid transfer target: {0}")]
    InvalidTarget(String),

    #[error("No transfer in progress")]
    NoActiveTransfer,

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Transfer sub-state, layered on top of the call machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Initiated,
    ConsultationActive,
    Completed,
    CompletedUnconfirmed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferStatus::Initiated => write!(f, "Initiated"),
            TransferStatus::ConsultationActive => write!(f, "ConsultationActive"),
            TransferStatus::Completed => write!(f, "Completed"),
            TransferStatus::CompletedUnconfirmed => write!(f, "CompletedUnconfirmed"),
            TransferStatus::Failed => write!(f, "Failed"),
            TransferStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Consultation leg of an attended transfer.
#[derive(Debug, Clone)]
pub struct Consultation {
    pub session: SessionHandle,
    pub started_at: DateTime<Utc>,
}

/// The at-most-one in-flight transfer.
#[derive(Debug, Clone)]
pub struct TransferSession {
    pub id: Uuid,
    pub call_id: String,
    pub kind: TransferKind,
    pub target_extension: String,
    pub consultation: Option<Consultation>,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
}

pub struct TransferCoordinator {
    me: Weak<TransferCoordinator>,
    machine: Arc<CallMachine>,
    engine: Arc<dyn SignalingEngine>,
    ctx: SessionContext,
    notifications: Arc<NotificationCenter>,
    history: Arc<TransferHistory>,
    confirm_timeout_ms: u64,
    active: RwLock<Option<TransferSession>>,
    confirm_timer: Mutex<Option<JoinHandle<()>>>,
}

impl TransferCoordinator {
    pub fn new(
        machine: Arc<CallMachine>,
        engine: Arc<dyn SignalingEngine>,
        ctx: SessionContext,
        notifications: Arc<NotificationCenter>,
        history: Arc<TransferHistory>,
        confirm_timeout_ms: u64,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            machine,
            engine,
            ctx,
            notifications,
            history,
            confirm_timeout_ms,
            active: RwLock::new(None),
            confirm_timer: Mutex::new(None),
        })
    }

    pub async fn active(&self) -> Option<TransferSession> {
        self.active.read().await.clone()
    }

    /// Redirect the established call to `target` without consultation.
    pub async fn blind_transfer(&self, target: &str) -> Result<(), TransferError> {
        if !self.ctx.is_active() {
            return Ok(());
        }
        let call_id = self.begin(target, TransferKind::Blind).await?;

        if let Err(e) = self.engine.transfer_call(target).await {
            let reason = e.to_string();
            self.notifications
                .error(format!("Transfer failed: {}", reason));
            self.finalize(TransferOutcome::Failed, Some(reason)).await;
            return Err(TransferError::Engine(e));
        }

        tracing::info!("blind transfer of call {} to {} requested", call_id, target);
        self.arm_confirm_timer();
        Ok(())
    }

    /// Put the caller on hold and open a consultation call to `target`.
    pub async fn attended_transfer(&self, target: &str) -> Result<(), TransferError> {
        if !self.ctx.is_active() {
            return Ok(());
        }
        let snapshot = self.machine.snapshot().await;
        let was_on_hold = snapshot.on_hold;
        let call_id = self.begin(target, TransferKind::Attended).await?;

        // consultation never runs against a live caller
        if !was_on_hold {
            if let Err(e) = self.machine.hold().await {
                self.finalize(TransferOutcome::Failed, Some(e.to_string()))
                    .await;
                return Err(TransferError::Call(e));
            }
        }

        match self.engine.attended_transfer(target).await {
            Ok(session) => {
                let mut active = self.active.write().await;
                if let Some(transfer) = active.as_mut() {
                    transfer.consultation = Some(Consultation {
                        session,
                        started_at: Utc::now(),
                    });
                    transfer.status = TransferStatus::ConsultationActive;
                }
                tracing::info!(
                    "consultation with {} opened for call {}",
                    target,
                    call_id
                );
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                self.notifications
                    .error(format!("Consultation failed: {}", reason));
                self.finalize(TransferOutcome::Failed, Some(reason)).await;
                if !was_on_hold {
                    if let Err(e) = self.machine.unhold().await {
                        tracing::warn!("failed to resume caller after consultation error: {}", e);
                    }
                }
                Err(TransferError::Engine(e))
            }
        }
    }

    /// Connect the held caller to the consulted target and finish.
    pub async fn complete_attended(&self) -> Result<(), TransferError> {
        if !self.ctx.is_active() {
            return Ok(());
        }
        let target = {
            let active = self.active.read().await;
            match active.as_ref() {
                Some(t) if t.status == TransferStatus::ConsultationActive => {
                    t.target_extension.clone()
                }
                _ => return Err(TransferError::NoActiveTransfer),
            }
        };

        if let Err(e) = self.engine.complete_attended_transfer().await {
            let reason = e.to_string();
            self.notifications
                .error(format!("Transfer failed: {}", reason));
            self.finalize(TransferOutcome::Failed, Some(reason)).await;
            return Err(TransferError::Engine(e));
        }

        self.notifications
            .success(format!("Call transferred to {}", target));
        self.finalize(TransferOutcome::Completed, None).await;
        // the machine settles to Idle on the engine's session-terminated
        // events for the primary leg
        Ok(())
    }

    /// Drop the consultation and take the caller back off hold.
    pub async fn cancel_attended(&self) -> Result<(), TransferError> {
        if !self.ctx.is_active() {
            return Ok(());
        }
        {
            let active = self.active.read().await;
            match active.as_ref() {
                Some(t) if t.status == TransferStatus::ConsultationActive => {}
                _ => return Err(TransferError::NoActiveTransfer),
            }
        }

        // best effort: a dead consultation leg must not strand the caller
        if let Err(e) = self.engine.cancel_attended_transfer().await {
            tracing::warn!("failed to tear down consultation: {}", e);
        }
        if let Err(e) = self.machine.unhold().await {
            tracing::warn!("failed to resume caller after cancel: {}", e);
        }

        self.finalize(TransferOutcome::Cancelled, None).await;
        Ok(())
    }

    /// Confirmation event for a blind transfer.
    pub async fn on_transfer_confirmed(&self, target: &str) {
        if !self.ctx.is_active() {
            return;
        }
        {
            let active = self.active.read().await;
            match active.as_ref() {
                Some(t)
                    if t.status == TransferStatus::Initiated && t.target_extension == target => {}
                _ => return,
            }
        }
        self.notifications
            .success(format!("Call transferred to {}", target));
        self.finalize(TransferOutcome::Completed, None).await;
    }

    /// Failure event for a blind transfer; the line stays up, so the agent
    /// can retry.
    pub async fn on_transfer_failed(&self, target: &str, reason: &str) {
        if !self.ctx.is_active() {
            return;
        }
        {
            let active = self.active.read().await;
            match active.as_ref() {
                Some(t)
                    if t.status == TransferStatus::Initiated && t.target_extension == target => {}
                _ => return,
            }
        }
        self.notifications
            .error(format!("Transfer failed: {}", reason));
        self.finalize(TransferOutcome::Failed, Some(reason.to_string()))
            .await;
    }

    // ---- internals ----

    /// Shared entry: validate the target, enforce single-flight, require an
    /// established call, and park the new session in `active`.
    async fn begin(&self, target: &str, kind: TransferKind) -> Result<String, TransferError> {
        if target.is_empty()
            || !target
                .chars()
                .all(|c| c.is_ascii_digit() || c == '*' || c == '#')
        {
            return Err(TransferError::InvalidTarget(target.to_string()));
        }

        let snapshot = self.machine.snapshot().await;
        if snapshot.status != CallStatus::Established {
            return Err(TransferError::CannotTransferWrongState(snapshot.status));
        }
        let call_id = snapshot.call_id.unwrap_or_else(|| "unknown".to_string());

        let mut active = self.active.write().await;
        if active.is_some() {
            return Err(TransferError::TransferInProgress);
        }
        *active = Some(TransferSession {
            id: Uuid::new_v4(),
            call_id: call_id.clone(),
            kind,
            target_extension: target.to_string(),
            consultation: None,
            status: TransferStatus::Initiated,
            created_at: Utc::now(),
        });
        Ok(call_id)
    }

    /// Assume success once the confirmation window closes; some backends
    /// never emit a completion event.
    fn arm_confirm_timer(&self) {
        let weak = self.me.clone();
        let window = std::time::Duration::from_millis(self.confirm_timeout_ms);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let Some(me) = weak.upgrade() else { return };
            if !me.ctx.is_active() {
                return;
            }
            let unconfirmed = {
                let active = me.active.read().await;
                matches!(
                    active.as_ref(),
                    Some(t) if t.status == TransferStatus::Initiated
                )
            };
            if unconfirmed {
                tracing::warn!(
                    "no transfer confirmation within {}ms, assuming completion",
                    me.confirm_timeout_ms
                );
                me.finalize(TransferOutcome::CompletedUnconfirmed, None).await;
            }
        });
        if let Some(old) = self.confirm_timer.lock().unwrap().replace(handle) {
            old.abort();
        }
    }

    /// Single cleanup path for every outcome: stop the confirmation timer,
    /// record history synchronously with the outcome, clear the session.
    async fn finalize(&self, outcome: TransferOutcome, reason: Option<String>) {
        if let Some(handle) = self.confirm_timer.lock().unwrap().take() {
            handle.abort();
        }

        let record = {
            let mut active = self.active.write().await;
            let Some(session) = active.take() else {
                return;
            };
            TransferRecord {
                call_id: session.call_id,
                target_extension: session.target_extension,
                kind: session.kind,
                outcome,
                reason,
                at: Utc::now(),
            }
        };

        tracing::info!(
            "transfer to {} finished: {}",
            record.target_extension,
            record.outcome.display_name()
        );
        if let Err(e) = self.history.append(record).await {
            tracing::warn!("failed to append transfer history record: {}", e);
        }
    }
}
