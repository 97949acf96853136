//! Loopback engine
//!
//! In-process engine that walks calls through a scripted lifecycle without a
//! SIP trunk, so the binary can run end to end on a developer machine. Dialed
//! calls ring briefly and connect; transfers confirm after a short delay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    ContactInfo, EngineError, EngineEvent, MediaOptions, RegistrationState, SessionHandle,
    SessionState, SignalingEngine,
};
use crate::events::{EventBus, Subscription};

const RING_DELAY: Duration = Duration::from_millis(200);
const ANSWER_DELAY: Duration = Duration::from_millis(400);
const CONFIRM_DELAY: Duration = Duration::from_millis(100);

pub struct LoopbackEngine {
    extension: String,
    bus: EventBus<EngineEvent>,
    registered: AtomicBool,
    session: RwLock<Option<SessionHandle>>,
    consultation: RwLock<Option<SessionHandle>>,
}

impl LoopbackEngine {
    pub fn new(extension: &str) -> Arc<Self> {
        Arc::new(Self {
            extension: extension.to_string(),
            bus: EventBus::new(64),
            registered: AtomicBool::new(false),
            session: RwLock::new(None),
            consultation: RwLock::new(None),
        })
    }

    /// Offer an inbound call, as a remote party would.
    pub async fn inject_incoming_call(&self, remote_identity: &str) -> SessionHandle {
        let session = SessionHandle::new();
        *self.session.write().await = Some(session.clone());
        self.bus.emit(EngineEvent::IncomingCall {
            session: session.clone(),
            remote_identity: remote_identity.to_string(),
        });
        session
    }

    fn emit_session_state(&self, session: &SessionHandle, state: SessionState) {
        self.bus.emit(EngineEvent::SessionStateChanged {
            session: session.clone(),
            state,
        });
    }

    async fn teardown_session(&self) -> Result<(), EngineError> {
        let session = self
            .session
            .write()
            .await
            .take()
            .ok_or(EngineError::NoActiveSession)?;
        self.emit_session_state(&session, SessionState::Terminating);
        self.emit_session_state(&session, SessionState::Terminated);
        Ok(())
    }
}

#[async_trait]
impl SignalingEngine for LoopbackEngine {
    fn subscribe(&self) -> Subscription<EngineEvent> {
        self.bus.subscribe()
    }

    async fn register(&self) -> Result<(), EngineError> {
        self.bus.emit(EngineEvent::RegistrationChanged {
            state: RegistrationState::Registering,
        });
        self.registered.store(true, Ordering::SeqCst);
        self.bus.emit(EngineEvent::RegistrationChanged {
            state: RegistrationState::Registered,
        });
        tracing::info!("loopback engine registered as {}", self.extension);
        Ok(())
    }

    async fn unregister(&self) -> Result<(), EngineError> {
        self.registered.store(false, Ordering::SeqCst);
        self.bus.emit(EngineEvent::RegistrationChanged {
            state: RegistrationState::Unregistered,
        });
        Ok(())
    }

    async fn make_call(
        &self,
        number: &str,
        _options: &MediaOptions,
    ) -> Result<SessionHandle, EngineError> {
        if !self.registered.load(Ordering::SeqCst) {
            return Err(EngineError::NotRegistered);
        }

        let session = SessionHandle::new();
        *self.session.write().await = Some(session.clone());
        tracing::info!("loopback call to {} ({})", number, session.id());

        let bus = self.bus.clone();
        let scripted = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RING_DELAY).await;
            bus.emit(EngineEvent::Progress {
                session: scripted.clone(),
                code: 180,
            });
            bus.emit(EngineEvent::SessionStateChanged {
                session: scripted.clone(),
                state: SessionState::Establishing,
            });
            tokio::time::sleep(ANSWER_DELAY).await;
            bus.emit(EngineEvent::SessionStateChanged {
                session: scripted,
                state: SessionState::Established,
            });
        });

        Ok(session)
    }

    async fn answer_call(&self, _options: &MediaOptions) -> Result<(), EngineError> {
        let session = self
            .session
            .read()
            .await
            .clone()
            .ok_or(EngineError::NoActiveSession)?;
        self.emit_session_state(&session, SessionState::Established);
        Ok(())
    }

    async fn end_call(&self) -> Result<(), EngineError> {
        self.teardown_session().await
    }

    async fn set_muted(&self, _muted: bool) -> Result<(), EngineError> {
        Ok(())
    }

    async fn hold_call(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn unhold_call(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn send_dtmf(&self, _digit: char) -> Result<(), EngineError> {
        Ok(())
    }

    async fn transfer_call(&self, target: &str) -> Result<(), EngineError> {
        if self.session.read().await.is_none() {
            return Err(EngineError::NoActiveSession);
        }

        let bus = self.bus.clone();
        let target = target.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(CONFIRM_DELAY).await;
            bus.emit(EngineEvent::TransferConfirmed { target });
        });
        Ok(())
    }

    async fn attended_transfer(&self, target: &str) -> Result<SessionHandle, EngineError> {
        if self.session.read().await.is_none() {
            return Err(EngineError::NoActiveSession);
        }

        let consultation = SessionHandle::new();
        *self.consultation.write().await = Some(consultation.clone());
        tracing::info!("loopback consultation to {} ({})", target, consultation.id());
        Ok(consultation)
    }

    async fn complete_attended_transfer(&self) -> Result<(), EngineError> {
        self.consultation
            .write()
            .await
            .take()
            .ok_or(EngineError::NoActiveSession)?;
        // connecting caller to target drops us out of the primary session
        self.teardown_session().await
    }

    async fn cancel_attended_transfer(&self) -> Result<(), EngineError> {
        self.consultation
            .write()
            .await
            .take()
            .ok_or(EngineError::NoActiveSession)?;
        Ok(())
    }

    async fn contact_info(&self) -> ContactInfo {
        if self.registered.load(Ordering::SeqCst) {
            ContactInfo {
                contact_uri: Some(format!("sip:{}@loopback.local", self.extension)),
                expiration: None,
            }
        } else {
            ContactInfo {
                contact_uri: Some(format!("sip:{}@offline", self.extension)),
                expiration: None,
            }
        }
    }

    async fn is_transport_alive(&self) -> bool {
        true
    }
}
