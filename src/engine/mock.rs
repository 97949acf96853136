//! Scriptable engine double for tests
//!
//! Records every invoked action so tests can assert idempotence (e.g. one
//! `end_call` for repeated hangups) and lets tests emit arbitrary engine
//! events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    ContactInfo, EngineError, EngineEvent, MediaOptions, SessionHandle, SignalingEngine,
};
use crate::events::{EventBus, Subscription};

pub struct MockEngine {
    bus: EventBus<EngineEvent>,
    invocations: Mutex<Vec<String>>,
    contact: RwLock<ContactInfo>,
    transport_alive: AtomicBool,
    fail_transfers: AtomicBool,
    last_session: Mutex<Option<SessionHandle>>,
    last_consultation: Mutex<Option<SessionHandle>>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            bus: EventBus::new(64),
            invocations: Mutex::new(Vec::new()),
            contact: RwLock::new(ContactInfo::default()),
            transport_alive: AtomicBool::new(true),
            fail_transfers: AtomicBool::new(false),
            last_session: Mutex::new(None),
            last_consultation: Mutex::new(None),
        })
    }

    pub fn emit(&self, event: EngineEvent) {
        self.bus.emit(event);
    }

    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocation_count(&self, name: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.as_str() == name)
            .count()
    }

    pub fn set_contact(&self, uri: Option<&str>, expiration: Option<DateTime<Utc>>) {
        *self.contact.write().unwrap() = ContactInfo {
            contact_uri: uri.map(|u| u.to_string()),
            expiration,
        };
    }

    pub fn set_transport_alive(&self, alive: bool) {
        self.transport_alive.store(alive, Ordering::SeqCst);
    }

    pub fn set_fail_transfers(&self, fail: bool) {
        self.fail_transfers.store(fail, Ordering::SeqCst);
    }

    /// Handle returned by the most recent `make_call`.
    pub fn last_session(&self) -> Option<SessionHandle> {
        self.last_session.lock().unwrap().clone()
    }

    /// Handle returned by the most recent `attended_transfer`.
    pub fn last_consultation(&self) -> Option<SessionHandle> {
        self.last_consultation.lock().unwrap().clone()
    }

    fn record(&self, name: &str) {
        self.invocations.lock().unwrap().push(name.to_string());
    }
}

#[async_trait]
impl SignalingEngine for MockEngine {
    fn subscribe(&self) -> Subscription<EngineEvent> {
        self.bus.subscribe()
    }

    async fn register(&self) -> Result<(), EngineError> {
        self.record("register");
        Ok(())
    }

    async fn unregister(&self) -> Result<(), EngineError> {
        self.record("unregister");
        Ok(())
    }

    async fn make_call(
        &self,
        _number: &str,
        _options: &MediaOptions,
    ) -> Result<SessionHandle, EngineError> {
        self.record("make_call");
        let session = SessionHandle::new();
        *self.last_session.lock().unwrap() = Some(session.clone());
        Ok(session)
    }

    async fn answer_call(&self, _options: &MediaOptions) -> Result<(), EngineError> {
        self.record("answer_call");
        Ok(())
    }

    async fn end_call(&self) -> Result<(), EngineError> {
        self.record("end_call");
        Ok(())
    }

    async fn set_muted(&self, _muted: bool) -> Result<(), EngineError> {
        self.record("set_muted");
        Ok(())
    }

    async fn hold_call(&self) -> Result<(), EngineError> {
        self.record("hold_call");
        Ok(())
    }

    async fn unhold_call(&self) -> Result<(), EngineError> {
        self.record("unhold_call");
        Ok(())
    }

    async fn send_dtmf(&self, _digit: char) -> Result<(), EngineError> {
        self.record("send_dtmf");
        Ok(())
    }

    async fn transfer_call(&self, _target: &str) -> Result<(), EngineError> {
        self.record("transfer_call");
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(EngineError::CallFailed("transfer refused".to_string()));
        }
        Ok(())
    }

    async fn attended_transfer(&self, _target: &str) -> Result<SessionHandle, EngineError> {
        self.record("attended_transfer");
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(EngineError::CallFailed("consultation refused".to_string()));
        }
        let session = SessionHandle::new();
        *self.last_consultation.lock().unwrap() = Some(session.clone());
        Ok(session)
    }

    async fn complete_attended_transfer(&self) -> Result<(), EngineError> {
        self.record("complete_attended_transfer");
        Ok(())
    }

    async fn cancel_attended_transfer(&self) -> Result<(), EngineError> {
        self.record("cancel_attended_transfer");
        Ok(())
    }

    async fn contact_info(&self) -> ContactInfo {
        self.contact.read().unwrap().clone()
    }

    async fn is_transport_alive(&self) -> bool {
        self.transport_alive.load(Ordering::SeqCst)
    }
}
