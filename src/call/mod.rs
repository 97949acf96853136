//! Call state machine
//!
//! Single source of truth for the active call's lifecycle, independent of
//! which party initiated it. Session events from the engine, user actions
//! and failure events all funnel into one record guarded by defined edges;
//! direction is assigned once per call and never changes afterwards.

mod audio;

pub use audio::AudioCues;

use std::sync::{Arc, Mutex};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::engine::{
    EngineError, MediaOptions, SessionHandle, SessionState, SignalingEngine,
};
use crate::events::{EventBus, Subscription};
use crate::models::{CallDirection, CallLogRecord, CallOutcome};
use crate::notify::{call_failure_message, NotificationCenter};
use crate::session::SessionContext;
use crate::store::CallLog;

/// Canonical call lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Idle,
    Connecting,
    Ringing,
    Established,
    Terminating,
    Terminated,
}

impl CallStatus {
    /// True while a call occupies the line.
    pub fn is_in_call(&self) -> bool {
        !matches!(self, CallStatus::Idle | CallStatus::Terminated)
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallStatus::Idle => write!(f, "Idle"),
            CallStatus::Connecting => write!(f, "Connecting"),
            CallStatus::Ringing => write!(f, "Ringing"),
            CallStatus::Established => write!(f, "Established"),
            CallStatus::Terminating => write!(f, "Terminating"),
            CallStatus::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Call-machine errors.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("Not registered")]
    NotRegistered,

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("No incoming call to answer")]
    NoIncomingCall,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Read-only view of the current call, published on every change.
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub call_id: Option<String>,
    pub status: CallStatus,
    pub direction: Option<CallDirection>,
    pub remote_identity: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_seconds: u64,
    pub muted: bool,
    pub on_hold: bool,
    pub ringtone_playing: bool,
}

struct CallInner {
    call_id: Option<String>,
    status: CallStatus,
    direction: Option<CallDirection>,
    remote_identity: Option<String>,
    start_time: Option<DateTime<Utc>>,
    duration_seconds: u64,
    muted: bool,
    on_hold: bool,
    session: Option<SessionHandle>,
}

impl CallInner {
    fn new() -> Self {
        Self {
            call_id: None,
            status: CallStatus::Idle,
            direction: None,
            remote_identity: None,
            start_time: None,
            duration_seconds: 0,
            muted: false,
            on_hold: false,
            session: None,
        }
    }

    /// Direction is sticky: the first assignment wins for the lifetime of
    /// the call.
    fn assign_direction(&mut self, direction: CallDirection) {
        if self.direction.is_none() {
            self.direction = Some(direction);
        }
    }

    fn adopt_session(&mut self, session: &SessionHandle) {
        if self.session.is_none() {
            self.session = Some(session.clone());
        }
    }

    /// Whether an event for `session` concerns the call we are tracking.
    fn owns_session(&self, session: &SessionHandle) -> bool {
        match &self.session {
            Some(current) => current == session,
            None => self.status != CallStatus::Idle,
        }
    }

    fn log_record(&self, outcome: CallOutcome, reason: Option<String>) -> Option<CallLogRecord> {
        let call_id = self.call_id.clone()?;
        let duration_seconds = match self.start_time {
            Some(start) => (Utc::now() - start).num_seconds().max(0) as u64,
            None => 0,
        };
        Some(CallLogRecord {
            call_id,
            remote_identity: self.remote_identity.clone(),
            direction: self.direction,
            started_at: self.start_time,
            duration_seconds,
            outcome,
            reason,
            ended_at: Utc::now(),
        })
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

pub struct CallMachine {
    inner: Arc<RwLock<CallInner>>,
    engine: Arc<dyn SignalingEngine>,
    ctx: SessionContext,
    cues: Arc<AudioCues>,
    reachable: watch::Receiver<bool>,
    notifications: Arc<NotificationCenter>,
    call_log: Arc<CallLog>,
    changes: EventBus<CallSnapshot>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl CallMachine {
    pub fn new(
        engine: Arc<dyn SignalingEngine>,
        ctx: SessionContext,
        reachable: watch::Receiver<bool>,
        notifications: Arc<NotificationCenter>,
        call_log: Arc<CallLog>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(RwLock::new(CallInner::new())),
            engine,
            ctx,
            cues: Arc::new(AudioCues::default()),
            reachable,
            notifications,
            call_log,
            changes: EventBus::new(64),
            ticker: Mutex::new(None),
        })
    }

    pub fn audio(&self) -> &AudioCues {
        &self.cues
    }

    pub fn subscribe(&self) -> Subscription<CallSnapshot> {
        self.changes.subscribe()
    }

    pub async fn snapshot(&self) -> CallSnapshot {
        self.build_snapshot(&*self.inner.read().await)
    }

    // ---- user operations ----

    /// Start an outbound call.
    pub async fn dial(&self, number: &str, options: &MediaOptions) -> Result<(), CallError> {
        if !self.ctx.is_active() {
            return Ok(());
        }
        if !*self.reachable.borrow() {
            return Err(CallError::NotRegistered);
        }
        if !is_valid_number(number) {
            return Err(CallError::InvalidNumber(number.to_string()));
        }

        {
            let mut inner = self.inner.write().await;
            if inner.status != CallStatus::Idle {
                return Err(CallError::InvalidState(format!(
                    "cannot dial while {}",
                    inner.status
                )));
            }
            inner.call_id = Some(Uuid::new_v4().to_string());
            inner.status = CallStatus::Connecting;
            inner.assign_direction(CallDirection::Outbound);
            inner.remote_identity = Some(number.to_string());
            self.emit_change(&inner);
        }

        match self.engine.make_call(number, options).await {
            Ok(session) => {
                let mut inner = self.inner.write().await;
                // a hangup or failure may have landed while the INVITE was in
                // flight; only attach the session if the call still stands
                if inner.status == CallStatus::Connecting {
                    inner.adopt_session(&session);
                }
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                self.notifications.error(reason.clone());
                self.finish_call(CallOutcome::Failed, Some(reason)).await;
                Err(CallError::Engine(e))
            }
        }
    }

    /// Answer the ringing inbound call.
    pub async fn answer(&self, options: &MediaOptions) -> Result<(), CallError> {
        if !self.ctx.is_active() {
            return Ok(());
        }
        {
            let inner = self.inner.read().await;
            if inner.status != CallStatus::Ringing
                || inner.direction != Some(CallDirection::Inbound)
            {
                return Err(CallError::NoIncomingCall);
            }
        }

        if let Err(e) = self.engine.answer_call(options).await {
            let reason = e.to_string();
            self.notifications.error(reason.clone());
            self.finish_call(CallOutcome::Failed, Some(reason)).await;
            return Err(CallError::Engine(e));
        }
        // Established arrives on the session event stream
        Ok(())
    }

    /// Tear down the current call. Valid from any state; repeated calls
    /// while Terminating are no-ops and reach the engine exactly once.
    pub async fn hangup(&self) -> Result<(), CallError> {
        if !self.ctx.is_active() {
            return Ok(());
        }
        {
            let mut inner = self.inner.write().await;
            match inner.status {
                CallStatus::Idle | CallStatus::Terminating | CallStatus::Terminated => {
                    return Ok(());
                }
                _ => {
                    // cues stop before any observer can see the teardown
                    self.cues.stop_all();
                    inner.status = CallStatus::Terminating;
                    self.emit_change(&inner);
                }
            }
        }

        if let Err(e) = self.engine.end_call().await {
            tracing::warn!("hangup failed: {}", e);
            // settle locally so the line is not stuck in Terminating
            self.finish_call(CallOutcome::Failed, Some(e.to_string()))
                .await;
        }
        Ok(())
    }

    /// Flip the mute flag; only meaningful while Established.
    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        if !self.ctx.is_active() {
            return Ok(self.inner.read().await.muted);
        }
        let target = {
            let inner = self.inner.read().await;
            if inner.status != CallStatus::Established {
                return Err(CallError::InvalidState(format!(
                    "cannot mute while {}",
                    inner.status
                )));
            }
            !inner.muted
        };

        self.engine.set_muted(target).await?;

        let mut inner = self.inner.write().await;
        inner.muted = target;
        self.emit_change(&inner);
        Ok(target)
    }

    pub async fn hold(&self) -> Result<(), CallError> {
        if !self.ctx.is_active() {
            return Ok(());
        }
        {
            let inner = self.inner.read().await;
            if inner.status != CallStatus::Established {
                return Err(CallError::InvalidState(format!(
                    "cannot hold while {}",
                    inner.status
                )));
            }
            if inner.on_hold {
                return Ok(());
            }
        }

        self.engine.hold_call().await?;

        let mut inner = self.inner.write().await;
        inner.on_hold = true;
        self.emit_change(&inner);
        Ok(())
    }

    pub async fn unhold(&self) -> Result<(), CallError> {
        if !self.ctx.is_active() {
            return Ok(());
        }
        {
            let inner = self.inner.read().await;
            if inner.status != CallStatus::Established {
                return Err(CallError::InvalidState(format!(
                    "cannot unhold while {}",
                    inner.status
                )));
            }
            if !inner.on_hold {
                return Ok(());
            }
        }

        self.engine.unhold_call().await?;

        let mut inner = self.inner.write().await;
        inner.on_hold = false;
        self.emit_change(&inner);
        Ok(())
    }

    /// Send a DTMF digit on the established call.
    pub async fn send_dtmf(&self, digit: char) -> Result<(), CallError> {
        if !self.ctx.is_active() {
            return Ok(());
        }
        if !matches!(digit, '0'..='9' | '*' | '#' | 'A'..='D') {
            return Err(CallError::InvalidNumber(digit.to_string()));
        }
        {
            let inner = self.inner.read().await;
            if inner.status != CallStatus::Established {
                return Err(CallError::InvalidState(format!(
                    "cannot send DTMF while {}",
                    inner.status
                )));
            }
        }
        self.engine.send_dtmf(digit).await?;
        Ok(())
    }

    // ---- engine events ----

    /// An inbound call is being offered.
    pub async fn on_incoming_call(&self, session: SessionHandle, remote_identity: String) {
        if !self.ctx.is_active() {
            return;
        }
        let mut inner = self.inner.write().await;
        if inner.status != CallStatus::Idle {
            tracing::warn!(
                "incoming call from {} ignored while {}",
                remote_identity,
                inner.status
            );
            return;
        }
        inner.call_id = Some(Uuid::new_v4().to_string());
        inner.assign_direction(CallDirection::Inbound);
        inner.remote_identity = Some(remote_identity);
        inner.session = Some(session);
        inner.status = CallStatus::Ringing;
        self.cues.start_ringtone();
        self.emit_change(&inner);
    }

    /// Generic session lifecycle progress. Events for sessions other than
    /// the tracked one (e.g. a transfer consultation leg) are ignored.
    pub async fn on_session_state(&self, session: SessionHandle, state: SessionState) {
        if !self.ctx.is_active() {
            return;
        }

        let established = {
            let mut inner = self.inner.write().await;
            if !inner.owns_session(&session) && !(inner.status == CallStatus::Idle
                && state == SessionState::Initial)
            {
                tracing::debug!("ignoring {} for foreign session {}", state, session.id());
                return;
            }

            match state {
                SessionState::Initial => {
                    if inner.status == CallStatus::Idle {
                        // outbound session surfaced before the dial path
                        // finished bookkeeping
                        inner.call_id.get_or_insert_with(|| Uuid::new_v4().to_string());
                        inner.assign_direction(CallDirection::Outbound);
                        inner.session = Some(session);
                        inner.status = CallStatus::Connecting;
                        self.emit_change(&inner);
                    }
                    false
                }
                SessionState::Establishing => {
                    if inner.status == CallStatus::Connecting {
                        inner.adopt_session(&session);
                        // outbound leg: remote is ringing, no local cue
                        inner.status = CallStatus::Ringing;
                        self.emit_change(&inner);
                    }
                    false
                }
                SessionState::Established => {
                    // Establishing may never have been observed
                    if matches!(inner.status, CallStatus::Connecting | CallStatus::Ringing) {
                        inner.adopt_session(&session);
                        self.cues.stop_all();
                        inner.status = CallStatus::Established;
                        inner.start_time = Some(Utc::now());
                        inner.duration_seconds = 0;
                        self.emit_change(&inner);
                        true
                    } else {
                        false
                    }
                }
                SessionState::Terminating => {
                    if matches!(
                        inner.status,
                        CallStatus::Connecting | CallStatus::Ringing | CallStatus::Established
                    ) {
                        self.cues.stop_all();
                        inner.status = CallStatus::Terminating;
                        self.emit_change(&inner);
                    }
                    false
                }
                SessionState::Terminated => {
                    drop(inner);
                    self.finish_call(CallOutcome::Completed, None).await;
                    false
                }
            }
        };

        if established {
            self.spawn_duration_ticker();
        }
    }

    /// Provisional response on the outbound leg (180/183).
    pub async fn on_progress(&self, session: SessionHandle, code: u16) {
        if !self.ctx.is_active() {
            return;
        }
        if !matches!(code, 180 | 183) {
            return;
        }
        let mut inner = self.inner.write().await;
        if !inner.owns_session(&session) {
            return;
        }
        if inner.status == CallStatus::Connecting {
            inner.adopt_session(&session);
            inner.status = CallStatus::Ringing;
            self.emit_change(&inner);
        }
    }

    /// The call failed; surface a mapped reason and return to rest.
    pub async fn on_call_failed(
        &self,
        session: Option<SessionHandle>,
        status_code: Option<u16>,
        reason_phrase: &str,
    ) {
        if !self.ctx.is_active() {
            return;
        }
        {
            let inner = self.inner.read().await;
            if inner.status == CallStatus::Idle {
                return;
            }
            if let Some(s) = &session {
                if !inner.owns_session(s) {
                    return;
                }
            }
        }
        let message = call_failure_message(status_code, reason_phrase);
        self.notifications.error(message.clone());
        self.finish_call(CallOutcome::Failed, Some(message)).await;
    }

    pub async fn on_media_failure(&self, session: SessionHandle) {
        self.on_call_failed(Some(session), None, "media failure").await;
    }

    pub async fn on_ice_failure(&self, session: SessionHandle) {
        self.on_call_failed(Some(session), None, "connection failure").await;
    }

    // ---- internals ----

    /// Shared terminal path: stop cues, walk the remaining edges, log the
    /// call, reset to Idle defaults. The call-log write is awaited so the
    /// record cannot be lost to a following call.
    async fn finish_call(&self, outcome: CallOutcome, reason: Option<String>) {
        if !self.ctx.is_active() {
            return;
        }
        let record = {
            let mut inner = self.inner.write().await;
            if inner.status == CallStatus::Idle {
                return;
            }
            // cues always stop before fields reset
            self.cues.stop_all();
            if inner.status == CallStatus::Established {
                // never skip Terminating on the way down
                inner.status = CallStatus::Terminating;
                self.emit_change(&inner);
            }
            if inner.status != CallStatus::Terminated {
                inner.status = CallStatus::Terminated;
                self.emit_change(&inner);
            }
            let record = inner.log_record(outcome, reason);
            inner.reset();
            self.emit_change(&inner);
            record
        };

        self.stop_ticker();

        if let Some(record) = record {
            if let Err(e) = self.call_log.append(record).await {
                tracing::warn!("failed to append call log record: {}", e);
            }
        }
    }

    fn spawn_duration_ticker(&self) {
        let inner = self.inner.clone();
        let changes = self.changes.clone();
        let ctx = self.ctx.clone();
        let cancel = self.ctx.cancellation();
        let cues = self.cues.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
            interval.tick().await; // first tick completes immediately
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if !ctx.is_active() {
                    break;
                }
                let mut guard = inner.write().await;
                if guard.status != CallStatus::Established {
                    break;
                }
                if let Some(start) = guard.start_time {
                    guard.duration_seconds = (Utc::now() - start).num_seconds().max(0) as u64;
                }
                changes.emit(snapshot_of(&guard, &cues));
            }
        });

        if let Some(old) = self.ticker.lock().unwrap().replace(handle) {
            old.abort();
        }
    }

    fn stop_ticker(&self) {
        if let Some(handle) = self.ticker.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn build_snapshot(&self, inner: &CallInner) -> CallSnapshot {
        snapshot_of(inner, &self.cues)
    }

    fn emit_change(&self, inner: &CallInner) {
        self.changes.emit(self.build_snapshot(inner));
    }
}

fn snapshot_of(inner: &CallInner, cues: &AudioCues) -> CallSnapshot {
    CallSnapshot {
        call_id: inner.call_id.clone(),
        status: inner.status,
        direction: inner.direction,
        remote_identity: inner.remote_identity.clone(),
        start_time: inner.start_time,
        duration_seconds: inner.duration_seconds,
        muted: inner.muted,
        on_hold: inner.on_hold,
        ringtone_playing: cues.ringtone_playing(),
    }
}

fn is_valid_number(number: &str) -> bool {
    !number.is_empty()
        && number
            .chars()
            .all(|c| c.is_ascii_digit() || c == '*' || c == '#')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("voip_softphone_call_{}_{}", tag, std::process::id()))
    }

    async fn machine_with(
        tag: &str,
        reachable: bool,
    ) -> (Arc<MockEngine>, Arc<CallMachine>, watch::Sender<bool>) {
        let engine = MockEngine::new();
        let (tx, rx) = watch::channel(reachable);
        let notifications = Arc::new(NotificationCenter::new(60));
        let call_log = Arc::new(CallLog::open(&temp_dir(tag), 50).await.unwrap());
        let machine = CallMachine::new(
            engine.clone(),
            SessionContext::new(),
            rx,
            notifications,
            call_log,
        );
        (engine, machine, tx)
    }

    #[tokio::test]
    async fn test_dial_requires_reachability() {
        let (_engine, machine, _tx) = machine_with("unreachable", false).await;
        let err = machine.dial("1002", &MediaOptions::default()).await.unwrap_err();
        assert!(matches!(err, CallError::NotRegistered));
        assert_eq!(machine.snapshot().await.status, CallStatus::Idle);
    }

    #[tokio::test]
    async fn test_dial_rejects_invalid_number() {
        let (_engine, machine, _tx) = machine_with("badnumber", true).await;
        let err = machine
            .dial("555-CALL", &MediaOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::InvalidNumber(_)));
        assert_eq!(machine.snapshot().await.status, CallStatus::Idle);
    }

    #[tokio::test]
    async fn test_dial_accepts_star_and_pound() {
        let (_engine, machine, _tx) = machine_with("starpound", true).await;
        machine.dial("*98#", &MediaOptions::default()).await.unwrap();
        let snapshot = machine.snapshot().await;
        assert_eq!(snapshot.status, CallStatus::Connecting);
        assert_eq!(snapshot.direction, Some(CallDirection::Outbound));
    }

    #[tokio::test]
    async fn test_answer_requires_ringing_inbound() {
        let (_engine, machine, _tx) = machine_with("noanswer", true).await;
        let err = machine.answer(&MediaOptions::default()).await.unwrap_err();
        assert!(matches!(err, CallError::NoIncomingCall));

        // outbound ringing must not be answerable either
        machine.dial("1002", &MediaOptions::default()).await.unwrap();
        let session = machine.snapshot().await;
        assert_eq!(session.status, CallStatus::Connecting);
        let err = machine.answer(&MediaOptions::default()).await.unwrap_err();
        assert!(matches!(err, CallError::NoIncomingCall));
    }

    #[tokio::test]
    async fn test_direction_is_sticky() {
        let (_engine, machine, _tx) = machine_with("sticky", true).await;
        let session = SessionHandle::new();
        machine
            .on_incoming_call(session.clone(), "+15551234".to_string())
            .await;
        assert_eq!(machine.snapshot().await.direction, Some(CallDirection::Inbound));

        // a racing session-initial event must not flip direction to Outbound
        machine
            .on_session_state(session.clone(), SessionState::Initial)
            .await;
        assert_eq!(machine.snapshot().await.direction, Some(CallDirection::Inbound));

        machine
            .on_session_state(session, SessionState::Established)
            .await;
        assert_eq!(machine.snapshot().await.direction, Some(CallDirection::Inbound));
    }

    #[tokio::test]
    async fn test_hangup_is_idempotent_while_terminating() {
        let (engine, machine, _tx) = machine_with("idempotent", true).await;
        machine.dial("1002", &MediaOptions::default()).await.unwrap();
        let session = machine.snapshot().await;
        assert_eq!(session.status, CallStatus::Connecting);

        machine.hangup().await.unwrap();
        machine.hangup().await.unwrap();
        machine.hangup().await.unwrap();

        assert_eq!(engine.invocation_count("end_call"), 1);
        assert_eq!(machine.snapshot().await.status, CallStatus::Terminating);
    }

    #[tokio::test]
    async fn test_established_without_establishing_gap() {
        let (engine, machine, _tx) = machine_with("gap", true).await;
        machine.dial("1002", &MediaOptions::default()).await.unwrap();
        assert_eq!(machine.snapshot().await.status, CallStatus::Connecting);

        // a foreign session must not establish the call
        machine
            .on_session_state(SessionHandle::new(), SessionState::Established)
            .await;
        assert_eq!(machine.snapshot().await.status, CallStatus::Connecting);

        // Established for the owned session with no Establishing observed
        let session = engine.last_session().unwrap();
        machine
            .on_session_state(session, SessionState::Established)
            .await;
        let snapshot = machine.snapshot().await;
        assert_eq!(snapshot.status, CallStatus::Established);
        assert!(snapshot.start_time.is_some());
    }

    #[tokio::test]
    async fn test_mute_and_hold_require_established() {
        let (_engine, machine, _tx) = machine_with("flags", true).await;
        assert!(matches!(
            machine.toggle_mute().await.unwrap_err(),
            CallError::InvalidState(_)
        ));
        assert!(matches!(
            machine.hold().await.unwrap_err(),
            CallError::InvalidState(_)
        ));

        let session = SessionHandle::new();
        machine
            .on_incoming_call(session.clone(), "1005".to_string())
            .await;
        machine
            .on_session_state(session, SessionState::Established)
            .await;

        assert!(machine.toggle_mute().await.unwrap());
        assert!(!machine.toggle_mute().await.unwrap());
        machine.hold().await.unwrap();
        assert!(machine.snapshot().await.on_hold);
        machine.unhold().await.unwrap();
        assert!(!machine.snapshot().await.on_hold);
    }

    #[tokio::test]
    async fn test_terminated_after_established_passes_through_terminating() {
        let (_engine, machine, _tx) = machine_with("edges", true).await;
        let session = SessionHandle::new();
        machine
            .on_incoming_call(session.clone(), "1005".to_string())
            .await;
        machine
            .on_session_state(session.clone(), SessionState::Established)
            .await;

        let mut sub = machine.subscribe();
        machine
            .on_session_state(session, SessionState::Terminated)
            .await;

        let mut observed = Vec::new();
        while let Some(snapshot) = sub.try_recv() {
            observed.push(snapshot.status);
        }
        assert_eq!(
            observed,
            vec![CallStatus::Terminating, CallStatus::Terminated, CallStatus::Idle]
        );
    }

    #[tokio::test]
    async fn test_call_failure_resets_with_audio_stopped_first() {
        let (_engine, machine, _tx) = machine_with("failure", true).await;
        let session = SessionHandle::new();
        machine
            .on_incoming_call(session.clone(), "1005".to_string())
            .await;
        assert!(machine.audio().ringtone_playing());

        let mut sub = machine.subscribe();
        machine
            .on_call_failed(Some(session), Some(486), "Busy Here")
            .await;

        // every published snapshot after the failure shows the cue stopped
        while let Some(snapshot) = sub.try_recv() {
            assert!(!snapshot.ringtone_playing);
        }
        let snapshot = machine.snapshot().await;
        assert_eq!(snapshot.status, CallStatus::Idle);
        assert_eq!(snapshot.direction, None);
        assert_eq!(snapshot.remote_identity, None);
        assert_eq!(snapshot.duration_seconds, 0);
    }

    #[tokio::test]
    async fn test_dtmf_requires_established_and_valid_digit() {
        let (engine, machine, _tx) = machine_with("dtmf", true).await;
        assert!(matches!(
            machine.send_dtmf('5').await.unwrap_err(),
            CallError::InvalidState(_)
        ));

        let session = SessionHandle::new();
        machine
            .on_incoming_call(session.clone(), "1005".to_string())
            .await;
        machine
            .on_session_state(session, SessionState::Established)
            .await;

        assert!(matches!(
            machine.send_dtmf('x').await.unwrap_err(),
            CallError::InvalidNumber(_)
        ));
        machine.send_dtmf('5').await.unwrap();
        machine.send_dtmf('#').await.unwrap();
        assert_eq!(engine.invocation_count("send_dtmf"), 2);
    }
}
