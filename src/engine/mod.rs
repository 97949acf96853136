//! Signaling engine contract
//!
//! The SIP protocol engine is an external collaborator. This module defines
//! the surface the softphone consumes: call/registration actions plus a typed
//! event stream. Session negotiation, SDP and transport all live behind the
//! trait.

mod loopback;
#[cfg(test)]
pub mod mock;

pub use loopback::LoopbackEngine;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::events::Subscription;

/// Session lifecycle states, reported in monotonic order per call.
/// Intermediate states may be skipped (e.g. Established without an observed
/// Establishing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initial,
    Establishing,
    Established,
    Terminating,
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Initial => write!(f, "Initial"),
            SessionState::Establishing => write!(f, "Establishing"),
            SessionState::Established => write!(f, "Established"),
            SessionState::Terminating => write!(f, "Terminating"),
            SessionState::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Registrar-side registration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    Failed,
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationState::Unregistered => write!(f, "Unregistered"),
            RegistrationState::Registering => write!(f, "Registering"),
            RegistrationState::Registered => write!(f, "Registered"),
            RegistrationState::Failed => write!(f, "Failed"),
        }
    }
}

/// Opaque handle to an engine-owned session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    id: Uuid,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Media preferences for dialing and answering.
#[derive(Debug, Clone)]
pub struct MediaOptions {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaOptions {
    fn default() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }
}

/// Registration contact data used for reachability checks.
#[derive(Debug, Clone, Default)]
pub struct ContactInfo {
    /// Contact URI reported by the registrar; a `sip:<ext>@offline` host
    /// means the registrar considers this contact offline.
    pub contact_uri: Option<String>,
    /// When the registration lapses; absent means no known expiry.
    pub expiration: Option<DateTime<Utc>>,
}

/// Events emitted by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Generic session lifecycle progress for a known session.
    SessionStateChanged {
        session: SessionHandle,
        state: SessionState,
    },
    /// A new inbound call is offered.
    IncomingCall {
        session: SessionHandle,
        remote_identity: String,
    },
    /// Provisional response (180/183) on an outbound session.
    Progress { session: SessionHandle, code: u16 },
    /// The call failed; session may already be gone.
    CallFailed {
        session: Option<SessionHandle>,
        status_code: Option<u16>,
        reason_phrase: String,
    },
    /// Media path broke down mid-call.
    MediaFailure { session: SessionHandle },
    /// ICE negotiation broke down mid-call.
    IceFailure { session: SessionHandle },
    /// Registration state changed.
    RegistrationChanged { state: RegistrationState },
    /// Registration attempt failed with a reason.
    RegistrationFailed { error: String },
    /// A previously requested blind transfer was confirmed complete.
    TransferConfirmed { target: String },
    /// A previously requested blind transfer failed.
    TransferFailed { target: String, reason: String },
}

/// Engine-side errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Call failed: {0}")]
    CallFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not registered")]
    NotRegistered,

    #[error("No active session")]
    NoActiveSession,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The SIP engine surface consumed by the softphone.
///
/// One primary session at a time plus an optional consultation session during
/// an attended transfer; the engine owns both and reports their lifecycle on
/// the event stream.
#[async_trait]
pub trait SignalingEngine: Send + Sync {
    /// Open a scoped subscription to the engine event stream.
    fn subscribe(&self) -> Subscription<EngineEvent>;

    async fn register(&self) -> Result<(), EngineError>;
    async fn unregister(&self) -> Result<(), EngineError>;

    /// Start an outbound call; the returned handle identifies the session in
    /// subsequent events.
    async fn make_call(
        &self,
        number: &str,
        options: &MediaOptions,
    ) -> Result<SessionHandle, EngineError>;

    /// Answer the currently offered inbound call.
    async fn answer_call(&self, options: &MediaOptions) -> Result<(), EngineError>;

    /// Tear down the primary session.
    async fn end_call(&self) -> Result<(), EngineError>;

    async fn set_muted(&self, muted: bool) -> Result<(), EngineError>;
    async fn hold_call(&self) -> Result<(), EngineError>;
    async fn unhold_call(&self) -> Result<(), EngineError>;
    async fn send_dtmf(&self, digit: char) -> Result<(), EngineError>;

    /// One-shot blind transfer; completion arrives as
    /// `TransferConfirmed`/`TransferFailed`.
    async fn transfer_call(&self, target: &str) -> Result<(), EngineError>;

    /// Open a consultation call for an attended transfer.
    async fn attended_transfer(&self, target: &str) -> Result<SessionHandle, EngineError>;

    /// Connect the held party to the consulted target and drop out.
    async fn complete_attended_transfer(&self) -> Result<(), EngineError>;

    /// Drop the consultation leg, leaving the held primary call intact.
    async fn cancel_attended_transfer(&self) -> Result<(), EngineError>;

    /// Current registration contact data.
    async fn contact_info(&self) -> ContactInfo;

    /// Transport liveness probe for the health-check loop.
    async fn is_transport_alive(&self) -> bool;
}
