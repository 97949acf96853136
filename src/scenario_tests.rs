//! End-to-end softphone scenarios
//!
//! Drives the fully wired component graph (softphone + event pump) against
//! the scriptable mock engine:
//! 1. Inbound call ringing and answer
//! 2. Outbound dial with carrier ringback
//! 3. Attended transfer round trip
//! 4. Mapped failure reasons and audio ordering
//! 5. Logout guard suppression

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::call::CallStatus;
use crate::config::SoftphoneConfig;
use crate::engine::mock::MockEngine;
use crate::engine::{EngineEvent, MediaOptions, RegistrationState, SessionState};
use crate::events::EventBus;
use crate::models::{CallDirection, PresenceUpdate, TransferOutcome};
use crate::notify::NotificationKind;
use crate::softphone::Softphone;
use crate::transfer::TransferStatus;

struct Harness {
    engine: Arc<MockEngine>,
    phone: Arc<Softphone>,
    dir: PathBuf,
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

async fn harness(tag: &str) -> Harness {
    let dir = std::env::temp_dir().join(format!(
        "voip_softphone_scenario_{}_{}",
        tag,
        std::process::id()
    ));
    let config = SoftphoneConfig {
        backend_url: "http://localhost:0".to_string(),
        extension: "1001".to_string(),
        display_name: "Agent Under Test".to_string(),
        registration_debounce_ms: 1,
        health_check_interval_secs: 3600,
        roster_poll_interval_secs: 3600,
        data_dir: dir.clone(),
        ..SoftphoneConfig::default()
    };

    let engine = MockEngine::new();
    let feed: EventBus<PresenceUpdate> = EventBus::new(16);
    let phone = Softphone::new(config, engine.clone(), &feed)
        .await
        .expect("softphone builds");
    phone.start().await;

    Harness { engine, phone, dir }
}

/// Let the pump and debounce timers drain.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(60)).await;
}

async fn go_reachable(h: &Harness) {
    h.engine.set_contact(Some("sip:1001@10.0.0.5"), None);
    h.engine.emit(EngineEvent::RegistrationChanged {
        state: RegistrationState::Registered,
    });
    settle().await;
    assert!(h.phone.connection().snapshot().await.reachable);
}

// ============================================================================
// Scenario: inbound call
// ============================================================================

#[tokio::test]
async fn test_inbound_call_rings_and_answers() {
    let h = harness("inbound").await;
    go_reachable(&h).await;

    let session = inject_incoming(&h.engine, "+15551234");
    settle().await;

    let snapshot = h.phone.calls().snapshot().await;
    assert_eq!(snapshot.status, CallStatus::Ringing);
    assert_eq!(snapshot.direction, Some(CallDirection::Inbound));
    assert_eq!(snapshot.remote_identity.as_deref(), Some("+15551234"));
    assert!(snapshot.ringtone_playing);

    h.phone.calls().answer(&MediaOptions::default()).await.unwrap();
    assert_eq!(h.engine.invocation_count("answer_call"), 1);

    h.engine.emit(EngineEvent::SessionStateChanged {
        session,
        state: SessionState::Established,
    });
    settle().await;

    let snapshot = h.phone.calls().snapshot().await;
    assert_eq!(snapshot.status, CallStatus::Established);
    assert!(snapshot.start_time.is_some());
    assert!(!snapshot.ringtone_playing);
}

// ============================================================================
// Scenario: outbound call
// ============================================================================

#[tokio::test]
async fn test_outbound_dial_rings_without_local_ringtone() {
    let h = harness("outbound").await;
    go_reachable(&h).await;

    h.phone
        .calls()
        .dial("1002", &MediaOptions::default())
        .await
        .unwrap();
    let snapshot = h.phone.calls().snapshot().await;
    assert_eq!(snapshot.status, CallStatus::Connecting);
    assert_eq!(snapshot.direction, Some(CallDirection::Outbound));

    let session = h.engine.last_session().unwrap();
    h.engine.emit(EngineEvent::Progress {
        session: session.clone(),
        code: 180,
    });
    settle().await;

    let snapshot = h.phone.calls().snapshot().await;
    assert_eq!(snapshot.status, CallStatus::Ringing);
    // carrier ringback, never a local ringtone on the outbound leg
    assert!(!snapshot.ringtone_playing);

    h.engine.emit(EngineEvent::SessionStateChanged {
        session,
        state: SessionState::Established,
    });
    settle().await;
    assert_eq!(
        h.phone.calls().snapshot().await.status,
        CallStatus::Established
    );
}

// ============================================================================
// Scenario: attended transfer
// ============================================================================

#[tokio::test]
async fn test_attended_transfer_round_trip() {
    let h = harness("attended").await;
    go_reachable(&h).await;

    let session = inject_incoming(&h.engine, "+15551234");
    settle().await;
    h.phone.calls().answer(&MediaOptions::default()).await.unwrap();
    h.engine.emit(EngineEvent::SessionStateChanged {
        session: session.clone(),
        state: SessionState::Established,
    });
    settle().await;

    h.phone.transfers().attended_transfer("1003").await.unwrap();
    assert!(h.phone.calls().snapshot().await.on_hold);
    let active = h.phone.transfers().active().await.unwrap();
    assert_eq!(active.status, TransferStatus::ConsultationActive);

    h.phone.transfers().complete_attended().await.unwrap();
    assert!(h.phone.transfers().active().await.is_none());

    // the engine tears the primary leg down after the merge
    h.engine.emit(EngineEvent::SessionStateChanged {
        session: session.clone(),
        state: SessionState::Terminating,
    });
    h.engine.emit(EngineEvent::SessionStateChanged {
        session,
        state: SessionState::Terminated,
    });
    settle().await;

    let snapshot = h.phone.calls().snapshot().await;
    assert_eq!(snapshot.status, CallStatus::Idle);
    assert_eq!(snapshot.direction, None);
    assert!(!snapshot.on_hold);

    let history = h.phone.transfer_history().recent().await;
    assert_eq!(history[0].outcome, TransferOutcome::Completed);
    assert_eq!(history[0].target_extension, "1003");
}

// ============================================================================
// Scenario: failure mapping
// ============================================================================

#[tokio::test]
async fn test_busy_failure_maps_reason_and_resets() {
    let h = harness("busy").await;
    go_reachable(&h).await;

    h.phone
        .calls()
        .dial("1002", &MediaOptions::default())
        .await
        .unwrap();
    let session = h.engine.last_session().unwrap();

    h.engine.emit(EngineEvent::CallFailed {
        session: Some(session),
        status_code: Some(486),
        reason_phrase: "Busy Here".to_string(),
    });
    settle().await;

    let snapshot = h.phone.calls().snapshot().await;
    assert_eq!(snapshot.status, CallStatus::Idle);
    assert!(!snapshot.ringtone_playing);

    let notifications = h.phone.notifications().active();
    assert!(notifications
        .iter()
        .any(|n| n.message == "busy" && n.kind == NotificationKind::Error));

    // the failed call still left a log record
    let log = h.phone.call_log().recent().await;
    assert_eq!(log[0].reason.as_deref(), Some("busy"));
}

// ============================================================================
// Scenario: logout guard
// ============================================================================

#[tokio::test]
async fn test_logout_guard_suppresses_late_events() {
    let h = harness("logout").await;
    go_reachable(&h).await;

    let session = inject_incoming(&h.engine, "+15551234");
    settle().await;
    h.phone.calls().answer(&MediaOptions::default()).await.unwrap();
    h.engine.emit(EngineEvent::SessionStateChanged {
        session: session.clone(),
        state: SessionState::Established,
    });
    settle().await;

    h.phone.logout().await;
    assert!(!h.phone.session().is_active());
    assert_eq!(h.engine.invocation_count("unregister"), 1);
    assert_eq!(h.engine.invocation_count("end_call"), 1);

    let before = h.phone.calls().snapshot().await;
    let end_calls_before = h.engine.invocation_count("end_call");

    // a zombie continuation lands after logout: no mutation, no new calls
    h.phone
        .calls()
        .on_call_failed(Some(session), Some(486), "Busy Here")
        .await;
    h.phone.calls().hangup().await.unwrap();
    settle().await;

    let after = h.phone.calls().snapshot().await;
    assert_eq!(after.status, before.status);
    assert_eq!(after.duration_seconds, before.duration_seconds);
    assert_eq!(h.engine.invocation_count("end_call"), end_calls_before);
    assert!(h
        .phone
        .notifications()
        .active()
        .iter()
        .all(|n| n.message != "busy"));
}

#[tokio::test]
async fn test_logout_is_idempotent() {
    let h = harness("relogout").await;
    go_reachable(&h).await;

    h.phone.logout().await;
    h.phone.logout().await;

    assert_eq!(h.engine.invocation_count("unregister"), 1);
}

/// Offer an inbound call through the event stream.
fn inject_incoming(engine: &MockEngine, remote: &str) -> crate::engine::SessionHandle {
    let session = crate::engine::SessionHandle::new();
    engine.emit(EngineEvent::IncomingCall {
        session: session.clone(),
        remote_identity: remote.to_string(),
    });
    session
}
