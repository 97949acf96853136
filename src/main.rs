//! Call-Center Softphone Engine
//!
//! Client-side call orchestration for a call-center CRM: one call state
//! machine, a registration/connection supervisor, a transfer coordinator and
//! a session guard, wired over an external SIP signaling engine and the
//! backend presence services.
//!
//! The binary runs a short scripted demo against the in-process loopback
//! engine; real deployments plug a trunk-backed engine into the same
//! `SignalingEngine` seam.

mod api;
mod call;
mod config;
mod connection;
mod engine;
mod events;
mod models;
mod notify;
mod reachability;
mod roster;
mod session;
mod softphone;
mod store;
mod transfer;

#[cfg(test)]
mod scenario_tests;

use std::time::Duration;
use anyhow::Result;

use call::CallStatus;
use config::SoftphoneConfig;
use engine::{LoopbackEngine, MediaOptions};
use events::EventBus;
use models::PresenceUpdate;
use softphone::Softphone;

#[tokio::main]
async fn main() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("voip_softphone=info".parse().unwrap()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = SoftphoneConfig::from_env().unwrap_or_else(|| SoftphoneConfig {
        extension: "1001".to_string(),
        display_name: "Demo Agent".to_string(),
        ..SoftphoneConfig::default()
    });

    let engine = LoopbackEngine::new(&config.extension);
    let presence_feed: EventBus<PresenceUpdate> = EventBus::new(64);

    let phone = Softphone::new(config, engine.clone(), &presence_feed).await?;
    phone.start().await;

    // a colleague comes online, as the backend push stream would report
    presence_feed.emit(PresenceUpdate {
        extension: "1002".to_string(),
        status: Some("registered".to_string()),
        device_state: None,
        presence: None,
        timestamp: None,
    });

    // let registration and the presence update settle
    tokio::time::sleep(Duration::from_millis(200)).await;
    let connection = phone.connection().snapshot().await;
    tracing::info!(
        "registration: {} (reachable: {})",
        connection.registration,
        connection.reachable
    );

    tracing::info!("dialing 1002");
    phone.calls().dial("1002", &MediaOptions::default()).await?;

    for _ in 0..50 {
        if phone.calls().snapshot().await.status == CallStatus::Established {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let snapshot = phone.calls().snapshot().await;
    tracing::info!(
        "call is {} to {}",
        snapshot.status,
        snapshot.remote_identity.as_deref().unwrap_or("?")
    );

    tokio::time::sleep(Duration::from_secs(2)).await;
    tracing::info!(
        "hanging up after {}s",
        phone.calls().snapshot().await.duration_seconds
    );
    phone.calls().hangup().await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // inbound leg: a caller reaches this agent
    engine.inject_incoming_call("+15557654321").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    if phone.calls().snapshot().await.status == CallStatus::Ringing {
        tracing::info!("answering inbound call");
        phone.calls().answer(&MediaOptions::default()).await?;
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    let muted = phone.calls().toggle_mute().await?;
    tracing::info!("microphone muted: {}", muted);

    phone.favorites().add("1002", "Front Desk").await?;
    for target in phone.roster().transfer_targets().await {
        tracing::info!("transfer target: {} ({})", target.extension, target.status);
    }

    tracing::info!("transferring caller to 1002");
    phone.transfers().blind_transfer("1002").await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    for record in phone.transfer_history().recent().await.iter().take(3) {
        tracing::info!(
            "transfer history: {} -> {}",
            record.target_extension,
            record.outcome.display_name()
        );
    }

    phone.calls().hangup().await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    if !phone.calls().snapshot().await.status.is_in_call() {
        tracing::info!("line is idle");
    }

    for record in phone.call_log().recent().await.iter().take(3) {
        tracing::info!(
            "call log: {} {} ({}s)",
            record.remote_identity.as_deref().unwrap_or("?"),
            record.outcome.display_name(),
            record.duration_seconds
        );
    }

    phone.logout().await;
    Ok(())
}
