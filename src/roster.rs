//! Agent roster service
//!
//! Keeps the agent directory used for picking transfer targets. Backend push
//! events are the primary feed; a periodic pull covers quiet or dropped
//! streams. This agent's own presence updates are forwarded to the
//! connection supervisor as the backend half of the reachability rule.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::api::agents::fetch_agent_status;
use crate::api::{ApiClient, ApiError};
use crate::connection::ConnectionSupervisor;
use crate::events::Subscription;
use crate::models::{AgentRosterEntry, AgentStatus, PresenceUpdate};
use crate::session::SessionContext;

pub struct RosterService {
    me: Weak<RosterService>,
    client: ApiClient,
    ctx: SessionContext,
    own_extension: String,
    poll_interval_secs: u64,
    entries: RwLock<HashMap<String, AgentRosterEntry>>,
    supervisor: Arc<ConnectionSupervisor>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl RosterService {
    pub fn new(
        client: ApiClient,
        ctx: SessionContext,
        own_extension: &str,
        poll_interval_secs: u64,
        supervisor: Arc<ConnectionSupervisor>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            client,
            ctx,
            own_extension: own_extension.to_string(),
            poll_interval_secs,
            entries: RwLock::new(HashMap::new()),
            supervisor,
            tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Pull the full roster from the backend.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        if !self.ctx.is_active() {
            return Ok(());
        }
        let rows = fetch_agent_status(&self.client).await?;
        let mut entries = self.entries.write().await;
        for row in rows {
            let status = AgentStatus::from_raw(&row.status);
            let entry = entries
                .entry(row.extension.clone())
                .or_insert_with(|| AgentRosterEntry {
                    extension: row.extension.clone(),
                    name: row.name.clone().unwrap_or_else(|| row.extension.clone()),
                    status,
                    active_call_count: 0,
                    updated_at: None,
                });
            if let Some(name) = row.name {
                entry.name = name;
            }
            entry.status = status;
            entry.active_call_count = row.active_call_count.unwrap_or(0);
            entry.updated_at = Some(Utc::now());
        }
        drop(entries);

        // own row feeds the backend half of reachability
        if let Some(own) = self.entry(&self.own_extension).await {
            self.supervisor.on_presence_update(own.status).await;
        }
        Ok(())
    }

    /// Apply one push event.
    pub async fn apply_update(&self, update: PresenceUpdate) {
        if !self.ctx.is_active() {
            return;
        }
        let status = update.effective_status();
        {
            let mut entries = self.entries.write().await;
            let entry = entries
                .entry(update.extension.clone())
                .or_insert_with(|| AgentRosterEntry {
                    extension: update.extension.clone(),
                    name: update.extension.clone(),
                    status,
                    active_call_count: 0,
                    updated_at: None,
                });
            entry.status = status;
            entry.updated_at = Some(update.timestamp.unwrap_or_else(Utc::now));
        }

        if update.extension == self.own_extension {
            self.supervisor.on_presence_update(status).await;
        }
    }

    /// Consume the backend push feed until it closes or the session ends.
    pub fn spawn_push_loop(&self, mut feed: Subscription<PresenceUpdate>) {
        let weak = self.me.clone();
        let cancel = self.ctx.cancellation();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    update = feed.recv() => match update {
                        Some(update) => {
                            let Some(me) = weak.upgrade() else { break };
                            me.apply_update(update).await;
                        }
                        None => break,
                    },
                }
            }
        });
        self.tasks.lock().unwrap().push(handle);
    }

    /// Periodic pull fallback for quiet or dropped push streams.
    pub fn spawn_poll_loop(&self) {
        let weak = self.me.clone();
        let cancel = self.ctx.cancellation();
        let period = std::time::Duration::from_secs(self.poll_interval_secs.max(1));
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
                if let Err(e) = me.refresh().await {
                    tracing::warn!("roster poll failed: {}", e);
                }
            }
        });
        self.tasks.lock().unwrap().push(handle);
    }

    pub async fn entry(&self, extension: &str) -> Option<AgentRosterEntry> {
        self.entries.read().await.get(extension).cloned()
    }

    /// All known agents, ordered by extension.
    pub async fn entries(&self) -> Vec<AgentRosterEntry> {
        let mut all: Vec<AgentRosterEntry> = self.entries.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.extension.cmp(&b.extension));
        all
    }

    /// Agents this one could transfer a call to: everyone else who is not
    /// offline.
    pub async fn transfer_targets(&self) -> Vec<AgentRosterEntry> {
        let mut targets: Vec<AgentRosterEntry> = self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.extension != self.own_extension && e.status.is_online())
            .cloned()
            .collect();
        targets.sort_by(|a, b| a.extension.cmp(&b.extension));
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoftphoneConfig;
    use crate::engine::mock::MockEngine;
    use crate::events::EventBus;
    use crate::notify::NotificationCenter;

    fn service() -> (Arc<RosterService>, Arc<ConnectionSupervisor>) {
        let engine = MockEngine::new();
        let ctx = SessionContext::new();
        let notifications = Arc::new(NotificationCenter::new(60));
        let config = SoftphoneConfig {
            extension: "1001".to_string(),
            ..SoftphoneConfig::default()
        };
        let (supervisor, _rx) =
            ConnectionSupervisor::new(engine, ctx.clone(), notifications, &config);
        let roster = RosterService::new(
            ApiClient::new("http://localhost:0"),
            ctx,
            "1001",
            3600,
            supervisor.clone(),
        );
        (roster, supervisor)
    }

    fn update(extension: &str, status: &str) -> PresenceUpdate {
        PresenceUpdate {
            extension: extension.to_string(),
            status: Some(status.to_string()),
            device_state: None,
            presence: None,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_push_updates_populate_roster() {
        let (roster, _supervisor) = service();

        roster.apply_update(update("1002", "registered")).await;
        roster.apply_update(update("1003", "inuse")).await;
        roster.apply_update(update("1002", "paused")).await;

        let entries = roster.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].extension, "1002");
        assert_eq!(entries[0].status, AgentStatus::Paused);
        assert_eq!(entries[1].status, AgentStatus::OnCall);
    }

    #[tokio::test]
    async fn test_transfer_targets_exclude_self_and_offline() {
        let (roster, _supervisor) = service();

        roster.apply_update(update("1001", "registered")).await;
        roster.apply_update(update("1002", "registered")).await;
        roster.apply_update(update("1003", "offline")).await;
        roster.apply_update(update("1004", "busy")).await;

        let targets = roster.transfer_targets().await;
        let extensions: Vec<&str> = targets.iter().map(|t| t.extension.as_str()).collect();
        assert_eq!(extensions, vec!["1002", "1004"]);
    }

    #[tokio::test]
    async fn test_own_presence_feeds_supervisor() {
        let (roster, supervisor) = service();

        roster.apply_update(update("1001", "registered")).await;
        // backend says online while contact data is absent: fallback applies
        assert!(supervisor.snapshot().await.reachable);

        roster.apply_update(update("1001", "offline")).await;
        assert!(!supervisor.snapshot().await.reachable);
    }

    #[tokio::test]
    async fn test_push_loop_consumes_feed() {
        let (roster, _supervisor) = service();
        let feed: EventBus<PresenceUpdate> = EventBus::new(16);

        roster.spawn_push_loop(feed.subscribe());
        feed.emit(update("1005", "registered"));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(roster.entry("1005").await.is_some());
    }
}
