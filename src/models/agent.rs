use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Normalized agent status as shown in the transfer directory.
///
/// Backends report presence in several vocabularies (device state, AMI
/// status strings, presence words); everything is collapsed into these four.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Registered,
    OnCall,
    Paused,
    Offline,
}

impl AgentStatus {
    pub fn display_name(&self) -> &str {
        match self {
            AgentStatus::Registered => "Registered",
            AgentStatus::OnCall => "On Call",
            AgentStatus::Paused => "Paused",
            AgentStatus::Offline => "Offline",
        }
    }

    /// Whether the backend considers this agent online at all.
    pub fn is_online(&self) -> bool {
        !matches!(self, AgentStatus::Offline)
    }

    /// Normalize a raw backend status / device-state / presence string.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "registered" | "online" | "ready" | "idle" | "available" | "not_inuse" => {
                AgentStatus::Registered
            }
            "on call" | "oncall" | "busy" | "inuse" | "in use" | "ringing" | "talking" => {
                AgentStatus::OnCall
            }
            "paused" | "pause" | "break" | "away" | "acw" | "aftercall" => AgentStatus::Paused,
            _ => AgentStatus::Offline,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// One row of the agent directory used to pick transfer targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRosterEntry {
    pub extension: String,
    pub name: String,
    pub status: AgentStatus,
    #[serde(rename = "activeCallCount")]
    pub active_call_count: u32,
    #[serde(rename = "updatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Presence push event payload from the backend.
///
/// Different backend event families carry the status under different keys
/// (`status`, `deviceState`, `presence`); `effective_status` picks the first
/// one present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub extension: String,
    pub status: Option<String>,
    #[serde(rename = "deviceState")]
    pub device_state: Option<String>,
    pub presence: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PresenceUpdate {
    pub fn effective_status(&self) -> AgentStatus {
        self.status
            .as_deref()
            .or(self.device_state.as_deref())
            .or(self.presence.as_deref())
            .map(AgentStatus::from_raw)
            .unwrap_or(AgentStatus::Offline)
    }
}

/// Body for the backend presence mutation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePresenceRequest {
    pub extension: String,
    pub presence: AgentStatus,
}

/// A pinned transfer target in the favorites list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FavoriteEntry {
    pub extension: String,
    pub name: String,
    #[serde(rename = "addedAt")]
    pub added_at: DateTime<Utc>,
}
