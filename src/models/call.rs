use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Call direction, fixed for the lifetime of a call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    pub fn display_name(&self) -> &str {
        match self {
            CallDirection::Inbound => "Inbound",
            CallDirection::Outbound => "Outbound",
        }
    }
}

impl std::fmt::Display for CallDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// How a finished call ended, recorded in the local call log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallOutcome {
    Completed,
    Failed,
}

impl CallOutcome {
    pub fn display_name(&self) -> &str {
        match self {
            CallOutcome::Completed => "Completed",
            CallOutcome::Failed => "Failed",
        }
    }
}

/// One row of the local call log, appended when a call reaches its end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallLogRecord {
    #[serde(rename = "callId")]
    pub call_id: String,
    #[serde(rename = "remoteIdentity")]
    pub remote_identity: Option<String>,
    pub direction: Option<CallDirection>,
    #[serde(rename = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "durationSeconds")]
    pub duration_seconds: u64,
    pub outcome: CallOutcome,
    pub reason: Option<String>,
    #[serde(rename = "endedAt")]
    pub ended_at: DateTime<Utc>,
}
