use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Transfer flavor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferKind {
    /// Redirect without consultation.
    Blind,
    /// Consult the target first, then merge or cancel.
    Attended,
}

impl TransferKind {
    pub fn display_name(&self) -> &str {
        match self {
            TransferKind::Blind => "Blind",
            TransferKind::Attended => "Attended",
        }
    }
}

impl std::fmt::Display for TransferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Final outcome of a transfer attempt, as recorded in history.
///
/// `CompletedUnconfirmed` is the optimistic-completion policy: no
/// confirmation arrived inside the timeout window, so completion is assumed
/// rather than observed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferOutcome {
    Completed,
    CompletedUnconfirmed,
    Failed,
    Cancelled,
}

impl TransferOutcome {
    pub fn display_name(&self) -> &str {
        match self {
            TransferOutcome::Completed => "Completed",
            TransferOutcome::CompletedUnconfirmed => "Completed (unconfirmed)",
            TransferOutcome::Failed => "Failed",
            TransferOutcome::Cancelled => "Cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TransferOutcome::Completed | TransferOutcome::CompletedUnconfirmed
        )
    }
}

/// One row of the bounded transfer-history side-table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferRecord {
    #[serde(rename = "callId")]
    pub call_id: String,
    #[serde(rename = "targetExtension")]
    pub target_extension: String,
    pub kind: TransferKind,
    pub outcome: TransferOutcome,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}
