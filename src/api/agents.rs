//! Agent presence API functions

use serde::{Deserialize, Serialize};
use super::client::{ApiClient, ApiError};
use crate::models::{AgentStatus, UpdatePresenceRequest};

/// Raw roster row as the backend reports it; the status string is normalized
/// by the roster service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusEntry {
    pub extension: String,
    pub name: Option<String>,
    pub status: String,
    #[serde(rename = "activeCallCount")]
    pub active_call_count: Option<u32>,
}

/// Fetch the current agent roster from the backend.
pub async fn fetch_agent_status(client: &ApiClient) -> Result<Vec<AgentStatusEntry>, ApiError> {
    client.get::<Vec<AgentStatusEntry>>("/api/agents/status").await
}

/// Publish this agent's presence to the backend.
pub async fn update_presence(
    client: &ApiClient,
    extension: &str,
    presence: AgentStatus,
) -> Result<(), ApiError> {
    client
        .post_no_response(
            "/api/agents/presence",
            &UpdatePresenceRequest {
                extension: extension.to_string(),
                presence,
            },
        )
        .await
}

/// Tell the backend this agent is logging out.
pub async fn notify_logout(client: &ApiClient, extension: &str) -> Result<(), ApiError> {
    #[derive(Serialize)]
    struct LogoutRequest {
        extension: String,
    }

    client
        .post_no_response(
            "/api/agents/logout",
            &LogoutRequest {
                extension: extension.to_string(),
            },
        )
        .await
}
