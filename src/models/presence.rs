use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Identity supplied by the host application for the local participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub color: String,
}

/// Ephemeral per-participant record shared on a room's presence channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantPresence {
    pub client_id: u64,
    pub display_name: String,
    pub color: String,
    pub color_light: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cursor_position: Option<usize>,
}
