use serde::{Deserialize, Serialize};
use serde_with::{serde_as, base64::Base64};

use crate::models::ParticipantPresence;

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessage {
    #[serde_as(as = "Base64")]
    pub delta: Vec<u8>,
    pub peer: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMessage {
    pub presence: ParticipantPresence,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRemovedMessage {
    pub client_id: u64,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PingMessage {
    pub peer: u64,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InitMessage {
    #[serde_as(as = "Base64")]
    pub snapshot: Vec<u8>,
    pub participants: Vec<ParticipantPresence>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PongMessage {
    pub date: String,
}

/// Frames a client sends to the relay
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ReceivedMessage {
    #[serde(rename = "update")]
    Update(UpdateMessage),
    #[serde(rename = "presence")]
    Presence(PresenceMessage),
    #[serde(rename = "leave")]
    Leave,
    #[serde(rename = "ping")]
    Ping(PingMessage),
}

/// Frames the relay sends to a client
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum SendMessage {
    #[serde(rename = "init")]
    Init(InitMessage),
    #[serde(rename = "update")]
    Update(UpdateMessage),
    #[serde(rename = "presence")]
    Presence(PresenceMessage),
    #[serde(rename = "presence-removed")]
    PresenceRemoved(PresenceRemovedMessage),
    #[serde(rename = "pong")]
    Pong(PongMessage),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_frame_carries_base64_delta() {
        let msg = ReceivedMessage::Update(UpdateMessage {
            delta: vec![1, 2, 3],
            peer: 7,
        });
        let text = serde_json::to_string(&msg).unwrap();
        assert_eq!(text, r#"{"type":"update","delta":"AQID","peer":7}"#);
    }

    #[test]
    fn leave_frame_is_bare_tag() {
        let parsed: ReceivedMessage = serde_json::from_str(r#"{"type":"leave"}"#).unwrap();
        assert!(matches!(parsed, ReceivedMessage::Leave));
    }

    #[test]
    fn presence_removed_uses_kebab_tag() {
        let msg = SendMessage::PresenceRemoved(PresenceRemovedMessage { client_id: 42 });
        let text = serde_json::to_string(&msg).unwrap();
        assert_eq!(text, r#"{"type":"presence-removed","clientId":42}"#);
    }
}
