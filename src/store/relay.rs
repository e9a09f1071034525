use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::CollabError;
use crate::models::{PresenceMessage, ReceivedMessage, SendMessage, UpdateMessage};
use crate::store::transport::{ClientFrame, RoomEvent, RoomLink, RoomTransport};
use crate::BoxFuture;

/// Reaches a relay server over WebSocket (`<base_url>/ws/<room>?client_id=<id>`)
#[derive(Debug, Clone)]
pub struct RelayTransport {
    base_url: String,
}

impl RelayTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn room_url(&self, room_id: &str, client_id: u64) -> String {
        format!("{}/ws/{}?client_id={}", self.base_url, room_id, client_id)
    }

    async fn connect(&self, room_id: &str, client_id: u64) -> Result<RoomLink, CollabError> {
        let url = self.room_url(room_id, client_id);
        info!("Connecting to relay {}", url);
        let (ws, _resp) = connect_async(url.as_str())
            .await
            .map_err(|e| CollabError::Transport(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        // The relay always opens with an init frame
        let init = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<SendMessage>(text.as_str())? {
                    SendMessage::Init(init) => break init,
                    other => debug!("Ignoring frame before init: {:?}", other),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(CollabError::Transport("relay closed before init".to_string()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(CollabError::Transport(e.to_string())),
            }
        };

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<RoomEvent>();

        // Writer: local frames to the relay
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let leaving = matches!(frame, ClientFrame::Leave);
                let msg = match frame {
                    ClientFrame::Update(delta) => ReceivedMessage::Update(UpdateMessage {
                        delta,
                        peer: client_id,
                    }),
                    ClientFrame::Presence(presence) => ReceivedMessage::Presence(PresenceMessage { presence }),
                    ClientFrame::Leave => ReceivedMessage::Leave,
                };
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode frame: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() || leaving {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: relay frames to the session
        let room = room_id.to_string();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Relay connection for room {} failed: {}", room, e);
                        break;
                    }
                };
                let event = match serde_json::from_str::<SendMessage>(text.as_str()) {
                    Ok(SendMessage::Update(update)) => RoomEvent::Update {
                        from: update.peer,
                        delta: update.delta,
                    },
                    Ok(SendMessage::Presence(msg)) => RoomEvent::PresenceChanged(msg.presence),
                    Ok(SendMessage::PresenceRemoved(msg)) => RoomEvent::PresenceRemoved {
                        client_id: msg.client_id,
                    },
                    Ok(SendMessage::Init(_)) | Ok(SendMessage::Pong(_)) => continue,
                    Err(e) => {
                        error!("Failed to parse relay frame for room {}: {}", room, e);
                        continue;
                    }
                };
                if inbound_tx.send(event).is_err() {
                    break;
                }
            }
            info!("Relay connection for room {} closed", room);
        });

        Ok(RoomLink {
            snapshot: init.snapshot,
            participants: init.participants,
            outbound,
            inbound,
        })
    }
}

impl RoomTransport for RelayTransport {
    fn join<'a>(&'a self, room_id: &'a str, client_id: u64) -> BoxFuture<'a, Result<RoomLink, CollabError>> {
        Box::pin(self.connect(room_id, client_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_url_strips_trailing_slash() {
        let transport = RelayTransport::new("ws://127.0.0.1:3000/");
        assert_eq!(
            transport.room_url("algo-101", 42),
            "ws://127.0.0.1:3000/ws/algo-101?client_id=42"
        );
    }

    #[tokio::test]
    async fn unreachable_relay_is_a_transport_error() {
        let transport = RelayTransport::new("ws://127.0.0.1:1");
        let result = transport.join("room", 1).await;
        assert!(matches!(result, Err(CollabError::Transport(_))));
    }
}
