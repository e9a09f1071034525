use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::models::{
    InitMessage, PongMessage, PresenceMessage, PresenceRemovedMessage, ReceivedMessage, SendMessage, UpdateMessage,
};
use crate::session::new_client_id;
use crate::store::{ClientFrame, RoomEvent, RoomHub, RoomTransport};

type SharedSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

#[derive(Debug, Deserialize)]
pub struct JoinParams {
    pub client_id: Option<u64>,
}

/// WebSocket endpoint for one room
pub async fn websocket_handler(
    Path(room_id): Path<String>,
    Query(params): Query<JoinParams>,
    State(hub): State<RoomHub>,
    ws: WebSocketUpgrade,
) -> Response {
    let client_id = params.client_id.unwrap_or_else(new_client_id);
    info!("New WebSocket connection attempt for room {} from client {}", room_id, client_id);
    ws.on_upgrade(move |socket| handle_socket(socket, room_id, client_id, hub))
}

async fn send(sink: &SharedSink, msg: &SendMessage) -> bool {
    let text = match serde_json::to_string(msg) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode frame: {}", e);
            return true;
        }
    };
    sink.lock().await.send(Message::Text(text)).await.is_ok()
}

/// Bridge one socket to the room hub
async fn handle_socket(socket: WebSocket, room_id: String, client_id: u64, hub: RoomHub) {
    let mut link = match hub.join(&room_id, client_id).await {
        Ok(link) => link,
        Err(e) => {
            error!("Client {} could not join room {}: {}", client_id, room_id, e);
            return;
        }
    };

    let (sender, mut receiver) = socket.split();
    let sender1: SharedSink = Arc::new(Mutex::new(sender));
    let sender2 = sender1.clone();

    let init = SendMessage::Init(InitMessage {
        snapshot: std::mem::take(&mut link.snapshot),
        participants: std::mem::take(&mut link.participants),
    });
    if !send(&sender1, &init).await {
        warn!("Client {} went away before init", client_id);
        let _ = link.outbound.send(ClientFrame::Leave);
        return;
    }
    info!("WebSocket connection established for room {} with client {}", room_id, client_id);

    let outbound = link.outbound;
    let mut inbound = link.inbound;
    let room = room_id.clone();

    // Client frames into the room
    let mut send_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let frame = match serde_json::from_str::<ReceivedMessage>(&text) {
                Ok(ReceivedMessage::Update(update)) => ClientFrame::Update(update.delta),
                Ok(ReceivedMessage::Presence(msg)) => ClientFrame::Presence(msg.presence),
                Ok(ReceivedMessage::Leave) => ClientFrame::Leave,
                Ok(ReceivedMessage::Ping(ping)) => {
                    debug!("Ping from {} in room {}", ping.peer, room);
                    let pong = SendMessage::Pong(PongMessage {
                        date: Utc::now().to_rfc3339(),
                    });
                    if !send(&sender1, &pong).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!("Failed to parse message for room {}: {}", room, e);
                    continue;
                }
            };
            let leaving = matches!(frame, ClientFrame::Leave);
            if outbound.send(frame).is_err() || leaving {
                break;
            }
        }
    });

    // Room events out to the client
    let mut recv_task = tokio::spawn(async move {
        while let Some(event) = inbound.recv().await {
            let msg = match event {
                RoomEvent::Update { from, delta } => SendMessage::Update(UpdateMessage { delta, peer: from }),
                RoomEvent::PresenceChanged(presence) => SendMessage::Presence(PresenceMessage { presence }),
                RoomEvent::PresenceRemoved { client_id } => {
                    SendMessage::PresenceRemoved(PresenceRemovedMessage { client_id })
                }
                RoomEvent::Closed => break,
            };
            if !send(&sender2, &msg).await {
                break;
            }
        }
        let _ = sender2.lock().await.send(Message::Close(None)).await;
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };
    info!("WebSocket connection for client {} in room {} terminated", client_id, room_id);
}
