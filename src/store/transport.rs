use tokio::sync::mpsc;

use crate::error::CollabError;
use crate::models::ParticipantPresence;
use crate::BoxFuture;

/// Frames a client pushes into its room
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Update(Vec<u8>),
    Presence(ParticipantPresence),
    Leave,
}

/// Events a room delivers to one client. Never echoes the client's own frames.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    Update { from: u64, delta: Vec<u8> },
    PresenceChanged(ParticipantPresence),
    PresenceRemoved { client_id: u64 },
    Closed,
}

/// A joined room. Dropping `outbound` (or sending `Leave`) leaves the room;
/// `inbound` closing means the substrate dropped the connection.
pub struct RoomLink {
    pub snapshot: Vec<u8>,
    pub participants: Vec<ParticipantPresence>,
    pub outbound: mpsc::UnboundedSender<ClientFrame>,
    pub inbound: mpsc::UnboundedReceiver<RoomEvent>,
}

/// Replication substrate keyed by room id
pub trait RoomTransport: Send + Sync {
    fn join<'a>(&'a self, room_id: &'a str, client_id: u64) -> BoxFuture<'a, Result<RoomLink, CollabError>>;
}
