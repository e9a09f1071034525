use loro::{ExportMode, LoroDoc};
use moka::sync::Cache;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::error::CollabError;
use crate::models::ParticipantPresence;
use crate::store::transport::{ClientFrame, RoomEvent, RoomLink, RoomTransport};
use crate::BoxFuture;

const ROOM_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
struct RoomBroadcast {
    /// `None` for events raised by the hub itself
    sender_id: Option<u64>,
    event: RoomEvent,
}

struct Room {
    id: String,
    doc: LoroDoc,
    members: Mutex<HashSet<u64>>,
    participants: Mutex<BTreeMap<u64, ParticipantPresence>>,
    tx: broadcast::Sender<RoomBroadcast>,
}

impl Room {
    fn new(id: &str) -> Self {
        let (tx, _rx) = broadcast::channel(ROOM_CHANNEL_CAPACITY);
        Self {
            id: id.to_string(),
            doc: LoroDoc::new(),
            members: Mutex::new(HashSet::new()),
            participants: Mutex::new(BTreeMap::new()),
            tx,
        }
    }

    fn snapshot(&self) -> Result<Vec<u8>, CollabError> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| CollabError::Crdt(e.to_string()))
    }

    fn apply_update(&self, client_id: u64, delta: Vec<u8>) {
        if let Err(e) = self.doc.import(&delta) {
            warn!("Dropping malformed update from {} in room {}: {}", client_id, self.id, e);
            return;
        }
        let _ = self.tx.send(RoomBroadcast {
            sender_id: Some(client_id),
            event: RoomEvent::Update { from: client_id, delta },
        });
    }

    fn set_presence(&self, client_id: u64, mut presence: ParticipantPresence) {
        // One record per connection, keyed by the id the connection joined with
        presence.client_id = client_id;
        lock(&self.participants).insert(client_id, presence.clone());
        let _ = self.tx.send(RoomBroadcast {
            sender_id: Some(client_id),
            event: RoomEvent::PresenceChanged(presence),
        });
    }

    fn remove_presence(&self, client_id: u64) {
        if lock(&self.participants).remove(&client_id).is_some() {
            let _ = self.tx.send(RoomBroadcast {
                sender_id: Some(client_id),
                event: RoomEvent::PresenceRemoved { client_id },
            });
        }
    }
}

struct HubInner {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    retained: Cache<String, Vec<u8>>,
}

/// In-process replication substrate.
///
/// Keeps one merged document per live room and fans updates out to every
/// other member. Rooms nobody is in are kept as snapshots until they idle out.
#[derive(Clone)]
pub struct RoomHub {
    inner: Arc<HubInner>,
}

impl RoomHub {
    pub fn new(room_idle: Duration) -> Self {
        let retained = Cache::builder()
            .max_capacity(10_000)
            .time_to_idle(room_idle)
            .build();
        Self {
            inner: Arc::new(HubInner {
                rooms: Mutex::new(HashMap::new()),
                retained,
            }),
        }
    }

    /// Number of rooms with at least one member
    pub fn room_count(&self) -> usize {
        lock(&self.inner.rooms).len()
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.inner.rooms)
            .values()
            .map(|room| lock(&room.members).len())
            .sum()
    }

    pub fn participant_count(&self) -> usize {
        lock(&self.inner.rooms)
            .values()
            .map(|room| lock(&room.participants).len())
            .sum()
    }

    pub fn retained_count(&self) -> u64 {
        self.inner.retained.run_pending_tasks();
        self.inner.retained.entry_count()
    }

    /// Current merged content of a live or retained room
    pub fn room_content(&self, room_id: &str) -> Option<String> {
        let live = lock(&self.inner.rooms).get(room_id).cloned();
        if let Some(room) = live {
            return Some(room.doc.get_text(super::TEXT_CONTAINER).to_string());
        }
        let bytes = self.inner.retained.get(room_id)?;
        let doc = LoroDoc::new();
        doc.import(&bytes).ok()?;
        Some(doc.get_text(super::TEXT_CONTAINER).to_string())
    }

    /// Disconnect every member of a room
    pub fn close_room(&self, room_id: &str) -> bool {
        let room = lock(&self.inner.rooms).remove(room_id);
        match room {
            Some(room) => {
                info!("Closing room {}", room_id);
                self.retain(&room);
                let _ = room.tx.send(RoomBroadcast {
                    sender_id: None,
                    event: RoomEvent::Closed,
                });
                true
            }
            None => false,
        }
    }

    fn open_room(&self, room_id: &str, client_id: u64) -> Result<Arc<Room>, CollabError> {
        let mut rooms = lock(&self.inner.rooms);
        let room = match rooms.get(room_id) {
            Some(room) => room.clone(),
            None => {
                let room = Arc::new(Room::new(room_id));
                if let Some(bytes) = self.inner.retained.get(room_id) {
                    room.doc.import(&bytes)?;
                    debug!("Restored retained room {}", room_id);
                } else {
                    info!("Created room {}", room_id);
                }
                rooms.insert(room_id.to_string(), room.clone());
                room
            }
        };
        lock(&room.members).insert(client_id);
        Ok(room)
    }

    fn leave(&self, room: &Arc<Room>, client_id: u64) {
        room.remove_presence(client_id);

        let mut rooms = lock(&self.inner.rooms);
        let empty = {
            let mut members = lock(&room.members);
            members.remove(&client_id);
            members.is_empty()
        };
        debug!("Client {} left room {}", client_id, room.id);
        if !empty {
            return;
        }
        let is_current = rooms
            .get(&room.id)
            .map(|current| Arc::ptr_eq(current, room))
            .unwrap_or(false);
        if is_current {
            rooms.remove(&room.id);
            info!("Room {} is empty, retaining snapshot", room.id);
        }
        drop(rooms);
        self.retain(room);
    }

    fn retain(&self, room: &Room) {
        match room.snapshot() {
            Ok(bytes) => self.inner.retained.insert(room.id.clone(), bytes),
            Err(e) => error!("Failed to retain room {}: {}", room.id, e),
        }
    }

    fn connect(&self, room_id: &str, client_id: u64) -> Result<RoomLink, CollabError> {
        let room = self.open_room(room_id, client_id)?;

        // Subscribe before taking the snapshot so nothing falls in between
        let mut room_rx = room.tx.subscribe();
        let snapshot = match room.snapshot() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.leave(&room, client_id);
                return Err(e);
            }
        };
        let participants = lock(&room.participants)
            .values()
            .filter(|p| p.client_id != client_id)
            .cloned()
            .collect();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<RoomEvent>();

        let hub = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outbound_rx.recv() => match frame {
                        Some(ClientFrame::Update(delta)) => room.apply_update(client_id, delta),
                        Some(ClientFrame::Presence(presence)) => room.set_presence(client_id, presence),
                        Some(ClientFrame::Leave) | None => break,
                    },
                    msg = room_rx.recv() => match msg {
                        Ok(msg) => {
                            // Skip messages from this connection to prevent echo
                            if msg.sender_id == Some(client_id) {
                                continue;
                            }
                            let closed = matches!(msg.event, RoomEvent::Closed);
                            if inbound_tx.send(msg.event).is_err() || closed {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Client {} lagged {} messages in room {}, resending snapshot", client_id, n, room.id);
                            match room.snapshot() {
                                Ok(delta) => {
                                    if inbound_tx.send(RoomEvent::Update { from: 0, delta }).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    error!("Failed to snapshot room {}: {}", room.id, e);
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            hub.leave(&room, client_id);
        });

        info!("Client {} joined room {}", client_id, room_id);
        Ok(RoomLink {
            snapshot,
            participants,
            outbound,
            inbound,
        })
    }
}

impl RoomTransport for RoomHub {
    fn join<'a>(&'a self, room_id: &'a str, client_id: u64) -> BoxFuture<'a, Result<RoomLink, CollabError>> {
        Box::pin(async move { self.connect(room_id, client_id) })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
