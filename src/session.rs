use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CollabError;
use crate::models::ParticipantPresence;
use crate::store::{ClientFrame, RoomEvent, RoomTransport, SharedDocument};

const EVENT_CAPACITY: usize = 256;

/// Connection lifecycle of a session.
///
/// `Disconnected -> Connecting -> Synced -> Disconnected`; the document may
/// only be read or written while `Synced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Synced,
}

/// Emitted after the replica changed for a reason other than a local edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocEvent {
    /// A remote update from `from` was merged (0 when the substrate resent state)
    Remote { from: u64 },
    /// The room snapshot was merged on (re)connect
    Resynced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Changed(u64),
    Removed(u64),
    Cleared,
}

/// Random client id that also serves as the Loro peer id.
///
/// Kept within 53 bits so it survives a round trip through JSON numbers.
pub fn new_client_id() -> u64 {
    let (high, _) = uuid::Uuid::new_v4().as_u64_pair();
    (high & ((1 << 53) - 1)).max(1)
}

struct SessionInner {
    room_id: String,
    client_id: u64,
    document: Mutex<SharedDocument>,
    state_tx: watch::Sender<SessionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientFrame>>>,
    doc_events: broadcast::Sender<DocEvent>,
    presence_events: broadcast::Sender<PresenceEvent>,
    roster: Mutex<BTreeMap<u64, ParticipantPresence>>,
    local_presence: Mutex<Option<ParticipantPresence>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    epoch: AtomicU64,
}

impl SessionInner {
    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!("Session {} in room {}: {:?} -> {:?}", self.client_id, self.room_id, previous, state);
        }
    }

    fn send(&self, frame: ClientFrame) -> Result<(), CollabError> {
        let outbound = lock(&self.outbound);
        match outbound.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| CollabError::Disconnected),
            None => Err(CollabError::Disconnected),
        }
    }

    fn handle_event(&self, event: RoomEvent) -> bool {
        match event {
            RoomEvent::Update { from, delta } => {
                let merged = lock(&self.document).import(&delta);
                match merged {
                    Ok(()) => {
                        let _ = self.doc_events.send(DocEvent::Remote { from });
                    }
                    Err(e) => warn!("Failed to merge update from {} in room {}: {}", from, self.room_id, e),
                }
            }
            RoomEvent::PresenceChanged(presence) => {
                if presence.client_id != self.client_id {
                    let client_id = presence.client_id;
                    lock(&self.roster).insert(client_id, presence);
                    let _ = self.presence_events.send(PresenceEvent::Changed(client_id));
                }
            }
            RoomEvent::PresenceRemoved { client_id } => {
                if lock(&self.roster).remove(&client_id).is_some() {
                    let _ = self.presence_events.send(PresenceEvent::Removed(client_id));
                }
            }
            RoomEvent::Closed => return false,
        }
        true
    }

    fn teardown(&self) {
        *lock(&self.outbound) = None;
        lock(&self.roster).clear();
        let _ = self.presence_events.send(PresenceEvent::Cleared);
        self.set_state(SessionState::Disconnected);
    }
}

/// One client's membership in a shared editing room.
///
/// Owns the room's document replica and presence roster. Cloning yields
/// another handle to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(room_id: &str, client_id: u64) -> Result<Self, CollabError> {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (doc_events, _) = broadcast::channel(EVENT_CAPACITY);
        let (presence_events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(SessionInner {
                room_id: room_id.to_string(),
                client_id,
                document: Mutex::new(SharedDocument::new(client_id)?),
                state_tx,
                outbound: Mutex::new(None),
                doc_events,
                presence_events,
                roster: Mutex::new(BTreeMap::new()),
                local_presence: Mutex::new(None),
                pump: Mutex::new(None),
                epoch: AtomicU64::new(0),
            }),
        })
    }

    /// Create a session and connect it in one step
    pub async fn enter(transport: &dyn RoomTransport, room_id: &str, client_id: u64) -> Result<Self, CollabError> {
        let session = Self::new(room_id, client_id)?;
        session.connect(transport).await?;
        Ok(session)
    }

    pub fn room_id(&self) -> &str {
        &self.inner.room_id
    }

    pub fn client_id(&self) -> u64 {
        self.inner.client_id
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe_doc(&self) -> broadcast::Receiver<DocEvent> {
        self.inner.doc_events.subscribe()
    }

    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceEvent> {
        self.inner.presence_events.subscribe()
    }

    /// Join the room through `transport` and merge its snapshot.
    ///
    /// A no-op unless the session is `Disconnected`.
    pub async fn connect(&self, transport: &dyn RoomTransport) -> Result<(), CollabError> {
        if self.state() != SessionState::Disconnected {
            debug!("Session {} already {:?}", self.inner.client_id, self.state());
            return Ok(());
        }
        self.inner.set_state(SessionState::Connecting);

        let link = match transport.join(&self.inner.room_id, self.inner.client_id).await {
            Ok(link) => link,
            Err(e) => {
                warn!("Failed to join room {}: {}", self.inner.room_id, e);
                self.inner.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };

        let merged = lock(&self.inner.document).rejoin(&link.snapshot);
        let missing = match merged {
            Ok(missing) => missing,
            Err(e) => {
                warn!("Failed to merge snapshot of room {}: {}", self.inner.room_id, e);
                let _ = link.outbound.send(ClientFrame::Leave);
                self.inner.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };
        // The room may have lost state while we were away
        if let Some(delta) = missing {
            info!("Sending room {} {} bytes of local history it lacks", self.inner.room_id, delta.len());
            let _ = link.outbound.send(ClientFrame::Update(delta));
        }

        {
            let mut roster = lock(&self.inner.roster);
            roster.clear();
            for presence in link.participants {
                if presence.client_id != self.inner.client_id {
                    roster.insert(presence.client_id, presence);
                }
            }
        }

        // Re-announce ourselves after a reconnect
        if let Some(presence) = lock(&self.inner.local_presence).clone() {
            let _ = link.outbound.send(ClientFrame::Presence(presence));
        }
        *lock(&self.inner.outbound) = Some(link.outbound);

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let pump = tokio::spawn(pump_events(Arc::downgrade(&self.inner), link.inbound, epoch));
        if let Some(previous) = lock(&self.inner.pump).replace(pump) {
            previous.abort();
        }

        self.inner.set_state(SessionState::Synced);
        let _ = self.inner.doc_events.send(DocEvent::Resynced);
        let _ = self.inner.presence_events.send(PresenceEvent::Cleared);
        Ok(())
    }

    /// Leave the room. Dependents observe the `Disconnected` transition.
    pub fn leave(&self) {
        if let Err(e) = self.inner.send(ClientFrame::Leave) {
            debug!("Leave for session {} not delivered: {}", self.inner.client_id, e);
        }
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(pump) = lock(&self.inner.pump).take() {
            pump.abort();
        }
        self.inner.teardown();
    }

    /// Current document text; only available while synced
    pub fn content(&self) -> Result<String, CollabError> {
        if self.state() != SessionState::Synced {
            return Err(CollabError::NotSynced);
        }
        Ok(lock(&self.inner.document).content())
    }

    pub(crate) fn lock_document(&self) -> MutexGuard<'_, SharedDocument> {
        lock(&self.inner.document)
    }

    /// Hand a local update to the substrate
    pub fn submit_update(&self, delta: Vec<u8>) -> Result<(), CollabError> {
        self.inner.send(ClientFrame::Update(delta))
    }

    /// Publish (or replace) this client's presence record
    pub fn publish_presence(&self, mut presence: ParticipantPresence) -> Result<(), CollabError> {
        presence.client_id = self.inner.client_id;
        *lock(&self.inner.local_presence) = Some(presence.clone());
        self.inner.send(ClientFrame::Presence(presence))
    }

    /// Apply `f` to the local presence record and republish it
    pub fn update_local_presence(&self, f: impl FnOnce(&mut ParticipantPresence)) -> Result<(), CollabError> {
        let updated = {
            let mut local = lock(&self.inner.local_presence);
            match local.as_mut() {
                Some(presence) => {
                    f(presence);
                    presence.clone()
                }
                None => return Ok(()),
            }
        };
        self.inner.send(ClientFrame::Presence(updated))
    }

    pub fn local_presence(&self) -> Option<ParticipantPresence> {
        lock(&self.inner.local_presence).clone()
    }

    /// Remote participants, ordered by client id
    pub fn participants(&self) -> Vec<ParticipantPresence> {
        lock(&self.inner.roster).values().cloned().collect()
    }
}

async fn pump_events(session: Weak<SessionInner>, mut inbound: mpsc::UnboundedReceiver<RoomEvent>, epoch: u64) {
    while let Some(event) = inbound.recv().await {
        let Some(inner) = session.upgrade() else { return };
        if inner.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        if !inner.handle_event(event) {
            break;
        }
    }
    if let Some(inner) = session.upgrade() {
        if inner.epoch.load(Ordering::SeqCst) == epoch {
            info!("Room {} connection lost", inner.room_id);
            inner.teardown();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RoomHub;
    use std::time::Duration;
    use tokio::time::timeout;

    fn hub() -> RoomHub {
        RoomHub::new(Duration::from_secs(60))
    }

    fn presence(name: &str) -> ParticipantPresence {
        ParticipantPresence {
            client_id: 0,
            display_name: name.to_string(),
            color: "#ee6352".to_string(),
            color_light: "#ee635280".to_string(),
            cursor_position: None,
        }
    }

    #[tokio::test]
    async fn connect_walks_through_connecting_to_synced() {
        let hub = hub();
        let session = Session::new("room", 1).unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(session.content(), Err(CollabError::NotSynced)));

        let mut states = session.watch_state();
        session.connect(&hub).await.unwrap();
        assert_eq!(session.state(), SessionState::Synced);
        assert!(states.has_changed().unwrap());
        assert_eq!(session.content().unwrap(), "");
    }

    #[tokio::test]
    async fn remote_update_is_merged_and_announced() {
        let hub = hub();
        let alice = Session::enter(&hub, "room", 1).await.unwrap();
        let bob = Session::enter(&hub, "room", 2).await.unwrap();
        let mut events = bob.subscribe_doc();

        let delta = {
            let mut doc = alice.lock_document();
            doc.splice(0, 0, "print(1)").unwrap();
            doc.take_local_update().unwrap().unwrap()
        };
        alice.submit_update(delta).unwrap();

        let event = timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
        assert_eq!(event, DocEvent::Remote { from: 1 });
        assert_eq!(bob.content().unwrap(), "print(1)");
    }

    #[tokio::test]
    async fn room_closure_moves_session_to_disconnected() {
        let hub = hub();
        let session = Session::enter(&hub, "room", 1).await.unwrap();
        let mut states = session.watch_state();
        hub.close_room("room");

        timeout(Duration::from_secs(2), states.wait_for(|s| *s == SessionState::Disconnected))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(session.submit_update(vec![1]), Err(CollabError::Disconnected)));
    }

    #[tokio::test]
    async fn reconnect_merges_and_reannounces_presence() {
        let hub = hub();
        let alice = Session::enter(&hub, "room", 1).await.unwrap();
        alice.publish_presence(presence("Alice")).unwrap();
        alice.leave();
        assert_eq!(alice.state(), SessionState::Disconnected);
        // Let the hub drop the old connection
        tokio::time::sleep(Duration::from_millis(50)).await;

        let bob = Session::enter(&hub, "room", 2).await.unwrap();
        let mut bob_presence = bob.subscribe_presence();
        alice.connect(&hub).await.unwrap();

        let event = timeout(Duration::from_secs(2), bob_presence.recv()).await.unwrap().unwrap();
        assert_eq!(event, PresenceEvent::Changed(1));
        let roster = bob.participants();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].display_name, "Alice");
    }

    #[tokio::test]
    async fn reconnect_to_an_empty_room_restores_local_history() {
        let first = hub();
        let alice = Session::enter(&first, "room", 1).await.unwrap();
        let delta = {
            let mut doc = alice.lock_document();
            doc.splice(0, 0, "abc").unwrap();
            doc.take_local_update().unwrap().unwrap()
        };
        alice.submit_update(delta).unwrap();
        alice.leave();

        // A different substrate that never saw "abc"
        let second = hub();
        alice.connect(&second).await.unwrap();
        let delta = {
            let mut doc = alice.lock_document();
            doc.splice(3, 0, "d").unwrap();
            doc.take_local_update().unwrap().unwrap()
        };
        alice.submit_update(delta).unwrap();

        timeout(Duration::from_secs(2), async {
            while second.room_content("room").as_deref() != Some("abcd") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let bob = Session::enter(&second, "room", 2).await.unwrap();
        assert_eq!(bob.content().unwrap(), "abcd");
        assert_eq!(alice.content().unwrap(), "abcd");
    }

    #[tokio::test]
    async fn leave_clears_roster_and_notifies_peers() {
        let hub = hub();
        let alice = Session::enter(&hub, "room", 1).await.unwrap();
        let bob = Session::enter(&hub, "room", 2).await.unwrap();
        let mut bob_presence = bob.subscribe_presence();

        alice.publish_presence(presence("Alice")).unwrap();
        let changed = timeout(Duration::from_secs(2), bob_presence.recv()).await.unwrap().unwrap();
        assert_eq!(changed, PresenceEvent::Changed(1));

        alice.leave();
        let removed = timeout(Duration::from_secs(2), bob_presence.recv()).await.unwrap().unwrap();
        assert_eq!(removed, PresenceEvent::Removed(1));
        assert!(bob.participants().is_empty());
        assert!(alice.participants().is_empty());
    }

    #[test]
    fn client_ids_fit_in_json_numbers() {
        for _ in 0..100 {
            let id = new_client_id();
            assert!(id > 0);
            assert!(id < (1 << 53));
        }
    }
}
