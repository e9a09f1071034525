use futures_util::stream::{self, BoxStream};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::CollabError;
use crate::models::{Identity, ParticipantPresence};
use crate::session::Session;

/// `color` at 50% opacity: `#rrggbb` -> `#rrggbb80`. Short `#rgb` is expanded
/// first; anything else is returned unchanged.
pub fn derive_light_color(color: &str) -> String {
    let Some(hex) = color.strip_prefix('#') else {
        return color.to_string();
    };
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return color.to_string();
    }
    match hex.len() {
        6 => format!("#{}80", hex),
        3 => {
            let expanded: String = hex.chars().flat_map(|c| [c, c]).collect();
            format!("#{}80", expanded)
        }
        _ => color.to_string(),
    }
}

/// Publishes the local participant and follows everyone else in the room.
#[derive(Clone)]
pub struct PresenceBroadcaster {
    session: Session,
}

impl PresenceBroadcaster {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Announce the local identity. `colorLight` is derived here, once.
    pub fn publish_local(&self, identity: &Identity) -> Result<ParticipantPresence, CollabError> {
        let presence = ParticipantPresence {
            client_id: self.session.client_id(),
            display_name: identity.name.clone(),
            color: identity.color.clone(),
            color_light: derive_light_color(&identity.color),
            cursor_position: self.local().and_then(|p| p.cursor_position),
        };
        debug!("Publishing presence for {} in room {}", identity.name, self.session.room_id());
        self.session.publish_presence(presence.clone())?;
        Ok(presence)
    }

    /// Republish the local record with a new cursor position
    pub fn set_cursor(&self, position: Option<usize>) -> Result<(), CollabError> {
        self.session
            .update_local_presence(|presence| presence.cursor_position = position)
    }

    pub fn local(&self) -> Option<ParticipantPresence> {
        self.session.local_presence()
    }

    pub fn participants(&self) -> Vec<ParticipantPresence> {
        self.session.participants()
    }

    /// Remote participant lists, starting with the current one and then one
    /// per roster change. Each call starts an independent subscription.
    pub fn subscribe_remote(&self) -> BoxStream<'static, Vec<ParticipantPresence>> {
        let events = self.session.subscribe_presence();
        let session = self.session.clone();
        Box::pin(stream::unfold(
            (session, events, true),
            |(session, mut events, first)| async move {
                if first {
                    let roster = session.participants();
                    return Some((roster, (session, events, false)));
                }
                loop {
                    match events.recv().await {
                        Ok(_) => break,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Presence subscriber lagged {} events", n);
                            break;
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
                let roster = session.participants();
                Some((roster, (session, events, false)))
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RoomHub;
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio::time::timeout;

    fn identity(name: &str, color: &str) -> Identity {
        Identity {
            name: name.to_string(),
            color: color.to_string(),
        }
    }

    #[test]
    fn light_color_is_half_opacity() {
        assert_eq!(derive_light_color("#30bced"), "#30bced80");
        assert_eq!(derive_light_color("#abc"), "#aabbcc80");
        assert_eq!(derive_light_color("rebeccapurple"), "rebeccapurple");
        assert_eq!(derive_light_color("#zzzzzz"), "#zzzzzz");
    }

    #[tokio::test]
    async fn remote_roster_follows_join_cursor_and_leave() {
        let hub = RoomHub::new(Duration::from_secs(60));
        let alice = Session::enter(&hub, "room", 1).await.unwrap();
        let bob = Session::enter(&hub, "room", 2).await.unwrap();
        let alice_presence = PresenceBroadcaster::new(alice.clone());
        let bob_presence = PresenceBroadcaster::new(bob.clone());

        let mut remote = bob_presence.subscribe_remote();
        let initial = timeout(Duration::from_secs(2), remote.next()).await.unwrap().unwrap();
        assert!(initial.is_empty());

        let published = alice_presence.publish_local(&identity("Alice", "#ee6352")).unwrap();
        assert_eq!(published.color_light, "#ee635280");
        let roster = timeout(Duration::from_secs(2), remote.next()).await.unwrap().unwrap();
        assert_eq!(roster, vec![published.clone()]);

        alice_presence.set_cursor(Some(4)).unwrap();
        let roster = timeout(Duration::from_secs(2), remote.next()).await.unwrap().unwrap();
        assert_eq!(roster[0].cursor_position, Some(4));

        alice.leave();
        let roster = timeout(Duration::from_secs(2), remote.next()).await.unwrap().unwrap();
        assert!(roster.is_empty());
    }

    #[tokio::test]
    async fn each_subscription_starts_from_current_roster() {
        let hub = RoomHub::new(Duration::from_secs(60));
        let alice = Session::enter(&hub, "room", 1).await.unwrap();
        let bob = Session::enter(&hub, "room", 2).await.unwrap();
        let alice_presence = PresenceBroadcaster::new(alice.clone());
        alice_presence.publish_local(&identity("Alice", "#abc")).unwrap();

        let bob_presence = PresenceBroadcaster::new(bob);
        let mut first = bob_presence.subscribe_remote();
        let _ = first.next().await;
        timeout(Duration::from_secs(2), first.next()).await.unwrap().unwrap();

        let mut second = bob_presence.subscribe_remote();
        let roster = second.next().await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].display_name, "Alice");
        assert_eq!(alice.state(), crate::session::SessionState::Synced);
    }

    #[tokio::test]
    async fn cursor_before_publish_is_ignored() {
        let hub = RoomHub::new(Duration::from_secs(60));
        let session = Session::enter(&hub, "room", 1).await.unwrap();
        let presence = PresenceBroadcaster::new(session);
        presence.set_cursor(Some(3)).unwrap();
        assert!(presence.local().is_none());
    }
}
