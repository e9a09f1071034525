use loro::{ExportMode, LoroDoc, LoroText, VersionVector};

use crate::error::CollabError;

/// Name of the text container shared by every editor in a room
pub const TEXT_CONTAINER: &str = "codemirror";

/// Client-side replica of a room's document.
///
/// Wraps a `LoroDoc` and remembers the version last handed to the transport so
/// every local commit can be turned into an incremental update.
pub struct SharedDocument {
    doc: LoroDoc,
    text: LoroText,
    sent_vv: VersionVector,
}

impl SharedDocument {
    pub fn new(peer_id: u64) -> Result<Self, CollabError> {
        let doc = LoroDoc::new();
        doc.set_peer_id(peer_id)?;
        let text = doc.get_text(TEXT_CONTAINER);
        let sent_vv = doc.oplog_vv();
        Ok(Self { doc, text, sent_vv })
    }

    pub fn content(&self) -> String {
        self.text.to_string()
    }

    /// Length in Unicode scalar values
    pub fn len(&self) -> usize {
        self.text.len_unicode()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove `removed` chars at `pos`, then insert `inserted` there, as a single commit
    pub fn splice(&mut self, pos: usize, removed: usize, inserted: &str) -> Result<(), CollabError> {
        let len = self.len();
        if pos.checked_add(removed).map_or(true, |end| end > len) {
            return Err(CollabError::OutOfBounds {
                pos: pos.saturating_add(removed),
                len,
            });
        }
        if removed > 0 {
            self.text.delete(pos, removed)?;
        }
        if !inserted.is_empty() {
            self.text.insert(pos, inserted)?;
        }
        self.doc.commit();
        Ok(())
    }

    pub fn commit(&self) {
        self.doc.commit();
    }

    /// Export everything committed locally since the last call.
    pub fn take_local_update(&mut self) -> Result<Option<Vec<u8>>, CollabError> {
        let current = self.doc.oplog_vv();
        if current == self.sent_vv {
            return Ok(None);
        }
        let bytes = self
            .doc
            .export(ExportMode::updates(&self.sent_vv))
            .map_err(|e| CollabError::Crdt(e.to_string()))?;
        self.sent_vv = current;
        Ok(Some(bytes))
    }

    /// Merge the room's snapshot on (re)connect and export the local ops the
    /// room does not have yet, if any.
    pub fn rejoin(&mut self, snapshot: &[u8]) -> Result<Option<Vec<u8>>, CollabError> {
        let room = LoroDoc::new();
        room.import(snapshot)?;
        let room_vv = room.oplog_vv();

        self.doc.import(snapshot)?;
        let current = self.doc.oplog_vv();
        let missing = if current == room_vv {
            None
        } else {
            let bytes = self
                .doc
                .export(ExportMode::updates(&room_vv))
                .map_err(|e| CollabError::Crdt(e.to_string()))?;
            Some(bytes)
        };
        self.sent_vv = current;
        Ok(missing)
    }

    /// Merge a remote update or snapshot.
    pub fn import(&mut self, bytes: &[u8]) -> Result<(), CollabError> {
        // Local ops not yet exported stay pending; otherwise the imported ops
        // must not be sent back out.
        let pending_local = self.doc.oplog_vv() != self.sent_vv;
        self.doc.import(bytes)?;
        if !pending_local {
            self.sent_vv = self.doc.oplog_vv();
        }
        Ok(())
    }

    pub fn export_snapshot(&self) -> Result<Vec<u8>, CollabError> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| CollabError::Crdt(e.to_string()))
    }

    pub fn loro(&self) -> &LoroDoc {
        &self.doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(peer: u64, base: &[u8]) -> SharedDocument {
        let mut doc = SharedDocument::new(peer).unwrap();
        doc.import(base).unwrap();
        doc
    }

    #[test]
    fn splice_commits_and_exports_once() {
        let mut doc = SharedDocument::new(1).unwrap();
        doc.splice(0, 0, "fn main() {}").unwrap();
        assert_eq!(doc.content(), "fn main() {}");
        assert!(doc.take_local_update().unwrap().is_some());
        assert!(doc.take_local_update().unwrap().is_none());

        doc.splice(3, 4, "run").unwrap();
        assert_eq!(doc.content(), "fn run() {}");
    }

    #[test]
    fn splice_out_of_bounds_is_rejected() {
        let mut doc = SharedDocument::new(1).unwrap();
        doc.splice(0, 0, "abc").unwrap();
        assert!(matches!(doc.splice(5, 0, "x"), Err(CollabError::OutOfBounds { .. })));
        assert!(matches!(doc.splice(2, 2, ""), Err(CollabError::OutOfBounds { .. })));
        assert!(matches!(
            doc.splice(1, usize::MAX, ""),
            Err(CollabError::OutOfBounds { pos: usize::MAX, len: 3 })
        ));
        assert_eq!(doc.content(), "abc");
    }

    #[test]
    fn rejoin_resends_what_a_fresh_room_lacks() {
        let mut alice = SharedDocument::new(1).unwrap();
        alice.splice(0, 0, "abc").unwrap();
        alice.take_local_update().unwrap().unwrap();

        // The room came back empty
        let empty_room = SharedDocument::new(9).unwrap().export_snapshot().unwrap();
        let missing = alice.rejoin(&empty_room).unwrap().expect("local ops to resend");
        assert!(alice.take_local_update().unwrap().is_none());

        let mut room = SharedDocument::new(9).unwrap();
        room.import(&missing).unwrap();
        assert_eq!(room.content(), "abc");

        alice.splice(3, 0, "d").unwrap();
        room.import(&alice.take_local_update().unwrap().unwrap()).unwrap();
        assert_eq!(room.content(), "abcd");
    }

    #[test]
    fn rejoin_sends_nothing_when_room_is_current() {
        let mut alice = SharedDocument::new(1).unwrap();
        alice.splice(0, 0, "abc").unwrap();
        let update = alice.take_local_update().unwrap().unwrap();

        let mut room = SharedDocument::new(9).unwrap();
        room.import(&update).unwrap();
        room.splice(3, 0, "!").unwrap();

        assert!(alice.rejoin(&room.export_snapshot().unwrap()).unwrap().is_none());
        assert_eq!(alice.content(), "abc!");
        assert!(alice.take_local_update().unwrap().is_none());
    }

    #[test]
    fn imported_ops_are_not_reexported() {
        let mut a = SharedDocument::new(1).unwrap();
        a.splice(0, 0, "int x;").unwrap();
        let update = a.take_local_update().unwrap().unwrap();

        let mut b = SharedDocument::new(2).unwrap();
        b.import(&update).unwrap();
        assert_eq!(b.content(), "int x;");
        assert!(b.take_local_update().unwrap().is_none());
    }

    #[test]
    fn concurrent_inserts_converge_in_either_delivery_order() {
        let mut origin = SharedDocument::new(1).unwrap();
        origin.splice(0, 0, "for (;;) {}").unwrap();
        let base = origin.export_snapshot().unwrap();

        let mut left = replica(2, &base);
        let mut right = replica(3, &base);
        left.splice(0, 0, "// loop\n").unwrap();
        right.splice(11, 0, " // end").unwrap();
        let from_left = left.take_local_update().unwrap().unwrap();
        let from_right = right.take_local_update().unwrap().unwrap();

        let mut first = replica(4, &base);
        first.import(&from_left).unwrap();
        first.import(&from_right).unwrap();

        let mut second = replica(5, &base);
        second.import(&from_right).unwrap();
        second.import(&from_left).unwrap();

        left.import(&from_right).unwrap();
        right.import(&from_left).unwrap();

        assert_eq!(first.content(), second.content());
        assert_eq!(first.content(), left.content());
        assert_eq!(first.content(), right.content());
        assert_eq!(first.content(), "// loop\nfor (;;) {} // end");
    }

    #[test]
    fn concurrent_inserts_at_same_position_converge() {
        let base = SharedDocument::new(1).unwrap().export_snapshot().unwrap();
        let mut a = replica(10, &base);
        let mut b = replica(11, &base);
        a.splice(0, 0, "aaa").unwrap();
        b.splice(0, 0, "bbb").unwrap();
        let ua = a.take_local_update().unwrap().unwrap();
        let ub = b.take_local_update().unwrap().unwrap();
        a.import(&ub).unwrap();
        b.import(&ua).unwrap();
        assert_eq!(a.content(), b.content());
        assert_eq!(a.len(), 6);
    }
}
