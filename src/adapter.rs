use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CollabError;
use crate::session::{Session, SessionState};
use crate::store::SharedDocument;
use crate::undo::{UndoEntry, UndoRedoManager};
use crate::utils::{release_guard, Liveness, ReleaseGuard};

/// Something a document can be shown in.
///
/// `readiness()` reports whether the target is mounted. The adapter renders
/// into it after every change and calls `release()` exactly once on teardown.
pub trait ViewTarget: Send + Sync + 'static {
    fn readiness(&self) -> watch::Receiver<bool>;
    fn render(&self, content: &str);
    fn release(&self);
}

/// In-memory target for tools and tests
pub struct HeadlessTarget {
    mounted: watch::Sender<bool>,
    rendered: Mutex<String>,
    released: AtomicBool,
}

impl HeadlessTarget {
    pub fn new() -> Arc<Self> {
        let (mounted, _) = watch::channel(false);
        Arc::new(Self {
            mounted,
            rendered: Mutex::new(String::new()),
            released: AtomicBool::new(false),
        })
    }

    pub fn mounted() -> Arc<Self> {
        let target = Self::new();
        target.mount();
        target
    }

    pub fn mount(&self) {
        self.mounted.send_replace(true);
    }

    pub fn rendered(&self) -> String {
        lock(&self.rendered).clone()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl ViewTarget for HeadlessTarget {
    fn readiness(&self) -> watch::Receiver<bool> {
        self.mounted.subscribe()
    }

    fn render(&self, content: &str) {
        *lock(&self.rendered) = content.to_string();
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.mounted.send_replace(false);
    }
}

/// Latch over the two readiness signals; opens once, when both hold together
#[derive(Debug, Default)]
pub struct ReadyGate {
    mounted: bool,
    synced: bool,
    fired: bool,
}

impl ReadyGate {
    /// Returns true on the one update that opens the gate
    pub fn update(&mut self, mounted: bool, synced: bool) -> bool {
        self.mounted = mounted;
        self.synced = synced;
        if self.fired || !(self.mounted && self.synced) {
            return false;
        }
        self.fired = true;
        true
    }

    pub fn is_open(&self) -> bool {
        self.fired
    }
}

/// A contiguous replacement, in Unicode scalar values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewChange {
    pub pos: usize,
    pub removed: usize,
    pub inserted: usize,
}

impl ViewChange {
    pub fn new(pos: usize, removed: usize, inserted: usize) -> Self {
        Self { pos, removed, inserted }
    }

    pub fn is_noop(&self) -> bool {
        self.removed == 0 && self.inserted == 0
    }

    /// Where a caret at `p` ends up after this change
    pub fn map_position(&self, p: usize) -> usize {
        if p < self.pos {
            p
        } else if p >= self.pos + self.removed {
            p - self.removed + self.inserted
        } else {
            self.pos + self.inserted
        }
    }
}

/// Smallest single replacement turning `old` into `new`
pub fn diff(old: &str, new: &str) -> ViewChange {
    let old: Vec<char> = old.chars().collect();
    let new: Vec<char> = new.chars().collect();
    let prefix = old.iter().zip(new.iter()).take_while(|(a, b)| a == b).count();
    let max_suffix = old.len().min(new.len()) - prefix;
    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();
    ViewChange::new(prefix, old.len() - prefix - suffix, new.len() - prefix - suffix)
}

/// Local editable copy of the document text
#[derive(Debug, Clone, Default)]
pub struct EditorView {
    text: String,
    cursor: Option<usize>,
}

impl EditorView {
    pub fn new(text: String) -> Self {
        Self { text, cursor: None }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Replace the text, carrying the cursor through the change
    fn replace_text(&mut self, text: String, change: &ViewChange) {
        self.cursor = self.cursor.map(|c| change.map_position(c));
        self.text = text;
    }
}

/// A replacement as the caller saw the view
struct Edit {
    pos: usize,
    removed: usize,
    inserted: String,
}

struct Binding {
    session: Session,
    target: Arc<dyn ViewTarget>,
    view: Mutex<EditorView>,
    undo: Mutex<UndoRedoManager>,
    content_tx: watch::Sender<String>,
    cursor_tx: watch::Sender<Option<usize>>,
    attached: Liveness,
    guard: Mutex<Option<ReleaseGuard>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Binding {
    fn ensure_attached(&self) -> Result<(), CollabError> {
        if !self.attached.is_alive() || self.session.state() != SessionState::Synced {
            return Err(CollabError::Detached);
        }
        Ok(())
    }

    /// Bring the view up to the document, treating any gap as remote
    fn reconcile(&self, view: &mut EditorView, doc: &SharedDocument) -> Option<(String, ViewChange)> {
        let content = doc.content();
        if content == view.text {
            return None;
        }
        let change = diff(&view.text, &content);
        lock(&self.undo).record_remote(&change);
        view.replace_text(content.clone(), &change);
        Some((content, change))
    }

    fn sync_from_document(&self) {
        if !self.attached.is_alive() {
            return;
        }
        let synced = {
            let mut view = lock(&self.view);
            let doc = self.session.lock_document();
            self.reconcile(&mut view, &doc).map(|(content, _)| (content, view.cursor))
        };
        if let Some((content, cursor)) = synced {
            self.publish(content, cursor);
        }
    }

    /// Apply the edit `plan` derives from the view text.
    ///
    /// Positions refer to the view; remote text the view has not shown yet
    /// is reconciled first and the edit is moved along with it.
    fn apply(&self, plan: impl FnOnce(&str) -> Option<Edit>) -> Result<(), CollabError> {
        self.ensure_attached()?;
        let (content, cursor, delta) = {
            let mut view = lock(&self.view);
            let Some(edit) = plan(&view.text) else {
                return Ok(());
            };
            let view_len = view.text.chars().count();
            let end = match edit.pos.checked_add(edit.removed) {
                Some(end) if end <= view_len => end,
                _ => {
                    return Err(CollabError::OutOfBounds {
                        pos: edit.pos.saturating_add(edit.removed),
                        len: view_len,
                    })
                }
            };

            let mut doc = self.session.lock_document();
            let reconciled = self.reconcile(&mut view, &doc);
            let (start, end) = match &reconciled {
                Some((_, change)) => (change.map_position(edit.pos), change.map_position(end)),
                None => (edit.pos, end),
            };
            if let Err(e) = doc.splice(start, end - start, &edit.inserted) {
                drop(doc);
                let cursor = view.cursor;
                drop(view);
                if let Some((content, _)) = reconciled {
                    self.publish(content, cursor);
                }
                return Err(e);
            }
            let delta = doc.take_local_update()?;
            let content = doc.content();
            drop(doc);

            let change = ViewChange::new(start, end - start, edit.inserted.chars().count());
            lock(&self.undo).record_local(&change);
            view.replace_text(content.clone(), &change);
            view.cursor = Some(change.pos + change.inserted);
            (content, view.cursor, delta)
        };
        self.publish(content, cursor);
        self.submit(delta);
        Ok(())
    }

    fn splice(&self, pos: usize, removed: usize, inserted: &str) -> Result<(), CollabError> {
        self.apply(|_| {
            Some(Edit {
                pos,
                removed,
                inserted: inserted.to_string(),
            })
        })
    }

    fn set_content(&self, text: &str) -> Result<(), CollabError> {
        self.apply(|current| {
            let change = diff(current, text);
            if change.is_noop() {
                return None;
            }
            Some(Edit {
                pos: change.pos,
                removed: change.removed,
                inserted: text.chars().skip(change.pos).take(change.inserted).collect(),
            })
        })
    }

    fn history_step(&self, redo: bool) -> Result<bool, CollabError> {
        self.ensure_attached()?;
        let (content, cursor, delta) = {
            let mut view = lock(&self.view);
            let mut doc = self.session.lock_document();
            let reconciled = self.reconcile(&mut view, &doc);
            let applied = {
                let mut undo = lock(&self.undo);
                if redo {
                    undo.redo()?
                } else {
                    undo.undo()?
                }
            };
            if !applied {
                drop(doc);
                let cursor = view.cursor;
                drop(view);
                if let Some((content, _)) = reconciled {
                    self.publish(content, cursor);
                }
                return Ok(false);
            }
            let delta = doc.take_local_update()?;
            let content = doc.content();
            drop(doc);

            let change = diff(&view.text, &content);
            view.replace_text(content.clone(), &change);
            (content, view.cursor, delta)
        };
        self.publish(content, cursor);
        self.submit(delta);
        Ok(true)
    }

    fn publish(&self, content: String, cursor: Option<usize>) {
        self.target.render(&content);
        self.content_tx.send_replace(content);
        self.publish_cursor(cursor);
    }

    fn publish_cursor(&self, cursor: Option<usize>) {
        self.cursor_tx.send_if_modified(|current| {
            if *current == cursor {
                return false;
            }
            *current = cursor;
            true
        });
    }

    fn submit(&self, delta: Option<Vec<u8>>) {
        if let Some(delta) = delta {
            if let Err(e) = self.session.submit_update(delta) {
                debug!("Local update not sent: {}", e);
            }
        }
    }

    fn teardown(&self) {
        if !self.attached.kill() {
            return;
        }
        if let Some(guard) = lock(&self.guard).take() {
            guard.release();
        }
        info!("View detached from room {}", self.session.room_id());
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

/// Attaches view targets to sessions.
#[derive(Debug, Clone)]
pub struct DocumentAdapter {
    undo_window: Duration,
}

impl DocumentAdapter {
    pub fn new(undo_window: Duration) -> Self {
        Self { undo_window }
    }

    /// Bind `target` to the session's document once the target is mounted
    /// and the session is synced.
    pub async fn attach(&self, target: Arc<dyn ViewTarget>, session: &Session) -> Result<DocumentHandle, CollabError> {
        let mut mounted = target.readiness();
        let mut state = session.watch_state();
        let mut gate = ReadyGate::default();

        loop {
            let is_mounted = *mounted.borrow_and_update();
            let is_synced = *state.borrow_and_update() == SessionState::Synced;
            if gate.update(is_mounted, is_synced) {
                break;
            }
            debug!("Attach to room {} deferred (mounted: {}, synced: {})", session.room_id(), is_mounted, is_synced);
            tokio::select! {
                changed = mounted.changed() => changed.map_err(|_| CollabError::Detached)?,
                changed = state.changed() => changed.map_err(|_| CollabError::Disconnected)?,
            }
        }

        // Subscribe before reading so no remote change slips in between
        let doc_events = session.subscribe_doc();
        let (content, undo) = {
            let doc = session.lock_document();
            (doc.content(), UndoRedoManager::new(doc.loro(), self.undo_window))
        };
        target.render(&content);

        let release_target = target.clone();
        let guard = release_guard(move || release_target.release());
        let (content_tx, _) = watch::channel(content.clone());
        let (cursor_tx, _) = watch::channel(None);

        let binding = Arc::new(Binding {
            session: session.clone(),
            target,
            view: Mutex::new(EditorView::new(content)),
            undo: Mutex::new(undo),
            content_tx,
            cursor_tx,
            attached: Liveness::new(),
            guard: Mutex::new(Some(guard)),
            task: Mutex::new(None),
        });

        let task = tokio::spawn(follow_session(Arc::downgrade(&binding), doc_events, state));
        *lock(&binding.task) = Some(task);

        info!("View attached to room {}", session.room_id());
        Ok(DocumentHandle { binding })
    }

    pub fn detach(&self, handle: DocumentHandle) {
        handle.detach();
    }
}

async fn follow_session(
    binding: Weak<Binding>,
    mut doc_events: broadcast::Receiver<crate::session::DocEvent>,
    mut state: watch::Receiver<SessionState>,
) {
    loop {
        tokio::select! {
            event = doc_events.recv() => match event {
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("View lagged {} document events", n),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = state.changed() => {
                if changed.is_err() || *state.borrow_and_update() != SessionState::Synced {
                    break;
                }
                continue;
            }
        }
        match binding.upgrade() {
            Some(binding) => binding.sync_from_document(),
            None => return,
        }
    }
    if let Some(binding) = binding.upgrade() {
        binding.teardown();
    }
}

/// A live binding between a view and a session's document.
///
/// Dropping the handle releases the view as well.
pub struct DocumentHandle {
    binding: Arc<Binding>,
}

impl DocumentHandle {
    pub fn insert(&self, pos: usize, text: &str) -> Result<(), CollabError> {
        self.binding.splice(pos, 0, text)
    }

    pub fn delete(&self, pos: usize, len: usize) -> Result<(), CollabError> {
        self.binding.splice(pos, len, "")
    }

    pub fn replace(&self, pos: usize, len: usize, text: &str) -> Result<(), CollabError> {
        self.binding.splice(pos, len, text)
    }

    /// Replace the whole text with the smallest equivalent edit
    pub fn set_content(&self, text: &str) -> Result<(), CollabError> {
        self.binding.set_content(text)
    }

    pub fn set_cursor(&self, pos: usize) -> Result<(), CollabError> {
        self.binding.ensure_attached()?;
        let cursor = {
            let mut view = lock(&self.binding.view);
            view.cursor = Some(pos.min(view.text.chars().count()));
            view.cursor
        };
        self.binding.publish_cursor(cursor);
        Ok(())
    }

    pub fn cursor(&self) -> Option<usize> {
        lock(&self.binding.view).cursor
    }

    /// Every caret move, whether set directly, typed or shifted by remote text
    pub fn subscribe_cursor(&self) -> watch::Receiver<Option<usize>> {
        self.binding.cursor_tx.subscribe()
    }

    pub fn undo(&self) -> Result<bool, CollabError> {
        self.binding.history_step(false)
    }

    pub fn redo(&self) -> Result<bool, CollabError> {
        self.binding.history_step(true)
    }

    pub fn can_undo(&self) -> bool {
        lock(&self.binding.undo).can_undo()
    }

    pub fn can_redo(&self) -> bool {
        lock(&self.binding.undo).can_redo()
    }

    /// Text ranges the undoable steps would touch, oldest first
    pub fn undo_regions(&self) -> Vec<Range<usize>> {
        lock(&self.binding.undo).regions()
    }

    pub fn edit_history(&self) -> Vec<UndoEntry> {
        lock(&self.binding.undo).history().cloned().collect()
    }

    pub fn content(&self) -> String {
        lock(&self.binding.view).text.clone()
    }

    /// Every content change, local or remote
    pub fn subscribe_content(&self) -> watch::Receiver<String> {
        self.binding.content_tx.subscribe()
    }

    pub fn is_attached(&self) -> bool {
        self.binding.attached.is_alive()
    }

    pub fn detach(&self) {
        if let Some(task) = lock(&self.binding.task).take() {
            task.abort();
        }
        self.binding.teardown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
