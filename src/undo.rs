use chrono::{DateTime, Utc};
use loro::{LoroDoc, UndoManager};
use std::collections::VecDeque;
use std::ops::Range;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::adapter::ViewChange;
use crate::error::CollabError;

const MAX_STEPS: usize = 100;
const HISTORY_LEN: usize = 64;
const CRDT_MAX_STEPS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOrigin {
    Local,
    Remote,
}

/// One edit as seen by the history, local or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoEntry {
    pub origin: EditOrigin,
    pub at: DateTime<Utc>,
    pub region: Range<usize>,
}

#[derive(Debug)]
struct Step {
    entry: UndoEntry,
    /// Number of native undo steps this grouped step spans
    crdt_steps: usize,
    last_edit: Instant,
}

/// Local-only undo/redo over a shared document.
///
/// Reversal is delegated to Loro's peer-scoped `UndoManager`, so undoing a
/// step never touches text inserted by other peers. This type decides how
/// native steps are grouped: consecutive local edits within `window` collapse
/// into one step. Regions are kept up to date as the document shifts under them.
pub struct UndoRedoManager {
    native: UndoManager,
    window: Duration,
    undo_stack: Vec<Step>,
    redo_stack: Vec<Step>,
    history: VecDeque<UndoEntry>,
    /// Set after undo/redo so the next edit opens a new step
    sealed: bool,
}

impl UndoRedoManager {
    pub fn new(doc: &LoroDoc, window: Duration) -> Self {
        let mut native = UndoManager::new(doc);
        native.set_merge_interval(0);
        native.set_max_undo_steps(CRDT_MAX_STEPS);
        Self {
            native,
            window,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            history: VecDeque::with_capacity(HISTORY_LEN),
            sealed: false,
        }
    }

    /// Record a committed local edit.
    pub fn record_local(&mut self, change: &ViewChange) {
        if change.is_noop() {
            return;
        }
        self.remap(change);
        self.redo_stack.clear();

        let now = Instant::now();
        let region = change.pos..change.pos + change.inserted;
        self.push_history(EditOrigin::Local, region.clone());

        let coalesce = !self.sealed
            && self
                .undo_stack
                .last()
                .map(|step| now.duration_since(step.last_edit) < self.window)
                .unwrap_or(false);
        self.sealed = false;

        if coalesce {
            if let Some(step) = self.undo_stack.last_mut() {
                step.crdt_steps += 1;
                step.last_edit = now;
                step.entry.region = step.entry.region.start.min(region.start)..step.entry.region.end.max(region.end);
                return;
            }
        }

        self.undo_stack.push(Step {
            entry: UndoEntry {
                origin: EditOrigin::Local,
                at: Utc::now(),
                region,
            },
            crdt_steps: 1,
            last_edit: now,
        });
        if self.undo_stack.len() > MAX_STEPS {
            self.undo_stack.remove(0);
        }
    }

    /// Track a merged remote edit. It never becomes an undo step.
    pub fn record_remote(&mut self, change: &ViewChange) {
        if change.is_noop() {
            return;
        }
        self.remap(change);
        self.push_history(EditOrigin::Remote, change.pos..change.pos + change.inserted);
        // Remote text typed right after ours must not merge into our step
        self.sealed = true;
    }

    /// Reverse the latest local step. Returns `false` when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool, CollabError> {
        let Some(mut step) = self.undo_stack.pop() else {
            return Ok(false);
        };
        let applied = replay(step.crdt_steps, || self.native.undo())?;
        if applied < step.crdt_steps {
            warn!("Undo applied {} of {} steps", applied, step.crdt_steps);
        }
        debug!("Undid step covering {:?}", step.entry.region);
        step.crdt_steps = applied;
        if applied > 0 {
            self.redo_stack.push(step);
        }
        self.sealed = true;
        Ok(applied > 0)
    }

    /// Re-apply the latest undone step.
    pub fn redo(&mut self) -> Result<bool, CollabError> {
        let Some(mut step) = self.redo_stack.pop() else {
            return Ok(false);
        };
        let applied = replay(step.crdt_steps, || self.native.redo())?;
        debug!("Redid step covering {:?}", step.entry.region);
        step.crdt_steps = applied;
        step.last_edit = Instant::now();
        if applied > 0 {
            self.undo_stack.push(step);
        }
        self.sealed = true;
        Ok(applied > 0)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Regions of the undoable steps, oldest first
    pub fn regions(&self) -> Vec<Range<usize>> {
        self.undo_stack.iter().map(|step| step.entry.region.clone()).collect()
    }

    /// Most recent edits of either origin, oldest first
    pub fn history(&self) -> impl Iterator<Item = &UndoEntry> {
        self.history.iter()
    }

    fn push_history(&mut self, origin: EditOrigin, region: Range<usize>) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(UndoEntry {
            origin,
            at: Utc::now(),
            region,
        });
    }

    fn remap(&mut self, change: &ViewChange) {
        for step in self.undo_stack.iter_mut().chain(self.redo_stack.iter_mut()) {
            step.entry.region = remap_region(&step.entry.region, change);
        }
    }
}

fn replay(steps: usize, mut f: impl FnMut() -> loro::LoroResult<bool>) -> Result<usize, CollabError> {
    let mut applied = 0;
    for _ in 0..steps {
        if !f()? {
            break;
        }
        applied += 1;
    }
    Ok(applied)
}

/// Shift `region` through `change`. Text removed out of the region collapses it.
fn remap_region(region: &Range<usize>, change: &ViewChange) -> Range<usize> {
    let removed_end = change.pos + change.removed;
    let shift = |p: usize| p - change.removed + change.inserted;
    let start = if region.start < change.pos {
        region.start
    } else if region.start >= removed_end {
        shift(region.start)
    } else {
        change.pos + change.inserted
    };
    let end = if region.end <= change.pos {
        region.end
    } else if region.end >= removed_end {
        shift(region.end)
    } else {
        change.pos
    };
    start..end.max(start)
}
