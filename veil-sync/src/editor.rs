//! Boundary to the rich-text editor widget.
//!
//! The session pushes whole-document deltas into the editor after every
//! inbound batch and receives the user's edits back through
//! `DocumentSession::on_editor_change`. Only edits tagged `Origin::User`
//! enter the pipeline: the editor reports its own re-renders as `Api` so
//! they never loop back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use veil_core::delta::plain_text;
use veil_core::DeltaOp;

/// Who caused a change in the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    User,
    Api,
}

/// Selected range in UTF-16 code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub index: u32,
    pub length: u32,
}

pub trait Editor: Send + Sync {
    /// Replace the displayed document.
    fn set_contents(&self, delta: Vec<DeltaOp>, origin: Origin);

    fn selection(&self) -> Option<Selection>;

    fn set_selection(&self, selection: Selection, origin: Origin);
}

#[derive(Default)]
struct Buffer {
    contents: Vec<DeltaOp>,
    selection: Option<Selection>,
}

/// Headless editor keeping the last rendered document in memory.
#[derive(Default)]
pub struct BufferEditor {
    buffer: Mutex<Buffer>,
    renders: AtomicUsize,
}

impl BufferEditor {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn contents(&self) -> Vec<DeltaOp> {
        self.buffer().contents.clone()
    }

    pub fn text(&self) -> String {
        plain_text(&self.buffer().contents)
    }

    /// Number of `set_contents` calls so far.
    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    /// Place the cursor as a user would.
    pub fn select(&self, selection: Option<Selection>) {
        self.buffer().selection = selection;
    }
}

impl Editor for BufferEditor {
    fn set_contents(&self, delta: Vec<DeltaOp>, _origin: Origin) {
        let mut buffer = self.buffer();
        buffer.contents = delta;
        // Replacing the document resets the cursor, as a real widget does.
        buffer.selection = None;
        self.renders.fetch_add(1, Ordering::SeqCst);
    }

    fn selection(&self) -> Option<Selection> {
        self.buffer().selection
    }

    fn set_selection(&self, selection: Selection, _origin: Origin) {
        self.buffer().selection = Some(selection);
    }
}
