//! Document wrapper over [`Text`]: readers take immutable snapshots
//! lock-free, writers buffer edits that are applied in batches.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;

use crate::Text;

/// Auto-flush pending edits after this many operations.
const FLUSH_THRESHOLD: usize = 16;

/// The document: readers get immutable snapshots, writers buffer edits.
///
/// Reading never blocks and never observes a half-applied batch; every
/// snapshot is a plain [`Text`] value that stays valid for as long as the
/// caller holds it, no matter how far the document moves on.
pub struct Doc {
    /// Current snapshot for readers.
    snapshot: ArcSwap<Text>,
    /// Buffered edits waiting to be applied.
    pending: SegQueue<Edit>,
    /// Approximate count of pending edits for auto-flush.
    pending_count: AtomicUsize,
    /// Monotonic version counter.
    version: AtomicU64,
    /// Serializes flushes so concurrent writers cannot drop edits.
    write: Mutex<()>,
}

/// Edit operations.
#[derive(Clone, Debug)]
pub enum Edit {
    Insert { at: usize, text: Text },
    Remove { range: Range<usize> },
    Replace { range: Range<usize>, text: Text },
}

impl Doc {
    pub fn new() -> Self {
        Self::with_text(Text::new())
    }

    pub fn from_str(text: &str) -> Self {
        Self::with_text(Text::from_str(text))
    }

    pub fn with_text(text: Text) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(text),
            pending: SegQueue::new(),
            pending_count: AtomicUsize::new(0),
            version: AtomicU64::new(0),
            write: Mutex::new(()),
        }
    }

    /// Current immutable snapshot (lock-free).
    pub fn read(&self) -> Arc<Text> {
        self.snapshot.load_full()
    }

    /// Buffer an edit, flushing once enough have accumulated.
    pub fn edit(&self, edit: Edit) {
        self.pending.push(edit);
        let count = self.pending_count.fetch_add(1, Ordering::Relaxed) + 1;

        if count >= FLUSH_THRESHOLD {
            self.flush();
        }
    }

    /// Apply all pending edits and publish a new snapshot.
    ///
    /// Out-of-range edits are dropped; positions refer to the text as it
    /// stands when the edit's turn comes, not the snapshot the writer saw.
    pub fn flush(&self) {
        let _guard = self.write.lock();

        let mut edits = Vec::new();
        while let Some(edit) = self.pending.pop() {
            edits.push(edit);
        }

        if edits.is_empty() {
            return;
        }

        self.pending_count.store(0, Ordering::Relaxed);

        let current = self.snapshot.load_full();
        let mut text = Text::clone(&current);
        for edit in &edits {
            match Self::apply(&text, edit) {
                Ok(next) => text = next,
                Err(_) => debug_assert!(false, "out-of-range edit dropped: {:?}", edit),
            }
        }

        self.version.fetch_add(1, Ordering::Relaxed);
        self.snapshot.store(Arc::new(text));
    }

    fn apply(text: &Text, edit: &Edit) -> crate::Result<Text> {
        match edit {
            Edit::Insert { at, text: other } => text.insert(*at, other),
            Edit::Remove { range } => text.remove(range.start, range.end),
            Edit::Replace { range, text: other } => text
                .remove(range.start, range.end)?
                .insert(range.start, other),
        }
    }

    /// Number of flushes published so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    /// Replace the current snapshot wholesale (undo/redo).
    pub fn replace(&self, text: Arc<Text>) {
        let _guard = self.write.lock();
        self.snapshot.store(text);
        self.version.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for Doc {
    fn default() -> Self {
        Self::new()
    }
}
