//! Immutable text rope with O(log n) edits and O(1) snapshots.
//!
//! A [`Text`] is a persistent sequence of UTF-16 code units stored as a
//! balanced binary tree of small immutable blocks. Concatenation, insertion,
//! deletion and slicing all return a new value in O(log n) while sharing
//! structure with the original, so any `Text` can be handed to another
//! thread as a consistent snapshot for free. [`Doc`] layers a lock-free
//! read-copy-update surface on top for the writer-plus-readers case.

use std::fmt::{self, Write as _};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

mod doc;
mod node;

pub use doc::{Doc, Edit};
pub use node::BLOCK_SIZE;

use node::{concat, find_leaf, node_of, validate, Leaf, Leaves, Node};

// === Errors ===

/// The one error the structure reports: an index or half-open range that
/// does not lie within `[0, len]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OutOfRange {
    #[error("index {index} out of range for text of length {len}")]
    Index { index: usize, len: usize },
    #[error("range {start}..{end} out of range for text of length {len}")]
    Range { start: usize, end: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, OutOfRange>;

// === Text ===

/// An immutable sequence of UTF-16 code units with O(log n) concatenation,
/// insertion, deletion and slicing.
///
/// Every operation returns a fresh `Text` and never touches the receiver,
/// so values may be shared freely across threads. `Clone` is O(1) and
/// shares the whole tree.
pub struct Text {
    root: Node,
    /// Last leaf located by [`Text::unit`], with the index range it covers.
    /// A stale hint is re-validated by range check before use.
    last_leaf: ArcSwapOption<LeafHit>,
    /// Memoized content hash. Zero doubles as the not-yet-computed sentinel,
    /// so an all-zero hash is recomputed on each call.
    hash: AtomicU32,
}

struct LeafHit {
    leaf: Leaf,
    start: usize,
    end: usize,
}

impl Text {
    fn from_node(root: Node) -> Text {
        debug_assert!(validate(&root));
        Text {
            root,
            last_leaf: ArcSwapOption::const_empty(),
            hash: AtomicU32::new(0),
        }
    }

    /// The empty text.
    pub fn new() -> Text {
        Text::from_node(Node::Leaf(Leaf::empty()))
    }

    /// Builds a text from raw code units. The root starts as a single leaf;
    /// the first edit that needs it chunks the leaf into block-sized pieces.
    pub fn from_units(units: &[u16]) -> Text {
        Text::from_node(Node::Leaf(Leaf::from_units(units)))
    }

    /// Builds a text from a string, one element per UTF-16 code unit.
    pub fn from_str(text: &str) -> Text {
        let units: Vec<u16> = text.encode_utf16().collect();
        Text::from_units(&units)
    }

    /// Number of code units. O(1).
    #[inline]
    pub fn len(&self) -> usize {
        self.root.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The code unit at `index`.
    ///
    /// Sequential access is amortized O(1): the owning leaf is cached on the
    /// value and revalidated by range on each call.
    pub fn unit(&self, index: usize) -> Result<u16> {
        if index >= self.len() {
            return Err(OutOfRange::Index {
                index,
                len: self.len(),
            });
        }
        if let Some(hit) = self.last_leaf.load_full() {
            if hit.start <= index && index < hit.end {
                return Ok(hit.leaf.unit(index - hit.start));
            }
        }
        let (leaf, start) = find_leaf(&self.root, index);
        let unit = leaf.unit(index - start);
        let end = start + leaf.len();
        self.last_leaf
            .store(Some(Arc::new(LeafHit { leaf, start, end })));
        Ok(unit)
    }

    /// `self` followed by `other`.
    ///
    /// An empty side returns the other side unchanged, sharing its root.
    pub fn concat(&self, other: &Text) -> Text {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        Text::from_node(concat(
            &self.ensure_chunked().root,
            &other.ensure_chunked().root,
        ))
    }

    /// The text covering units `[start, end)`.
    ///
    /// The full range returns `self` unchanged (shared root); an empty range
    /// returns the empty text.
    pub fn slice(&self, start: usize, end: usize) -> Result<Text> {
        if start > end || end > self.len() {
            return Err(OutOfRange::Range {
                start,
                end,
                len: self.len(),
            });
        }
        if start == 0 && end == self.len() {
            return Ok(self.clone());
        }
        if start == end {
            return Ok(Text::new());
        }
        Ok(Text::from_node(self.root.sub_node(start, end)))
    }

    /// A text with `other` inserted before position `at`.
    pub fn insert(&self, at: usize, other: &Text) -> Result<Text> {
        if at > self.len() {
            return Err(OutOfRange::Index {
                index: at,
                len: self.len(),
            });
        }
        let head = self.slice(0, at)?;
        let tail = self.slice(at, self.len())?;
        Ok(head.concat(other).concat(&tail))
    }

    /// A text without the units in `[start, end)`.
    ///
    /// An empty range returns `self` unchanged (shared root).
    pub fn remove(&self, start: usize, end: usize) -> Result<Text> {
        if start > end || end > self.len() {
            return Err(OutOfRange::Range {
                start,
                end,
                len: self.len(),
            });
        }
        if start == end {
            return Ok(self.clone());
        }
        let chunked = self.ensure_chunked();
        Ok(chunked
            .slice(0, start)?
            .concat(&chunked.slice(end, self.len())?))
    }

    /// Bulk-copies `dst.len()` units starting at `start` into `dst`.
    pub fn copy_units(&self, start: usize, dst: &mut [u16]) -> Result<()> {
        match start.checked_add(dst.len()) {
            Some(end) if end <= self.len() => {
                self.root.copy_to(start, dst);
                Ok(())
            }
            _ => Err(OutOfRange::Range {
                start,
                end: start.saturating_add(dst.len()),
                len: self.len(),
            }),
        }
    }

    /// All units as a fresh contiguous buffer.
    pub fn to_units(&self) -> Vec<u16> {
        let mut units = vec![0u16; self.len()];
        self.root.copy_to(0, &mut units);
        units
    }

    /// Iterator over the code units, in order.
    pub fn units(&self) -> Units<'_> {
        Units {
            leaves: Leaves::new(&self.root),
            current: None,
            pos: 0,
        }
    }

    /// Iterator over the characters, with unpaired surrogates replaced by
    /// U+FFFD.
    pub fn chars(&self) -> impl Iterator<Item = char> + '_ {
        char::decode_utf16(self.units()).map(|unit| unit.unwrap_or(char::REPLACEMENT_CHARACTER))
    }

    /// True when both values share the same root node, which makes them
    /// equal without looking at content. Operations documented as returning
    /// a value "unchanged" guarantee this relation between input and output.
    pub fn ptr_eq(&self, other: &Text) -> bool {
        self.root.ptr_eq(&other.root)
    }

    /// Depth of the internal tree. Stays logarithmic in the length across
    /// edit sequences.
    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    /// A freshly built text is one big leaf, which is compact but shares
    /// nothing. Chunking it into block-sized leaves lets subsequent edits
    /// retain most of the structure of the original. Applied before any
    /// concat and before delete splits.
    fn ensure_chunked(&self) -> Text {
        if let Node::Leaf(leaf) = &self.root {
            if leaf.len() > BLOCK_SIZE {
                return Text::from_node(node_of(leaf, 0, leaf.len()));
            }
        }
        self.clone()
    }

    /// Content hash: `h = 31·h + unit` over all units, wrapping in `u32`.
    fn content_hash(&self) -> u32 {
        let cached = self.hash.load(Ordering::Relaxed);
        if cached != 0 {
            return cached;
        }
        let mut h = 0u32;
        for unit in self.units() {
            h = h.wrapping_mul(31).wrapping_add(unit as u32);
        }
        self.hash.store(h, Ordering::Relaxed);
        h
    }
}

impl Clone for Text {
    fn clone(&self) -> Text {
        Text {
            root: self.root.clone(),
            last_leaf: ArcSwapOption::new(self.last_leaf.load_full()),
            hash: AtomicU32::new(self.hash.load(Ordering::Relaxed)),
        }
    }
}

impl Default for Text {
    fn default() -> Text {
        Text::new()
    }
}

impl From<&str> for Text {
    fn from(text: &str) -> Text {
        Text::from_str(text)
    }
}

impl PartialEq for Text {
    fn eq(&self, other: &Text) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.len() != other.len() {
            return false;
        }
        self.units().eq(other.units())
    }
}

impl Eq for Text {}

impl Hash for Text {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.content_hash());
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ch in self.chars() {
            f.write_char(ch)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Text({:?})", self.to_string())
    }
}

// === Unit iteration ===

/// Iterator over the code units of a [`Text`].
pub struct Units<'a> {
    leaves: Leaves<'a>,
    current: Option<&'a Leaf>,
    pos: usize,
}

impl Iterator for Units<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        loop {
            if let Some(leaf) = self.current {
                if self.pos < leaf.len() {
                    let unit = leaf.unit(self.pos);
                    self.pos += 1;
                    return Some(unit);
                }
            }
            self.current = Some(self.leaves.next()?);
            self.pos = 0;
        }
    }
}
