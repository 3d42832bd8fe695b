//! Node algebra for the immutable text tree: leaves, composites, rotations,
//! concat with balance maintenance, block chunking, and index-to-leaf lookup.

use std::sync::Arc;

/// Maximum leaf size: concat fuses anything at or below this into one leaf,
/// and the chunker targets leaves of exactly this size.
pub const BLOCK_SIZE: usize = 1 << 6;

/// Rounds a length down to a block boundary.
const BLOCK_MASK: usize = !(BLOCK_SIZE - 1);

// === Core Types ===

/// Tree node: a terminal run of code units or a two-child composite.
#[derive(Clone)]
pub(crate) enum Node {
    Leaf(Leaf),
    Composite(Arc<Composite>),
}

/// Terminal node. Runs whose units all fit in one byte are stored packed.
#[derive(Clone)]
pub(crate) enum Leaf {
    Packed(Arc<[u8]>),
    Wide(Arc<[u16]>),
}

/// Inner node: cached total length plus head and tail children.
///
/// Children are never empty; `count` always equals the sum of the child
/// lengths.
pub(crate) struct Composite {
    pub(crate) count: usize,
    pub(crate) head: Node,
    pub(crate) tail: Node,
}

// === Leaf ===

impl Leaf {
    pub(crate) fn empty() -> Leaf {
        Leaf::Packed(Vec::new().into())
    }

    /// Builds a leaf from raw units, packing to bytes when every unit fits.
    pub(crate) fn from_units(units: &[u16]) -> Leaf {
        if units.iter().all(|&u| u <= 0xFF) {
            Leaf::Packed(units.iter().map(|&u| u as u8).collect())
        } else {
            Leaf::Wide(units.into())
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        match self {
            Leaf::Packed(data) => data.len(),
            Leaf::Wide(data) => data.len(),
        }
    }

    #[inline]
    pub(crate) fn unit(&self, index: usize) -> u16 {
        match self {
            Leaf::Packed(data) => data[index] as u16,
            Leaf::Wide(data) => data[index],
        }
    }

    /// Copies `dst.len()` units starting at `offset` into `dst`.
    pub(crate) fn copy_to(&self, offset: usize, dst: &mut [u16]) {
        match self {
            Leaf::Packed(data) => {
                let len = dst.len();
                for (out, &byte) in dst.iter_mut().zip(&data[offset..offset + len]) {
                    *out = byte as u16;
                }
            }
            Leaf::Wide(data) => dst.copy_from_slice(&data[offset..offset + dst.len()]),
        }
    }

    /// Units `[start, end)` as a leaf. The full range shares this leaf's
    /// buffer; anything narrower is copied fresh, keeping the same packing.
    pub(crate) fn sub_leaf(&self, start: usize, end: usize) -> Leaf {
        if start == 0 && end == self.len() {
            return self.clone();
        }
        match self {
            Leaf::Packed(data) => Leaf::Packed(data[start..end].into()),
            Leaf::Wide(data) => Leaf::Wide(data[start..end].into()),
        }
    }
}

// === Composite ===

impl Composite {
    pub(crate) fn new(head: Node, tail: Node) -> Composite {
        Composite {
            count: head.len() + tail.len(),
            head,
            tail,
        }
    }

    /// The index separating head from tail.
    #[inline]
    pub(crate) fn cesure(&self) -> usize {
        self.head.len()
    }

    /// `((A, B), C)` becomes `(A, (B, C))`. No-op when head is a leaf.
    fn rotate_right(this: &Arc<Composite>) -> Arc<Composite> {
        let Node::Composite(p) = &this.head else {
            return Arc::clone(this);
        };
        let lifted = Composite::new(p.tail.clone(), this.tail.clone());
        Arc::new(Composite::new(
            p.head.clone(),
            Node::Composite(Arc::new(lifted)),
        ))
    }

    /// `(A, (B, C))` becomes `((A, B), C)`. No-op when tail is a leaf.
    fn rotate_left(this: &Arc<Composite>) -> Arc<Composite> {
        let Node::Composite(q) = &this.tail else {
            return Arc::clone(this);
        };
        let lifted = Composite::new(this.head.clone(), q.head.clone());
        Arc::new(Composite::new(
            Node::Composite(Arc::new(lifted)),
            q.tail.clone(),
        ))
    }
}

// === Node ===

impl Node {
    #[inline]
    pub(crate) fn len(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.len(),
            Node::Composite(composite) => composite.count,
        }
    }

    /// Copies `dst.len()` units starting at `offset` into `dst`, splitting
    /// the request at each cesure.
    pub(crate) fn copy_to(&self, offset: usize, dst: &mut [u16]) {
        match self {
            Node::Leaf(leaf) => leaf.copy_to(offset, dst),
            Node::Composite(composite) => {
                let cesure = composite.cesure();
                if offset + dst.len() <= cesure {
                    composite.head.copy_to(offset, dst);
                } else if offset >= cesure {
                    composite.tail.copy_to(offset - cesure, dst);
                } else {
                    // Overlaps head and tail.
                    let (left, right) = dst.split_at_mut(cesure - offset);
                    composite.head.copy_to(offset, left);
                    composite.tail.copy_to(0, right);
                }
            }
        }
    }

    /// A node covering units `[start, end)` of this one. Shares subtrees
    /// whenever the range lines up with existing structure; a range that
    /// straddles the cesure goes back through [`concat`] so the result
    /// stays balanced.
    pub(crate) fn sub_node(&self, start: usize, end: usize) -> Node {
        match self {
            Node::Leaf(leaf) => Node::Leaf(leaf.sub_leaf(start, end)),
            Node::Composite(composite) => {
                let cesure = composite.cesure();
                if end <= cesure {
                    return composite.head.sub_node(start, end);
                }
                if start >= cesure {
                    return composite.tail.sub_node(start - cesure, end - cesure);
                }
                if start == 0 && end == composite.count {
                    return self.clone();
                }
                // Overlaps head and tail.
                concat(
                    &composite.head.sub_node(start, cesure),
                    &composite.tail.sub_node(0, end - cesure),
                )
            }
        }
    }

    pub(crate) fn depth(&self) -> usize {
        match self {
            Node::Leaf(_) => 0,
            Node::Composite(composite) => {
                1 + composite.head.depth().max(composite.tail.depth())
            }
        }
    }

    /// True when both handles point at the same allocation.
    pub(crate) fn ptr_eq(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Leaf(Leaf::Packed(a)), Node::Leaf(Leaf::Packed(b))) => Arc::ptr_eq(a, b),
            (Node::Leaf(Leaf::Wide(a)), Node::Leaf(Leaf::Wide(b))) => Arc::ptr_eq(a, b),
            (Node::Composite(a), Node::Composite(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// === Concat ===

/// Combines two non-empty nodes.
///
/// Totals at or under [`BLOCK_SIZE`] fuse into a single fresh leaf. Larger
/// results compose, with at most one rotation and one recursive concat per
/// level: when one side is under half the other's length, the larger side is
/// rotated so its smaller half faces the short side, and the short side is
/// concatenated into that half.
pub(crate) fn concat(node1: &Node, node2: &Node) -> Node {
    let length = node1.len() + node2.len();
    if length <= BLOCK_SIZE {
        // Merges to primitive.
        let mut units = vec![0u16; length];
        let (left, right) = units.split_at_mut(node1.len());
        node1.copy_to(0, left);
        node2.copy_to(0, right);
        return Node::Leaf(Leaf::from_units(&units));
    }

    let mut head = node1.clone();
    let mut tail = node2.clone();

    if head.len() << 1 < tail.len() {
        if let Node::Composite(composite) = &tail {
            // Head too small: fold it into tail's smaller half.
            let composite = if composite.head.len() > composite.tail.len() {
                Composite::rotate_right(composite)
            } else {
                Arc::clone(composite)
            };
            head = concat(&head, &composite.head);
            tail = composite.tail.clone();
        }
    } else if tail.len() << 1 < head.len() {
        if let Node::Composite(composite) = &head {
            // Tail too small: fold it into head's smaller half.
            let composite = if composite.tail.len() > composite.head.len() {
                Composite::rotate_left(composite)
            } else {
                Arc::clone(composite)
            };
            tail = concat(&composite.tail, &tail);
            head = composite.head.clone();
        }
    }

    Node::Composite(Arc::new(Composite::new(head, tail)))
}

// === Chunker ===

/// Builds a balanced tree of block-sized leaves over
/// `leaf[offset..offset + length]`.
pub(crate) fn node_of(leaf: &Leaf, offset: usize, length: usize) -> Node {
    if length <= BLOCK_SIZE {
        return Node::Leaf(leaf.sub_leaf(offset, offset + length));
    }
    // Splits on a block boundary.
    let half = ((length + BLOCK_SIZE) >> 1) & BLOCK_MASK;
    let head = node_of(leaf, offset, half);
    let tail = node_of(leaf, offset + half, length - half);
    Node::Composite(Arc::new(Composite::new(head, tail)))
}

// === Locator ===

/// Walks from the root to the leaf containing `index`, returning the leaf
/// and the absolute offset of its first unit. Caller guarantees
/// `index < root.len()`.
pub(crate) fn find_leaf(root: &Node, mut index: usize) -> (Leaf, usize) {
    let mut node = root;
    let mut base = 0;
    loop {
        match node {
            Node::Leaf(leaf) => return (leaf.clone(), base),
            Node::Composite(composite) => {
                if index < composite.cesure() {
                    node = &composite.head;
                } else {
                    base += composite.cesure();
                    index -= composite.cesure();
                    node = &composite.tail;
                }
            }
        }
    }
}

// === Leaf iteration ===

/// In-order walk over the leaves of a tree.
pub(crate) struct Leaves<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Leaves<'a> {
    pub(crate) fn new(root: &'a Node) -> Leaves<'a> {
        Leaves { stack: vec![root] }
    }
}

impl<'a> Iterator for Leaves<'a> {
    type Item = &'a Leaf;

    fn next(&mut self) -> Option<&'a Leaf> {
        loop {
            match self.stack.pop()? {
                Node::Leaf(leaf) => return Some(leaf),
                Node::Composite(composite) => {
                    self.stack.push(&composite.tail);
                    self.stack.push(&composite.head);
                }
            }
        }
    }
}

// === Validation ===

/// Structural invariant check: cached counts match the children, no
/// composite has an empty child. Debug builds only.
#[cfg(debug_assertions)]
pub(crate) fn validate(node: &Node) -> bool {
    match node {
        Node::Leaf(_) => true,
        Node::Composite(composite) => {
            if composite.head.len() == 0 || composite.tail.len() == 0 {
                eprintln!("composite with an empty child");
                return false;
            }
            if composite.count != composite.head.len() + composite.tail.len() {
                eprintln!(
                    "composite count {} != {} + {}",
                    composite.count,
                    composite.head.len(),
                    composite.tail.len()
                );
                return false;
            }
            validate(&composite.head) && validate(&composite.tail)
        }
    }
}

#[cfg(not(debug_assertions))]
pub(crate) fn validate(_node: &Node) -> bool {
    true // No-op in release builds
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_of(text: &str) -> Node {
        let units: Vec<u16> = text.encode_utf16().collect();
        Node::Leaf(Leaf::from_units(&units))
    }

    fn units_of(node: &Node) -> Vec<u16> {
        let mut units = vec![0u16; node.len()];
        node.copy_to(0, &mut units);
        units
    }

    fn weak_balanced(composite: &Composite) -> bool {
        let (head, tail) = (composite.head.len(), composite.tail.len());
        head.min(tail) * 2 > head.max(tail)
    }

    #[test]
    fn test_leaf_packing() {
        // Latin-1 content packs to bytes, anything wider stays at 16 bits.
        let packed = Leaf::from_units(&"héllo".encode_utf16().collect::<Vec<_>>());
        assert!(matches!(packed, Leaf::Packed(_)));
        let wide = Leaf::from_units(&"héllo→".encode_utf16().collect::<Vec<_>>());
        assert!(matches!(wide, Leaf::Wide(_)));
        assert_eq!(packed.len(), 5);
        assert_eq!(wide.len(), 6);
        assert_eq!(packed.unit(1), 0xE9);
        assert_eq!(wide.unit(5), 0x2192);
    }

    #[test]
    fn test_sub_leaf_shares_full_range() {
        let leaf = Leaf::from_units(&[1, 2, 3, 4]);
        let full = leaf.sub_leaf(0, 4);
        let (Leaf::Packed(a), Leaf::Packed(b)) = (&leaf, &full) else {
            panic!("expected packed leaves");
        };
        assert!(Arc::ptr_eq(a, b));

        let partial = leaf.sub_leaf(1, 3);
        assert_eq!(partial.len(), 2);
        assert_eq!(partial.unit(0), 2);
        assert_eq!(partial.unit(1), 3);
    }

    #[test]
    fn test_concat_fuses_small_nodes() {
        let fused = concat(&leaf_of("abc"), &leaf_of("def"));
        assert!(matches!(fused, Node::Leaf(_)));
        assert_eq!(units_of(&fused), "abcdef".encode_utf16().collect::<Vec<_>>());
    }

    #[test]
    fn test_fuse_repacks_mixed_widths() {
        // A wide leaf whose units happen to fit in a byte fuses back to packed.
        let wide = Node::Leaf(Leaf::Wide("abc".encode_utf16().collect::<Vec<_>>().into()));
        let fused = concat(&wide, &leaf_of("def"));
        assert!(matches!(fused, Node::Leaf(Leaf::Packed(_))));

        let fused = concat(&leaf_of("abc"), &leaf_of("→"));
        assert!(matches!(fused, Node::Leaf(Leaf::Wide(_))));
    }

    #[test]
    fn test_concat_composes_over_block_size() {
        let a = leaf_of(&"a".repeat(BLOCK_SIZE));
        let b = leaf_of("b");
        let joined = concat(&a, &b);
        assert!(matches!(joined, Node::Composite(_)));
        assert_eq!(joined.len(), BLOCK_SIZE + 1);
        assert!(validate(&joined));
    }

    #[test]
    fn test_concat_balances_similar_sides() {
        let chunked = |len: usize| {
            let leaf = Leaf::from_units(&vec![b'x' as u16; len]);
            node_of(&leaf, 0, len)
        };
        let joined = concat(&chunked(512), &chunked(640));
        let Node::Composite(composite) = &joined else {
            panic!("expected composite");
        };
        assert!(weak_balanced(composite));
        assert_eq!(joined.len(), 1152);
        assert!(validate(&joined));
    }

    #[test]
    fn test_concat_rebalances_lopsided_append() {
        // Repeatedly appending a block to a growing tree exercises the
        // rotate-then-recurse path; depth must stay logarithmic.
        let block = leaf_of(&"x".repeat(BLOCK_SIZE));
        let mut node = block.clone();
        for _ in 0..255 {
            node = concat(&node, &block);
        }
        assert_eq!(node.len(), 256 * BLOCK_SIZE);
        assert!(node.depth() <= 4 * 15); // 4 * log2(len + 1)
        assert!(validate(&node));
    }

    #[test]
    fn test_rotations_preserve_order() {
        let a = leaf_of(&"a".repeat(70));
        let b = leaf_of(&"b".repeat(70));
        let c = leaf_of(&"c".repeat(70));
        let inner = Node::Composite(Arc::new(Composite::new(a.clone(), b.clone())));

        let left_heavy = Arc::new(Composite::new(inner, c.clone()));
        let rotated = Composite::rotate_right(&left_heavy);
        assert_eq!(rotated.count, 210);
        assert_eq!(rotated.cesure(), 70);
        assert_eq!(
            units_of(&Node::Composite(rotated)),
            units_of(&Node::Composite(left_heavy))
        );

        let inner = Node::Composite(Arc::new(Composite::new(b, c)));
        let right_heavy = Arc::new(Composite::new(a, inner));
        let rotated = Composite::rotate_left(&right_heavy);
        assert_eq!(rotated.count, 210);
        assert_eq!(rotated.cesure(), 140);
        assert_eq!(
            units_of(&Node::Composite(rotated)),
            units_of(&Node::Composite(right_heavy))
        );
    }

    #[test]
    fn test_rotation_on_leaf_child_is_identity() {
        let composite = Arc::new(Composite::new(leaf_of("abc"), leaf_of("def")));
        assert!(Arc::ptr_eq(&Composite::rotate_right(&composite), &composite));
        assert!(Arc::ptr_eq(&Composite::rotate_left(&composite), &composite));
    }

    #[test]
    fn test_node_of_splits_on_block_boundaries() {
        for length in [65, 100, 128, 200, 1000, 4096, 10_000] {
            let leaf = Leaf::from_units(&vec![b'x' as u16; length]);
            let tree = node_of(&leaf, 0, length);
            assert_eq!(tree.len(), length);
            assert!(validate(&tree));

            // Every leaf is a full block except possibly the last.
            let sizes: Vec<usize> = Leaves::new(&tree).map(Leaf::len).collect();
            for &size in &sizes[..sizes.len() - 1] {
                assert_eq!(size, BLOCK_SIZE);
            }
            assert!(*sizes.last().unwrap() <= BLOCK_SIZE);
        }
    }

    #[test]
    fn test_sub_node_shares_aligned_ranges() {
        let leaf = Leaf::from_units(&vec![b'x' as u16; 256]);
        let tree = node_of(&leaf, 0, 256);
        let full = tree.sub_node(0, 256);
        assert!(tree.ptr_eq(&full));

        let Node::Composite(composite) = &tree else {
            panic!("expected composite");
        };
        let head = tree.sub_node(0, composite.cesure());
        assert!(head.ptr_eq(&composite.head));
    }

    #[test]
    fn test_sub_node_overlap_rebalances() {
        let leaf = Leaf::from_units(&(0..2048u16).collect::<Vec<_>>());
        let tree = node_of(&leaf, 0, 2048);
        let middle = tree.sub_node(100, 1948);
        assert_eq!(middle.len(), 1848);
        assert_eq!(units_of(&middle), (100..1948u16).collect::<Vec<_>>());
        assert!(validate(&middle));
    }

    #[test]
    fn test_copy_to_straddles_cesure() {
        let tree = concat(&leaf_of(&"a".repeat(64)), &leaf_of(&"b".repeat(64)));
        let mut window = [0u16; 10];
        tree.copy_to(59, &mut window);
        let text: String = char::decode_utf16(window).map(Result::unwrap).collect();
        assert_eq!(text, "aaaaabbbbb");
    }

    #[test]
    fn test_find_leaf_offsets() {
        let leaf = Leaf::from_units(&(0..300u16).collect::<Vec<_>>());
        let tree = node_of(&leaf, 0, 300);
        for index in [0, 63, 64, 128, 255, 299] {
            let (found, base) = find_leaf(&tree, index);
            assert!(base <= index && index < base + found.len());
            assert_eq!(found.unit(index - base), index as u16);
            assert_eq!(base % BLOCK_SIZE, 0);
        }
    }

    #[test]
    fn test_leaves_walk_in_order() {
        let tree = concat(
            &concat(&leaf_of(&"a".repeat(40)), &leaf_of(&"b".repeat(40))),
            &leaf_of(&"c".repeat(40)),
        );
        let collected: Vec<u16> = Leaves::new(&tree)
            .flat_map(|leaf| (0..leaf.len()).map(|i| leaf.unit(i)).collect::<Vec<_>>())
            .collect();
        assert_eq!(collected, units_of(&tree));
    }
}
