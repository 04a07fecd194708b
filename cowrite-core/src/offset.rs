//! Linear offset ⇄ tree position mapping.
//!
//! A *linear offset* indexes the document's flattened text projection
//! (structural nodes contribute nothing). A [`Position`] names a text leaf
//! and a character offset inside it, which is what selection APIs speak.
//!
//! ```text
//! <p>ab<b>cd</b></p><p>ef</p>
//!     │     │          │
//! offset 0..2  2..4      4..6
//! ```
//!
//! Both directions only need the [`TextTree`] capability, so the mapping
//! is testable against any synthetic tree.

use std::fmt::Debug;

/// Read-only view of a hierarchical text representation.
pub trait TextTree {
    type Node: Copy + Eq + Debug;

    /// The document container. Never counted as a leaf.
    fn root(&self) -> Self::Node;

    fn parent(&self, node: Self::Node) -> Option<Self::Node>;

    fn children(&self, node: Self::Node) -> &[Self::Node];

    /// Characters in the text projection of `node`'s subtree.
    fn text_len(&self, node: Self::Node) -> usize;

    /// Whether `node` is a text-bearing leaf.
    fn is_text(&self, node: Self::Node) -> bool;

    /// Whether `node` still belongs to this tree.
    fn contains(&self, node: Self::Node) -> bool;
}

/// A text leaf plus a character offset within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position<N> {
    pub node: N,
    pub offset: usize,
}

impl<N> Position<N> {
    pub fn new(node: N, offset: usize) -> Self {
        Self { node, offset }
    }
}

/// Map a tree position to its linear offset.
///
/// Walks from `node` to the root, adding the text length of every
/// preceding sibling at each level. The result depends only on text
/// ordering, never on node identity.
pub fn position_to_offset<T: TextTree>(tree: &T, node: T::Node, local_offset: usize) -> usize {
    let root = tree.root();
    let mut offset = local_offset;
    let mut current = node;

    while current != root {
        let Some(parent) = tree.parent(current) else {
            break;
        };
        offset += tree
            .children(parent)
            .iter()
            .take_while(|&&sibling| sibling != current)
            .map(|&sibling| tree.text_len(sibling))
            .sum::<usize>();
        current = parent;
    }

    offset
}

/// Map a linear offset to the first text leaf whose inclusive range
/// `[before, before + len]` contains it.
///
/// Offsets on a leaf boundary resolve to the earlier leaf. Returns `None`
/// past the end of the document or when there is no text leaf at all.
pub fn offset_to_position<T: TextTree>(tree: &T, offset: usize) -> Option<Position<T::Node>> {
    let mut consumed = 0;
    find_leaf(tree, tree.root(), offset, &mut consumed)
}

fn find_leaf<T: TextTree>(
    tree: &T,
    node: T::Node,
    offset: usize,
    consumed: &mut usize,
) -> Option<Position<T::Node>> {
    if tree.is_text(node) {
        let len = tree.text_len(node);
        if offset >= *consumed && offset <= *consumed + len {
            return Some(Position::new(node, offset - *consumed));
        }
        *consumed += len;
        return None;
    }

    // Whole subtree lies before the target; skip it without descending.
    let subtree = tree.text_len(node);
    if node != tree.root() && *consumed + subtree < offset {
        *consumed += subtree;
        return None;
    }

    tree.children(node)
        .iter()
        .find_map(|&child| find_leaf(tree, child, offset, consumed))
}

/// Total characters in the document's text projection.
pub fn document_len<T: TextTree>(tree: &T) -> usize {
    tree.text_len(tree.root())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal synthetic tree: nodes are indices, leaves carry a length.
    struct SyntheticTree {
        parents: Vec<Option<usize>>,
        children: Vec<Vec<usize>>,
        leaf_len: Vec<Option<usize>>,
    }

    impl SyntheticTree {
        fn new() -> Self {
            Self {
                parents: vec![None],
                children: vec![Vec::new()],
                leaf_len: vec![None],
            }
        }

        fn element(&mut self, parent: usize) -> usize {
            self.push(parent, None)
        }

        fn leaf(&mut self, parent: usize, len: usize) -> usize {
            self.push(parent, Some(len))
        }

        fn push(&mut self, parent: usize, len: Option<usize>) -> usize {
            let id = self.parents.len();
            self.parents.push(Some(parent));
            self.children.push(Vec::new());
            self.leaf_len.push(len);
            self.children[parent].push(id);
            id
        }
    }

    impl TextTree for SyntheticTree {
        type Node = usize;

        fn root(&self) -> usize {
            0
        }

        fn parent(&self, node: usize) -> Option<usize> {
            self.parents[node]
        }

        fn children(&self, node: usize) -> &[usize] {
            &self.children[node]
        }

        fn text_len(&self, node: usize) -> usize {
            match self.leaf_len[node] {
                Some(len) => len,
                None => self.children[node].iter().map(|&c| self.text_len(c)).sum(),
            }
        }

        fn is_text(&self, node: usize) -> bool {
            self.leaf_len[node].is_some()
        }

        fn contains(&self, node: usize) -> bool {
            node < self.parents.len()
        }
    }

    /// `<p>[3]<b>[2]</b></p><br><p>[4]</p>`
    fn sample() -> (SyntheticTree, Vec<usize>) {
        let mut tree = SyntheticTree::new();
        let p1 = tree.element(0);
        let a = tree.leaf(p1, 3);
        let b = tree.element(p1);
        let b_text = tree.leaf(b, 2);
        let _br = tree.element(0);
        let p2 = tree.element(0);
        let c = tree.leaf(p2, 4);
        (tree, vec![a, b_text, c])
    }

    #[test]
    fn test_position_to_offset_accumulates_preceding_siblings() {
        let (tree, leaves) = sample();
        assert_eq!(position_to_offset(&tree, leaves[0], 0), 0);
        assert_eq!(position_to_offset(&tree, leaves[0], 2), 2);
        assert_eq!(position_to_offset(&tree, leaves[1], 1), 4);
        assert_eq!(position_to_offset(&tree, leaves[2], 0), 5);
        assert_eq!(position_to_offset(&tree, leaves[2], 4), 9);
    }

    #[test]
    fn test_offset_to_position_inside_leaves() {
        let (tree, leaves) = sample();
        assert_eq!(offset_to_position(&tree, 1), Some(Position::new(leaves[0], 1)));
        assert_eq!(offset_to_position(&tree, 4), Some(Position::new(leaves[1], 1)));
        assert_eq!(offset_to_position(&tree, 7), Some(Position::new(leaves[2], 2)));
    }

    #[test]
    fn test_offset_to_position_boundary_prefers_earlier_leaf() {
        let (tree, leaves) = sample();
        // Offset 3 is both the end of leaf 0 and the start of leaf 1.
        assert_eq!(offset_to_position(&tree, 3), Some(Position::new(leaves[0], 3)));
        assert_eq!(offset_to_position(&tree, 5), Some(Position::new(leaves[1], 2)));
    }

    #[test]
    fn test_offset_to_position_end_of_document() {
        let (tree, leaves) = sample();
        assert_eq!(offset_to_position(&tree, 9), Some(Position::new(leaves[2], 4)));
        assert_eq!(offset_to_position(&tree, 10), None);
    }

    #[test]
    fn test_offset_to_position_empty_document() {
        let mut tree = SyntheticTree::new();
        tree.element(0);
        assert_eq!(offset_to_position(&tree, 0), None);
        assert_eq!(document_len(&tree), 0);
    }

    #[test]
    fn test_round_trip_every_in_bounds_offset() {
        let (tree, _) = sample();
        for offset in 0..=document_len(&tree) {
            let pos = offset_to_position(&tree, offset).expect("in-bounds offset resolves");
            assert_eq!(position_to_offset(&tree, pos.node, pos.offset), offset);
        }
    }

    #[test]
    fn test_empty_leaves_do_not_shift_offsets() {
        let mut tree = SyntheticTree::new();
        let a = tree.leaf(0, 2);
        let empty = tree.leaf(0, 0);
        let b = tree.leaf(0, 2);
        assert_eq!(position_to_offset(&tree, empty, 0), 2);
        assert_eq!(position_to_offset(&tree, b, 1), 3);
        assert_eq!(offset_to_position(&tree, 2), Some(Position::new(a, 2)));
    }
}
