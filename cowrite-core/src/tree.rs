//! Arena-backed document tree.
//!
//! Nodes live in a slot arena addressed by generational [`NodeId`]s.
//! Removing a node bumps its slot generation, so a handle captured before
//! a content replacement never aliases a node created afterwards.

use crate::error::TreeError;
use crate::markup::{self, MarkupNode};
use crate::offset::{Position, TextTree};

/// Generational handle to a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Node payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Structural element, e.g. `<p>` or `<b>`.
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    /// Text-bearing leaf.
    Text(String),
    /// Remote selection tint. Serializes transparently.
    Highlight { color: String },
}

impl NodeKind {
    pub fn element(tag: impl Into<String>) -> Self {
        NodeKind::Element {
            tag: tag.into(),
            attrs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<NodeData>,
}

/// Hierarchical text document rooted at an editor container.
#[derive(Debug, Clone)]
pub struct DocumentTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
}

impl Default for DocumentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentTree {
    /// Create an empty tree containing only the root container.
    pub fn new() -> Self {
        let root_data = NodeData {
            kind: NodeKind::element("div"),
            parent: None,
            children: Vec::new(),
        };
        Self {
            slots: vec![Slot {
                generation: 0,
                node: Some(root_data),
            }],
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
        }
    }

    /// Build a tree from a markup fragment.
    pub fn from_markup(markup: &str) -> Self {
        let mut tree = Self::new();
        tree.set_markup(markup);
        tree
    }

    /// Replace every child of the root with freshly parsed content.
    ///
    /// All previously issued handles below the root become stale.
    pub fn set_markup(&mut self, markup: &str) {
        for child in self.data(self.root).map(|d| d.children.clone()).unwrap_or_default() {
            self.free_subtree(child);
        }
        if let Some(root) = self.data_mut(self.root) {
            root.children.clear();
        }

        let root = self.root;
        for node in markup::parse(markup) {
            self.append_markup(root, node);
        }
        log::trace!("Document replaced: {} live nodes", self.node_count());
    }

    /// Serialize the children of the root back to markup.
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        for &child in self.children_of(self.root) {
            self.write_markup(child, &mut out);
        }
        out
    }

    /// Rendered text: block boundaries and `<br>` become newlines.
    pub fn rendered_text(&self) -> String {
        let mut out = String::new();
        self.write_rendered(self.root, &mut out);
        out
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.data(id).map(|d| &d.kind)
    }

    /// Text of a leaf, `None` for structural nodes or stale handles.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Text leaves in document order.
    pub fn text_leaves(&self) -> Vec<NodeId> {
        let mut leaves = Vec::new();
        self.collect_leaves(self.root, &mut leaves);
        leaves
    }

    /// Append a new node under `parent`.
    pub fn append(&mut self, parent: NodeId, kind: NodeKind) -> Result<NodeId, TreeError> {
        let index = self.children_of(parent).len();
        self.insert_at(parent, index, kind)
    }

    /// Insert a new node as the `index`-th child of `parent`.
    pub fn insert_at(
        &mut self,
        parent: NodeId,
        index: usize,
        kind: NodeKind,
    ) -> Result<NodeId, TreeError> {
        if matches!(self.kind(parent), None | Some(NodeKind::Text(_))) {
            return Err(TreeError::StaleNode);
        }
        let id = self.alloc(NodeData {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        let children = &mut self.data_mut(parent).ok_or(TreeError::StaleNode)?.children;
        let index = index.min(children.len());
        children.insert(index, id);
        Ok(id)
    }

    /// Detach and free `id` together with its subtree.
    pub fn remove(&mut self, id: NodeId) -> Result<(), TreeError> {
        if id == self.root {
            return Err(TreeError::RootMutation);
        }
        let parent = self.parent_of(id).ok_or(TreeError::StaleNode)?;
        if let Some(data) = self.data_mut(parent) {
            data.children.retain(|&c| c != id);
        }
        self.free_subtree(id);
        Ok(())
    }

    /// Replace the text of a leaf.
    pub fn set_text(&mut self, id: NodeId, text: String) -> Result<(), TreeError> {
        match self.data_mut(id).map(|d| &mut d.kind) {
            Some(NodeKind::Text(current)) => {
                *current = text;
                Ok(())
            }
            Some(_) => Err(TreeError::NotText),
            None => Err(TreeError::StaleNode),
        }
    }

    /// Split a text leaf at character offset `at`.
    ///
    /// `id` keeps `[0, at)`; the returned sibling, inserted right after it,
    /// holds the tail.
    pub fn split_text(&mut self, id: NodeId, at: usize) -> Result<NodeId, TreeError> {
        let text = self.text(id).ok_or(TreeError::NotText)?;
        let len = text.chars().count();
        if at > len {
            return Err(TreeError::OffsetOutOfBounds { offset: at, len });
        }
        let split = byte_index(text, at);
        let tail = text[split..].to_string();
        let head = text[..split].to_string();

        let parent = self.parent_of(id).ok_or(TreeError::StaleNode)?;
        let index = self.index_in_parent(id).ok_or(TreeError::StaleNode)?;
        self.set_text(id, head)?;
        self.insert_at(parent, index + 1, NodeKind::Text(tail))
    }

    /// Wrap the content between two leaf positions in a new node.
    ///
    /// Follows range-surround semantics: both boundaries must sit in text
    /// leaves sharing one parent, otherwise the range would partially
    /// select an element and [`TreeError::PartialSelection`] is returned.
    pub fn wrap_range(
        &mut self,
        start: Position<NodeId>,
        end: Position<NodeId>,
        kind: NodeKind,
    ) -> Result<NodeId, TreeError> {
        let start_len = self.text(start.node).ok_or(TreeError::NotText)?.chars().count();
        let end_len = self.text(end.node).ok_or(TreeError::NotText)?.chars().count();
        if start.offset > start_len {
            return Err(TreeError::OffsetOutOfBounds { offset: start.offset, len: start_len });
        }
        if end.offset > end_len {
            return Err(TreeError::OffsetOutOfBounds { offset: end.offset, len: end_len });
        }

        let parent = self.parent_of(start.node).ok_or(TreeError::StaleNode)?;
        if self.parent_of(end.node) != Some(parent) {
            return Err(TreeError::PartialSelection);
        }

        let (first, last) = if start.node == end.node {
            if start.offset > end.offset {
                return Err(TreeError::InvertedRange);
            }
            if end.offset < end_len {
                self.split_text(end.node, end.offset)?;
            }
            let middle = if start.offset > 0 {
                self.split_text(start.node, start.offset)?
            } else {
                start.node
            };
            (middle, middle)
        } else {
            let start_index = self.index_in_parent(start.node).ok_or(TreeError::StaleNode)?;
            let end_index = self.index_in_parent(end.node).ok_or(TreeError::StaleNode)?;
            if start_index > end_index {
                return Err(TreeError::InvertedRange);
            }
            if end.offset < end_len {
                self.split_text(end.node, end.offset)?;
            }
            let first = if start.offset > 0 {
                self.split_text(start.node, start.offset)?
            } else {
                start.node
            };
            (first, end.node)
        };

        let first_index = self.index_in_parent(first).ok_or(TreeError::StaleNode)?;
        let last_index = self.index_in_parent(last).ok_or(TreeError::StaleNode)?;
        let wrapper = self.insert_at(parent, first_index, kind)?;

        let moved: Vec<NodeId> = {
            let children = &mut self.data_mut(parent).ok_or(TreeError::StaleNode)?.children;
            // The wrapper now sits at first_index; the run follows it.
            children.drain(first_index + 1..=last_index + 1).collect()
        };
        for &child in &moved {
            if let Some(data) = self.data_mut(child) {
                data.parent = Some(wrapper);
            }
        }
        if let Some(data) = self.data_mut(wrapper) {
            data.children = moved;
        }
        Ok(wrapper)
    }

    /// Replace `id` with its children, in place.
    pub fn unwrap(&mut self, id: NodeId) -> Result<(), TreeError> {
        if id == self.root {
            return Err(TreeError::RootMutation);
        }
        let parent = self.parent_of(id).ok_or(TreeError::StaleNode)?;
        let index = self.index_in_parent(id).ok_or(TreeError::StaleNode)?;
        let children = self
            .data_mut(id)
            .map(|d| std::mem::take(&mut d.children))
            .unwrap_or_default();

        for &child in &children {
            if let Some(data) = self.data_mut(child) {
                data.parent = Some(parent);
            }
        }
        if let Some(data) = self.data_mut(parent) {
            data.children.splice(index..=index, children);
        }
        self.release(id);
        Ok(())
    }

    /// Merge adjacent text leaves under `parent`.
    pub fn merge_text_siblings(&mut self, parent: NodeId) {
        let children = self.children_of(parent).to_vec();
        let mut previous: Option<NodeId> = None;
        for child in children {
            match (previous, self.text(child).map(str::to_string)) {
                (Some(prev), Some(text)) => {
                    let merged = format!("{}{}", self.text(prev).unwrap_or_default(), text);
                    let _ = self.set_text(prev, merged);
                    let _ = self.remove(child);
                }
                (None, Some(_)) => previous = Some(child),
                (_, None) => previous = None,
            }
        }
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).and_then(|d| d.parent)
    }

    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        self.data(id).map_or(&[], |d| d.children.as_slice())
    }

    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent_of(id)?;
        self.children_of(parent).iter().position(|&c| c == id)
    }

    /// Number of live nodes, root included.
    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    // ── arena internals ─────────────────────────────────────────

    fn data(&self, id: NodeId) -> Option<&NodeData> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn data_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(data);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(data),
                });
                NodeId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.node.is_some() {
                slot.node = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
            }
        }
    }

    fn free_subtree(&mut self, id: NodeId) {
        let children = self.data(id).map(|d| d.children.clone()).unwrap_or_default();
        for child in children {
            self.free_subtree(child);
        }
        self.release(id);
    }

    fn append_markup(&mut self, parent: NodeId, node: MarkupNode) {
        match node {
            MarkupNode::Text(text) => {
                let _ = self.append(parent, NodeKind::Text(text));
            }
            MarkupNode::Element { tag, attrs, children } => {
                if let Ok(id) = self.append(parent, NodeKind::Element { tag, attrs }) {
                    for child in children {
                        self.append_markup(id, child);
                    }
                }
            }
        }
    }

    fn write_markup(&self, id: NodeId, out: &mut String) {
        let Some(data) = self.data(id) else {
            return;
        };
        match &data.kind {
            NodeKind::Text(text) => markup::escape_text(text, out),
            NodeKind::Highlight { .. } => {
                for &child in &data.children {
                    self.write_markup(child, out);
                }
            }
            NodeKind::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    markup::escape_attr(value, out);
                    out.push('"');
                }
                out.push('>');
                if markup::is_void_element(tag) {
                    return;
                }
                for &child in &data.children {
                    self.write_markup(child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }

    fn write_rendered(&self, id: NodeId, out: &mut String) {
        let Some(data) = self.data(id) else {
            return;
        };
        match &data.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element { tag, .. } if tag == "br" => out.push('\n'),
            NodeKind::Element { tag, .. } if id != self.root && markup::is_block_element(tag) => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                for &child in &data.children {
                    self.write_rendered(child, out);
                }
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            _ => {
                for &child in &data.children {
                    self.write_rendered(child, out);
                }
            }
        }
    }

    fn collect_leaves(&self, id: NodeId, leaves: &mut Vec<NodeId>) {
        let Some(data) = self.data(id) else {
            return;
        };
        if matches!(data.kind, NodeKind::Text(_)) {
            leaves.push(id);
            return;
        }
        for &child in &data.children {
            self.collect_leaves(child, leaves);
        }
    }
}

impl TextTree for DocumentTree {
    type Node = NodeId;

    fn root(&self) -> NodeId {
        self.root
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.parent_of(node)
    }

    fn children(&self, node: NodeId) -> &[NodeId] {
        self.children_of(node)
    }

    fn text_len(&self, node: NodeId) -> usize {
        match self.data(node) {
            Some(NodeData { kind: NodeKind::Text(text), .. }) => text.chars().count(),
            Some(data) => data.children.iter().map(|&c| self.text_len(c)).sum(),
            None => 0,
        }
    }

    fn is_text(&self, node: NodeId) -> bool {
        self.text(node).is_some()
    }

    fn contains(&self, node: NodeId) -> bool {
        self.data(node).is_some()
    }
}

/// Byte index of the `chars`-th character of `text`.
pub(crate) fn byte_index(text: &str, chars: usize) -> usize {
    text.char_indices().nth(chars).map_or(text.len(), |(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offset::{offset_to_position, position_to_offset};

    #[test]
    fn test_markup_round_trip() {
        let markup = r#"<p>Hello <b class="x">bold</b></p><p>a<br>b</p>"#;
        let tree = DocumentTree::from_markup(markup);
        assert_eq!(tree.to_markup(), markup);
    }

    #[test]
    fn test_serialization_escapes_text() {
        let tree = DocumentTree::from_markup("<p>a &amp; b &lt; c</p>");
        assert_eq!(tree.to_markup(), "<p>a &amp; b &lt; c</p>");
        assert_eq!(tree.rendered_text(), "a & b < c\n");
    }

    #[test]
    fn test_set_markup_invalidates_old_handles() {
        let mut tree = DocumentTree::from_markup("<p>one</p>");
        let old_leaf = tree.text_leaves()[0];
        tree.set_markup("<p>one</p>");
        assert!(!tree.contains(old_leaf));
        assert!(tree.text(old_leaf).is_none());
        assert_eq!(tree.text_leaves().len(), 1);
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn test_text_len_counts_chars() {
        let tree = DocumentTree::from_markup("<p>héllo</p><p>wörld</p>");
        assert_eq!(tree.text_len(tree.root()), 10);
    }

    #[test]
    fn test_split_text() {
        let mut tree = DocumentTree::from_markup("<p>héllo</p>");
        let leaf = tree.text_leaves()[0];
        let tail = tree.split_text(leaf, 2).unwrap();
        assert_eq!(tree.text(leaf), Some("hé"));
        assert_eq!(tree.text(tail), Some("llo"));
        assert_eq!(tree.to_markup(), "<p>héllo</p>");
        assert!(matches!(
            tree.split_text(leaf, 9),
            Err(TreeError::OffsetOutOfBounds { offset: 9, len: 2 })
        ));
    }

    #[test]
    fn test_wrap_range_within_one_leaf() {
        let mut tree = DocumentTree::from_markup("<p>0123456789</p>");
        let leaf = tree.text_leaves()[0];
        let wrapper = tree
            .wrap_range(Position::new(leaf, 2), Position::new(leaf, 5), NodeKind::element("mark"))
            .unwrap();
        assert_eq!(tree.to_markup(), "<p>01<mark>234</mark>56789</p>");
        assert_eq!(tree.text_len(wrapper), 3);
        // Offsets are unaffected by the new structural node.
        let inner = tree.children_of(wrapper)[0];
        assert_eq!(position_to_offset(&tree, inner, 0), 2);
    }

    #[test]
    fn test_wrap_range_across_siblings() {
        let mut tree = DocumentTree::from_markup("<p>abc<br>def</p>");
        let leaves = tree.text_leaves();
        tree.wrap_range(
            Position::new(leaves[0], 1),
            Position::new(leaves[1], 2),
            NodeKind::element("u"),
        )
        .unwrap();
        assert_eq!(tree.to_markup(), "<p>a<u>bc<br>de</u>f</p>");
    }

    #[test]
    fn test_wrap_range_partial_selection_rejected() {
        let mut tree = DocumentTree::from_markup("<p>abc</p><p>def</p>");
        let leaves = tree.text_leaves();
        let result = tree.wrap_range(
            Position::new(leaves[0], 1),
            Position::new(leaves[1], 1),
            NodeKind::element("u"),
        );
        assert!(matches!(result, Err(TreeError::PartialSelection)));
        assert_eq!(tree.to_markup(), "<p>abc</p><p>def</p>");
    }

    #[test]
    fn test_wrap_range_inverted_rejected() {
        let mut tree = DocumentTree::from_markup("abcdef");
        let leaf = tree.text_leaves()[0];
        let result =
            tree.wrap_range(Position::new(leaf, 4), Position::new(leaf, 1), NodeKind::element("u"));
        assert!(matches!(result, Err(TreeError::InvertedRange)));
    }

    #[test]
    fn test_highlight_serializes_transparently() {
        let mut tree = DocumentTree::from_markup("<p>0123456789</p>");
        let leaf = tree.text_leaves()[0];
        tree.wrap_range(
            Position::new(leaf, 0),
            Position::new(leaf, 4),
            NodeKind::Highlight { color: "#ff000055".into() },
        )
        .unwrap();
        assert_eq!(tree.to_markup(), "<p>0123456789</p>");
    }

    #[test]
    fn test_unwrap_restores_children_in_place() {
        let mut tree = DocumentTree::from_markup("<p>0123456789</p>");
        let leaf = tree.text_leaves()[0];
        let wrapper = tree
            .wrap_range(Position::new(leaf, 2), Position::new(leaf, 5), NodeKind::element("mark"))
            .unwrap();
        tree.unwrap(wrapper).unwrap();
        assert!(!tree.contains(wrapper));
        assert_eq!(tree.to_markup(), "<p>0123456789</p>");
        assert_eq!(tree.text_leaves().len(), 3);

        let p = tree.children_of(tree.root())[0];
        tree.merge_text_siblings(p);
        assert_eq!(tree.text_leaves().len(), 1);
        assert_eq!(tree.to_markup(), "<p>0123456789</p>");
    }

    #[test]
    fn test_remove_and_slot_reuse() {
        let mut tree = DocumentTree::from_markup("<p>a</p>");
        let p = tree.children_of(tree.root())[0];
        tree.remove(p).unwrap();
        assert!(!tree.contains(p));
        let fresh = tree.append(tree.root(), NodeKind::Text("b".into())).unwrap();
        assert_ne!(fresh, p);
        assert_eq!(tree.to_markup(), "b");
        assert!(matches!(tree.remove(tree.root()), Err(TreeError::RootMutation)));
    }

    #[test]
    fn test_rendered_text_breaks_blocks() {
        let tree = DocumentTree::from_markup("<p>hello</p><p>world</p>x<br>y");
        assert_eq!(tree.rendered_text(), "hello\nworld\nx\ny");
    }

    #[test]
    fn test_offset_mapping_over_document_tree() {
        let tree = DocumentTree::from_markup("<p>ab<i>cd</i></p><p>ef</p>");
        for offset in 0..=6 {
            let pos = offset_to_position(&tree, offset).unwrap();
            assert_eq!(position_to_offset(&tree, pos.node, pos.offset), offset);
        }
        assert!(offset_to_position(&tree, 7).is_none());
    }
}
