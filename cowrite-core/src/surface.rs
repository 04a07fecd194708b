//! Editing surface capability and the in-memory reference surface.
//!
//! The synchronization layer never touches a concrete widget. It speaks
//! to an [`EditingSurface`]: serialized content in and out, the live
//! selection, caret coordinates, an editable flag, overlay caret markers
//! and selection highlight wrappers.
//!
//! [`DocumentSurface`] implements the capability over a [`DocumentTree`]
//! with a monospace grid layout, which is enough to drive the protocol
//! headless and in tests.

use std::collections::HashMap;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::error::TreeError;
use crate::markup;
use crate::offset::{offset_to_position, position_to_offset, Position, TextTree};
use crate::tree::{byte_index, DocumentTree, NodeId, NodeKind};

/// Caret location relative to the surface's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CaretPosition {
    pub x: f64,
    pub y: f64,
}

impl CaretPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A selection between two tree positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range<N> {
    pub start: Position<N>,
    pub end: Position<N>,
}

impl<N: Copy + Eq> Range<N> {
    pub fn new(start: Position<N>, end: Position<N>) -> Self {
        Self { start, end }
    }

    pub fn collapsed(at: Position<N>) -> Self {
        Self { start: at, end: at }
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }
}

/// Rich-text commands understood by the surface's command executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatCommand {
    Bold,
    Italic,
    Underline,
    StrikeThrough,
    ForeColor(String),
    HiliteColor(String),
}

impl FormatCommand {
    /// Parse an editor command name with its optional value.
    pub fn parse(command: &str, value: Option<&str>) -> Option<Self> {
        match (command, value) {
            ("bold", _) => Some(Self::Bold),
            ("italic", _) => Some(Self::Italic),
            ("underline", _) => Some(Self::Underline),
            ("strikeThrough", _) => Some(Self::StrikeThrough),
            ("foreColor", Some(color)) => Some(Self::ForeColor(color.to_string())),
            ("hiliteColor", Some(color)) => Some(Self::HiliteColor(color.to_string())),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bold => "bold",
            Self::Italic => "italic",
            Self::Underline => "underline",
            Self::StrikeThrough => "strikeThrough",
            Self::ForeColor(_) => "foreColor",
            Self::HiliteColor(_) => "hiliteColor",
        }
    }

    fn wrapper(&self) -> NodeKind {
        let styled = |property: &str, value: &str| NodeKind::Element {
            tag: "span".to_string(),
            attrs: vec![("style".to_string(), format!("{property}: {value}"))],
        };
        match self {
            Self::Bold => NodeKind::element("b"),
            Self::Italic => NodeKind::element("i"),
            Self::Underline => NodeKind::element("u"),
            Self::StrikeThrough => NodeKind::element("s"),
            Self::ForeColor(color) => styled("color", color),
            Self::HiliteColor(color) => styled("background-color", color),
        }
    }
}

/// Local text input applied at the live selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextInput {
    /// Replace the selection with text.
    InsertText(String),
    /// Delete the selection, or the character before a collapsed caret.
    DeleteBackward,
    /// Replace the whole document (paste-over, load).
    SetContent(String),
}

/// Node handle type of a surface's tree.
pub type SurfaceNode<S> = <<S as EditingSurface>::Tree as TextTree>::Node;

/// What the synchronization layer needs from an editing surface.
pub trait EditingSurface {
    type Tree: TextTree;
    type Marker: Copy + Eq + Debug;

    fn tree(&self) -> &Self::Tree;

    /// Serialized document content.
    fn content(&self) -> String;

    /// Replace the document wholesale. The selection is dropped.
    fn set_content(&mut self, markup: &str);

    /// Rendered text with line breaks between blocks.
    fn plain_text(&self) -> String;

    fn selection(&self) -> Option<Range<<Self::Tree as TextTree>::Node>>;

    fn set_selection(&mut self, range: Option<Range<<Self::Tree as TextTree>::Node>>);

    /// Coordinates of the collapsed selection start.
    fn caret_coords(&self) -> Option<CaretPosition>;

    fn is_editable(&self) -> bool;

    fn set_editable(&mut self, editable: bool);

    /// Apply local input; `Ok(true)` when the content changed.
    fn input(&mut self, input: &TextInput) -> Result<bool, TreeError>;

    /// Run a rich-text command on the selection.
    fn execute_command(&mut self, command: &FormatCommand) -> Result<bool, TreeError>;

    fn create_caret_marker(&mut self, color: &str) -> Self::Marker;

    fn move_caret_marker(&mut self, marker: Self::Marker, position: CaretPosition);

    fn remove_caret_marker(&mut self, marker: Self::Marker);

    /// Wrap the content between two leaf positions in a tinted highlight.
    fn wrap_highlight(
        &mut self,
        start: Position<<Self::Tree as TextTree>::Node>,
        end: Position<<Self::Tree as TextTree>::Node>,
        color: &str,
    ) -> Result<<Self::Tree as TextTree>::Node, TreeError>;

    /// Remove a highlight, restoring its content in place.
    fn unwrap_highlight(
        &mut self,
        wrapper: <Self::Tree as TextTree>::Node,
    ) -> Result<(), TreeError>;
}

/// Monospace grid used to place carets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutMetrics {
    pub char_width: f64,
    pub line_height: f64,
}

impl Default for LayoutMetrics {
    fn default() -> Self {
        Self {
            char_width: 8.0,
            line_height: 16.0,
        }
    }
}

/// Handle to an overlay caret marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerId(u64);

/// A thin absolutely-positioned bar drawn over the document.
#[derive(Debug, Clone, PartialEq)]
pub struct CaretMarker {
    pub color: String,
    pub position: CaretPosition,
    pub width: f64,
    pub height: f64,
}

/// In-memory editing surface over a [`DocumentTree`].
#[derive(Debug, Clone)]
pub struct DocumentSurface {
    tree: DocumentTree,
    selection: Option<Range<NodeId>>,
    editable: bool,
    markers: HashMap<MarkerId, CaretMarker>,
    next_marker: u64,
    metrics: LayoutMetrics,
}

impl Default for DocumentSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentSurface {
    /// Create an empty, read-only surface.
    pub fn new() -> Self {
        Self::with_metrics(LayoutMetrics::default())
    }

    pub fn with_metrics(metrics: LayoutMetrics) -> Self {
        Self {
            tree: DocumentTree::new(),
            selection: None,
            editable: false,
            markers: HashMap::new(),
            next_marker: 0,
            metrics,
        }
    }

    pub fn with_content(markup: &str) -> Self {
        let mut surface = Self::new();
        surface.set_content(markup);
        surface
    }

    pub fn document(&self) -> &DocumentTree {
        &self.tree
    }

    pub fn metrics(&self) -> LayoutMetrics {
        self.metrics
    }

    pub fn marker(&self, id: MarkerId) -> Option<&CaretMarker> {
        self.markers.get(&id)
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Live highlight wrappers with their tint, in document order.
    pub fn highlights(&self) -> Vec<(NodeId, String)> {
        let mut found = Vec::new();
        self.collect_highlights(self.tree.root(), &mut found);
        found
    }

    /// Linear offsets of the current selection.
    pub fn selection_offsets(&self) -> Option<(usize, usize)> {
        let range = self.selection()?;
        Some((
            position_to_offset(&self.tree, range.start.node, range.start.offset),
            position_to_offset(&self.tree, range.end.node, range.end.offset),
        ))
    }

    /// Select between two linear offsets. Unresolvable offsets clear the
    /// selection.
    pub fn select_offsets(&mut self, start: usize, end: usize) {
        let range = offset_to_position(&self.tree, start)
            .zip(offset_to_position(&self.tree, end))
            .map(|(s, e)| Range::new(s, e));
        self.selection = range;
    }

    /// Nearest ancestor of `first` of the given kind that also contains `last`.
    fn enclosing(&self, first: NodeId, last: NodeId, kind: &NodeKind) -> Option<NodeId> {
        let root = self.tree.root();
        let mut current = self.tree.parent_of(first);
        while let Some(node) = current.filter(|&n| n != root) {
            if self.tree.kind(node) == Some(kind) && self.is_within(last, node) {
                return Some(node);
            }
            current = self.tree.parent_of(node);
        }
        None
    }

    fn is_within(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.tree.parent_of(n);
        }
        false
    }

    fn collect_highlights(&self, id: NodeId, found: &mut Vec<(NodeId, String)>) {
        if let Some(NodeKind::Highlight { color }) = self.tree.kind(id) {
            found.push((id, color.clone()));
        }
        for &child in self.tree.children_of(id) {
            self.collect_highlights(child, found);
        }
    }

    /// Remove every character in `[start, end)` of the text projection.
    fn delete_linear(&mut self, start: usize, end: usize) -> Result<bool, TreeError> {
        if start >= end {
            return Ok(false);
        }

        let mut spans = Vec::new();
        let mut before = 0;
        for leaf in self.tree.text_leaves() {
            let len = self.tree.text_len(leaf);
            spans.push((leaf, before, len));
            before += len;
        }

        let mut changed = false;
        for (leaf, before, len) in spans {
            let from = start.max(before);
            let to = end.min(before + len);
            if from >= to {
                continue;
            }
            let text = self.tree.text(leaf).ok_or(TreeError::StaleNode)?;
            let (a, b) = (byte_index(text, from - before), byte_index(text, to - before));
            let remaining = format!("{}{}", &text[..a], &text[b..]);
            self.tree.set_text(leaf, remaining)?;
            changed = true;
        }
        Ok(changed)
    }

    fn insert_text(&mut self, text: &str) -> Result<bool, TreeError> {
        let (start, end) = self
            .selection_offsets()
            .map(|(s, e)| (s.min(e), s.max(e)))
            .unwrap_or_else(|| {
                let len = self.tree.text_len(self.tree.root());
                (len, len)
            });
        let deleted = self.delete_linear(start, end)?;

        let position = match offset_to_position(&self.tree, start) {
            Some(position) => position,
            None => {
                let leaf = self.tree.append(self.tree.root(), NodeKind::Text(String::new()))?;
                Position::new(leaf, 0)
            }
        };

        let current = self.tree.text(position.node).ok_or(TreeError::StaleNode)?;
        let at = byte_index(current, position.offset);
        let updated = format!("{}{}{}", &current[..at], text, &current[at..]);
        self.tree.set_text(position.node, updated)?;

        let caret = Position::new(position.node, position.offset + text.chars().count());
        self.selection = Some(Range::collapsed(caret));
        Ok(deleted || !text.is_empty())
    }

    fn delete_backward(&mut self) -> Result<bool, TreeError> {
        let Some((start, end)) = self.selection_offsets() else {
            return Ok(false);
        };
        let (start, end) = (start.min(end), start.max(end));
        let (from, to) = if start == end {
            if start == 0 {
                return Ok(false);
            }
            (start - 1, start)
        } else {
            (start, end)
        };

        let changed = self.delete_linear(from, to)?;
        self.select_offsets(from, from);
        Ok(changed)
    }

    /// Line and column of a leaf position on the monospace grid.
    fn line_column(&self, target: Position<NodeId>) -> (usize, usize) {
        let mut grid = GridCursor::default();
        self.locate(self.tree.root(), target, &mut grid);
        (grid.line, grid.column)
    }

    fn locate(&self, id: NodeId, target: Position<NodeId>, grid: &mut GridCursor) -> bool {
        match self.tree.kind(id) {
            Some(NodeKind::Text(text)) => {
                let len = text.chars().count();
                if id == target.node {
                    grid.column += target.offset.min(len);
                    return true;
                }
                grid.column += len;
                false
            }
            Some(NodeKind::Element { tag, .. }) if tag == "br" => {
                grid.line += 1;
                grid.column = 0;
                false
            }
            Some(NodeKind::Element { tag, .. })
                if id != self.tree.root() && markup::is_block_element(tag) =>
            {
                grid.break_line();
                for &child in self.tree.children_of(id) {
                    if self.locate(child, target, grid) {
                        return true;
                    }
                }
                grid.break_line();
                false
            }
            Some(_) => self
                .tree
                .children_of(id)
                .iter()
                .any(|&child| self.locate(child, target, grid)),
            None => false,
        }
    }
}

#[derive(Debug, Default)]
struct GridCursor {
    line: usize,
    column: usize,
}

impl GridCursor {
    fn break_line(&mut self) {
        if self.column > 0 {
            self.line += 1;
            self.column = 0;
        }
    }
}

impl EditingSurface for DocumentSurface {
    type Tree = DocumentTree;
    type Marker = MarkerId;

    fn tree(&self) -> &DocumentTree {
        &self.tree
    }

    fn content(&self) -> String {
        self.tree.to_markup()
    }

    fn set_content(&mut self, markup: &str) {
        self.tree.set_markup(markup);
        self.selection = None;
    }

    fn plain_text(&self) -> String {
        self.tree.rendered_text()
    }

    fn selection(&self) -> Option<Range<NodeId>> {
        self.selection
            .filter(|r| self.tree.is_text(r.start.node) && self.tree.is_text(r.end.node))
    }

    fn set_selection(&mut self, range: Option<Range<NodeId>>) {
        self.selection = range.and_then(|r| {
            let start_len = self.tree.text(r.start.node)?.chars().count();
            let end_len = self.tree.text(r.end.node)?.chars().count();
            Some(Range::new(
                Position::new(r.start.node, r.start.offset.min(start_len)),
                Position::new(r.end.node, r.end.offset.min(end_len)),
            ))
        });
    }

    fn caret_coords(&self) -> Option<CaretPosition> {
        let range = self.selection()?;
        let (line, column) = self.line_column(range.start);
        Some(CaretPosition::new(
            column as f64 * self.metrics.char_width,
            line as f64 * self.metrics.line_height,
        ))
    }

    fn is_editable(&self) -> bool {
        self.editable
    }

    fn set_editable(&mut self, editable: bool) {
        self.editable = editable;
    }

    fn input(&mut self, input: &TextInput) -> Result<bool, TreeError> {
        if !self.editable {
            return Err(TreeError::ReadOnly);
        }
        match input {
            TextInput::InsertText(text) => self.insert_text(text),
            TextInput::DeleteBackward => self.delete_backward(),
            TextInput::SetContent(markup) => {
                let changed = self.content() != *markup;
                self.set_content(markup);
                Ok(changed)
            }
        }
    }

    fn execute_command(&mut self, command: &FormatCommand) -> Result<bool, TreeError> {
        if !self.editable {
            return Err(TreeError::ReadOnly);
        }
        let Some(range) = self.selection().filter(|r| !r.is_collapsed()) else {
            return Ok(false);
        };
        let Some((start, end)) = self.selection_offsets() else {
            return Ok(false);
        };

        let wrapper = command.wrapper();
        match self.enclosing(range.start.node, range.end.node, &wrapper) {
            Some(existing) => {
                let parent = self.tree.parent_of(existing).ok_or(TreeError::StaleNode)?;
                self.tree.unwrap(existing)?;
                self.tree.merge_text_siblings(parent);
            }
            None => {
                self.tree.wrap_range(range.start, range.end, wrapper)?;
            }
        }
        self.select_offsets(start, end);
        Ok(true)
    }

    fn create_caret_marker(&mut self, color: &str) -> MarkerId {
        let id = MarkerId(self.next_marker);
        self.next_marker += 1;
        self.markers.insert(
            id,
            CaretMarker {
                color: color.to_string(),
                position: CaretPosition::default(),
                width: 2.0,
                height: self.metrics.line_height,
            },
        );
        id
    }

    fn move_caret_marker(&mut self, marker: MarkerId, position: CaretPosition) {
        if let Some(m) = self.markers.get_mut(&marker) {
            m.position = position;
        }
    }

    fn remove_caret_marker(&mut self, marker: MarkerId) {
        self.markers.remove(&marker);
    }

    fn wrap_highlight(
        &mut self,
        start: Position<NodeId>,
        end: Position<NodeId>,
        color: &str,
    ) -> Result<NodeId, TreeError> {
        let saved = self.selection_offsets();
        let wrapper = self.tree.wrap_range(
            start,
            end,
            NodeKind::Highlight {
                color: color.to_string(),
            },
        )?;
        if let Some((s, e)) = saved {
            self.select_offsets(s, e);
        }
        Ok(wrapper)
    }

    fn unwrap_highlight(&mut self, wrapper: NodeId) -> Result<(), TreeError> {
        match self.tree.kind(wrapper) {
            Some(NodeKind::Highlight { .. }) => {}
            Some(_) => return Err(TreeError::NotHighlight),
            None => return Err(TreeError::StaleNode),
        }
        let saved = self.selection_offsets();
        let parent = self.tree.parent_of(wrapper).ok_or(TreeError::StaleNode)?;
        self.tree.unwrap(wrapper)?;
        self.tree.merge_text_siblings(parent);
        if let Some((s, e)) = saved {
            self.select_offsets(s, e);
        }
        Ok(())
    }
}
