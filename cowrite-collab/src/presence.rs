//! Remote presence: carets and selection highlights of other participants.
//!
//! ```text
//! cursor msg ────► render_cursor ────► caret marker (2px × line height)
//! selection msg ─► render_selection ─► highlight wrapper (#rrggbb55)
//! disconnect ────► remove_participant
//! ```
//!
//! Each participant owns at most one caret marker and one highlight
//! wrapper at a time. Rendering a selection always tears the previous
//! wrapper down first.

use std::collections::HashMap;

use cowrite_core::{CaretPosition, EditingSurface, Position, SurfaceNode, TextTree, TreeError};

use crate::session::{tint, ParticipantId};

// ───────────────────────────────────────────────────────────────────
// Registry
// ───────────────────────────────────────────────────────────────────

/// Render state kept for one remote participant.
#[derive(Debug, Clone)]
pub struct RemoteParticipant<M, N> {
    pub color: String,
    pub caret: Option<M>,
    pub highlight: Option<N>,
}

impl<M, N> RemoteParticipant<M, N> {
    fn new(color: &str) -> Self {
        Self {
            color: color.to_string(),
            caret: None,
            highlight: None,
        }
    }
}

type Participant<S> = RemoteParticipant<<S as EditingSurface>::Marker, SurfaceNode<S>>;

/// Draws remote participants onto an editing surface.
pub struct PresenceRenderer<S: EditingSurface> {
    participants: HashMap<ParticipantId, Participant<S>>,
}

impl<S: EditingSurface> Default for PresenceRenderer<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: EditingSurface> PresenceRenderer<S> {
    pub fn new() -> Self {
        Self {
            participants: HashMap::new(),
        }
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant<S>> {
        self.participants.get(id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Create or move a participant's caret marker.
    pub fn render_cursor(
        &mut self,
        surface: &mut S,
        id: &ParticipantId,
        position: CaretPosition,
        color: &str,
    ) {
        let participant = self
            .participants
            .entry(id.clone())
            .or_insert_with(|| RemoteParticipant::new(color));

        if participant.color != color {
            if let Some(old) = participant.caret.take() {
                surface.remove_caret_marker(old);
            }
            participant.color = color.to_string();
        }

        let marker = match participant.caret {
            Some(marker) => marker,
            None => {
                log::debug!("Creating caret for {id}");
                let marker = surface.create_caret_marker(color);
                participant.caret = Some(marker);
                marker
            }
        };
        surface.move_caret_marker(marker, position);
        log::trace!("Caret {id} at ({}, {})", position.x, position.y);
    }

    /// Replace a participant's selection highlight.
    ///
    /// Offsets may arrive in either order. Collapsed ranges, offsets past
    /// the end of the document and ranges the tree cannot wrap leave the
    /// participant without a highlight.
    pub fn render_selection(
        &mut self,
        surface: &mut S,
        id: &ParticipantId,
        start: usize,
        end: usize,
        color: &str,
    ) {
        let participant = self
            .participants
            .entry(id.clone())
            .or_insert_with(|| RemoteParticipant::new(color));
        participant.color = color.to_string();

        if let Some(old) = participant.highlight.take() {
            teardown_highlight(surface, old);
        }

        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        if start == end {
            return;
        }

        let Some((from, to)) = resolve_range(surface.tree(), start, end) else {
            log::debug!("Selection {start}..{end} of {id} is out of range");
            return;
        };

        match surface.wrap_highlight(from, to, &tint(color)) {
            Ok(wrapper) => participant.highlight = Some(wrapper),
            Err(e) => log::debug!("Skipping selection {start}..{end} of {id}: {e}"),
        }
    }

    /// Tear down everything drawn for a participant and forget it.
    pub fn remove_participant(&mut self, surface: &mut S, id: &ParticipantId) -> bool {
        let Some(participant) = self.participants.remove(id) else {
            return false;
        };
        if let Some(marker) = participant.caret {
            surface.remove_caret_marker(marker);
        }
        if let Some(wrapper) = participant.highlight {
            teardown_highlight(surface, wrapper);
        }
        log::debug!("Removed participant {id}");
        true
    }
}

fn teardown_highlight<S: EditingSurface>(surface: &mut S, wrapper: SurfaceNode<S>) {
    match surface.unwrap_highlight(wrapper) {
        Ok(()) => {}
        // Already gone with a content replacement.
        Err(TreeError::StaleNode) => {}
        Err(e) => log::debug!("Failed to remove highlight: {e}"),
    }
}

// ───────────────────────────────────────────────────────────────────
// Offset resolution
// ───────────────────────────────────────────────────────────────────

/// Resolve both ends of a range in one scan over the text leaves.
///
/// Each offset lands in the first leaf whose inclusive range contains it.
fn resolve_range<T: TextTree>(
    tree: &T,
    start: usize,
    end: usize,
) -> Option<(Position<T::Node>, Position<T::Node>)> {
    let mut leaves = Vec::new();
    collect_leaves(tree, tree.root(), &mut leaves);

    let mut from = None;
    let mut before = 0;
    for leaf in leaves {
        let len = tree.text_len(leaf);
        if from.is_none() && start <= before + len {
            from = Some(Position::new(leaf, start - before));
        }
        if end <= before + len {
            return from.map(|f| (f, Position::new(leaf, end - before)));
        }
        before += len;
    }
    None
}

fn collect_leaves<T: TextTree>(tree: &T, node: T::Node, out: &mut Vec<T::Node>) {
    if tree.is_text(node) {
        out.push(node);
        return;
    }
    for &child in tree.children(node) {
        collect_leaves(tree, child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowrite_core::{offset_to_position, DocumentSurface};

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    #[test]
    fn test_resolve_range_matches_offset_mapper() {
        let surface = DocumentSurface::with_content("<p>abc<b>de</b></p><p>fgh</p>");
        let tree = surface.document();
        for start in 0..=8 {
            for end in start..=8 {
                let (s, e) = resolve_range(tree, start, end).unwrap();
                assert_eq!(Some(s), offset_to_position(tree, start));
                assert_eq!(Some(e), offset_to_position(tree, end));
            }
        }
        assert!(resolve_range(tree, 2, 9).is_none());
    }

    #[test]
    fn test_render_cursor_creates_then_moves() {
        let mut surface = DocumentSurface::new();
        let mut presence = PresenceRenderer::new();
        presence.render_cursor(&mut surface, &pid("b"), CaretPosition::new(8.0, 0.0), "#ff0000");
        presence.render_cursor(&mut surface, &pid("b"), CaretPosition::new(16.0, 16.0), "#ff0000");
        assert_eq!(surface.marker_count(), 1);

        let marker = presence.participant(&pid("b")).unwrap().caret.unwrap();
        assert_eq!(surface.marker(marker).unwrap().position, CaretPosition::new(16.0, 16.0));
        assert_eq!(surface.marker(marker).unwrap().color, "#ff0000");
    }

    #[test]
    fn test_render_cursor_color_change_recreates_marker() {
        let mut surface = DocumentSurface::new();
        let mut presence = PresenceRenderer::new();
        presence.render_cursor(&mut surface, &pid("b"), CaretPosition::default(), "#ff0000");
        presence.render_cursor(&mut surface, &pid("b"), CaretPosition::default(), "#00ff00");
        assert_eq!(surface.marker_count(), 1);
        let marker = presence.participant(&pid("b")).unwrap().caret.unwrap();
        assert_eq!(surface.marker(marker).unwrap().color, "#00ff00");
    }

    #[test]
    fn test_render_selection_single_wrapper_replaced() {
        let mut surface = DocumentSurface::with_content("<p>0123456789</p>");
        let mut presence = PresenceRenderer::new();

        presence.render_selection(&mut surface, &pid("b"), 2, 5, "#ff0000");
        let highlights = surface.highlights();
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].1, "#ff000055");
        let document = surface.document();
        assert_eq!(document.text(document.children_of(highlights[0].0)[0]), Some("234"));

        presence.render_selection(&mut surface, &pid("b"), 6, 8, "#ff0000");
        let highlights = surface.highlights();
        assert_eq!(highlights.len(), 1);
        let document = surface.document();
        assert_eq!(document.text(document.children_of(highlights[0].0)[0]), Some("67"));
        assert_eq!(surface.content(), "<p>0123456789</p>");
    }

    #[test]
    fn test_render_selection_inverted_and_collapsed() {
        let mut surface = DocumentSurface::with_content("<p>0123456789</p>");
        let mut presence = PresenceRenderer::new();

        presence.render_selection(&mut surface, &pid("b"), 5, 2, "#ff0000");
        assert_eq!(surface.highlights().len(), 1);

        presence.render_selection(&mut surface, &pid("b"), 4, 4, "#ff0000");
        assert!(surface.highlights().is_empty());
        assert!(presence.participant(&pid("b")).unwrap().highlight.is_none());
    }

    #[test]
    fn test_render_selection_out_of_range_is_skipped() {
        let mut surface = DocumentSurface::with_content("<p>abc</p>");
        let mut presence = PresenceRenderer::new();
        presence.render_selection(&mut surface, &pid("b"), 1, 40, "#ff0000");
        assert!(surface.highlights().is_empty());
    }

    #[test]
    fn test_render_selection_across_blocks_is_skipped() {
        let mut surface = DocumentSurface::with_content("<p>abc</p><p>def</p>");
        let mut presence = PresenceRenderer::new();
        presence.render_selection(&mut surface, &pid("b"), 1, 5, "#ff0000");
        assert!(surface.highlights().is_empty());
        assert_eq!(surface.content(), "<p>abc</p><p>def</p>");
    }

    #[test]
    fn test_stale_highlight_after_replacement() {
        let mut surface = DocumentSurface::with_content("<p>0123456789</p>");
        let mut presence = PresenceRenderer::new();
        presence.render_selection(&mut surface, &pid("b"), 2, 5, "#ff0000");

        surface.set_content("<p>abcdefghij</p>");
        presence.render_selection(&mut surface, &pid("b"), 1, 3, "#ff0000");
        assert_eq!(surface.highlights().len(), 1);
    }

    #[test]
    fn test_two_participants_keep_separate_highlights() {
        let mut surface = DocumentSurface::with_content("<p>0123456789</p>");
        let mut presence = PresenceRenderer::new();
        presence.render_selection(&mut surface, &pid("a"), 0, 2, "#ff0000");
        presence.render_selection(&mut surface, &pid("b"), 5, 8, "#0000ff");
        assert_eq!(surface.highlights().len(), 2);
        assert_eq!(presence.len(), 2);
    }

    #[test]
    fn test_remove_participant() {
        let mut surface = DocumentSurface::with_content("<p>0123456789</p>");
        let mut presence = PresenceRenderer::new();
        presence.render_cursor(&mut surface, &pid("b"), CaretPosition::default(), "#ff0000");
        presence.render_selection(&mut surface, &pid("b"), 2, 5, "#ff0000");

        assert!(presence.remove_participant(&mut surface, &pid("b")));
        assert_eq!(surface.marker_count(), 0);
        assert!(surface.highlights().is_empty());
        assert_eq!(surface.document().text_leaves().len(), 1);
        assert!(presence.is_empty());
        assert!(!presence.remove_participant(&mut surface, &pid("b")));
    }
}
