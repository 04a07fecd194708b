//! Document synchronization: last-applied-wins.
//!
//! ```text
//!  remote update ──► apply_remote_update ──► surface.set_content
//!                          │  (caret captured before, restored after)
//!                          ▼
//!                      snapshot
//!                          ▲
//!  local edit ──────► apply_local_edit ──► update + cursor + selection
//!                          │
//!                          ▼
//!                    SnapshotStore ("autosave")
//! ```
//!
//! Concurrent edits are never merged. Whichever `update` is applied last
//! replaces the document wholesale.

use cowrite_core::{
    document_len, offset_to_position, position_to_offset, EditingSurface, FormatCommand, Range,
    TextTree, TreeError,
};

use crate::protocol::Message;
use crate::session::SessionContext;
use crate::store::SnapshotStore;

/// How the local caret survives a remote content replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaretRestore {
    /// Reuse the captured node handles when they outlive the replacement.
    /// A full replacement invalidates every handle, so this is best effort.
    #[default]
    NodeIdentity,
    /// Capture linear offsets and map them back into the new tree.
    LinearOffset,
}

/// Caret captured before a replacement.
enum SavedCaret<N> {
    Nodes(Range<N>),
    Offsets(usize, usize),
}

/// Owns the current document snapshot and its persistence.
pub struct SyncEngine<St> {
    snapshot: String,
    store: St,
    key: String,
    word_count: usize,
    caret_restore: CaretRestore,
}

impl<St: SnapshotStore> SyncEngine<St> {
    /// Initialise from the store, falling back to whatever the surface
    /// already shows.
    pub fn new<S: EditingSurface>(surface: &mut S, store: St, key: impl Into<String>) -> Self {
        let key = key.into();
        let snapshot = match store.load(&key) {
            Ok(Some(saved)) => {
                log::info!("Restored snapshot {key:?} ({} bytes)", saved.len());
                surface.set_content(&saved);
                saved
            }
            Ok(None) => surface.content(),
            Err(e) => {
                log::warn!("Failed to load snapshot {key:?}: {e}");
                surface.content()
            }
        };

        Self {
            snapshot,
            store,
            key,
            word_count: count_words(&surface.plain_text()),
            caret_restore: CaretRestore::default(),
        }
    }

    pub fn with_caret_restore(mut self, policy: CaretRestore) -> Self {
        self.caret_restore = policy;
        self
    }

    pub fn snapshot(&self) -> &str {
        &self.snapshot
    }

    pub fn word_count(&self) -> usize {
        self.word_count
    }

    pub fn caret_restore(&self) -> CaretRestore {
        self.caret_restore
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    /// Replace the local document with remote content.
    ///
    /// Returns `false` when the content equals the current snapshot, in
    /// which case nothing is touched.
    pub fn apply_remote_update<S: EditingSurface>(
        &mut self,
        surface: &mut S,
        content: &str,
    ) -> bool {
        if content == self.snapshot {
            return false;
        }

        let saved = self.capture_caret(surface);
        surface.set_content(content);
        self.snapshot = content.to_string();
        if let Some(saved) = saved {
            restore_caret(surface, saved);
        }
        self.word_count = count_words(&surface.plain_text());
        true
    }

    /// Publish the surface's current content after a local edit.
    ///
    /// Emits `update`, then `cursor` and `selection` for the live caret.
    /// Nothing is emitted while unauthorized.
    pub fn apply_local_edit<S: EditingSurface>(
        &mut self,
        ctx: &SessionContext,
        surface: &S,
    ) -> Vec<Message> {
        if !ctx.is_authorized() {
            return Vec::new();
        }

        let mut out = vec![self.publish(ctx, surface)];
        out.extend(cursor_message(ctx, surface));
        out.extend(selection_message(ctx, surface));
        out
    }

    /// Run a format command and publish the result. Presence is not
    /// re-sent for formatting.
    pub fn apply_format_command<S: EditingSurface>(
        &mut self,
        ctx: &SessionContext,
        surface: &mut S,
        command: &FormatCommand,
    ) -> Result<Vec<Message>, TreeError> {
        if !ctx.is_authorized() {
            return Ok(Vec::new());
        }
        surface.execute_command(command)?;
        Ok(vec![self.publish(ctx, surface)])
    }

    fn publish<S: EditingSurface>(&mut self, ctx: &SessionContext, surface: &S) -> Message {
        self.snapshot = surface.content();
        if let Err(e) = self.store.save(&self.key, &self.snapshot) {
            log::warn!("Failed to persist snapshot {:?}: {e}", self.key);
        }
        self.word_count = count_words(&surface.plain_text());
        Message::Update {
            user_id: ctx.participant_id().clone(),
            content: self.snapshot.clone(),
        }
    }

    fn capture_caret<S: EditingSurface>(
        &self,
        surface: &S,
    ) -> Option<SavedCaret<<S::Tree as TextTree>::Node>> {
        let range = surface.selection()?;
        Some(match self.caret_restore {
            CaretRestore::NodeIdentity => SavedCaret::Nodes(range),
            CaretRestore::LinearOffset => {
                let tree = surface.tree();
                SavedCaret::Offsets(
                    position_to_offset(tree, range.start.node, range.start.offset),
                    position_to_offset(tree, range.end.node, range.end.offset),
                )
            }
        })
    }
}

fn restore_caret<S: EditingSurface>(
    surface: &mut S,
    saved: SavedCaret<<S::Tree as TextTree>::Node>,
) {
    let range = match saved {
        SavedCaret::Nodes(range) => {
            let tree = surface.tree();
            if !tree.contains(range.start.node) || !tree.contains(range.end.node) {
                log::debug!("Caret nodes did not survive the update");
                return;
            }
            range
        }
        SavedCaret::Offsets(start, end) => {
            let tree = surface.tree();
            let len = document_len(tree);
            let resolved = offset_to_position(tree, start.min(len))
                .zip(offset_to_position(tree, end.min(len)));
            match resolved {
                Some((s, e)) => Range::new(s, e),
                None => {
                    log::debug!("Caret offsets did not resolve after the update");
                    return;
                }
            }
        }
    };
    surface.set_selection(Some(range));
}

/// `cursor` message for the live caret, if there is one.
pub fn cursor_message<S: EditingSurface>(ctx: &SessionContext, surface: &S) -> Option<Message> {
    let cursor = surface.caret_coords()?;
    Some(Message::Cursor {
        user_id: ctx.participant_id().clone(),
        color: ctx.color().to_string(),
        cursor,
    })
}

/// `selection` message for the live selection, if there is one.
pub fn selection_message<S: EditingSurface>(ctx: &SessionContext, surface: &S) -> Option<Message> {
    let range = surface.selection()?;
    let tree = surface.tree();
    Some(Message::Selection {
        user_id: ctx.participant_id().clone(),
        color: ctx.color().to_string(),
        start_offset: position_to_offset(tree, range.start.node, range.start.offset),
        end_offset: position_to_offset(tree, range.end.node, range.end.offset),
    })
}

/// Whitespace-delimited non-empty tokens.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Color, ParticipantId};
    use crate::store::MemoryStore;
    use cowrite_core::{DocumentSurface, TextInput};

    fn authorized() -> SessionContext {
        let mut ctx =
            SessionContext::with_identity(ParticipantId::from("me"), Color::from("#112233"));
        ctx.set_authorized(true);
        ctx
    }

    fn engine(surface: &mut DocumentSurface) -> SyncEngine<MemoryStore> {
        SyncEngine::new(surface, MemoryStore::new(), "autosave")
    }

    #[test]
    fn test_count_words() {
        assert_eq!(count_words(""), 0);
        assert_eq!(count_words("   \n\t "), 0);
        assert_eq!(count_words("hello   world"), 2);
        assert_eq!(count_words("  a b\nc "), 3);
    }

    #[test]
    fn test_word_count_uses_block_breaks() {
        let mut surface = DocumentSurface::with_content("<p>one</p><p>two</p>");
        let engine = engine(&mut surface);
        assert_eq!(engine.word_count(), 2);
    }

    #[test]
    fn test_new_loads_saved_snapshot() {
        let mut store = MemoryStore::new();
        store.save("autosave", "<p>saved text</p>").unwrap();
        let mut surface = DocumentSurface::new();
        let engine = SyncEngine::new(&mut surface, store, "autosave");
        assert_eq!(engine.snapshot(), "<p>saved text</p>");
        assert_eq!(surface.content(), "<p>saved text</p>");
        assert_eq!(engine.word_count(), 2);
    }

    #[test]
    fn test_remote_update_is_idempotent() {
        let mut surface = DocumentSurface::with_content("<p>a</p>");
        let mut engine = engine(&mut surface);
        assert!(engine.apply_remote_update(&mut surface, "<p>b c</p>"));
        surface.select_offsets(1, 1);
        let before = surface.selection();
        assert!(!engine.apply_remote_update(&mut surface, "<p>b c</p>"));
        assert_eq!(surface.selection(), before);
        assert_eq!(engine.word_count(), 2);
    }

    #[test]
    fn test_last_applied_update_wins() {
        let mut surface = DocumentSurface::new();
        let mut engine = engine(&mut surface);
        engine.apply_remote_update(&mut surface, "<p>from alice</p>");
        engine.apply_remote_update(&mut surface, "<p>from bob</p>");
        assert_eq!(surface.content(), "<p>from bob</p>");
        assert_eq!(engine.snapshot(), "<p>from bob</p>");
    }

    #[test]
    fn test_remote_update_node_identity_loses_caret_on_replacement() {
        let mut surface = DocumentSurface::with_content("<p>hello world</p>");
        let mut engine = engine(&mut surface);
        surface.select_offsets(3, 3);
        assert!(engine.apply_remote_update(&mut surface, "<p>hello there world</p>"));
        assert_eq!(surface.content(), "<p>hello there world</p>");
        assert!(surface.selection().is_none());
    }

    #[test]
    fn test_remote_update_linear_offset_keeps_caret() {
        let mut surface = DocumentSurface::with_content("<p>hello world</p>");
        let mut engine = engine(&mut surface).with_caret_restore(CaretRestore::LinearOffset);
        surface.select_offsets(3, 3);
        engine.apply_remote_update(&mut surface, "<p>hel<b>lo</b> world</p>");
        assert_eq!(surface.selection_offsets(), Some((3, 3)));

        surface.select_offsets(8, 11);
        engine.apply_remote_update(&mut surface, "<p>hi</p>");
        assert_eq!(surface.selection_offsets(), Some((2, 2)));
    }

    #[test]
    fn test_remote_update_does_not_persist() {
        let mut surface = DocumentSurface::new();
        let mut engine = engine(&mut surface);
        engine.apply_remote_update(&mut surface, "<p>remote</p>");
        assert!(engine.store().load("autosave").unwrap().is_none());
    }

    #[test]
    fn test_local_edit_requires_authorization() {
        let mut surface = DocumentSurface::with_content("<p>a</p>");
        let mut engine = engine(&mut surface);
        let ctx = SessionContext::with_identity(ParticipantId::from("me"), Color::from("#112233"));
        assert!(engine.apply_local_edit(&ctx, &surface).is_empty());
        assert!(engine.store().is_empty());
    }

    #[test]
    fn test_local_edit_emits_update_cursor_selection() {
        let ctx = authorized();
        let mut surface = DocumentSurface::with_content("<p>ab</p>");
        surface.set_editable(true);
        let mut engine = engine(&mut surface);
        surface.select_offsets(2, 2);
        surface.input(&TextInput::InsertText("c".into())).unwrap();

        let out = engine.apply_local_edit(&ctx, &surface);
        assert_eq!(out.len(), 3);
        assert_eq!(
            out[0],
            Message::Update {
                user_id: ParticipantId::from("me"),
                content: "<p>abc</p>".into(),
            }
        );
        assert!(matches!(out[1], Message::Cursor { .. }));
        assert_eq!(
            out[2],
            Message::Selection {
                user_id: ParticipantId::from("me"),
                color: "#112233".into(),
                start_offset: 3,
                end_offset: 3,
            }
        );
        assert_eq!(engine.snapshot(), "<p>abc</p>");
        assert_eq!(engine.store().load("autosave").unwrap().as_deref(), Some("<p>abc</p>"));
    }

    #[test]
    fn test_local_edit_without_selection_sends_update_only() {
        let ctx = authorized();
        let mut surface = DocumentSurface::with_content("<p>x</p>");
        let mut engine = engine(&mut surface);
        let out = engine.apply_local_edit(&ctx, &surface);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Message::Update { .. }));
    }

    #[test]
    fn test_format_command_sends_update_only() {
        let ctx = authorized();
        let mut surface = DocumentSurface::with_content("<p>hello world</p>");
        surface.set_editable(true);
        let mut engine = engine(&mut surface);
        surface.select_offsets(0, 5);

        let out = engine
            .apply_format_command(&ctx, &mut surface, &FormatCommand::Bold)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(engine.snapshot(), "<p><b>hello</b> world</p>");
        assert_eq!(engine.word_count(), 2);
    }

    #[test]
    fn test_format_command_unauthorized_is_noop() {
        let ctx = SessionContext::new();
        let mut surface = DocumentSurface::with_content("<p>hello</p>");
        let mut engine = engine(&mut surface);
        surface.select_offsets(0, 5);
        let out = engine
            .apply_format_command(&ctx, &mut surface, &FormatCommand::Italic)
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(surface.content(), "<p>hello</p>");
    }
}
