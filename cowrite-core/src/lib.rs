//! # cowrite-core — Document model for collaborative rich-text editing
//!
//! ```text
//! markup ──parse──► DocumentTree ──TextTree──► offset mapping
//!                        │
//!                        ▼
//!                 DocumentSurface (EditingSurface)
//!                 selection · carets · highlights
//! ```
//!
//! ## Modules
//!
//! - [`markup`] — lenient markup parser and escaping helpers
//! - [`tree`] — generational arena tree of elements and text leaves
//! - [`offset`] — linear offset ⇄ (leaf, local offset) mapping
//! - [`surface`] — editing surface capability and reference surface

pub mod error;
pub mod markup;
pub mod offset;
pub mod surface;
pub mod tree;

pub use error::TreeError;
pub use offset::{document_len, offset_to_position, position_to_offset, Position, TextTree};
pub use surface::{
    CaretMarker, CaretPosition, DocumentSurface, EditingSurface, FormatCommand, LayoutMetrics,
    MarkerId, Range, SurfaceNode, TextInput,
};
pub use tree::{DocumentTree, NodeId, NodeKind};
