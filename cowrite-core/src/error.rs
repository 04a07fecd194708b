use thiserror::Error;

/// Errors raised by tree and surface mutations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Node handle is stale or was removed")]
    StaleNode,

    #[error("Node is not a text leaf")]
    NotText,

    #[error("Offset {offset} out of bounds for text of length {len}")]
    OffsetOutOfBounds { offset: usize, len: usize },

    /// Range boundaries do not share a parent.
    #[error("Range partially selects a non-text node")]
    PartialSelection,

    #[error("Range end precedes its start")]
    InvertedRange,

    #[error("The root container cannot be removed or unwrapped")]
    RootMutation,

    #[error("Node is not a selection highlight")]
    NotHighlight,

    #[error("Surface is read-only")]
    ReadOnly,
}
