use crate::document::{DocumentId, ReadyState};
use xslt_core::bus::BusEvent;
use xslt_core::error::XsltError;

/// Kinds of [`DocumentEvent`] listeners subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChange,
    Complete,
    Error,
    Included,
    Preprocessed,
    Transformed,
}

/// Notification published on a document's event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    /// The document moved to `state`.
    StateChange {
        document: DocumentId,
        state: ReadyState,
    },
    /// Loading (and, for a resolution root, assembly) finished.
    Complete { document: DocumentId },
    Error {
        document: DocumentId,
        error: XsltError,
    },
    /// The document's content was merged into the resolution root `into`.
    Included {
        document: DocumentId,
        into: DocumentId,
    },
    /// The resolution root finished its final namespace fixup and re-parse.
    Preprocessed { document: DocumentId },
    /// A transform with this stylesheet produced a result.
    Transformed { document: DocumentId },
}

impl DocumentEvent {
    pub const fn document(&self) -> DocumentId {
        match self {
            Self::StateChange { document, .. }
            | Self::Complete { document }
            | Self::Error { document, .. }
            | Self::Included { document, .. }
            | Self::Preprocessed { document }
            | Self::Transformed { document } => *document,
        }
    }
}

impl BusEvent for DocumentEvent {
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        match self {
            Self::StateChange { .. } => EventKind::StateChange,
            Self::Complete { .. } => EventKind::Complete,
            Self::Error { .. } => EventKind::Error,
            Self::Included { .. } => EventKind::Included,
            Self::Preprocessed { .. } => EventKind::Preprocessed,
            Self::Transformed { .. } => EventKind::Transformed,
        }
    }

    fn failure(&self) -> Option<&XsltError> {
        match self {
            Self::Error { error, .. } => Some(error),
            _ => None,
        }
    }
}
