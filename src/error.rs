//! Errors reported by the engine.
//!
//! Every error is recoverable at the call boundary: the call that produced
//! it is rejected and the shared document state is left untouched.
//! Duplicate delivery of an operation is never an error.

use thiserror::Error;

use crate::crdt::primitives::ElementId;
use crate::session::DocumentId;
use crate::session::ParticipantId;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A visible position outside of the current document.
    #[error("position {position} out of range (visible length {len})")]
    NotFound { position: usize, len: usize },

    /// A cursor was placed on an identifier this document has never seen.
    #[error("cursor target {0:?} is not part of the document")]
    InvalidCursorTarget(ElementId),

    /// A buffered operation waited past the configured ceiling for a
    /// dependency that never arrived.
    #[error("operation {id:?} waits on {missing:?} which never arrived")]
    UnresolvableDependency { id: ElementId, missing: ElementId },

    /// A viewer attempted to mutate the document.
    #[error("participant {participant} is not allowed to edit")]
    Unauthorized { participant: ParticipantId },

    /// The operation violates the identifier allocator's contract.
    #[error("malformed operation {id:?}: {reason}")]
    Malformed { id: ElementId, reason: &'static str },

    #[error("unknown document {0}")]
    UnknownDocument(DocumentId),

    #[error("unknown share code")]
    UnknownShareCode,

    #[error("participant {0} has not joined this document")]
    UnknownParticipant(ParticipantId),
}
