//! Error kinds reported by the abstraction engine.
//!
//! Only invariant violations are errors: they mean the store and the engine
//! have diverged, and the caller is expected to abort the affected branch of
//! exploration. The two-way outcome of dereferencing a `0+` segment is *not*
//! an error; it is the two-element result of
//! [`materialize`][crate::materialize::materialize].

use thiserror::Error;

use crate::object::ObjectId;
use crate::types::{Offset, Value};

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum SmgError {
    /// The operation requires a currently-valid list segment.
    #[error("object {0} is not a valid list segment")]
    NotASegment(ObjectId),

    /// The operation requires a segment of minimum length exactly 0.
    #[error("segment {object} has minimum length {min_length}, expected 0")]
    NonEmptySegment { object: ObjectId, min_length: usize },

    /// A segment's recorded next-field offset disagrees with the candidate
    /// hypothesis. The heap state is corrupt.
    #[error("segment {object} records next offset {recorded}, candidate says {candidate}")]
    NextOffsetMismatch {
        object: ObjectId,
        recorded: Offset,
        candidate: Offset,
    },

    /// The operation requires a valid object.
    #[error("object {0} is not valid")]
    InvalidObject(ObjectId),

    /// The operation requires a value with a points-to edge.
    #[error("value {0} is not a pointer")]
    NotAPointer(Value),

    /// Dereference transitions are defined for nesting level 0 only.
    #[error("pointer {value} has nesting level {level}, expected 0")]
    NonZeroNesting { value: Value, level: usize },

    /// Catch-all internal-consistency failure.
    #[error("corrupt heap state: {0}")]
    CorruptState(String),
}
