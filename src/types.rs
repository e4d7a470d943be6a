//! Type-safe wrappers for byte offsets, value handles, and pointer target
//! specifiers.
//!
//! These newtypes enforce a compile-time distinction between the different
//! integer-like quantities flowing through the heap graph, preventing the
//! classic "offset passed where an object id was expected" mistakes.

use std::fmt;

/// A byte offset within a heap object.
///
/// Field offsets are plain byte distances from the start of the object.
/// The list-link offsets (`nfo`, `pfo`) and the head offset (`hfo`) are all
/// values of this type.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Offset(u64);

impl Offset {
    pub const fn new(bytes: u64) -> Self {
        Offset(bytes)
    }

    /// Return the raw byte distance.
    pub const fn bytes(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}", self.0)
    }
}

impl From<u64> for Offset {
    fn from(bytes: u64) -> Self {
        Offset(bytes)
    }
}

/// A handle to a symbolic or concrete datum stored in the heap.
///
/// Values are opaque identifiers; what is known about a value (its nesting
/// level, an optional known constant, a points-to edge) lives in the
/// [`Smg`][crate::smg::Smg]. Handle 0 is the null address.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Value(u32);

impl Value {
    /// The null address. Points at the null object, which is never valid.
    pub const NULL: Value = Value(0);

    pub(crate) const fn new(index: u32) -> Self {
        Value(index)
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Return the index of the handle.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "v{}", self.0)
        }
    }
}

/// How a pointer resolves against its target object.
///
/// For concrete regions every pointer is a whole-region (`Region`) pointer.
/// Pointers toward an abstract list segment record which end of the segment
/// they denote: the `First` element, the `Last` element (doubly-linked
/// segments only), or some interior element (`All`).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TargetSpecifier {
    /// The whole (concrete) region.
    Region,
    /// The first element of a segment.
    First,
    /// The last element of a segment.
    Last,
    /// Some element of a segment, not pinned to either end.
    All,
}

impl fmt::Display for TargetSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSpecifier::Region => write!(f, "reg"),
            TargetSpecifier::First => write!(f, "fst"),
            TargetSpecifier::Last => write!(f, "lst"),
            TargetSpecifier::All => write!(f, "all"),
        }
    }
}
