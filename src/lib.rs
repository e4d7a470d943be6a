//! # smg-rs: Symbolic Memory Graphs in Rust
//!
//! **`smg-rs`** is a safe, in-process library implementing the heap-shape
//! abstraction of a symbolic-execution-based program verifier: it detects
//! runs of structurally identical heap records connected by next (and
//! optionally previous) pointers, folds them into abstract *list segments*
//! annotated with a minimum length, and reverses that folding on demand when
//! a concrete field of a folded segment must be read or written.
//!
//! ## What is a symbolic memory graph?
//!
//! A symbolic memory graph (SMG) represents a heap as objects connected by
//! two edge relations: *has-value* edges give the content of object fields,
//! and *points-to* edges resolve pointer values to their targets. Abstraction
//! swaps O(n) concrete objects for O(1) abstract segments while preserving
//! the values reachable, the identities of pointers, and the nesting
//! invariants of the graph.
//!
//! ## Key Features
//!
//! - **Snapshot semantics**: an [`Smg`][crate::smg::Smg] is a value; every
//!   engine operation takes a borrowed snapshot and returns fresh ones, so
//!   exploration engines can branch freely.
//! - **List abstraction**: [`ListAbstractor`][crate::fold::ListAbstractor]
//!   runs detection, shape verification, candidate refinement, and folding
//!   to a fixed point over one snapshot.
//! - **Materialization**: [`materialize`][crate::materialize::materialize]
//!   peels concrete elements back off, branching into exactly two successor
//!   states at the `0+` boundary.
//! - **Closed object model**: regions and list segments form a tagged sum
//!   type, so every consumption site matches exhaustively.
//!
//! ## Basic Usage
//!
//! ```rust
//! use smg_rs::fold::ListAbstractor;
//! use smg_rs::materialize::materialize;
//! use smg_rs::smg::Smg;
//! use smg_rs::types::{Offset, TargetSpecifier, Value};
//!
//! // Build a uniform singly-linked chain of four 16-byte nodes.
//! let mut smg = Smg::new();
//! let nfo = Offset::new(8);
//! let nodes: Vec<_> = (0..4).map(|_| smg.add_region(16)).collect();
//! for i in 0..4 {
//!     let next = if i + 1 < 4 {
//!         smg.add_pointer(nodes[i + 1], Offset::new(0), TargetSpecifier::Region, 0)
//!     } else {
//!         Value::NULL
//!     };
//!     smg.write_value(nodes[i], nfo, 8, next);
//! }
//! let head = smg.add_pointer(nodes[0], Offset::new(0), TargetSpecifier::Region, 0);
//!
//! // Fold the chain into one abstract segment...
//! let abstractor = ListAbstractor::new(3);
//! let folded = abstractor.find_and_abstract_lists(&smg).unwrap();
//! assert_eq!(folded.valid_objects().len(), 1);
//!
//! // ...and peel one concrete element back off.
//! let states = materialize(&folded, head).unwrap();
//! assert_eq!(states.len(), 1);
//! ```
//!
//! ## Core Components
//!
//! - **[`smg`]**: the heap graph store: objects, has-value edges,
//!   points-to edges, and the folding write-back.
//! - **[`detect`]**, **[`verify`]**, **[`fold`]**: the abstraction pipeline.
//! - **[`materialize`]**: unfolding and `0+` segment removal.
//! - **[`dot`]**: Graphviz rendering of heap snapshots.

pub mod arena;
pub mod debug;
pub mod detect;
pub mod dot;
pub mod error;
pub mod fold;
pub mod materialize;
pub mod object;
pub mod smg;
pub mod types;
pub mod verify;
