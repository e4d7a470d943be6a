//! Candidate detection: proposing roots of potential linked chains.

use std::collections::BTreeSet;
use std::fmt;

use log::debug;

use crate::object::{HeapObject, ObjectId};
use crate::smg::Smg;
use crate::types::Offset;

/// A hypothesis that `root` begins a chain linked at the field at `nfo`.
///
/// Candidates are transient: they are produced by one detection pass,
/// consumed by verification and refinement, and own no heap state.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Candidate {
    pub root: ObjectId,
    pub nfo: Offset,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.root, self.nfo)
    }
}

/// Scan the heap for chain-root candidates.
///
/// Existing segments are re-emitted directly at their recorded next offset
/// (this is what lets an already-folded segment grow over newly uniform
/// neighbors). For a region, the first field (by ascending offset) is kept
/// whose pointer leads head-first to a valid same-sized object that itself
/// has such a successor (`followup_has_next_pointer_to_valid`); an object
/// referenced by anything besides a single chain predecessor is not a root.
pub fn collect_candidates(smg: &Smg) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for id in smg.valid_objects() {
        match smg.object(id) {
            HeapObject::Segment(seg) => {
                let candidate = Candidate { root: id, nfo: seg.nfo };
                debug!("candidate (segment): {}", candidate);
                candidates.push(candidate);
            }
            HeapObject::Region { .. } => {
                for edge in smg.edges_of(id) {
                    let Some((_, target)) = smg.successor(id, edge.offset) else {
                        continue;
                    };
                    if target == id {
                        continue;
                    }
                    if !followup_has_next_pointer_to_valid(smg, target, edge.offset) {
                        continue;
                    }
                    if !root_externally_private(smg, id, edge.offset, target) {
                        debug!("rejecting {}: externally referenced", id);
                        break;
                    }
                    let candidate = Candidate {
                        root: id,
                        nfo: edge.offset,
                    };
                    debug!("candidate (region): {}", candidate);
                    candidates.push(candidate);
                    break; // first qualifying field wins
                }
            }
        }
    }
    candidates
}

/// One-step lookahead: the suspected successor must itself expose a pointer
/// at the same offset leading to a valid same-sized object.
fn followup_has_next_pointer_to_valid(smg: &Smg, obj: ObjectId, nfo: Offset) -> bool {
    smg.successor(obj, nfo).is_some()
}

/// Besides the reachable successor (whose back pointer may legitimately
/// target the root), nothing may point at a chain root except possibly its
/// immediate predecessor in the suspected chain: a same-sized object holding
/// the pointer in its own field at `nfo`. Anything else means the object is
/// an interior element reachable from elsewhere, and folding from it would
/// double-count the chain.
fn root_externally_private(smg: &Smg, root: ObjectId, nfo: Offset, successor: ObjectId) -> bool {
    let size = smg.size_of(root);
    let mut predecessors = BTreeSet::new();
    for v in smg.pointers_toward(root) {
        for (owner, offset) in smg.fields_holding(v) {
            if owner == root || owner == successor {
                continue;
            }
            let is_predecessor =
                smg.is_valid(owner) && smg.size_of(owner) == size && offset == nfo;
            if !is_predecessor {
                return false;
            }
            predecessors.insert(owner);
            if predecessors.len() > 1 {
                return false;
            }
        }
    }
    true
}
