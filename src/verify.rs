//! Shape verification: the three-valued value comparison, the uniform-run
//! walk over a candidate chain, and back-pointer (DLL) detection.

use log::debug;

use crate::error::SmgError;
use crate::object::ObjectId;
use crate::smg::{PointsToEdge, Smg};
use crate::types::{Offset, Value};

/// Outcome of comparing two field values.
///
/// `Incomparable` is a deliberate approximation, not true equality: two
/// unknowns (or two pointers into private, shape-identical sub-heaps) are
/// vacuously compatible for folding purposes. Only `NotEqual` breaks a
/// uniform run.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ValueEq {
    Equal,
    NotEqual,
    Incomparable,
}

impl ValueEq {
    /// Whether this outcome keeps a uniform run alive.
    pub fn is_compatible(self) -> bool {
        self != ValueEq::NotEqual
    }
}

/// Compare two field values.
///
/// Pointer values are equal only if they are literally the same value id.
/// Two *distinct* pointers are `Incomparable` (rather than `NotEqual`) only
/// when each is the sole reference to a valid target and the two targets
/// have the same size and field signature: the remnant of nested sub-heap
/// comparison, which lets a chain of nodes each owning a private sub-chain
/// fold. Non-pointer values compare by known constant where both are known;
/// two unknowns are vacuously compatible.
pub fn compare_values(smg: &Smg, a: Value, b: Value) -> ValueEq {
    if a == b {
        return ValueEq::Equal;
    }
    match (smg.points_to(a), smg.points_to(b)) {
        (Some(pa), Some(pb)) => {
            if pa == pb || private_shape_compatible(smg, &pa, &pb, a, b) {
                ValueEq::Incomparable
            } else {
                ValueEq::NotEqual
            }
        }
        (Some(_), None) | (None, Some(_)) => ValueEq::NotEqual,
        (None, None) => match (smg.constant_of(a), smg.constant_of(b)) {
            (Some(x), Some(y)) => {
                if x == y {
                    ValueEq::Equal
                } else {
                    ValueEq::NotEqual
                }
            }
            (None, None) => ValueEq::Incomparable,
            _ => ValueEq::NotEqual,
        },
    }
}

fn private_shape_compatible(
    smg: &Smg,
    pa: &PointsToEdge,
    pb: &PointsToEdge,
    a: Value,
    b: Value,
) -> bool {
    let (ta, tb) = (pa.target, pb.target);
    if ta == tb {
        return false;
    }
    if !smg.is_valid(ta) || !smg.is_valid(tb) {
        return false;
    }
    if smg.size_of(ta) != smg.size_of(tb) {
        return false;
    }
    if pa.offset != pb.offset || pa.specifier != pb.specifier {
        return false;
    }
    // Each target must be referenced by its pointer alone.
    if smg.pointers_toward(ta) != vec![a] || smg.pointers_toward(tb) != vec![b] {
        return false;
    }
    let signature = |t: ObjectId| -> Vec<(Offset, u64)> {
        smg.edges_of(t).iter().map(|e| (e.offset, e.size)).collect()
    };
    signature(ta) == signature(tb)
}

/// A verified uniform run: a stretch of a candidate chain whose elements all
/// hold compatible values at every field except the link fields, long enough
/// to fold.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UniformRun {
    pub root: ObjectId,
    pub nfo: Offset,
    pub pfo: Option<Offset>,
    /// Concrete element count of the run (segments add their `min_length`).
    pub length: usize,
    /// Number of heap objects spanned by the run.
    pub elements: usize,
}

/// Walk the chain of a candidate and report every uniform run of at least
/// `threshold` concrete elements.
///
/// A field mismatch does not abort the walk: it closes the current run and
/// restarts the comparison baseline at the mismatching element, so foldable
/// *suffixes* of a non-uniform chain are still found.
pub fn check_value_equality(
    smg: &Smg,
    root: ObjectId,
    nfo: Offset,
    pfo: Option<Offset>,
    threshold: usize,
) -> Vec<UniformRun> {
    let chain = chain_of(smg, root, nfo, pfo);

    let mut runs = Vec::new();
    let mut run_start = 0usize;
    let mut run_length = smg.length_contribution(chain[0]);
    let close_run = |start: usize, end: usize, length: usize, runs: &mut Vec<UniformRun>| {
        if length >= threshold && threshold > 0 {
            debug!(
                "uniform run: root {} length {} over {} objects",
                chain[start],
                length,
                end - start
            );
            runs.push(UniformRun {
                root: chain[start],
                nfo,
                pfo,
                length,
                elements: end - start,
            });
        }
    };

    for i in 1..chain.len() {
        if elements_compatible(smg, chain[run_start], chain[i], nfo, pfo) {
            run_length += smg.length_contribution(chain[i]);
        } else {
            debug!(
                "mismatch at {}: run from {} ends, baseline restarts",
                chain[i], chain[run_start]
            );
            close_run(run_start, i, run_length, &mut runs);
            run_start = i;
            run_length = smg.length_contribution(chain[i]);
        }
    }
    close_run(run_start, chain.len(), run_length, &mut runs);

    runs
}

/// The linked chain reachable from `root` at `nfo`: successive valid,
/// same-sized, head-entered objects, stopping at a revisit (cycle) or any
/// segment whose recorded linkage disagrees with the candidate's.
pub(crate) fn chain_of(
    smg: &Smg,
    root: ObjectId,
    nfo: Offset,
    pfo: Option<Offset>,
) -> Vec<ObjectId> {
    let mut chain = vec![root];
    let mut cur = root;
    while let Some((_, next)) = smg.successor(cur, nfo) {
        if chain.contains(&next) {
            break;
        }
        if let Some(seg) = smg.object(next).as_segment() {
            if seg.nfo != nfo || seg.pfo() != pfo {
                break;
            }
        }
        chain.push(next);
        cur = next;
    }
    chain
}

/// Compare all fields of `elem` against the run baseline, excluding the
/// link fields. A field present on one side only is compatible unless it
/// holds a pointer.
fn elements_compatible(
    smg: &Smg,
    baseline: ObjectId,
    elem: ObjectId,
    nfo: Offset,
    pfo: Option<Offset>,
) -> bool {
    let mut offsets: Vec<Offset> = smg
        .edges_of(baseline)
        .iter()
        .chain(smg.edges_of(elem).iter())
        .map(|e| e.offset)
        .collect();
    offsets.sort();
    offsets.dedup();

    for offset in offsets {
        if offset == nfo || Some(offset) == pfo {
            continue;
        }
        match (smg.edge_at(baseline, offset), smg.edge_at(elem, offset)) {
            (Some(ea), Some(eb)) => {
                if ea.size != eb.size {
                    return false;
                }
                if !compare_values(smg, ea.value, eb.value).is_compatible() {
                    return false;
                }
            }
            (Some(e), None) | (None, Some(e)) => {
                // The absent side is unknown; only a pointer forces a mismatch.
                if smg.is_pointer(e.value) {
                    return false;
                }
            }
            (None, None) => unreachable!("offset comes from one of the two objects"),
        }
    }
    true
}

/// Determine whether the candidate chain is doubly linked, and at which
/// offset the back pointer lives.
///
/// For a root that is already a segment the recorded kind is authoritative;
/// a recorded next offset disagreeing with the candidate's is a fatal
/// inconsistency. Otherwise the successor's pointer fields (other than the
/// next field) are probed for an offset whose value targets the predecessor
/// at every one of `probe_length` checked positions.
pub fn detect_back_offset(
    smg: &Smg,
    root: ObjectId,
    nfo: Offset,
    probe_length: usize,
) -> Result<Option<Offset>, SmgError> {
    if let Some(seg) = smg.object(root).as_segment() {
        if seg.nfo != nfo {
            return Err(SmgError::NextOffsetMismatch {
                object: root,
                recorded: seg.nfo,
                candidate: nfo,
            });
        }
        return Ok(seg.pfo());
    }

    let Some((_, succ)) = smg.successor(root, nfo) else {
        return Ok(None);
    };
    let size = smg.size_of(root);
    for edge in smg.edges_of(succ) {
        if edge.offset == nfo {
            continue;
        }
        let Some(pt) = smg.points_to(edge.value) else {
            continue;
        };
        if !smg.is_valid(pt.target) || smg.size_of(pt.target) != size {
            continue;
        }
        if back_offset_consistent(smg, root, nfo, edge.offset, probe_length) {
            debug!("detect_back_offset: {} linked back at {}", root, edge.offset);
            return Ok(Some(edge.offset));
        }
    }
    Ok(None)
}

/// Check that the field at `pfo` points at the predecessor for up to
/// `probe_length` consecutive chain positions.
fn back_offset_consistent(
    smg: &Smg,
    root: ObjectId,
    nfo: Offset,
    pfo: Offset,
    probe_length: usize,
) -> bool {
    let mut prev = root;
    let Some((_, mut cur)) = smg.successor(root, nfo) else {
        return false;
    };
    for _ in 0..probe_length {
        let back_ok = smg
            .edge_at(cur, pfo)
            .and_then(|edge| smg.points_to(edge.value))
            .map(|pt| pt.target == prev)
            .unwrap_or(false);
        if !back_ok {
            return false;
        }
        match smg.successor(cur, nfo) {
            Some((_, next)) if next != prev && next != cur => {
                prev = cur;
                cur = next;
            }
            _ => break, // chain ends: consistent so far
        }
    }
    true
}
