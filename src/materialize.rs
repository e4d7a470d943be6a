//! Materialization: reversing abstraction one concrete element at a time.
//!
//! Dereferencing into a segment of positive minimum length peels exactly one
//! concrete region off the near end and yields one successor heap.
//! Dereferencing into a `0+` segment is inherently two-way: the segment
//! either was empty (it is removed and its neighbors spliced together) or it
//! was not (one element materializes, a fresh `0+` remains). Both outcomes
//! are returned; neither is an error.

use log::debug;

use crate::error::SmgError;
use crate::object::{HeapObject, ListKind, ListSegment, ObjectId};
use crate::smg::Smg;
use crate::types::{Offset, TargetSpecifier, Value};

/// Resolve a level-0 pointer into an abstract segment, peeling one concrete
/// element off.
///
/// Returns the successor states paired with the value now denoting the
/// dereferenced location: one state for a segment of positive length, two
/// for a `0+` segment (removed first, then materialized). Materializing an
/// object that is not a currently-valid segment, or through a pointer with
/// nonzero nesting level, is a fatal invariant violation.
pub fn materialize(smg: &Smg, ptr: Value) -> Result<Vec<(Value, Smg)>, SmgError> {
    let pt = smg.points_to(ptr).ok_or(SmgError::NotAPointer(ptr))?;
    let seg_id = pt.target;
    if !smg.is_valid(seg_id) {
        return Err(SmgError::InvalidObject(seg_id));
    }
    let seg = *smg
        .object(seg_id)
        .as_segment()
        .ok_or(SmgError::NotASegment(seg_id))?;
    let level = smg.nesting_level(ptr);
    if level != 0 {
        return Err(SmgError::NonZeroNesting { value: ptr, level });
    }

    debug!("materialize({} -> {} {})", ptr, seg_id, seg);

    if seg.min_length == 0 {
        // The 0+ segment branches: gone, or one element longer.
        let removed = {
            let mut heap = smg.clone();
            let replacement = match seg.kind {
                ListKind::Sll => remove_empty_sll(&mut heap, seg_id)?,
                ListKind::Dll { .. } => {
                    let (next, prev) = remove_empty_dll(&mut heap, seg_id)?;
                    if pt.specifier == TargetSpecifier::Last {
                        prev
                    } else {
                        next
                    }
                }
            };
            debug!("materialize: 0+ branch (a), {} resolves to {}", ptr, replacement);
            (replacement, heap)
        };
        let extended = {
            let mut heap = smg.clone();
            heap.set_min_length(seg_id, 1);
            peel(&mut heap, seg_id, pt.specifier, false)?;
            debug!("materialize: 0+ branch (b), one element peeled");
            (ptr, heap)
        };
        Ok(vec![removed, extended])
    } else {
        let mut heap = smg.clone();
        peel(&mut heap, seg_id, pt.specifier, true)?;
        Ok(vec![(ptr, heap)])
    }
}

/// Peel one concrete element off the end of `seg_id` denoted by `via`,
/// leaving a segment one shorter. When `remove_empty_remainder` is set and
/// the remainder comes out at length 0, it is removed on the spot instead
/// of dangling until a second dereference proves it redundant.
fn peel(
    smg: &mut Smg,
    seg_id: ObjectId,
    via: TargetSpecifier,
    remove_empty_remainder: bool,
) -> Result<ObjectId, SmgError> {
    let seg = *smg
        .object(seg_id)
        .as_segment()
        .ok_or(SmgError::NotASegment(seg_id))?;
    let from_back = matches!(seg.kind, ListKind::Dll { .. }) && via == TargetSpecifier::Last;

    let (region, remainder) = if from_back {
        peel_back(smg, seg_id, seg)?
    } else {
        peel_front(smg, seg_id, seg)?
    };

    if remove_empty_remainder {
        let empty = smg
            .object(remainder)
            .as_segment()
            .map(|s| s.min_length == 0)
            .unwrap_or(false);
        if empty {
            match seg.kind {
                ListKind::Sll => {
                    remove_empty_sll(smg, remainder)?;
                }
                ListKind::Dll { .. } => {
                    remove_empty_dll(smg, remainder)?;
                }
            }
        }
    }
    Ok(region)
}

/// Positive transition, front end: a fresh concrete region takes over the
/// segment's fields and every level-0 pointer; the remainder segment is one
/// shorter and linked behind the region.
fn peel_front(
    smg: &mut Smg,
    seg_id: ObjectId,
    seg: ListSegment,
) -> Result<(ObjectId, ObjectId), SmgError> {
    assert!(seg.min_length >= 1, "Peeling an empty segment");

    let next_edge = smg.edge_at(seg_id, seg.nfo).ok_or_else(|| {
        SmgError::CorruptState(format!("segment {} has no next field", seg_id))
    })?;
    let ptr_size = next_edge.size;

    let region = smg.add_object(HeapObject::Region {
        size: seg.size,
        offset: seg.hfo,
    });
    // Provisional: the next field still holds the segment's outgoing value
    // until the fresh link is written below.
    smg.copy_all_values(seg_id, region);

    let remainder = smg.add_object(HeapObject::Segment(ListSegment {
        min_length: seg.min_length - 1,
        ..seg
    }));
    smg.copy_all_values(seg_id, remainder);

    // Materialization resolves to the nearest element: level-0 pointers move
    // to the region, deeper ones come one step closer. Last pointers resolve
    // to the far end and stay with the remainder.
    for v in smg.pointers_toward(seg_id) {
        let pt = smg.points_to(v).expect("pointer has an edge");
        let level = smg.nesting_level(v);
        match pt.specifier {
            TargetSpecifier::Last => {
                smg.redirect_pointer(v, remainder, seg.hfo, TargetSpecifier::Last);
            }
            _ if level == 0 => {
                smg.redirect_pointer(v, region, seg.hfo, TargetSpecifier::Region);
            }
            _ => {
                let specifier = if level == 1 {
                    TargetSpecifier::First
                } else {
                    TargetSpecifier::All
                };
                smg.redirect_pointer(v, remainder, seg.hfo, specifier);
                smg.set_nesting_level(v, level - 1);
            }
        }
    }

    let next_addr = smg.add_pointer(remainder, seg.hfo, TargetSpecifier::First, 0);
    smg.write_value(region, seg.nfo, ptr_size, next_addr);
    if let ListKind::Dll { pfo } = seg.kind {
        let prev_addr = smg.add_pointer(region, seg.hfo, TargetSpecifier::Region, 0);
        smg.write_value(remainder, pfo, ptr_size, prev_addr);
    }

    smg.remove_object(seg_id);
    debug!(
        "peel_front: {} -> region {} + remainder {} ({}+)",
        seg_id,
        region,
        remainder,
        seg.min_length - 1
    );
    Ok((region, remainder))
}

/// Mirror of [`peel_front`] for the far end of a doubly-linked segment.
fn peel_back(
    smg: &mut Smg,
    seg_id: ObjectId,
    seg: ListSegment,
) -> Result<(ObjectId, ObjectId), SmgError> {
    assert!(seg.min_length >= 1, "Peeling an empty segment");
    let pfo = match seg.kind {
        ListKind::Dll { pfo } => pfo,
        ListKind::Sll => {
            return Err(SmgError::CorruptState(format!(
                "segment {} peeled from the back but is singly linked",
                seg_id
            )))
        }
    };

    let next_edge = smg.edge_at(seg_id, seg.nfo).ok_or_else(|| {
        SmgError::CorruptState(format!("segment {} has no next field", seg_id))
    })?;
    let ptr_size = next_edge.size;

    // The back element keeps the outgoing next value; the remainder keeps
    // the incoming prev value.
    let region = smg.add_object(HeapObject::Region {
        size: seg.size,
        offset: seg.hfo,
    });
    smg.copy_all_values(seg_id, region);

    let remainder = smg.add_object(HeapObject::Segment(ListSegment {
        min_length: seg.min_length - 1,
        ..seg
    }));
    smg.copy_all_values(seg_id, remainder);

    for v in smg.pointers_toward(seg_id) {
        let pt = smg.points_to(v).expect("pointer has an edge");
        let level = smg.nesting_level(v);
        match pt.specifier {
            TargetSpecifier::Last if level == 0 => {
                smg.redirect_pointer(v, region, seg.hfo, TargetSpecifier::Region);
            }
            TargetSpecifier::Last => {
                smg.redirect_pointer(v, remainder, seg.hfo, TargetSpecifier::Last);
                smg.set_nesting_level(v, level - 1);
            }
            specifier => {
                // Front-counting pointers still resolve into the remainder.
                smg.redirect_pointer(v, remainder, seg.hfo, specifier);
            }
        }
    }

    let next_addr = smg.add_pointer(region, seg.hfo, TargetSpecifier::Region, 0);
    smg.write_value(remainder, seg.nfo, ptr_size, next_addr);
    let prev_addr = smg.add_pointer(remainder, seg.hfo, TargetSpecifier::Last, 0);
    smg.write_value(region, pfo, ptr_size, prev_addr);

    smg.remove_object(seg_id);
    debug!(
        "peel_back: {} -> remainder {} ({}+) + region {}",
        seg_id,
        remainder,
        seg.min_length - 1,
        region
    );
    Ok((region, remainder))
}

/// Remove a singly-linked segment of minimum length exactly 0, rewriting
/// every pointer that referenced it to the value its next field held.
/// Returns that value.
pub fn remove_empty_sll(smg: &mut Smg, seg_id: ObjectId) -> Result<Value, SmgError> {
    let seg = expect_empty_segment(smg, seg_id)?;
    if !matches!(seg.kind, ListKind::Sll) {
        return Err(SmgError::CorruptState(format!(
            "segment {} is doubly linked, removed as singly linked",
            seg_id
        )));
    }
    let next_val = segment_link(smg, seg_id, seg.nfo)?;

    for v in smg.pointers_toward(seg_id) {
        if v == next_val {
            return Err(SmgError::CorruptState(format!(
                "0+ segment {} is its own successor",
                seg_id
            )));
        }
        smg.replace_value(v, next_val);
    }
    smg.remove_object(seg_id);
    debug!("remove_empty_sll({}): spliced to {}", seg_id, next_val);
    Ok(next_val)
}

/// Remove a doubly-linked segment of minimum length exactly 0, splicing both
/// directions: forward references resolve to the next value, backward
/// (last-element) references to the prev value. Returns `(next, prev)`.
pub fn remove_empty_dll(smg: &mut Smg, seg_id: ObjectId) -> Result<(Value, Value), SmgError> {
    let seg = expect_empty_segment(smg, seg_id)?;
    let pfo = match seg.kind {
        ListKind::Dll { pfo } => pfo,
        ListKind::Sll => {
            return Err(SmgError::CorruptState(format!(
                "segment {} is singly linked, removed as doubly linked",
                seg_id
            )))
        }
    };
    let next_val = segment_link(smg, seg_id, seg.nfo)?;
    let prev_val = segment_link(smg, seg_id, pfo)?;

    for v in smg.pointers_toward(seg_id) {
        let specifier = smg.points_to(v).expect("pointer has an edge").specifier;
        let replacement = if specifier == TargetSpecifier::Last {
            prev_val
        } else {
            next_val
        };
        if v == replacement {
            return Err(SmgError::CorruptState(format!(
                "0+ segment {} is its own neighbor",
                seg_id
            )));
        }
        smg.replace_value(v, replacement);
    }
    smg.remove_object(seg_id);
    debug!(
        "remove_empty_dll({}): spliced to {} / {}",
        seg_id, next_val, prev_val
    );
    Ok((next_val, prev_val))
}

/// Remove a segment of minimum length 0 from a snapshot, whatever its kind.
/// Returns the forward replacement value and the new snapshot.
pub fn remove_empty_segment(smg: &Smg, seg_id: ObjectId) -> Result<(Value, Smg), SmgError> {
    let mut heap = smg.clone();
    let seg = expect_empty_segment(&heap, seg_id)?;
    let next_val = match seg.kind {
        ListKind::Sll => remove_empty_sll(&mut heap, seg_id)?,
        ListKind::Dll { .. } => remove_empty_dll(&mut heap, seg_id)?.0,
    };
    Ok((next_val, heap))
}

fn expect_empty_segment(smg: &Smg, seg_id: ObjectId) -> Result<ListSegment, SmgError> {
    if !smg.is_valid(seg_id) {
        return Err(SmgError::InvalidObject(seg_id));
    }
    let seg = *smg
        .object(seg_id)
        .as_segment()
        .ok_or(SmgError::NotASegment(seg_id))?;
    if seg.min_length != 0 {
        return Err(SmgError::NonEmptySegment {
            object: seg_id,
            min_length: seg.min_length,
        });
    }
    Ok(seg)
}

fn segment_link(smg: &Smg, seg_id: ObjectId, offset: Offset) -> Result<Value, SmgError> {
    smg.edge_at(seg_id, offset)
        .map(|edge| edge.value)
        .ok_or_else(|| {
            SmgError::CorruptState(format!("segment {} has no link field at {}", seg_id, offset))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fold::ListAbstractor;
    use crate::smg::tests::build_sll;
    use crate::types::Offset;
    use test_log::test;

    const NFO: Offset = Offset::new(8);
    const PFO: Offset = Offset::new(16);

    fn fold_chain(n: usize, threshold: usize) -> (Smg, Value, ObjectId, Value) {
        let mut smg = Smg::new();
        let payload = smg.add_known_value(77);
        let nodes = build_sll(&mut smg, n, 24, NFO, &[(Offset::new(0), 8, payload)]);
        let head = smg.add_pointer(nodes[0], Offset::new(0), TargetSpecifier::Region, 0);
        let tail = smg.add_pointer(nodes[n - 1], Offset::new(0), TargetSpecifier::Region, 0);

        let abstractor = ListAbstractor::new(threshold);
        let folded = abstractor.find_and_abstract_lists(&smg).unwrap();
        let seg = folded
            .valid_objects()
            .into_iter()
            .find(|&id| folded.object(id).is_segment())
            .unwrap();
        (folded, head, seg, tail)
    }

    #[test]
    fn test_fold_unfold_round_trip() {
        // Abstract a uniform chain of 5, then materialize 5 times: 5 concrete
        // regions come back, linked in order, holding the original payload,
        // with the tail pointer's nesting level stepping 4,3,2,1,0.
        let n = 5;
        let (folded, head, seg, tail) = fold_chain(n, 3);
        assert_eq!(
            folded.object(seg).as_segment().unwrap().min_length,
            n
        );
        assert_eq!(folded.nesting_level(tail), n - 1);

        let payload_at = |heap: &Smg, obj: ObjectId| {
            heap.constant_of(heap.edge_at(obj, Offset::new(0)).unwrap().value)
        };

        let mut heap = folded;
        let mut cursor = head;
        let mut regions = Vec::new();
        for step in 0..n {
            assert_eq!(heap.nesting_level(tail), n - 1 - step);
            let states = materialize(&heap, cursor).unwrap();
            assert_eq!(states.len(), 1, "positive segments yield one successor");
            let (value, next_heap) = states.into_iter().next().unwrap();
            heap = next_heap;

            let region = heap.points_to(value).unwrap().target;
            assert!(heap.object(region).is_region());
            assert_eq!(payload_at(&heap, region), Some(77));
            regions.push(region);

            if step + 1 < n {
                cursor = heap.edge_at(region, NFO).unwrap().value;
            } else {
                // The chain's original terminal value is restored.
                assert_eq!(heap.edge_at(region, NFO).unwrap().value, Value::NULL);
            }
        }

        // No segment is left behind and the regions are linked in order.
        assert!(heap
            .valid_objects()
            .iter()
            .all(|&id| heap.object(id).is_region()));
        for i in 0..n - 1 {
            let next = heap.edge_at(regions[i], NFO).unwrap().value;
            assert_eq!(heap.points_to(next).unwrap().target, regions[i + 1]);
        }
        // The tail pointer resolved to the last region at level 0.
        assert_eq!(heap.points_to(tail).unwrap().target, regions[n - 1]);
        assert_eq!(heap.nesting_level(tail), 0);
    }

    #[test]
    fn test_materialize_length_one_removes_remainder() {
        // Peeling a 1+ segment must not leave a 0+ segment dangling: the
        // fresh region is linked straight to the original terminal value.
        let mut smg = Smg::new();
        let nodes = build_sll(&mut smg, 3, 24, NFO, &[]);
        let head = smg.add_pointer(nodes[0], Offset::new(0), TargetSpecifier::Region, 0);
        let seg = smg.fold_into_sll(nodes[0], NFO, 3).unwrap();
        smg.set_min_length(seg, 1);

        let states = materialize(&smg, head).unwrap();
        assert_eq!(states.len(), 1);
        let (value, heap) = states.into_iter().next().unwrap();
        let region = heap.points_to(value).unwrap().target;
        assert!(heap.object(region).is_region());
        assert_eq!(heap.edge_at(region, NFO).unwrap().value, Value::NULL);
        assert!(heap
            .valid_objects()
            .iter()
            .all(|&id| heap.object(id).is_region()));
    }

    #[test]
    fn test_zero_segment_branches_two_ways() {
        let mut smg = Smg::new();
        let nodes = build_sll(&mut smg, 3, 24, NFO, &[]);
        let head = smg.add_pointer(nodes[0], Offset::new(0), TargetSpecifier::Region, 0);
        // A predecessor whose next field reaches the segment.
        let pred = smg.add_region(24);
        smg.write_value(pred, NFO, 8, head);
        let seg = smg.fold_into_sll(nodes[0], NFO, 3).unwrap();
        smg.set_min_length(seg, 0);

        let states = materialize(&smg, head).unwrap();
        assert_eq!(states.len(), 2, "0+ dereference is two-way");

        // Branch (a): the segment vanished; the predecessor is linked to the
        // original terminal value.
        let (gone_value, gone) = &states[0];
        assert_eq!(*gone_value, Value::NULL);
        assert_eq!(gone.edge_at(pred, NFO).unwrap().value, Value::NULL);
        assert!(!gone.is_valid(seg));

        // Branch (b): one concrete element materialized, a fresh 0+ segment
        // behind it.
        let (elem_value, longer) = &states[1];
        let region = longer.points_to(*elem_value).unwrap().target;
        assert!(longer.object(region).is_region());
        let next = longer.edge_at(region, NFO).unwrap().value;
        let rest = longer.points_to(next).unwrap().target;
        let rest_seg = longer.object(rest).as_segment().unwrap();
        assert_eq!(rest_seg.min_length, 0);
    }

    #[test]
    fn test_dll_zero_removal_splices_both_directions() {
        let mut smg = Smg::new();
        let nodes = build_sll(&mut smg, 3, 24, NFO, &[]);
        for i in 1..3 {
            let back = smg.add_pointer(nodes[i - 1], Offset::new(0), TargetSpecifier::Region, 0);
            smg.write_value(nodes[i], PFO, 8, back);
        }
        smg.write_value(nodes[0], PFO, 8, Value::NULL);

        // Predecessor and successor regions around the chain.
        let pred = smg.add_region(24);
        let succ = smg.add_region(24);
        let head = smg.add_pointer(nodes[0], Offset::new(0), TargetSpecifier::Region, 0);
        smg.write_value(pred, NFO, 8, head);
        let pred_addr = smg.add_pointer(pred, Offset::new(0), TargetSpecifier::Region, 0);
        smg.write_value(nodes[0], PFO, 8, pred_addr);
        let succ_addr = smg.add_pointer(succ, Offset::new(0), TargetSpecifier::Region, 0);
        smg.write_value(nodes[2], NFO, 8, succ_addr);
        let back = smg.add_pointer(nodes[2], Offset::new(0), TargetSpecifier::Region, 0);
        smg.write_value(succ, PFO, 8, back);

        let seg = smg.fold_into_dll(nodes[0], NFO, PFO, 3).unwrap();
        smg.set_min_length(seg, 0);

        let (next_val, heap) = remove_empty_segment(&smg, seg).unwrap();
        assert_eq!(next_val, succ_addr);
        // Forward splice: the predecessor's next field now reaches succ.
        let forward = heap.edge_at(pred, NFO).unwrap().value;
        assert_eq!(heap.points_to(forward).unwrap().target, succ);
        // Backward splice: the successor's prev field now reaches pred.
        let backward = heap.edge_at(succ, PFO).unwrap().value;
        assert_eq!(heap.points_to(backward).unwrap().target, pred);
        assert!(!heap.is_valid(seg));
    }

    #[test]
    fn test_dll_materializes_from_the_back() {
        let mut smg = Smg::new();
        let nodes = build_sll(&mut smg, 3, 24, NFO, &[]);
        for i in 1..3 {
            let back = smg.add_pointer(nodes[i - 1], Offset::new(0), TargetSpecifier::Region, 0);
            smg.write_value(nodes[i], PFO, 8, back);
        }
        smg.write_value(nodes[0], PFO, 8, Value::NULL);
        let tail = smg.add_pointer(nodes[2], Offset::new(0), TargetSpecifier::Region, 0);

        let seg = smg.fold_into_dll(nodes[0], NFO, PFO, 3).unwrap();
        assert_eq!(smg.points_to(tail).unwrap().specifier, TargetSpecifier::Last);

        let states = materialize(&smg, tail).unwrap();
        assert_eq!(states.len(), 1);
        let (value, heap) = states.into_iter().next().unwrap();
        let region = heap.points_to(value).unwrap().target;
        assert!(heap.object(region).is_region());
        // The back element keeps the outgoing next value and points back
        // into the shrunk segment.
        assert_eq!(heap.edge_at(region, NFO).unwrap().value, Value::NULL);
        let prev = heap.edge_at(region, PFO).unwrap().value;
        let rest = heap.points_to(prev).unwrap().target;
        assert_eq!(
            heap.object(rest).as_segment().unwrap().min_length,
            2
        );
    }

    #[test]
    fn test_materialize_non_segment_is_fatal() {
        let mut smg = Smg::new();
        let region = smg.add_region(16);
        let p = smg.add_pointer(region, Offset::new(0), TargetSpecifier::Region, 0);
        let err = materialize(&smg, p).unwrap_err();
        assert!(matches!(err, SmgError::NotASegment(_)));
    }

    #[test]
    fn test_materialize_through_deep_pointer_is_fatal() {
        let mut smg = Smg::new();
        let nodes = build_sll(&mut smg, 3, 24, NFO, &[]);
        let tail = smg.add_pointer(nodes[2], Offset::new(0), TargetSpecifier::Region, 0);
        smg.fold_into_sll(nodes[0], NFO, 3).unwrap();

        assert_eq!(smg.nesting_level(tail), 2);
        let err = materialize(&smg, tail).unwrap_err();
        assert!(matches!(err, SmgError::NonZeroNesting { level: 2, .. }));
    }

    #[test]
    fn test_remove_nonempty_segment_is_fatal() {
        let mut smg = Smg::new();
        let nodes = build_sll(&mut smg, 3, 24, NFO, &[]);
        let seg = smg.fold_into_sll(nodes[0], NFO, 3).unwrap();
        let err = remove_empty_segment(&smg, seg).unwrap_err();
        assert!(matches!(
            err,
            SmgError::NonEmptySegment { min_length: 3, .. }
        ));
    }

    #[test]
    fn test_remove_non_segment_is_fatal() {
        let mut smg = Smg::new();
        let region = smg.add_region(16);
        let err = remove_empty_segment(&smg, region).unwrap_err();
        assert!(matches!(err, SmgError::NotASegment(_)));
    }
}
