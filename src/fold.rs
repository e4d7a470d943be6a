//! Candidate refinement and the folding engine.
//!
//! This is the write side of abstraction: verified uniform runs are thinned
//! down to one representative per physical chain, filtered by the fold
//! threshold, and applied to the store, repeatedly until the heap stops
//! changing.

use log::debug;

use crate::detect::collect_candidates;
use crate::error::SmgError;
use crate::object::ObjectId;
use crate::smg::Smg;
use crate::types::Offset;
use crate::verify::{check_value_equality, detect_back_offset, UniformRun};

/// The list abstraction engine and its tunables.
#[derive(Debug, Copy, Clone)]
pub struct ListAbstractor {
    /// Minimum concrete length a uniform run must reach to be folded.
    pub min_fold_length: usize,
    /// How many chain positions the back-pointer probe confirms.
    pub dll_probe_length: usize,
}

impl Default for ListAbstractor {
    fn default() -> Self {
        Self {
            min_fold_length: 3,
            dll_probe_length: 2,
        }
    }
}

impl ListAbstractor {
    pub fn new(min_fold_length: usize) -> Self {
        Self {
            min_fold_length,
            ..Default::default()
        }
    }

    /// Detect, verify, refine, and fold, to a fixed point over one heap
    /// snapshot. The input snapshot is left untouched.
    ///
    /// Each applied fold strictly reduces the number of valid objects, so
    /// the loop terminates on any finite heap.
    pub fn find_and_abstract_lists(&self, smg: &Smg) -> Result<Smg, SmgError> {
        let mut smg = smg.clone();
        loop {
            let candidates = collect_candidates(&smg);
            let mut runs = Vec::new();
            for candidate in &candidates {
                let pfo =
                    detect_back_offset(&smg, candidate.root, candidate.nfo, self.dll_probe_length)?;
                runs.extend(check_value_equality(
                    &smg,
                    candidate.root,
                    candidate.nfo,
                    pfo,
                    self.min_fold_length,
                ));
            }

            let refined = self.refine(&smg, runs);

            // One fold per round: every fold invalidates the round's other
            // runs anyway, and the next round re-detects over the new heap.
            // A lone segment is already maximal; re-folding it would spin
            // forever producing fresh segment objects.
            let next_fold = refined.into_iter().find(|run| {
                smg.is_valid(run.root)
                    && !(run.elements < 2 && smg.object(run.root).is_segment())
            });
            let Some(run) = next_fold else {
                break;
            };
            debug!("folding {:?}", run);
            match run.pfo {
                Some(pfo) => smg.fold_into_dll(run.root, run.nfo, pfo, run.length)?,
                None => smg.fold_into_sll(run.root, run.nfo, run.length)?,
            };
        }
        Ok(smg)
    }

    /// Thin the verified runs: candidates whose root is reachable *inside*
    /// another candidate's chain describe the same physical chain (a DLL
    /// discovered once from each end, or an interior restart) and are
    /// kicked, keeping the outermost representative. Surviving runs are
    /// then filtered by the fold threshold.
    fn refine(&self, smg: &Smg, mut runs: Vec<UniformRun>) -> Vec<UniformRun> {
        runs.sort_by_key(|r| (r.nfo, r.root));

        let mut kicked = vec![false; runs.len()];
        for i in 0..runs.len() {
            if kicked[i] {
                continue;
            }
            let covered = chain_elements(smg, runs[i].root, runs[i].nfo, runs[i].elements);
            for j in 0..runs.len() {
                if j == i || kicked[j] {
                    continue;
                }
                if covered[1..].contains(&runs[j].root) {
                    debug!("refine: {} reachable inside {}, kicked", runs[j].root, runs[i].root);
                    kicked[j] = true;
                }
            }
        }

        runs.into_iter()
            .enumerate()
            .filter(|&(i, ref run)| !kicked[i] && run.length >= self.min_fold_length)
            .map(|(_, run)| run)
            .collect()
    }
}

/// The first `count` objects of the chain starting at `root`.
fn chain_elements(smg: &Smg, root: ObjectId, nfo: Offset, count: usize) -> Vec<ObjectId> {
    let mut elements = vec![root];
    let mut cur = root;
    while elements.len() < count {
        match smg.successor(cur, nfo) {
            Some((_, next)) if !elements.contains(&next) => {
                elements.push(next);
                cur = next;
            }
            _ => break,
        }
    }
    elements
}

/// Concrete length reachable from a candidate root: regions count 1, already
/// folded segments count their recorded minimum length.
pub fn linked_candidate_length(smg: &Smg, root: ObjectId, nfo: Offset) -> usize {
    let mut visited = vec![root];
    let mut length = smg.length_contribution(root);
    let mut cur = root;
    while let Some((_, next)) = smg.successor(cur, nfo) {
        if visited.contains(&next) {
            break;
        }
        visited.push(next);
        length += smg.length_contribution(next);
        cur = next;
    }
    length
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ListKind;
    use crate::smg::tests::build_sll;
    use crate::types::{TargetSpecifier, Value};
    use test_log::test;

    const NFO: Offset = Offset::new(8);

    fn segments_of(smg: &Smg) -> Vec<ObjectId> {
        smg.valid_objects()
            .into_iter()
            .filter(|&id| smg.object(id).is_segment())
            .collect()
    }

    #[test]
    fn test_threshold_boundary() {
        // A chain one short of the threshold is never folded; a chain of
        // exactly the threshold is folded into one segment.
        let abstractor = ListAbstractor::new(3);

        let mut short = Smg::new();
        build_sll(&mut short, 2, 16, NFO, &[]);
        let folded = abstractor.find_and_abstract_lists(&short).unwrap();
        assert!(segments_of(&folded).is_empty());

        let mut exact = Smg::new();
        let nodes = build_sll(&mut exact, 3, 16, NFO, &[]);
        let folded = abstractor.find_and_abstract_lists(&exact).unwrap();
        let segs = segments_of(&folded);
        assert_eq!(segs.len(), 1);
        let seg = folded.object(segs[0]).as_segment().unwrap();
        assert_eq!(seg.min_length, 3);
        assert_eq!(seg.kind, ListKind::Sll);
        for &n in &nodes {
            assert!(!folded.is_valid(n));
        }
    }

    #[test]
    fn test_idempotent_folding() {
        let abstractor = ListAbstractor::new(3);
        let mut smg = Smg::new();
        build_sll(&mut smg, 5, 16, NFO, &[]);

        let once = abstractor.find_and_abstract_lists(&smg).unwrap();
        let twice = abstractor.find_and_abstract_lists(&once).unwrap();

        let first = segments_of(&once);
        let second = segments_of(&twice);
        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        assert_eq!(
            once.object(first[0]).as_segment().unwrap().min_length,
            twice.object(second[0]).as_segment().unwrap().min_length,
        );
    }

    #[test]
    fn test_dll_folds_once() {
        // A doubly-linked chain is discovered from both ends but must end
        // up as a single DLL segment with the right back offset.
        let pfo = Offset::new(16);
        let mut smg = Smg::new();
        let nodes = build_sll(&mut smg, 4, 24, NFO, &[]);
        for i in 1..4 {
            let back = smg.add_pointer(nodes[i - 1], Offset::new(0), TargetSpecifier::Region, 0);
            smg.write_value(nodes[i], pfo, 8, back);
        }
        // Terminate the back direction explicitly.
        smg.write_value(nodes[0], pfo, 8, Value::NULL);

        let abstractor = ListAbstractor::new(3);
        let folded = abstractor.find_and_abstract_lists(&smg).unwrap();
        let segs = segments_of(&folded);
        assert_eq!(segs.len(), 1);
        let seg = folded.object(segs[0]).as_segment().unwrap();
        assert_eq!(seg.min_length, 4);
        assert_eq!(seg.kind, ListKind::Dll { pfo });
    }

    #[test]
    fn test_segment_grows_over_uniform_suffix() {
        // Fold a prefix, then append uniform regions: the fixed point must
        // merge everything into one segment accounting the folded length.
        let abstractor = ListAbstractor::new(3);
        let mut smg = Smg::new();
        let nodes = build_sll(&mut smg, 3, 16, NFO, &[]);
        let seg = smg.fold_into_sll(nodes[0], NFO, 3).unwrap();

        // Two more uniform nodes after the segment.
        let tail = build_sll(&mut smg, 2, 16, NFO, &[]);
        let tail_addr = smg.add_pointer(tail[0], Offset::new(0), TargetSpecifier::Region, 0);
        smg.write_value(seg, NFO, 8, tail_addr);

        let folded = abstractor.find_and_abstract_lists(&smg).unwrap();
        let segs = segments_of(&folded);
        assert_eq!(segs.len(), 1);
        assert_eq!(folded.object(segs[0]).as_segment().unwrap().min_length, 5);
    }

    #[test]
    fn test_mismatched_field_splits_fold() {
        // Chain of 7 with a payload flip at node 3: only the two uniform
        // stretches fold, each into its own segment.
        let mut smg = Smg::new();
        let a = smg.add_known_value(1);
        let b = smg.add_known_value(2);
        let nodes = build_sll(&mut smg, 7, 16, NFO, &[]);
        for (i, &node) in nodes.iter().enumerate() {
            let v = if i < 3 { a } else { b };
            smg.write_value(node, Offset::new(0), 8, v);
        }

        let abstractor = ListAbstractor::new(3);
        let folded = abstractor.find_and_abstract_lists(&smg).unwrap();
        let segs = segments_of(&folded);
        assert_eq!(segs.len(), 2);
        let lengths: Vec<usize> = segs
            .iter()
            .map(|&s| folded.object(s).as_segment().unwrap().min_length)
            .collect();
        assert!(lengths.contains(&3));
        assert!(lengths.contains(&4));
    }

    #[test]
    fn test_linked_candidate_length_counts_segments() {
        let mut smg = Smg::new();
        let nodes = build_sll(&mut smg, 3, 16, NFO, &[]);
        let seg = smg.fold_into_sll(nodes[0], NFO, 3).unwrap();
        let head = smg.add_region(16);
        let seg_addr = smg.add_pointer(seg, Offset::new(0), TargetSpecifier::First, 0);
        smg.write_value(head, NFO, 8, seg_addr);

        assert_eq!(linked_candidate_length(&smg, head, NFO), 4);
    }

    #[test]
    fn test_nested_chains_fold_at_top_level() {
        // Fifteen equal-sized nodes, each holding a pointer to its own
        // nested sub-chain; the sub-chains are pairwise shape-equal but
        // distinct. Folding with threshold 14 must produce exactly one
        // top-level SLL segment of minimum length 15 and leave the nested
        // chains untouched.
        let mut smg = Smg::new();
        let n = 15;
        let sub_len = 2;
        let nested_off = Offset::new(0);

        let tops: Vec<ObjectId> = (0..n).map(|_| smg.add_region(16)).collect();
        let mut sub_roots = Vec::new();
        for (i, &top) in tops.iter().enumerate() {
            // A private nested sub-chain of differently-sized nodes.
            let subs: Vec<ObjectId> = (0..sub_len).map(|_| smg.add_region(24)).collect();
            for (j, &s) in subs.iter().enumerate() {
                let next = if j + 1 < sub_len {
                    smg.add_pointer(subs[j + 1], Offset::new(0), TargetSpecifier::Region, 0)
                } else {
                    Value::NULL
                };
                smg.write_value(s, NFO, 8, next);
            }
            sub_roots.push(subs[0]);
            let sub_addr = smg.add_pointer(subs[0], Offset::new(0), TargetSpecifier::Region, 0);
            smg.write_value(top, nested_off, 8, sub_addr);

            let next = if i + 1 < n {
                smg.add_pointer(tops[i + 1], Offset::new(0), TargetSpecifier::Region, 0)
            } else {
                Value::NULL
            };
            smg.write_value(top, NFO, 8, next);
        }

        let abstractor = ListAbstractor::new(14);
        let folded = abstractor.find_and_abstract_lists(&smg).unwrap();

        let segs = segments_of(&folded);
        assert_eq!(segs.len(), 1);
        let seg = folded.object(segs[0]).as_segment().unwrap();
        assert_eq!(seg.kind, ListKind::Sll);
        assert_eq!(seg.min_length, 15);

        // Every nested chain survives, concrete and distinct.
        for &root in &sub_roots {
            assert!(folded.is_valid(root));
            assert!(folded.object(root).is_region());
        }
        for &top in &tops {
            assert!(!folded.is_valid(top));
        }
    }

    #[test]
    fn test_shared_target_field_blocks_fold() {
        // Nodes pointing (via distinct values) at one shared object are not
        // uniform: the shared target is not privately referenced.
        let mut smg = Smg::new();
        let shared = smg.add_region(24);
        let nodes = build_sll(&mut smg, 4, 16, NFO, &[]);
        for &node in &nodes {
            let p = smg.add_pointer(shared, Offset::new(0), TargetSpecifier::Region, 0);
            smg.write_value(node, Offset::new(0), 8, p);
        }

        let abstractor = ListAbstractor::new(3);
        let folded = abstractor.find_and_abstract_lists(&smg).unwrap();
        assert!(segments_of(&folded).is_empty());
    }

    #[test]
    fn test_fold_preserves_heap_beside_chain() {
        let mut smg = Smg::new();
        let bystander = smg.add_region(64);
        let c = smg.add_known_value(9);
        smg.write_value(bystander, Offset::new(0), 8, c);
        build_sll(&mut smg, 4, 16, NFO, &[]);

        let abstractor = ListAbstractor::new(3);
        let folded = abstractor.find_and_abstract_lists(&smg).unwrap();
        assert!(folded.is_valid(bystander));
        assert_eq!(folded.edge_at(bystander, Offset::new(0)).unwrap().value, c);

        // Something actually folded, and the bystander stayed concrete.
        assert_eq!(segments_of(&folded).len(), 1);
        assert!(folded.object(bystander).is_region());
    }
}
