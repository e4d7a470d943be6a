//! The heap graph store: objects, has-value edges, points-to edges.
//!
//! An [`Smg`] is one immutable-by-convention heap snapshot. The engine entry
//! points ([`find_and_abstract_lists`][crate::fold::ListAbstractor::find_and_abstract_lists],
//! [`materialize`][crate::materialize::materialize]) take a borrowed snapshot
//! and return fresh ones; the `&mut self` store operations below are how those
//! fresh snapshots are produced internally. Cloning a snapshot is the
//! copy-on-write boundary.
//!
//! Handle 0 is reserved on both tables: object 0 is the null object (never
//! valid) and value 0 is the null address, which points at the null object.

use std::collections::BTreeMap;
use std::fmt::Debug;

use log::debug;

use crate::arena::Arena;
use crate::error::SmgError;
use crate::object::{HeapObject, ListKind, ListSegment, ObjectId};
use crate::types::{Offset, TargetSpecifier, Value};

/// The content of a field: `(owner, offset)` holds `value` over `size` bytes.
///
/// At most one edge is live per `(owner, offset)` pair.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HasValueEdge {
    pub owner: ObjectId,
    pub offset: Offset,
    pub size: u64,
    pub value: Value,
}

/// Where a pointer value leads: a target object, the offset within it, and
/// the specifier saying which element of an abstract target is denoted.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PointsToEdge {
    pub target: ObjectId,
    pub offset: Offset,
    pub specifier: TargetSpecifier,
}

#[derive(Debug, Clone, Default)]
struct ObjectEntry {
    object: HeapObject,
    valid: bool,
}

#[derive(Debug, Clone, Default)]
struct ValueEntry {
    nesting_level: usize,
    constant: Option<i64>,
}

/// One heap snapshot.
#[derive(Clone)]
pub struct Smg {
    objects: Arena<ObjectEntry>,
    values: Arena<ValueEntry>,
    /// Field contents, keyed for ascending-offset iteration per object.
    hv_edges: BTreeMap<(ObjectId, Offset), (u64, Value)>,
    /// Pointer targets, keyed by pointer value.
    pt_edges: BTreeMap<Value, PointsToEdge>,
}

impl Default for Smg {
    fn default() -> Self {
        Smg::new()
    }
}

impl Debug for Smg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Smg")
            .field("objects", &self.objects.real_size())
            .field("values", &self.values.real_size())
            .field("hv_edges", &self.hv_edges.len())
            .field("pt_edges", &self.pt_edges.len())
            .finish()
    }
}

impl Smg {
    pub fn new() -> Self {
        let mut smg = Self {
            objects: Arena::new(),
            values: Arena::new(),
            hv_edges: BTreeMap::new(),
            pt_edges: BTreeMap::new(),
        };
        // The null address points at the null object.
        smg.pt_edges.insert(
            Value::NULL,
            PointsToEdge {
                target: ObjectId::NULL,
                offset: Offset::new(0),
                specifier: TargetSpecifier::Region,
            },
        );
        smg
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    /// Allocate a fresh valid region of the given size.
    pub fn add_region(&mut self, size: u64) -> ObjectId {
        self.add_object(HeapObject::Region {
            size,
            offset: Offset::new(0),
        })
    }

    /// Allocate a fresh valid object.
    pub fn add_object(&mut self, object: HeapObject) -> ObjectId {
        let index = self.objects.add(ObjectEntry {
            object,
            valid: true,
        });
        let id = ObjectId::new(index as u32);
        debug!("add_object({}) -> {}", self.objects.value(index).object, id);
        id
    }

    pub fn object(&self, id: ObjectId) -> &HeapObject {
        &self.objects.value(id.index()).object
    }

    pub fn is_valid(&self, id: ObjectId) -> bool {
        self.objects.is_occupied(id.index()) && self.objects.value(id.index()).valid
    }

    pub fn size_of(&self, id: ObjectId) -> u64 {
        self.object(id).size()
    }

    /// Invalidate an object and drop all fields it owns.
    ///
    /// The slot is kept as a tombstone so that stale pointers can still be
    /// recognized as dangling. Pointers toward the object are the caller's
    /// responsibility; the engine always redirects or replaces them first.
    pub fn remove_object(&mut self, id: ObjectId) {
        assert!(!id.is_null(), "The null object cannot be removed");
        assert!(self.is_valid(id), "Object {} is not valid", id);
        debug!("remove_object({})", id);

        self.objects.value_mut(id.index()).valid = false;
        let owned: Vec<(ObjectId, Offset)> = self
            .hv_edges
            .range((id, Offset::new(0))..=(id, Offset::new(u64::MAX)))
            .map(|(&key, _)| key)
            .collect();
        for key in owned {
            self.hv_edges.remove(&key);
        }
    }

    /// All valid object ids, ascending.
    pub fn valid_objects(&self) -> Vec<ObjectId> {
        self.objects
            .iter()
            .filter(|(_, entry)| entry.valid)
            .map(|(i, _)| ObjectId::new(i as u32))
            .collect()
    }

    /// Adjust the recorded minimum length of a segment.
    pub fn set_min_length(&mut self, id: ObjectId, min_length: usize) {
        assert!(self.is_valid(id), "Object {} is not valid", id);
        match &mut self.objects.value_mut(id.index()).object {
            HeapObject::Segment(seg) => seg.min_length = min_length,
            HeapObject::Region { .. } => panic!("Object {} is not a segment", id),
        }
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    /// Create a fresh symbolic value with no known constant.
    pub fn add_value(&mut self, nesting_level: usize) -> Value {
        let index = self.values.add(ValueEntry {
            nesting_level,
            constant: None,
        });
        Value::new(index as u32)
    }

    /// Create a fresh value with a known constant.
    pub fn add_known_value(&mut self, constant: i64) -> Value {
        let index = self.values.add(ValueEntry {
            nesting_level: 0,
            constant: Some(constant),
        });
        Value::new(index as u32)
    }

    pub fn nesting_level(&self, value: Value) -> usize {
        self.values.value(value.index()).nesting_level
    }

    pub fn set_nesting_level(&mut self, value: Value, level: usize) {
        self.values.value_mut(value.index()).nesting_level = level;
    }

    pub fn constant_of(&self, value: Value) -> Option<i64> {
        self.values.value(value.index()).constant
    }

    // ------------------------------------------------------------------
    // Points-to edges
    // ------------------------------------------------------------------

    pub fn is_pointer(&self, value: Value) -> bool {
        self.pt_edges.contains_key(&value)
    }

    pub fn points_to(&self, value: Value) -> Option<PointsToEdge> {
        self.pt_edges.get(&value).copied()
    }

    /// Create a fresh pointer value toward `target`.
    pub fn add_pointer(
        &mut self,
        target: ObjectId,
        offset: Offset,
        specifier: TargetSpecifier,
        nesting_level: usize,
    ) -> Value {
        let value = self.add_value(nesting_level);
        self.pt_edges.insert(
            value,
            PointsToEdge {
                target,
                offset,
                specifier,
            },
        );
        debug!(
            "add_pointer({} -> {} {} {})",
            value, target, offset, specifier
        );
        value
    }

    /// Re-aim an existing pointer value at a new target, preserving the
    /// value's identity. This is how folding and materialization move every
    /// reference in one pass without touching the fields that hold it.
    pub fn redirect_pointer(
        &mut self,
        value: Value,
        target: ObjectId,
        offset: Offset,
        specifier: TargetSpecifier,
    ) {
        assert!(self.is_pointer(value), "Value {} is not a pointer", value);
        debug!(
            "redirect_pointer({} -> {} {} {})",
            value, target, offset, specifier
        );
        self.pt_edges.insert(
            value,
            PointsToEdge {
                target,
                offset,
                specifier,
            },
        );
    }

    /// All pointer values targeting `obj`, ascending by value id.
    pub fn pointers_toward(&self, obj: ObjectId) -> Vec<Value> {
        self.pt_edges
            .iter()
            .filter(|(_, edge)| edge.target == obj)
            .map(|(&value, _)| value)
            .collect()
    }

    /// Substitute `old` with `new` in every field that holds it, then retire
    /// `old` entirely (its points-to edge and its value slot).
    pub fn replace_value(&mut self, old: Value, new: Value) {
        assert_ne!(old, new, "Replacing a value with itself");
        assert!(!old.is_null(), "The null address cannot be replaced");
        debug!("replace_value({} -> {})", old, new);

        let holders: Vec<(ObjectId, Offset)> = self
            .hv_edges
            .iter()
            .filter(|(_, &(_, value))| value == old)
            .map(|(&key, _)| key)
            .collect();
        for key in holders {
            let entry = self.hv_edges.get_mut(&key).unwrap();
            entry.1 = new;
        }

        self.pt_edges.remove(&old);
        self.values.drop(old.index());
    }

    // ------------------------------------------------------------------
    // Has-value edges
    // ------------------------------------------------------------------

    /// The field edge at the exact offset, if any.
    pub fn edge_at(&self, obj: ObjectId, offset: Offset) -> Option<HasValueEdge> {
        self.hv_edges
            .get(&(obj, offset))
            .map(|&(size, value)| HasValueEdge {
                owner: obj,
                offset,
                size,
                value,
            })
    }

    /// All field edges of an object, ascending by offset.
    pub fn edges_of(&self, obj: ObjectId) -> Vec<HasValueEdge> {
        self.hv_edges
            .range((obj, Offset::new(0))..=(obj, Offset::new(u64::MAX)))
            .map(|(&(owner, offset), &(size, value))| HasValueEdge {
                owner,
                offset,
                size,
                value,
            })
            .collect()
    }

    /// Every field, across all objects, currently holding `value`.
    pub fn fields_holding(&self, value: Value) -> Vec<(ObjectId, Offset)> {
        self.hv_edges
            .iter()
            .filter(|(_, &(_, v))| v == value)
            .map(|(&key, _)| key)
            .collect()
    }

    /// Write a field. Overwrites the edge at the same offset, if any.
    pub fn write_value(&mut self, obj: ObjectId, offset: Offset, size: u64, value: Value) {
        assert!(self.is_valid(obj), "Object {} is not valid", obj);
        assert!(
            offset.bytes() + size <= self.size_of(obj),
            "Write of {} bytes at {} exceeds object {} of size {}",
            size,
            offset,
            obj,
            self.size_of(obj)
        );
        debug!("write_value({} {} [{}] = {})", obj, offset, size, value);
        self.hv_edges.insert((obj, offset), (size, value));
    }

    /// Read a field. Reading a field that has never been written materializes
    /// a fresh unknown value, which is why reads go through `&mut self`.
    pub fn read_value(&mut self, obj: ObjectId, offset: Offset, size: u64) -> Value {
        assert!(self.is_valid(obj), "Object {} is not valid", obj);
        if let Some(edge) = self.edge_at(obj, offset) {
            assert_eq!(
                edge.size, size,
                "Read of {} bytes at {} {} overlaps an edge of {} bytes",
                size, obj, offset, edge.size
            );
            return edge.value;
        }
        let value = self.add_value(0);
        debug!("read_value({} {} [{}]) -> fresh {}", obj, offset, size, value);
        self.write_value(obj, offset, size, value);
        value
    }

    /// Copy every field of `src` into `dst` verbatim (same offsets, sizes,
    /// and value ids).
    pub fn copy_all_values(&mut self, src: ObjectId, dst: ObjectId) {
        debug!("copy_all_values({} -> {})", src, dst);
        for edge in self.edges_of(src) {
            self.write_value(dst, edge.offset, edge.size, edge.value);
        }
    }

    // ------------------------------------------------------------------
    // Chain structure
    // ------------------------------------------------------------------

    /// The chain successor of `obj` through the next field at `nfo`: the
    /// target of the pointer stored there, provided it is a valid object of
    /// the same size entered through its head (whole-region for a region,
    /// first-element for a segment).
    pub fn successor(&self, obj: ObjectId, nfo: Offset) -> Option<(Value, ObjectId)> {
        let edge = self.edge_at(obj, nfo)?;
        let pt = self.points_to(edge.value)?;
        let target = pt.target;
        if !self.is_valid(target) || self.size_of(target) != self.size_of(obj) {
            return None;
        }
        let head_ok = match self.object(target) {
            HeapObject::Region { .. } => pt.specifier == TargetSpecifier::Region,
            HeapObject::Segment(_) => pt.specifier == TargetSpecifier::First,
        };
        if !head_ok {
            return None;
        }
        Some((edge.value, target))
    }

    /// How many concrete elements an object stands for in a chain: 1 for a
    /// region, `min_length` for a segment.
    pub fn length_contribution(&self, obj: ObjectId) -> usize {
        match self.object(obj) {
            HeapObject::Region { .. } => 1,
            HeapObject::Segment(seg) => seg.min_length,
        }
    }

    // ------------------------------------------------------------------
    // Folding write-back
    // ------------------------------------------------------------------

    /// Replace the chain starting at `root` (linked at `nfo`, spanning
    /// exactly `min_length` concrete elements) with one singly-linked
    /// segment. Returns the new segment's id.
    pub fn fold_into_sll(
        &mut self,
        root: ObjectId,
        nfo: Offset,
        min_length: usize,
    ) -> Result<ObjectId, SmgError> {
        self.fold_into_segment(root, nfo, None, min_length)
    }

    /// Replace the chain starting at `root` (linked at `nfo`, back-linked at
    /// `pfo`, spanning exactly `min_length` concrete elements) with one
    /// doubly-linked segment. Returns the new segment's id.
    pub fn fold_into_dll(
        &mut self,
        root: ObjectId,
        nfo: Offset,
        pfo: Offset,
        min_length: usize,
    ) -> Result<ObjectId, SmgError> {
        self.fold_into_segment(root, nfo, Some(pfo), min_length)
    }

    fn fold_into_segment(
        &mut self,
        root: ObjectId,
        nfo: Offset,
        pfo: Option<Offset>,
        min_length: usize,
    ) -> Result<ObjectId, SmgError> {
        if min_length == 0 {
            return Err(SmgError::CorruptState(format!(
                "fold of zero elements at {}",
                root
            )));
        }

        // Collect the chain whose contributions sum to exactly `min_length`.
        let mut elements = Vec::new();
        let mut total = 0usize;
        let mut cur = root;
        loop {
            if !self.is_valid(cur) {
                return Err(SmgError::InvalidObject(cur));
            }
            if elements.contains(&cur) {
                return Err(SmgError::CorruptState(format!(
                    "fold chain from {} revisits {}",
                    root, cur
                )));
            }
            if let Some(seg) = self.object(cur).as_segment() {
                if seg.nfo != nfo {
                    return Err(SmgError::NextOffsetMismatch {
                        object: cur,
                        recorded: seg.nfo,
                        candidate: nfo,
                    });
                }
                let kind_ok = match (pfo, seg.kind) {
                    (None, ListKind::Sll) => true,
                    (Some(p), ListKind::Dll { pfo: q }) => p == q,
                    _ => false,
                };
                if !kind_ok {
                    return Err(SmgError::CorruptState(format!(
                        "segment {} linkage disagrees with fold of kind {:?}",
                        cur, pfo
                    )));
                }
            }
            total += self.length_contribution(cur);
            elements.push(cur);
            if total >= min_length {
                break;
            }
            cur = self
                .successor(cur, nfo)
                .ok_or_else(|| {
                    SmgError::CorruptState(format!(
                        "chain from {} ends after {} of {} elements",
                        root, total, min_length
                    ))
                })?
                .1;
        }
        if total != min_length {
            return Err(SmgError::CorruptState(format!(
                "chain from {} spans {} elements, fold asked for {}",
                root, total, min_length
            )));
        }

        let size = self.size_of(root);
        let hfo = self.object(root).start_offset();
        let kind = match pfo {
            None => ListKind::Sll,
            Some(p) => ListKind::Dll { pfo: p },
        };
        let seg_id = self.add_object(HeapObject::Segment(ListSegment {
            size,
            hfo,
            nfo,
            kind,
            min_length,
        }));
        debug!(
            "fold_into_segment: {} elements from {} -> {} ({} {}+)",
            elements.len(),
            root,
            seg_id,
            kind,
            min_length
        );

        let first = elements[0];
        let last = *elements.last().expect("chain is nonempty");

        // The segment inherits the first element's fields; the next field is
        // then overwritten with the chain's outgoing value. For a DLL the
        // copied pfo field already holds the incoming boundary value.
        self.copy_all_values(first, seg_id);
        let ptr_size = self
            .edge_at(first, nfo)
            .ok_or_else(|| {
                SmgError::CorruptState(format!("chain root {} has no next field at {}", first, nfo))
            })?
            .size;
        let outgoing = self.read_value(last, nfo, ptr_size);
        self.write_value(seg_id, nfo, ptr_size, outgoing);

        // Re-aim every pointer into the chain at the segment. First/All/Region
        // pointers count their nesting level from the front; Last pointers
        // count from the back.
        let is_dll = pfo.is_some();
        let mut pos = 0usize;
        let count = elements.len();
        for (idx, &elem) in elements.iter().enumerate() {
            let contrib = self.length_contribution(elem);
            let elem_is_segment = self.object(elem).is_segment();
            let is_first = idx == 0;
            let is_last = idx == count - 1;
            for v in self.pointers_toward(elem) {
                let pt = self.points_to(v).expect("pointer has an edge");
                let inner = self.nesting_level(v);
                let (specifier, level) =
                    if elem_is_segment && pt.specifier == TargetSpecifier::Last {
                        (TargetSpecifier::Last, inner)
                    } else if is_dll && is_last && !is_first && !elem_is_segment {
                        (TargetSpecifier::Last, 0)
                    } else {
                        let level = pos + if elem_is_segment { inner } else { 0 };
                        let specifier = if level == 0 {
                            TargetSpecifier::First
                        } else {
                            TargetSpecifier::All
                        };
                        (specifier, level)
                    };
                self.redirect_pointer(v, seg_id, hfo, specifier);
                self.set_nesting_level(v, level);
            }
            pos += contrib;
        }

        for &elem in &elements {
            self.remove_object(elem);
        }

        Ok(seg_id)
    }
}
