//! Debug utilities for inspecting heap snapshots.
//!
//! This module provides helpers for exploring and debugging heap graphs.
//! These are primarily useful in tests and during development.

use std::fmt;

use crate::object::{HeapObject, ObjectId};
use crate::smg::Smg;

/// Detailed information about a single heap object.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub id: ObjectId,
    pub object: HeapObject,
    /// Rendered fields: `(offset, size, value)` with pointer targets.
    pub fields: Vec<String>,
    /// Pointer values targeting this object.
    pub referrers: Vec<String>,
}

impl fmt::Display for ObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.object)?;
        for field in &self.fields {
            write!(f, "\n    {}", field)?;
        }
        if !self.referrers.is_empty() {
            write!(f, "\n    <- {}", self.referrers.join(", "))?;
        }
        Ok(())
    }
}

impl Smg {
    /// Get detailed information about a single object.
    pub fn object_info(&self, id: ObjectId) -> ObjectInfo {
        let fields = self
            .edges_of(id)
            .iter()
            .map(|edge| {
                let mut line = format!("{} [{}] = {}", edge.offset, edge.size, edge.value);
                if let Some(pt) = self.points_to(edge.value) {
                    line.push_str(&format!(" -> {} ({})", pt.target, pt.specifier));
                    let level = self.nesting_level(edge.value);
                    if level > 0 {
                        line.push_str(&format!(" ^{}", level));
                    }
                }
                line
            })
            .collect();
        let referrers = self
            .pointers_toward(id)
            .iter()
            .map(|v| v.to_string())
            .collect();
        ObjectInfo {
            id,
            object: *self.object(id),
            fields,
            referrers,
        }
    }

    /// A stable textual listing of all valid objects, their fields, and
    /// their referrers.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for id in self.valid_objects() {
            out.push_str(&self.object_info(id).to_string());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Offset, TargetSpecifier};

    #[test]
    fn test_dump_lists_objects_and_fields() {
        let mut smg = Smg::new();
        let a = smg.add_region(16);
        let b = smg.add_region(16);
        let p = smg.add_pointer(b, Offset::new(0), TargetSpecifier::Region, 0);
        smg.write_value(a, Offset::new(8), 8, p);

        let dump = smg.dump();
        assert!(dump.contains(&format!("{} region[16]", a)));
        assert!(dump.contains(&format!("+8 [8] = {} -> {} (reg)", p, b)));
        assert!(dump.contains(&format!("<- {}", p)));
    }

    #[test]
    fn test_dump_marks_segments() {
        let mut smg = Smg::new();
        let nfo = Offset::new(8);
        let nodes = crate::smg::tests::build_sll(&mut smg, 3, 16, nfo, &[]);
        smg.fold_into_sll(nodes[0], nfo, 3).unwrap();
        assert!(smg.dump().contains("SLL 3+"));
    }
}
