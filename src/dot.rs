//! Heap snapshot to DOT (Graphviz) conversion.
//!
//! This module renders a heap snapshot in DOT format, which can be
//! visualized with Graphviz tools like `dot` or `neato`, or online viewers.
//!
//! # DOT Format
//!
//! The generated output follows these conventions:
//! - **Regions** are rendered as plain boxes labelled with their size
//! - **List segments** are rendered as double-bordered boxes labelled
//!   `SLL N+` / `DLL N+`
//! - **Edges**:
//!   - Solid arrows are points-to edges, labelled with the owning field
//!     offset, the target specifier, and the pointer's nesting level when
//!     nonzero
//!   - The null object is rendered as a small square sink
//!
//! # Examples
//!
//! ```
//! use smg_rs::dot::{to_dot, DotConfig};
//! use smg_rs::smg::Smg;
//! use smg_rs::types::{Offset, TargetSpecifier};
//!
//! let mut smg = Smg::new();
//! let a = smg.add_region(16);
//! let b = smg.add_region(16);
//! let p = smg.add_pointer(b, Offset::new(0), TargetSpecifier::Region, 0);
//! smg.write_value(a, Offset::new(8), 8, p);
//!
//! let dot = to_dot(&smg, &DotConfig::default());
//! // Write to file and render with: dot -Tpng heap.dot -o heap.png
//! assert!(dot.starts_with("digraph"));
//! ```

use std::fmt::Write;

use crate::object::HeapObject;
use crate::smg::Smg;

/// Configuration options for DOT output generation.
#[derive(Debug, Clone)]
pub struct DotConfig {
    /// Name of the digraph.
    pub graph_name: &'static str,
    /// Left-to-right layout instead of top-down.
    pub rankdir_lr: bool,
    /// Render the null object and edges into it.
    pub show_null: bool,
}

impl Default for DotConfig {
    fn default() -> Self {
        Self {
            graph_name: "heap",
            rankdir_lr: true,
            show_null: false,
        }
    }
}

/// Render a heap snapshot in DOT format.
pub fn to_dot(smg: &Smg, config: &DotConfig) -> String {
    let mut out = String::new();

    writeln!(out, "digraph {} {{", config.graph_name).unwrap();
    if config.rankdir_lr {
        writeln!(out, "  rankdir=LR;").unwrap();
    }
    writeln!(out, "  node [fontname=\"monospace\"];").unwrap();

    if config.show_null {
        writeln!(out, "  obj0 [label=\"null\", shape=square];").unwrap();
    }

    for id in smg.valid_objects() {
        match smg.object(id) {
            HeapObject::Region { size, .. } => {
                writeln!(
                    out,
                    "  obj{} [label=\"{} region[{}]\", shape=box];",
                    id.index(),
                    id,
                    size
                )
                .unwrap();
            }
            HeapObject::Segment(seg) => {
                writeln!(
                    out,
                    "  obj{} [label=\"{} {} nfo{}\", shape=box, peripheries=2];",
                    id.index(),
                    id,
                    seg,
                    seg.nfo
                )
                .unwrap();
            }
        }
    }

    for id in smg.valid_objects() {
        for edge in smg.edges_of(id) {
            let Some(pt) = smg.points_to(edge.value) else {
                continue;
            };
            if pt.target.is_null() && !config.show_null {
                continue;
            }
            let level = smg.nesting_level(edge.value);
            let mut label = format!("{} {}", edge.offset, pt.specifier);
            if level > 0 {
                write!(label, " ^{}", level).unwrap();
            }
            writeln!(
                out,
                "  obj{} -> obj{} [label=\"{}\"];",
                id.index(),
                pt.target.index(),
                label
            )
            .unwrap();
        }
    }

    writeln!(out, "}}").unwrap();
    out
}

/// Render with default options.
pub fn to_dot_default(smg: &Smg) -> String {
    to_dot(smg, &DotConfig::default())
}
