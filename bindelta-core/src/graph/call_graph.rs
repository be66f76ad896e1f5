//! The call graph.
//!
//! A directed multigraph over functions. Self calls and repeated calls to
//! the same callee are permitted but flagged, because most matching steps
//! want to skip them. Vertices are sorted by entry-point address.

use std::cell::OnceCell;

use smallvec::SmallVec;

use crate::analysis::levels::source_vertices;
use crate::analysis::md_index::{
    md_values_bottom_up, md_values_relaxed, md_values_top_down, proximity_md_index, MdIndex,
};
use crate::graph::flow_graph::FunctionKind;
use crate::graph::Address;

/// Self call (source == target).
pub const EDGE_CIRCULAR: u8 = 1 << 0;
/// Repeated (source, target) pair.
pub const EDGE_DUPLICATE: u8 = 1 << 1;

/// A function vertex.
#[derive(Debug, Clone, Default)]
pub struct CallGraphVertex {
    pub address: Address,
    /// Mangled name; empty when auto-generated.
    pub name: String,
    /// Demangled name; empty when identical to `name`.
    pub demangled_name: String,
    pub kind: FunctionKind,
    pub library_index: Option<u32>,
    pub module_index: Option<u32>,
    /// Index of the function's flow graph, if it has one. Imported
    /// functions exist only as call-graph vertices.
    pub flow_graph: Option<u32>,
}

impl CallGraphVertex {
    pub fn has_real_name(&self) -> bool {
        !self.name.is_empty()
    }
}

/// A call-site edge.
#[derive(Debug, Clone, Copy)]
pub struct CallGraphEdge {
    pub source: u32,
    pub target: u32,
    /// Address of the calling instruction.
    pub call_site: Address,
    pub flags: u8,
}

impl CallGraphEdge {
    pub fn is_circular(&self) -> bool {
        self.flags & EDGE_CIRCULAR != 0
    }

    pub fn is_duplicate(&self) -> bool {
        self.flags & EDGE_DUPLICATE != 0
    }
}

/// A linked library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryRecord {
    pub name: String,
    pub is_static: bool,
}

/// Call graph over all functions of a binary.
#[derive(Debug, Default)]
pub struct CallGraph {
    pub(crate) vertices: Vec<CallGraphVertex>,
    pub(crate) edges: Vec<CallGraphEdge>,
    pub(crate) out_edges: Vec<SmallVec<[u32; 2]>>,
    pub(crate) in_edges: Vec<SmallVec<[u32; 2]>>,
    pub libraries: Vec<LibraryRecord>,
    pub modules: Vec<String>,
    features: OnceCell<CallGraphFeatures>,
}

impl CallGraph {
    pub(crate) fn new(
        vertices: Vec<CallGraphVertex>,
        edges: Vec<CallGraphEdge>,
        libraries: Vec<LibraryRecord>,
        modules: Vec<String>,
    ) -> Self {
        let mut graph = CallGraph {
            vertices,
            edges,
            out_edges: Vec::new(),
            in_edges: Vec::new(),
            libraries,
            modules,
            features: OnceCell::new(),
        };
        graph.finalize();
        graph
    }

    /// Sorts edges, assigns circular/duplicate flags and builds the
    /// adjacency. Vertices must already be sorted by address.
    fn finalize(&mut self) {
        debug_assert!(
            self.vertices.windows(2).all(|w| w[0].address <= w[1].address),
            "call graph vertices must be sorted by address"
        );
        self.edges
            .sort_by_key(|edge| (edge.source, edge.target, edge.call_site));
        let mut previous: Option<(u32, u32)> = None;
        for edge in &mut self.edges {
            edge.flags = 0;
            if edge.source == edge.target {
                edge.flags |= EDGE_CIRCULAR;
            }
            if previous == Some((edge.source, edge.target)) {
                edge.flags |= EDGE_DUPLICATE;
            }
            previous = Some((edge.source, edge.target));
        }

        self.out_edges = vec![SmallVec::new(); self.vertices.len()];
        self.in_edges = vec![SmallVec::new(); self.vertices.len()];
        for (index, edge) in self.edges.iter().enumerate() {
            self.out_edges[edge.source as usize].push(index as u32);
            self.in_edges[edge.target as usize].push(index as u32);
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn vertex(&self, index: u32) -> &CallGraphVertex {
        &self.vertices[index as usize]
    }

    pub fn vertices(&self) -> &[CallGraphVertex] {
        &self.vertices
    }

    pub fn edge(&self, index: u32) -> &CallGraphEdge {
        &self.edges[index as usize]
    }

    pub fn edges(&self) -> &[CallGraphEdge] {
        &self.edges
    }

    /// Binary search over the address-sorted vertex list.
    pub fn vertex_by_address(&self, address: Address) -> Option<u32> {
        self.vertices
            .binary_search_by_key(&address, |vertex| vertex.address)
            .ok()
            .map(|index| index as u32)
    }

    /// The flow-graph index of the function at `vertex`, if it has a body.
    pub fn flow_graph_of(&self, vertex: u32) -> Option<u32> {
        self.vertices[vertex as usize].flow_graph
    }

    /// MD fingerprints of the call graph, computed on first use.
    pub fn features(&self) -> &CallGraphFeatures {
        self.features
            .get_or_init(|| CallGraphFeatures::compute(self))
    }
}

/// Cached call-graph fingerprints.
#[derive(Debug)]
pub struct CallGraphFeatures {
    pub vertex_md: Vec<MdIndex>,
    pub vertex_md_inverted: Vec<MdIndex>,
    pub vertex_md_relaxed: Vec<MdIndex>,
    /// Per-edge MD value, top-down orientation.
    pub edge_md: Vec<MdIndex>,
    /// Per-edge 2-hop proximity MD value.
    pub edge_proximity_md: Vec<MdIndex>,
}

impl CallGraphFeatures {
    fn compute(call_graph: &CallGraph) -> Self {
        let vertex_count = call_graph.vertices.len();
        let pairs: Vec<(u32, u32)> = call_graph
            .edges
            .iter()
            .map(|edge| (edge.source, edge.target))
            .collect();

        let top_down = md_values_top_down(vertex_count, &pairs);
        let bottom_up = md_values_bottom_up(vertex_count, &pairs);
        let roots = source_vertices(vertex_count, &pairs);
        let relaxed = md_values_relaxed(vertex_count, &pairs, &roots);
        let edge_proximity_md: Vec<MdIndex> = (0..pairs.len())
            .map(|edge| proximity_md_index(vertex_count, &pairs, edge))
            .collect();

        CallGraphFeatures {
            vertex_md: top_down.vertex,
            vertex_md_inverted: bottom_up.vertex,
            vertex_md_relaxed: relaxed.vertex,
            edge_md: top_down.edge,
            edge_proximity_md,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(address: Address) -> CallGraphVertex {
        CallGraphVertex {
            address,
            ..CallGraphVertex::default()
        }
    }

    fn edge(source: u32, target: u32, call_site: Address) -> CallGraphEdge {
        CallGraphEdge {
            source,
            target,
            call_site,
            flags: 0,
        }
    }

    #[test]
    fn self_and_repeated_calls_are_flagged() {
        let graph = CallGraph::new(
            vec![vertex(0x1000), vertex(0x2000)],
            vec![
                edge(0, 1, 0x1010),
                edge(0, 1, 0x1004),
                edge(1, 1, 0x2004),
            ],
            Vec::new(),
            Vec::new(),
        );
        // Sorted by (source, target, call site); the second 0 -> 1 edge is
        // a duplicate, the self call is circular.
        assert_eq!(graph.edge(0).call_site, 0x1004);
        assert!(!graph.edge(0).is_duplicate());
        assert!(graph.edge(1).is_duplicate());
        assert!(graph.edge(2).is_circular());
    }

    #[test]
    fn vertices_resolve_by_address() {
        let graph = CallGraph::new(
            vec![vertex(0x1000), vertex(0x2000)],
            Vec::new(),
            Vec::new(),
            Vec::new(),
        );
        assert_eq!(graph.vertex_by_address(0x2000), Some(1));
        assert_eq!(graph.vertex_by_address(0x1500), None);
    }
}
