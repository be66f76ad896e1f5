//! MD index: a topology-derived numeric fingerprint for directed graphs.
//!
//! Every edge (u, v) contributes the term
//!
//! ```text
//! sqrt(2)*level(u) + sqrt(3)*in(u) + sqrt(5)*out(u)
//!   + sqrt(7)*level(v) + sqrt(11)*in(v) + sqrt(13)*out(v)
//! ```
//!
//! A vertex value is the sum of its incident edge terms, the graph value is
//! the sum over all edges. Sums run in edge-enumeration order so repeated
//! runs over the same input reproduce bit-identical values. Isomorphic
//! graphs produce equal values because levels and degrees are intrinsic to
//! the structure.

use crate::analysis::levels::{bfs_levels, source_vertices, topological_levels};

// Fixed constant set. Both sides of a diff must use the exact same values
// for MD equality to be meaningful, so these are spelled out rather than
// computed.
const SQRT_2: f64 = 1.4142135623730951;
const SQRT_3: f64 = 1.7320508075688772;
const SQRT_5: f64 = 2.23606797749979;
const SQRT_7: f64 = 2.6457513110645907;
const SQRT_11: f64 = 3.3166247903554;
const SQRT_13: f64 = 3.605551275463989;

/// An MD index value. Always non-negative and finite.
///
/// Wraps `f64` with a total order so the value can key ordered candidate
/// maps; equality is exact over produced values.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct MdIndex(f64);

impl MdIndex {
    pub const ZERO: MdIndex = MdIndex(0.0);

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0.0
    }

    /// Integer scaling used by the jump-sequence matching step.
    pub fn scaled(self, factor: f64) -> u64 {
        (self.0 * factor) as u64
    }
}

impl Eq for MdIndex {}

impl PartialOrd for MdIndex {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MdIndex {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// MD values for one graph orientation.
#[derive(Debug, Clone, Default)]
pub struct MdValues {
    /// Whole-graph value (sum over all edge terms).
    pub graph: MdIndex,
    /// Per-vertex values.
    pub vertex: Vec<MdIndex>,
    /// Per-edge values, parallel to the input edge list.
    pub edge: Vec<MdIndex>,
}

fn degrees(vertex_count: usize, edges: &[(u32, u32)]) -> (Vec<u32>, Vec<u32>) {
    let mut in_degree: Vec<u32> = vec![0; vertex_count];
    let mut out_degree: Vec<u32> = vec![0; vertex_count];
    for &(source, target) in edges {
        out_degree[source as usize] += 1;
        in_degree[target as usize] += 1;
    }
    (in_degree, out_degree)
}

fn edge_term(
    source_level: u32,
    source_in: u32,
    source_out: u32,
    target_level: u32,
    target_in: u32,
    target_out: u32,
) -> f64 {
    SQRT_2 * source_level as f64
        + SQRT_3 * source_in as f64
        + SQRT_5 * source_out as f64
        + SQRT_7 * target_level as f64
        + SQRT_11 * target_in as f64
        + SQRT_13 * target_out as f64
}

fn compute_with_levels(vertex_count: usize, edges: &[(u32, u32)], level: &[u32]) -> MdValues {
    let (in_degree, out_degree) = degrees(vertex_count, edges);
    let mut vertex: Vec<f64> = vec![0.0; vertex_count];
    let mut edge_values: Vec<MdIndex> = Vec::with_capacity(edges.len());
    let mut graph: f64 = 0.0;
    for &(source, target) in edges {
        let s = source as usize;
        let t = target as usize;
        let term = edge_term(
            level[s],
            in_degree[s],
            out_degree[s],
            level[t],
            in_degree[t],
            out_degree[t],
        );
        edge_values.push(MdIndex(term));
        graph += term;
        vertex[s] += term;
        if t != s {
            vertex[t] += term;
        }
    }
    MdValues {
        graph: MdIndex(graph),
        vertex: vertex.into_iter().map(MdIndex).collect(),
        edge: edge_values,
    }
}

/// Top-down MD values: topological levels from source components.
pub fn md_values_top_down(vertex_count: usize, edges: &[(u32, u32)]) -> MdValues {
    let level = topological_levels(vertex_count, edges);
    compute_with_levels(vertex_count, edges, &level)
}

/// Bottom-up MD values: the graph is reversed in place (every edge keeps its
/// position, endpoints swap) and levels run from the sinks.
pub fn md_values_bottom_up(vertex_count: usize, edges: &[(u32, u32)]) -> MdValues {
    let reversed: Vec<(u32, u32)> = edges.iter().map(|&(s, t)| (t, s)).collect();
    let level = topological_levels(vertex_count, &reversed);
    compute_with_levels(vertex_count, &reversed, &level)
}

/// Relaxed MD values: plain BFS levels from the given roots instead of
/// topological levels.
pub fn md_values_relaxed(vertex_count: usize, edges: &[(u32, u32)], roots: &[u32]) -> MdValues {
    let level = bfs_levels(vertex_count, edges, roots);
    compute_with_levels(vertex_count, edges, &level)
}

/// Relaxed MD values with roots defaulting to the graph's sources.
pub fn md_values_relaxed_from_sources(vertex_count: usize, edges: &[(u32, u32)]) -> MdValues {
    let roots = source_vertices(vertex_count, edges);
    md_values_relaxed(vertex_count, edges, &roots)
}

/// Proximity MD value for one edge: the edge term evaluated inside the
/// subgraph induced by all vertices within two hops (following edges in
/// either direction) of the edge's endpoints, with BFS levels from the edge
/// source inside that subgraph.
pub fn proximity_md_index(vertex_count: usize, edges: &[(u32, u32)], edge_index: usize) -> MdIndex {
    let (edge_source, edge_target) = edges[edge_index];

    // Undirected adjacency for the neighborhood walk.
    let mut neighbors: Vec<Vec<u32>> = vec![Vec::new(); vertex_count];
    for &(source, target) in edges {
        neighbors[source as usize].push(target);
        if source != target {
            neighbors[target as usize].push(source);
        }
    }

    const UNSEEN: u32 = u32::MAX;
    let mut distance: Vec<u32> = vec![UNSEEN; vertex_count];
    let mut queue: std::collections::VecDeque<u32> = std::collections::VecDeque::new();
    for root in [edge_source, edge_target] {
        if distance[root as usize] == UNSEEN {
            distance[root as usize] = 0;
            queue.push_back(root);
        }
    }
    while let Some(vertex) = queue.pop_front() {
        let hops = distance[vertex as usize];
        if hops == 2 {
            continue;
        }
        for &neighbor in &neighbors[vertex as usize] {
            if distance[neighbor as usize] == UNSEEN {
                distance[neighbor as usize] = hops + 1;
                queue.push_back(neighbor);
            }
        }
    }

    // Renumber the neighborhood and keep the edges fully inside it.
    let mut local_id: Vec<u32> = vec![UNSEEN; vertex_count];
    let mut local_count: u32 = 0;
    for vertex in 0..vertex_count {
        if distance[vertex] != UNSEEN {
            local_id[vertex] = local_count;
            local_count += 1;
        }
    }
    let mut local_edges: Vec<(u32, u32)> = Vec::new();
    let mut local_edge_index: usize = usize::MAX;
    for (position, &(source, target)) in edges.iter().enumerate() {
        let s = local_id[source as usize];
        let t = local_id[target as usize];
        if s != UNSEEN && t != UNSEEN {
            if position == edge_index {
                local_edge_index = local_edges.len();
            }
            local_edges.push((s, t));
        }
    }
    debug_assert!(local_edge_index != usize::MAX, "edge must be inside its own neighborhood");

    let level = bfs_levels(
        local_count as usize,
        &local_edges,
        &[local_id[edge_source as usize]],
    );
    let (in_degree, out_degree) = degrees(local_count as usize, &local_edges);
    let (s, t) = local_edges[local_edge_index];
    MdIndex(edge_term(
        level[s as usize],
        in_degree[s as usize],
        out_degree[s as usize],
        level[t as usize],
        in_degree[t as usize],
        out_degree[t as usize],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIAMOND: [(u32, u32); 4] = [(0, 1), (0, 2), (1, 3), (2, 3)];

    #[test]
    fn empty_graph_has_zero_md() {
        let values = md_values_top_down(1, &[]);
        assert!(values.graph.is_zero());
        assert_eq!(values.vertex, vec![MdIndex::ZERO]);
    }

    #[test]
    fn md_is_deterministic() {
        let a = md_values_top_down(4, &DIAMOND);
        let b = md_values_top_down(4, &DIAMOND);
        assert_eq!(a.graph, b.graph);
        assert_eq!(a.vertex, b.vertex);
        assert_eq!(a.edge, b.edge);
    }

    #[test]
    fn md_distinguishes_structure() {
        let chain = [(0, 1), (1, 2), (2, 3)];
        let diamond = md_values_top_down(4, &DIAMOND);
        let straight = md_values_top_down(4, &chain);
        assert_ne!(diamond.graph, straight.graph);
    }

    #[test]
    fn bottom_up_differs_from_top_down_on_asymmetric_graphs() {
        let edges = [(0, 1), (0, 2), (1, 3)];
        let top_down = md_values_top_down(4, &edges);
        let bottom_up = md_values_bottom_up(4, &edges);
        assert_ne!(top_down.graph, bottom_up.graph);
    }

    #[test]
    fn ordering_is_total() {
        let mut keys = vec![MdIndex(2.5), MdIndex(0.0), MdIndex(1.5)];
        keys.sort();
        assert_eq!(keys, vec![MdIndex(0.0), MdIndex(1.5), MdIndex(2.5)]);
    }

    #[test]
    fn proximity_ignores_far_away_structure() {
        // Edge (0, 1) with a long tail behind vertex 4; the tail beyond two
        // hops must not influence the proximity value.
        let near = [(0, 1), (1, 2), (2, 3), (3, 4)];
        let far = [(0, 1), (1, 2), (2, 3), (3, 4), (4, 5), (5, 6)];
        assert_eq!(
            proximity_md_index(5, &near, 0),
            proximity_md_index(7, &far, 0)
        );
    }
}
