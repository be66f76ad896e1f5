//! Vertex level assignment for MD index computation.
//!
//! Two flavours are provided:
//! - topological levels: longest-path depth over the condensation of the
//!   graph into strongly connected components. Component membership and the
//!   condensation's structure do not depend on vertex numbering, so two
//!   isomorphic graphs always receive the same level multiset.
//! - BFS levels: plain breadth-first depth from a set of roots. Used by the
//!   "relaxed" MD index variants.

const UNDEFINED: u32 = u32::MAX;

/// Tarjan's strongly-connected-components algorithm, iterative form.
///
/// Returns the component index per vertex and the component count.
/// Components are numbered in reverse topological order: for every edge
/// (u, v) crossing components, `component[u] > component[v]`.
pub fn strongly_connected_components(
    vertex_count: usize,
    edges: &[(u32, u32)],
) -> (Vec<u32>, usize) {
    let n = vertex_count;
    let mut successors: Vec<Vec<u32>> = vec![Vec::new(); n];
    for &(source, target) in edges {
        successors[source as usize].push(target);
    }

    let mut index: Vec<u32> = vec![UNDEFINED; n];
    let mut lowlink: Vec<u32> = vec![0; n];
    let mut on_stack: Vec<bool> = vec![false; n];
    let mut component: Vec<u32> = vec![UNDEFINED; n];
    let mut stack: Vec<u32> = Vec::new();
    let mut next_index: u32 = 0;
    let mut component_count: u32 = 0;

    // Work items are (vertex, next successor position) frames of the
    // recursive formulation.
    let mut frames: Vec<(u32, usize)> = Vec::new();
    for start in 0..n as u32 {
        if index[start as usize] != UNDEFINED {
            continue;
        }
        frames.push((start, 0));
        index[start as usize] = next_index;
        lowlink[start as usize] = next_index;
        next_index += 1;
        stack.push(start);
        on_stack[start as usize] = true;

        while let Some(&(vertex, position)) = frames.last() {
            if position < successors[vertex as usize].len() {
                let successor = successors[vertex as usize][position];
                frames.last_mut().expect("frame stack is non-empty").1 += 1;
                if index[successor as usize] == UNDEFINED {
                    index[successor as usize] = next_index;
                    lowlink[successor as usize] = next_index;
                    next_index += 1;
                    stack.push(successor);
                    on_stack[successor as usize] = true;
                    frames.push((successor, 0));
                } else if on_stack[successor as usize] {
                    lowlink[vertex as usize] =
                        lowlink[vertex as usize].min(index[successor as usize]);
                }
            } else {
                frames.pop();
                if let Some(&(parent, _)) = frames.last() {
                    lowlink[parent as usize] =
                        lowlink[parent as usize].min(lowlink[vertex as usize]);
                }
                if lowlink[vertex as usize] == index[vertex as usize] {
                    loop {
                        let member = stack.pop().expect("SCC stack underflow");
                        on_stack[member as usize] = false;
                        component[member as usize] = component_count;
                        if member == vertex {
                            break;
                        }
                    }
                    component_count += 1;
                }
            }
        }
    }

    (component, component_count as usize)
}

/// Topological levels: each vertex gets the longest-path depth of its
/// strongly connected component in the condensation, counted from source
/// components at level zero.
pub fn topological_levels(vertex_count: usize, edges: &[(u32, u32)]) -> Vec<u32> {
    let (component, component_count) = strongly_connected_components(vertex_count, edges);
    let mut level: Vec<u32> = vec![0; component_count];

    // Bucket cross-component edges by source component. Components are in
    // reverse topological order, so iterating source components from high to
    // low sees every source level finalized before it is propagated.
    let mut outgoing: Vec<Vec<u32>> = vec![Vec::new(); component_count];
    for &(source, target) in edges {
        let from = component[source as usize];
        let to = component[target as usize];
        if from != to {
            outgoing[from as usize].push(to);
        }
    }
    for from in (0..component_count).rev() {
        let source_level = level[from];
        for &to in &outgoing[from] {
            if level[to as usize] < source_level + 1 {
                level[to as usize] = source_level + 1;
            }
        }
    }

    (0..vertex_count)
        .map(|vertex| level[component[vertex] as usize])
        .collect()
}

/// BFS depth from the given roots. Vertices not reachable from any root get
/// level zero.
pub fn bfs_levels(vertex_count: usize, edges: &[(u32, u32)], roots: &[u32]) -> Vec<u32> {
    let n = vertex_count;
    let mut successors: Vec<Vec<u32>> = vec![Vec::new(); n];
    for &(source, target) in edges {
        successors[source as usize].push(target);
    }

    let mut level: Vec<u32> = vec![0; n];
    let mut visited: Vec<bool> = vec![false; n];
    let mut queue: std::collections::VecDeque<u32> = std::collections::VecDeque::new();
    for &root in roots {
        if !visited[root as usize] {
            visited[root as usize] = true;
            queue.push_back(root);
        }
    }
    while let Some(vertex) = queue.pop_front() {
        let next_level = level[vertex as usize] + 1;
        for &successor in &successors[vertex as usize] {
            if !visited[successor as usize] {
                visited[successor as usize] = true;
                level[successor as usize] = next_level;
                queue.push_back(successor);
            }
        }
    }
    level
}

/// Vertices with no incoming edges. Falls back to vertex zero when every
/// vertex has a predecessor (e.g. a graph that is one big cycle) so BFS
/// always has a starting point.
pub fn source_vertices(vertex_count: usize, edges: &[(u32, u32)]) -> Vec<u32> {
    let mut has_incoming: Vec<bool> = vec![false; vertex_count];
    for &(source, target) in edges {
        if source != target {
            has_incoming[target as usize] = true;
        }
    }
    let sources: Vec<u32> = (0..vertex_count as u32)
        .filter(|&vertex| !has_incoming[vertex as usize])
        .collect();
    if sources.is_empty() && vertex_count > 0 {
        return vec![0];
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scc_collapses_cycles() {
        // 0 -> 1 -> 2 -> 1, 2 -> 3
        let edges = [(0, 1), (1, 2), (2, 1), (2, 3)];
        let (component, count) = strongly_connected_components(4, &edges);
        assert_eq!(count, 3);
        assert_eq!(component[1], component[2]);
        assert_ne!(component[0], component[1]);
        assert_ne!(component[3], component[1]);
        // Reverse topological numbering.
        assert!(component[0] > component[1]);
        assert!(component[1] > component[3]);
    }

    #[test]
    fn topological_levels_on_a_dag() {
        let edges = [(0, 1), (0, 2), (1, 3), (2, 3)];
        assert_eq!(topological_levels(4, &edges), vec![0, 1, 1, 2]);
    }

    #[test]
    fn topological_levels_with_a_loop() {
        // The loop {1, 2} collapses to one component.
        let edges = [(0, 1), (1, 2), (2, 1), (2, 3)];
        assert_eq!(topological_levels(4, &edges), vec![0, 1, 1, 2]);
    }

    #[test]
    fn levels_are_numbering_invariant() {
        // The same diamond under a vertex permutation.
        let edges_a = [(0, 1), (0, 2), (1, 3), (2, 3)];
        let edges_b = [(3, 2), (3, 0), (2, 1), (0, 1)];
        let mut levels_a = topological_levels(4, &edges_a);
        let mut levels_b = topological_levels(4, &edges_b);
        levels_a.sort_unstable();
        levels_b.sort_unstable();
        assert_eq!(levels_a, levels_b);
    }

    #[test]
    fn bfs_levels_from_entry() {
        let edges = [(0, 1), (1, 2), (2, 1), (2, 3)];
        assert_eq!(bfs_levels(4, &edges, &[0]), vec![0, 1, 2, 3]);
    }

    #[test]
    fn source_vertices_fall_back_to_zero() {
        let edges = [(0, 1), (1, 0)];
        assert_eq!(source_vertices(2, &edges), vec![0]);
        assert_eq!(source_vertices(3, &[(0, 2), (1, 2)]), vec![0, 1]);
    }
}
