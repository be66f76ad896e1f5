//! Lengauer-Tarjan dominator tree over a block-index graph.
//!
//! # Algorithm
//! The classic Lengauer-Tarjan algorithm with path compression:
//! 1. Depth-first search from the root assigns DFS numbers.
//! 2. Semidominators are computed in reverse DFS order.
//! 3. Immediate dominators are derived from the semidominator forest.
//!
//! The graph is taken as a plain edge list over `u32` vertex indices, which
//! is all the read-only flow graphs provide. Vertices unreachable from the
//! root have no dominator.

const UNDEFINED: u32 = u32::MAX;

/// Immediate-dominator table produced by [`dominator_tree`].
#[derive(Debug)]
pub struct DominatorTree {
    idom: Vec<u32>,
}

impl DominatorTree {
    /// Returns the immediate dominator of `vertex`, if any. The root and
    /// unreachable vertices have none.
    pub fn immediate_dominator(&self, vertex: u32) -> Option<u32> {
        match self.idom[vertex as usize] {
            UNDEFINED => None,
            dom => Some(dom),
        }
    }

    /// Returns true if `dominator` strictly dominates `vertex`.
    ///
    /// Walks the dominator chain upwards, exactly like testing membership in
    /// the dominator-tree ancestor set.
    pub fn dominates(&self, dominator: u32, vertex: u32) -> bool {
        let mut current = self.idom[vertex as usize];
        while current != UNDEFINED {
            if current == dominator {
                return true;
            }
            let next = self.idom[current as usize];
            if next == current {
                break;
            }
            current = next;
        }
        false
    }
}

/// Computes the dominator tree of the graph rooted at `root`.
pub fn dominator_tree(vertex_count: usize, edges: &[(u32, u32)], root: u32) -> DominatorTree {
    let n = vertex_count;
    if n == 0 {
        return DominatorTree { idom: Vec::new() };
    }
    debug_assert!((root as usize) < n, "dominator root out of range");

    let mut successors: Vec<Vec<u32>> = vec![Vec::new(); n];
    let mut predecessors: Vec<Vec<u32>> = vec![Vec::new(); n];
    for &(source, target) in edges {
        successors[source as usize].push(target);
        predecessors[target as usize].push(source);
    }

    // Iterative DFS assigning preorder numbers.
    let mut dfnum: Vec<u32> = vec![UNDEFINED; n];
    let mut vertex_by_dfnum: Vec<u32> = Vec::with_capacity(n);
    let mut parent: Vec<u32> = vec![UNDEFINED; n];
    let mut stack: Vec<u32> = vec![root];
    while let Some(vertex) = stack.pop() {
        if dfnum[vertex as usize] != UNDEFINED {
            continue;
        }
        dfnum[vertex as usize] = vertex_by_dfnum.len() as u32;
        vertex_by_dfnum.push(vertex);
        // Push in reverse so that successors are visited in list order.
        for &succ in successors[vertex as usize].iter().rev() {
            if dfnum[succ as usize] == UNDEFINED {
                parent[succ as usize] = vertex;
                stack.push(succ);
            }
        }
    }

    let mut semi: Vec<u32> = dfnum.clone();
    let mut idom: Vec<u32> = vec![UNDEFINED; n];
    let mut ancestor: Vec<u32> = vec![UNDEFINED; n];
    let mut label: Vec<u32> = (0..n as u32).collect();
    let mut buckets: Vec<Vec<u32>> = vec![Vec::new(); n];

    // Path-compressing eval over the semidominator forest.
    let mut compress_path: Vec<u32> = Vec::new();
    let eval = |vertex: u32,
                    ancestor: &mut Vec<u32>,
                    label: &mut Vec<u32>,
                    semi: &Vec<u32>,
                    compress_path: &mut Vec<u32>|
     -> u32 {
        if ancestor[vertex as usize] == UNDEFINED {
            return vertex;
        }
        compress_path.clear();
        let mut current = vertex;
        while ancestor[ancestor[current as usize] as usize] != UNDEFINED {
            compress_path.push(current);
            current = ancestor[current as usize];
        }
        while let Some(node) = compress_path.pop() {
            let anc = ancestor[node as usize];
            if semi[label[anc as usize] as usize] < semi[label[node as usize] as usize] {
                label[node as usize] = label[anc as usize];
            }
            ancestor[node as usize] = ancestor[anc as usize];
        }
        label[vertex as usize]
    };

    for &w in vertex_by_dfnum.iter().skip(1).rev() {
        for &v in &predecessors[w as usize] {
            if dfnum[v as usize] == UNDEFINED {
                continue;
            }
            let u = eval(v, &mut ancestor, &mut label, &semi, &mut compress_path);
            if semi[u as usize] < semi[w as usize] {
                semi[w as usize] = semi[u as usize];
            }
        }
        buckets[vertex_by_dfnum[semi[w as usize] as usize] as usize].push(w);
        let p = parent[w as usize];
        ancestor[w as usize] = p;
        for v in std::mem::take(&mut buckets[p as usize]) {
            let u = eval(v, &mut ancestor, &mut label, &semi, &mut compress_path);
            idom[v as usize] = if semi[u as usize] < semi[v as usize] { u } else { p };
        }
    }

    for &w in vertex_by_dfnum.iter().skip(1) {
        if idom[w as usize] != vertex_by_dfnum[semi[w as usize] as usize] {
            idom[w as usize] = idom[idom[w as usize] as usize];
        }
    }

    DominatorTree { idom }
}

/// Flags the back edges of the graph rooted at `root`.
///
/// An edge is a back edge iff it is a self edge, or its target dominates its
/// source. The result is parallel to `edges`, so edge lists sorted by
/// (source, target) keep back edges in the same order.
pub fn back_edge_flags(vertex_count: usize, edges: &[(u32, u32)], root: u32) -> Vec<bool> {
    let tree = dominator_tree(vertex_count, edges, root);
    edges
        .iter()
        .map(|&(source, target)| source == target || tree.dominates(target, source))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diamond_has_no_back_edges() {
        // 0 -> 1, 0 -> 2, 1 -> 3, 2 -> 3
        let edges = [(0, 1), (0, 2), (1, 3), (2, 3)];
        let tree = dominator_tree(4, &edges, 0);
        assert_eq!(tree.immediate_dominator(1), Some(0));
        assert_eq!(tree.immediate_dominator(2), Some(0));
        assert_eq!(tree.immediate_dominator(3), Some(0));
        assert!(back_edge_flags(4, &edges, 0).iter().all(|flag| !flag));
    }

    #[test]
    fn loop_edge_is_dominated() {
        // 0 -> 1 -> 2 -> 1 (loop), 2 -> 3
        let edges = [(0, 1), (1, 2), (2, 1), (2, 3)];
        let flags = back_edge_flags(4, &edges, 0);
        assert_eq!(flags, vec![false, false, true, false]);
    }

    #[test]
    fn self_edge_is_always_a_back_edge() {
        let edges = [(0, 1), (1, 1)];
        let flags = back_edge_flags(2, &edges, 0);
        assert_eq!(flags, vec![false, true]);
    }

    #[test]
    fn nested_loops() {
        // Outer loop 1..=3, inner self loop at 2.
        let edges = [(0, 1), (1, 2), (2, 2), (2, 3), (3, 1), (3, 4)];
        let flags = back_edge_flags(5, &edges, 0);
        assert_eq!(flags, vec![false, false, true, false, true, false]);
    }

    #[test]
    fn unreachable_vertices_are_ignored() {
        // Vertex 3 is disconnected.
        let edges = [(0, 1), (1, 2), (3, 1)];
        let tree = dominator_tree(4, &edges, 0);
        assert_eq!(tree.immediate_dominator(3), None);
        assert!(!tree.dominates(1, 3));
    }
}
