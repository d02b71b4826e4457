//! Path enumeration primitives: bounded simple-path DFS and BFS shortest
//! path.
//!
//! Simple-path enumeration is exponential in the worst case; the edge bound
//! is enforced strictly. Cycle safety comes from a visited set carried per
//! DFS branch, not a global one, so cycles introduced by derived escalation
//! edges (A can impersonate B who can impersonate A) are handled naturally.

use std::collections::{HashSet, VecDeque};

use iamscope_graph::IamGraph;

/// A raw walk through the graph.
#[derive(Debug, Clone)]
pub struct RawWalk {
    /// Node indices along the walk.
    pub node_indices: Vec<usize>,
    /// Edges along the walk as `(source_node_index, position_in_out_edges)`.
    pub edges: Vec<(usize, usize)>,
}

/// Enumerate every simple path from `source` to any node in `targets` with
/// at most `max_edges` edges.
///
/// A path is recorded whenever the walk stands on a target, and the walk
/// keeps extending afterwards: a path passing through one target on its way
/// to another yields both.
pub fn all_simple_paths(
    graph: &IamGraph,
    source: usize,
    targets: &HashSet<usize>,
    max_edges: usize,
) -> Vec<RawWalk> {
    let mut found = Vec::new();
    if max_edges == 0 {
        return found;
    }

    let mut stack: Vec<DfsState> = vec![DfsState {
        node: source,
        path_nodes: vec![source],
        path_edges: Vec::new(),
        visited: {
            let mut s = HashSet::new();
            s.insert(source);
            s
        },
    }];

    while let Some(state) = stack.pop() {
        if !state.path_edges.is_empty() && targets.contains(&state.node) {
            found.push(RawWalk {
                node_indices: state.path_nodes.clone(),
                edges: state.path_edges.clone(),
            });
        }

        if state.path_edges.len() >= max_edges {
            continue;
        }

        for (edge_pos, edge) in graph.out_edges(state.node).iter().enumerate() {
            if state.visited.contains(&edge.target) {
                continue;
            }

            let mut new_visited = state.visited.clone();
            new_visited.insert(edge.target);

            let mut new_nodes = state.path_nodes.clone();
            new_nodes.push(edge.target);

            let mut new_edges = state.path_edges.clone();
            new_edges.push((state.node, edge_pos));

            stack.push(DfsState {
                node: edge.target,
                path_nodes: new_nodes,
                path_edges: new_edges,
                visited: new_visited,
            });
        }
    }

    found
}

/// All simple paths between one source and one target.
pub fn all_paths_between(
    graph: &IamGraph,
    source: usize,
    target: usize,
    max_edges: usize,
) -> Vec<RawWalk> {
    let mut targets = HashSet::new();
    targets.insert(target);
    all_simple_paths(graph, source, &targets, max_edges)
}

/// Shortest path by edge count. Ties break on adjacency order, which is
/// insertion order, so the result is deterministic for a given graph.
pub fn shortest_path(graph: &IamGraph, source: usize, target: usize) -> Option<RawWalk> {
    if source == target {
        return None;
    }
    let n = graph.node_count();
    if source >= n || target >= n {
        return None;
    }

    let mut prev: Vec<Option<(usize, usize)>> = vec![None; n];
    let mut visited = vec![false; n];
    visited[source] = true;

    let mut queue = VecDeque::new();
    queue.push_back(source);

    'bfs: while let Some(node) = queue.pop_front() {
        for (edge_pos, edge) in graph.out_edges(node).iter().enumerate() {
            if visited[edge.target] {
                continue;
            }
            visited[edge.target] = true;
            prev[edge.target] = Some((node, edge_pos));
            if edge.target == target {
                break 'bfs;
            }
            queue.push_back(edge.target);
        }
    }

    if !visited[target] {
        return None;
    }

    let mut node_indices = vec![target];
    let mut edges = Vec::new();
    let mut current = target;
    while let Some((parent, edge_pos)) = prev[current] {
        edges.push((parent, edge_pos));
        node_indices.push(parent);
        current = parent;
    }
    node_indices.reverse();
    edges.reverse();

    Some(RawWalk { node_indices, edges })
}

/// Internal DFS state for simple-path enumeration.
struct DfsState {
    node: usize,
    path_nodes: Vec<usize>,
    path_edges: Vec<(usize, usize)>,
    visited: HashSet<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use iamscope_core::types::{EdgeKind, Node, NodeKind};
    use serde_json::Map;

    /// Diamond with an extra tail:
    ///
    /// ```text
    /// 0 → 1 → 3 → 4
    /// 0 → 2 → 3
    /// ```
    fn diamond() -> IamGraph {
        let mut g = IamGraph::new();
        for i in 0..5 {
            g.add_node(Node::new(format!("user:n{i}@ex.com"), NodeKind::User, format!("n{i}")));
        }
        for (s, t) in [(0usize, 1usize), (0, 2), (1, 3), (2, 3), (3, 4)] {
            g.upsert_edge_idx(s, t, EdgeKind::CanImpersonate, Map::new());
        }
        g
    }

    #[test]
    fn finds_all_simple_paths() {
        let g = diamond();
        let paths = all_paths_between(&g, 0, 3, 5);
        assert_eq!(paths.len(), 2);
        for p in &paths {
            assert_eq!(p.node_indices.first(), Some(&0));
            assert_eq!(p.node_indices.last(), Some(&3));
            assert_eq!(p.edges.len(), p.node_indices.len() - 1);
        }
    }

    #[test]
    fn records_intermediate_targets_and_continues() {
        let g = diamond();
        let targets: HashSet<usize> = [3, 4].into_iter().collect();
        let paths = all_simple_paths(&g, 0, &targets, 5);
        // Two paths ending at 3, and two extended onward to 4.
        assert_eq!(paths.len(), 4);
        assert_eq!(paths.iter().filter(|p| *p.node_indices.last().unwrap() == 4).count(), 2);
    }

    #[test]
    fn bound_is_exact() {
        let g = diamond();
        // 0→3 needs 2 edges: excluded at max 1, included at exactly 2.
        assert!(all_paths_between(&g, 0, 3, 1).is_empty());
        assert_eq!(all_paths_between(&g, 0, 3, 2).len(), 2);
        // 0→4 needs 3 edges: excluded at max 2, included at exactly 3.
        assert!(all_paths_between(&g, 0, 4, 2).is_empty());
        assert_eq!(all_paths_between(&g, 0, 4, 3).len(), 2);
    }

    #[test]
    fn cycles_do_not_loop() {
        let mut g = IamGraph::new();
        for i in 0..4 {
            g.add_node(Node::new(format!("sa:n{i}@p.iam.gserviceaccount.com"), NodeKind::ServiceAccount, format!("n{i}")));
        }
        // 0 → 1 → 2 → 0 cycle, plus 2 → 3.
        for (s, t) in [(0usize, 1usize), (1, 2), (2, 0), (2, 3)] {
            g.upsert_edge_idx(s, t, EdgeKind::CanImpersonateSa, Map::new());
        }

        let paths = all_paths_between(&g, 0, 3, 10);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].node_indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn shortest_path_fewest_edges() {
        let mut g = diamond();
        // Add a direct edge 0 → 3; BFS must now prefer the single hop.
        g.upsert_edge_idx(0, 3, EdgeKind::CanImpersonateSa, Map::new());
        let walk = shortest_path(&g, 0, 3).unwrap();
        assert_eq!(walk.node_indices, vec![0, 3]);
        assert_eq!(walk.edges.len(), 1);
    }

    #[test]
    fn shortest_path_unreachable_and_degenerate() {
        let g = diamond();
        assert!(shortest_path(&g, 4, 0).is_none());
        assert!(shortest_path(&g, 0, 0).is_none());
    }
}
