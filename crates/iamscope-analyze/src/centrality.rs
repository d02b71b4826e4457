//! Degree and betweenness centrality over the IAM graph.
//!
//! Betweenness uses Brandes' algorithm on the directed, unweighted graph,
//! normalized by `(n-1)(n-2)` so scores are comparable across graph sizes.
//! Exact computation is O(VE); fine at the scales a single tenant produces.

use std::collections::VecDeque;

use iamscope_graph::IamGraph;

/// Degree centrality: incident edges (in + out) over `|V| - 1`.
pub fn degree_centrality(graph: &IamGraph) -> Vec<f64> {
    let n = graph.node_count();
    if n <= 1 {
        return vec![0.0; n];
    }
    let denom = (n - 1) as f64;
    (0..n)
        .map(|idx| (graph.out_edges(idx).len() + graph.in_edges(idx).len()) as f64 / denom)
        .collect()
}

/// Betweenness centrality (Brandes, directed, unweighted, normalized).
pub fn betweenness_centrality(graph: &IamGraph) -> Vec<f64> {
    let n = graph.node_count();
    let mut centrality = vec![0.0; n];
    if n < 3 {
        return centrality;
    }

    // Parallel edges of different kinds connect the same pair once for
    // shortest-path counting.
    let adjacency: Vec<Vec<usize>> = (0..n)
        .map(|idx| {
            let mut successors: Vec<usize> =
                graph.out_edges(idx).iter().map(|e| e.target).collect();
            successors.sort_unstable();
            successors.dedup();
            successors
        })
        .collect();

    for source in 0..n {
        let mut stack = Vec::with_capacity(n);
        let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut sigma = vec![0.0_f64; n];
        let mut dist = vec![-1_i64; n];

        sigma[source] = 1.0;
        dist[source] = 0;

        let mut queue = VecDeque::new();
        queue.push_back(source);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            for &w in &adjacency[v] {
                if dist[w] < 0 {
                    dist[w] = dist[v] + 1;
                    queue.push_back(w);
                }
                if dist[w] == dist[v] + 1 {
                    sigma[w] += sigma[v];
                    predecessors[w].push(v);
                }
            }
        }

        let mut delta = vec![0.0_f64; n];
        while let Some(w) = stack.pop() {
            for &v in &predecessors[w] {
                delta[v] += (sigma[v] / sigma[w]) * (1.0 + delta[w]);
            }
            if w != source {
                centrality[w] += delta[w];
            }
        }
    }

    let scale = 1.0 / ((n - 1) as f64 * (n - 2) as f64);
    for value in &mut centrality {
        *value *= scale;
    }
    centrality
}

#[cfg(test)]
mod tests {
    use super::*;
    use iamscope_core::types::{EdgeKind, Node, NodeKind};
    use serde_json::Map;

    fn chain(n: usize) -> IamGraph {
        let mut g = IamGraph::new();
        for i in 0..n {
            g.add_node(Node::new(format!("user:n{i}@ex.com"), NodeKind::User, format!("n{i}")));
        }
        for i in 0..n - 1 {
            g.upsert_edge_idx(i, i + 1, EdgeKind::CanImpersonate, Map::new());
        }
        g
    }

    #[test]
    fn degree_centrality_chain() {
        let g = chain(3);
        let degree = degree_centrality(&g);
        // Middle node touches 2 of the possible 2 incidences.
        assert!((degree[0] - 0.5).abs() < 1e-9);
        assert!((degree[1] - 1.0).abs() < 1e-9);
        assert!((degree[2] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn degree_centrality_trivial_graphs() {
        let g = IamGraph::new();
        assert!(degree_centrality(&g).is_empty());

        let mut g = IamGraph::new();
        g.add_node(Node::new("user:solo@ex.com", NodeKind::User, "solo"));
        assert_eq!(degree_centrality(&g), vec![0.0]);
    }

    #[test]
    fn betweenness_middle_of_chain() {
        let g = chain(3);
        let betweenness = betweenness_centrality(&g);
        // Exactly one ordered pair (0, 2) routes through node 1:
        // raw 1.0, normalized by (n-1)(n-2) = 2.
        assert!((betweenness[1] - 0.5).abs() < 1e-9);
        assert!(betweenness[0].abs() < 1e-9);
        assert!(betweenness[2].abs() < 1e-9);
    }

    #[test]
    fn betweenness_longer_chain() {
        let g = chain(4);
        let betweenness = betweenness_centrality(&g);
        // Node 1 carries pairs (0,2) and (0,3): raw 2 / 6.
        assert!((betweenness[1] - 2.0 / 6.0).abs() < 1e-9);
        assert!((betweenness[2] - 2.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn betweenness_split_shortest_paths() {
        // Two equal-length routes 0→{1,2}→3: each middle node carries half
        // of the single (0,3) pair. n=4 → scale 1/6.
        let mut g = IamGraph::new();
        for i in 0..4 {
            g.add_node(Node::new(format!("user:n{i}@ex.com"), NodeKind::User, format!("n{i}")));
        }
        for (s, t) in [(0usize, 1usize), (0, 2), (1, 3), (2, 3)] {
            g.upsert_edge_idx(s, t, EdgeKind::CanImpersonate, Map::new());
        }

        let betweenness = betweenness_centrality(&g);
        assert!((betweenness[1] - 0.5 / 6.0).abs() < 1e-9);
        assert!((betweenness[2] - 0.5 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn parallel_edge_kinds_count_once() {
        let mut g = chain(3);
        // A second edge kind between 0 and 1 must not inflate path counts.
        g.upsert_edge_idx(0, 1, EdgeKind::CanImpersonateSa, Map::new());
        let betweenness = betweenness_centrality(&g);
        assert!((betweenness[1] - 0.5).abs() < 1e-9);
    }
}
