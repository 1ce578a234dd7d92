//! Maximum-weight bipartite matching.
//!
//! Solved as an assignment problem with the Hungarian (Kuhn-Munkres) method: edges cost their
//! negated weight, absent pairs cost 0, so a minimum-cost assignment restricted to its real edges
//! is a maximum-weight matching. Only vertices with at least one edge enter the cost matrix.

use std::collections::HashMap;

/// Weighted edges between `num_left` left vertices and `num_right` right vertices.
#[derive(Debug, Clone, Default)]
pub struct BipartiteGraph {
    num_left: usize,
    num_right: usize,
    /// (left, right) -> weight; duplicates keep the heavier edge
    edges: HashMap<(usize, usize), f64>,
}

/// A matching: each vertex paired with at most one vertex of the other side.
#[derive(Debug, Clone, PartialEq)]
pub struct Matching {
    /// left vertex -> matched right vertex
    pub left: Vec<Option<usize>>,
    /// right vertex -> matched left vertex
    pub right: Vec<Option<usize>>,
    pub total_weight: f64,
}

impl Matching {
    /// Matched `(left, right)` pairs in left-vertex order.
    pub fn pairs(&self) -> Vec<(usize, usize)> {
        self.left
            .iter()
            .enumerate()
            .filter_map(|(u, v)| v.map(|v| (u, v)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.left.iter().filter(|v| v.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BipartiteGraph {
    pub fn new(num_left: usize, num_right: usize) -> Self {
        BipartiteGraph {
            num_left,
            num_right,
            edges: HashMap::new(),
        }
    }

    /// Graph with an edge for every matrix entry strictly above `threshold`.
    pub fn from_weights(weights: &[Vec<f64>], num_right: usize, threshold: f64) -> Self {
        let mut graph = BipartiteGraph::new(weights.len(), num_right);
        for (u, row) in weights.iter().enumerate() {
            for (v, &w) in row.iter().enumerate() {
                if w > threshold {
                    graph.add_edge(u, v, w);
                }
            }
        }
        graph
    }

    /// Add an edge. Edges with non-positive weight can never raise the total and are dropped.
    ///
    /// # Panics
    /// If either endpoint is out of range.
    pub fn add_edge(&mut self, u: usize, v: usize, weight: f64) {
        assert!(
            u < self.num_left && v < self.num_right,
            "edge ({}, {}) outside a {}x{} graph",
            u,
            v,
            self.num_left,
            self.num_right
        );
        if !(weight > 0.0) {
            return;
        }
        let slot = self.edges.entry((u, v)).or_insert(weight);
        if weight > *slot {
            *slot = weight;
        }
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn weight(&self, u: usize, v: usize) -> Option<f64> {
        self.edges.get(&(u, v)).copied()
    }

    /// Maximum total-weight matching.
    pub fn max_weight_matching(&self) -> Matching {
        let mut matching = Matching {
            left: vec![None; self.num_left],
            right: vec![None; self.num_right],
            total_weight: 0.0,
        };
        if self.edges.is_empty() {
            return matching;
        }

        // Compact to the vertices that carry edges.
        let mut lefts: Vec<usize> = self.edges.keys().map(|&(u, _)| u).collect();
        let mut rights: Vec<usize> = self.edges.keys().map(|&(_, v)| v).collect();
        lefts.sort_unstable();
        lefts.dedup();
        rights.sort_unstable();
        rights.dedup();
        let left_pos: HashMap<usize, usize> =
            lefts.iter().enumerate().map(|(i, &u)| (u, i)).collect();
        let right_pos: HashMap<usize, usize> =
            rights.iter().enumerate().map(|(j, &v)| (v, j)).collect();

        let n = lefts.len().max(rights.len());
        let mut cost = vec![vec![0.0f64; n]; n];
        for (&(u, v), &w) in &self.edges {
            cost[left_pos[&u]][right_pos[&v]] = -w;
        }

        for (i, j) in hungarian(&cost) {
            if i >= lefts.len() || j >= rights.len() {
                continue;
            }
            let (u, v) = (lefts[i], rights[j]);
            if let Some(w) = self.weight(u, v) {
                matching.left[u] = Some(v);
                matching.right[v] = Some(u);
                matching.total_weight += w;
            }
        }
        matching
    }
}

/// Minimum-cost perfect assignment on a square matrix, as `(row, col)` pairs.
fn hungarian(cost: &[Vec<f64>]) -> Vec<(usize, usize)> {
    let n = cost.len();
    // 1-indexed potentials; column 0 is a virtual start column.
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; n + 1];
    let mut p = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;
            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let cur = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        // Augment along the alternating path.
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    (1..=n).map(|j| (p[j] - 1, j - 1)).collect()
}
