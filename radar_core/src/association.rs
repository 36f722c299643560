//! Data association: sparse bipartite graph of gate-passing pairs,
//! connected-component partitioning (union-find), and per-component
//! assignment — Hungarian by default, greedy on oversized problems.
//!
//! Components are independent subproblems: a track and a cluster that share
//! no gate edge can never contend for each other, so each component is
//! solved on its own (and in parallel by the caller).

use std::collections::HashMap;

/// An edge between a track and a cluster that passed every enabled gate.
#[derive(Clone, Debug)]
pub struct AssignEdge {
    pub track_idx: usize,
    pub cluster_idx: usize,
    /// Position Mahalanobis distance squared (lower is better)
    pub cost: f64,
}

/// Sparse bipartite graph of feasible pairings.
#[derive(Clone, Debug, Default)]
pub struct BipartiteGraph {
    pub edges: Vec<AssignEdge>,
    pub n_tracks: usize,
    pub n_clusters: usize,
}

impl BipartiteGraph {
    pub fn new(n_tracks: usize, n_clusters: usize) -> Self {
        Self { edges: Vec::new(), n_tracks, n_clusters }
    }

    pub fn add_edge(&mut self, track_idx: usize, cluster_idx: usize, cost: f64) {
        self.edges.push(AssignEdge { track_idx, cluster_idx, cost });
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Union-Find (path halving + union by rank)
// ---------------------------------------------------------------------------

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect(), rank: vec![0; n] }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, x: usize, y: usize) {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return;
        }
        match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => self.parent[rx] = ry,
            std::cmp::Ordering::Greater => self.parent[ry] = rx,
            std::cmp::Ordering::Equal => {
                self.parent[ry] = rx;
                self.rank[rx] += 1;
            }
        }
    }
}

/// One independent assignment subproblem.
#[derive(Clone, Debug)]
pub struct Component {
    pub track_indices: Vec<usize>,
    pub cluster_indices: Vec<usize>,
    pub edges: Vec<AssignEdge>,
}

/// Partition the graph into connected components. Tracks are nodes
/// `0..n_tracks`, clusters are nodes `n_tracks..n_tracks+n_clusters`.
/// Components come out ordered by their smallest track index, so traversal
/// is deterministic for a given batch.
pub fn partition_components(graph: &BipartiteGraph) -> Vec<Component> {
    let mut uf = UnionFind::new(graph.n_tracks + graph.n_clusters);
    for e in &graph.edges {
        uf.union(e.track_idx, graph.n_tracks + e.cluster_idx);
    }

    let mut by_root: HashMap<usize, Component> = HashMap::new();
    for e in &graph.edges {
        let root = uf.find(e.track_idx);
        by_root
            .entry(root)
            .or_insert_with(|| Component {
                track_indices: Vec::new(),
                cluster_indices: Vec::new(),
                edges: Vec::new(),
            })
            .edges
            .push(e.clone());
    }

    let mut components: Vec<Component> = by_root.into_values().collect();
    for comp in &mut components {
        comp.track_indices = comp.edges.iter().map(|e| e.track_idx).collect();
        comp.track_indices.sort_unstable();
        comp.track_indices.dedup();
        comp.cluster_indices = comp.edges.iter().map(|e| e.cluster_idx).collect();
        comp.cluster_indices.sort_unstable();
        comp.cluster_indices.dedup();
    }
    components.sort_by_key(|c| c.track_indices[0]);
    components
}

// ---------------------------------------------------------------------------
// Assignment solvers
// ---------------------------------------------------------------------------

/// Result for one component: matched pairs plus both leftover sets.
#[derive(Clone, Debug, Default)]
pub struct Assignment {
    pub pairs: Vec<(usize, usize)>,
    /// Tracks with no assignment (missed this batch)
    pub unmatched_tracks: Vec<usize>,
    /// Clusters with no assignment (birth candidates)
    pub unmatched_clusters: Vec<usize>,
}

/// Globally optimal min-cost assignment for one component. Infeasible
/// (non-edge) and dummy slots cost `dummy_cost`, which must exceed any gate
/// threshold so a feasible pairing is always preferred over a miss.
pub fn hungarian_solve(component: &Component, dummy_cost: f64) -> Assignment {
    let nt = component.track_indices.len();
    let nc = component.cluster_indices.len();
    if nt == 0 || nc == 0 {
        return Assignment {
            pairs: vec![],
            unmatched_tracks: component.track_indices.clone(),
            unmatched_clusters: component.cluster_indices.clone(),
        };
    }

    let n = nt.max(nc);
    let mut cost = vec![dummy_cost; n * n];
    let track_local: HashMap<usize, usize> =
        component.track_indices.iter().enumerate().map(|(i, &t)| (t, i)).collect();
    let cluster_local: HashMap<usize, usize> =
        component.cluster_indices.iter().enumerate().map(|(j, &c)| (c, j)).collect();
    for e in &component.edges {
        if let (Some(&row), Some(&col)) =
            (track_local.get(&e.track_idx), cluster_local.get(&e.cluster_idx))
        {
            cost[row * n + col] = e.cost;
        }
    }

    let row_assign = kuhn_munkres(&cost, n);

    let mut pairs = Vec::new();
    let mut unmatched_tracks = Vec::new();
    let mut matched_clusters = vec![false; n];
    for (row, &col) in row_assign.iter().enumerate() {
        if row < nt && col < nc {
            pairs.push((component.track_indices[row], component.cluster_indices[col]));
            matched_clusters[col] = true;
        } else if row < nt {
            unmatched_tracks.push(component.track_indices[row]);
        }
    }
    let unmatched_clusters = (0..nc)
        .filter(|&j| !matched_clusters[j])
        .map(|j| component.cluster_indices[j])
        .collect();

    Assignment { pairs, unmatched_tracks, unmatched_clusters }
}

/// Greedy nearest-first assignment: sort edges by cost, take every edge
/// whose endpoints are both still free. Ties break on lower cluster id,
/// then lower track id. O(E log E) — the fallback for oversized batches.
pub fn greedy_solve(component: &Component) -> Assignment {
    let mut edges = component.edges.clone();
    edges.sort_by(|a, b| {
        a.cost
            .total_cmp(&b.cost)
            .then(a.cluster_idx.cmp(&b.cluster_idx))
            .then(a.track_idx.cmp(&b.track_idx))
    });

    let mut track_taken: HashMap<usize, bool> =
        component.track_indices.iter().map(|&t| (t, false)).collect();
    let mut cluster_taken: HashMap<usize, bool> =
        component.cluster_indices.iter().map(|&c| (c, false)).collect();

    let mut pairs = Vec::new();
    for e in &edges {
        let t_free = !track_taken[&e.track_idx];
        let c_free = !cluster_taken[&e.cluster_idx];
        if t_free && c_free {
            pairs.push((e.track_idx, e.cluster_idx));
            track_taken.insert(e.track_idx, true);
            cluster_taken.insert(e.cluster_idx, true);
        }
    }

    let unmatched_tracks =
        component.track_indices.iter().copied().filter(|t| !track_taken[t]).collect();
    let unmatched_clusters =
        component.cluster_indices.iter().copied().filter(|c| !cluster_taken[c]).collect();
    Assignment { pairs, unmatched_tracks, unmatched_clusters }
}

/// Kuhn–Munkres (Jonker–Volgenant style, O(n³)) on a square row-major cost
/// matrix. Returns `row_assignment[row] = column`.
fn kuhn_munkres(cost: &[f64], n: usize) -> Vec<usize> {
    // Row/column potentials; p[j] = row matched to column j (1-indexed)
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; n + 1];
    let mut p = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for row in 1..=n {
        p[0] = row;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;
            for j in 1..=n {
                if !used[j] {
                    let reduced = cost[(i0 - 1) * n + (j - 1)] - u[i0] - v[j];
                    if reduced < minv[j] {
                        minv[j] = reduced;
                        way[j] = j0;
                    }
                    if minv[j] < delta {
                        delta = minv[j];
                        j1 = j;
                    }
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

        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut row_assign = vec![0usize; n];
    for j in 1..=n {
        if p[j] != 0 {
            row_assign[p[j] - 1] = j - 1;
        }
    }
    row_assign
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn component(n_tracks: &[usize], n_clusters: &[usize], edges: &[(usize, usize, f64)]) -> Component {
        Component {
            track_indices: n_tracks.to_vec(),
            cluster_indices: n_clusters.to_vec(),
            edges: edges
                .iter()
                .map(|&(t, c, cost)| AssignEdge { track_idx: t, cluster_idx: c, cost })
                .collect(),
        }
    }

    #[test]
    fn kuhn_munkres_finds_known_optimum() {
        // [4 1 3; 2 0 5; 3 2 2] → optimal total 5
        let cost = vec![4.0, 1.0, 3.0, 2.0, 0.0, 5.0, 3.0, 2.0, 2.0];
        let assign = kuhn_munkres(&cost, 3);
        let total: f64 = assign.iter().enumerate().map(|(r, &c)| cost[r * 3 + c]).sum();
        assert!((total - 5.0).abs() < 1e-9, "expected 5, got {total}");
    }

    #[test]
    fn partition_separates_independent_subproblems() {
        let mut graph = BipartiteGraph::new(4, 4);
        graph.add_edge(0, 0, 1.0);
        graph.add_edge(0, 1, 2.0);
        graph.add_edge(2, 3, 2.0);
        let comps = partition_components(&graph);
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0].track_indices, vec![0]);
        assert_eq!(comps[1].track_indices, vec![2]);
    }

    #[test]
    fn hungarian_prefers_cross_assignment_over_greedy_trap() {
        // Greedy takes (0,0) at cost 1 then forces (1,1) at 50 → total 51.
        // Optimal is (0,1) + (1,0) → total 12.
        let comp = component(
            &[0, 1],
            &[0, 1],
            &[(0, 0, 1.0), (0, 1, 2.0), (1, 0, 10.0), (1, 1, 50.0)],
        );
        let optimal = hungarian_solve(&comp, 1000.0);
        assert_eq!(optimal.pairs.len(), 2);
        assert!(optimal.pairs.contains(&(0, 1)));
        assert!(optimal.pairs.contains(&(1, 0)));

        let greedy = greedy_solve(&comp);
        assert!(greedy.pairs.contains(&(0, 0)));
        assert!(greedy.pairs.contains(&(1, 1)));
    }

    #[test]
    fn at_most_one_pairing_per_side() {
        let comp = component(
            &[0],
            &[0, 1, 2],
            &[(0, 0, 3.0), (0, 1, 1.0), (0, 2, 2.0)],
        );
        let result = hungarian_solve(&comp, 1000.0);
        assert_eq!(result.pairs, vec![(0, 1)]);
        let mut leftover = result.unmatched_clusters.clone();
        leftover.sort_unstable();
        assert_eq!(leftover, vec![0, 2]);
        assert!(result.unmatched_tracks.is_empty());
    }

    #[test]
    fn greedy_breaks_cost_ties_on_lower_cluster_id() {
        let comp = component(&[0], &[3, 7], &[(0, 7, 2.0), (0, 3, 2.0)]);
        let result = greedy_solve(&comp);
        assert_eq!(result.pairs, vec![(0, 3)]);
    }

    #[test]
    fn empty_component_sides_fall_through() {
        let comp = component(&[1, 2], &[], &[]);
        let result = hungarian_solve(&comp, 1000.0);
        assert!(result.pairs.is_empty());
        assert_eq!(result.unmatched_tracks, vec![1, 2]);
    }
}
