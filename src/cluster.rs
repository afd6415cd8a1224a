//! Transitive clustering of pairwise-related items.
//!
//! Similarity is not globally transitive, but duplicate families often
//! chain through intermediate near-duplicates, so a conservative grouping
//! threshold plus transitive closure avoids fragmented groups. One
//! disjoint-set implementation serves both the main grouping pass and the
//! stricter split-group pass.

use std::collections::HashMap;

/// Disjoint-set (union-find) over `0..size` with path compression and
/// union by rank.
#[derive(Debug)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    pub fn union(&mut self, left: usize, right: usize) {
        let left_root = self.find(left);
        let right_root = self.find(right);

        if left_root == right_root {
            return;
        }

        let left_rank = self.rank[left_root];
        let right_rank = self.rank[right_root];

        if left_rank < right_rank {
            self.parent[left_root] = right_root;
        } else if left_rank > right_rank {
            self.parent[right_root] = left_root;
        } else {
            self.parent[right_root] = left_root;
            self.rank[left_root] += 1;
        }
    }
}

/// Union every edge, then collect connected components with at least two
/// members. Members are sorted ascending and components ordered by their
/// smallest member, so output is deterministic regardless of edge order.
pub fn connected_components(
    size: usize,
    edges: impl IntoIterator<Item = (usize, usize)>,
) -> Vec<Vec<usize>> {
    let mut dsu = DisjointSet::new(size);
    for (a, b) in edges {
        dsu.union(a, b);
    }

    let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
    for idx in 0..size {
        let root = dsu.find(idx);
        components.entry(root).or_default().push(idx);
    }

    let mut groups: Vec<Vec<usize>> = components
        .into_values()
        .filter(|members| members.len() >= 2)
        .collect();

    for group in &mut groups {
        group.sort_unstable();
    }
    groups.sort_unstable_by_key(|g| g[0]);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singletons_have_no_groups() {
        let groups = connected_components(4, []);
        assert!(groups.is_empty());
    }

    #[test]
    fn union_is_transitive() {
        // A-B and B-C chain into one component even without an A-C edge.
        let groups = connected_components(3, [(0, 1), (1, 2)]);
        assert_eq!(groups, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn separate_components_stay_separate() {
        let groups = connected_components(5, [(0, 1), (3, 4)]);
        assert_eq!(groups, vec![vec![0, 1], vec![3, 4]]);
    }

    #[test]
    fn edge_order_does_not_change_output() {
        let forward = connected_components(6, [(0, 1), (1, 2), (4, 5)]);
        let backward = connected_components(6, [(4, 5), (2, 1), (1, 0)]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn find_compresses_paths() {
        let mut dsu = DisjointSet::new(4);
        dsu.union(0, 1);
        dsu.union(1, 2);
        dsu.union(2, 3);
        let root = dsu.find(3);
        assert_eq!(dsu.find(0), root);
        assert_eq!(dsu.find(1), root);
        assert_eq!(dsu.find(2), root);
    }

    #[test]
    fn redundant_unions_are_noops() {
        let mut dsu = DisjointSet::new(3);
        dsu.union(0, 1);
        dsu.union(0, 1);
        dsu.union(1, 0);
        assert_eq!(dsu.find(0), dsu.find(1));
        assert_ne!(dsu.find(0), dsu.find(2));
    }
}
