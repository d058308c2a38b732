//! Pairwise Distance Engine
//!
//! All-pairs patristic (cophenetic) distances over a labelled tip set.
//!
//! Algorithm, per row tip `i`:
//! 1. Mark the root-to-`i` path.
//! 2. One preorder sweep assigns every node the depth of its deepest marked
//!    ancestor, which for a tip `j` is the depth of LCA(i, j).
//! 3. `D[i][j] = depth(i) + depth(j) - 2 * depth(LCA)`.
//!
//! O(n_tips × n_nodes) overall. The formula is exactly symmetric in IEEE
//! arithmetic and gives exactly 0 on the diagonal. Rows run in parallel.

use crate::error::{PhyloError, PhyloResult};
use crate::tree::PhyloTree;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

/// Symmetric distance matrix whose rows and columns are tied to `labels`
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    labels: Vec<String>,
    index: FxHashMap<String, usize>,
    values: Vec<f64>,
}

impl DistanceMatrix {
    /// Prune `tree` to `tips` and compute distances between them
    ///
    /// Row/column order follows `tips` (duplicates dropped, first occurrence
    /// wins), never the tree's internal order.
    pub fn between_tips<S: AsRef<str>>(tree: &PhyloTree, tips: &[S]) -> PhyloResult<Self> {
        let labels = dedup_labels(tips);
        let pruned = tree.prune(&labels)?;
        Self::on_tree(&pruned, labels)
    }

    /// Distances on `tree` as-is (no pruning) for the given tips
    pub fn on_tree(tree: &PhyloTree, labels: Vec<String>) -> PhyloResult<Self> {
        let labels = dedup_labels(&labels);
        let tip_nodes: Vec<usize> = labels
            .iter()
            .map(|label| {
                tree.tip_node(label)
                    .ok_or_else(|| PhyloError::UnknownTip(label.clone()))
            })
            .collect::<PhyloResult<_>>()?;

        let n = labels.len();
        let depths = tree.depths();
        let preorder = tree.preorder();
        let nodes = tree.nodes();

        let mut values = vec![0.0; n * n];
        if n > 0 {
            values
                .par_chunks_mut(n)
                .enumerate()
                .for_each(|(row, out)| {
                    let tip = tip_nodes[row];
                    let mut on_path = vec![false; nodes.len()];
                    let mut cursor = Some(tip);
                    while let Some(node) = cursor {
                        on_path[node] = true;
                        cursor = nodes[node].parent;
                    }

                    let mut lca_depth = vec![0.0; nodes.len()];
                    for &node in &preorder {
                        lca_depth[node] = match nodes[node].parent {
                            _ if on_path[node] => depths[node],
                            Some(parent) => lca_depth[parent],
                            None => depths[node],
                        };
                    }

                    for (col, &other) in tip_nodes.iter().enumerate() {
                        out[col] = depths[tip] + depths[other] - 2.0 * lca_depth[other];
                    }
                });
        }

        let index = labels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.clone(), i))
            .collect();

        Ok(Self {
            labels,
            index,
            values,
        })
    }

    /// Re-key a tip matrix by species.
    ///
    /// `rows` pairs each species label with its tree tip. Several species may
    /// share a tip (e.g. infraspecific taxa mapped to the parent binomial);
    /// their mutual distance is 0 and they never act as each other's
    /// neighbours.
    pub fn for_species(tree: &PhyloTree, rows: &[(String, String)]) -> PhyloResult<Self> {
        let tips: Vec<&str> = rows.iter().map(|(_, tip)| tip.as_str()).collect();
        let tip_matrix = Self::between_tips(tree, &tips)?;
        tip_matrix.expand(rows)
    }

    /// Build a new matrix over `rows` (label, existing label) pairs
    pub fn expand(&self, rows: &[(String, String)]) -> PhyloResult<Self> {
        let mut labels = Vec::with_capacity(rows.len());
        let mut source = Vec::with_capacity(rows.len());
        let mut index = FxHashMap::default();
        for (label, existing) in rows {
            if index.contains_key(label) {
                continue;
            }
            let src = self
                .index_of(existing)
                .ok_or_else(|| PhyloError::UnknownTip(existing.clone()))?;
            index.insert(label.clone(), labels.len());
            labels.push(label.clone());
            source.push(src);
        }

        let n = labels.len();
        let mut values = vec![0.0; n * n];
        for (i, &si) in source.iter().enumerate() {
            for (j, &sj) in source.iter().enumerate() {
                values[i * n + j] = self.get(si, sj);
            }
        }

        Ok(Self {
            labels,
            index,
            values,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.labels.len() + j]
    }

    pub fn get_by_label(&self, a: &str, b: &str) -> Option<f64> {
        Some(self.get(self.index_of(a)?, self.index_of(b)?))
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.labels.len();
        &self.values[i * n..(i + 1) * n]
    }
}

fn dedup_labels<S: AsRef<str>>(labels: &[S]) -> Vec<String> {
    let mut seen = FxHashSet::default();
    labels
        .iter()
        .map(|l| l.as_ref())
        .filter(|l| seen.insert(*l))
        .map(|l| l.to_string())
        .collect()
}
