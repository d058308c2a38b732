//! Phylogenetic Tree
//!
//! Arena representation of a rooted tree loaded once per run and treated as
//! read-only afterwards. Pruning produces a new tree; it never edits `self`.
//!
//! - `newick`: text parser
//! - `distance`: all-pairs patristic distances over a (pruned) tip set

pub mod distance;
mod newick;

pub use distance::DistanceMatrix;

use crate::error::{PhyloError, PhyloResult};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fs;
use std::path::Path;

/// A node in the tree arena
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// Parent index (`None` for the root)
    pub parent: Option<usize>,
    /// Length of the edge to the parent
    pub branch_length: f64,
    /// Tip label, or internal label / support value (possibly empty)
    pub label: String,
    pub children: Vec<usize>,
}

impl TreeNode {
    fn new(parent: Option<usize>) -> Self {
        Self {
            parent,
            branch_length: 0.0,
            label: String::new(),
            children: Vec::new(),
        }
    }

    pub fn is_tip(&self) -> bool {
        self.children.is_empty()
    }
}

/// Rooted phylogenetic tree with non-negative branch lengths
#[derive(Debug, Clone)]
pub struct PhyloTree {
    nodes: Vec<TreeNode>,
    root: usize,
    tip_index: FxHashMap<String, usize>,
}

impl PhyloTree {
    /// Parse a Newick string
    pub fn from_newick(newick: &str) -> PhyloResult<Self> {
        let (nodes, root) = newick::parse(newick)?;
        Self::from_nodes(nodes, root)
    }

    /// Load a Newick file
    pub fn from_file(path: &Path) -> PhyloResult<Self> {
        if !path.exists() {
            return Err(PhyloError::MissingInput(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path)?;
        let tree = Self::from_newick(&contents)?;
        tracing::debug!(
            path = %path.display(),
            tips = tree.num_tips(),
            nodes = tree.num_nodes(),
            "tree loaded"
        );
        Ok(tree)
    }

    fn from_nodes(nodes: Vec<TreeNode>, root: usize) -> PhyloResult<Self> {
        let mut tip_index = FxHashMap::default();
        for (idx, node) in nodes.iter().enumerate() {
            if node.is_tip() && tip_index.insert(node.label.clone(), idx).is_some() {
                return Err(PhyloError::DuplicateTip(node.label.clone()));
            }
        }
        Ok(Self {
            nodes,
            root,
            tip_index,
        })
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_tips(&self) -> usize {
        self.tip_index.len()
    }

    /// Node index of a tip by its exact label
    pub fn tip_node(&self, label: &str) -> Option<usize> {
        self.tip_index.get(label).copied()
    }

    pub fn has_tip(&self, label: &str) -> bool {
        self.tip_index.contains_key(label)
    }

    /// Tip labels in arena order
    pub fn tip_labels(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.is_tip())
            .map(|n| n.label.as_str())
            .collect()
    }

    /// Node indices with every parent visited before its children
    pub fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(idx) = stack.pop() {
            order.push(idx);
            stack.extend(self.nodes[idx].children.iter().rev().copied());
        }
        order
    }

    /// Root-to-node path length for every node
    pub fn depths(&self) -> Vec<f64> {
        let mut depths = vec![0.0; self.nodes.len()];
        for idx in self.preorder() {
            if let Some(parent) = self.nodes[idx].parent {
                depths[idx] = depths[parent] + self.nodes[idx].branch_length;
            }
        }
        depths
    }

    /// Prune to exactly `keep`, dropping every other tip and the internal
    /// nodes they leave behind.
    ///
    /// Unary nodes created by pruning are collapsed by summing the two
    /// edges, so patristic distances between retained tips are unchanged.
    /// The returned arena is in post-order (children before parents), with
    /// the root last.
    pub fn prune<S: AsRef<str>>(&self, keep: &[S]) -> PhyloResult<PhyloTree> {
        let mut keep_nodes: FxHashSet<usize> = FxHashSet::default();
        for label in keep {
            let label = label.as_ref();
            let node = self
                .tip_node(label)
                .ok_or_else(|| PhyloError::UnknownTip(label.to_string()))?;
            keep_nodes.insert(node);
        }
        if keep_nodes.is_empty() {
            return Err(PhyloError::invalid("keep", "cannot prune to an empty tip set"));
        }

        let mut postorder = self.preorder();
        postorder.reverse();

        // Per old node: (new index, length of the edge still owed to the parent)
        let mut carried: Vec<Option<(usize, f64)>> = vec![None; self.nodes.len()];
        let mut pruned: Vec<TreeNode> = Vec::with_capacity(keep_nodes.len() * 2);

        for old in postorder {
            let node = &self.nodes[old];
            if node.is_tip() {
                if keep_nodes.contains(&old) {
                    let mut tip = TreeNode::new(None);
                    tip.label = node.label.clone();
                    carried[old] = Some((pruned.len(), node.branch_length));
                    pruned.push(tip);
                }
                continue;
            }

            let kept: Vec<(usize, f64)> = node
                .children
                .iter()
                .filter_map(|&child| carried[child])
                .collect();

            carried[old] = match kept.len() {
                0 => None,
                1 => Some((kept[0].0, kept[0].1 + node.branch_length)),
                _ => {
                    let new_idx = pruned.len();
                    let mut internal = TreeNode::new(None);
                    internal.label = node.label.clone();
                    for &(child, length) in &kept {
                        pruned[child].parent = Some(new_idx);
                        pruned[child].branch_length = length;
                        internal.children.push(child);
                    }
                    pruned.push(internal);
                    Some((new_idx, node.branch_length))
                }
            };
        }

        let (root, _) = carried[self.root]
            .ok_or_else(|| PhyloError::invalid("keep", "no retained tips reachable from root"))?;
        pruned[root].parent = None;
        pruned[root].branch_length = 0.0;

        Self::from_nodes(pruned, root)
    }
}
