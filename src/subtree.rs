//! Subtree materialization: the set of leaf cells beneath every node of a join tree.

use bitvec::prelude::*;

use crate::error::{PfError, Result};

/// Indicator over leaf cells, one bit per cell
pub type CellMask = BitVec<u64, Lsb0>;

/// One merge step: `parent` is the new node joining `left` and `right`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinEdge {
    pub parent: usize,
    pub left: usize,
    pub right: usize,
}

impl JoinEdge {
    pub fn new(parent: usize, left: usize, right: usize) -> Self {
        Self {
            parent,
            left,
            right,
        }
    }
}

/// Mask with exactly the given cells set
pub fn cell_mask(n_cells: usize, cells: &[usize]) -> Result<CellMask> {
    let mut mask = bitvec![u64, Lsb0; 0; n_cells];
    for &cell in cells {
        if cell >= n_cells {
            return Err(PfError::invalid_input(format!(
                "cell index {} out of range for {} cells",
                cell, n_cells
            )));
        }
        mask.set(cell, true);
    }
    Ok(mask)
}

/// Compute the leaf-set mask of every node 0..2n-1.
///
/// Leaves are nodes `0..n_cells`. Internal node ids are processed in
/// increasing order, so each edge must only reference children with smaller
/// ids that have not already been consumed by another parent.
pub fn materialize(edges: &[JoinEdge], n_cells: usize) -> Result<Vec<CellMask>> {
    if n_cells == 0 {
        return Err(PfError::malformed_tree("tree without leaves"));
    }
    let n_nodes = 2 * n_cells - 1;
    if edges.len() != n_cells - 1 {
        return Err(PfError::malformed_tree(format!(
            "expected {} edges for {} cells, got {}",
            n_cells - 1,
            n_cells,
            edges.len()
        )));
    }

    let mut by_parent: Vec<Option<JoinEdge>> = vec![None; n_nodes];
    for edge in edges {
        if edge.parent < n_cells || edge.parent >= n_nodes {
            return Err(PfError::malformed_tree(format!(
                "node {} is not an internal node id",
                edge.parent
            )));
        }
        if by_parent[edge.parent].replace(*edge).is_some() {
            return Err(PfError::malformed_tree(format!(
                "node {} is created twice",
                edge.parent
            )));
        }
    }

    let mut consumed = vec![false; n_nodes];
    let mut masks: Vec<CellMask> = Vec::with_capacity(n_nodes);
    for cell in 0..n_cells {
        let mut mask = bitvec![u64, Lsb0; 0; n_cells];
        mask.set(cell, true);
        masks.push(mask);
    }
    for node in n_cells..n_nodes {
        let edge = by_parent[node].ok_or_else(|| {
            PfError::malformed_tree(format!("no edge creates node {}", node))
        })?;
        for child in [edge.left, edge.right] {
            if child >= masks.len() {
                return Err(PfError::malformed_tree(format!(
                    "node {} references child {} before it exists",
                    node, child
                )));
            }
            if consumed[child] {
                return Err(PfError::malformed_tree(format!(
                    "child {} has more than one parent",
                    child
                )));
            }
            consumed[child] = true;
        }
        if edge.left == edge.right {
            return Err(PfError::malformed_tree(format!(
                "node {} joins {} with itself",
                node, edge.left
            )));
        }
        let mut mask = masks[edge.left].clone();
        for cell in masks[edge.right].iter_ones() {
            mask.set(cell, true);
        }
        masks.push(mask);
    }
    Ok(masks)
}
