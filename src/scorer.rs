//! Target-distribution scoring of a materialized tree.
//!
//! Mutation columns are treated as independent given P. For a single column,
//! the likelihood that node mask v is exactly the set of carriers is
//! prod_i (P[i, j] if v[i] else 1 - P[i, j]).

use ndarray::ArrayView1;
use num_traits::Zero;

use crate::error::{PfError, Result};
use crate::matrix::ProbabilityMatrix;
use crate::precision::{add_rounded, mul_rounded, product, ratio, Decimal};
use crate::subtree::CellMask;

/// Likelihood that `mask` is exactly the carrier set of one mutation column
pub fn mask_likelihood(column: ArrayView1<f64>, mask: &CellMask) -> Result<Decimal> {
    product(
        column
            .iter()
            .enumerate()
            .map(|(cell, &p)| if mask[cell] { p } else { 1.0 - p }),
    )
}

fn check_masks(p: &ProbabilityMatrix, masks: &[CellMask]) -> Result<()> {
    if let Some(mask) = masks.iter().find(|m| m.len() != p.n_cells()) {
        return Err(PfError::invalid_input(format!(
            "subtree mask covers {} cells, matrix has {}",
            mask.len(),
            p.n_cells()
        )));
    }
    Ok(())
}

/// Probability under P that the tree's node masks hold the true carrier set of
/// every mutation: the product over columns of the summed mask likelihoods.
pub fn tree_probability(p: &ProbabilityMatrix, masks: &[CellMask]) -> Result<Decimal> {
    check_masks(p, masks)?;
    let mut total = Decimal::from(1);
    for mutation in 0..p.n_mutations() {
        let column = p.column(mutation);
        let mut column_sum = Decimal::zero();
        for mask in masks {
            column_sum = add_rounded(&column_sum, &mask_likelihood(column, mask)?);
        }
        total = mul_rounded(&total, &column_sum);
    }
    Ok(total)
}

/// Numerator and denominator of the probability that `target_cells` carry
/// `mutation` given that the carrier set is one of the tree's node masks.
///
/// The numerator is zero when no node realizes `target_cells`; that is an
/// ordinary outcome, not an error.
#[derive(Clone, Debug, PartialEq)]
pub struct ConditionalScore {
    pub numerator: Decimal,
    pub denominator: Decimal,
}

impl ConditionalScore {
    /// numerator / denominator, or zero when the denominator vanishes
    pub fn probability(&self) -> Decimal {
        if self.denominator.is_zero() {
            Decimal::zero()
        } else {
            ratio(&self.numerator, &self.denominator)
        }
    }
}

pub fn conditional_probability(
    p: &ProbabilityMatrix,
    masks: &[CellMask],
    target_cells: &CellMask,
    mutation: usize,
) -> Result<ConditionalScore> {
    check_masks(p, masks)?;
    if mutation >= p.n_mutations() {
        return Err(PfError::invalid_input(format!(
            "mutation index {} out of range for {} mutations",
            mutation,
            p.n_mutations()
        )));
    }
    if target_cells.len() != p.n_cells() {
        return Err(PfError::invalid_input(format!(
            "target mask covers {} cells, matrix has {}",
            target_cells.len(),
            p.n_cells()
        )));
    }

    let column = p.column(mutation);
    let mut numerator = Decimal::zero();
    let mut denominator = Decimal::zero();
    for mask in masks {
        let likelihood = mask_likelihood(column, mask)?;
        denominator = add_rounded(&denominator, &likelihood);
        if mask == target_cells {
            numerator = likelihood;
        }
    }
    Ok(ConditionalScore {
        numerator,
        denominator,
    })
}
