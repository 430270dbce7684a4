//! Self-normalized importance sampling over sampled trees.
//!
//! Sample i carries a conditional probability c_i, a target likelihood o_i and
//! a proposal probability q_i. With weights w_i = o_i / q_i the estimate is
//! sum(c_i * w_i) / sum(w_i), optionally computed independently per batch.

use std::ops::Range;

use num_traits::Zero;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};
use statrs::statistics::Statistics;

use crate::error::{PfError, Result};
use crate::precision::{add_rounded, mul_rounded, ratio, to_f64, Decimal};

/// Output of `aggregate`
#[derive(Clone, Debug, PartialEq)]
pub enum Estimate {
    /// One ratio over every sample
    Single(Decimal),
    /// One ratio per batch, in batch order
    Batched(Vec<Decimal>),
}

impl Estimate {
    /// Per-batch values; a single estimate counts as one batch
    pub fn values(&self) -> &[Decimal] {
        match self {
            Estimate::Single(value) => std::slice::from_ref(value),
            Estimate::Batched(values) => values,
        }
    }
}

/// Contiguous sample ranges, one per batch.
///
/// Every batch holds `n_samples / n_batches` samples except the last, which
/// also takes the remainder, so no sample is left out.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchPlan {
    ranges: Vec<Range<usize>>,
}

impl BatchPlan {
    pub fn new(n_samples: usize, n_batches: usize) -> Result<Self> {
        if n_batches == 0 || n_samples / n_batches == 0 {
            return Err(PfError::EmptyBatch {
                n_samples,
                n_batches,
            });
        }
        let size = n_samples / n_batches;
        let ranges = (0..n_batches)
            .map(|b| {
                let end = if b + 1 == n_batches {
                    n_samples
                } else {
                    (b + 1) * size
                };
                b * size..end
            })
            .collect();
        Ok(Self { ranges })
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Batch sizes in order
    pub fn sizes(&self) -> Vec<usize> {
        self.ranges.iter().map(|r| r.len()).collect()
    }
}

/// w_i = origin_i / proposal_i
pub fn importance_weights(origin_probs: &[Decimal], proposal_probs: &[Decimal]) -> Result<Vec<Decimal>> {
    origin_probs
        .iter()
        .zip(proposal_probs)
        .enumerate()
        .map(|(i, (origin, proposal))| {
            if proposal.is_zero() {
                Err(PfError::degenerate_weights(format!(
                    "sample {} has zero proposal probability",
                    i
                )))
            } else {
                Ok(ratio(origin, proposal))
            }
        })
        .collect()
}

/// sum(c_i * w_i) / sum(w_i)
pub fn weighted_estimate(conditional_probs: &[Decimal], weights: &[Decimal]) -> Result<Decimal> {
    let mut numerator = Decimal::zero();
    let mut denominator = Decimal::zero();
    for (cond, weight) in conditional_probs.iter().zip(weights) {
        numerator = add_rounded(&numerator, &mul_rounded(cond, weight));
        denominator = add_rounded(&denominator, weight);
    }
    if denominator.is_zero() {
        return Err(PfError::degenerate_weights(
            "importance weights sum to zero",
        ));
    }
    Ok(ratio(&numerator, &denominator))
}

/// Combine per-sample results into one estimate, or one per batch when
/// `n_batches` is given.
pub fn aggregate(
    conditional_probs: &[Decimal],
    origin_probs: &[Decimal],
    proposal_probs: &[Decimal],
    n_batches: Option<usize>,
) -> Result<Estimate> {
    let n_samples = conditional_probs.len();
    if origin_probs.len() != n_samples || proposal_probs.len() != n_samples {
        return Err(PfError::invalid_input(format!(
            "sample lists differ in length: {} conditional, {} origin, {} proposal",
            n_samples,
            origin_probs.len(),
            proposal_probs.len()
        )));
    }

    let plan = BatchPlan::new(n_samples, n_batches.unwrap_or(1))?;
    let weights = importance_weights(origin_probs, proposal_probs)?;
    let estimates = plan
        .ranges()
        .iter()
        .map(|range| {
            weighted_estimate(
                &conditional_probs[range.clone()],
                &weights[range.clone()],
            )
        })
        .collect::<Result<Vec<_>>>()?;

    match n_batches {
        None => Ok(Estimate::Single(estimates.into_iter().next().unwrap_or_default())),
        Some(_) => Ok(Estimate::Batched(estimates)),
    }
}

/// Spread of per-batch estimates
#[derive(Clone, Debug, Serialize)]
pub struct BatchSummary {
    pub n_batches: usize,
    pub mean: f64,
    /// Sample standard deviation; absent with a single batch
    pub std_dev: Option<f64>,
    pub confidence: f64,
    /// Student-t interval for the mean; absent with a single batch
    pub interval: Option<(f64, f64)>,
}

impl BatchSummary {
    pub fn from_estimates(estimates: &[Decimal], confidence: f64) -> Result<Self> {
        if estimates.is_empty() {
            return Err(PfError::invalid_input("no batch estimates to summarize"));
        }
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(PfError::invalid_input(format!(
                "confidence must lie in (0, 1), got {}",
                confidence
            )));
        }
        let values: Vec<f64> = estimates.iter().map(to_f64).collect();
        let n = values.len();
        let mean = values.iter().mean();
        if n < 2 {
            return Ok(Self {
                n_batches: n,
                mean,
                std_dev: None,
                confidence,
                interval: None,
            });
        }

        let std_dev = values.iter().std_dev();
        let t = StudentsT::new(0.0, 1.0, (n - 1) as f64)
            .map_err(|e| PfError::invalid_input(e.to_string()))?;
        let half_width = t.inverse_cdf(0.5 + confidence / 2.0) * std_dev / (n as f64).sqrt();
        Ok(Self {
            n_batches: n,
            mean,
            std_dev: Some(std_dev),
            confidence,
            interval: Some((mean - half_width, mean + half_width)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precision::to_decimal;

    fn decimals(values: &[f64]) -> Vec<Decimal> {
        values.iter().map(|&v| to_decimal(v).unwrap()).collect()
    }

    fn close(a: &Decimal, b: &Decimal) -> bool {
        (a - b).abs() < to_decimal(1e-30).unwrap()
    }

    #[test]
    fn test_weighted_average_by_hand() {
        let cond = decimals(&[1.0, 0.0]);
        let origin = decimals(&[0.375, 0.125]);
        let proposal = decimals(&[0.5, 0.5]);
        // weights 0.75 and 0.25
        let estimate = aggregate(&cond, &origin, &proposal, None).unwrap();
        match estimate {
            Estimate::Single(value) => assert!(close(&value, &to_decimal(0.75).unwrap())),
            other => panic!("expected single estimate, got {:?}", other),
        }
    }

    #[test]
    fn test_invariant_to_proposal_rescaling() {
        let cond = decimals(&[0.2, 0.9, 0.4, 0.0]);
        let origin = decimals(&[1e-5, 3e-6, 2e-5, 7e-7]);
        let proposal = decimals(&[0.01, 0.2, 0.03, 0.5]);
        let scaled: Vec<Decimal> = proposal
            .iter()
            .map(|q| mul_rounded(q, &Decimal::from(7)))
            .collect();
        let a = aggregate(&cond, &origin, &proposal, None).unwrap();
        let b = aggregate(&cond, &origin, &scaled, None).unwrap();
        assert!(close(&a.values()[0], &b.values()[0]));
    }

    #[test]
    fn test_one_batch_equals_unbatched() {
        let cond = decimals(&[0.2, 0.9, 0.4]);
        let origin = decimals(&[0.1, 0.3, 0.2]);
        let proposal = decimals(&[0.4, 0.2, 0.1]);
        let single = aggregate(&cond, &origin, &proposal, None).unwrap();
        let batched = aggregate(&cond, &origin, &proposal, Some(1)).unwrap();
        assert!(matches!(single, Estimate::Single(_)));
        assert!(matches!(batched, Estimate::Batched(ref v) if v.len() == 1));
        assert_eq!(single.values(), batched.values());
    }

    #[test]
    fn test_batches_are_independent_ratios() {
        let cond = decimals(&[1.0, 0.0, 0.5, 0.5]);
        let origin = decimals(&[0.2, 0.2, 0.1, 0.3]);
        let proposal = decimals(&[0.5, 0.5, 0.5, 0.5]);
        let estimate = aggregate(&cond, &origin, &proposal, Some(2)).unwrap();
        let values = estimate.values();
        assert_eq!(values.len(), 2);
        assert!(close(&values[0], &to_decimal(0.5).unwrap()));
        assert!(close(&values[1], &to_decimal(0.5).unwrap()));
    }

    #[test]
    fn test_remainder_goes_to_last_batch() {
        let plan = BatchPlan::new(10, 3).unwrap();
        assert_eq!(plan.sizes(), vec![3, 3, 4]);
        assert_eq!(plan.sizes().iter().sum::<usize>(), 10);
        assert_eq!(plan.ranges()[2], 6..10);
        assert_eq!(BatchPlan::new(9, 3).unwrap().sizes(), vec![3, 3, 3]);
    }

    #[test]
    fn test_empty_batches_are_rejected() {
        assert!(matches!(
            BatchPlan::new(2, 3),
            Err(PfError::EmptyBatch {
                n_samples: 2,
                n_batches: 3
            })
        ));
        assert!(matches!(BatchPlan::new(5, 0), Err(PfError::EmptyBatch { .. })));
        assert!(matches!(
            aggregate(&[], &[], &[], None),
            Err(PfError::EmptyBatch { .. })
        ));
    }

    #[test]
    fn test_degenerate_weights() {
        let cond = decimals(&[0.5]);
        assert!(matches!(
            aggregate(&cond, &decimals(&[0.1]), &decimals(&[0.0]), None),
            Err(PfError::DegenerateWeights { .. })
        ));
        assert!(matches!(
            aggregate(&cond, &decimals(&[0.0]), &decimals(&[0.4]), None),
            Err(PfError::DegenerateWeights { .. })
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let err = aggregate(&decimals(&[0.5]), &decimals(&[0.1, 0.2]), &decimals(&[0.3]), None);
        assert!(matches!(err, Err(PfError::InvalidInput { .. })));
    }

    #[test]
    fn test_batch_summary() {
        let summary = BatchSummary::from_estimates(&decimals(&[0.4, 0.5, 0.6]), 0.95).unwrap();
        assert_eq!(summary.n_batches, 3);
        assert!((summary.mean - 0.5).abs() < 1e-12);
        assert!((summary.std_dev.unwrap() - 0.1).abs() < 1e-12);
        let (lo, hi) = summary.interval.unwrap();
        // t(0.975, 2) = 4.3027
        let half = 4.302652729911275 * 0.1 / 3f64.sqrt();
        assert!((lo - (0.5 - half)).abs() < 1e-6);
        assert!((hi - (0.5 + half)).abs() < 1e-6);

        let single = BatchSummary::from_estimates(&decimals(&[0.4]), 0.95).unwrap();
        assert!(single.std_dev.is_none() && single.interval.is_none());
        assert!(BatchSummary::from_estimates(&[], 0.95).is_err());
    }
}
