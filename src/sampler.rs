//! Proposal distribution: randomized agglomerative construction of binary cell lineage trees.
//!
//! Every step scores all pairs of active rows, turns the scores into a softmax
//! distribution, picks one pair and replaces it with the element-wise minimum
//! of the two rows. The probability of the chosen pair is multiplied into the
//! tree's proposal probability, so the sampler knows exactly how likely it was
//! to produce the tree it returns.

use ndarray::{Array1, ArrayView1};
use num_traits::One;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use tracing::debug;

use crate::error::{PfError, Result};
use crate::matrix::ProbabilityMatrix;
use crate::precision::{mul_rounded, to_decimal, Decimal};
use crate::subtree::{materialize, CellMask, JoinEdge};

/// Temperature doublings tried before the softmax is declared unstable
pub const MAX_TEMPERATURE_ATTEMPTS: usize = 10;

/// Knobs of the proposal distribution
#[derive(Clone, Debug, PartialEq)]
pub struct SamplerConfig {
    /// Always take the most probable pair instead of sampling
    pub greedy: bool,
    /// Softmax temperature; probabilities are softmax(-score / (2 * temperature))
    pub temperature: f64,
    /// Weight of the shared-mutation term in the join score
    pub leafness_coefficient: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            greedy: false,
            temperature: 1.0,
            leafness_coefficient: 10.0,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(PfError::invalid_input(format!(
                "temperature must be positive and finite, got {}",
                self.temperature
            )));
        }
        if !self.leafness_coefficient.is_finite() {
            return Err(PfError::invalid_input(format!(
                "leafness coefficient must be finite, got {}",
                self.leafness_coefficient
            )));
        }
        Ok(())
    }
}

/// One tree drawn from the proposal distribution
#[derive(Clone, Debug)]
pub struct SampledTree {
    /// Merge steps in the order they were taken
    pub edges: Vec<JoinEdge>,
    /// Leaf-set mask of every node, indexed by node id
    pub subtrees: Vec<CellMask>,
    /// Probability that the sampler produced exactly this merge sequence
    pub proposal_prob: Decimal,
}

impl SampledTree {
    pub fn n_cells(&self) -> usize {
        (self.subtrees.len() + 1) / 2
    }

    /// Cells beneath `node`
    pub fn cells_of(&self, node: usize) -> Vec<usize> {
        self.subtrees[node].iter_ones().collect()
    }
}

/// Row currently taking part in the agglomeration, tagged with its node id
struct ActiveRow {
    node: usize,
    values: Array1<f64>,
}

/// Shared-mutation overlap: sum of the element-wise minimum
pub fn leafness_score(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x.min(*y)).sum()
}

/// Pairs with lower scores are joined sooner
pub fn join_priority(a: ArrayView1<f64>, b: ArrayView1<f64>, leafness_coefficient: f64) -> f64 {
    let distance = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt();
    distance - leafness_coefficient * leafness_score(a, b)
}

/// Softmax of `-score / (2 * temperature)`.
///
/// If any probability comes out non-finite the temperature is doubled and the
/// softmax recomputed, at most `MAX_TEMPERATURE_ATTEMPTS` times. Returns the
/// probabilities together with the temperature that produced them.
pub fn join_probabilities(scores: &[f64], temperature: f64) -> Result<(Vec<f64>, f64)> {
    let mut current = temperature;
    for attempt in 1..=MAX_TEMPERATURE_ATTEMPTS {
        let logits: Vec<f64> = scores.iter().map(|s| -s / (2.0 * current)).collect();
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
        let total: f64 = weights.iter().sum();
        let probs: Vec<f64> = weights.iter().map(|w| w / total).collect();
        if probs.iter().all(|p| p.is_finite()) {
            return Ok((probs, current));
        }
        if attempt == MAX_TEMPERATURE_ATTEMPTS {
            break;
        }
        debug!(
            "softmax non-finite at temperature {}, retrying with {}",
            current,
            current * 2.0
        );
        current *= 2.0;
    }
    Err(PfError::NumericalInstability {
        attempts: MAX_TEMPERATURE_ATTEMPTS,
        temperature: current,
    })
}

/// Index of the chosen pair. Greedy ties go to the first pair in row order.
fn choose_pair<R: Rng + ?Sized>(probs: &[f64], greedy: bool, rng: &mut R) -> Result<usize> {
    if greedy {
        let mut best = 0;
        for (idx, &p) in probs.iter().enumerate() {
            if p > probs[best] {
                best = idx;
            }
        }
        Ok(best)
    } else {
        let dist = WeightedIndex::new(probs)
            .map_err(|e| PfError::degenerate_weights(format!("join probabilities: {}", e)))?;
        Ok(dist.sample(rng))
    }
}

/// Draw the merge sequence of one tree and its proposal probability.
///
/// Leaves keep ids `0..n_cells`; the k-th merge creates node `n_cells + k`.
pub fn sample_join_tree<R: Rng + ?Sized>(
    p: &ProbabilityMatrix,
    config: &SamplerConfig,
    rng: &mut R,
) -> Result<(Vec<JoinEdge>, Decimal)> {
    let n_cells = p.n_cells();
    let mut active: Vec<ActiveRow> = (0..n_cells)
        .map(|cell| ActiveRow {
            node: cell,
            values: p.row(cell).to_owned(),
        })
        .collect();
    let mut edges = Vec::with_capacity(n_cells.saturating_sub(1));
    let mut proposal_prob = Decimal::one();
    let mut next_node = n_cells;

    while active.len() > 1 {
        let mut pairs = Vec::with_capacity(active.len() * (active.len() - 1) / 2);
        let mut scores = Vec::with_capacity(pairs.capacity());
        for a in 0..active.len() {
            for b in (a + 1)..active.len() {
                pairs.push((a, b));
                scores.push(join_priority(
                    active[a].values.view(),
                    active[b].values.view(),
                    config.leafness_coefficient,
                ));
            }
        }

        let (probs, _) = join_probabilities(&scores, config.temperature)?;
        let chosen = choose_pair(&probs, config.greedy, rng)?;
        proposal_prob = mul_rounded(&proposal_prob, &to_decimal(probs[chosen])?);

        // b > a, so removing b first keeps a's position valid
        let (a, b) = pairs[chosen];
        let right = active.remove(b);
        let left = active.remove(a);
        let values: Array1<f64> = left
            .values
            .iter()
            .zip(right.values.iter())
            .map(|(x, y)| x.min(*y))
            .collect();
        edges.push(JoinEdge::new(next_node, left.node, right.node));
        active.push(ActiveRow {
            node: next_node,
            values,
        });
        next_node += 1;
    }

    Ok((edges, proposal_prob))
}

/// Draw one tree and materialize its subtree masks
pub fn sample_tree<R: Rng + ?Sized>(
    p: &ProbabilityMatrix,
    config: &SamplerConfig,
    rng: &mut R,
) -> Result<SampledTree> {
    let (edges, proposal_prob) = sample_join_tree(p, config, rng)?;
    let subtrees = materialize(&edges, p.n_cells())?;
    Ok(SampledTree {
        edges,
        subtrees,
        proposal_prob,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precision::to_f64;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn greedy() -> SamplerConfig {
        SamplerConfig {
            greedy: true,
            temperature: 1.0,
            leafness_coefficient: 2.0,
        }
    }

    #[test]
    fn test_two_cells_single_edge() {
        let p = ProbabilityMatrix::from_rows(&[vec![0.9], vec![0.1]]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let tree = sample_tree(&p, &greedy(), &mut rng).unwrap();
        assert_eq!(tree.edges, vec![JoinEdge::new(2, 0, 1)]);
        assert_eq!(tree.cells_of(0), vec![0]);
        assert_eq!(tree.cells_of(1), vec![1]);
        assert_eq!(tree.cells_of(2), vec![0, 1]);
        assert_eq!(tree.proposal_prob, Decimal::one());
    }

    #[test]
    fn test_single_cell_has_no_edges() {
        let p = ProbabilityMatrix::from_rows(&[vec![0.3, 0.7]]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let tree = sample_tree(&p, &SamplerConfig::default(), &mut rng).unwrap();
        assert!(tree.edges.is_empty());
        assert_eq!(tree.subtrees.len(), 1);
        assert_eq!(tree.proposal_prob, Decimal::one());
    }

    #[test]
    fn test_greedy_merges_closest_pair_first() {
        let p = ProbabilityMatrix::from_rows(&[
            vec![0.9, 0.9, 0.1],
            vec![0.9, 0.85, 0.1],
            vec![0.05, 0.1, 0.95],
        ])
        .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let tree = sample_tree(&p, &greedy(), &mut rng).unwrap();
        assert_eq!(tree.edges[0], JoinEdge::new(3, 0, 1));
        assert_eq!(tree.edges[1], JoinEdge::new(4, 2, 3));
    }

    #[test]
    fn test_random_trees_are_full_binary_trees() {
        let rows: Vec<Vec<f64>> = (0..7)
            .map(|i| (0..4).map(|j| ((i * 3 + j * 5) % 10) as f64 / 10.0).collect())
            .collect();
        let p = ProbabilityMatrix::from_rows(&rows).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let tree = sample_tree(&p, &SamplerConfig::default(), &mut rng).unwrap();
            assert_eq!(tree.edges.len(), 6);
            assert_eq!(tree.subtrees.len(), 13);

            let mut seen_as_child = vec![0usize; 13];
            for edge in &tree.edges {
                seen_as_child[edge.left] += 1;
                seen_as_child[edge.right] += 1;
            }
            assert!(seen_as_child[..12].iter().all(|&c| c == 1));
            assert_eq!(seen_as_child[12], 0);

            for cell in 0..7 {
                assert_eq!(tree.cells_of(cell), vec![cell]);
            }
            assert_eq!(tree.cells_of(12), (0..7).collect::<Vec<_>>());

            for a in &tree.subtrees {
                for b in &tree.subtrees {
                    let shared = a.iter_ones().filter(|&i| b[i]).count();
                    let laminar = shared == 0
                        || shared == a.count_ones()
                        || shared == b.count_ones();
                    assert!(laminar);
                }
            }

            let prob = to_f64(&tree.proposal_prob);
            assert!(prob > 0.0 && prob <= 1.0);
        }
    }

    #[test]
    fn test_same_seed_same_tree() {
        let p = ProbabilityMatrix::from_rows(&[
            vec![0.2, 0.8],
            vec![0.3, 0.6],
            vec![0.9, 0.1],
            vec![0.5, 0.5],
        ])
        .unwrap();
        let a = sample_tree(&p, &SamplerConfig::default(), &mut StdRng::seed_from_u64(3)).unwrap();
        let b = sample_tree(&p, &SamplerConfig::default(), &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a.edges, b.edges);
        assert_eq!(a.proposal_prob, b.proposal_prob);
    }

    #[test]
    fn test_softmax_sums_to_one_and_prefers_low_scores() {
        let (probs, temperature) = join_probabilities(&[0.0, 1.0, 2.0], 1.0).unwrap();
        assert_eq!(temperature, 1.0);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(probs[0] > probs[1] && probs[1] > probs[2]);
        assert!((probs[0] / probs[1] - 0.5f64.exp()).abs() < 1e-12);
    }

    #[test]
    fn test_softmax_doubles_temperature_on_overflow() {
        let (probs, temperature) = join_probabilities(&[-1.5e308, 0.0], 0.25).unwrap();
        assert_eq!(temperature, 0.5);
        assert_eq!(probs, vec![1.0, 0.0]);
    }

    #[test]
    fn test_softmax_gives_up_after_bounded_attempts() {
        let err = join_probabilities(&[f64::NAN, 0.0], 1.0).unwrap_err();
        match err {
            PfError::NumericalInstability {
                attempts,
                temperature,
            } => {
                assert_eq!(attempts, MAX_TEMPERATURE_ATTEMPTS);
                assert_eq!(temperature, 512.0);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_greedy_tie_goes_to_first_pair() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(choose_pair(&[0.25, 0.5, 0.25, 0.0], true, &mut rng).unwrap(), 1);
        assert_eq!(choose_pair(&[0.5, 0.5], true, &mut rng).unwrap(), 0);
    }

    #[test]
    fn test_leafness_and_priority() {
        let a = ndarray::array![1.0, 0.5, 0.0];
        let b = ndarray::array![1.0, 0.25, 1.0];
        assert!((leafness_score(a.view(), b.view()) - 1.25).abs() < 1e-12);
        let expected = (0.0625f64 + 1.0).sqrt() - 2.0 * 1.25;
        assert!((join_priority(a.view(), b.view(), 2.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_config_validation() {
        assert!(SamplerConfig::default().validate().is_ok());
        let bad = SamplerConfig {
            temperature: 0.0,
            ..SamplerConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
