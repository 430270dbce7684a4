//! Parallel drivers for sampling, querying and estimating on a bounded worker pool.
//!
//! Samples are independent: sample i always draws from an RNG seeded with
//! (base seed, i), so results do not depend on the thread count or on the
//! order in which workers finish.

use std::sync::atomic::{AtomicUsize, Ordering};

use indicatif::ProgressBar;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::info;

use crate::error::{PfError, Result};
use crate::estimate::{aggregate, BatchPlan, Estimate};
use crate::matrix::ProbabilityMatrix;
use crate::precision::Decimal;
use crate::sampler::{sample_tree, SampledTree, SamplerConfig};
use crate::scorer::{conditional_probability, tree_probability};
use crate::subtree::{cell_mask, CellMask, JoinEdge};

/// Called once per completed sample; must not influence results
pub trait SampleObserver: Sync {
    fn on_sample(&self, completed: usize, total: usize);
}

/// Observer that ignores progress
pub struct NoProgress;

impl SampleObserver for NoProgress {
    fn on_sample(&self, _completed: usize, _total: usize) {}
}

impl SampleObserver for ProgressBar {
    fn on_sample(&self, _completed: usize, _total: usize) {
        self.inc(1);
    }
}

#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    pub sampler: SamplerConfig,
    /// Worker threads; 0 uses every core
    pub n_threads: usize,
    /// Base seed; drawn at random when absent
    pub seed: Option<u64>,
}

/// Trees drawn by `Engine::sample`, with views matching the three parallel lists
#[derive(Clone, Debug, Default)]
pub struct SampleSet {
    pub trees: Vec<SampledTree>,
}

impl SampleSet {
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn edges_list(&self) -> Vec<&[JoinEdge]> {
        self.trees.iter().map(|t| t.edges.as_slice()).collect()
    }

    pub fn subtrees_list(&self) -> Vec<&[CellMask]> {
        self.trees.iter().map(|t| t.subtrees.as_slice()).collect()
    }

    pub fn proposal_probs(&self) -> Vec<Decimal> {
        self.trees.iter().map(|t| t.proposal_prob.clone()).collect()
    }
}

/// Per-sample scores of one query
#[derive(Clone, Debug)]
pub struct QueryOutcome {
    /// numerator / denominator of the conditional score, per sample
    pub conditional_probs: Vec<Decimal>,
    /// Target-distribution likelihood of each tree
    pub origin_probs: Vec<Decimal>,
    /// Trees drawn for this query; `None` when presampled trees were used
    pub samples: Option<SampleSet>,
}

/// Partition-function estimation engine
pub struct Engine {
    config: EngineConfig,
    seed: u64,
    pool: ThreadPool,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.sampler.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.n_threads)
            .build()
            .map_err(|e| PfError::invalid_input(format!("thread pool: {}", e)))?;
        let seed = config.seed.unwrap_or_else(rand::random);
        info!(
            "engine ready: {} threads, seed {}",
            pool.current_num_threads(),
            seed
        );
        Ok(Self { config, seed, pool })
    }

    /// Base seed in effect, so a run can be reproduced
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Draw `n_samples` trees from the proposal distribution
    pub fn sample(
        &self,
        p: &ProbabilityMatrix,
        n_samples: usize,
        observer: &dyn SampleObserver,
    ) -> Result<SampleSet> {
        info!(
            "sampling {} trees over {} cells x {} mutations",
            n_samples,
            p.n_cells(),
            p.n_mutations()
        );
        let completed = AtomicUsize::new(0);
        let sampler = &self.config.sampler;
        let seed = self.seed;
        let trees = self.pool.install(|| {
            (0..n_samples)
                .into_par_iter()
                .map(|i| {
                    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                    let tree = sample_tree(p, sampler, &mut rng)?;
                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    observer.on_sample(done, n_samples);
                    Ok(tree)
                })
                .collect::<Result<Vec<_>>>()
        })?;
        info!("sampled {} trees", trees.len());
        Ok(SampleSet { trees })
    }

    /// Score `n_samples` trees for the probability that exactly `cells` carry
    /// `mutation`. Trees are drawn unless `presampled` supplies them.
    pub fn query(
        &self,
        p: &ProbabilityMatrix,
        cells: &[usize],
        mutation: usize,
        n_samples: usize,
        presampled: Option<&SampleSet>,
        observer: &dyn SampleObserver,
    ) -> Result<QueryOutcome> {
        let target = query_mask(p, cells, mutation)?;
        let drawn = match presampled {
            Some(_) => None,
            None => Some(self.sample(p, n_samples, observer)?),
        };
        let set = presampled
            .or(drawn.as_ref())
            .ok_or_else(|| PfError::invalid_input("no trees to score"))?;
        if set.len() < n_samples {
            return Err(PfError::invalid_input(format!(
                "{} samples requested but only {} presampled",
                n_samples,
                set.len()
            )));
        }
        let trees = &set.trees[..n_samples];

        let scores = self.pool.install(|| {
            trees
                .par_iter()
                .map(|tree| {
                    let conditional =
                        conditional_probability(p, &tree.subtrees, &target, mutation)?;
                    let origin = tree_probability(p, &tree.subtrees)?;
                    Ok((conditional.probability(), origin))
                })
                .collect::<Result<Vec<_>>>()
        })?;
        let (conditional_probs, origin_probs) = scores.into_iter().unzip();

        Ok(QueryOutcome {
            conditional_probs,
            origin_probs,
            samples: drawn,
        })
    }

    /// Query and aggregate in one call
    pub fn estimate(
        &self,
        p: &ProbabilityMatrix,
        cells: &[usize],
        mutation: usize,
        n_samples: usize,
        n_batches: Option<usize>,
        observer: &dyn SampleObserver,
    ) -> Result<(Estimate, QueryOutcome)> {
        BatchPlan::new(n_samples, n_batches.unwrap_or(1))?;
        let outcome = self.query(p, cells, mutation, n_samples, None, observer)?;
        let proposal_probs = outcome
            .samples
            .as_ref()
            .map(SampleSet::proposal_probs)
            .unwrap_or_default();
        let estimate = aggregate(
            &outcome.conditional_probs,
            &outcome.origin_probs,
            &proposal_probs,
            n_batches,
        )?;
        Ok((estimate, outcome))
    }
}

fn query_mask(p: &ProbabilityMatrix, cells: &[usize], mutation: usize) -> Result<CellMask> {
    if cells.is_empty() {
        return Err(PfError::invalid_input("query needs at least one cell"));
    }
    if mutation >= p.n_mutations() {
        return Err(PfError::invalid_input(format!(
            "mutation index {} out of range for {} mutations",
            mutation,
            p.n_mutations()
        )));
    }
    cell_mask(p.n_cells(), cells)
}
