//! Importance-sampling estimates of mutation placement on cell lineage trees.
//!
//! Trees are drawn from a randomized agglomerative proposal (`sampler`),
//! expanded into leaf-set masks (`subtree`), scored under the distribution
//! implied by the probability matrix (`scorer`), and combined into a
//! self-normalized estimate (`estimate`). `engine` runs the samples in
//! parallel.

pub mod config;
pub mod engine;
pub mod error;
pub mod estimate;
pub mod io;
pub mod matrix;
pub mod pipeline;
pub mod precision;
pub mod sampler;
pub mod scorer;
pub mod subtree;

pub use engine::{Engine, EngineConfig, NoProgress, QueryOutcome, SampleObserver, SampleSet};
pub use error::{PfError, Result};
pub use estimate::{aggregate, BatchPlan, BatchSummary, Estimate};
pub use matrix::ProbabilityMatrix;
pub use precision::Decimal;
pub use sampler::{sample_tree, SampledTree, SamplerConfig};
pub use scorer::{conditional_probability, tree_probability, ConditionalScore};
pub use subtree::{cell_mask, materialize, CellMask, JoinEdge};
