//! Command-line configuration.
//!
//! `cltpf estimate input.SC 0.0001 0.1 --cells c1,c4 --mutation m7 -n 2000 -b 10`
//! `cltpf sample input.SC 0.0001 0.1 -n 100 -o trees.json`

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::engine::EngineConfig;
use crate::estimate::BatchPlan;
use crate::error::{PfError, Result};
use crate::sampler::SamplerConfig;

#[derive(Debug, Parser)]
#[clap(name = "cltpf")]
#[clap(about = "Importance-sampling estimates of mutation placement probabilities on cell lineage trees.", long_about = None)]
pub struct Cli {
    /// Log verbosity: -v info, -vv debug, -vvv trace
    #[clap(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Estimate the probability that exactly the given cells carry a mutation
    #[clap(arg_required_else_help = true)]
    Estimate {
        #[clap(flatten)]
        sampling: SamplingArgs,

        /// cells (names or zero-based indices), comma separated
        #[clap(short, long, value_parser, value_delimiter = ',', required = true)]
        cells: Vec<String>,

        /// mutation (name or zero-based index)
        #[clap(short, long, value_parser, required = true)]
        mutation: String,

        /// number of independent batches for a confidence interval
        #[clap(short, long, value_parser)]
        batches: Option<usize>,

        /// confidence level of the batch interval
        #[clap(long, value_parser, default_value_t = 0.95)]
        confidence: f64,
    },

    /// Draw trees from the proposal distribution and write them as JSON
    #[clap(arg_required_else_help = true)]
    Sample {
        #[clap(flatten)]
        sampling: SamplingArgs,
    },
}

/// Input and sampler options shared by every subcommand
#[derive(Debug, Args)]
pub struct SamplingArgs {
    /// genotype matrix (tab separated, or comma separated with .csv), calls 0/1/3
    #[clap(value_parser)]
    pub genotype_file: PathBuf,

    /// false-positive rate of the assay
    #[clap(value_parser)]
    pub alpha: f64,

    /// false-negative rate of the assay
    #[clap(value_parser)]
    pub beta: f64,

    /// number of sampled trees
    #[clap(short = 'n', long, value_parser, default_value_t = 1000)]
    pub samples: usize,

    /// base random seed
    #[clap(long, value_parser)]
    pub seed: Option<u64>,

    /// worker threads, 0 for all cores
    #[clap(short = 'p', long, value_parser, default_value_t = 0)]
    pub threads: usize,

    /// always join the most probable pair
    #[clap(long, value_parser, default_value_t = false)]
    pub greedy: bool,

    /// softmax temperature of the proposal
    #[clap(long, value_parser, default_value_t = 1.0)]
    pub temperature: f64,

    /// weight of shared mutations in the join score
    #[clap(long, value_parser, default_value_t = 10.0)]
    pub leafness: f64,

    /// output JSON file, stdout when omitted
    #[clap(short, long, value_parser)]
    pub output: Option<PathBuf>,

    /// hide the progress bar
    #[clap(short, long, value_parser, default_value_t = false)]
    pub quiet: bool,
}

impl SamplingArgs {
    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [("alpha", self.alpha), ("beta", self.beta)] {
            if !(0.0..1.0).contains(&rate) {
                return Err(PfError::invalid_input(format!(
                    "{} must lie in [0, 1), got {}",
                    name, rate
                )));
            }
        }
        if self.samples == 0 {
            return Err(PfError::invalid_input("at least one sample is required"));
        }
        self.sampler_config().validate()
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            greedy: self.greedy,
            temperature: self.temperature,
            leafness_coefficient: self.leafness,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            sampler: self.sampler_config(),
            n_threads: self.threads,
            seed: self.seed,
        }
    }
}

/// Batch count must leave every batch at least one sample
pub fn validate_batches(n_samples: usize, n_batches: Option<usize>) -> Result<()> {
    match n_batches {
        Some(k) => BatchPlan::new(n_samples, k).map(|_| ()),
        None => Ok(()),
    }
}
