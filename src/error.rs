//! Error types shared by the sampler, scorer, aggregator and their I/O wrappers.

use thiserror::Error;

/// Main error type for partition-function estimation
#[derive(Error, Debug)]
pub enum PfError {
    /// Softmax over join priorities stayed non-finite after every temperature doubling
    #[error("Numerical instability after {attempts} attempts (last temperature {temperature})")]
    NumericalInstability { attempts: usize, temperature: f64 },

    /// A non-finite f64 reached the decimal accumulator
    #[error("Non-finite value {value} cannot be accumulated")]
    NonFiniteValue { value: f64 },

    /// Batching would produce a batch without samples
    #[error("Cannot split {n_samples} samples into {n_batches} non-empty batches")]
    EmptyBatch { n_samples: usize, n_batches: usize },

    /// Edge list does not describe a tree built children-first
    #[error("Malformed tree: {message}")]
    MalformedTree { message: String },

    /// Importance weights cannot be normalized
    #[error("Degenerate importance weights: {message}")]
    DegenerateWeights { message: String },

    /// Invalid matrix, query or argument
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias for Results using PfError
pub type Result<T> = std::result::Result<T, PfError>;

impl PfError {
    pub fn malformed_tree(message: impl Into<String>) -> Self {
        Self::MalformedTree {
            message: message.into(),
        }
    }

    pub fn degenerate_weights(message: impl Into<String>) -> Self {
        Self::DegenerateWeights {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}
