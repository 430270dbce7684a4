//! End-to-end runs behind the command-line subcommands.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::config::{validate_batches, SamplingArgs};
use crate::engine::{Engine, SampleSet};
use crate::error::Result;
use crate::estimate::{aggregate, BatchSummary};
use crate::io::{decimal_strings, read_genotypes, GenotypeTable, Report, SampleReport};
use crate::matrix::ProbabilityMatrix;
use crate::precision::to_f64;

fn progress_bar(total: usize, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} trees ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn load(args: &SamplingArgs) -> Result<(GenotypeTable, ProbabilityMatrix)> {
    args.validate()?;
    let table = read_genotypes(&args.genotype_file)?;
    let p = ProbabilityMatrix::from_genotypes(table.calls.view(), args.alpha, args.beta)?;
    info!(
        "loaded {} cells x {} mutations from {:?}",
        p.n_cells(),
        p.n_mutations(),
        args.genotype_file
    );
    Ok((table, p))
}

/// Sample trees, score the query and aggregate, with per-batch estimates
/// and their summary when `n_batches` is given.
pub fn run_estimate(
    args: &SamplingArgs,
    cells: &[String],
    mutation: &str,
    n_batches: Option<usize>,
    confidence: f64,
) -> Result<Report> {
    validate_batches(args.samples, n_batches)?;
    let (table, p) = load(args)?;
    let cell_ids = cells
        .iter()
        .map(|c| table.cell_index(c))
        .collect::<Result<Vec<_>>>()?;
    let mutation_id = table.mutation_index(mutation)?;

    let engine = Engine::new(args.engine_config())?;
    let bar = progress_bar(args.samples, args.quiet);
    let outcome = engine.query(&p, &cell_ids, mutation_id, args.samples, None, &bar)?;
    bar.finish_and_clear();

    let proposal_probs = outcome
        .samples
        .as_ref()
        .map(SampleSet::proposal_probs)
        .unwrap_or_default();
    let overall = aggregate(
        &outcome.conditional_probs,
        &outcome.origin_probs,
        &proposal_probs,
        None,
    )?;
    let overall = overall.values().first().cloned().unwrap_or_default();

    let (batch_estimates, batch_summary) = match n_batches {
        Some(k) => {
            let batched = aggregate(
                &outcome.conditional_probs,
                &outcome.origin_probs,
                &proposal_probs,
                Some(k),
            )?;
            let summary = BatchSummary::from_estimates(batched.values(), confidence)?;
            info!(
                "batch mean {:.6}, std dev {:?} over {} batches",
                summary.mean, summary.std_dev, summary.n_batches
            );
            (Some(decimal_strings(batched.values())), Some(summary))
        }
        None => (None, None),
    };

    info!(
        "estimate for {:?} / {}: {:.6}",
        cells,
        mutation,
        to_f64(&overall)
    );
    Ok(Report {
        cells: cell_ids.iter().map(|&c| table.cell_names[c].clone()).collect(),
        mutation: table.mutation_names[mutation_id].clone(),
        n_samples: args.samples,
        seed: engine.seed(),
        estimate_f64: to_f64(&overall),
        estimate: overall.to_string(),
        batch_estimates,
        batch_summary,
    })
}

/// Draw trees only
pub fn run_sample(args: &SamplingArgs) -> Result<SampleReport> {
    let (_, p) = load(args)?;
    let engine = Engine::new(args.engine_config())?;
    let bar = progress_bar(args.samples, args.quiet);
    let samples = engine.sample(&p, args.samples, &bar)?;
    bar.finish_and_clear();
    Ok(SampleReport::new(engine.seed(), &samples))
}
