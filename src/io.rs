//! Genotype matrix input and JSON report output for the command line.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use ndarray::Array2;
use serde::Serialize;

use crate::engine::SampleSet;
use crate::error::{PfError, Result};
use crate::estimate::BatchSummary;
use crate::precision::Decimal;

/// Cells x mutations call matrix with its row and column labels
#[derive(Clone, Debug)]
pub struct GenotypeTable {
    pub cell_names: Vec<String>,
    pub mutation_names: Vec<String>,
    pub calls: Array2<i8>,
}

impl GenotypeTable {
    /// Resolve a cell given by name or zero-based index
    pub fn cell_index(&self, key: &str) -> Result<usize> {
        resolve(key, &self.cell_names, "cell")
    }

    /// Resolve a mutation given by name or zero-based index
    pub fn mutation_index(&self, key: &str) -> Result<usize> {
        resolve(key, &self.mutation_names, "mutation")
    }
}

fn resolve(key: &str, names: &[String], kind: &str) -> Result<usize> {
    if let Some(idx) = names.iter().position(|name| name == key) {
        return Ok(idx);
    }
    match key.parse::<usize>() {
        Ok(idx) if idx < names.len() => Ok(idx),
        _ => Err(PfError::invalid_input(format!("unknown {} '{}'", kind, key))),
    }
}

/// Read a delimited genotype matrix: header row of mutation names, first
/// column of cell names, calls 0/1/3 (3 = missing).
pub fn read_genotypes_from<R: Read>(reader: R, delimiter: u8) -> Result<GenotypeTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(reader);

    let mutation_names: Vec<String> = reader
        .headers()?
        .iter()
        .skip(1)
        .map(|x| x.to_string())
        .collect();
    let mut cell_names = Vec::new();
    let mut flat = Vec::new();
    for (row_index, record) in reader.records().enumerate() {
        let record = record?;
        let mut fields = record.iter();
        let name = fields.next().unwrap_or_default().to_string();
        let before = flat.len();
        for field in fields {
            let call = field.trim().parse::<i8>().map_err(|_| {
                PfError::invalid_input(format!(
                    "row {} ({}): '{}' is not a genotype call",
                    row_index + 1,
                    name,
                    field
                ))
            })?;
            flat.push(call);
        }
        if flat.len() - before != mutation_names.len() {
            return Err(PfError::invalid_input(format!(
                "row {} ({}) has {} calls, header names {} mutations",
                row_index + 1,
                name,
                flat.len() - before,
                mutation_names.len()
            )));
        }
        cell_names.push(name);
    }

    let calls = Array2::from_shape_vec((cell_names.len(), mutation_names.len()), flat)
        .map_err(|e| PfError::invalid_input(e.to_string()))?;
    Ok(GenotypeTable {
        cell_names,
        mutation_names,
        calls,
    })
}

/// Read a genotype file; `.csv` is comma separated, anything else tab separated
pub fn read_genotypes(path: &Path) -> Result<GenotypeTable> {
    let delimiter = match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => b',',
        _ => b'\t',
    };
    read_genotypes_from(File::open(path)?, delimiter)
}

/// Summary of one `estimate` run
#[derive(Debug, Serialize)]
pub struct Report {
    pub cells: Vec<String>,
    pub mutation: String,
    pub n_samples: usize,
    pub seed: u64,
    /// Estimate over every sample, as a decimal string
    pub estimate: String,
    pub estimate_f64: f64,
    pub batch_estimates: Option<Vec<String>>,
    pub batch_summary: Option<BatchSummary>,
}

#[derive(Debug, Serialize)]
struct TreeRecord {
    edges: Vec<(usize, usize, usize)>,
    subtrees: Vec<Vec<usize>>,
    proposal_prob: String,
}

/// Sampled trees with node masks written as cell-index lists
#[derive(Debug, Serialize)]
pub struct SampleReport {
    pub seed: u64,
    trees: Vec<TreeRecord>,
}

impl SampleReport {
    pub fn new(seed: u64, samples: &SampleSet) -> Self {
        let trees = samples
            .trees
            .iter()
            .map(|tree| TreeRecord {
                edges: tree
                    .edges
                    .iter()
                    .map(|e| (e.parent, e.left, e.right))
                    .collect(),
                subtrees: (0..tree.subtrees.len()).map(|v| tree.cells_of(v)).collect(),
                proposal_prob: tree.proposal_prob.to_string(),
            })
            .collect();
        Self { seed, trees }
    }
}

pub fn decimal_strings(values: &[Decimal]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Write pretty JSON to `path`, or stdout when absent
pub fn write_json<T: Serialize>(value: &T, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writeln!(writer)?;
            writer.flush()?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            serde_json::to_writer_pretty(&mut handle, value)?;
            writeln!(handle)?;
        }
    }
    Ok(())
}
