//! Probability matrix P: P[i, j] is the probability that cell i truly carries mutation j.

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::error::{PfError, Result};

/// Genotype code for a missing call
pub const MISSING_CALL: i8 = 3;

/// Immutable n_cells x m_mutations matrix of probabilities in [0, 1]
#[derive(Clone, Debug)]
pub struct ProbabilityMatrix {
    values: Array2<f64>,
}

impl ProbabilityMatrix {
    /// Wrap a matrix after checking it is non-empty and every entry is a probability
    pub fn new(values: Array2<f64>) -> Result<Self> {
        let (n_cells, n_mutations) = values.dim();
        if n_cells == 0 || n_mutations == 0 {
            return Err(PfError::invalid_input(format!(
                "probability matrix must be non-empty, got {}x{}",
                n_cells, n_mutations
            )));
        }
        if let Some(((i, j), v)) = values
            .indexed_iter()
            .find(|(_, v)| !v.is_finite() || **v < 0.0 || **v > 1.0)
        {
            return Err(PfError::invalid_input(format!(
                "P[{}, {}] = {} is not a probability",
                i, j, v
            )));
        }
        Ok(Self { values })
    }

    /// Build from row vectors (one per cell)
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n_cells = rows.len();
        let n_mutations = rows.first().map_or(0, |r| r.len());
        if rows.iter().any(|r| r.len() != n_mutations) {
            return Err(PfError::invalid_input("inconsistent row lengths"));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let values = Array2::from_shape_vec((n_cells, n_mutations), flat)
            .map_err(|e| PfError::invalid_input(e.to_string()))?;
        Self::new(values)
    }

    /// Derive P from noisy 0/1/3 calls with false-positive rate `alpha` and
    /// false-negative rate `beta`, under a uniform prior on the true state.
    pub fn from_genotypes(genotypes: ArrayView2<i8>, alpha: f64, beta: f64) -> Result<Self> {
        for (name, rate) in [("alpha", alpha), ("beta", beta)] {
            if !(0.0..1.0).contains(&rate) {
                return Err(PfError::invalid_input(format!(
                    "{} must lie in [0, 1), got {}",
                    name, rate
                )));
            }
        }
        let present = (1.0 - beta) / (1.0 - beta + alpha);
        let absent = beta / (beta + 1.0 - alpha);

        let mut values = Array2::<f64>::zeros(genotypes.dim());
        for ((i, j), &call) in genotypes.indexed_iter() {
            values[[i, j]] = match call {
                0 => absent,
                1 => present,
                MISSING_CALL => 0.5,
                other => {
                    return Err(PfError::invalid_input(format!(
                        "genotype call {} at ({}, {}) is not 0, 1 or {}",
                        other, i, j, MISSING_CALL
                    )))
                }
            };
        }
        Self::new(values)
    }

    pub fn n_cells(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_mutations(&self) -> usize {
        self.values.ncols()
    }

    pub fn row(&self, cell: usize) -> ArrayView1<'_, f64> {
        self.values.row(cell)
    }

    pub fn column(&self, mutation: usize) -> ArrayView1<'_, f64> {
        self.values.column(mutation)
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(ProbabilityMatrix::new(array![[0.2, 1.1]]).is_err());
        assert!(ProbabilityMatrix::new(array![[f64::NAN]]).is_err());
        assert!(ProbabilityMatrix::new(Array2::zeros((0, 3))).is_err());
        assert!(ProbabilityMatrix::new(array![[0.0, 1.0], [0.5, 0.25]]).is_ok());
    }

    #[test]
    fn test_from_rows_checks_shape() {
        assert!(ProbabilityMatrix::from_rows(&[vec![0.1, 0.2], vec![0.3]]).is_err());
        let p = ProbabilityMatrix::from_rows(&[vec![0.1, 0.2], vec![0.3, 0.4]]).unwrap();
        assert_eq!(p.n_cells(), 2);
        assert_eq!(p.n_mutations(), 2);
        assert_eq!(p.row(1)[0], 0.3);
        assert_eq!(p.column(1)[0], 0.2);
    }

    #[test]
    fn test_views_borrow_the_matrix() {
        let p = ProbabilityMatrix::from_rows(&[vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]]).unwrap();
        let rows: Vec<ArrayView1<'_, f64>> = (0..p.n_cells()).map(|i| p.row(i)).collect();
        let columns: Vec<ArrayView1<'_, f64>> = (0..p.n_mutations()).map(|j| p.column(j)).collect();
        let whole: ArrayView2<'_, f64> = p.view();
        assert_eq!(rows[1].to_vec(), vec![0.4, 0.5, 0.6]);
        assert_eq!(columns[2].to_vec(), vec![0.3, 0.6]);
        assert_eq!(whole.dim(), (2, 3));
        assert_eq!(whole.row(0), rows[0]);
    }

    #[test]
    fn test_from_genotypes_posteriors() {
        let calls = array![[1i8, 0], [3, 1]];
        let p = ProbabilityMatrix::from_genotypes(calls.view(), 0.01, 0.2).unwrap();
        let present = 0.8 / 0.81;
        let absent = 0.2 / 1.19;
        assert!((p.view()[[0, 0]] - present).abs() < 1e-12);
        assert!((p.view()[[0, 1]] - absent).abs() < 1e-12);
        assert_eq!(p.view()[[1, 0]], 0.5);
    }

    #[test]
    fn test_from_genotypes_rejects_unknown_codes_and_rates() {
        let calls = array![[2i8]];
        assert!(ProbabilityMatrix::from_genotypes(calls.view(), 0.01, 0.2).is_err());
        let calls = array![[1i8]];
        assert!(ProbabilityMatrix::from_genotypes(calls.view(), 1.0, 0.2).is_err());
        assert!(ProbabilityMatrix::from_genotypes(calls.view(), 0.01, -0.1).is_err());
    }
}
