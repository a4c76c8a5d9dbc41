//! Pairwise ancestry probabilities between mutations, estimated from the
//! per-sample read-count distributions.

use std::sync::Arc;

use indicatif::ProgressBar;
use ndarray::Array2;
use rayon::prelude::*;
use statrs::distribution::{Beta, Continuous, ContinuousCDF};

use crate::matrix::{ReadCount, ReadCountMatrix};

const INTEGRATION_STEPS: usize = 512;

/// An n x n matrix where cell (i, j) is the probability that mutation i
/// precedes mutation j. Not symmetric; both (i, j) and (j, i) may be
/// substantially nonzero when the data cannot resolve an order.
#[derive(Debug, Clone)]
pub struct AncestryMatrix {
    probs: Array2<f64>,
}

impl AncestryMatrix {
    /// Computes ancestry probabilities under the order-k model: per sample
    /// the frequency of each mutation gets a Beta(variant + 1, reference + 1)
    /// posterior, and cell (i, j) is the (k+1)-smallest per-sample value of
    /// Pr(X_i >= X_j). Order 0 therefore requires i to dominate j in every
    /// sample. The reference pipeline always passes order 0.
    pub fn compute(r: &ReadCountMatrix, order: usize) -> AncestryMatrix {
        let n = r.nr_mutations();
        let m = r.nr_samples();
        let pb = Arc::new(ProgressBar::new(n as u64));
        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let row: Vec<f64> = (0..n)
                    .map(|j| {
                        if i == j {
                            return 0.5;
                        }
                        let mut per_sample: Vec<f64> = (0..m)
                            .map(|s| prob_dominates(r.cell(i, s), r.cell(j, s)))
                            .collect();
                        per_sample.sort_by(|a, b| a.total_cmp(b));
                        per_sample[order.min(m - 1)]
                    })
                    .collect();
                pb.inc(1);
                row
            })
            .collect();
        pb.finish_and_clear();

        let mut probs = Array2::zeros((n, n));
        for (i, row) in rows.into_iter().enumerate() {
            for (j, p) in row.into_iter().enumerate() {
                probs[[i, j]] = p;
            }
        }
        AncestryMatrix { probs }
    }

    #[cfg(test)]
    pub(crate) fn from_probs(probs: Array2<f64>) -> AncestryMatrix {
        AncestryMatrix { probs }
    }

    pub fn dim(&self) -> usize {
        self.probs.nrows()
    }

    /// Probability that mutation i precedes mutation j.
    pub fn prob(&self, i: usize, j: usize) -> f64 {
        self.probs[[i, j]]
    }

    /// The weaker direction of the (i, j) pair; high values mean the data
    /// cannot order the two mutations.
    pub fn symmetry(&self, i: usize, j: usize) -> f64 {
        self.probs[[i, j]].min(self.probs[[j, i]])
    }
}

/// Pr(X >= Y) for X ~ Beta(x.variant + 1, x.reference + 1) and
/// Y ~ Beta(y.variant + 1, y.reference + 1), by midpoint-rule integration
/// of pdf_X(t) * cdf_Y(t). Zero-coverage cells reduce to Beta(1, 1), the
/// uniform prior.
fn prob_dominates(x: ReadCount, y: ReadCount) -> f64 {
    // Shape parameters are always >= 1, so construction cannot fail.
    let dx = Beta::new(x.variant as f64 + 1.0, x.reference as f64 + 1.0)
        .expect("beta shape parameters are positive");
    let dy = Beta::new(y.variant as f64 + 1.0, y.reference as f64 + 1.0)
        .expect("beta shape parameters are positive");
    let step = 1.0 / INTEGRATION_STEPS as f64;
    let mut acc = 0.0;
    for k in 0..INTEGRATION_STEPS {
        let t = (k as f64 + 0.5) * step;
        acc += dx.pdf(t) * dy.cdf(t);
    }
    (acc * step).clamp(0.0, 1.0)
}
