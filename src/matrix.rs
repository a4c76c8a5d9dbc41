//! Read-count matrix: parsing, point estimates, confidence intervals,
//! and cluster collapsing.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::Array2;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::graph::Clustering;

/// Reference and variant read counts for one (mutation, sample) cell.
/// The total coverage is `reference + variant`, so the variant count can
/// never exceed the total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadCount {
    pub reference: u64,
    pub variant: u64,
}

impl ReadCount {
    pub fn total(&self) -> u64 {
        self.reference + self.variant
    }

    /// Variant allele frequency; 0.0 for a zero-coverage cell.
    pub fn frequency(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.variant as f64 / total as f64
        }
    }
}

/// A [low, high] frequency confidence interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub low: f64,
    pub high: f64,
}

impl Interval {
    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn contains(&self, x: f64) -> bool {
        self.low <= x && x <= self.high
    }
}

/// An n x m grid of read counts, n mutations by m samples, with labels.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadCountMatrix {
    counts: Array2<ReadCount>,
    mutations: Vec<String>,
    samples: Vec<String>,
}

impl ReadCountMatrix {
    pub fn new(
        counts: Array2<ReadCount>,
        mutations: Vec<String>,
        samples: Vec<String>,
    ) -> Result<Self> {
        if counts.nrows() != mutations.len() {
            bail!(
                "mutation label count {} does not match matrix rows {}",
                mutations.len(),
                counts.nrows()
            );
        }
        if counts.ncols() != samples.len() {
            bail!(
                "sample label count {} does not match matrix columns {}",
                samples.len(),
                counts.ncols()
            );
        }
        if counts.nrows() == 0 || counts.ncols() == 0 {
            bail!("read count matrix must have at least one mutation and one sample");
        }
        Ok(ReadCountMatrix {
            counts,
            mutations,
            samples,
        })
    }

    pub fn nr_mutations(&self) -> usize {
        self.counts.nrows()
    }

    pub fn nr_samples(&self) -> usize {
        self.counts.ncols()
    }

    pub fn cell(&self, mutation: usize, sample: usize) -> ReadCount {
        self.counts[[mutation, sample]]
    }

    pub fn mutation_labels(&self) -> &[String] {
        &self.mutations
    }

    pub fn sample_labels(&self) -> &[String] {
        &self.samples
    }

    /// Parses the tab-separated exchange format. The header line holds
    /// `gene_id` followed by one label per sample; each data row holds the
    /// mutation label followed by reference and variant counts for each
    /// sample in header order.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut samples: Vec<String> = Vec::new();
        let mut mutations: Vec<String> = Vec::new();
        let mut cells: Vec<ReadCount> = Vec::new();

        for (row_index, record) in rdr.records().enumerate() {
            let record = record.with_context(|| format!("failed to read row {}", row_index))?;
            if row_index == 0 {
                samples = record.iter().skip(1).map(|s| s.to_string()).collect();
                if samples.is_empty() {
                    bail!("header row declares no samples");
                }
                continue;
            }
            let expected = 1 + 2 * samples.len();
            if record.len() != expected {
                bail!(
                    "row {} has {} fields, expected {} (label plus two counts per sample)",
                    row_index,
                    record.len(),
                    expected
                );
            }
            mutations.push(record[0].to_string());
            for s in 0..samples.len() {
                let reference = parse_count(&record[1 + 2 * s], row_index, 1 + 2 * s)?;
                let variant = parse_count(&record[2 + 2 * s], row_index, 2 + 2 * s)?;
                cells.push(ReadCount { reference, variant });
            }
        }

        if mutations.is_empty() {
            bail!("read count matrix has no mutation rows");
        }
        let counts = Array2::from_shape_vec((mutations.len(), samples.len()), cells)
            .context("inconsistent read count grid")?;
        ReadCountMatrix::new(counts, mutations, samples)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open '{}' for reading", path.display()))?;
        Self::from_reader(file)
            .with_context(|| format!("failed to parse read counts from '{}'", path.display()))
    }

    /// Serializes in the same format `from_reader` parses (round-trip).
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        write!(w, "gene_id")?;
        for sample in &self.samples {
            write!(w, "\t{}", sample)?;
        }
        writeln!(w)?;
        for (i, mutation) in self.mutations.iter().enumerate() {
            write!(w, "{}", mutation)?;
            for s in 0..self.samples.len() {
                let cell = self.counts[[i, s]];
                write!(w, "\t{}\t{}", cell.reference, cell.variant)?;
            }
            writeln!(w)?;
        }
        Ok(())
    }

    /// Variant allele frequency per cell; zero-coverage cells are 0.0.
    pub fn point_estimates(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.nr_mutations(), self.nr_samples()), |(i, s)| {
            self.counts[[i, s]].frequency()
        })
    }

    /// Wilson score intervals at significance `gamma`; smaller gamma gives
    /// wider intervals. Zero-coverage cells get the maximal interval [0, 1].
    pub fn confidence_intervals(&self, gamma: f64) -> Result<Array2<Interval>> {
        if !(0.0..=1.0).contains(&gamma) {
            bail!("gamma {} outside [0,1]", gamma);
        }
        let z = if gamma <= 0.0 {
            f64::INFINITY
        } else if gamma >= 1.0 {
            0.0
        } else {
            let standard_normal = Normal::new(0.0, 1.0)?;
            standard_normal.inverse_cdf(1.0 - gamma / 2.0)
        };
        Ok(Array2::from_shape_fn(
            (self.nr_mutations(), self.nr_samples()),
            |(i, s)| wilson_interval(self.counts[[i, s]], z),
        ))
    }

    /// Sums member read counts per cluster, producing one row per cluster.
    /// Labels of merged mutations are joined with ';'. With the identity
    /// clustering this returns an equal matrix.
    pub fn collapse(&self, clustering: &Clustering) -> Result<ReadCountMatrix> {
        clustering.validate_partition(self.nr_mutations())?;
        let m = self.nr_samples();
        let mut counts = Array2::from_elem((clustering.len(), m), ReadCount::default());
        let mut labels = Vec::with_capacity(clustering.len());
        for (c, members) in clustering.iter().enumerate() {
            for &row in members {
                for s in 0..m {
                    let cell = self.counts[[row, s]];
                    counts[[c, s]].reference += cell.reference;
                    counts[[c, s]].variant += cell.variant;
                }
            }
            labels.push(
                members
                    .iter()
                    .map(|&row| self.mutations[row].as_str())
                    .collect::<Vec<_>>()
                    .join(";"),
            );
        }
        ReadCountMatrix::new(counts, labels, self.samples.clone())
    }

    /// Original mutation labels per cluster, for display relabeling.
    pub fn cluster_member_labels(&self, clustering: &Clustering) -> Vec<Vec<String>> {
        clustering
            .iter()
            .map(|members| {
                members
                    .iter()
                    .map(|&row| self.mutations[row].clone())
                    .collect()
            })
            .collect()
    }
}

fn parse_count(field: &str, row: usize, col: usize) -> Result<u64> {
    field.trim().parse::<u64>().with_context(|| {
        format!(
            "row {}, field {}: '{}' is not a non-negative integer read count",
            row, col, field
        )
    })
}

fn wilson_interval(cell: ReadCount, z: f64) -> Interval {
    let n = cell.total() as f64;
    if n == 0.0 || !z.is_finite() {
        return Interval { low: 0.0, high: 1.0 };
    }
    if z == 0.0 {
        let f = cell.frequency();
        return Interval { low: f, high: f };
    }
    let f = cell.frequency();
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let center = (f + z2 / (2.0 * n)) / denom;
    let half = (z / denom) * (f * (1.0 - f) / n + z2 / (4.0 * n * n)).sqrt();
    Interval {
        low: (center - half).max(0.0),
        high: (center + half).min(1.0),
    }
}
