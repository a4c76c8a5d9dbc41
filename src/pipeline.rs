//! End-to-end inference driver: read counts in, ancestry tree report (and
//! optional DOT rendering) out.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::ancestry::AncestryMatrix;
use crate::graph::ProbAncestryGraph;
use crate::matrix::ReadCountMatrix;
use crate::solution::{MaxSolution, SolutionGraph};
use crate::solver::{SolveStatus, TreeSelectionSolver};

/// Selected edges below this confidence are omitted from the DOT rendering.
const DISPLAY_WEIGHT_FLOOR: f64 = 0.05;
/// At most this many member mutation names per cluster label in the DOT
/// rendering.
const DISPLAY_LABEL_NAMES: usize = 5;

/// Runs the full pipeline. The solution report goes to `sol_output` (stdout
/// when `None`); the DOT rendering of the first optimal tree goes to
/// `dot_output` when given.
pub fn start(
    read_count_path: &Path,
    alpha: f64,
    beta: f64,
    gamma: f64,
    time_limit_secs: i64,
    sol_output: Option<&Path>,
    dot_output: Option<&Path>,
) -> Result<SolveStatus> {
    info!("Parsing read count input...");
    let r = ReadCountMatrix::from_path(read_count_path)?;
    info!("#samples: {}", r.nr_samples());
    info!("#mutations: {}", r.nr_mutations());

    info!("Computing ancestry matrix...");
    let a = AncestryMatrix::compute(&r, 0);

    info!("Computing ancestry graph...");
    let g = ProbAncestryGraph::build(&a, &r, alpha, gamma)?;
    info!("|V| = {}, |A| = {}", g.node_count(), g.arc_count());

    info!("Clustering ancestry graph...");
    let (condensed, clustering) = g.remove_cycles(&a, alpha)?;
    info!("#clusters: {}", clustering.len());

    let collapsed = r.collapse(&clustering)?;
    let ci = collapsed.confidence_intervals(gamma)?;
    let f = collapsed.point_estimates();

    let contracted = condensed.contract(&a, &clustering, beta)?;
    info!(
        "Contracted: |V| = {}, |A| = {}",
        contracted.node_count(),
        contracted.arc_count()
    );

    info!("Constructing tree selection instance...");
    let solver = TreeSelectionSolver::new(&contracted, &ci, &clustering, time_limit_secs)?;
    let mut solution = MaxSolution::new(
        f,
        collapsed.mutation_labels().to_vec(),
        r.cluster_member_labels(&clustering),
    )?;

    info!("Solving...");
    let status = solver.solve(&mut solution)?;
    info!(
        "Status: {} ({} solutions, objective {:.4})",
        status,
        solution.nr_solutions(),
        solution.objective()
    );

    match sol_output {
        None => print!("{}", solution),
        Some(path) => {
            let mut out = File::create(path)
                .with_context(|| format!("failed to open '{}' for writing", path.display()))?;
            write!(out, "{}", solution)
                .with_context(|| format!("failed to write solution to '{}'", path.display()))?;
        }
    }

    if let Some(path) = dot_output {
        if solution.nr_solutions() == 0 {
            warn!("no tree to render, skipping DOT output");
        } else {
            solution.remap_labels(DISPLAY_LABEL_NAMES);
            let graph = SolutionGraph::new(&solution, 0, DISPLAY_WEIGHT_FLOOR, beta)?;
            let mut out = File::create(path)
                .with_context(|| format!("failed to open '{}' for writing", path.display()))?;
            graph
                .write_dot(&mut out)
                .with_context(|| format!("failed to write DOT to '{}'", path.display()))?;
        }
    }

    Ok(status)
}
