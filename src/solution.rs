//! Solution containers: selected parent assignments, display relabeling,
//! the textual report, and DOT rendering of the selected tree.

use std::fmt;
use std::io::Write;

use anyhow::{bail, Result};
use ndarray::Array2;

use crate::solver::SolveStatus;

/// One selected parent assignment over the contracted nodes. `parent[v]`
/// is `None` when v is a root; `parent_weight[v]` is the ancestry
/// confidence of the selected arc (0 for roots).
#[derive(Debug, Clone, PartialEq)]
pub struct Arborescence {
    pub parent: Vec<Option<usize>>,
    pub parent_weight: Vec<f64>,
}

impl Arborescence {
    pub fn nr_nodes(&self) -> usize {
        self.parent.len()
    }

    pub fn roots(&self) -> Vec<usize> {
        self.parent
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_none())
            .map(|(v, _)| v)
            .collect()
    }

    pub fn objective(&self) -> f64 {
        self.parent_weight.iter().sum()
    }

    /// True when every parent chain reaches a root in finitely many steps,
    /// i.e. the assignment contains no cycle.
    pub fn is_forest(&self) -> bool {
        let n = self.parent.len();
        for start in 0..n {
            let mut v = start;
            let mut steps = 0;
            while let Some(p) = self.parent[v] {
                v = p;
                steps += 1;
                if steps > n {
                    return false;
                }
            }
        }
        true
    }
}

/// The solver's output container: the collapsed point-estimate matrix, the
/// cluster display labels and memberships, the solve status, and the set of
/// equally optimal assignments.
#[derive(Debug, Clone)]
pub struct MaxSolution {
    f: Array2<f64>,
    labels: Vec<String>,
    members: Vec<Vec<String>>,
    status: SolveStatus,
    objective: f64,
    solutions: Vec<Arborescence>,
}

impl MaxSolution {
    pub fn new(f: Array2<f64>, labels: Vec<String>, members: Vec<Vec<String>>) -> Result<MaxSolution> {
        if labels.len() != f.nrows() || members.len() != f.nrows() {
            bail!(
                "solution has {} frequency rows but {} labels and {} member lists",
                f.nrows(),
                labels.len(),
                members.len()
            );
        }
        Ok(MaxSolution {
            f,
            labels,
            members,
            status: SolveStatus::Infeasible,
            objective: 0.0,
            solutions: Vec::new(),
        })
    }

    pub(crate) fn set_results(
        &mut self,
        status: SolveStatus,
        objective: f64,
        solutions: Vec<Arborescence>,
    ) {
        self.status = status;
        self.objective = objective;
        self.solutions = solutions;
    }

    pub fn status(&self) -> SolveStatus {
        self.status
    }

    pub fn objective(&self) -> f64 {
        self.objective
    }

    pub fn nr_solutions(&self) -> usize {
        self.solutions.len()
    }

    /// The k-th equally optimal assignment.
    pub fn solution(&self, k: usize) -> &Arborescence {
        &self.solutions[k]
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn frequencies(&self) -> &Array2<f64> {
        &self.f
    }

    /// Truncates each cluster's display label to at most `max_names`
    /// member mutation names. Display only; assignments are untouched.
    pub fn remap_labels(&mut self, max_names: usize) {
        for (label, members) in self.labels.iter_mut().zip(self.members.iter()) {
            let shown: Vec<&str> = members
                .iter()
                .take(max_names)
                .map(|s| s.as_str())
                .collect();
            *label = if members.len() > max_names {
                format!("{}...", shown.join(";"))
            } else {
                shown.join(";")
            };
        }
    }
}

impl fmt::Display for MaxSolution {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(fmt, "status: {}", self.status)?;
        writeln!(fmt, "objective: {:.4}", self.objective)?;
        writeln!(fmt, "solutions: {}", self.solutions.len())?;
        for (k, tree) in self.solutions.iter().enumerate() {
            writeln!(fmt, "# solution {}", k)?;
            for v in 0..tree.nr_nodes() {
                write!(fmt, "{}\t{}\t", v, self.labels[v])?;
                match tree.parent[v] {
                    None => write!(fmt, "root")?,
                    Some(p) => write!(fmt, "{}", p)?,
                }
                for s in 0..self.f.ncols() {
                    write!(fmt, "\t{:.4}", self.f[[v, s]])?;
                }
                writeln!(fmt)?;
            }
        }
        Ok(())
    }
}

/// A renderable tree built from one assignment, with a display-weight floor
/// for the edges and the beta value that produced the candidate arcs.
pub struct SolutionGraph<'a> {
    solution: &'a MaxSolution,
    index: usize,
    min_weight: f64,
    beta: f64,
}

impl<'a> SolutionGraph<'a> {
    pub fn new(
        solution: &'a MaxSolution,
        index: usize,
        min_weight: f64,
        beta: f64,
    ) -> Result<SolutionGraph<'a>> {
        if index >= solution.nr_solutions() {
            bail!(
                "solution index {} out of range ({} solutions)",
                index,
                solution.nr_solutions()
            );
        }
        Ok(SolutionGraph {
            solution,
            index,
            min_weight,
            beta,
        })
    }

    /// Emits the tree as Graphviz DOT: one box per node labeled with the
    /// cluster label and its per-sample frequencies, one edge per selected
    /// arc at or above the display-weight floor.
    pub fn write_dot<W: Write>(&self, w: &mut W) -> Result<()> {
        let tree = self.solution.solution(self.index);
        let f = self.solution.frequencies();
        writeln!(w, "digraph ancestry_tree {{")?;
        writeln!(w, "  // beta = {:.2}", self.beta)?;
        writeln!(w, "  node [shape=box];")?;
        for v in 0..tree.nr_nodes() {
            let freqs: Vec<String> = (0..f.ncols())
                .map(|s| format!("{:.2}", f[[v, s]]))
                .collect();
            writeln!(
                w,
                "  {} [label=\"{}\\n{}\"];",
                v,
                self.solution.labels()[v],
                freqs.join(" ")
            )?;
        }
        for v in 0..tree.nr_nodes() {
            if let Some(p) = tree.parent[v] {
                if tree.parent_weight[v] >= self.min_weight {
                    writeln!(
                        w,
                        "  {} -> {} [label=\"{:.2}\"];",
                        p, v, tree.parent_weight[v]
                    )?;
                }
            }
        }
        writeln!(w, "}}")?;
        Ok(())
    }
}
