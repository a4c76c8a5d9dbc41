//! Tree selection over the contracted ancestry graph: choose at most one
//! parent arc per node, subject to the sum condition, maximizing total
//! ancestry confidence. The search backend sits behind the narrow
//! `TreeSearch` trait so the optimization engine is swappable.

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use ndarray::Array2;

use crate::graph::{Clustering, ProbAncestryGraph};
use crate::matrix::Interval;
use crate::solution::{Arborescence, MaxSolution};

const EPS: f64 = 1e-9;

/// Outcome of a solve, reported distinguishably: a proven optimum, a
/// feasible incumbent cut short by the time limit, or proven infeasibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    Feasible,
    Infeasible,
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SolveStatus::Optimal => "optimal",
            SolveStatus::Feasible => "feasible",
            SolveStatus::Infeasible => "infeasible",
        };
        write!(fmt, "{}", name)
    }
}

/// The selection instance: per node the candidate parent arcs (ancestry
/// confidence, best first) and the per-(cluster, sample) frequency
/// confidence intervals backing the sum condition.
#[derive(Debug, Clone)]
pub struct AncestryTreeModel {
    candidates: Vec<Vec<(usize, f64)>>,
    intervals: Array2<Interval>,
}

impl AncestryTreeModel {
    /// Validates dimensional consistency across the pipeline stages:
    /// contracted graph nodes, clusters, and collapsed interval rows must
    /// all agree.
    pub fn new(
        graph: &ProbAncestryGraph,
        intervals: &Array2<Interval>,
        clustering: &Clustering,
    ) -> Result<AncestryTreeModel> {
        let k = graph.node_count();
        if clustering.len() != k {
            bail!(
                "contracted graph has {} nodes but clustering has {} clusters",
                k,
                clustering.len()
            );
        }
        if intervals.nrows() != k {
            bail!(
                "confidence interval matrix has {} rows but {} clusters",
                intervals.nrows(),
                k
            );
        }
        let candidates = (0..k).map(|v| graph.parents_of(v)).collect();
        Ok(AncestryTreeModel {
            candidates,
            intervals: intervals.clone(),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        candidates: Vec<Vec<(usize, f64)>>,
        intervals: Array2<Interval>,
    ) -> AncestryTreeModel {
        AncestryTreeModel {
            candidates,
            intervals,
        }
    }

    pub fn nr_nodes(&self) -> usize {
        self.candidates.len()
    }

    pub fn nr_samples(&self) -> usize {
        self.intervals.ncols()
    }
}

/// Result of a backend search. `complete` is true when the search space was
/// exhausted, which is what lets the caller certify optimality or
/// infeasibility.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub complete: bool,
    pub objective: f64,
    pub best: Vec<Arborescence>,
}

/// The black-box optimization seam: an instance and a deadline in, the set
/// of maximum-score assignments out.
pub trait TreeSearch {
    fn search(&self, model: &AncestryTreeModel, deadline: Option<Instant>) -> SearchOutcome;
}

/// Exhaustive branch-and-bound over parent assignments. Nodes are assigned
/// in index order; per-(parent, sample) child frequency mass is maintained
/// incrementally for the sum-condition check, and subtrees whose optimistic
/// bound cannot reach the incumbent are pruned. All assignments tying the
/// best objective are kept.
#[derive(Debug, Default)]
pub struct BranchAndBound;

struct SearchState<'a> {
    model: &'a AncestryTreeModel,
    deadline: Option<Instant>,
    timed_out: bool,
    parent: Vec<Option<usize>>,
    parent_weight: Vec<f64>,
    child_mass: Vec<f64>,
    suffix_bound: Vec<f64>,
    best_objective: f64,
    best: Vec<Arborescence>,
}

impl<'a> SearchState<'a> {
    fn new(model: &'a AncestryTreeModel, deadline: Option<Instant>) -> SearchState<'a> {
        let n = model.nr_nodes();
        let m = model.nr_samples();
        let mut suffix_bound = vec![0.0; n + 1];
        for v in (0..n).rev() {
            let best_arc = model.candidates[v].first().map_or(0.0, |&(_, w)| w);
            suffix_bound[v] = suffix_bound[v + 1] + best_arc;
        }
        SearchState {
            model,
            deadline,
            timed_out: false,
            parent: vec![None; n],
            parent_weight: vec![0.0; n],
            child_mass: vec![0.0; n * m],
            suffix_bound,
            best_objective: f64::NEG_INFINITY,
            best: Vec::new(),
        }
    }

    fn sum_condition_allows(&self, parent: usize, child: usize) -> bool {
        let m = self.model.nr_samples();
        (0..m).all(|s| {
            self.child_mass[parent * m + s] + self.model.intervals[[child, s]].low
                <= self.model.intervals[[parent, s]].high + EPS
        })
    }

    fn dfs(&mut self, v: usize, acc: f64) {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.timed_out = true;
                return;
            }
        }
        let n = self.model.nr_nodes();
        if v == n {
            self.record(acc);
            return;
        }
        if acc + self.suffix_bound[v] < self.best_objective - EPS {
            return;
        }
        if self.model.candidates[v].is_empty() {
            // Root-eligible: no candidate parent survived contraction.
            self.parent[v] = None;
            self.parent_weight[v] = 0.0;
            self.dfs(v + 1, acc);
            return;
        }
        let m = self.model.nr_samples();
        for c in 0..self.model.candidates[v].len() {
            let (p, w) = self.model.candidates[v][c];
            if !self.sum_condition_allows(p, v) {
                continue;
            }
            self.parent[v] = Some(p);
            self.parent_weight[v] = w;
            for s in 0..m {
                self.child_mass[p * m + s] += self.model.intervals[[v, s]].low;
            }
            self.dfs(v + 1, acc + w);
            for s in 0..m {
                self.child_mass[p * m + s] -= self.model.intervals[[v, s]].low;
            }
            self.parent[v] = None;
            self.parent_weight[v] = 0.0;
            if self.timed_out {
                return;
            }
        }
    }

    fn record(&mut self, objective: f64) {
        if objective > self.best_objective + EPS {
            self.best_objective = objective;
            self.best.clear();
        } else if (objective - self.best_objective).abs() > EPS {
            return;
        }
        let tree = Arborescence {
            parent: self.parent.clone(),
            parent_weight: self.parent_weight.clone(),
        };
        debug_assert!(tree.is_forest());
        if !self.best.iter().any(|t| t.parent == tree.parent) {
            self.best.push(tree);
        }
    }
}

impl TreeSearch for BranchAndBound {
    fn search(&self, model: &AncestryTreeModel, deadline: Option<Instant>) -> SearchOutcome {
        let mut state = SearchState::new(model, deadline);
        state.dfs(0, 0.0);
        SearchOutcome {
            complete: !state.timed_out,
            objective: if state.best.is_empty() {
                0.0
            } else {
                state.best_objective
            },
            best: state.best,
        }
    }
}

/// Formulates the selection instance and runs a `TreeSearch` backend under
/// an optional wall-clock limit, populating a `MaxSolution`.
pub struct TreeSelectionSolver<S: TreeSearch = BranchAndBound> {
    model: AncestryTreeModel,
    time_limit: Option<Duration>,
    backend: S,
}

impl TreeSelectionSolver<BranchAndBound> {
    /// `time_limit_secs` <= 0 disables the limit.
    pub fn new(
        graph: &ProbAncestryGraph,
        intervals: &Array2<Interval>,
        clustering: &Clustering,
        time_limit_secs: i64,
    ) -> Result<TreeSelectionSolver<BranchAndBound>> {
        let model = AncestryTreeModel::new(graph, intervals, clustering)?;
        let time_limit = if time_limit_secs > 0 {
            Some(Duration::from_secs(time_limit_secs as u64))
        } else {
            None
        };
        Ok(TreeSelectionSolver {
            model,
            time_limit,
            backend: BranchAndBound,
        })
    }
}

impl<S: TreeSearch> TreeSelectionSolver<S> {
    pub fn with_backend(model: AncestryTreeModel, time_limit: Option<Duration>, backend: S) -> Self {
        TreeSelectionSolver {
            model,
            time_limit,
            backend,
        }
    }

    /// Runs the backend and stores status, objective, and the solution set
    /// in `solution`. An exhausted search yields Optimal or Infeasible; a
    /// deadline hit yields Feasible with the best incumbents found so far.
    pub fn solve(&self, solution: &mut MaxSolution) -> Result<SolveStatus> {
        if solution.frequencies().nrows() != self.model.nr_nodes() {
            bail!(
                "solution container has {} frequency rows but the model has {} nodes",
                solution.frequencies().nrows(),
                self.model.nr_nodes()
            );
        }
        let deadline = self.time_limit.map(|limit| Instant::now() + limit);
        let outcome = self.backend.search(&self.model, deadline);
        let status = match (outcome.complete, outcome.best.is_empty()) {
            (true, false) => SolveStatus::Optimal,
            (true, true) => SolveStatus::Infeasible,
            (false, _) => SolveStatus::Feasible,
        };
        solution.set_results(status, outcome.objective, outcome.best);
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn interval(low: f64, high: f64) -> Interval {
        Interval { low, high }
    }

    fn intervals(rows: &[&[Interval]]) -> Array2<Interval> {
        let m = rows[0].len();
        let flat: Vec<Interval> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Array2::from_shape_vec((rows.len(), m), flat).unwrap()
    }

    fn run(model: AncestryTreeModel) -> (SolveStatus, SearchOutcome) {
        let outcome = BranchAndBound.search(&model, None);
        let status = match (outcome.complete, outcome.best.is_empty()) {
            (true, false) => SolveStatus::Optimal,
            (true, true) => SolveStatus::Infeasible,
            (false, _) => SolveStatus::Feasible,
        };
        (status, outcome)
    }

    #[test]
    fn picks_the_single_feasible_parent() {
        let model = AncestryTreeModel::from_parts(
            vec![vec![], vec![(0, 0.97)]],
            intervals(&[
                &[interval(0.82, 0.94), interval(0.80, 0.92)],
                &[interval(0.31, 0.49), interval(0.35, 0.52)],
            ]),
        );
        let (status, outcome) = run(model);
        assert_eq!(status, SolveStatus::Optimal);
        assert_eq!(outcome.best.len(), 1);
        assert_eq!(outcome.best[0].parent, vec![None, Some(0)]);
        assert!((outcome.objective - 0.97).abs() < 1e-9);
    }

    #[test]
    fn prefers_higher_confidence_parent() {
        let model = AncestryTreeModel::from_parts(
            vec![vec![], vec![], vec![(0, 0.7), (1, 0.9)]],
            intervals(&[
                &[interval(0.5, 0.9)],
                &[interval(0.5, 0.9)],
                &[interval(0.1, 0.3)],
            ]),
        );
        let (status, outcome) = run(model);
        assert_eq!(status, SolveStatus::Optimal);
        assert_eq!(outcome.best.len(), 1);
        assert_eq!(outcome.best[0].parent[2], Some(1));
    }

    #[test]
    fn sibling_mass_can_force_infeasibility() {
        // Both children need node 0 as parent, but their combined interval
        // lows exceed the parent's high bound.
        let model = AncestryTreeModel::from_parts(
            vec![vec![], vec![(0, 0.9)], vec![(0, 0.9)]],
            intervals(&[
                &[interval(0.4, 0.5)],
                &[interval(0.3, 0.4)],
                &[interval(0.3, 0.4)],
            ]),
        );
        let (status, outcome) = run(model);
        assert_eq!(status, SolveStatus::Infeasible);
        assert!(outcome.best.is_empty());
    }

    #[test]
    fn sibling_mass_reroutes_to_alternative_parent() {
        // Same instance, but node 2 has a fallback parent with capacity.
        let model = AncestryTreeModel::from_parts(
            vec![vec![], vec![(0, 0.9)], vec![(0, 0.9), (1, 0.6)]],
            intervals(&[
                &[interval(0.4, 0.5)],
                &[interval(0.3, 0.4)],
                &[interval(0.3, 0.4)],
            ]),
        );
        let (status, outcome) = run(model);
        assert_eq!(status, SolveStatus::Optimal);
        assert_eq!(outcome.best.len(), 1);
        assert_eq!(outcome.best[0].parent, vec![None, Some(0), Some(1)]);
        assert!((outcome.objective - 1.5).abs() < 1e-9);
    }

    #[test]
    fn ties_are_all_collected() {
        let model = AncestryTreeModel::from_parts(
            vec![vec![], vec![], vec![(0, 0.8), (1, 0.8)]],
            intervals(&[
                &[interval(0.5, 0.9)],
                &[interval(0.5, 0.9)],
                &[interval(0.1, 0.3)],
            ]),
        );
        let (status, outcome) = run(model);
        assert_eq!(status, SolveStatus::Optimal);
        assert_eq!(outcome.best.len(), 2);
        let parents: Vec<Option<usize>> =
            outcome.best.iter().map(|t| t.parent[2]).collect();
        assert!(parents.contains(&Some(0)) && parents.contains(&Some(1)));
    }

    #[test]
    fn all_roots_instance_terminates() {
        let model = AncestryTreeModel::from_parts(
            vec![vec![], vec![], vec![]],
            intervals(&[
                &[interval(0.1, 0.3)],
                &[interval(0.1, 0.3)],
                &[interval(0.1, 0.3)],
            ]),
        );
        let (status, outcome) = run(model);
        assert_eq!(status, SolveStatus::Optimal);
        assert_eq!(outcome.best.len(), 1);
        assert_eq!(outcome.best[0].parent, vec![None, None, None]);
        assert_eq!(outcome.objective, 0.0);
    }

    #[test]
    fn expired_deadline_reports_feasible() {
        let model = AncestryTreeModel::from_parts(
            vec![vec![], vec![(0, 0.9)]],
            intervals(&[&[interval(0.4, 0.8)], &[interval(0.1, 0.3)]]),
        );
        let outcome = BranchAndBound.search(&model, Some(Instant::now()));
        assert!(!outcome.complete);
    }

    #[test]
    fn solver_results_are_forests() {
        let model = AncestryTreeModel::from_parts(
            vec![
                vec![],
                vec![(0, 0.9)],
                vec![(0, 0.8), (1, 0.85)],
                vec![(1, 0.7), (2, 0.75)],
            ],
            intervals(&[
                &[interval(0.6, 0.9)],
                &[interval(0.3, 0.5)],
                &[interval(0.1, 0.25)],
                &[interval(0.05, 0.15)],
            ]),
        );
        let (status, outcome) = run(model);
        assert_eq!(status, SolveStatus::Optimal);
        for tree in &outcome.best {
            assert!(tree.is_forest());
        }
    }
}
