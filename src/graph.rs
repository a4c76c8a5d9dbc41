//! Probabilistic ancestry graph: construction from the ancestry matrix,
//! cycle removal by clustering statistically indistinguishable mutations,
//! and contraction into a reduced candidate-edge instance.

use anyhow::{bail, Result};
use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::ancestry::AncestryMatrix;
use crate::matrix::ReadCountMatrix;

/// A partition of the original mutation indices into clusters. Members are
/// sorted within each cluster and clusters are ordered by smallest member,
/// so cluster ids are deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clustering {
    members: Vec<Vec<usize>>,
}

impl Clustering {
    /// Every mutation its own cluster.
    pub fn identity(n: usize) -> Clustering {
        Clustering {
            members: (0..n).map(|i| vec![i]).collect(),
        }
    }

    pub fn from_members(mut members: Vec<Vec<usize>>) -> Result<Clustering> {
        for group in &mut members {
            if group.is_empty() {
                bail!("clustering contains an empty cluster");
            }
            group.sort_unstable();
        }
        members.sort_by_key(|group| group[0]);
        Ok(Clustering { members })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self, cluster: usize) -> &[usize] {
        &self.members[cluster]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Vec<usize>> {
        self.members.iter()
    }

    /// Checks that every index in 0..n appears in exactly one cluster.
    pub fn validate_partition(&self, n: usize) -> Result<()> {
        let mut seen = vec![false; n];
        for group in &self.members {
            for &row in group {
                if row >= n {
                    bail!("cluster member {} out of range (n = {})", row, n);
                }
                if seen[row] {
                    bail!("mutation {} appears in more than one cluster", row);
                }
                seen[row] = true;
            }
        }
        if let Some(missing) = seen.iter().position(|&s| !s) {
            bail!("mutation {} is not assigned to any cluster", missing);
        }
        Ok(())
    }

    /// Cluster id per original mutation index.
    pub fn assignment(&self, n: usize) -> Result<Vec<usize>> {
        self.validate_partition(n)?;
        let mut assignment = vec![0; n];
        for (c, group) in self.members.iter().enumerate() {
            for &row in group {
                assignment[row] = c;
            }
        }
        Ok(assignment)
    }
}

/// Plain union-find over 0..n, used to grow clusters.
struct Partition {
    parent: Vec<usize>,
}

impl Partition {
    fn new(n: usize) -> Partition {
        Partition {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Smaller root wins, keeping cluster ids stable.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }

    fn groups(&mut self, n: usize) -> Vec<Vec<usize>> {
        let mut by_root: std::collections::BTreeMap<usize, Vec<usize>> = Default::default();
        for x in 0..n {
            let root = self.find(x);
            by_root.entry(root).or_default().push(x);
        }
        by_root.into_values().collect()
    }
}

/// Directed graph whose nodes are mutations (clusters after cycle removal)
/// and whose arcs carry ancestry probabilities.
#[derive(Debug, Clone)]
pub struct ProbAncestryGraph {
    graph: DiGraph<usize, f64>,
}

impl ProbAncestryGraph {
    /// Builds the mutation-level graph. Arc i -> j is admitted when
    /// A[i][j] strictly exceeds 1 - alpha and, in every sample, the gamma
    /// confidence intervals leave room for i to dominate j
    /// (high(i) >= low(j)). Alpha 0 therefore admits no arcs.
    pub fn build(
        a: &AncestryMatrix,
        r: &ReadCountMatrix,
        alpha: f64,
        gamma: f64,
    ) -> Result<ProbAncestryGraph> {
        if !(0.0..=0.5).contains(&alpha) {
            bail!("alpha {} outside [0,0.5]", alpha);
        }
        let n = a.dim();
        if n != r.nr_mutations() {
            bail!(
                "ancestry matrix dimension {} does not match {} mutations",
                n,
                r.nr_mutations()
            );
        }
        let ci = r.confidence_intervals(gamma)?;
        let m = r.nr_samples();
        let threshold = 1.0 - alpha;

        let mut graph = DiGraph::new();
        for i in 0..n {
            graph.add_node(i);
        }
        for i in 0..n {
            for j in 0..n {
                if i == j || a.prob(i, j) <= threshold {
                    continue;
                }
                let compatible = (0..m).all(|s| ci[[i, s]].high >= ci[[j, s]].low);
                if compatible {
                    graph.add_edge(NodeIndex::new(i), NodeIndex::new(j), a.prob(i, j));
                }
            }
        }
        Ok(ProbAncestryGraph { graph })
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn arc_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Arcs as (source, target, probability), sorted for determinism.
    pub fn arcs(&self) -> Vec<(usize, usize, f64)> {
        let mut arcs: Vec<(usize, usize, f64)> = self
            .graph
            .edge_references()
            .map(|e| (e.source().index(), e.target().index(), *e.weight()))
            .collect();
        arcs.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        arcs
    }

    /// Candidate parents of `node` with arc probabilities, best first.
    pub fn parents_of(&self, node: usize) -> Vec<(usize, f64)> {
        let mut parents: Vec<(usize, f64)> = self
            .graph
            .edges_directed(NodeIndex::new(node), Direction::Incoming)
            .map(|e| (e.source().index(), *e.weight()))
            .collect();
        parents.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        parents
    }

    pub fn is_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.graph)
    }

    /// Eliminates cycles by clustering, returning a new condensed graph and
    /// the cluster membership partition. Two mutations are merged when their
    /// ancestry evidence is too symmetric to order them
    /// (min(A[i][j], A[j][i]) > 0.5 - alpha), and any strongly connected
    /// groups that remain afterwards are merged as well, until the condensed
    /// graph is acyclic. Merging everything into a single cluster is a valid
    /// degenerate outcome.
    pub fn remove_cycles(
        &self,
        a: &AncestryMatrix,
        alpha: f64,
    ) -> Result<(ProbAncestryGraph, Clustering)> {
        if !(0.0..=0.5).contains(&alpha) {
            bail!("alpha {} outside [0,0.5]", alpha);
        }
        let n = self.graph.node_count();
        if n != a.dim() {
            bail!(
                "graph has {} nodes but ancestry matrix dimension is {}",
                n,
                a.dim()
            );
        }

        let mut partition = Partition::new(n);
        let indistinguishable = 0.5 - alpha;
        for i in 0..n {
            for j in (i + 1)..n {
                if a.symmetry(i, j) > indistinguishable {
                    partition.union(i, j);
                }
            }
        }

        // Condensing a DAG around extra merges can create new cycles
        // between clusters, so merge strongly connected groups until none
        // remain. Each round strictly reduces the cluster count.
        loop {
            let assignment = assignment_of(&mut partition, n);
            let cluster_graph = self.cluster_arcs(&assignment);
            let sccs = tarjan_scc(&cluster_graph);
            let mut merged = false;
            for scc in &sccs {
                if scc.len() > 1 {
                    merged = true;
                    let first = cluster_graph[scc[0]];
                    for &node in &scc[1..] {
                        partition.union(first, cluster_graph[node]);
                    }
                }
            }
            if !merged {
                break;
            }
        }

        let clustering = Clustering::from_members(partition.groups(n))?;
        clustering.validate_partition(n)?;
        let condensed = self.condense(a, &clustering)?;
        Ok((condensed, clustering))
    }

    /// Cluster-level digraph induced by the current partition assignment;
    /// node weight is a representative member, used for further unions.
    fn cluster_arcs(&self, assignment: &[usize]) -> DiGraph<usize, ()> {
        let k = assignment.iter().copied().max().map_or(0, |x| x + 1);
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        // Representative member per assignment slot; slots without members
        // stay usize::MAX and carry no arcs.
        let mut representative = vec![usize::MAX; k];
        for (row, &c) in assignment.iter().enumerate() {
            if representative[c] == usize::MAX {
                representative[c] = row;
            }
        }
        for c in 0..k {
            graph.add_node(representative[c]);
        }
        for (src, dst, _) in self.arcs() {
            let (cs, cd) = (assignment[src], assignment[dst]);
            if cs != cd {
                let (ns, nd) = (NodeIndex::new(cs), NodeIndex::new(cd));
                if graph.find_edge(ns, nd).is_none() {
                    graph.add_edge(ns, nd, ());
                }
            }
        }
        graph
    }

    /// New graph with one node per cluster; an arc between clusters exists
    /// when any member arc crossed them, weighted by the mean ancestry
    /// probability over all cross-cluster member pairs.
    fn condense(
        &self,
        a: &AncestryMatrix,
        clustering: &Clustering,
    ) -> Result<ProbAncestryGraph> {
        let n = self.graph.node_count();
        let assignment = clustering.assignment(n)?;
        let k = clustering.len();
        let mut graph = DiGraph::new();
        for c in 0..k {
            graph.add_node(c);
        }
        let mut crossed = vec![vec![false; k]; k];
        for (src, dst, _) in self.arcs() {
            let (cs, cd) = (assignment[src], assignment[dst]);
            if cs != cd {
                crossed[cs][cd] = true;
            }
        }
        for cs in 0..k {
            for cd in 0..k {
                if crossed[cs][cd] {
                    let weight = aggregate_prob(a, clustering.members(cs), clustering.members(cd));
                    graph.add_edge(NodeIndex::new(cs), NodeIndex::new(cd), weight);
                }
            }
        }
        Ok(ProbAncestryGraph { graph })
    }

    /// Contracts into the candidate-edge instance handed to the solver:
    /// keeps only arcs whose aggregated cross-cluster ancestry confidence
    /// reaches beta. The arc set is a subset of this (acyclic) condensed
    /// graph, so the result is acyclic whenever cycle removal succeeded.
    pub fn contract(
        &self,
        a: &AncestryMatrix,
        clustering: &Clustering,
        beta: f64,
    ) -> Result<ProbAncestryGraph> {
        if !(0.5..=1.0).contains(&beta) {
            bail!("beta {} outside [0.5,1]", beta);
        }
        if self.graph.node_count() != clustering.len() {
            bail!(
                "condensed graph has {} nodes but clustering has {} clusters",
                self.graph.node_count(),
                clustering.len()
            );
        }
        let k = clustering.len();
        let mut graph = DiGraph::new();
        for c in 0..k {
            graph.add_node(c);
        }
        for (src, dst, _) in self.arcs() {
            let weight = aggregate_prob(a, clustering.members(src), clustering.members(dst));
            if weight >= beta {
                graph.add_edge(NodeIndex::new(src), NodeIndex::new(dst), weight);
            }
        }
        Ok(ProbAncestryGraph { graph })
    }
}

fn assignment_of(partition: &mut Partition, n: usize) -> Vec<usize> {
    let groups = partition.groups(n);
    let mut assignment = vec![0; n];
    for (c, group) in groups.iter().enumerate() {
        for &row in group {
            assignment[row] = c;
        }
    }
    assignment
}

fn aggregate_prob(a: &AncestryMatrix, from: &[usize], to: &[usize]) -> f64 {
    let mut acc = 0.0;
    for &i in from {
        for &j in to {
            acc += a.prob(i, j);
        }
    }
    acc / (from.len() * to.len()) as f64
}
