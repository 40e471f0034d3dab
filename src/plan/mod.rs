pub mod solutions;

pub use solutions::TransportPlanSolutions;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use itertools::iproduct;
use ndarray::Array1;
use typed_index_collections::TiVec;

use crate::hierarchy::{Level, NodeIndex};

/// A transport arc between a source node and a target node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Path {
    pub from: NodeIndex,
    pub to: NodeIndex,
    /// Column of the arc in the plan's LP, assigned on insertion
    pub index: usize,
    /// Cost of moving one unit of mass along the arc
    pub cost: f64,
    /// Solved flow along the arc
    pub w: f64,
}

impl Path {
    pub fn new(from: NodeIndex, to: NodeIndex, cost: f64) -> Self {
        Path {
            from,
            to,
            index: 0,
            cost,
            w: 0.0,
        }
    }
}

/// How a plan's weights were produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Weights have not been computed
    Unsolved,
    /// Weights come from an optimal LP solve
    Optimal,
    /// The last LP solve did not report optimality
    NotOptimal,
    /// Weights come from an entropic (Sinkhorn) solve
    Entropic,
    /// Entropic solve in which some nodes with mass had no arc
    MassLost,
    /// Weights were interpolated from a coarser plan
    Interpolated,
}

impl SolveStatus {
    /// Whether the weights and duals came out of the LP solver
    pub fn is_lp(&self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::NotOptimal)
    }
}

/// A sparse set of arcs between one source level and one target level.
///
/// Arcs are stored per source node, ordered by target node, so lookups are
/// logarithmic and iteration is ordered by (from, to).
#[derive(Debug, Clone)]
pub struct TransportPlan<'h> {
    pub source: Level<'h>,
    pub target: Level<'h>,
    paths: TiVec<NodeIndex, BTreeMap<NodeIndex, Path>>,
    in_degree: TiVec<NodeIndex, usize>,
    n_paths: usize,
    next_index: usize,
    /// Transport cost, (objective)^(1/p) after an LP solve
    pub cost: f64,
    pub status: SolveStatus,
    pub time_solve: Duration,
    pub time_propagate: Duration,
    pub time_refine: Duration,
    /// Logarithm of the left scaling of the Sinkhorn solve that produced the plan
    pub log_left_scaling: Option<Array1<f64>>,
}

impl<'h> TransportPlan<'h> {
    pub fn new(source: Level<'h>, target: Level<'h>) -> Self {
        TransportPlan {
            source,
            target,
            paths: TiVec::from(vec![BTreeMap::new(); source.len()]),
            in_degree: TiVec::from(vec![0; target.len()]),
            n_paths: 0,
            next_index: 0,
            cost: f64::MAX,
            status: SolveStatus::Unsolved,
            time_solve: Duration::ZERO,
            time_propagate: Duration::ZERO,
            time_refine: Duration::ZERO,
            log_left_scaling: None,
        }
    }

    /// A plan holding every (source, target) pair of the two levels
    pub fn complete(source: Level<'h>, target: Level<'h>, p: f64) -> Self {
        let mut plan = TransportPlan::new(source, target);
        for (from, to) in iproduct!(source.indices(), target.indices()) {
            plan.add(from, to, p);
        }
        plan
    }

    pub fn n_paths(&self) -> usize {
        self.n_paths
    }

    pub fn is_empty(&self) -> bool {
        self.n_paths == 0
    }

    /// Number of LP columns needed to hold every path index handed out so far
    pub fn n_columns(&self) -> usize {
        self.next_index
    }

    pub fn has_path(&self, from: NodeIndex, to: NodeIndex) -> bool {
        self.paths[from].contains_key(&to)
    }

    pub fn path(&self, from: NodeIndex, to: NodeIndex) -> Option<&Path> {
        self.paths[from].get(&to)
    }

    pub fn path_mut(&mut self, from: NodeIndex, to: NodeIndex) -> Option<&mut Path> {
        self.paths[from].get_mut(&to)
    }

    /// Inserts a path and returns its index. If the arc already exists its
    /// weight becomes the larger of the two and the existing index is returned.
    pub fn add_path(&mut self, mut path: Path) -> usize {
        if let Some(existing) = self.paths[path.from].get_mut(&path.to) {
            existing.w = existing.w.max(path.w);
            return existing.index;
        }
        path.index = self.next_index;
        self.next_index += 1;
        self.n_paths += 1;
        self.in_degree[path.to] += 1;
        self.paths[path.from].insert(path.to, path);
        path.index
    }

    /// Inserts the arc between two nodes of the plan's levels with cost distance^p
    pub fn add(&mut self, from: NodeIndex, to: NodeIndex, p: f64) -> usize {
        let cost = self
            .source
            .node(from)
            .transport_cost(self.target.node(to), p);
        self.add_path(Path::new(from, to, cost))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> + '_ {
        self.paths.iter().flat_map(|m| m.values())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Path> + '_ {
        self.paths.iter_mut().flat_map(|m| m.values_mut())
    }

    /// Arcs carrying positive flow
    pub fn positive(&self) -> impl Iterator<Item = &Path> + '_ {
        self.iter().filter(|p| p.w > 0.0)
    }

    pub fn paths_from(&self, from: NodeIndex) -> impl Iterator<Item = &Path> + '_ {
        self.paths[from].values()
    }

    /// Number of arcs leaving `from`
    pub fn out_degree(&self, from: NodeIndex) -> usize {
        self.paths[from].len()
    }

    /// Number of arcs entering `to`
    pub fn in_degree(&self, to: NodeIndex) -> usize {
        self.in_degree[to]
    }

    pub fn out_mass(&self, from: NodeIndex) -> f64 {
        self.paths[from].values().map(|p| p.w).sum()
    }

    pub fn in_mass(&self, to: NodeIndex) -> f64 {
        self.iter().filter(|p| p.to == to).map(|p| p.w).sum()
    }

    /// Removes and returns up to `n` arcs in iteration order
    pub fn take_first(&mut self, n: usize) -> Vec<Path> {
        let mut taken = Vec::with_capacity(n.min(self.n_paths));
        for map in self.paths.iter_mut() {
            while taken.len() < n {
                let key = match map.keys().next() {
                    Some(&key) => key,
                    None => break,
                };
                if let Some(path) = map.remove(&key) {
                    self.in_degree[path.to] -= 1;
                    taken.push(path);
                }
            }
            if taken.len() == n {
                break;
            }
        }
        self.n_paths -= taken.len();
        taken
    }

    /// The plan's cost measured on every pair of ancestor levels, index 0 being the
    /// plan's own levels and index `k` the levels `k` scales up. Each entry is
    /// (sum w * c^p)^(1/p) with c the distance between the ancestors.
    pub fn multiscale_cost(&self, p: f64) -> Vec<f64> {
        let steps = self.source.scale().min(self.target.scale()) + 1;
        let mut costs = vec![0.0; steps];
        for path in self.positive() {
            let (mut from, mut to) = (path.from, path.to);
            let (mut source, mut target) = (self.source, self.target);
            for cost in costs.iter_mut() {
                *cost += path.w * source.node(from).transport_cost(target.node(to), p);
                match (
                    source.node(from).parent.zip(source.parent()),
                    target.node(to).parent.zip(target.parent()),
                ) {
                    (Some((f, sl)), Some((t, tl))) => {
                        from = f;
                        to = t;
                        source = sl;
                        target = tl;
                    }
                    _ => break,
                }
            }
        }
        costs.into_iter().map(|c| c.powf(1.0 / p)).collect()
    }
}

impl fmt::Display for TransportPlan<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TransportPlan(scales: {}/{}, paths: {}, cost: {:.6}, status: {:?})",
            self.source.scale(),
            self.target.scale(),
            self.n_paths,
            self.cost,
            self.status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{Hierarchy, HierarchyBuilder};

    fn line(positions: &[f64]) -> Hierarchy {
        let mut builder = HierarchyBuilder::new(1);
        let root = builder.add_level();
        let leaves = builder.add_level();
        let r = builder.add_node(root, vec![0.0], 0.0, None).unwrap();
        for &x in positions {
            builder.add_node(leaves, vec![x], 1.0, Some(r)).unwrap();
        }
        builder.build().unwrap()
    }

    fn idx(i: usize) -> NodeIndex {
        NodeIndex::from(i)
    }

    #[test]
    fn duplicate_arcs_keep_the_larger_weight() {
        let a = line(&[0.0, 1.0]);
        let b = line(&[0.0, 2.0]);
        let mut plan = TransportPlan::new(a.finest(), b.finest());

        let mut path = Path::new(idx(0), idx(1), 4.0);
        path.w = 0.5;
        let first = plan.add_path(path);
        plan.add(idx(1), idx(0), 2.0);

        path.w = 0.25;
        assert_eq!(plan.add_path(path), first);
        assert_eq!(plan.path(idx(0), idx(1)).unwrap().w, 0.5);
        path.w = 0.75;
        assert_eq!(plan.add_path(path), first);
        assert_eq!(plan.path(idx(0), idx(1)).unwrap().w, 0.75);

        assert_eq!(plan.n_paths(), 2);
        assert_eq!(plan.in_degree(idx(1)), 1);
        assert_eq!(plan.path(idx(1), idx(0)).unwrap().cost, 1.0);
    }

    #[test]
    fn complete_plan_counts() {
        let a = line(&[0.0, 1.0, 2.0]);
        let b = line(&[0.0, 2.0]);
        let plan = TransportPlan::complete(a.finest(), b.finest(), 2.0);
        assert_eq!(plan.n_paths(), 6);
        assert_eq!(plan.n_columns(), 6);
        assert_eq!(plan.out_degree(idx(2)), 2);
        assert_eq!(plan.in_degree(idx(0)), 3);
        let indices: Vec<_> = plan.iter().map(|p| p.index).collect();
        assert_eq!(indices, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn take_first_erases_in_order() {
        let a = line(&[0.0, 1.0, 2.0]);
        let b = line(&[0.0, 2.0]);
        let mut plan = TransportPlan::complete(a.finest(), b.finest(), 1.0);
        let taken = plan.take_first(3);
        assert_eq!(
            taken.iter().map(|p| (*p.from, *p.to)).collect::<Vec<_>>(),
            vec![(0, 0), (0, 1), (1, 0)]
        );
        assert_eq!(plan.n_paths(), 3);
        assert!(!plan.has_path(idx(1), idx(0)));
        assert_eq!(plan.in_degree(idx(0)), 1);
        assert_eq!(plan.take_first(10).len(), 3);
        assert!(plan.is_empty());
    }

    #[test]
    fn multiscale_cost_aggregates_on_parents() {
        let a = line(&[0.0, 2.0]);
        let b = line(&[1.0, 3.0]);
        let mut plan = TransportPlan::complete(a.finest(), b.finest(), 2.0);
        plan.path_mut(idx(0), idx(0)).unwrap().w = 1.0;
        plan.path_mut(idx(1), idx(1)).unwrap().w = 1.0;
        let costs = plan.multiscale_cost(2.0);
        assert_eq!(costs.len(), 2);
        assert!((costs[0] - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(costs[1], 0.0);
    }
}
