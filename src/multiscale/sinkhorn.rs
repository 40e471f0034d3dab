use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::time::Instant;

use float_ord::FloatOrd;
use log::trace;

use super::MultiscaleTransport;
use crate::hierarchy::{Duals, Level, NodeIndex};
use crate::plan::{Path, TransportPlan, TransportPlanSolutions};
use crate::propagation::add_successor_pairs;
use crate::sinkhorn::{refine_left_scaling, solve_plan, SinkhornParameters};

/// The heaviest arcs of one node, lightest on top
type HeaviestPaths = BinaryHeap<Reverse<(FloatOrd<f64>, usize)>>;

/// Entropic multiscale transport. Every pair of levels is solved by Sinkhorn
/// scaling over the children of the `max_paths_per_node` heaviest previous arcs
/// of each source and each target node.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiscaleSinkhornTransport {
    pub parameters: SinkhornParameters,
}

impl MultiscaleSinkhornTransport {
    pub fn new(parameters: SinkhornParameters) -> Self {
        MultiscaleSinkhornTransport { parameters }
    }

    /// Previous arcs above the mass threshold that rank among the heaviest of their
    /// source or of their target node
    fn heaviest_paths(&self, previous: &TransportPlan) -> Vec<Path> {
        let paths: Vec<Path> = previous.iter().copied().collect();
        let k = self.parameters.max_paths_per_node;
        let mut from: BTreeMap<NodeIndex, HeaviestPaths> = BTreeMap::new();
        let mut to: BTreeMap<NodeIndex, HeaviestPaths> = BTreeMap::new();

        for (i, path) in paths.iter().enumerate() {
            let mass = previous
                .source
                .node(path.from)
                .mass
                .min(previous.target.node(path.to).mass);
            if path.w <= mass * self.parameters.threshold {
                continue;
            }
            for (node, heap) in [(path.from, &mut from), (path.to, &mut to)] {
                let queue = heap.entry(node).or_default();
                queue.push(Reverse((FloatOrd(path.w), i)));
                if queue.len() > k {
                    queue.pop();
                }
            }
        }

        from.into_values()
            .chain(to.into_values())
            .flat_map(BinaryHeap::into_vec)
            .map(|Reverse((_, i))| paths[i])
            .collect()
    }
}

impl MultiscaleTransport for MultiscaleSinkhornTransport {
    fn solve_scale<'h>(
        &mut self,
        source: Level<'h>,
        target: Level<'h>,
        previous: Option<&mut TransportPlanSolutions<'h>>,
        _duals: &mut Duals,
        p: f64,
        _last_scale: bool,
    ) -> TransportPlanSolutions<'h> {
        let start = Instant::now();
        let (mut plan, left) = match previous {
            None => (TransportPlan::complete(source, target, p), None),
            Some(previous) => {
                let previous = &previous.primary;
                let mut plan = TransportPlan::new(source, target);
                for path in self.heaviest_paths(previous) {
                    add_successor_pairs(&mut plan, &previous.source, &previous.target, path.from, path.to, p);
                }
                (plan, refine_left_scaling(previous, &source))
            }
        };
        plan.time_propagate += start.elapsed();
        trace!("multiscale sinkhorn candidates: {} arcs", plan.n_paths());

        solve_plan(&mut plan, &self.parameters, left, p);
        TransportPlanSolutions::new(plan)
    }
}
