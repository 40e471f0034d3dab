use std::time::Instant;

use log::trace;

use super::{add_successor_pairs, PropagationStrategy};
use crate::hierarchy::{Duals, Level};
use crate::lp::TransportLpSolver;
use crate::plan::{TransportPlan, TransportPlanSolutions};
use crate::sinkhorn::{refine_left_scaling, solve_plan, SinkhornParameters};

/// Connects the children of every previous arc and solves the entropic problem
/// over them, warm started from the previous left scaling. Once the previous plan
/// is itself entropic, arcs lighter than `threshold` times the smaller of their
/// node masses are not expanded.
#[derive(Debug, Clone, Copy)]
pub struct SinkhornPropagation {
    pub parameters: SinkhornParameters,
}

impl Default for SinkhornPropagation {
    fn default() -> Self {
        SinkhornPropagation {
            parameters: SinkhornParameters {
                tolerance: 1e-6,
                ..Default::default()
            },
        }
    }
}

impl SinkhornPropagation {
    pub fn new(lambda: f64, tolerance: f64, threshold: f64, iterations: usize) -> Self {
        SinkhornPropagation {
            parameters: SinkhornParameters {
                lambda,
                tolerance,
                threshold,
                iterations,
                ..Default::default()
            },
        }
    }
}

impl PropagationStrategy for SinkhornPropagation {
    fn propagate<'h>(
        &mut self,
        _solver: &mut TransportLpSolver,
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
                let sparsify = previous.log_left_scaling.is_some();
                let mut plan = TransportPlan::new(source, target);
                for path in previous.iter() {
                    let mass = previous
                        .source
                        .node(path.from)
                        .mass
                        .min(previous.target.node(path.to).mass);
                    if sparsify && path.w < mass * self.parameters.threshold {
                        continue;
                    }
                    add_successor_pairs(&mut plan, &previous.source, &previous.target, path.from, path.to, p);
                }
                (plan, refine_left_scaling(previous, &source))
            }
        };
        plan.time_propagate += start.elapsed();

        solve_plan(&mut plan, &self.parameters, left, p);
        trace!("sinkhorn propagation: {}", plan);
        TransportPlanSolutions::new(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::Hierarchy;
    use crate::plan::SolveStatus;
    use ndarray::array;

    #[test]
    fn threshold_drops_light_arcs() {
        let mut a = Hierarchy::from_points(&array![[0.0], [1.0], [8.0], [9.0]], None, None).unwrap();
        let mut b = Hierarchy::from_points(&array![[0.0], [1.0], [8.0], [9.0]], None, None).unwrap();
        a.normalize(true).unwrap();
        b.normalize(true).unwrap();
        let mut duals = Duals::new(&a, &b);
        let mut solver = TransportLpSolver::network_simplex();
        let mut strategy = SinkhornPropagation::new(10.0, 1e-9, 0.01, 1000);

        let mut coarse = strategy.propagate(&mut solver, a.level(1), b.level(1), None, &mut duals, 2.0, false);
        assert_eq!(coarse.primary.status, SolveStatus::Entropic);
        assert_eq!(coarse.primary.n_paths(), 4);

        let fine = strategy.propagate(
            &mut solver,
            a.level(2),
            b.level(2),
            Some(&mut coarse),
            &mut duals,
            2.0,
            true,
        );
        // the cross cluster arcs carry ~exp(-640) and are not expanded
        assert_eq!(fine.primary.n_paths(), 8);
        let total: f64 = fine.primary.iter().map(|p| p.w).sum();
        assert!((total - 1.0).abs() < 1e-6);
    }
}
