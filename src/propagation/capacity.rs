use std::time::Instant;

use log::{trace, warn};

use super::neighborhood::{AlternateSolutions, NeighborhoodPropagation};
use crate::lp::TransportLpSolver;
use crate::plan::TransportPlanSolutions;

/// Neighborhood propagation with one capacity bounded alternative solution
pub type CapacityPropagation = NeighborhoodPropagation<Capacity>;

impl CapacityPropagation {
    pub fn capacity(k: usize, expansion_factor: f64) -> Self {
        NeighborhoodPropagation::with_alternates(expansion_factor, Capacity::new(k))
    }
}

/// Re-solves the previous primary problem with every arc bounded by the larger of
/// its endpoint masses divided by their (at most `k`) degrees. This spreads the
/// mass of each node over several arcs.
#[derive(Debug, Clone, Copy)]
pub struct Capacity {
    k: usize,
}

impl Capacity {
    pub fn new(k: usize) -> Self {
        Capacity { k: k.max(1) }
    }
}

impl AlternateSolutions for Capacity {
    fn compute_alternate_solutions(
        &mut self,
        solver: &mut TransportLpSolver,
        previous: &mut TransportPlanSolutions<'_>,
        p: f64,
        _last_scale: bool,
    ) {
        let primary = &previous.primary;
        let t1 = Instant::now();
        solver.create_lp(primary);
        for path in primary.iter() {
            let n_from = primary.out_degree(path.from).min(self.k) as f64;
            let n_to = primary.in_degree(path.to).min(self.k) as f64;
            let upper = f64::max(
                primary.source.node(path.from).mass / (n_from - 0.01),
                primary.target.node(path.to).mass / (n_to - 0.01),
            );
            solver.set_column_bounds(path.index, 0.0, upper);
        }
        let t2 = Instant::now();
        if !solver.solve_lp() {
            warn!("capacity bounded problem infeasible, removing the bounds");
            solver.relax_path_bounds(primary);
            solver.solve_lp();
        }
        let t3 = Instant::now();

        let mut alternative = primary.clone();
        alternative.time_propagate += t2 - t1;
        alternative.time_solve += t3 - t2;
        solver.store_solution(&mut alternative, p);
        trace!("capacity alternative: {}", alternative);
        previous.add_alternative(alternative);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{Duals, Hierarchy};
    use crate::propagation::PropagationStrategy;
    use ndarray::array;

    #[test]
    fn alternative_spreads_mass() {
        let mut a = Hierarchy::from_points(&array![[0.0], [1.0], [4.0], [5.0]], None, None).unwrap();
        let mut b = Hierarchy::from_points(&array![[0.5], [1.5], [4.5], [5.5]], None, None).unwrap();
        a.normalize(true).unwrap();
        b.normalize(true).unwrap();
        let mut duals = Duals::new(&a, &b);
        let mut solver = TransportLpSolver::network_simplex();
        let mut strategy = CapacityPropagation::capacity(2, 0.0);

        let mut coarse = strategy.propagate(&mut solver, a.level(1), b.level(1), None, &mut duals, 2.0, false);
        let fine = strategy.propagate(
            &mut solver,
            a.level(2),
            b.level(2),
            Some(&mut coarse),
            &mut duals,
            2.0,
            true,
        );
        assert_eq!(coarse.alternatives.len(), 1);
        let alternative = &coarse.alternatives[0];
        assert_eq!(alternative.n_paths(), coarse.primary.n_paths());
        // each coarse node has two arcs, so no arc may carry more than m / 1.99
        for path in alternative.iter() {
            let mass = alternative.source.node(path.from).mass;
            assert!(path.w <= mass / 1.99 + 1e-6);
        }
        let total: f64 = fine.primary.iter().map(|p| p.w).sum();
        assert!((total - 1.0).abs() < 1e-6);
    }
}
