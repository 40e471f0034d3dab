use log::{trace, warn};
use rand::prelude::StdRng;
use rand::{Rng, SeedableRng};

use super::neighborhood::{AlternateSolutions, NeighborhoodPropagation};
use crate::lp::TransportLpSolver;
use crate::plan::TransportPlanSolutions;

/// Neighborhood propagation with a sequence of shrinking capacity alternatives
pub type IteratedCapacityPropagation = NeighborhoodPropagation<IteratedCapacity>;

impl IteratedCapacityPropagation {
    pub fn iterated_capacity(iterations: usize, expansion_factor: f64) -> Self {
        NeighborhoodPropagation::with_alternates(expansion_factor, IteratedCapacity::new(iterations))
    }
}

/// Repeatedly bounds every used arc by a random fraction between 0.9 and 0.95 of
/// its current weight and re-solves, producing one alternative per iteration.
/// Bounds are removed again when they make the problem infeasible.
#[derive(Debug, Clone)]
pub struct IteratedCapacity {
    iterations: usize,
    rng: StdRng,
}

impl IteratedCapacity {
    pub fn new(iterations: usize) -> Self {
        IteratedCapacity {
            iterations,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(iterations: usize, seed: u64) -> Self {
        IteratedCapacity {
            iterations,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl AlternateSolutions for IteratedCapacity {
    fn compute_alternate_solutions(
        &mut self,
        solver: &mut TransportLpSolver,
        previous: &mut TransportPlanSolutions<'_>,
        p: f64,
        _last_scale: bool,
    ) {
        let mut current = previous.primary.clone();
        solver.create_lp(&current);
        for i in 0..self.iterations {
            for path in current.positive() {
                let upper = path.w * (0.9 + 0.05 * self.rng.gen::<f64>());
                solver.set_column_bounds(path.index, 0.0, upper);
            }
            if !solver.solve_lp() {
                warn!("iterated capacity problem {} infeasible, removing the bounds", i);
                solver.relax_path_bounds(&current);
                solver.solve_lp();
            }
            solver.store_solution(&mut current, p);
            trace!("iterated capacity alternative {}: {}", i, current);
            previous.add_alternative(current.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{Duals, Hierarchy};
    use crate::propagation::PropagationStrategy;
    use ndarray::array;

    #[test]
    fn every_iteration_adds_a_feasible_alternative() {
        let mut a = Hierarchy::from_points(&array![[0.0], [1.0], [4.0], [5.0]], None, None).unwrap();
        let mut b = Hierarchy::from_points(&array![[0.0], [1.0], [4.0], [5.0]], None, None).unwrap();
        a.normalize(true).unwrap();
        b.normalize(true).unwrap();
        let mut duals = Duals::new(&a, &b);
        let mut solver = TransportLpSolver::network_simplex();
        let mut strategy =
            NeighborhoodPropagation::with_alternates(0.0, IteratedCapacity::seeded(3, 7));

        let mut coarse = strategy.propagate(&mut solver, a.level(1), b.level(1), None, &mut duals, 2.0, false);
        strategy.propagate(
            &mut solver,
            a.level(2),
            b.level(2),
            Some(&mut coarse),
            &mut duals,
            2.0,
            false,
        );
        assert_eq!(coarse.alternatives.len(), 3);
        for alternative in coarse.alternatives.iter() {
            for node in alternative.source.indices() {
                assert!((alternative.out_mass(node) - 0.5).abs() < 1e-6);
            }
        }
        // the diagonal is capped below its weight, so mass moves off it
        assert!(coarse.alternatives[0]
            .positive()
            .any(|path| path.from != path.to));
    }
}
