use log::trace;
use rand::prelude::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use super::neighborhood::{AlternateSolutions, NeighborhoodPropagation};
use crate::lp::TransportLpSolver;
use crate::plan::TransportPlanSolutions;

/// Neighborhood propagation with alternatives solved under perturbed costs
pub type RandomizedPropagation = NeighborhoodPropagation<Randomized>;

impl RandomizedPropagation {
    pub fn randomized(n: usize, expansion_factor: f64) -> Self {
        NeighborhoodPropagation::with_alternates(expansion_factor, Randomized::new(n))
    }
}

/// Solves the previous primary problem `n` times with every arc cost perturbed by
/// normal noise. The noise is scaled to the range of costs the arc's descendants
/// can have, given the radii of its two nodes.
#[derive(Debug, Clone)]
pub struct Randomized {
    n: usize,
    rng: StdRng,
}

impl Randomized {
    pub fn new(n: usize) -> Self {
        Randomized {
            n,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(n: usize, seed: u64) -> Self {
        Randomized {
            n,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl AlternateSolutions for Randomized {
    fn compute_alternate_solutions(
        &mut self,
        solver: &mut TransportLpSolver,
        previous: &mut TransportPlanSolutions<'_>,
        p: f64,
        _last_scale: bool,
    ) {
        let primary = &previous.primary;
        solver.create_lp(primary);

        let mut alternatives = Vec::with_capacity(self.n);
        for i in 0..self.n {
            for path in primary.iter() {
                let r = primary.source.node(path.from).radius + primary.target.node(path.to).radius;
                let dist = path.cost.powf(1.0 / p);
                let delta = (dist + r).powf(p) - (dist - r).max(0.0).powf(p);
                let noise: f64 = self.rng.sample(StandardNormal);
                let change = noise * delta / 5.0;
                solver.set_column_objective(path.index, path.cost + change);
            }
            solver.solve_lp();

            let mut alternative = primary.clone();
            solver.store_solution(&mut alternative, p);
            alternative.cost = alternative
                .iter()
                .map(|path| path.w * path.cost)
                .sum::<f64>()
                .max(0.0)
                .powf(1.0 / p);
            trace!("randomized alternative {}: {}", i, alternative);
            alternatives.push(alternative);
        }
        for alternative in alternatives {
            previous.add_alternative(alternative);
        }
    }
}
