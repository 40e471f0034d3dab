use log::debug;

use super::MultiscaleTransport;
use crate::hierarchy::{Duals, Level};
use crate::lp::TransportLpSolver;
use crate::neighborhood::NeighborhoodStrategy;
use crate::plan::TransportPlanSolutions;
use crate::propagation::PropagationStrategy;

/// Exact multiscale transport: a propagation strategy produces the plan at each
/// new pair of levels, a list of neighborhood strategies refines it.
///
/// Pairs of levels with more than `max_neighborhood_size` nodes in total are
/// handed to the fallback propagation instead, without any refinement.
pub struct MultiscaleTransportLp {
    solver: TransportLpSolver,
    propagation: Box<dyn PropagationStrategy>,
    fallback: Option<Box<dyn PropagationStrategy>>,
    max_neighborhood_size: usize,
    neighborhoods: Vec<Box<dyn NeighborhoodStrategy>>,
    last_scale_neighborhood: Option<Box<dyn NeighborhoodStrategy>>,
}

impl MultiscaleTransportLp {
    pub fn new<P>(solver: TransportLpSolver, propagation: P) -> Self
    where
        P: PropagationStrategy + 'static,
    {
        MultiscaleTransportLp {
            solver,
            propagation: Box::new(propagation),
            fallback: None,
            max_neighborhood_size: 10_000_000,
            neighborhoods: Vec::new(),
            last_scale_neighborhood: None,
        }
    }

    pub fn with_fallback<P>(mut self, fallback: P, max_neighborhood_size: usize) -> Self
    where
        P: PropagationStrategy + 'static,
    {
        self.fallback = Some(Box::new(fallback));
        self.max_neighborhood_size = max_neighborhood_size;
        self
    }

    pub fn with_max_neighborhood_size(mut self, max_neighborhood_size: usize) -> Self {
        self.max_neighborhood_size = max_neighborhood_size;
        self
    }

    /// Appends a refinement run after the propagation at every pair of levels but
    /// the first
    pub fn with_neighborhood<N>(mut self, neighborhood: N) -> Self
    where
        N: NeighborhoodStrategy + 'static,
    {
        self.neighborhoods.push(Box::new(neighborhood));
        self
    }

    /// A refinement run after all others at the finest pair of levels only
    pub fn with_last_scale_neighborhood<N>(mut self, neighborhood: N) -> Self
    where
        N: NeighborhoodStrategy + 'static,
    {
        self.last_scale_neighborhood = Some(Box::new(neighborhood));
        self
    }

    pub fn solver(&self) -> &TransportLpSolver {
        &self.solver
    }
}

impl MultiscaleTransport for MultiscaleTransportLp {
    fn solve_scale<'h>(
        &mut self,
        source: Level<'h>,
        target: Level<'h>,
        previous: Option<&mut TransportPlanSolutions<'h>>,
        duals: &mut Duals,
        p: f64,
        last_scale: bool,
    ) -> TransportPlanSolutions<'h> {
        let n_nodes = source.len() + target.len();
        if n_nodes > self.max_neighborhood_size {
            if let Some(fallback) = self.fallback.as_mut() {
                debug!(
                    "{} nodes exceed the neighborhood size {}, using the fallback propagation",
                    n_nodes, self.max_neighborhood_size
                );
                return fallback.propagate(&mut self.solver, source, target, previous, duals, p, last_scale);
            }
        }

        let refine = previous.is_some();
        let mut solutions = self
            .propagation
            .propagate(&mut self.solver, source, target, previous, duals, p, last_scale);
        if !refine {
            return solutions;
        }

        let last = match self.last_scale_neighborhood.as_mut() {
            Some(neighborhood) if last_scale => Some(neighborhood),
            _ => None,
        };
        for neighborhood in self.neighborhoods.iter_mut().chain(last) {
            let candidates = solutions.combined_paths();
            neighborhood.solve_neighborhood(&mut self.solver, &mut solutions.primary, &candidates, duals, p);
        }
        solutions
    }
}
