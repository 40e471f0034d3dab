pub mod lp;
pub mod sinkhorn;

pub use lp::MultiscaleTransportLp;
pub use sinkhorn::MultiscaleSinkhornTransport;

use std::time::Instant;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};
use crate::hierarchy::{Duals, Hierarchy, Level};
use crate::plan::{TransportPlan, TransportPlanSolutions};

/// Options of a single multiscale solve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiscaleOptions {
    /// Exponent of the cost, distance^p
    pub p: f64,
    /// Number of source levels solved, counted from the finest. All by default.
    pub source_scales: Option<usize>,
    /// Number of target levels solved, counted from the finest. All by default.
    pub target_scales: Option<usize>,
    /// Moves the coarser of the two starting levels down until the mean local
    /// radii of both starting levels are as close as possible
    pub match_start_scale: bool,
    /// Rescales every level to total mass one
    pub scale_mass: bool,
}

impl Default for MultiscaleOptions {
    fn default() -> Self {
        MultiscaleOptions {
            p: 2.0,
            source_scales: None,
            target_scales: None,
            match_start_scale: false,
            scale_mass: true,
        }
    }
}

/// Solves a transport problem coarse to fine over two hierarchies. Implementors
/// provide the solve at a single pair of levels, the traversal of the levels is
/// shared.
pub trait MultiscaleTransport {
    /// Solves the problem between `source` and `target`, starting from the
    /// solutions at the previous pair of levels if there is one
    #[allow(clippy::too_many_arguments)]
    fn solve_scale<'h>(
        &mut self,
        source: Level<'h>,
        target: Level<'h>,
        previous: Option<&mut TransportPlanSolutions<'h>>,
        duals: &mut Duals,
        p: f64,
        last_scale: bool,
    ) -> TransportPlanSolutions<'h>;

    /// Normalizes both hierarchies and solves every pair of levels from the
    /// starting levels down to the finest ones. A hierarchy that runs out of levels
    /// stays at its finest level while the other one continues.
    ///
    /// Returns the primary plan of every pair of levels, coarsest first.
    fn solve<'h>(
        &mut self,
        source: &'h mut Hierarchy,
        target: &'h mut Hierarchy,
        options: &MultiscaleOptions,
    ) -> Result<Vec<TransportPlan<'h>>> {
        let p = options.p;
        if !(p > 0.0) || !p.is_finite() {
            return Err(TransportError::InvalidExponent(p));
        }
        if source.dimension() != target.dimension() {
            return Err(TransportError::DimensionMismatch {
                expected: source.dimension(),
                found: target.dimension(),
            });
        }
        source.normalize(options.scale_mass)?;
        target.normalize(options.scale_mass)?;
        let source: &'h Hierarchy = source;
        let target: &'h Hierarchy = target;

        let (na, nb) = (source.n_scales(), target.n_scales());
        let (mut a, mut b) = (
            start_scale(na, options.source_scales),
            start_scale(nb, options.target_scales),
        );
        if options.match_start_scale {
            (a, b) = match_start_scales(source, target, a, b);
        }
        debug!(
            "solving from source scale {} of {} and target scale {} of {}",
            a, na, b, nb
        );

        let mut duals = Duals::new(source, target);
        let mut plans = Vec::with_capacity((na - a).max(nb - b));
        let mut previous: Option<TransportPlanSolutions<'h>> = None;
        while a < na || b < nb {
            let (source_level, target_level) = (source.level(a.min(na - 1)), target.level(b.min(nb - 1)));
            let last_scale = a + 1 >= na && b + 1 >= nb;

            let start = Instant::now();
            let solutions = self.solve_scale(source_level, target_level, previous.as_mut(), &mut duals, p, last_scale);
            let plan = &solutions.primary;
            info!(
                "scales ({}, {}): {} nodes x {} nodes, {} arcs, cost {:.6} [{:?}] in {:?} (propagate {:?}, solve {:?}, refine {:?})",
                source_level.scale(),
                target_level.scale(),
                source_level.len(),
                target_level.len(),
                plan.n_paths(),
                plan.cost,
                plan.status,
                start.elapsed(),
                plan.time_propagate,
                plan.time_solve,
                plan.time_refine,
            );

            if let Some(done) = previous.replace(solutions) {
                plans.push(done.into_primary());
            }
            if a < na {
                a += 1;
            }
            if b < nb {
                b += 1;
            }
        }
        plans.extend(previous.map(TransportPlanSolutions::into_primary));

        Ok(plans)
    }
}

impl<T> MultiscaleTransport for Box<T>
where
    T: MultiscaleTransport + ?Sized,
{
    fn solve_scale<'h>(
        &mut self,
        source: Level<'h>,
        target: Level<'h>,
        previous: Option<&mut TransportPlanSolutions<'h>>,
        duals: &mut Duals,
        p: f64,
        last_scale: bool,
    ) -> TransportPlanSolutions<'h> {
        T::solve_scale(self, source, target, previous, duals, p, last_scale)
    }
}

fn start_scale(n_scales: usize, scales: Option<usize>) -> usize {
    match scales {
        Some(s) => n_scales - s.clamp(1, n_scales),
        None => 0,
    }
}

/// Moves the starting level with the larger mean local radius down its hierarchy
/// for as long as that brings the two mean local radii closer together
fn match_start_scales(source: &Hierarchy, target: &Hierarchy, mut a: usize, mut b: usize) -> (usize, usize) {
    let ra = source.level(a).mean_local_radius();
    let rb = target.level(b).mean_local_radius();
    let mut delta = ra - rb;
    if delta > 0.0 {
        while a + 1 < source.n_scales() {
            let next = source.level(a + 1).mean_local_radius() - rb;
            if next.abs() > delta.abs() {
                break;
            }
            delta = next;
            a += 1;
        }
    } else {
        while b + 1 < target.n_scales() {
            let next = ra - target.level(b + 1).mean_local_radius();
            if next.abs() > delta.abs() {
                break;
            }
            delta = next;
            b += 1;
        }
    }
    (a, b)
}
