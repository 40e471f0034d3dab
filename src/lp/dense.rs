use std::collections::BTreeMap;

use itertools::iproduct;
use log::trace;
use ndarray::Array2;

use super::{LpBackend, NetworkSimplexBackend};
use crate::error::{Result, TransportError};

/// Positive entries of a dense transport solve
#[derive(Debug, Clone, Default)]
pub struct DenseSolution {
    pub weights: BTreeMap<(usize, usize), f64>,
    pub objective: f64,
    pub optimal: bool,
}

/// Exact transport between two mass vectors with a full cost matrix, without any
/// hierarchy. Row `i` of `cost` belongs to `from[i]`, column `j` to `to[j]`.
pub struct DenseTransportLp {
    backend: Box<dyn LpBackend>,
}

impl Default for DenseTransportLp {
    fn default() -> Self {
        DenseTransportLp {
            backend: Box::new(NetworkSimplexBackend::new()),
        }
    }
}

impl DenseTransportLp {
    pub fn new(backend: Box<dyn LpBackend>) -> Self {
        DenseTransportLp { backend }
    }

    pub fn solve(&mut self, cost: &Array2<f64>, from: &[f64], to: &[f64]) -> Result<DenseSolution> {
        let (ns, nt) = (from.len(), to.len());
        let (rows, cols) = cost.dim();
        if (rows, cols) != (ns, nt) {
            return Err(TransportError::CostShapeMismatch {
                rows,
                cols,
                sources: ns,
                targets: nt,
            });
        }

        let lp = &mut self.backend;
        lp.create_lp(ns, nt);
        lp.add_rows(ns + nt);
        lp.add_columns(ns * nt);
        for (i, &m) in from.iter().enumerate() {
            lp.set_row_bounds(i, m);
        }
        for (j, &m) in to.iter().enumerate() {
            lp.set_row_bounds(ns + j, -m);
        }
        for (i, j) in iproduct!(0..ns, 0..nt) {
            let col = i * nt + j;
            lp.set_column_coefficients(col, i, ns + j);
            lp.set_column_objective(col, cost[[i, j]]);
        }
        lp.solve_lp();

        let mut solution = DenseSolution {
            objective: lp.objective_value(),
            optimal: lp.is_optimal(),
            ..Default::default()
        };
        for (i, j) in iproduct!(0..ns, 0..nt) {
            let w = lp.column_primal(i * nt + j);
            if w > 0.0 {
                solution.weights.insert((i, j), w);
            }
        }
        trace!(
            "dense transport {} x {}: objective {}, {} positive entries",
            ns,
            nt,
            solution.objective,
            solution.weights.len()
        );
        Ok(solution)
    }
}
