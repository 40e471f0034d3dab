pub mod dense;
#[cfg(feature = "gurobi")]
pub mod gurobi;
pub mod network;
pub mod network_simplex;
pub mod transport;

pub use dense::DenseTransportLp;
#[cfg(feature = "gurobi")]
pub use gurobi::GurobiBackend;
pub use network::NetworkSimplexBackend;
pub use transport::{TransportLpSolver, TransportType};

use serde::{Deserialize, Serialize};

/// Basis status of a row or column, used for warm starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasisStatus {
    Upper,
    Lower,
    Basic,
    Unknown,
    Superbasic,
    Fixed,
    Inf,
    End,
    Free,
}

/// An exact linear program solver over transportation networks.
///
/// Every column is an arc: it has coefficient +1 at its source row and -1 at its
/// target row. A row bound is the net flow (outflow minus inflow) the row's node
/// must produce. Duals follow the convention that the reduced cost of a column is
/// `cost - dual(source row) + dual(target row)`.
pub trait LpBackend {
    /// Discards the current problem
    fn create_lp(&mut self, n_source: usize, n_target: usize);

    fn add_rows(&mut self, n: usize);

    /// Appends `n` columns with bounds [0, inf), zero cost and status `Lower`
    fn add_columns(&mut self, n: usize);

    fn n_rows(&self) -> usize;

    fn n_columns(&self) -> usize;

    /// Requires the net flow out of `row` to equal `net_flow`
    fn set_row_bounds(&mut self, row: usize, net_flow: f64);

    fn row_bounds(&self, row: usize) -> f64;

    fn set_column_bounds(&mut self, col: usize, lower: f64, upper: f64);

    /// Sets the lower bound and removes the upper bound
    fn set_column_bounds_lower(&mut self, col: usize, lower: f64) {
        self.set_column_bounds(col, lower, f64::INFINITY);
    }

    fn column_bounds(&self, col: usize) -> (f64, f64);

    fn set_column_objective(&mut self, col: usize, cost: f64);

    fn column_objective(&self, col: usize) -> f64;

    fn set_column_coefficients(&mut self, col: usize, source_row: usize, target_row: usize);

    /// Solves the current problem. Failures are reported through `is_optimal`.
    fn solve_lp(&mut self);

    fn is_optimal(&self) -> bool;

    fn objective_value(&self) -> f64;

    fn column_primal(&self, col: usize) -> f64;

    fn row_dual(&self, row: usize) -> f64;

    fn column_status(&self, col: usize) -> BasisStatus;

    fn set_column_status(&mut self, col: usize, status: BasisStatus);

    fn row_status(&self, row: usize) -> BasisStatus;

    fn set_row_status(&mut self, row: usize, status: BasisStatus);

    /// Resets the warm start information to the solver's default basis
    fn setup_standard_basis(&mut self);

    fn iteration_count(&self) -> usize;
}
