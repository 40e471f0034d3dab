use log::{trace, warn};

use super::network_simplex::{ArcState, FlowStatus, NetworkSimplex, INF};
use super::{BasisStatus, LpBackend};

/// Largest scaled cost handed to the integer solver
const MAX_COST: f64 = 1e8;
/// Largest scaled total supply handed to the integer solver
const MAX_FLOW: f64 = 1e9;

/// Exact LP backend solving the transportation network with an integer network
/// simplex. Costs and masses are rescaled to a fixed integer range on every solve,
/// with factors taken from the largest cost and the largest total supply present.
/// Lower bounds lose and upper bounds gain one integer unit so that rounding never
/// makes a feasible problem infeasible.
///
/// The solver always starts from its own initial basis, warm start statuses are
/// stored but not used.
#[derive(Debug, Clone, Default)]
pub struct NetworkSimplexBackend {
    supply: Vec<f64>,
    row_status: Vec<BasisStatus>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    objective: Vec<f64>,
    from: Vec<usize>,
    to: Vec<usize>,
    column_status: Vec<BasisStatus>,
    primal: Vec<f64>,
    duals: Vec<f64>,
    objective_value: f64,
    optimal: bool,
    iterations: usize,
}

impl NetworkSimplexBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn scale(value: f64, scaling: f64) -> i64 {
        (value * scaling).round() as i64
    }
}

impl LpBackend for NetworkSimplexBackend {
    fn create_lp(&mut self, n_source: usize, n_target: usize) {
        trace!("creating network lp for {} x {} nodes", n_source, n_target);
        *self = Self::default();
    }

    fn add_rows(&mut self, n: usize) {
        let rows = self.supply.len() + n;
        self.supply.resize(rows, 0.0);
        self.row_status.resize(rows, BasisStatus::Basic);
    }

    fn add_columns(&mut self, n: usize) {
        let cols = self.lower.len() + n;
        self.lower.resize(cols, 0.0);
        self.upper.resize(cols, f64::INFINITY);
        self.objective.resize(cols, 0.0);
        self.from.resize(cols, 0);
        self.to.resize(cols, 0);
        self.column_status.resize(cols, BasisStatus::Lower);
    }

    fn n_rows(&self) -> usize {
        self.supply.len()
    }

    fn n_columns(&self) -> usize {
        self.lower.len()
    }

    fn set_row_bounds(&mut self, row: usize, net_flow: f64) {
        self.supply[row] = net_flow;
    }

    fn row_bounds(&self, row: usize) -> f64 {
        self.supply[row]
    }

    fn set_column_bounds(&mut self, col: usize, lower: f64, upper: f64) {
        self.lower[col] = lower;
        self.upper[col] = upper;
    }

    fn column_bounds(&self, col: usize) -> (f64, f64) {
        (self.lower[col], self.upper[col])
    }

    fn set_column_objective(&mut self, col: usize, cost: f64) {
        self.objective[col] = cost;
    }

    fn column_objective(&self, col: usize) -> f64 {
        self.objective[col]
    }

    fn set_column_coefficients(&mut self, col: usize, source_row: usize, target_row: usize) {
        self.from[col] = source_row;
        self.to[col] = target_row;
    }

    fn solve_lp(&mut self) {
        let n = self.n_rows();
        let m = self.n_columns();
        self.optimal = false;
        self.iterations = 0;
        self.objective_value = 0.0;
        self.primal = vec![0.0; m];
        self.duals = vec![0.0; n];

        let max_cost = self.objective.iter().fold(0.0_f64, |acc, c| acc.max(c.abs()));
        let cost_scaling = if max_cost > 0.0 {
            MAX_COST / max_cost
        } else {
            MAX_COST
        };

        let positive: f64 = self.supply.iter().filter(|s| **s > 0.0).sum();
        let negative: f64 = -self.supply.iter().filter(|s| **s < 0.0).sum::<f64>();
        let max_mass = positive.max(negative);
        let capacity_scaling = if max_mass > 0.0 {
            MAX_FLOW / max_mass
        } else {
            MAX_FLOW
        };

        let mut supply: Vec<i64> = self
            .supply
            .iter()
            .map(|&s| Self::scale(s, capacity_scaling))
            .collect();
        let imbalance: i64 = supply.iter().sum();
        if imbalance > 0 {
            if let Some(i) = (0..n).max_by_key(|&i| supply[i]) {
                supply[i] -= imbalance;
            }
        } else if imbalance < 0 {
            if let Some(i) = (0..n).min_by_key(|&i| supply[i]) {
                supply[i] -= imbalance;
            }
        }

        let mut network = NetworkSimplex::new(n);
        for (i, &s) in supply.iter().enumerate() {
            network.set_supply(i, s);
        }
        for col in 0..m {
            let lower = if self.lower[col] > 0.0 {
                (Self::scale(self.lower[col], capacity_scaling) - 1).max(0)
            } else {
                0
            };
            let upper = if self.upper[col].is_finite() {
                (self.upper[col] * capacity_scaling).min(4.0 * MAX_FLOW).floor() as i64 + 1
            } else {
                INF
            };
            let cost = Self::scale(self.objective[col], cost_scaling);
            network.add_arc(self.from[col], self.to[col], lower, upper, cost);
        }

        let status = network.run();
        self.iterations = network.pivots();
        if status != FlowStatus::Optimal {
            warn!(
                "network simplex stopped with {:?} on {} rows and {} columns",
                status, n, m
            );
            return;
        }

        for col in 0..m {
            self.primal[col] = network.flow(col) as f64 / capacity_scaling;
            self.column_status[col] = match network.arc_state(col) {
                ArcState::Tree => BasisStatus::Basic,
                ArcState::Lower => BasisStatus::Lower,
                ArcState::Upper => BasisStatus::Upper,
            };
        }
        for row in 0..n {
            self.duals[row] = -(network.potential(row) as f64) / cost_scaling;
        }
        self.objective_value = self
            .primal
            .iter()
            .zip(self.objective.iter())
            .map(|(x, c)| x * c)
            .sum();
        self.optimal = true;

        trace!(
            "network lp solved: objective {}, {} pivots",
            self.objective_value,
            self.iterations
        );
    }

    fn is_optimal(&self) -> bool {
        self.optimal
    }

    fn objective_value(&self) -> f64 {
        self.objective_value
    }

    fn column_primal(&self, col: usize) -> f64 {
        self.primal.get(col).copied().unwrap_or(0.0)
    }

    fn row_dual(&self, row: usize) -> f64 {
        self.duals.get(row).copied().unwrap_or(0.0)
    }

    fn column_status(&self, col: usize) -> BasisStatus {
        self.column_status[col]
    }

    fn set_column_status(&mut self, col: usize, status: BasisStatus) {
        self.column_status[col] = status;
    }

    fn row_status(&self, row: usize) -> BasisStatus {
        self.row_status[row]
    }

    fn set_row_status(&mut self, row: usize, status: BasisStatus) {
        self.row_status[row] = status;
    }

    fn setup_standard_basis(&mut self) {
        self.column_status.iter_mut().for_each(|s| *s = BasisStatus::Lower);
        self.row_status.iter_mut().for_each(|s| *s = BasisStatus::Basic);
    }

    fn iteration_count(&self) -> usize {
        self.iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractional_transport() {
        let mut lp = NetworkSimplexBackend::new();
        lp.create_lp(2, 2);
        lp.add_rows(4);
        lp.set_row_bounds(0, 0.3);
        lp.set_row_bounds(1, 0.7);
        lp.set_row_bounds(2, -0.5);
        lp.set_row_bounds(3, -0.5);
        lp.add_columns(4);
        let costs = [1.0, 4.0, 2.0, 1.0];
        for (col, (i, j)) in [(0, 2), (0, 3), (1, 2), (1, 3)].into_iter().enumerate() {
            lp.set_column_coefficients(col, i, j);
            lp.set_column_objective(col, costs[col]);
        }
        lp.solve_lp();
        assert!(lp.is_optimal());

        // 0 -> 2: 0.3, 1 -> 2: 0.2, 1 -> 3: 0.5
        let expected = [0.3, 0.0, 0.2, 0.5];
        for col in 0..4 {
            assert!((lp.column_primal(col) - expected[col]).abs() < 1e-6);
        }
        assert!((lp.objective_value() - 1.2).abs() < 1e-6);

        for col in 0..4 {
            let (i, j) = [(0, 2), (0, 3), (1, 2), (1, 3)][col];
            let rc = costs[col] - lp.row_dual(i) + lp.row_dual(j);
            assert!(rc > -1e-6);
            if lp.column_primal(col) > 1e-9 {
                assert!(rc.abs() < 1e-6);
            }
        }
    }

    #[test]
    fn solves_ignore_installed_statuses() {
        let mut lp = NetworkSimplexBackend::new();
        lp.create_lp(2, 2);
        lp.add_rows(4);
        for (row, net_flow) in [0.3, 0.7, -0.5, -0.5].into_iter().enumerate() {
            lp.set_row_bounds(row, net_flow);
        }
        lp.add_columns(4);
        for (col, ((i, j), cost)) in [(0, 2), (0, 3), (1, 2), (1, 3)]
            .into_iter()
            .zip([1.0, 4.0, 2.0, 1.0])
            .enumerate()
        {
            lp.set_column_coefficients(col, i, j);
            lp.set_column_objective(col, cost);
        }
        lp.solve_lp();
        let cold = (lp.iteration_count(), lp.objective_value());
        let optimal_basis: Vec<_> = (0..4).map(|col| lp.column_status(col)).collect();

        // the optimal basis stays installed but the next solve starts over
        for (col, &status) in optimal_basis.iter().enumerate() {
            lp.set_column_status(col, status);
        }
        lp.solve_lp();
        assert!(lp.is_optimal());
        assert_eq!(lp.iteration_count(), cold.0);
        assert!((lp.objective_value() - cold.1).abs() < 1e-12);
    }

    #[test]
    fn upper_bounds_are_respected() {
        let mut lp = NetworkSimplexBackend::new();
        lp.create_lp(1, 1);
        lp.add_rows(2);
        lp.set_row_bounds(0, 1.0);
        lp.set_row_bounds(1, -1.0);
        lp.add_columns(2);
        lp.set_column_coefficients(0, 0, 1);
        lp.set_column_coefficients(1, 0, 1);
        lp.set_column_objective(0, 1.0);
        lp.set_column_objective(1, 3.0);
        lp.set_column_bounds(0, 0.0, 0.25);
        lp.solve_lp();
        assert!(lp.is_optimal());
        assert!((lp.column_primal(0) - 0.25).abs() < 1e-6);
        assert!((lp.column_primal(1) - 0.75).abs() < 1e-6);
        assert_eq!(lp.column_status(0), BasisStatus::Upper);

        lp.set_column_bounds_lower(0, 0.0);
        lp.solve_lp();
        assert!((lp.column_primal(0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn infeasible_problem_is_not_optimal() {
        let mut lp = NetworkSimplexBackend::new();
        lp.create_lp(1, 1);
        lp.add_rows(2);
        lp.set_row_bounds(0, 1.0);
        lp.set_row_bounds(1, -1.0);
        lp.add_columns(1);
        lp.set_column_coefficients(0, 0, 1);
        lp.set_column_bounds(0, 0.0, 0.5);
        lp.solve_lp();
        assert!(!lp.is_optimal());
    }
}
