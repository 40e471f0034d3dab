use std::time::Instant;

use log::{trace, warn};
use serde::{Deserialize, Serialize};

use super::{BasisStatus, LpBackend, NetworkSimplexBackend};
use crate::hierarchy::Duals;
use crate::plan::{Path, SolveStatus, TransportPlan};

/// Distribution columns may move at most this fraction of a node's mass
const DISTRIBUTION_FRACTION: f64 = 0.99999;

/// How differing total masses of source and target are reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportType {
    /// Masses must match, no mass is created or destroyed
    Balanced,
    /// The lighter side receives the missing mass
    UnbalancedAdd,
    /// The heavier side loses the excess mass
    UnbalancedSubtract,
    /// Mass is added to or removed from the source
    UnbalancedSource,
    /// Both sides may create and destroy mass freely
    UnbalancedFree,
    /// Like `UnbalancedSource`, with mass redistribution inside the source
    UnbalancedFreeSource,
}

impl Default for TransportType {
    fn default() -> Self {
        TransportType::Balanced
    }
}

/// Row and column positions of one transport LP.
///
/// Rows: source nodes, target nodes, then the four auxiliary nodes.
/// Columns: the four per-node distribution blocks, the two exchange columns,
/// the circulation column, then one column per path.
#[derive(Debug, Clone, Copy, Default)]
struct Layout {
    n_source: usize,
    n_target: usize,
}

impl Layout {
    fn source_row(&self, i: usize) -> usize {
        i
    }

    fn target_row(&self, j: usize) -> usize {
        self.n_source + j
    }

    fn source_supply_node(&self) -> usize {
        self.n_source + self.n_target
    }

    fn source_sink_node(&self) -> usize {
        self.source_supply_node() + 1
    }

    fn target_supply_node(&self) -> usize {
        self.source_supply_node() + 2
    }

    fn target_sink_node(&self) -> usize {
        self.source_supply_node() + 3
    }

    fn n_rows(&self) -> usize {
        self.n_source + self.n_target + 4
    }

    fn source_supply_distribution(&self, i: usize) -> usize {
        i
    }

    fn source_sink_distribution(&self, i: usize) -> usize {
        self.n_source + i
    }

    fn target_supply_distribution(&self, j: usize) -> usize {
        2 * self.n_source + j
    }

    fn target_sink_distribution(&self, j: usize) -> usize {
        2 * self.n_source + self.n_target + j
    }

    fn source_exchange(&self) -> usize {
        2 * self.n_source + 2 * self.n_target
    }

    fn target_exchange(&self) -> usize {
        self.source_exchange() + 1
    }

    fn circulation(&self) -> usize {
        self.source_exchange() + 2
    }

    fn path_offset(&self) -> usize {
        self.source_exchange() + 3
    }
}

/// Net flows of the auxiliary nodes and bounds of the exchange columns
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct MassPolicy {
    source_supply: f64,
    source_sink: f64,
    target_supply: f64,
    target_sink: f64,
    exchange_upper: f64,
    circulation_upper: f64,
}

impl MassPolicy {
    fn new(transport_type: TransportType, mass_source: f64, mass_target: f64) -> Self {
        let delta = (mass_source - mass_target).abs();
        let total = mass_source.max(mass_target);
        let heavier_source = mass_source > mass_target;
        let mut policy = MassPolicy::default();

        match transport_type {
            TransportType::Balanced => {}
            TransportType::UnbalancedAdd => {
                if heavier_source {
                    policy.target_sink = -delta;
                } else {
                    policy.source_supply = delta;
                }
            }
            TransportType::UnbalancedSubtract => {
                if heavier_source {
                    policy.source_sink = -delta;
                } else {
                    policy.target_supply = delta;
                }
            }
            TransportType::UnbalancedSource => {
                if heavier_source {
                    policy.source_sink = -delta;
                } else {
                    policy.source_supply = delta;
                }
            }
            TransportType::UnbalancedFree => {
                policy.source_supply = total;
                policy.source_sink = -mass_source;
                policy.target_supply = mass_target;
                policy.target_sink = -total;
                policy.exchange_upper = total;
            }
            TransportType::UnbalancedFreeSource => {
                if heavier_source {
                    policy.source_sink = -delta;
                } else {
                    policy.source_supply = delta;
                }
                policy.circulation_upper = mass_source;
            }
        }
        policy
    }
}

/// Encodes transport plans as LPs on a backend and reads the solutions back.
///
/// Path columns are addressed by the path's index; the solver adds the offset of
/// the auxiliary columns.
pub struct TransportLpSolver {
    backend: Box<dyn LpBackend>,
    transport_type: TransportType,
    /// Cost per unit of mass created or destroyed
    mass_delta_cost: f64,
    /// Fraction of a node's mass its distribution columns may carry
    lambda: f64,
    layout: Layout,
}

impl TransportLpSolver {
    pub fn new(
        backend: Box<dyn LpBackend>,
        transport_type: TransportType,
        mass_delta_cost: f64,
        lambda: f64,
    ) -> Self {
        TransportLpSolver {
            backend,
            transport_type,
            mass_delta_cost,
            lambda,
            layout: Layout::default(),
        }
    }

    /// A balanced solver on the network simplex backend
    pub fn network_simplex() -> Self {
        Self::new(
            Box::new(NetworkSimplexBackend::new()),
            TransportType::Balanced,
            0.0,
            1.0,
        )
    }

    pub fn transport_type(&self) -> TransportType {
        self.transport_type
    }

    /// Replaces the backend problem by the LP of `plan`
    pub fn create_lp(&mut self, plan: &TransportPlan) {
        let layout = Layout {
            n_source: plan.source.len(),
            n_target: plan.target.len(),
        };
        self.layout = layout;

        let mass_source = plan.source.total_mass();
        let mass_target = plan.target.total_mass();
        let policy = MassPolicy::new(self.transport_type, mass_source, mass_target);

        let lp = &mut self.backend;
        lp.create_lp(layout.n_source, layout.n_target);
        lp.add_rows(layout.n_rows());
        lp.add_columns(plan.n_columns() + layout.path_offset());

        lp.set_row_bounds(layout.source_supply_node(), policy.source_supply);
        lp.set_row_bounds(layout.source_sink_node(), policy.source_sink);
        lp.set_row_bounds(layout.target_supply_node(), policy.target_supply);
        lp.set_row_bounds(layout.target_sink_node(), policy.target_sink);

        let exchange = [
            (
                layout.source_exchange(),
                layout.source_supply_node(),
                layout.target_sink_node(),
                policy.exchange_upper,
            ),
            (
                layout.target_exchange(),
                layout.target_supply_node(),
                layout.source_sink_node(),
                policy.exchange_upper,
            ),
            (
                layout.circulation(),
                layout.source_sink_node(),
                layout.source_supply_node(),
                policy.circulation_upper,
            ),
        ];
        for (col, from, to, upper) in exchange {
            lp.set_column_bounds(col, 0.0, upper);
            lp.set_column_objective(col, 0.0);
            lp.set_column_coefficients(col, from, to);
        }

        let fraction = DISTRIBUTION_FRACTION * self.lambda;
        for node in plan.source.nodes().iter() {
            let i = *node.index;
            let row = layout.source_row(i);
            lp.set_row_bounds(row, node.mass);

            let col = layout.source_supply_distribution(i);
            lp.set_column_bounds(col, 0.0, fraction * node.mass);
            lp.set_column_objective(col, self.mass_delta_cost);
            lp.set_column_coefficients(col, layout.source_supply_node(), row);

            let col = layout.source_sink_distribution(i);
            lp.set_column_bounds(col, 0.0, fraction * node.mass);
            lp.set_column_objective(col, self.mass_delta_cost);
            lp.set_column_coefficients(col, row, layout.source_sink_node());
        }

        for node in plan.target.nodes().iter() {
            let j = *node.index;
            let row = layout.target_row(j);
            lp.set_row_bounds(row, -node.mass);

            let col = layout.target_sink_distribution(j);
            lp.set_column_bounds(col, 0.0, fraction * node.mass);
            lp.set_column_objective(col, self.mass_delta_cost);
            lp.set_column_coefficients(col, row, layout.target_sink_node());

            let col = layout.target_supply_distribution(j);
            lp.set_column_bounds(col, 0.0, fraction * node.mass);
            lp.set_column_objective(col, self.mass_delta_cost);
            lp.set_column_coefficients(col, layout.target_supply_node(), row);
        }

        let offset = layout.path_offset();
        for path in plan.iter() {
            let col = offset + path.index;
            lp.set_column_bounds_lower(col, 0.0);
            lp.set_column_objective(col, path.cost);
            lp.set_column_coefficients(col, layout.source_row(*path.from), layout.target_row(*path.to));
        }

        trace!(
            "created {:?} transport lp: {} rows, {} columns, source mass {}, target mass {}",
            self.transport_type,
            lp.n_rows(),
            lp.n_columns(),
            mass_source,
            mass_target
        );
    }

    /// Copies weights, cost and node potentials of the last solve into `plan`
    pub fn store_lp(&self, plan: &mut TransportPlan, duals: &mut Duals, p: f64) {
        self.store_solution(plan, p);

        let source = duals.source.level_mut(plan.source.scale());
        for node in plan.source.nodes().iter() {
            source[node.index].potential = self.backend.row_dual(self.layout.source_row(*node.index));
        }
        let target = duals.target.level_mut(plan.target.scale());
        for node in plan.target.nodes().iter() {
            target[node.index].potential = self.backend.row_dual(self.layout.target_row(*node.index));
        }
    }

    /// Copies weights and cost of the last solve into `plan`, leaving the node
    /// potentials alone
    pub fn store_solution(&self, plan: &mut TransportPlan, p: f64) {
        let objective = self.backend.objective_value();
        plan.cost = objective.max(0.0).powf(1.0 / p);
        plan.status = if self.backend.is_optimal() {
            SolveStatus::Optimal
        } else {
            SolveStatus::NotOptimal
        };

        let offset = self.layout.path_offset();
        for path in plan.iter_mut() {
            path.w = self.backend.column_primal(offset + path.index);
        }
    }

    /// Reads the node potentials of the last solve and collapses each node's pi
    /// bounds onto its potential
    pub fn set_potentials(&self, plan: &TransportPlan, duals: &mut Duals) {
        let source = duals.source.level_mut(plan.source.scale());
        for node in plan.source.nodes().iter() {
            let pi = self.backend.row_dual(self.layout.source_row(*node.index));
            source[node.index].potential = pi;
            source[node.index].reset_pi_to(pi);
        }
        let target = duals.target.level_mut(plan.target.scale());
        for node in plan.target.nodes().iter() {
            let pi = self.backend.row_dual(self.layout.target_row(*node.index));
            target[node.index].potential = pi;
            target[node.index].reset_pi_to(pi);
        }
    }

    /// Installs a warm start: statuses of the path columns by path index and of
    /// all rows
    pub fn setup_basis(&mut self, column_status: &[BasisStatus], row_status: &[BasisStatus]) {
        let offset = self.layout.path_offset();
        for (i, &status) in column_status.iter().enumerate() {
            self.backend.set_column_status(offset + i, status);
        }
        for (i, &status) in row_status.iter().enumerate() {
            self.backend.set_row_status(i, status);
        }
    }

    /// Solves the current LP and returns whether the solve was optimal
    pub fn solve_lp(&mut self) -> bool {
        let start = Instant::now();
        self.backend.solve_lp();
        let optimal = self.backend.is_optimal();
        trace!(
            "solved lp in {:?}: optimal {}, objective {}, {} iterations",
            start.elapsed(),
            optimal,
            self.backend.objective_value(),
            self.backend.iteration_count()
        );
        if !optimal {
            warn!("transport lp was not solved to optimality");
        }
        optimal
    }

    /// Builds, solves and stores the LP of `plan`, accounting the time to the plan
    pub fn solve(&mut self, plan: &mut TransportPlan, duals: &mut Duals, p: f64) -> bool {
        let start = Instant::now();
        self.create_lp(plan);
        let optimal = self.solve_lp();
        self.store_lp(plan, duals, p);
        plan.time_solve += start.elapsed();
        optimal
    }

    /// Appends `n` path columns
    pub fn add_columns(&mut self, n: usize) {
        self.backend.add_columns(n);
    }

    /// Adds the column of a path that is not yet part of the LP
    pub fn add_path_column(&mut self, path: &Path) {
        let col = self.layout.path_offset() + path.index;
        let missing = (col + 1).saturating_sub(self.backend.n_columns());
        if missing > 0 {
            self.backend.add_columns(missing);
        }
        self.backend.set_column_objective(col, path.cost);
        self.backend.set_column_bounds_lower(col, 0.0);
        self.backend.set_column_status(col, BasisStatus::Lower);
        self.backend.set_column_coefficients(
            col,
            self.layout.source_row(*path.from),
            self.layout.target_row(*path.to),
        );
    }

    pub fn set_column_bounds(&mut self, index: usize, lower: f64, upper: f64) {
        self.backend
            .set_column_bounds(self.layout.path_offset() + index, lower, upper);
    }

    pub fn set_column_bounds_lower(&mut self, index: usize, lower: f64) {
        self.backend
            .set_column_bounds_lower(self.layout.path_offset() + index, lower);
    }

    /// Resets the bounds of every path column of `plan` to [0, inf)
    pub fn relax_path_bounds(&mut self, plan: &TransportPlan) {
        for path in plan.iter() {
            self.set_column_bounds_lower(path.index, 0.0);
        }
    }

    pub fn column_bounds(&self, index: usize) -> (f64, f64) {
        self.backend.column_bounds(self.layout.path_offset() + index)
    }

    pub fn set_column_objective(&mut self, index: usize, cost: f64) {
        self.backend
            .set_column_objective(self.layout.path_offset() + index, cost);
    }

    pub fn column_primal(&self, index: usize) -> f64 {
        self.backend.column_primal(self.layout.path_offset() + index)
    }

    pub fn column_status(&self, index: usize) -> BasisStatus {
        self.backend.column_status(self.layout.path_offset() + index)
    }

    pub fn set_column_status(&mut self, index: usize, status: BasisStatus) {
        self.backend
            .set_column_status(self.layout.path_offset() + index, status);
    }

    pub fn row_status(&self, row: usize) -> BasisStatus {
        self.backend.row_status(row)
    }

    pub fn set_row_status(&mut self, row: usize, status: BasisStatus) {
        self.backend.set_row_status(row, status);
    }

    pub fn row_dual(&self, row: usize) -> f64 {
        self.backend.row_dual(row)
    }

    pub fn n_rows(&self) -> usize {
        self.backend.n_rows()
    }

    pub fn objective_value(&self) -> f64 {
        self.backend.objective_value()
    }

    pub fn is_optimal(&self) -> bool {
        self.backend.is_optimal()
    }

    pub fn iteration_count(&self) -> usize {
        self.backend.iteration_count()
    }

    pub fn setup_standard_basis(&mut self) {
        self.backend.setup_standard_basis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{Hierarchy, HierarchyBuilder, NodeIndex};

    fn line(positions: &[f64], masses: &[f64]) -> Hierarchy {
        let mut builder = HierarchyBuilder::new(1);
        let root = builder.add_level();
        let leaves = builder.add_level();
        let r = builder.add_node(root, vec![0.0], 0.0, None).unwrap();
        for (&x, &m) in positions.iter().zip(masses) {
            builder.add_node(leaves, vec![x], m, Some(r)).unwrap();
        }
        let mut h = builder.build().unwrap();
        h.normalize(false).unwrap();
        h
    }

    fn solver(transport_type: TransportType) -> TransportLpSolver {
        solver_with(transport_type, 0.0, 1.0)
    }

    fn solver_with(transport_type: TransportType, mass_delta_cost: f64, lambda: f64) -> TransportLpSolver {
        TransportLpSolver::new(
            Box::new(NetworkSimplexBackend::new()),
            transport_type,
            mass_delta_cost,
            lambda,
        )
    }

    /// Solves the complete plan between two lines with p = 1 and returns the
    /// transported mass and the cost
    fn solve_lines(a: &Hierarchy, b: &Hierarchy, mut lp: TransportLpSolver) -> (f64, f64) {
        let mut plan = TransportPlan::complete(a.finest(), b.finest(), 1.0);
        let mut duals = Duals::new(a, b);
        assert!(lp.solve(&mut plan, &mut duals, 1.0));
        (plan.iter().map(|p| p.w).sum(), plan.cost)
    }

    #[test]
    fn balanced_plan_conserves_mass() {
        let a = line(&[0.0, 1.0, 4.0], &[0.2, 0.5, 0.3]);
        let b = line(&[0.5, 3.0], &[0.6, 0.4]);
        let mut plan = TransportPlan::complete(a.finest(), b.finest(), 2.0);
        let mut duals = Duals::new(&a, &b);
        let mut lp = solver(TransportType::Balanced);
        assert!(lp.solve(&mut plan, &mut duals, 2.0));

        for node in a.finest().nodes().iter() {
            assert!((plan.out_mass(node.index) - node.mass).abs() < 1e-6);
        }
        for node in b.finest().nodes().iter() {
            assert!((plan.in_mass(node.index) - node.mass).abs() < 1e-6);
        }

        // dual feasibility against the solver's potentials
        let (sd, td) = (duals.source.level(1), duals.target.level(1));
        for path in plan.iter() {
            let rc = path.cost - sd[path.from].potential + td[path.to].potential;
            assert!(rc > -1e-6);
            if path.w > 1e-9 {
                assert!(rc.abs() < 1e-6);
            }
        }

        let objective: f64 = plan.iter().map(|p| p.w * p.cost).sum();
        assert!((plan.cost - objective.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn unbalanced_add_fills_the_lighter_side() {
        let a = line(&[0.0, 1.0, 5.0], &[1.0, 1.0, 1.0]);
        let b = line(&[0.0, 5.0], &[1.0, 1.0]);
        let mut plan = TransportPlan::complete(a.finest(), b.finest(), 1.0);
        let mut duals = Duals::new(&a, &b);
        let mut lp = solver(TransportType::UnbalancedAdd);
        assert!(lp.solve(&mut plan, &mut duals, 1.0));

        // source is heavier, the targets pass one extra unit on to the sink
        let moved: f64 = plan.iter().map(|p| p.w).sum();
        assert!((moved - 3.0).abs() < 1e-6);
        assert!((plan.cost - 1.0).abs() < 1e-4);
    }

    #[test]
    fn unbalanced_subtract_drops_the_excess() {
        let a = line(&[0.0, 1.0], &[1.0, 1.0]);
        let b = line(&[0.0], &[1.0]);
        let mut plan = TransportPlan::complete(a.finest(), b.finest(), 1.0);
        let mut duals = Duals::new(&a, &b);
        let mut lp = solver(TransportType::UnbalancedSubtract);
        assert!(lp.solve(&mut plan, &mut duals, 1.0));

        let moved: f64 = plan.iter().map(|p| p.w).sum();
        assert!((moved - 1.0).abs() < 1e-6);
        let stay = plan.path(NodeIndex::from(0), NodeIndex::from(0)).unwrap();
        assert!(stay.w > 0.9999);
        assert!(plan.cost < 1e-4);
    }

    #[test]
    fn path_columns_follow_the_offset() {
        let a = line(&[0.0, 1.0], &[1.0, 1.0]);
        let b = line(&[0.0, 1.0], &[1.0, 1.0]);
        let mut plan = TransportPlan::new(a.finest(), b.finest());
        plan.add(NodeIndex::from(0), NodeIndex::from(1), 1.0);
        plan.add(NodeIndex::from(1), NodeIndex::from(0), 1.0);
        let mut duals = Duals::new(&a, &b);
        let mut lp = solver(TransportType::Balanced);
        assert!(lp.solve(&mut plan, &mut duals, 1.0));

        let index = plan.add(NodeIndex::from(0), NodeIndex::from(0), 1.0);
        let path = *plan.path(NodeIndex::from(0), NodeIndex::from(0)).unwrap();
        assert_eq!(path.index, index);
        lp.add_path_column(&path);
        let index = plan.add(NodeIndex::from(1), NodeIndex::from(1), 1.0);
        let path = *plan.path(NodeIndex::from(1), NodeIndex::from(1)).unwrap();
        assert_eq!(path.index, index);
        lp.add_path_column(&path);
        assert!(lp.solve_lp());
        lp.store_lp(&mut plan, &mut duals, 1.0);
        assert!(plan.cost.abs() < 1e-6);
        assert!((plan.path(NodeIndex::from(1), NodeIndex::from(1)).unwrap().w - 1.0).abs() < 1e-6);
    }

    #[test]
    fn unbalanced_source_adds_mass_to_the_lighter_source() {
        let a = line(&[0.0, 3.0], &[1.0, 1.0]);
        let b = line(&[0.0, 3.0, 6.0], &[1.0, 1.0, 1.0]);

        // the extra unit enters at the sources and still has to reach 6
        let (moved, cost) = solve_lines(&a, &b, solver(TransportType::UnbalancedSource));
        assert!((moved - 3.0).abs() < 1e-6);
        assert!((cost - 3.0).abs() < 1e-3);

        // subtracting supplies the missing unit at the targets instead
        let (moved, cost) = solve_lines(&a, &b, solver(TransportType::UnbalancedSubtract));
        assert!((moved - 2.0).abs() < 1e-6);
        assert!(cost < 1e-3);
    }

    #[test]
    fn unbalanced_free_source_moves_mass_inside_the_source() {
        let a = line(&[0.0, 10.0], &[1.0, 1.0]);
        let b = line(&[9.0, 10.0], &[1.0, 1.0]);

        let (moved, cost) = solve_lines(&a, &b, solver(TransportType::UnbalancedSource));
        assert!((moved - 2.0).abs() < 1e-6);
        assert!((cost - 9.0).abs() < 1e-6);

        // all but 1e-5 of the mass at 0 reappears at 10 and moves one unit
        let (moved, cost) = solve_lines(&a, &b, solver(TransportType::UnbalancedFreeSource));
        assert!((moved - 2.0).abs() < 1e-6);
        assert!((cost - 1.00008).abs() < 1e-4);

        let (_, cost) = solve_lines(&a, &b, solver_with(TransportType::UnbalancedFreeSource, 100.0, 1.0));
        assert!((cost - 9.0).abs() < 1e-6);
    }

    #[test]
    fn unbalanced_free_bypass_shrinks_with_its_cost() {
        let a = line(&[0.0, 1.0], &[1.0, 1.0]);
        let b = line(&[5.0, 6.0], &[1.0, 1.0]);

        // each node keeps only the 1e-5 of its mass the distribution columns cannot take
        let (moved, cost) = solve_lines(&a, &b, solver(TransportType::UnbalancedFree));
        assert!((moved - 2e-5).abs() < 1e-7);
        assert!((cost - 1e-4).abs() < 1e-6);

        // bypassing costs 2 per unit on both sides, transport at least 4
        let (moved, cost) = solve_lines(&a, &b, solver_with(TransportType::UnbalancedFree, 1.0, 1.0));
        assert!((moved - 2e-5).abs() < 1e-7);
        assert!((cost - 4.00006).abs() < 1e-5);

        let (moved, cost) = solve_lines(&a, &b, solver_with(TransportType::UnbalancedFree, 100.0, 1.0));
        assert!((moved - 2.0).abs() < 1e-6);
        assert!((cost - 10.0).abs() < 1e-6);
    }

    #[test]
    fn lambda_limits_the_distributed_mass() {
        let a = line(&[0.0, 1.0], &[1.0, 1.0]);
        let b = line(&[5.0, 6.0], &[1.0, 1.0]);

        let (moved, cost) = solve_lines(&a, &b, solver_with(TransportType::UnbalancedFree, 0.0, 0.5));
        assert!((moved - 1.00001).abs() < 1e-6);
        assert!((cost - 5.00005).abs() < 1e-5);
    }
}
