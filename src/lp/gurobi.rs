use grb::expr::LinExpr;
use grb::prelude::*;
use log::{trace, warn};

use super::{BasisStatus, LpBackend};

/// LP backend building a Gurobi model on every solve. Stored basis statuses are
/// passed on as a warm start.
#[derive(Debug, Clone, Default)]
pub struct GurobiBackend {
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
    warm_start: bool,
}

impl GurobiBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn vbasis(status: BasisStatus) -> i32 {
        match status {
            BasisStatus::Basic => 0,
            BasisStatus::Upper => -2,
            BasisStatus::Superbasic | BasisStatus::Free => -3,
            _ => -1,
        }
    }

    fn from_vbasis(code: i32) -> BasisStatus {
        match code {
            0 => BasisStatus::Basic,
            -2 => BasisStatus::Upper,
            -3 => BasisStatus::Superbasic,
            _ => BasisStatus::Lower,
        }
    }

    fn bound(value: f64) -> f64 {
        if value.is_finite() {
            value
        } else {
            value.signum() * grb::INFINITY
        }
    }

    fn solve_gurobi(&mut self) -> grb::Result<()> {
        let mut model = Model::new("transport")?;
        model.set_param(grb::param::OutputFlag, 0)?;
        model.set_param(grb::param::Threads, 1)?;

        let mut vars = Vec::with_capacity(self.lower.len());
        for col in 0..self.lower.len() {
            let (lb, ub) = (Self::bound(self.lower[col]), Self::bound(self.upper[col]));
            vars.push(add_ctsvar!(model, name: &format!("x_{}", col), obj: self.objective[col], bounds: lb..ub)?);
        }

        let mut rows: Vec<LinExpr> = (0..self.supply.len()).map(|_| LinExpr::new()).collect();
        for (col, var) in vars.iter().enumerate() {
            rows[self.from[col]].add_term(1.0, *var);
            rows[self.to[col]].add_term(-1.0, *var);
        }
        let mut constrs = Vec::with_capacity(rows.len());
        for (row, expr) in rows.into_iter().enumerate() {
            constrs.push(model.add_constr(&format!("flow_{}", row), c!(expr == self.supply[row]))?);
        }
        model.update()?;

        if self.warm_start {
            for (var, status) in vars.iter().zip(&self.column_status) {
                model.set_obj_attr(attr::VBasis, var, Self::vbasis(*status))?;
            }
            for (constr, status) in constrs.iter().zip(&self.row_status) {
                let code = match status {
                    BasisStatus::Basic => 0,
                    _ => -1,
                };
                model.set_obj_attr(attr::CBasis, constr, code)?;
            }
        }

        model.optimize()?;
        self.iterations = model.get_attr(attr::IterCount)? as usize;
        if model.status()? != Status::Optimal {
            warn!("gurobi stopped with status {:?}", model.status()?);
            return Ok(());
        }

        self.objective_value = model.get_attr(attr::ObjVal)?;
        self.primal = vars
            .iter()
            .map(|var| model.get_obj_attr(attr::X, var))
            .collect::<grb::Result<Vec<f64>>>()?;
        self.duals = constrs
            .iter()
            .map(|constr| model.get_obj_attr(attr::Pi, constr))
            .collect::<grb::Result<Vec<f64>>>()?;
        self.column_status = vars
            .iter()
            .map(|var| model.get_obj_attr(attr::VBasis, var).map(Self::from_vbasis))
            .collect::<grb::Result<Vec<_>>>()?;
        self.row_status = constrs
            .iter()
            .map(|constr| {
                model.get_obj_attr(attr::CBasis, constr).map(|code| match code {
                    0 => BasisStatus::Basic,
                    _ => BasisStatus::Lower,
                })
            })
            .collect::<grb::Result<Vec<_>>>()?;
        self.optimal = true;
        Ok(())
    }
}

impl LpBackend for GurobiBackend {
    fn create_lp(&mut self, n_source: usize, n_target: usize) {
        trace!("creating gurobi lp for {} x {} nodes", n_source, n_target);
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
        self.optimal = false;
        self.objective_value = 0.0;
        self.primal = vec![0.0; self.n_columns()];
        self.duals = vec![0.0; self.n_rows()];
        if let Err(e) = self.solve_gurobi() {
            warn!("gurobi failed: {}", e);
            self.optimal = false;
        }
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
        self.warm_start = true;
        self.column_status[col] = status;
    }

    fn row_status(&self, row: usize) -> BasisStatus {
        self.row_status[row]
    }

    fn set_row_status(&mut self, row: usize, status: BasisStatus) {
        self.warm_start = true;
        self.row_status[row] = status;
    }

    fn setup_standard_basis(&mut self) {
        self.warm_start = false;
        self.column_status.iter_mut().for_each(|s| *s = BasisStatus::Lower);
        self.row_status.iter_mut().for_each(|s| *s = BasisStatus::Basic);
    }

    fn iteration_count(&self) -> usize {
        self.iterations
    }
}
