use std::time::Instant;

use log::{trace, warn};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::hierarchy::Level;
use crate::plan::{SolveStatus, TransportPlan};

/// Parameters of an entropic transport solve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkhornParameters {
    /// Weight of the cost in the kernel exp(-lambda * cost)
    pub lambda: f64,
    /// Relative change of the distance at which the iteration stops
    pub tolerance: f64,
    /// Previous arcs lighter than this fraction of their smaller node mass are dropped
    pub threshold: f64,
    pub iterations: usize,
    /// Number of heaviest previous arcs kept per node
    pub max_paths_per_node: usize,
}

impl Default for SinkhornParameters {
    fn default() -> Self {
        SinkhornParameters {
            lambda: 50.0,
            tolerance: 1e-5,
            threshold: 0.0,
            iterations: 100,
            max_paths_per_node: 10,
        }
    }
}

/// The log kernel `-lambda * c` and the cost `c` over the arcs of a plan, in the
/// plan's iteration order.
#[derive(Debug, Clone)]
pub struct SparseKernel {
    n_rows: usize,
    n_cols: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    log_k: Vec<f64>,
    cost: Vec<f64>,
}

impl SparseKernel {
    pub fn from_plan(plan: &TransportPlan, lambda: f64) -> Self {
        let n = plan.n_paths();
        let mut kernel = SparseKernel {
            n_rows: plan.source.len(),
            n_cols: plan.target.len(),
            rows: Vec::with_capacity(n),
            cols: Vec::with_capacity(n),
            log_k: Vec::with_capacity(n),
            cost: Vec::with_capacity(n),
        };
        for path in plan.iter() {
            kernel.rows.push(*path.from);
            kernel.cols.push(*path.to);
            kernel.log_k.push(-lambda * path.cost);
            kernel.cost.push(path.cost);
        }
        kernel
    }

    pub fn len(&self) -> usize {
        self.log_k.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_k.is_empty()
    }

    /// `log sum_j exp(log_k_ij + g_j)` for every row i
    fn row_log_sum_exp(&self, g: &Array1<f64>) -> Array1<f64> {
        let terms: Vec<f64> = self.cols.iter().zip(&self.log_k).map(|(&j, &k)| k + g[j]).collect();
        grouped_log_sum_exp(self.n_rows, &self.rows, &terms)
    }

    /// `log sum_i exp(f_i + log_k_ij)` for every column j
    fn col_log_sum_exp(&self, f: &Array1<f64>) -> Array1<f64> {
        let terms: Vec<f64> = self.rows.iter().zip(&self.log_k).map(|(&i, &k)| f[i] + k).collect();
        grouped_log_sum_exp(self.n_cols, &self.cols, &terms)
    }

    /// Log weights `f_i + log_k_ij + g_j` in kernel order
    fn log_weights<'a>(&'a self, f: &'a Array1<f64>, g: &'a Array1<f64>) -> impl Iterator<Item = f64> + 'a {
        self.rows
            .iter()
            .zip(&self.cols)
            .zip(&self.log_k)
            .map(move |((&i, &j), &k)| f[i] + k + g[j])
    }
}

/// Log-sum-exp of `terms` per group. Empty groups get negative infinity.
fn grouped_log_sum_exp(n: usize, groups: &[usize], terms: &[f64]) -> Array1<f64> {
    let mut max = Array1::from_elem(n, f64::NEG_INFINITY);
    for (&g, &t) in groups.iter().zip(terms) {
        if t > max[g] {
            max[g] = t;
        }
    }
    let mut sum = Array1::<f64>::zeros(n);
    for (&g, &t) in groups.iter().zip(terms) {
        if max[g].is_finite() {
            sum[g] += (t - max[g]).exp();
        }
    }
    max.iter()
        .zip(sum.iter())
        .map(|(&m, &s)| if m.is_finite() { m + s.ln() } else { f64::NEG_INFINITY })
        .collect()
}

/// `log(marginal) - lse`, negative infinity for nodes no arc reaches. Returns the
/// number of nodes with mass that no arc reaches.
fn update_potential(log_marginal: &Array1<f64>, lse: &Array1<f64>) -> (Array1<f64>, usize) {
    let mut unreached = 0;
    let out: Array1<f64> = log_marginal
        .iter()
        .zip(lse.iter())
        .map(|(&m, &l)| {
            if l.is_finite() {
                m - l
            } else {
                if m.is_finite() {
                    unreached += 1;
                }
                f64::NEG_INFINITY
            }
        })
        .collect();
    (out, unreached)
}

/// Sinkhorn scaling over a sparse kernel, iterated on the logarithms `f` and `g`
/// of the left and right scalings so that kernel entries never underflow
#[derive(Debug, Clone, Default)]
pub struct SparseSinkhorn {
    log_left: Option<Array1<f64>>,
    log_right: Array1<f64>,
    distance: f64,
    iterations: usize,
    unreached: usize,
}

impl SparseSinkhorn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the iteration from the given log left scaling
    pub fn with_log_left_scaling(log_left: Array1<f64>) -> Self {
        SparseSinkhorn {
            log_left: Some(log_left),
            ..Default::default()
        }
    }

    /// Alternates `g = log(nu) - lse_i(f + log_k)` and `f = log(mu) - lse_j(log_k + g)`
    /// until the distance `sum(exp(f + log_k + g) * c)` changes by less than
    /// `tolerance` relative to its previous value, or `max_iterations` is reached.
    /// Returns the distance.
    pub fn transport(
        &mut self,
        mu: &Array1<f64>,
        nu: &Array1<f64>,
        kernel: &SparseKernel,
        tolerance: f64,
        max_iterations: usize,
    ) -> f64 {
        let log_mu = mu.mapv(f64::ln);
        let log_nu = nu.mapv(f64::ln);
        let mut f = match self.log_left.take() {
            Some(f) if f.len() == mu.len() => f,
            _ => Array1::zeros(mu.len()),
        };
        let mut g = Array1::zeros(nu.len());
        let mut distance = -1.0;
        let mut unreached = 0;
        self.iterations = 0;

        for _ in 0..max_iterations {
            self.iterations += 1;
            let (next_g, ug) = update_potential(&log_nu, &kernel.col_log_sum_exp(&f));
            g = next_g;
            let (next_f, uf) = update_potential(&log_mu, &kernel.row_log_sum_exp(&g));
            f = next_f;
            unreached = ug + uf;

            let current: f64 = kernel
                .log_weights(&f, &g)
                .zip(&kernel.cost)
                .map(|(w, &c)| w.exp() * c)
                .sum();
            let change = (1.0 - current / distance).abs();
            distance = current;
            if change < tolerance {
                break;
            }
        }

        if unreached > 0 {
            warn!("{} nodes with mass have no arc, their mass is not transported", unreached);
        }
        trace!(
            "sinkhorn on {} arcs: distance {} after {} iterations",
            kernel.len(),
            distance,
            self.iterations
        );

        self.log_left = Some(f);
        self.log_right = g;
        self.distance = distance;
        self.unreached = unreached;
        distance
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Nodes with mass that no arc of the kernel reaches
    pub fn unreached(&self) -> usize {
        self.unreached
    }

    pub fn log_left_scaling(&self) -> Option<&Array1<f64>> {
        self.log_left.as_ref()
    }

    /// Weights `left_i K_ij right_j` in kernel order
    pub fn weights(&self, kernel: &SparseKernel) -> Vec<f64> {
        match self.log_left.as_ref() {
            Some(f) => kernel.log_weights(f, &self.log_right).map(f64::exp).collect(),
            None => vec![0.0; kernel.len()],
        }
    }
}

/// Spreads the left scaling of a coarser plan evenly over the successors of each
/// node at `source`, in the log domain
pub(crate) fn refine_left_scaling<'h>(previous: &TransportPlan<'h>, source: &Level<'h>) -> Option<Array1<f64>> {
    let coarse = previous.log_left_scaling.as_ref()?;
    let mut left = Array1::zeros(source.len());
    for i in previous.source.indices() {
        let successors = previous.source.successors(i, source);
        let s = coarse[*i] - (successors.len() as f64).ln();
        for c in successors {
            left[*c] = s;
        }
    }
    Some(left)
}

/// Solves the entropic transport problem restricted to the arcs of `plan` and
/// stores the weights, the left scaling and the cost (distance^(1/p)) in the plan
pub fn solve_plan(plan: &mut TransportPlan, parameters: &SinkhornParameters, left: Option<Array1<f64>>, p: f64) {
    let start = Instant::now();
    let mu: Array1<f64> = plan.source.nodes().iter().map(|n| n.mass).collect();
    let nu: Array1<f64> = plan.target.nodes().iter().map(|n| n.mass).collect();
    let kernel = SparseKernel::from_plan(plan, parameters.lambda);

    let mut sinkhorn = match left {
        Some(left) => SparseSinkhorn::with_log_left_scaling(left),
        None => SparseSinkhorn::new(),
    };
    let distance = sinkhorn.transport(&mu, &nu, &kernel, parameters.tolerance, parameters.iterations);

    for (path, w) in plan.iter_mut().zip(sinkhorn.weights(&kernel)) {
        path.w = w;
    }
    plan.log_left_scaling = sinkhorn.log_left_scaling().cloned();
    plan.cost = distance.max(0.0).powf(1.0 / p);
    plan.status = if sinkhorn.unreached() > 0 {
        SolveStatus::MassLost
    } else {
        SolveStatus::Entropic
    };
    plan.time_solve += start.elapsed();
}
