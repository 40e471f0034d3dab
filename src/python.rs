use std::fmt::Debug;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::config::TransportConfig;
use crate::coupling::Coupling;
use crate::hierarchy::PointSet;

pub fn pyerr<D: Debug>(err: D) -> PyErr {
    PyErr::new::<PyValueError, _>(format!("{:?}", err))
}

/// Solves the transport problem between two weighted point sets.
///
/// `config` is a JSON transport configuration, the defaults are used without one.
/// Returns the finest coupling as (source, target, weight) triples and the cost
/// at every scale, coarsest first.
#[pyfunction]
#[pyo3(text_signature = "(source, target, source_masses=None, target_masses=None, config=None)")]
pub fn transport(
    source: Vec<Vec<f64>>,
    target: Vec<Vec<f64>>,
    source_masses: Option<Vec<f64>>,
    target_masses: Option<Vec<f64>>,
    config: Option<&str>,
) -> PyResult<(Vec<(usize, usize, f64)>, Vec<f64>)> {
    let config = match config {
        Some(json) => TransportConfig::from_json(json).map_err(pyerr)?,
        None => TransportConfig::default(),
    };
    let source = PointSet {
        points: source,
        masses: source_masses,
    };
    let target = PointSet {
        points: target,
        masses: target_masses,
    };
    let mut a = source.hierarchy(None).map_err(pyerr)?;
    let mut b = target.hierarchy(None).map_err(pyerr)?;

    let mut solver = config.build().map_err(pyerr)?;
    let plans = solver.solve(&mut a, &mut b, &config.options).map_err(pyerr)?;
    let costs = plans.iter().map(|plan| plan.cost).collect();
    let coupling = match plans.last() {
        Some(finest) => Coupling::from_plan(finest),
        None => Coupling::default(),
    };

    Ok((
        coupling.weights.into_iter().map(|((i, j), w)| (i, j, w)).collect(),
        costs,
    ))
}

/// Python entry point. The name must match `lib.name` in `Cargo.toml`.
#[pymodule]
fn multiscale_transport(_py: Python, m: &PyModule) -> PyResult<()> {
    pyo3_log::init();
    m.add_function(wrap_pyfunction!(transport, m)?)?;
    Ok(())
}
