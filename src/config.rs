use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};
use crate::lp::{LpBackend, NetworkSimplexBackend, TransportLpSolver, TransportType};
use crate::multiscale::{MultiscaleOptions, MultiscaleSinkhornTransport, MultiscaleTransport, MultiscaleTransportLp};
use crate::neighborhood::{ExpandNeighborhood, NeighborhoodStrategy, PotentialNeighborhood, RefineNeighborhood};
use crate::propagation::{
    Capacity, IteratedCapacity, MaxEntropyPropagation, NeighborhoodPropagation, PropagationStrategy, Randomized,
    SinkhornPropagation,
};
use crate::sinkhorn::SinkhornParameters;

/// The exact LP solver used by the LP driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    NetworkSimplex,
    #[cfg(feature = "gurobi")]
    Gurobi,
}

impl Default for Backend {
    fn default() -> Self {
        Backend::NetworkSimplex
    }
}

impl Backend {
    fn build(self) -> Box<dyn LpBackend> {
        match self {
            Backend::NetworkSimplex => Box::new(NetworkSimplexBackend::new()),
            #[cfg(feature = "gurobi")]
            Backend::Gurobi => Box::new(crate::lp::GurobiBackend::new()),
        }
    }
}

/// Exact LP solves with propagation and refinement, or entropic solves only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Driver {
    Lp,
    Sinkhorn,
}

impl Default for Driver {
    fn default() -> Self {
        Driver::Lp
    }
}

fn one() -> usize {
    1
}

fn default_capacity() -> usize {
    2
}

fn sinkhorn_lambda() -> f64 {
    SinkhornPropagation::default().parameters.lambda
}

fn sinkhorn_tolerance() -> f64 {
    SinkhornPropagation::default().parameters.tolerance
}

fn sinkhorn_iterations() -> usize {
    SinkhornPropagation::default().parameters.iterations
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum PropagationConfig {
    Neighborhood {
        #[serde(default)]
        expansion_factor: f64,
    },
    Capacity {
        #[serde(default)]
        expansion_factor: f64,
        #[serde(default = "default_capacity")]
        k: usize,
    },
    IteratedCapacity {
        #[serde(default)]
        expansion_factor: f64,
        #[serde(default = "one")]
        iterations: usize,
    },
    Randomized {
        #[serde(default)]
        expansion_factor: f64,
        #[serde(default = "one")]
        n: usize,
    },
    MaxEntropy,
    Sinkhorn {
        #[serde(default = "sinkhorn_lambda")]
        lambda: f64,
        #[serde(default = "sinkhorn_tolerance")]
        tolerance: f64,
        #[serde(default)]
        threshold: f64,
        #[serde(default = "sinkhorn_iterations")]
        iterations: usize,
    },
}

impl Default for PropagationConfig {
    fn default() -> Self {
        PropagationConfig::Neighborhood { expansion_factor: 0.0 }
    }
}

impl PropagationConfig {
    /// The strategy this entry describes. Randomized strategies are seeded with
    /// `seed` when one is given.
    pub fn build(&self, seed: Option<u64>) -> Box<dyn PropagationStrategy> {
        match *self {
            PropagationConfig::Neighborhood { expansion_factor } => {
                Box::new(NeighborhoodPropagation::new(expansion_factor))
            }
            PropagationConfig::Capacity { expansion_factor, k } => Box::new(
                NeighborhoodPropagation::with_alternates(expansion_factor, Capacity::new(k)),
            ),
            PropagationConfig::IteratedCapacity {
                expansion_factor,
                iterations,
            } => {
                let alternates = match seed {
                    Some(seed) => IteratedCapacity::seeded(iterations, seed),
                    None => IteratedCapacity::new(iterations),
                };
                Box::new(NeighborhoodPropagation::with_alternates(expansion_factor, alternates))
            }
            PropagationConfig::Randomized { expansion_factor, n } => {
                let alternates = match seed {
                    Some(seed) => Randomized::seeded(n, seed),
                    None => Randomized::new(n),
                };
                Box::new(NeighborhoodPropagation::with_alternates(expansion_factor, alternates))
            }
            PropagationConfig::MaxEntropy => Box::new(MaxEntropyPropagation),
            PropagationConfig::Sinkhorn {
                lambda,
                tolerance,
                threshold,
                iterations,
            } => Box::new(SinkhornPropagation::new(lambda, tolerance, threshold, iterations)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum NeighborhoodConfig {
    Expand(ExpandNeighborhood),
    Refine(RefineNeighborhood),
    Potential(PotentialNeighborhood),
}

impl NeighborhoodConfig {
    pub fn build(&self) -> Box<dyn NeighborhoodStrategy> {
        match *self {
            NeighborhoodConfig::Expand(n) => Box::new(n),
            NeighborhoodConfig::Refine(n) => Box::new(n),
            NeighborhoodConfig::Potential(n) => Box::new(n),
        }
    }
}

/// Everything needed to set up a multiscale transport solve. Missing fields take
/// their default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub transport_type: TransportType,
    /// Cost per unit of mass created or destroyed
    pub mass_delta_cost: f64,
    /// Fraction of a node's mass its distribution columns may move
    pub lambda: f64,
    pub options: MultiscaleOptions,
    pub backend: Backend,
    pub driver: Driver,
    pub propagation: PropagationConfig,
    /// Used instead of `propagation` when a pair of levels has more than
    /// `max_neighborhood_size` nodes
    pub fallback: Option<PropagationConfig>,
    pub max_neighborhood_size: usize,
    pub neighborhoods: Vec<NeighborhoodConfig>,
    pub last_scale_neighborhood: Option<NeighborhoodConfig>,
    /// Parameters of the sinkhorn driver
    pub sinkhorn: SinkhornParameters,
    pub seed: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            transport_type: TransportType::Balanced,
            mass_delta_cost: 0.0,
            lambda: 1.0,
            options: MultiscaleOptions::default(),
            backend: Backend::default(),
            driver: Driver::default(),
            propagation: PropagationConfig::default(),
            fallback: None,
            max_neighborhood_size: 10_000_000,
            neighborhoods: Vec::new(),
            last_scale_neighborhood: None,
            sinkhorn: SinkhornParameters::default(),
            seed: None,
        }
    }
}

impl TransportConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn solver(&self) -> TransportLpSolver {
        TransportLpSolver::new(
            self.backend.build(),
            self.transport_type,
            self.mass_delta_cost,
            self.lambda,
        )
    }

    /// Sets up the configured driver
    pub fn build(&self) -> Result<Box<dyn MultiscaleTransport>> {
        let p = self.options.p;
        if !(p > 0.0) || !p.is_finite() {
            return Err(TransportError::InvalidExponent(p));
        }
        debug!("building {:?} transport: {:?}", self.driver, self);

        Ok(match self.driver {
            Driver::Sinkhorn => Box::new(MultiscaleSinkhornTransport::new(self.sinkhorn)),
            Driver::Lp => {
                let mut transport = MultiscaleTransportLp::new(self.solver(), self.propagation.build(self.seed));
                transport = match &self.fallback {
                    Some(fallback) => transport.with_fallback(fallback.build(self.seed), self.max_neighborhood_size),
                    None => transport.with_max_neighborhood_size(self.max_neighborhood_size),
                };
                for neighborhood in self.neighborhoods.iter() {
                    transport = transport.with_neighborhood(neighborhood.build());
                }
                if let Some(neighborhood) = &self.last_scale_neighborhood {
                    transport = transport.with_last_scale_neighborhood(neighborhood.build());
                }
                Box::new(transport)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::Hierarchy;
    use ndarray::array;

    #[test]
    fn empty_config_takes_defaults() {
        let config = TransportConfig::from_json("{}").unwrap();
        assert_eq!(config, TransportConfig::default());
        assert_eq!(config.options.p, 2.0);
        assert_eq!(config.propagation, PropagationConfig::Neighborhood { expansion_factor: 0.0 });
    }

    #[test]
    fn strategies_parse_with_partial_parameters() {
        let config = TransportConfig::from_json(
            r#"{
                "transport_type": "UNBALANCED_FREE",
                "options": { "p": 1.0, "source_scales": 3 },
                "propagation": { "strategy": "capacity", "k": 3 },
                "fallback": { "strategy": "max_entropy" },
                "neighborhoods": [
                    { "strategy": "expand", "iterations": 4 },
                    { "strategy": "potential", "threshold": 0.5, "sort": true }
                ],
                "last_scale_neighborhood": { "strategy": "refine" },
                "seed": 3
            }"#,
        )
        .unwrap();

        assert_eq!(config.transport_type, TransportType::UnbalancedFree);
        assert_eq!(config.options.source_scales, Some(3));
        assert_eq!(config.propagation, PropagationConfig::Capacity { expansion_factor: 0.0, k: 3 });
        assert_eq!(config.fallback, Some(PropagationConfig::MaxEntropy));
        match config.neighborhoods[..] {
            [NeighborhoodConfig::Expand(expand), NeighborhoodConfig::Potential(potential)] => {
                assert_eq!(expand.iterations, 4);
                assert_eq!(expand.n_add, 1_000_000);
                assert_eq!(potential.threshold, 0.5);
                assert!(potential.sort);
            }
            _ => panic!("unexpected neighborhoods {:?}", config.neighborhoods),
        }
        assert_eq!(
            config.last_scale_neighborhood,
            Some(NeighborhoodConfig::Refine(RefineNeighborhood::default()))
        );
    }

    #[test]
    fn invalid_exponent_is_rejected() {
        let mut config = TransportConfig::default();
        config.options.p = 0.0;
        assert!(matches!(config.build(), Err(TransportError::InvalidExponent(_))));
    }

    #[test]
    fn built_driver_solves() {
        let config = TransportConfig::from_json(
            r#"{ "neighborhoods": [{ "strategy": "refine", "expansion_factor": 2.0, "iterations": 3 }] }"#,
        )
        .unwrap();
        let mut transport = config.build().unwrap();
        let mut a = Hierarchy::from_points(&array![[0.0], [1.0], [4.0], [5.0]], None, None).unwrap();
        let mut b = Hierarchy::from_points(&array![[0.0], [1.0], [4.0], [5.0]], None, None).unwrap();
        let plans = transport.solve(&mut a, &mut b, &config.options).unwrap();
        assert!(plans.last().unwrap().cost.abs() < 1e-6);
    }

    #[test]
    fn configured_neighborhoods_run_in_sequence() {
        let config = TransportConfig::from_json(
            r#"{
                "neighborhoods": [
                    { "strategy": "expand", "expansion_factor": 1.0 },
                    { "strategy": "potential", "iterations": 20 }
                ]
            }"#,
        )
        .unwrap();
        let mut transport = config.build().unwrap();
        let points = array![[0.0], [1.0], [4.0], [5.0], [9.0], [11.0]];
        let mut a = Hierarchy::from_points(&points, None, None).unwrap();
        let mut b = Hierarchy::from_points(&(&points + 0.25), None, None).unwrap();
        let plans = transport.solve(&mut a, &mut b, &config.options).unwrap();

        let finest = plans.last().unwrap();
        assert!(finest.status.is_lp());
        for path in finest.positive() {
            assert_eq!(path.from, path.to);
        }
    }
}
