pub mod config;
pub mod coupling;
pub mod error;
pub mod hierarchy;
pub mod lp;
pub mod multiscale;
pub mod neighborhood;
pub mod plan;
pub mod propagation;
#[cfg(feature = "python")]
pub mod python;
pub mod sinkhorn;

pub use config::TransportConfig;
pub use coupling::Coupling;
pub use error::{Result, TransportError};
pub use hierarchy::{Hierarchy, Level, PointSet};
pub use multiscale::{MultiscaleOptions, MultiscaleTransport};
pub use plan::{TransportPlan, TransportPlanSolutions};
