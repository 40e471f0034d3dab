use thiserror::Error;

/// Errors surfaced to the caller. Solver-level irregularities are never
/// reported through this type, they are logged and absorbed by the refinement loops.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("hierarchy has no levels")]
    EmptyHierarchy,
    #[error("level {scale} has no nodes")]
    EmptyLevel { scale: usize },
    #[error("total mass must be positive, got {0}")]
    ZeroMass(f64),
    #[error("negative or non-finite mass {mass} at point {index}")]
    InvalidMass { index: usize, mass: f64 },
    #[error("transport exponent must be positive and finite, got {0}")]
    InvalidExponent(f64),
    #[error("dimension mismatch: expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("cost matrix is {rows} x {cols} for {sources} source and {targets} target masses")]
    CostShapeMismatch {
        rows: usize,
        cols: usize,
        sources: usize,
        targets: usize,
    },
    #[error("{points} points but {masses} masses")]
    MassCountMismatch { points: usize, masses: usize },
    #[error("invalid hierarchy: {0}")]
    InvalidHierarchy(String),
    #[error("malformed coupling line {line}: {content:?}")]
    MalformedCoupling { line: usize, content: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
