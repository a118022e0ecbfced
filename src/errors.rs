//!
//! Crate errors
//!

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to initialize projection: {0}")]
    ProjectionInit(#[source] proj4rs::errors::Error),
    #[error("Coordinate transform failed: {0}")]
    ProjectionTransform(#[source] proj4rs::errors::Error),
    #[error("At least two valid reports are required")]
    InsufficientReports,
    #[error("Singular or ill-conditioned normal equations")]
    SingularSystem,
    #[error("Could not bracket a minimum along the search direction")]
    BracketFailure,
    #[error("Minimization diverged")]
    MinimizationDivergence,
}

pub type Result<T> = std::result::Result<T, Error>;
