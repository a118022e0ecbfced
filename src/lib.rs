//!
//! Bearings-only target localization
//!
//! A collection of receiver stations each report a measured bearing to an
//! unknown transmitter, with an angular standard deviation. This crate
//! estimates the transmitter position from such reports and qualifies the
//! estimate with a confidence region:
//!
//! * **Fix cut average**: the mean of the pairwise bearing-line
//!   intersections,
//! * **Least squares**: the closed-form fix minimizing perpendicular
//!   distances to the bearing lines,
//! * **Stansfield**: the iterated closed-form maximum likelihood fix under
//!   the small-angular-error approximation, with its error ellipse,
//! * **Maximum likelihood**: numerical minimization of the exact angular
//!   residual cost, by conjugate gradients, optionally preceded by a
//!   Nelder-Mead sweep for stubborn geometries, with the Cramer-Rao bound
//!   as error ellipse.
//!
//! All numerics run on a Mercator/WGS84 plane in meters; receiver locations
//! may be supplied in any proj-style coordinate system and are reprojected
//! lazily through [`point::ProjectedPoint`].
//!

pub mod collection;
pub mod errors;
mod math;
pub mod minimize;
pub mod point;
pub mod report;

// Reexport
pub use collection::{ErrorEllipse, ReportCollection};
pub use errors::{Error, Result};
pub use minimize::{Minimizer, Objective};
pub use point::ProjectedPoint;
pub use report::{BearingConvention, Report};

// log for logging (optional).
#[cfg(feature = "logging")]
use log;

#[cfg(not(feature = "logging"))]
mod log {
    // Use __XXX__ to prevent 'ambiguous name' error
    // when exporting
    macro_rules! __trace__    ( ($($tt:tt)*) => {{}} );
    macro_rules! __debug__    ( ($($tt:tt)*) => {{}} );
    macro_rules! __error__    ( ($($tt:tt)*) => {{}} );
    macro_rules! __info__     ( ($($tt:tt)*) => {{}} );
    macro_rules! __warn__     ( ($($tt:tt)*) => {{}} );

    #[allow(unused_imports)]
    pub(crate) use {
        __debug__ as debug, __error__ as error, __info__ as info, __trace__ as trace,
        __warn__ as warn,
    };
}
