//!
//! Bearing reports
//!
//! A report is one receiver's observation: where the receiver sits, the
//! bearing it measured to the unknown transmitter and the standard deviation
//! of that measurement. Two flavors exist, differing only in the angle
//! convention of the measured bearing; all downstream math runs in the
//! canonical convention (radians clockwise from North) and converts at this
//! boundary.
//!

use std::f64::consts::FRAC_PI_2;

use crate::errors::Result;
use crate::math::normalize_bearing;
use crate::point::ProjectedPoint;

/// Angle convention a measured bearing is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearingConvention {
    /// Geographic bearing, clockwise from North.
    NorthClockwise,
    /// Grid bearing in the user plane, counter-clockwise from East.
    EastCounterClockwise,
}

/// One receiver's bearing observation.
#[derive(Debug)]
pub struct Report {
    name: String,
    valid: bool,
    /// Radians in `[0, 2*pi)`, in `convention`.
    bearing: f64,
    /// Radians, > 0.
    sigma: f64,
    sin_bearing: f64,
    cos_bearing: f64,
    convention: BearingConvention,
    location: ProjectedPoint,
    /// Receiver location materialized in the Mercator working frame. The
    /// location never changes after construction, so this cannot go stale.
    receiver_xy: [f64; 2],
}

impl Report {
    /// Report from a receiver at `(lon, lat)` in decimal degrees on WGS84,
    /// with a geographic bearing (clockwise from North). Bearing and standard
    /// deviation in degrees.
    pub fn latlon(
        location: [f64; 2],
        bearing_deg: f64,
        sigma_deg: f64,
        name: impl Into<String>,
    ) -> Result<Self> {
        Self::build(
            ProjectedPoint::latlon(location)?,
            bearing_deg,
            sigma_deg,
            name.into(),
            BearingConvention::NorthClockwise,
        )
    }

    /// Report from a receiver in an arbitrary user projection (`key=value`
    /// proj tokens), with a grid bearing in that plane (counter-clockwise
    /// from East). Bearing and standard deviation in degrees.
    pub fn planar(
        location: [f64; 2],
        bearing_deg: f64,
        sigma_deg: f64,
        name: impl Into<String>,
        proj_tokens: &[&str],
    ) -> Result<Self> {
        Self::build(
            ProjectedPoint::new(location, proj_tokens)?,
            bearing_deg,
            sigma_deg,
            name.into(),
            BearingConvention::EastCounterClockwise,
        )
    }

    fn build(
        location: ProjectedPoint,
        bearing_deg: f64,
        sigma_deg: f64,
        name: String,
        convention: BearingConvention,
    ) -> Result<Self> {
        debug_assert!(sigma_deg > 0.);
        let receiver_xy = location.xy()?;
        let bearing = normalize_bearing(bearing_deg.to_radians());
        let (sin_bearing, cos_bearing) = bearing.sin_cos();
        Ok(Report {
            name,
            valid: true,
            bearing,
            sigma: sigma_deg.to_radians(),
            sin_bearing,
            cos_bearing,
            convention,
            location,
            receiver_xy,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn convention(&self) -> BearingConvention {
        self.convention
    }

    /// Measured bearing, radians in `[0, 2*pi)`, in this report's convention.
    pub fn bearing(&self) -> f64 {
        self.bearing
    }

    /// Replace the measured bearing (radians, any value; normalized into
    /// `[0, 2*pi)`).
    pub fn set_bearing(&mut self, bearing: f64) {
        self.bearing = normalize_bearing(bearing);
        (self.sin_bearing, self.cos_bearing) = self.bearing.sin_cos();
    }

    /// Standard deviation of the measured bearing, radians.
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn toggle_validity(&mut self) {
        self.valid = !self.valid;
    }

    /// Receiver location in the Mercator working frame, meters.
    pub fn receiver_xy(&self) -> [f64; 2] {
        self.receiver_xy
    }

    /// The receiver's point, for callers wanting its user-frame coordinates.
    pub fn receiver_location(&self) -> &ProjectedPoint {
        &self.location
    }

    /// Bearing from the receiver to `xy` (Mercator, meters) in this report's
    /// native convention, radians in `(-pi, pi]`.
    pub fn bearing_to(&self, xy: [f64; 2]) -> f64 {
        let dx = xy[0] - self.receiver_xy[0];
        let dy = xy[1] - self.receiver_xy[1];
        match self.convention {
            BearingConvention::NorthClockwise => dx.atan2(dy),
            BearingConvention::EastCounterClockwise => dy.atan2(dx),
        }
    }

    /// Measured bearing converted to the canonical convention: radians
    /// clockwise from North, in `[0, 2*pi)`.
    pub fn bearing_true_north(&self) -> f64 {
        match self.convention {
            BearingConvention::NorthClockwise => self.bearing,
            BearingConvention::EastCounterClockwise => normalize_bearing(FRAC_PI_2 - self.bearing),
        }
    }

    /// `(sin, cos)` of the canonical bearing, derived from the cached pair.
    pub fn sin_cos_true_north(&self) -> (f64, f64) {
        match self.convention {
            BearingConvention::NorthClockwise => (self.sin_bearing, self.cos_bearing),
            // sin(pi/2 - b) = cos b, cos(pi/2 - b) = sin b
            BearingConvention::EastCounterClockwise => (self.cos_bearing, self.sin_bearing),
        }
    }
}
