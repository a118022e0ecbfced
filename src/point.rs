//!
//! Dual-representation points
//!
//! A [`ProjectedPoint`] holds the same location in two frames at once: the
//! caller's coordinate system (any proj definition) and the internal working
//! frame, a Mercator projection on WGS84 in meters. Writes mark one side
//! fresh; reads of the other side reproject lazily, so a point that is only
//! ever read in one frame never pays for the other.
//!

use std::cell::Cell;

use proj4rs::transform::transform;
use proj4rs::Proj;

use crate::errors::{Error, Result};

/// Proj definition of the internal working frame.
const MERCATOR_DEF: &str = "+proj=merc +datum=WGS84 +lat_ts=0";

/// Proj definition of the WGS84 geographic frame used by [`ProjectedPoint::latlon`].
const LATLON_DEF: &str = "+proj=latlong +datum=WGS84";

/// Join `key=value` tokens into a proj string, tolerating a leading `+`.
fn projstring(tokens: &[&str]) -> String {
    tokens
        .iter()
        .map(|t| format!("+{}", t.trim_start_matches('+')))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A 2-D location carried in both the user frame and Mercator XY.
///
/// At most one representation is "dirty" (fresh, not yet propagated); the
/// other is recomputed on demand through the owned projection handles. If the
/// user projection is geographic, user coordinates are exchanged in decimal
/// degrees ordered (lon, lat); projected user frames pass through unscaled.
#[derive(Debug)]
pub struct ProjectedPoint {
    user: Cell<[f64; 2]>,
    merc: Cell<[f64; 2]>,
    user_dirty: Cell<bool>,
    merc_dirty: Cell<bool>,
    user_proj: Proj,
    merc_proj: Proj,
    user_def: String,
}

impl ProjectedPoint {
    /// Point from user coordinates and a user projection given as `key=value`
    /// proj tokens, e.g. `["proj=utm", "zone=13", "datum=WGS84"]`.
    pub fn new(user_coords: [f64; 2], proj_tokens: &[&str]) -> Result<Self> {
        Self::from_definition(user_coords, &projstring(proj_tokens))
    }

    /// Point in the WGS84 geographic frame, `(lon, lat)` in decimal degrees.
    pub fn latlon(coords: [f64; 2]) -> Result<Self> {
        Self::from_definition(coords, LATLON_DEF)
    }

    fn from_definition(user_coords: [f64; 2], user_def: &str) -> Result<Self> {
        let user_proj = Proj::from_proj_string(user_def).map_err(Error::ProjectionInit)?;
        let merc_proj = Proj::from_proj_string(MERCATOR_DEF).map_err(Error::ProjectionInit)?;
        Ok(ProjectedPoint {
            user: Cell::new(user_coords),
            merc: Cell::new([0., 0.]),
            user_dirty: Cell::new(true),
            merc_dirty: Cell::new(false),
            user_proj,
            merc_proj,
            user_def: user_def.to_string(),
        })
    }

    /// Store user coordinates; the Mercator side becomes stale.
    pub fn set_user_coords(&mut self, coords: [f64; 2]) {
        self.user.set(coords);
        self.user_dirty.set(true);
        self.merc_dirty.set(false);
    }

    /// Store Mercator XY in meters; the user side becomes stale.
    pub fn set_xy(&mut self, xy: [f64; 2]) {
        self.merc.set(xy);
        self.merc_dirty.set(true);
        self.user_dirty.set(false);
    }

    /// User coordinates, reprojecting from Mercator if they are stale.
    pub fn user_coords(&self) -> Result<[f64; 2]> {
        if self.merc_dirty.get() {
            self.merc_to_user()?;
        }
        Ok(self.user.get())
    }

    /// Mercator XY in meters, reprojecting from the user frame if stale.
    pub fn xy(&self) -> Result<[f64; 2]> {
        if self.user_dirty.get() {
            self.user_to_merc()?;
        }
        Ok(self.merc.get())
    }

    /// Install a new user projection.
    ///
    /// Fresh user coordinates are pushed through the outgoing projection
    /// first, then the Mercator side is marked fresh, so the next user-side
    /// read yields coordinates in the new system. On failure the point is
    /// left with its previous projection.
    pub fn set_user_projection(&mut self, proj_tokens: &[&str]) -> Result<()> {
        if self.user_dirty.get() {
            self.user_to_merc()?;
        }
        let user_def = projstring(proj_tokens);
        self.user_proj = Proj::from_proj_string(&user_def).map_err(Error::ProjectionInit)?;
        self.user_def = user_def;
        self.merc_dirty.set(true);
        self.user_dirty.set(false);
        Ok(())
    }

    /// True if the user projection is geographic (lat/long).
    pub fn is_user_latlong(&self) -> bool {
        self.user_proj.is_latlong()
    }

    /// Normalized proj string of the user projection.
    pub fn user_definition(&self) -> &str {
        &self.user_def
    }

    /// Independent copy.
    ///
    /// Both projection handles are re-created from their textual definitions,
    /// never shared, so either point may be dropped without affecting the
    /// other. Coordinates and dirty flags are copied as-is.
    pub fn try_clone(&self) -> Result<Self> {
        let user_proj = Proj::from_proj_string(&self.user_def).map_err(Error::ProjectionInit)?;
        let merc_proj = Proj::from_proj_string(MERCATOR_DEF).map_err(Error::ProjectionInit)?;
        Ok(ProjectedPoint {
            user: self.user.clone(),
            merc: self.merc.clone(),
            user_dirty: self.user_dirty.clone(),
            merc_dirty: self.merc_dirty.clone(),
            user_proj,
            merc_proj,
            user_def: self.user_def.clone(),
        })
    }

    fn user_to_merc(&self) -> Result<()> {
        let [u, v] = self.user.get();
        let mut pt = if self.user_proj.is_latlong() {
            (u.to_radians(), v.to_radians(), 0.)
        } else {
            (u, v, 0.)
        };
        transform(&self.user_proj, &self.merc_proj, &mut pt)
            .map_err(Error::ProjectionTransform)?;
        self.merc.set([pt.0, pt.1]);
        self.user_dirty.set(false);
        Ok(())
    }

    fn merc_to_user(&self) -> Result<()> {
        let [x, y] = self.merc.get();
        let mut pt = (x, y, 0.);
        transform(&self.merc_proj, &self.user_proj, &mut pt)
            .map_err(Error::ProjectionTransform)?;
        let user = if self.user_proj.is_latlong() {
            [pt.0.to_degrees(), pt.1.to_degrees()]
        } else {
            [pt.0, pt.1]
        };
        self.user.set(user);
        self.merc_dirty.set(false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const UTM13: &[&str] = &["proj=utm", "zone=13", "datum=WGS84"];

    #[test]
    fn latlong_roundtrip() {
        let mut p = ProjectedPoint::latlon([-105.0, 35.0]).unwrap();
        p.set_user_coords([-105.0, 35.0]);
        let xy = p.xy().unwrap();
        let back = p.user_coords().unwrap();
        assert_abs_diff_eq!(back[0], -105.0, epsilon = 1e-9);
        assert_abs_diff_eq!(back[1], 35.0, epsilon = 1e-9);

        // Through the inverse: feed the XY to a second point.
        let mut q = ProjectedPoint::latlon([0., 0.]).unwrap();
        q.set_xy(xy);
        let ll = q.user_coords().unwrap();
        assert_abs_diff_eq!(ll[0], -105.0, epsilon = 1e-9);
        assert_abs_diff_eq!(ll[1], 35.0, epsilon = 1e-9);
    }

    #[test]
    fn projected_roundtrip() {
        let mut p = ProjectedPoint::new([500000.0, 3873000.0], UTM13).unwrap();
        let xy = p.xy().unwrap();
        p.set_xy(xy);
        let user = p.user_coords().unwrap();
        assert_abs_diff_eq!(user[0], 500000.0, epsilon = 1e-5);
        assert_abs_diff_eq!(user[1], 3873000.0, epsilon = 1e-5);
    }

    #[test]
    fn dirty_discipline() {
        let mut p = ProjectedPoint::latlon([-105.0, 35.0]).unwrap();
        let xy = p.xy().unwrap();

        // A write on the XY side must win over the stored user coords.
        let moved = [xy[0] + 1000.0, xy[1] - 500.0];
        p.set_xy(moved);
        let user = p.user_coords().unwrap();
        let mut q = ProjectedPoint::latlon(user).unwrap();
        let roundtrip = q.xy().unwrap();
        assert_abs_diff_eq!(roundtrip[0], moved[0], epsilon = 1e-5);
        assert_abs_diff_eq!(roundtrip[1], moved[1], epsilon = 1e-5);

        // And a subsequent user-side write must win back.
        q.set_user_coords([-104.0, 34.0]);
        let xy2 = q.xy().unwrap();
        let r = ProjectedPoint::latlon([-104.0, 34.0]).unwrap();
        let expected = r.xy().unwrap();
        assert_abs_diff_eq!(xy2[0], expected[0], epsilon = 1e-6);
        assert_abs_diff_eq!(xy2[1], expected[1], epsilon = 1e-6);
    }

    #[test]
    fn switch_user_projection() {
        let mut p = ProjectedPoint::latlon([-105.0, 35.0]).unwrap();
        assert!(p.is_user_latlong());
        let xy = p.xy().unwrap();

        p.set_user_projection(UTM13).unwrap();
        assert!(!p.is_user_latlong());
        // Location is unchanged; only its user representation moved.
        let xy2 = p.xy().unwrap();
        assert_abs_diff_eq!(xy2[0], xy[0], epsilon = 1e-6);
        assert_abs_diff_eq!(xy2[1], xy[1], epsilon = 1e-6);

        let utm = p.user_coords().unwrap();
        let q = ProjectedPoint::new(utm, UTM13).unwrap();
        let xy3 = q.xy().unwrap();
        assert_abs_diff_eq!(xy3[0], xy[0], epsilon = 1e-5);
        assert_abs_diff_eq!(xy3[1], xy[1], epsilon = 1e-5);
    }

    #[test]
    fn switch_projection_keeps_fresh_user_coords() {
        // User side fresh at the moment of the switch: the old projection
        // must be applied before it is replaced.
        let mut p = ProjectedPoint::latlon([0., 0.]).unwrap();
        p.set_user_coords([-105.0, 35.0]);
        p.set_user_projection(UTM13).unwrap();

        let reference = ProjectedPoint::latlon([-105.0, 35.0]).unwrap();
        let expected = reference.xy().unwrap();
        let xy = p.xy().unwrap();
        assert_abs_diff_eq!(xy[0], expected[0], epsilon = 1e-9);
        assert_abs_diff_eq!(xy[1], expected[1], epsilon = 1e-9);
    }

    #[test]
    fn clone_is_independent() {
        let mut p = ProjectedPoint::latlon([-105.0, 35.0]).unwrap();
        let xy = p.xy().unwrap();
        let q = p.try_clone().unwrap();
        assert_eq!(q.user_definition(), p.user_definition());

        p.set_user_coords([10.0, 10.0]);
        drop(p);

        let xy2 = q.xy().unwrap();
        assert_abs_diff_eq!(xy2[0], xy[0], epsilon = 1e-9);
        assert_abs_diff_eq!(xy2[1], xy[1], epsilon = 1e-9);
    }

    #[test]
    fn bad_projection_tokens() {
        let r = ProjectedPoint::new([0., 0.], &["proj=merc", "ellps=not_an_ellipsoid"]);
        assert!(matches!(r, Err(Error::ProjectionInit(_))));
    }
}
