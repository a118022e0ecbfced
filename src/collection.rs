//!
//! Report collections and fix estimators
//!
//! A [`ReportCollection`] owns the bearing reports of one localization
//! problem and produces transmitter fixes from them: the pairwise fix-cut
//! average, the closed-form least squares fix, Stansfield's iterated
//! small-angle maximum likelihood estimate and the exact maximum likelihood
//! fix found by numerical minimization. The collection doubles as the
//! [`Objective`] surface the minimizer works on, caching value, gradient and
//! Hessian of the bearing cost at the current evaluation point.
//!
//! All estimator math runs in the Mercator working frame, with bearings in
//! the canonical convention (radians clockwise from North).
//!

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use crate::errors::{Error, Result};
use crate::log::trace;
use crate::math::wrap_residual;
use crate::minimize::{Minimizer, Objective};
use crate::point::ProjectedPoint;
use crate::report::Report;

/// Determinant threshold below which a 2x2 solve is treated as singular.
const SINGULAR_EPS: f64 = 1.0e-12;

/// Default tolerance on the change of the Stansfield offset norm, in grid
/// units (meters for the Mercator working frame).
pub const STANSFIELD_TOL: f64 = 1.0e-3;

/// Default iteration cap of the Stansfield refinement.
pub const STANSFIELD_MAX_ITER: usize = 50;

/// Gradient-norm tolerance of the maximum likelihood search.
const ML_GRAD_TOL: f64 = 1.0e-5;

/// Simplex value-spread tolerance of the aggressive first stage.
const SIMPLEX_TOL: f64 = 1.0e-4;

/// Confidence ellipse in inverse-square form.
///
/// `a_inv2` and `b_inv2` are `1/a^2` and `1/b^2` for the semi-axes `a`
/// (along the rotated X direction) and `b`; `rotation` is the rotation angle
/// of the ellipse in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorEllipse {
    pub a_inv2: f64,
    pub b_inv2: f64,
    pub rotation: f64,
}

impl ErrorEllipse {
    /// Semi-axis along the rotated X direction, grid units.
    pub fn semi_axis_a(&self) -> f64 {
        1.0 / self.a_inv2.sqrt()
    }

    /// Semi-axis along the rotated Y direction, grid units.
    pub fn semi_axis_b(&self) -> f64 {
        1.0 / self.b_inv2.sqrt()
    }
}

/// One Stansfield refinement step evaluated at the current estimate.
struct StansfieldStep {
    lambda: f64,
    mu: f64,
    nu: f64,
    dx: f64,
    dy: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct CostEval {
    value: f64,
    gradient: [f64; 2],
    hessian: [[f64; 2]; 2],
}

/// An ordered set of bearing reports plus the memoized cost surface over
/// them.
///
/// Insertion order defines report indices for the whole lifetime of the
/// collection. Reports inserted with [`add_report`](Self::add_report) are
/// owned by the collection; [`add_shared_report`](Self::add_shared_report)
/// lets the caller keep a handle. Collections are deliberately not clonable:
/// copying would alias the owned reports.
pub struct ReportCollection {
    reports: Vec<Rc<RefCell<Report>>>,
    evaluation_point: [f64; 2],
    function_value: f64,
    gradient: [f64; 2],
    hessian: [[f64; 2]; 2],
    f_valid: bool,
    g_valid: bool,
    h_valid: bool,
}

impl Default for ReportCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportCollection {
    pub fn new() -> Self {
        ReportCollection {
            reports: Vec::new(),
            evaluation_point: [0.0; 2],
            function_value: 0.0,
            gradient: [0.0; 2],
            hessian: [[0.0; 2]; 2],
            f_valid: false,
            g_valid: false,
            h_valid: false,
        }
    }

    // ----------------
    // Administration
    // ----------------

    /// Insert a report, transferring ownership; returns its index.
    pub fn add_report(&mut self, report: Report) -> usize {
        self.add_shared_report(Rc::new(RefCell::new(report)))
    }

    /// Insert a report the caller keeps a handle to; returns its index.
    ///
    /// A caller mutating the report through its own handle between
    /// evaluations must re-set the evaluation point to reprime the cost
    /// cache.
    pub fn add_shared_report(&mut self, report: Rc<RefCell<Report>>) -> usize {
        self.invalidate();
        self.reports.push(report);
        self.reports.len() - 1
    }

    /// Drop the collection's references to all reports. Reports inserted
    /// with [`add_shared_report`](Self::add_shared_report) survive through
    /// the caller's handles.
    pub fn delete_reports(&mut self) {
        self.invalidate();
        self.reports.clear();
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Number of reports currently marked valid.
    pub fn num_valid_reports(&self) -> usize {
        self.reports.iter().filter(|r| r.borrow().is_valid()).count()
    }

    /// Read-only view of report `i`; `None` out of range.
    pub fn report(&self, i: usize) -> Option<Ref<'_, Report>> {
        self.reports.get(i).map(|r| r.borrow())
    }

    /// Validity of report `i`; `false` out of range.
    pub fn is_valid(&self, i: usize) -> bool {
        self.reports.get(i).map_or(false, |r| r.borrow().is_valid())
    }

    /// Flip the validity of report `i`; no-op out of range.
    pub fn toggle_validity(&mut self, i: usize) {
        if let Some(r) = self.reports.get(i) {
            r.borrow_mut().toggle_validity();
            self.invalidate();
        }
    }

    /// Index of the first report with the given name.
    pub fn report_index(&self, name: &str) -> Option<usize> {
        self.reports.iter().position(|r| r.borrow().name() == name)
    }

    /// Index of the exact report behind `handle` (pointer identity).
    pub fn report_index_of(&self, handle: &Rc<RefCell<Report>>) -> Option<usize> {
        self.reports.iter().position(|r| Rc::ptr_eq(r, handle))
    }

    /// Mercator XY of receiver `i`; `None` out of range.
    pub fn receiver_xy(&self, i: usize) -> Option<[f64; 2]> {
        self.reports.get(i).map(|r| r.borrow().receiver_xy())
    }

    fn invalidate(&mut self) {
        self.f_valid = false;
        self.g_valid = false;
        self.h_valid = false;
    }

    fn valid_reports(&self) -> impl Iterator<Item = Ref<'_, Report>> + '_ {
        self.reports.iter().map(|r| r.borrow()).filter(|r| r.is_valid())
    }

    fn require_two_valid(&self) -> Result<()> {
        if self.num_valid_reports() < 2 {
            return Err(Error::InsufficientReports);
        }
        Ok(())
    }

    // ----------------
    // Estimators
    // ----------------

    /// Fix cut average: the mean of the pairwise bearing-line intersections.
    ///
    /// Pairs whose lines cross at less than `min_angle_deg` (or are parallel
    /// outright) contribute nothing. Returns `Ok(None)` and leaves `fix`
    /// untouched when no pair qualifies; otherwise writes the mean into
    /// `fix` and returns the component-wise sample standard deviation of the
    /// intersections, in grid units.
    pub fn fix_cut_average(
        &self,
        fix: &mut ProjectedPoint,
        min_angle_deg: f64,
    ) -> Result<Option<[f64; 2]>> {
        self.require_two_valid()?;

        let reports: Vec<Ref<'_, Report>> = self.valid_reports().collect();
        let min_sin = min_angle_deg.to_radians().sin().max(SINGULAR_EPS);

        let mut cuts: Vec<[f64; 2]> = Vec::new();
        for i in 0..reports.len() {
            let (s1, c1) = reports[i].sin_cos_true_north();
            let p1 = reports[i].receiver_xy();
            for j in (i + 1)..reports.len() {
                let (s2, c2) = reports[j].sin_cos_true_north();
                let p2 = reports[j].receiver_xy();
                // Rays p + t (sin, cos); det = sin(theta2 - theta1)
                let det = s2 * c1 - c2 * s1;
                if det.abs() < min_sin {
                    continue;
                }
                let rx = p2[0] - p1[0];
                let ry = p2[1] - p1[1];
                let t1 = (s2 * ry - c2 * rx) / det;
                cuts.push([p1[0] + t1 * s1, p1[1] + t1 * c1]);
            }
        }

        if cuts.is_empty() {
            return Ok(None);
        }

        let n = cuts.len() as f64;
        let mut mean = [0.0; 2];
        for cut in &cuts {
            mean[0] += cut[0];
            mean[1] += cut[1];
        }
        mean[0] /= n;
        mean[1] /= n;

        let mut stddev = [0.0; 2];
        if cuts.len() > 1 {
            for cut in &cuts {
                stddev[0] += (cut[0] - mean[0]).powi(2);
                stddev[1] += (cut[1] - mean[1]).powi(2);
            }
            stddev[0] = (stddev[0] / (n - 1.0)).sqrt();
            stddev[1] = (stddev[1] / (n - 1.0)).sqrt();
        }

        fix.set_xy(mean);
        Ok(Some(stddev))
    }

    /// Least squares fix: the point minimizing the summed squared
    /// perpendicular distances to all bearing lines, via the closed-form
    /// 2x2 normal equations.
    pub fn ls_fix(&self, fix: &mut ProjectedPoint) -> Result<()> {
        let xy = self.ls_xy()?;
        fix.set_xy(xy);
        Ok(())
    }

    fn ls_xy(&self) -> Result<[f64; 2]> {
        self.require_two_valid()?;

        // Row i of A is (cos t, -sin t), the unit normal of bearing line i;
        // b_i projects the receiver position onto that normal.
        let (mut ata00, mut ata01, mut ata11) = (0.0, 0.0, 0.0);
        let (mut atb0, mut atb1) = (0.0, 0.0);
        for r in self.valid_reports() {
            let (s, c) = r.sin_cos_true_north();
            let [x, y] = r.receiver_xy();
            let b = c * x - s * y;
            ata00 += c * c;
            ata01 -= c * s;
            ata11 += s * s;
            atb0 += c * b;
            atb1 -= s * b;
        }
        // By Cauchy-Schwarz det <= ata00 * ata11, with equality exactly when
        // all bearing lines are parallel; the relative test keeps the
        // threshold meaningful at any report count.
        let det = ata00 * ata11 - ata01 * ata01;
        if det <= SINGULAR_EPS * ata00 * ata11 {
            return Err(Error::SingularSystem);
        }
        Ok([
            (ata11 * atb0 - ata01 * atb1) / det,
            (ata00 * atb1 - ata01 * atb0) / det,
        ])
    }

    /// Stansfield fix with the default stopping rule
    /// ([`STANSFIELD_TOL`], [`STANSFIELD_MAX_ITER`]).
    pub fn stansfield_fix(&self, fix: &mut ProjectedPoint) -> Result<ErrorEllipse> {
        self.stansfield_fix_with(fix, STANSFIELD_TOL, STANSFIELD_MAX_ITER)
    }

    /// Stansfield fix: iterated closed-form maximum likelihood under the
    /// small-angular-error approximation, started from the least squares
    /// fix.
    ///
    /// Each pass solves the weighted normal equations with the
    /// receiver-to-estimate distances of the previous pass; iteration stops
    /// when the norm of the offset changes by less than `tol` grid units
    /// between passes, or after `max_iter` passes. Returns the confidence
    /// ellipse accumulated at the final estimate.
    pub fn stansfield_fix_with(
        &self,
        fix: &mut ProjectedPoint,
        tol: f64,
        max_iter: usize,
    ) -> Result<ErrorEllipse> {
        let mut est = self.ls_xy()?;
        let mut last_norm = f64::INFINITY;

        for _pass in 0..max_iter {
            let step = self.stansfield_step(est)?;
            est[0] += step.dx;
            est[1] += step.dy;
            let offset = (step.dx * step.dx + step.dy * step.dy).sqrt();
            trace!("stansfield pass {}: offset {:e}", _pass, offset);
            if (offset - last_norm).abs() < tol {
                break;
            }
            last_norm = offset;
        }

        // Moments of the final estimate define the ellipse.
        let step = self.stansfield_step(est)?;
        let ellipse = ellipse_from_moments(step.lambda, step.mu, step.nu);
        fix.set_xy(est);
        Ok(ellipse)
    }

    /// One Stansfield pass at `est`: moments and offset in Stansfield's
    /// angle convention (counter-clockwise from East, theta' = pi/2 - theta,
    /// so sin theta' = cos theta and vice versa).
    fn stansfield_step(&self, est: [f64; 2]) -> Result<StansfieldStep> {
        let (mut lambda, mut mu, mut nu) = (0.0, 0.0, 0.0);
        for r in self.valid_reports() {
            let [rx, ry] = r.receiver_xy();
            let dx = est[0] - rx;
            let dy = est[1] - ry;
            let dist2 = dx * dx + dy * dy;
            let w = 1.0 / (dist2 * r.sigma() * r.sigma());
            let (sin_t, cos_t) = r.sin_cos_true_north();
            let (sp, cp) = (cos_t, sin_t);
            lambda += w * sp * sp;
            mu += w * cp * cp;
            nu += w * sp * cp;
        }
        // denom <= lambda * mu always; equality means parallel bearings.
        let denom = lambda * mu - nu * nu;
        if denom <= SINGULAR_EPS * lambda * mu {
            return Err(Error::SingularSystem);
        }

        let (mut dx_sum, mut dy_sum) = (0.0, 0.0);
        for r in self.valid_reports() {
            let [rx, ry] = r.receiver_xy();
            let dx = est[0] - rx;
            let dy = est[1] - ry;
            let dist2 = dx * dx + dy * dy;
            let w = 1.0 / (dist2 * r.sigma() * r.sigma());
            let (sin_t, cos_t) = r.sin_cos_true_north();
            let (sp, cp) = (cos_t, sin_t);
            // Signed perpendicular offset of the estimate from bearing line
            // i, with the sign matching q = p + dx*sin - dy*cos so that the
            // solved offset walks toward the weighted minimum.
            let p = sp * dx - cp * dy;
            dx_sum += p * w * (nu * cp - mu * sp);
            dy_sum += p * w * (lambda * cp - nu * sp);
        }

        Ok(StansfieldStep {
            lambda,
            mu,
            nu,
            dx: dx_sum / denom,
            dy: dy_sum / denom,
        })
    }

    /// Maximum likelihood fix: conjugate-gradient minimization of the
    /// bearing cost, started from the least squares fix.
    pub fn ml_fix(&mut self, fix: &mut ProjectedPoint) -> Result<()> {
        let mut x = self.ls_xy()?.to_vec();
        let mut minimizer = Minimizer::new(self);
        minimizer.conjugate_gradient(&mut x, ML_GRAD_TOL)?;
        fix.set_xy([x[0], x[1]]);
        Ok(())
    }

    /// Maximum likelihood fix for stubborn geometries: a Nelder-Mead sweep
    /// refines the least squares seed before conjugate gradients polish it.
    ///
    /// The simplex starts at the LS fix with two vertices offset by 10% of
    /// the fix magnitude (at least one grid unit), wide enough to step over
    /// the flat plateaus that break a plain gradient descent.
    pub fn aggressive_ml_fix(&mut self, fix: &mut ProjectedPoint) -> Result<()> {
        let start = self.ls_xy()?;
        let h = (0.1 * (start[0] * start[0] + start[1] * start[1]).sqrt()).max(1.0);
        let mut simplex = vec![
            start.to_vec(),
            vec![start[0] + h, start[1]],
            vec![start[0], start[1] + h],
        ];

        let mut minimizer = Minimizer::new(self);
        minimizer.nelder_mead(&mut simplex, SIMPLEX_TOL)?;
        let mut x = simplex[0].clone();
        minimizer.conjugate_gradient(&mut x, ML_GRAD_TOL)?;
        fix.set_xy([x[0], x[1]]);
        Ok(())
    }

    /// Cramer-Rao bound at `ml_fix`: the confidence ellipse of an unbiased
    /// maximum likelihood estimator, from the Fisher information matrix of
    /// the bearing cost.
    pub fn cramer_rao_bounds(&self, ml_fix: &ProjectedPoint) -> Result<ErrorEllipse> {
        self.require_two_valid()?;
        let [xe, ye] = ml_fix.xy()?;
        let (mut lambda, mut mu, mut nu) = (0.0, 0.0, 0.0);
        for r in self.valid_reports() {
            let [xi, yi] = r.receiver_xy();
            let dx = xe - xi;
            let dy = ye - yi;
            let r2 = dx * dx + dy * dy;
            let w = 1.0 / (r.sigma() * r.sigma() * r2 * r2);
            lambda += w * dy * dy;
            mu += w * dx * dx;
            nu += w * dx * dy;
        }
        Ok(ellipse_from_moments(lambda, mu, nu))
    }

    // ----------------
    // Bearing cost
    // ----------------

    /// Cost of the transmitter sitting at `p`: the summed squared angular
    /// residuals weighted by report variance. Residuals are wrapped into
    /// `(-pi, pi]` so the surface stays smooth across the branch cut.
    fn compute_value(&self, p: [f64; 2]) -> f64 {
        let [x, y] = p;
        let mut value = 0.0;
        for r in self.valid_reports() {
            let [xi, yi] = r.receiver_xy();
            let inv_sigma2 = 1.0 / (r.sigma() * r.sigma());
            let theta = (x - xi).atan2(y - yi);
            let delta = wrap_residual(r.bearing_true_north() - theta);
            value += 0.5 * delta * delta * inv_sigma2;
        }
        value
    }

    fn compute_value_gradient(&self, p: [f64; 2]) -> (f64, [f64; 2]) {
        let [x, y] = p;
        let mut value = 0.0;
        let mut gradient = [0.0; 2];
        for r in self.valid_reports() {
            let [xi, yi] = r.receiver_xy();
            let dx = x - xi;
            let dy = y - yi;
            let r2 = dx * dx + dy * dy;
            let inv_sigma2 = 1.0 / (r.sigma() * r.sigma());
            let theta = dx.atan2(dy);
            let delta = wrap_residual(r.bearing_true_north() - theta);
            value += 0.5 * delta * delta * inv_sigma2;
            gradient[0] -= delta * inv_sigma2 * dy / r2;
            gradient[1] += delta * inv_sigma2 * dx / r2;
        }
        (value, gradient)
    }

    fn compute_value_gradient_hessian(&self, p: [f64; 2]) -> CostEval {
        let [x, y] = p;
        let mut out = CostEval::default();
        for r in self.valid_reports() {
            let [xi, yi] = r.receiver_xy();
            let dx = x - xi;
            let dy = y - yi;
            let r2 = dx * dx + dy * dy;
            let inv_sigma2 = 1.0 / (r.sigma() * r.sigma());
            let theta = dx.atan2(dy);
            let delta = wrap_residual(r.bearing_true_north() - theta);
            out.value += 0.5 * delta * delta * inv_sigma2;
            let gs = inv_sigma2 / r2;
            out.gradient[0] -= delta * gs * dy;
            out.gradient[1] += delta * gs * dx;
            let hs = inv_sigma2 / (r2 * r2);
            out.hessian[0][0] += hs * (dy * dy + 2.0 * delta * dx * dy);
            out.hessian[1][1] += hs * (dx * dx - 2.0 * delta * dx * dy);
            let mixed = hs * (delta * (dy * dy - dx * dx) - dx * dy);
            out.hessian[0][1] += mixed;
            out.hessian[1][0] += mixed;
        }
        out
    }
}

fn ellipse_from_moments(lambda: f64, mu: f64, nu: f64) -> ErrorEllipse {
    let phi = 0.5 * (-2.0 * nu).atan2(lambda - mu);
    let tan_phi = phi.tan();
    ErrorEllipse {
        a_inv2: lambda - nu * tan_phi,
        b_inv2: mu + nu * tan_phi,
        rotation: phi,
    }
}

impl Objective for ReportCollection {
    fn dim(&self) -> usize {
        2
    }

    fn set_evaluation_point(&mut self, point: &[f64]) {
        self.evaluation_point = [point[0], point[1]];
        self.invalidate();
    }

    fn value(&mut self) -> f64 {
        if !self.f_valid {
            self.function_value = self.compute_value(self.evaluation_point);
            self.f_valid = true;
        }
        self.function_value
    }

    fn value_and_gradient(&mut self, gradient: &mut [f64]) -> f64 {
        if !self.g_valid {
            let (f, g) = self.compute_value_gradient(self.evaluation_point);
            self.function_value = f;
            self.gradient = g;
            self.f_valid = true;
            self.g_valid = true;
        }
        gradient.copy_from_slice(&self.gradient);
        self.function_value
    }

    fn value_gradient_hessian(&mut self, gradient: &mut [f64], hessian: &mut [Vec<f64>]) -> f64 {
        if !self.h_valid {
            let eval = self.compute_value_gradient_hessian(self.evaluation_point);
            self.function_value = eval.value;
            self.gradient = eval.gradient;
            self.hessian = eval.hessian;
            self.f_valid = true;
            self.g_valid = true;
            self.h_valid = true;
        }
        gradient.copy_from_slice(&self.gradient);
        for (row, cached) in hessian.iter_mut().zip(&self.hessian) {
            row.copy_from_slice(cached);
        }
        self.function_value
    }
}
