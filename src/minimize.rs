//!
//! Generic minimization over an abstract cost surface
//!
//! [`Objective`] decouples the numerical methods from the bearing math: any
//! surface exposing value / gradient / Hessian at a settable evaluation point
//! can be minimized, which keeps the routines testable on quadratic bowls and
//! Rosenbrock without a single report in sight.
//!

use crate::errors::{Error, Result};
use crate::log::trace;

/// An N-dimensional cost surface.
///
/// Implementors are expected to memoize: repeated queries at the same
/// evaluation point must not recompute.
pub trait Objective {
    /// Number of coordinates of an evaluation point.
    fn dim(&self) -> usize;

    /// Move the evaluation point; invalidates any cached quantities.
    fn set_evaluation_point(&mut self, point: &[f64]);

    /// Cost at the evaluation point.
    fn value(&mut self) -> f64;

    /// Cost at the evaluation point; fills `gradient` (length [`Self::dim`]).
    fn value_and_gradient(&mut self, gradient: &mut [f64]) -> f64;

    /// Cost at the evaluation point; fills `gradient` and the square
    /// `hessian` (rows of length [`Self::dim`]).
    fn value_gradient_hessian(&mut self, gradient: &mut [f64], hessian: &mut [Vec<f64>]) -> f64;
}

// Golden section / expansion ratios
const GOLD: f64 = 1.618034;
const CGOLD: f64 = 0.381_966_0;
const ZEPS: f64 = 1.0e-10;

const MAX_BRACKET_STEPS: usize = 50;
const BRENT_MAX_ITER: usize = 100;
const LINE_TOL: f64 = 1.0e-4;
const CG_MAX_ITER: usize = 200;
const SIMPLEX_MAX_ITER: usize = 1000;

// Nelder-Mead coefficients
const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// A bracketing triple `a < b < c` (or reversed) with `f(b) < f(a), f(c)`.
struct Bracket {
    a: f64,
    b: f64,
    c: f64,
    fb: f64,
}

/// Minimization routines over a borrowed [`Objective`].
pub struct Minimizer<'a, G: Objective + ?Sized> {
    group: &'a mut G,
}

impl<'a, G: Objective + ?Sized> Minimizer<'a, G> {
    pub fn new(group: &'a mut G) -> Self {
        Minimizer { group }
    }

    /// f(base + t * dir)
    fn eval_at(&mut self, t: f64, base: &[f64], dir: &[f64], scratch: &mut [f64]) -> f64 {
        for (s, (b, d)) in scratch.iter_mut().zip(base.iter().zip(dir)) {
            *s = b + t * d;
        }
        self.group.set_evaluation_point(scratch);
        self.group.value()
    }

    /// Golden-section expansion from the unit step until a minimum is
    /// bracketed. Runs away on surfaces that keep descending.
    fn bracket(&mut self, base: &[f64], dir: &[f64], scratch: &mut [f64]) -> Result<Bracket> {
        let mut a = 0.0;
        let mut b = 1.0;
        let mut fa = self.eval_at(a, base, dir, scratch);
        let mut fb = self.eval_at(b, base, dir, scratch);
        if fb > fa {
            std::mem::swap(&mut a, &mut b);
            std::mem::swap(&mut fa, &mut fb);
        }
        let mut c = b + GOLD * (b - a);
        let mut fc = self.eval_at(c, base, dir, scratch);
        let mut steps = 0;
        while fb >= fc {
            steps += 1;
            if steps > MAX_BRACKET_STEPS {
                return Err(Error::BracketFailure);
            }
            a = b;
            b = c;
            fb = fc;
            c = b + GOLD * (b - a);
            fc = self.eval_at(c, base, dir, scratch);
        }
        Ok(Bracket { a, b, c, fb })
    }

    /// Brent minimization inside a bracketing triple: parabolic interpolation
    /// where it behaves, golden section where it does not.
    fn brent(
        &mut self,
        br: Bracket,
        tol: f64,
        base: &[f64],
        dir: &[f64],
        scratch: &mut [f64],
    ) -> (f64, f64) {
        let mut a = br.a.min(br.c);
        let mut b = br.a.max(br.c);
        let (mut x, mut w, mut v) = (br.b, br.b, br.b);
        let (mut fx, mut fw, mut fv) = (br.fb, br.fb, br.fb);
        let mut d: f64 = 0.0;
        let mut e: f64 = 0.0;

        for _ in 0..BRENT_MAX_ITER {
            let xm = 0.5 * (a + b);
            let tol1 = tol * x.abs() + ZEPS;
            let tol2 = 2.0 * tol1;
            if (x - xm).abs() <= tol2 - 0.5 * (b - a) {
                return (x, fx);
            }
            if e.abs() > tol1 {
                // Parabola through x, v, w
                let r = (x - w) * (fx - fv);
                let mut q = (x - v) * (fx - fw);
                let mut p = (x - v) * q - (x - w) * r;
                q = 2.0 * (q - r);
                if q > 0.0 {
                    p = -p;
                }
                q = q.abs();
                let etemp = e;
                e = d;
                if p.abs() >= (0.5 * q * etemp).abs() || p <= q * (a - x) || p >= q * (b - x) {
                    e = if x >= xm { a - x } else { b - x };
                    d = CGOLD * e;
                } else {
                    d = p / q;
                    let u = x + d;
                    if u - a < tol2 || b - u < tol2 {
                        d = tol1 * (xm - x).signum();
                    }
                }
            } else {
                e = if x >= xm { a - x } else { b - x };
                d = CGOLD * e;
            }
            let u = if d.abs() >= tol1 {
                x + d
            } else {
                x + tol1 * d.signum()
            };
            let fu = self.eval_at(u, base, dir, scratch);
            if fu <= fx {
                if u >= x {
                    a = x;
                } else {
                    b = x;
                }
                (v, fv) = (w, fw);
                (w, fw) = (x, fx);
                (x, fx) = (u, fu);
            } else {
                if u < x {
                    a = u;
                } else {
                    b = u;
                }
                if fu <= fw || w == x {
                    (v, fv) = (w, fw);
                    (w, fw) = (u, fu);
                } else if fu <= fv || v == x || v == w {
                    (v, fv) = (u, fu);
                }
            }
        }
        // Iteration cap: x is still the best point seen.
        (x, fx)
    }

    /// Minimize along `dir` from `base`; returns the parameter of the
    /// minimum and the value there.
    pub fn line_search(&mut self, base: &[f64], dir: &[f64]) -> Result<(f64, f64)> {
        let mut scratch = vec![0.0; base.len()];
        let bracket = self.bracket(base, dir, &mut scratch)?;
        Ok(self.brent(bracket, LINE_TOL, base, dir, &mut scratch))
    }

    /// Polak-Ribiere conjugate gradients from `x`.
    ///
    /// Terminates when the gradient norm drops below `grad_tol` or the
    /// function value stops changing to machine precision. The minimizer is
    /// written back into `x`; returns the final value and the iteration
    /// count. Line searches that run away (no minimum in the descent
    /// direction) surface [`Error::MinimizationDivergence`].
    pub fn conjugate_gradient(&mut self, x: &mut [f64], grad_tol: f64) -> Result<(f64, usize)> {
        let n = x.len();
        let mut g = vec![0.0; n];
        let mut g_new = vec![0.0; n];
        let mut dir = vec![0.0; n];

        self.group.set_evaluation_point(x);
        let mut f = self.group.value_and_gradient(&mut g);
        for (d, gi) in dir.iter_mut().zip(&g) {
            *d = -gi;
        }

        for iter in 0..CG_MAX_ITER {
            if norm(&g) < grad_tol {
                return Ok((f, iter));
            }

            let (t, _) = match self.line_search(x, &dir) {
                Err(Error::BracketFailure) => return Err(Error::MinimizationDivergence),
                other => other?,
            };
            for (xi, di) in x.iter_mut().zip(&dir) {
                *xi += t * di;
            }

            self.group.set_evaluation_point(x);
            let f_next = self.group.value_and_gradient(&mut g_new);
            trace!("cg iteration {}: f = {:e}", iter, f_next);

            let flat = 2.0 * (f - f_next).abs()
                <= 2.0 * f64::EPSILON * (f.abs() + f_next.abs() + ZEPS);
            f = f_next;
            if flat {
                return Ok((f, iter + 1));
            }

            let gg: f64 = g.iter().map(|v| v * v).sum();
            if gg == 0.0 {
                return Ok((f, iter + 1));
            }
            // Periodic restart keeps the directions conjugate in spirit.
            let beta = if (iter + 1) % n == 0 {
                0.0
            } else {
                let num: f64 = g_new.iter().zip(&g).map(|(gn, go)| gn * (gn - go)).sum();
                (num / gg).max(0.0)
            };
            for (d, gn) in dir.iter_mut().zip(&g_new) {
                *d = beta * *d - gn;
            }
            g.copy_from_slice(&g_new);
        }
        Err(Error::MinimizationDivergence)
    }

    /// Nelder-Mead downhill simplex.
    ///
    /// `simplex` holds `dim() + 1` vertices. Terminates when the spread of
    /// function values over the simplex falls below `ftol`; the vertices are
    /// then reordered so the best one comes first and its value is returned
    /// with the iteration count. Exceeding the iteration cap surfaces
    /// [`Error::MinimizationDivergence`].
    pub fn nelder_mead(
        &mut self,
        simplex: &mut [Vec<f64>],
        ftol: f64,
    ) -> Result<(f64, usize)> {
        let n = self.group.dim();
        assert_eq!(simplex.len(), n + 1, "simplex needs dim + 1 vertices");

        let mut fvals = Vec::with_capacity(n + 1);
        for v in simplex.iter() {
            self.group.set_evaluation_point(v);
            fvals.push(self.group.value());
        }

        let mut iters = 0;
        loop {
            let mut lo = 0;
            let mut hi = 0;
            for (i, f) in fvals.iter().enumerate() {
                if *f < fvals[lo] {
                    lo = i;
                }
                if *f > fvals[hi] {
                    hi = i;
                }
            }

            if fvals[hi] - fvals[lo] < ftol {
                simplex.swap(0, lo);
                fvals.swap(0, lo);
                return Ok((fvals[0], iters));
            }
            if iters >= SIMPLEX_MAX_ITER {
                return Err(Error::MinimizationDivergence);
            }
            iters += 1;

            let mut nhi = lo;
            for (i, f) in fvals.iter().enumerate() {
                if i != hi && *f > fvals[nhi] {
                    nhi = i;
                }
            }

            // Centroid of the face opposite the worst vertex
            let mut centroid = vec![0.0; n];
            for (i, v) in simplex.iter().enumerate() {
                if i == hi {
                    continue;
                }
                for (c, vi) in centroid.iter_mut().zip(v) {
                    *c += vi;
                }
            }
            for c in centroid.iter_mut() {
                *c /= n as f64;
            }

            let reflected: Vec<f64> = centroid
                .iter()
                .zip(&simplex[hi])
                .map(|(c, w)| c + REFLECT * (c - w))
                .collect();
            self.group.set_evaluation_point(&reflected);
            let fr = self.group.value();

            if fr < fvals[lo] {
                let expanded: Vec<f64> = centroid
                    .iter()
                    .zip(&simplex[hi])
                    .map(|(c, w)| c + EXPAND * (c - w))
                    .collect();
                self.group.set_evaluation_point(&expanded);
                let fe = self.group.value();
                if fe < fr {
                    simplex[hi] = expanded;
                    fvals[hi] = fe;
                } else {
                    simplex[hi] = reflected;
                    fvals[hi] = fr;
                }
            } else if fr < fvals[nhi] {
                simplex[hi] = reflected;
                fvals[hi] = fr;
            } else {
                // Contract toward the better of worst vertex and reflection
                let (anchor, f_anchor) = if fr < fvals[hi] {
                    (&reflected, fr)
                } else {
                    (&simplex[hi], fvals[hi])
                };
                let contracted: Vec<f64> = centroid
                    .iter()
                    .zip(anchor)
                    .map(|(c, w)| c + CONTRACT * (w - c))
                    .collect();
                self.group.set_evaluation_point(&contracted);
                let fc = self.group.value();
                if fc < f_anchor {
                    simplex[hi] = contracted;
                    fvals[hi] = fc;
                } else {
                    // Everything failed: shrink the simplex onto the best vertex
                    for i in 0..simplex.len() {
                        if i == lo {
                            continue;
                        }
                        let shrunk: Vec<f64> = simplex[lo]
                            .iter()
                            .zip(&simplex[i])
                            .map(|(b, v)| b + SHRINK * (v - b))
                            .collect();
                        self.group.set_evaluation_point(&shrunk);
                        fvals[i] = self.group.value();
                        simplex[i] = shrunk;
                    }
                }
            }
        }
    }
}
