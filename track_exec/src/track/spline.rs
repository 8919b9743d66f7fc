//! # Periodic smoothing splines
//!
//! A periodic cubic smoothing spline `f` through values `y_i` at knots `u_i` minimises
//!
//! ```text
//! sum_i (y_i - f(u_i))^2 + lambda * integral f''(u)^2 du
//! ```
//!
//! over one period. Following the Reinsch formulation the spline is described by its values `g`
//! and second derivatives `gamma` at the knots, which satisfy
//!
//! ```text
//! (R + lambda Q^T Q) gamma = Q^T y,    g = y - lambda Q gamma
//! ```
//!
//! where `Q` and `R` are cyclic banded matrices built from the knot spacings. `R + lambda Q^T Q`
//! is symmetric positive definite and cyclic pentadiagonal, so it is factorised with an envelope
//! Cholesky decomposition which keeps the cost linear in the number of knots.
//!
//! The smoothing parameter `lambda` is not exposed directly. Instead a smoothing factor `s` gives
//! the budget for the total squared residual of the fit, and `lambda` is searched for until the
//! residual matches that budget.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;
use nalgebra::Vector2;

use util::maths::rem_euclid;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Bounds on the smoothing parameter search. Beyond the upper bound `R` is lost in the round-off
/// of `lambda Q^T Q` and the factorisation breaks down.
const MIN_LAMBDA: f64 = 1e-12;
const MAX_LAMBDA: f64 = 1e10;

/// Maximum number of bisection steps in the smoothing parameter search.
const MAX_SEARCH_ITERS: usize = 100;

/// Relative tolerance on the residual budget at which the search stops.
const RESIDUAL_REL_TOL: f64 = 1e-6;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A periodic cubic spline in one variable.
#[derive(Debug, Clone)]
pub struct PeriodicSpline {
    /// Knot positions, strictly increasing, starting at zero
    knots: Vec<f64>,

    /// Period of the spline, greater than the last knot
    period: f64,

    /// Value of the spline at each knot
    values: Vec<f64>,

    /// Second derivative of the spline at each knot
    second_derivs: Vec<f64>,
}

/// A closed planar curve made of one periodic spline per coordinate.
#[derive(Debug, Clone)]
pub struct PeriodicCurve {
    x: PeriodicSpline,
    y: PeriodicSpline,

    /// Total squared residual of the fit over both coordinates
    residual: f64,
}

/// A symmetric positive definite matrix stored by its lower envelope.
///
/// Row `i` holds columns `first[i]..=i`.
struct EnvelopeMatrix {
    first: Vec<usize>,
    rows: Vec<Vec<f64>>,
}

/// Knot spacing and the stencils of `Q` and `R` derived from it.
struct Knots {
    /// `h[i] = u[i + 1] - u[i]`, with `h[n - 1]` wrapping round the period
    h: Vec<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SplineError {
    #[error("A periodic cubic spline needs at least 4 knots, found {0}")]
    TooFewKnots(usize),

    #[error("Expected one value per knot ({0} knots, {1} values)")]
    LengthMismatch(usize, usize),

    #[error("Knots must be strictly increasing and lie within the period")]
    InvalidKnots,

    #[error("The smoothing factor must be finite and non-negative, found {0}")]
    InvalidSmoothing(f64),

    #[error("The spline system is not positive definite")]
    NotPositiveDefinite,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PeriodicSpline {
    /// Evaluate the spline at the parameter `t`, which is wrapped into the period.
    pub fn eval(&self, t: f64) -> f64 {
        let n = self.knots.len();
        let t = rem_euclid(t, self.period);

        // Index of the interval containing t
        let j = self.knots.partition_point(|&u| u <= t).saturating_sub(1);
        let j_next = (j + 1) % n;

        let u_j = self.knots[j];
        let u_next = if j + 1 == n {
            self.period
        } else {
            self.knots[j + 1]
        };
        let h = u_next - u_j;

        let a = t - u_j;
        let b = u_next - t;

        (a * self.values[j_next] + b * self.values[j]) / h
            - a * b / 6.0
                * ((1.0 + a / h) * self.second_derivs[j_next]
                    + (1.0 + b / h) * self.second_derivs[j])
    }

    /// Period of the spline.
    pub fn period(&self) -> f64 {
        self.period
    }
}

impl PeriodicCurve {
    /// Fit a closed curve through the points.
    ///
    /// The points are parameterised by cumulative chord length, with the closing chord running
    /// from the last point back to the first. The fit's total squared residual over both
    /// coordinates matches `smoothing`, or is as close to it as the smoothing parameter bounds
    /// allow. A smoothing of zero interpolates the points.
    pub fn fit(points: &[Vector2<f64>], smoothing: f64) -> Result<Self, SplineError> {
        if !smoothing.is_finite() || smoothing < 0.0 {
            return Err(SplineError::InvalidSmoothing(smoothing));
        }

        let n = points.len();
        if n < 4 {
            return Err(SplineError::TooFewKnots(n));
        }

        // Cumulative chord length parameterisation
        let mut knots = Vec::with_capacity(n);
        let mut acc = 0.0;
        knots.push(acc);
        for i in 1..n {
            acc += (points[i] - points[i - 1]).norm();
            knots.push(acc);
        }
        let period = acc + (points[0] - points[n - 1]).norm();

        let xs: Vec<f64> = points.iter().map(|p| p[0]).collect();
        let ys: Vec<f64> = points.iter().map(|p| p[1]).collect();

        let spacing = Knots::new(&knots, period)?;

        let fit_at = |lambda: f64| -> Result<(Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>, f64), SplineError> {
            let (gx, cx, rx) = spacing.smooth(&xs, lambda)?;
            let (gy, cy, ry) = spacing.smooth(&ys, lambda)?;
            Ok((gx, cx, gy, cy, rx + ry))
        };

        let lambda = if smoothing == 0.0 {
            0.0
        } else {
            search_lambda(smoothing, |lambda| fit_at(lambda).map(|f| f.4))?
        };

        let (gx, cx, gy, cy, residual) = fit_at(lambda)?;
        trace!(
            "Periodic curve fit: {} knots, period {:.3}, lambda {:.3e}, residual {:.4}",
            n,
            period,
            lambda,
            residual
        );

        Ok(Self {
            x: PeriodicSpline {
                knots: knots.clone(),
                period,
                values: gx,
                second_derivs: cx,
            },
            y: PeriodicSpline {
                knots,
                period,
                values: gy,
                second_derivs: cy,
            },
            residual,
        })
    }

    /// Evaluate the curve at the parameter `t`.
    pub fn eval(&self, t: f64) -> Vector2<f64> {
        Vector2::new(self.x.eval(t), self.y.eval(t))
    }

    /// Period of the curve parameter.
    pub fn period(&self) -> f64 {
        self.x.period()
    }

    /// Total squared residual of the fit.
    pub fn residual(&self) -> f64 {
        self.residual
    }

    /// Sample the curve at `num_samples` equally spaced parameter values over one period.
    ///
    /// The end of the period is excluded since it coincides with the start.
    pub fn sample(&self, num_samples: usize) -> Vec<Vector2<f64>> {
        let step = self.period() / num_samples as f64;
        (0..num_samples).map(|k| self.eval(k as f64 * step)).collect()
    }
}

impl Knots {
    fn new(knots: &[f64], period: f64) -> Result<Self, SplineError> {
        let n = knots.len();
        let mut h = Vec::with_capacity(n);

        for i in 0..n {
            let next = if i + 1 == n { period } else { knots[i + 1] };
            let hi = next - knots[i];
            if !(hi > 0.0) || !hi.is_finite() {
                return Err(SplineError::InvalidKnots);
            }
            h.push(hi);
        }

        Ok(Self { h })
    }

    fn len(&self) -> usize {
        self.h.len()
    }

    fn h(&self, i: isize) -> f64 {
        self.h[self.wrap(i)]
    }

    fn wrap(&self, i: isize) -> usize {
        i.rem_euclid(self.len() as isize) as usize
    }

    /// Row `i` of `Q` as (column, value) pairs. `Q` is symmetric in the periodic case.
    fn q_row(&self, i: usize) -> [(usize, f64); 3] {
        let ii = i as isize;
        let inv_prev = 1.0 / self.h(ii - 1);
        let inv_curr = 1.0 / self.h(ii);
        [
            (self.wrap(ii - 1), inv_prev),
            (i, -(inv_prev + inv_curr)),
            (self.wrap(ii + 1), inv_curr),
        ]
    }

    /// Row `i` of `R` as (column, value) pairs.
    fn r_row(&self, i: usize) -> [(usize, f64); 3] {
        let ii = i as isize;
        let h_prev = self.h(ii - 1);
        let h_curr = self.h(ii);
        [
            (self.wrap(ii - 1), h_prev / 6.0),
            (i, (h_prev + h_curr) / 3.0),
            (self.wrap(ii + 1), h_curr / 6.0),
        ]
    }

    /// Multiply a vector by `Q`.
    fn apply_q(&self, v: &[f64]) -> Vec<f64> {
        (0..self.len())
            .map(|i| self.q_row(i).iter().map(|&(j, q)| q * v[j]).sum())
            .collect()
    }

    /// Build `R + lambda Q^T Q` in envelope form.
    fn system(&self, lambda: f64) -> EnvelopeMatrix {
        let n = self.len();

        // Lower triangle entries, stencils that wrap onto the same column accumulate
        let mut entries: Vec<(usize, usize, f64)> = Vec::with_capacity(n * 12);
        for i in 0..n {
            for &(j, r) in self.r_row(i).iter() {
                if j <= i {
                    entries.push((i, j, r));
                }
            }
            for &(k, q_ik) in self.q_row(i).iter() {
                for &(j, q_kj) in self.q_row(k).iter() {
                    if j <= i {
                        entries.push((i, j, lambda * q_ik * q_kj));
                    }
                }
            }
        }

        let mut first: Vec<usize> = (0..n).collect();
        for &(i, j, _) in entries.iter() {
            first[i] = first[i].min(j);
        }

        let mut rows: Vec<Vec<f64>> = (0..n).map(|i| vec![0.0; i - first[i] + 1]).collect();
        for (i, j, v) in entries {
            rows[i][j - first[i]] += v;
        }

        EnvelopeMatrix { first, rows }
    }

    /// Smooth the values `y` with the given smoothing parameter.
    ///
    /// Returns the fitted values, the second derivatives at the knots and the squared residual.
    fn smooth(
        &self,
        y: &[f64],
        lambda: f64,
    ) -> Result<(Vec<f64>, Vec<f64>, f64), SplineError> {
        if y.len() != self.len() {
            return Err(SplineError::LengthMismatch(self.len(), y.len()));
        }

        let mut system = self.system(lambda);
        system.cholesky()?;

        // Q is symmetric so Q^T y = Q y
        let rhs = self.apply_q(y);
        let gamma = system.solve(&rhs);

        let q_gamma = self.apply_q(&gamma);
        let values: Vec<f64> = y
            .iter()
            .zip(q_gamma.iter())
            .map(|(yi, qg)| yi - lambda * qg)
            .collect();

        let residual = q_gamma.iter().map(|qg| (lambda * qg).powi(2)).sum();

        Ok((values, gamma, residual))
    }
}

impl EnvelopeMatrix {
    fn get(&self, i: usize, j: usize) -> f64 {
        self.rows[i][j - self.first[i]]
    }

    /// Replace the matrix with its lower Cholesky factor `L`, such that `A = L L^T`.
    fn cholesky(&mut self) -> Result<(), SplineError> {
        let n = self.rows.len();

        for i in 0..n {
            let fi = self.first[i];

            for j in fi..i {
                let k0 = fi.max(self.first[j]);
                let mut s = self.get(i, j);
                for k in k0..j {
                    s -= self.get(i, k) * self.get(j, k);
                }
                let l_jj = self.get(j, j);
                self.rows[i][j - fi] = s / l_jj;
            }

            let mut d = self.get(i, i);
            for k in fi..i {
                d -= self.get(i, k).powi(2);
            }
            if !(d > 0.0) {
                return Err(SplineError::NotPositiveDefinite);
            }
            self.rows[i][i - fi] = d.sqrt();
        }

        Ok(())
    }

    /// Solve `L L^T x = b` using the factor computed by `cholesky`.
    fn solve(&self, b: &[f64]) -> Vec<f64> {
        let n = self.rows.len();

        // Forward substitution, L z = b
        let mut x = b.to_vec();
        for i in 0..n {
            let mut s = x[i];
            for k in self.first[i]..i {
                s -= self.get(i, k) * x[k];
            }
            x[i] = s / self.get(i, i);
        }

        // Back substitution, L^T x = z
        for i in (0..n).rev() {
            x[i] /= self.get(i, i);
            let xi = x[i];
            for k in self.first[i]..i {
                x[k] -= self.get(i, k) * xi;
            }
        }

        x
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Find the smoothing parameter whose residual matches the budget.
///
/// The residual grows monotonically with lambda, so a log-space bisection converges. If the
/// budget lies outside what the lambda bounds can reach the nearest bound is returned.
fn search_lambda<F>(budget: f64, residual: F) -> Result<f64, SplineError>
where
    F: Fn(f64) -> Result<f64, SplineError>,
{
    if residual(MAX_LAMBDA)? <= budget {
        return Ok(MAX_LAMBDA);
    }
    if residual(MIN_LAMBDA)? >= budget {
        return Ok(MIN_LAMBDA);
    }

    let mut lo = MIN_LAMBDA.ln();
    let mut hi = MAX_LAMBDA.ln();

    for _ in 0..MAX_SEARCH_ITERS {
        let mid = 0.5 * (lo + hi);
        let r = residual(mid.exp())?;

        if ((r - budget) / budget).abs() < RESIDUAL_REL_TOL {
            return Ok(mid.exp());
        }

        if r < budget {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    Ok((0.5 * (lo + hi)).exp())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
