//! Natural B-spline interpolation.
//!
//! The beam preparation stage fits every intensity curve with an
//! interpolating B-spline before resampling it (and its first derivative)
//! onto the uniform output grid. Knots are the sample abscissae themselves
//! with `degree + 1` boundary repetitions; the collocation system is
//! augmented with natural boundary rows (vanishing second derivative, plus
//! the third for quintic splines) so the curve stays tame at the support
//! edges where LEED data is noisiest.
//!
//! Basis values come from the FITPACK evaluator `fpbspl`; the square
//! collocation system is solved with an LU factorization.

use nalgebra::{DMatrix, DVector};
use rusty_fitpack::fpbspl::fpbspl;

use super::errors::{GridError, SplineError};
use super::grid::GRID_TOL;
use super::RfError;

enum End {
    Lower,
    Upper,
}

/// Interpolating spline with natural boundary conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct NaturalSpline {
    knots: Vec<f64>,
    coefs: Vec<f64>,
    degree: usize,
    // first-derivative spline of degree - 1, from the standard
    // coefficient differencing
    deriv_knots: Vec<f64>,
    deriv_coefs: Vec<f64>,
}

impl NaturalSpline {
    /// Fit an interpolating natural spline through `(x, y)`.
    ///
    /// Requires `degree` in {3, 5}, at least `2*degree + 1` samples and a
    /// strictly increasing `x`.
    pub fn fit(x: &[f64], y: &[f64], degree: usize) -> Result<Self, RfError> {
        if degree != 3 && degree != 5 {
            return Err(SplineError::UnsupportedDegree { degree }.into());
        }
        if x.len() != y.len() {
            return Err(GridError::LengthMismatch {
                x_len: x.len(),
                y_len: y.len(),
            }
            .into());
        }

        let n = x.len();
        let min_samples = 2 * degree + 1;
        if n < min_samples {
            return Err(GridError::TooFewSamples {
                min: min_samples,
                actual: n,
            }
            .into());
        }
        if let Some(i) = x.windows(2).position(|p| p[1] <= p[0]) {
            return Err(GridError::NotIncreasing { index: i + 1 }.into());
        }

        let k = degree;
        let mut knots = Vec::with_capacity(n + 2 * k);
        knots.extend(std::iter::repeat(x[0]).take(k + 1));
        knots.extend_from_slice(&x[1..n - 1]);
        knots.extend(std::iter::repeat(x[n - 1]).take(k + 1));

        // one coefficient per sample plus k - 1 boundary conditions
        let nt = knots.len() - k - 1;
        let n_bc = (k - 1) / 2;

        let mut a = DMatrix::<f64>::zeros(nt, nt);
        let mut rhs = DVector::<f64>::zeros(nt);

        for i in 0..n_bc {
            for (j, w) in boundary_row(&knots, k, nt, i + 2, End::Lower) {
                a[(i, j)] = w;
            }
            for (j, w) in boundary_row(&knots, k, nt, i + 2, End::Upper) {
                a[(n_bc + n + i, j)] = w;
            }
        }

        let mut l = k + 1;
        for (i, &xi) in x.iter().enumerate() {
            l = locate(&knots, k, nt, xi, l);
            let h = fpbspl(xi, &knots, k, l);
            for j in 0..=k {
                a[(n_bc + i, l - k - 1 + j)] = h[j];
            }
            rhs[n_bc + i] = y[i];
        }

        let sol = a
            .lu()
            .solve(&rhs)
            .ok_or(SplineError::Singular { n, degree: k })?;
        if sol.iter().any(|c| !c.is_finite()) {
            return Err(SplineError::Singular { n, degree: k }.into());
        }

        let coefs: Vec<f64> = sol.iter().copied().collect();
        let deriv_coefs = diff_coefs(&coefs, &knots, k);
        let deriv_knots = knots[1..knots.len() - 1].to_vec();

        Ok(NaturalSpline {
            knots,
            coefs,
            degree: k,
            deriv_knots,
            deriv_coefs,
        })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Left end of the supported evaluation range.
    pub fn x_lo(&self) -> f64 {
        self.knots[self.degree]
    }

    /// Right end of the supported evaluation range (inclusive).
    pub fn x_hi(&self) -> f64 {
        self.knots[self.knots.len() - self.degree - 1]
    }

    /// Evaluate the spline on a non-decreasing set of points inside the
    /// fitted range.
    pub fn evaluate(&self, xt: &[f64]) -> Result<Vec<f64>, RfError> {
        eval_spline(&self.knots, &self.coefs, self.degree, xt, self.x_lo(), self.x_hi())
    }

    /// Evaluate the first derivative on a non-decreasing set of points
    /// inside the fitted range.
    pub fn derivative(&self, xt: &[f64]) -> Result<Vec<f64>, RfError> {
        eval_spline(
            &self.deriv_knots,
            &self.deriv_coefs,
            self.degree - 1,
            xt,
            self.x_lo(),
            self.x_hi(),
        )
    }
}

/// Interval search with an ascending cache: returns 1-based `l` with
/// `t[l-1] <= x < t[l]`, keeping the right endpoint in the last interval.
fn locate(t: &[f64], k: usize, nt: usize, x: f64, mut l: usize) -> usize {
    let mut l1 = l + 1;
    while x < t[l - 1] && l1 != k + 2 {
        l1 = l;
        l -= 1;
    }
    while l != nt && x >= t[l1 - 1] {
        l = l1;
        l1 += 1;
    }
    l
}

/// One step of B-spline coefficient differencing: coefficients of the
/// derivative spline of degree `k - 1` over the inner knot vector.
fn diff_coefs(c: &[f64], t: &[f64], k: usize) -> Vec<f64> {
    (0..c.len() - 1)
        .map(|j| {
            let span = t[j + k + 1] - t[j + 1];
            if span > 0.0 {
                k as f64 * (c[j + 1] - c[j]) / span
            } else {
                0.0
            }
        })
        .collect()
}

/// Weights of the collocation row enforcing `S^(order)` = 0 at one end.
///
/// With full boundary knot multiplicity the `order`-th derivative at the
/// endpoint reduces to a single coefficient of the `order`-times differenced
/// spline, so the row weights are obtained by differencing unit coefficient
/// vectors.
fn boundary_row(t: &[f64], k: usize, nt: usize, order: usize, end: End) -> Vec<(usize, f64)> {
    let indices: Vec<usize> = match end {
        End::Lower => (0..=order).collect(),
        End::Upper => (nt - 1 - order..nt).collect(),
    };

    indices
        .into_iter()
        .map(|j| {
            let mut c = vec![0.0; nt];
            c[j] = 1.0;
            let mut t_cur = t.to_vec();
            let mut k_cur = k;
            for _ in 0..order {
                c = diff_coefs(&c, &t_cur, k_cur);
                t_cur = t_cur[1..t_cur.len() - 1].to_vec();
                k_cur -= 1;
            }
            let w = match end {
                End::Lower => c[0],
                End::Upper => *c.last().unwrap(),
            };
            (j, w)
        })
        .filter(|(_, w)| *w != 0.0)
        .collect()
}

fn eval_spline(
    t: &Vec<f64>,
    c: &[f64],
    k: usize,
    xt: &[f64],
    lo: f64,
    hi: f64,
) -> Result<Vec<f64>, RfError> {
    if let Some(i) = xt.windows(2).position(|p| p[1] < p[0]) {
        return Err(GridError::NotIncreasing { index: i + 1 }.into());
    }

    let tol = GRID_TOL * (hi - lo);
    let nt = t.len() - k - 1;
    let mut l = k + 1;
    let mut out = Vec::with_capacity(xt.len());

    for &x in xt {
        if x < lo - tol || x > hi + tol {
            return Err(GridError::OutOfRange { x, lo, hi }.into());
        }
        let x = x.clamp(lo, hi);

        l = locate(t, k, nt, x, l);
        let h = fpbspl(x, t, k, l);
        let mut s = 0.0;
        for j in 0..=k {
            s += c[l - k - 1 + j] * h[j];
        }
        out.push(s);
    }

    Ok(out)
}
