//! Least-squares parabola for the V0r search.

use polyfit_rs::polyfit_rs;
use serde::{Deserialize, Serialize};

use super::errors::V0rError;

/// Coefficients of `y = a x^2 + b x + c`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parabola {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Parabola {
    /// Weighted least-squares fit; samples with zero weight are ignored.
    ///
    /// Needs at least three distinct abscissae among the selected samples.
    pub fn fit(x: &[f64], y: &[f64], w: &[f64]) -> Result<Self, V0rError> {
        let (xs, ys): (Vec<f64>, Vec<f64>) = x
            .iter()
            .zip(y.iter())
            .zip(w.iter())
            .filter(|(_, &wi)| wi > 0.0)
            .map(|((&xi, &yi), _)| (xi, yi))
            .unzip();

        let mut distinct = xs.clone();
        distinct.sort_by(|a, b| a.partial_cmp(b).unwrap());
        distinct.dedup();
        if distinct.len() < 3 {
            return Err(V0rError::SingularParabola {
                reason: format!("{} distinct abscissae, need 3", distinct.len()),
            });
        }

        let coefs = polyfit_rs::polyfit(&xs, &ys, 2).map_err(|e| V0rError::SingularParabola {
            reason: e.to_string(),
        })?;

        let parabola = Parabola {
            a: coefs[2],
            b: coefs[1],
            c: coefs[0],
        };
        if !parabola.a.is_finite() || !parabola.b.is_finite() || !parabola.c.is_finite() {
            return Err(V0rError::SingularParabola {
                reason: "non-finite coefficients".to_string(),
            });
        }

        Ok(parabola)
    }

    pub fn value(&self, x: f64) -> f64 {
        (self.a * x + self.b) * x + self.c
    }

    pub fn curvature(&self) -> f64 {
        2.0 * self.a
    }

    /// Abscissa of the extremum, `-b / 2a`.
    pub fn minimum_x(&self) -> f64 {
        -self.b / (2.0 * self.a)
    }

    /// Ordinate of the extremum, `c - b^2 / 4a`.
    pub fn minimum_value(&self) -> f64 {
        self.c - self.b * self.b / (4.0 * self.a)
    }

    /// Coefficient of determination over the samples with nonzero weight.
    ///
    /// Defined as 1 when the total sum of squares vanishes.
    pub fn r_squared(&self, x: &[f64], y: &[f64], w: &[f64]) -> f64 {
        let selected: Vec<(f64, f64)> = x
            .iter()
            .zip(y.iter())
            .zip(w.iter())
            .filter(|(_, &wi)| wi > 0.0)
            .map(|((&xi, &yi), _)| (xi, yi))
            .collect();
        if selected.is_empty() {
            return 1.0;
        }

        let mean = selected.iter().map(|(_, yi)| yi).sum::<f64>() / selected.len() as f64;
        let ss_tot: f64 = selected.iter().map(|(_, yi)| (yi - mean).powi(2)).sum();
        let ss_res: f64 = selected
            .iter()
            .map(|(xi, yi)| (yi - self.value(*xi)).powi(2))
            .sum();

        if ss_tot == 0.0 {
            1.0
        } else {
            1.0 - ss_res / ss_tot
        }
    }
}
