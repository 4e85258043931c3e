//! Uniform output-grid bookkeeping.
//!
//! All Y-functions and R-factor integrals live on a strictly uniform energy
//! grid. This module owns the grid value type and the index correspondence
//! between that grid and the (possibly denser) input grid of the raw beams.

use serde::{Deserialize, Serialize};

use super::errors::GridError;

/// Relative tolerance for energy comparisons, in units of the grid step.
pub const GRID_TOL: f64 = 1.0e-6;

/// Strictly uniform, strictly increasing energy grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniformGrid {
    e_min: f64,
    step: f64,
    n: usize,
}

impl UniformGrid {
    /// Build a grid from an explicit energy array, validating uniformity.
    pub fn from_energies(energies: &[f64]) -> Result<Self, GridError> {
        if energies.len() < 2 {
            return Err(GridError::TooFewSamples {
                min: 2,
                actual: energies.len(),
            });
        }

        let step = energies[1] - energies[0];
        if step <= 0.0 {
            return Err(GridError::NotIncreasing { index: 1 });
        }

        for (i, pair) in energies.windows(2).enumerate() {
            let found = pair[1] - pair[0];
            if found <= 0.0 {
                return Err(GridError::NotIncreasing { index: i + 1 });
            }
            if (found - step).abs() > GRID_TOL * step {
                return Err(GridError::NotUniform {
                    index: i + 1,
                    expected: step,
                    found,
                });
            }
        }

        Ok(UniformGrid {
            e_min: energies[0],
            step,
            n: energies.len(),
        })
    }

    pub fn new(e_min: f64, step: f64, n: usize) -> Result<Self, GridError> {
        if n < 2 {
            return Err(GridError::TooFewSamples { min: 2, actual: n });
        }
        if step <= 0.0 {
            return Err(GridError::NotIncreasing { index: 1 });
        }
        Ok(UniformGrid { e_min, step, n })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn e_min(&self) -> f64 {
        self.e_min
    }

    pub fn e_max(&self) -> f64 {
        self.energy(self.n - 1)
    }

    pub fn energy(&self, index: usize) -> f64 {
        self.e_min + self.step * index as f64
    }

    pub fn energies(&self) -> Vec<f64> {
        (0..self.n).map(|i| self.energy(i)).collect()
    }

    /// Smallest grid index whose energy is at or above `e`.
    pub fn index_at_or_above(&self, e: f64) -> Option<usize> {
        let raw = (e - self.e_min) / self.step - GRID_TOL;
        let idx = raw.ceil().max(0.0) as usize;
        (idx < self.n).then_some(idx)
    }

    /// Largest grid index whose energy is at or below `e`.
    pub fn index_at_or_below(&self, e: f64) -> Option<usize> {
        let raw = (e - self.e_min) / self.step + GRID_TOL;
        if raw < 0.0 {
            return None;
        }
        Some((raw.floor() as usize).min(self.n - 1))
    }

    /// Project an input-energy span onto the grid: `(start, length)` of the
    /// grid indices whose energies fall inside `[e_lo, e_hi]`.
    pub fn project_support(&self, e_lo: f64, e_hi: f64) -> Option<(usize, usize)> {
        let start = self.index_at_or_above(e_lo)?;
        let end = self.index_at_or_below(e_hi)?;
        (end >= start).then(|| (start, end - start + 1))
    }

    /// Window of input-grid indices whose energies fall inside this grid,
    /// used by the range-limit stage. `None` when there is no overlap.
    pub fn window_within(&self, e_in: &[f64]) -> Option<(usize, usize)> {
        let tol = GRID_TOL * self.step;
        let lo = self.e_min - tol;
        let hi = self.e_max() + tol;
        let i_lo = e_in.iter().position(|&e| e >= lo)?;
        let i_hi = e_in.iter().rposition(|&e| e <= hi)?;
        (i_hi >= i_lo).then_some((i_lo, i_hi))
    }

    /// True when this grid lies inside the span `[e_first, e_last]`, so that
    /// interpolation onto it never extrapolates.
    pub fn contained_in(&self, e_first: f64, e_last: f64) -> bool {
        let tol = GRID_TOL * self.step;
        self.e_min >= e_first - tol && self.e_max() <= e_last + tol
    }
}
