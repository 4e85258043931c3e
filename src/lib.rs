//! Pendry R-factor engine for LEED I(V) surface structure analysis.
//!
//! The crate compares experimental and theoretical intensity-vs-energy
//! curves of diffraction beams: every curve is resampled with a natural
//! B-spline onto a shared uniform energy grid, transformed into the Pendry
//! Y-function, and scored with the Pendry R-factor, optionally optimizing a
//! rigid inner-potential shift of the theory against the experiment.
//!
//! # Example
//!
//! ```
//! use leedrf::prelude::*;
//! use ndarray::{Array1, Array2};
//!
//! let energies: Array1<f64> = (0..101).map(|i| 50.0 + 0.5 * i as f64).collect();
//! let curve = |e: f64| 2.0 + 3.0 * (-((e - 75.0) / 8.0).powi(2) / 2.0).exp();
//! let mut intensities = Array2::zeros((1, 101));
//! for (k, &e) in energies.iter().enumerate() {
//!     intensities[(0, k)] = curve(e);
//! }
//!
//! let mut calc = PendryRfactor::new();
//! calc.set_experiment(BeamSet::new(energies.clone(), intensities.clone()).unwrap())
//!     .set_theory(BeamSet::new(energies, intensities).unwrap())
//!     .set_grid(UniformGrid::new(50.0, 0.5, 101).unwrap());
//! calc.prepare().unwrap();
//!
//! let r = calc.r_at_shift(0).unwrap();
//! assert!(r.r_total.abs() < 1e-12);
//! ```

pub mod prelude;
pub mod rfactor;
