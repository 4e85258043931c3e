//! Pendry R-factor pipeline.
//!
//! Raw per-beam I(E) curves flow through range limiting, averaging of
//! symmetry-equivalent beams, B-spline interpolation onto a uniform energy
//! grid and the Pendry Y-function; the prepared curves then feed the
//! per-beam and beam-set R-factors and the V0r shift optimizer.

// Error handling
use thiserror::Error;

// load dependencies
pub mod beamset;
pub mod engine;
pub mod errors;
pub mod grid;
pub mod mathutils;
pub mod parabola;
pub mod pendry;
pub mod spline;
pub mod v0r;

// Re-export error types for public API
pub use errors::{GridError, PrepError, SplineError, V0rError, Warning};

/// Top-level error type that aggregates all domain-specific errors.
///
/// Only fatal conditions appear here; nonfatal ones are carried as
/// [`Warning`] values in the stage outputs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RfError {
    #[error("grid error: {0}")]
    Grid(#[from] GridError),

    #[error("spline error: {0}")]
    Spline(#[from] SplineError),

    #[error("beam preparation error: {0}")]
    Prep(#[from] PrepError),

    #[error("V0r optimizer error: {0}")]
    V0r(#[from] V0rError),
}

impl RfError {
    /// Canonical integer code of the underlying condition.
    pub fn code(&self) -> i32 {
        match self {
            RfError::Grid(e) => e.code(),
            RfError::Spline(e) => e.code(),
            RfError::Prep(e) => e.code(),
            RfError::V0r(e) => e.code(),
        }
    }
}

/// Convenience type alias for Results using RfError.
pub type Result<T> = std::result::Result<T, RfError>;
