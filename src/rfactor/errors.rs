//! Error types for the R-factor pipeline.
//!
//! Fatal conditions abort the call and travel through [`crate::rfactor::RfError`];
//! nonfatal conditions are recorded as [`Warning`] values in stage outputs and
//! never abort. Every variant maps to the canonical integer code used by the
//! surrounding structure-search tooling via `code()`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors related to energy grids and evaluation ranges.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GridError {
    #[error("energy grid must be strictly increasing at index {index}")]
    NotIncreasing { index: usize },

    #[error("energy grid is not uniform at index {index}: step {found}, expected {expected}")]
    NotUniform {
        index: usize,
        expected: f64,
        found: f64,
    },

    #[error("need at least {min} samples, got {actual}")]
    TooFewSamples { min: usize, actual: usize },

    #[error("abscissae have {x_len} entries, ordinates {y_len}")]
    LengthMismatch { x_len: usize, y_len: usize },

    #[error("evaluation point {x} outside the data range [{lo}, {hi}]")]
    OutOfRange { x: f64, lo: f64, hi: f64 },

    #[error("beam {beam} support [{start}, {start}+{length}) exceeds {n_samples} samples")]
    SupportOutOfBounds {
        beam: usize,
        start: usize,
        length: usize,
        n_samples: usize,
    },

    #[error("prepared beam sets are incompatible: {reason}")]
    Incompatible { reason: String },
}

impl GridError {
    pub fn code(&self) -> i32 {
        216
    }
}

/// Errors raised by the B-spline collocation fit.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SplineError {
    #[error("unsupported spline degree {degree} (expected 3 or 5)")]
    UnsupportedDegree { degree: usize },

    #[error("singular collocation system for {n} samples of degree {degree}")]
    Singular { n: usize, degree: usize },
}

impl SplineError {
    pub fn code(&self) -> i32 {
        match self {
            SplineError::UnsupportedDegree { .. } => 216,
            SplineError::Singular { .. } => 217,
        }
    }
}

/// Errors raised during beam preparation.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrepError {
    #[error("missing required input: {field}")]
    MissingInput { field: String },

    #[error("averaged group {group} keeps {len} samples, need {min}")]
    GroupTooShort { group: usize, len: usize, min: usize },

    #[error("invalid averaging scheme: {reason}")]
    SchemeInvalid { reason: String },

    #[error("averaging skipped but {n_out} output beams requested for {n_in} input beams")]
    SchemeMismatch { n_out: usize, n_in: usize },
}

impl PrepError {
    pub fn code(&self) -> i32 {
        match self {
            PrepError::MissingInput { .. } => 216,
            PrepError::GroupTooShort { .. } => 212,
            PrepError::SchemeInvalid { .. } => 220,
            PrepError::SchemeMismatch { .. } => 223,
        }
    }
}

/// Errors raised by the V0r optimizer.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum V0rError {
    #[error("shift range [{s_min}, {s_max}] has fewer than {min} grid points")]
    RangeTooSmall { s_min: isize, s_max: isize, min: usize },

    #[error("parabola fit is singular: {reason}")]
    SingularParabola { reason: String },
}

impl V0rError {
    pub fn code(&self) -> i32 {
        match self {
            V0rError::RangeTooSmall { .. } => 851,
            V0rError::SingularParabola { .. } => 860,
        }
    }
}

/// Nonfatal conditions recorded while a call proceeds.
///
/// A warning never invalidates the returned arrays; `BeamNan` additionally
/// propagates NaN into the aggregate R so the outer search can reject the
/// candidate structure.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Warning {
    #[error("beam {beam} dropped: support of {len} samples is below {min}")]
    BeamTooShort { beam: usize, len: usize, min: usize },

    #[error("beam {beam} has no overlap at shift {shift}")]
    NoOverlap { beam: usize, shift: isize },

    #[error("beam {beam} produced a non-finite R; aggregate is NaN")]
    BeamNan { beam: usize },

    #[error("parabola window left the shift grid; fell back to grid search")]
    OutOfRange,

    #[error("parabola fit stayed poor at minimum window width; fell back to grid search")]
    ParabolaPoor,

    #[error("minimum accepted from a weak parabola fit; returned best grid point")]
    WeakMinimum,

    #[error("no unevaluated shift left on the grid")]
    AllEvaluated,
}

impl Warning {
    pub fn code(&self) -> i32 {
        match self {
            Warning::BeamTooShort { .. } => 211,
            Warning::NoOverlap { .. } => 812,
            Warning::BeamNan { .. } => 811,
            Warning::OutOfRange => 854,
            Warning::ParabolaPoor => 855,
            Warning::WeakMinimum => 856,
            Warning::AllEvaluated => 852,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prep_error_messages() {
        let error = PrepError::GroupTooShort {
            group: 2,
            len: 4,
            min: 7,
        };
        let msg = error.to_string();
        assert!(msg.contains('2'));
        assert!(msg.contains('4'));
        assert!(msg.contains('7'));
        assert_eq!(error.code(), 212);
    }

    #[test]
    fn test_grid_error_out_of_range() {
        let error = GridError::OutOfRange {
            x: 120.0,
            lo: 50.0,
            hi: 100.0,
        };
        let msg = error.to_string();
        assert!(msg.contains("120"));
        assert!(msg.contains("100"));
        assert_eq!(error.code(), 216);
    }

    #[test]
    fn test_warning_codes() {
        assert_eq!(
            Warning::BeamTooShort {
                beam: 0,
                len: 3,
                min: 7
            }
            .code(),
            211
        );
        assert_eq!(Warning::BeamNan { beam: 1 }.code(), 811);
        assert_eq!(Warning::OutOfRange.code(), 854);
        assert_eq!(Warning::ParabolaPoor.code(), 855);
        assert_eq!(Warning::WeakMinimum.code(), 856);
        assert_eq!(Warning::AllEvaluated.code(), 852);
    }

    #[test]
    fn test_v0r_error_codes() {
        let error = V0rError::RangeTooSmall {
            s_min: -2,
            s_max: 2,
            min: 6,
        };
        assert_eq!(error.code(), 851);
        let error = V0rError::SingularParabola {
            reason: "collinear samples".to_string(),
        };
        assert_eq!(error.code(), 860);
    }

    #[test]
    fn test_error_is_clone() {
        let error = SplineError::Singular { n: 10, degree: 3 };
        let cloned = error.clone();
        assert_eq!(error.to_string(), cloned.to_string());
    }
}
