//! Pendry Y-function and R-factor.
//!
//! The Y-function `Y = I I' / (I^2 + V0i^2 I'^2)` removes the absolute
//! intensity scale from an I(E) curve, so the R-factor
//! `R = int (Y1 - Y2)^2 dE / int (Y1^2 + Y2^2) dE` compares peak positions
//! and widths rather than magnitudes. R is bounded in [0, 2] and vanishes
//! exactly when the curves coincide on their overlap.

// External dependencies
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

// load dependencies
use super::errors::Warning;
use super::mathutils::trapz_uniform;

/// Pointwise Pendry Y-function.
///
/// The denominator is strictly positive for `v0i > 0` and finite inputs;
/// where it vanishes (only possible for `v0i = 0` with `I = I' = 0`) the
/// Y-value is defined as 0.
pub fn pendry_y(intensity: ArrayView1<f64>, deriv: ArrayView1<f64>, v0i: f64) -> Array1<f64> {
    intensity
        .iter()
        .zip(deriv.iter())
        .map(|(&i, &di)| {
            let den = i * i + v0i * v0i * di * di;
            if den == 0.0 {
                0.0
            } else {
                i * di / den
            }
        })
        .collect()
}

/// Per-beam R-factor output at one shift.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamR {
    pub r: f64,
    pub numerator: f64,
    pub denominator: f64,
    pub n_overlap: usize,
}

impl BeamR {
    fn no_overlap() -> Self {
        BeamR {
            r: f64::NAN,
            numerator: 0.0,
            denominator: 0.0,
            n_overlap: 0,
        }
    }
}

/// Pendry R between two Y-curves at an integer grid shift.
///
/// `y1` and `y2` are full-length output-grid vectors with valid samples on
/// `[start, start + len)`; `y2` is translated by `shift` grid steps before
/// the overlap is formed. Fewer than two overlapping samples yield
/// `r = NaN` with zero integrals and `n_overlap = 0`.
#[allow(clippy::too_many_arguments)]
pub fn r_pendry_beam_y(
    y1: ArrayView1<f64>,
    y2: ArrayView1<f64>,
    start1: usize,
    start2: usize,
    len1: usize,
    len2: usize,
    shift: isize,
    e_step: f64,
) -> BeamR {
    if len1 == 0 || len2 == 0 {
        return BeamR::no_overlap();
    }

    let a1 = start1 as isize;
    let a2 = start2 as isize + shift;
    let b1 = a1 + len1 as isize - 1;
    let b2 = a2 + len2 as isize - 1;

    let lo = a1.max(a2);
    let hi = b1.min(b2);
    if hi - lo + 1 < 2 {
        return BeamR::no_overlap();
    }

    let n = (hi - lo + 1) as usize;
    let mut d2 = Vec::with_capacity(n);
    let mut s2 = Vec::with_capacity(n);
    for k in lo..=hi {
        let v1 = y1[k as usize];
        let v2 = y2[(k - shift) as usize];
        d2.push((v1 - v2) * (v1 - v2));
        s2.push(v1 * v1 + v2 * v2);
    }

    let numerator = trapz_uniform(&d2, e_step);
    let denominator = trapz_uniform(&s2, e_step);

    BeamR {
        r: numerator / denominator,
        numerator,
        denominator,
        n_overlap: n,
    }
}

/// Beam-set R-factor output at one shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamSetR {
    /// Overlap-weighted aggregate over all beams with a valid overlap;
    /// NaN when any overlapping beam produced a non-finite R.
    pub r_total: f64,
    pub beams: Vec<BeamR>,
    pub warnings: Vec<Warning>,
}

/// Weighted aggregate per beam-type group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamTypeR {
    pub label: i32,
    pub r: f64,
    pub n_overlap: usize,
}

fn collect_beamset(beams: Vec<BeamR>, shift: isize) -> BeamSetR {
    let mut warnings = Vec::new();
    for (b, beam) in beams.iter().enumerate() {
        if beam.n_overlap == 0 {
            warnings.push(Warning::NoOverlap { beam: b, shift });
        } else if !beam.r.is_finite() {
            warnings.push(Warning::BeamNan { beam: b });
        }
    }

    let r_total = aggregate(&beams, |_| true);
    BeamSetR {
        r_total,
        beams,
        warnings,
    }
}

/// Overlap-weighted mean `sum(N_b R_b) / sum(N_b)` over the selected beams,
/// skipping beams with no overlap. NaN when a selected overlapping beam has
/// a non-finite R, or when nothing overlaps at all.
fn aggregate(beams: &[BeamR], select: impl Fn(usize) -> bool) -> f64 {
    let mut num = 0.0;
    let mut weight = 0usize;
    for (b, beam) in beams.iter().enumerate() {
        if !select(b) || beam.n_overlap == 0 {
            continue;
        }
        if !beam.r.is_finite() {
            return f64::NAN;
        }
        num += beam.r * beam.n_overlap as f64;
        weight += beam.n_overlap;
    }

    if weight == 0 {
        f64::NAN
    } else {
        num / weight as f64
    }
}

/// Pendry R over a full beam set at a common shift, sequentially.
///
/// Matrices are `(n_beams, n_grid)` with one beam per row.
#[allow(clippy::too_many_arguments)]
pub fn r_pendry_beamset_y(
    y1: &Array2<f64>,
    y2: &Array2<f64>,
    start1: &[usize],
    start2: &[usize],
    len1: &[usize],
    len2: &[usize],
    shift: isize,
    e_step: f64,
) -> BeamSetR {
    let beams: Vec<BeamR> = (0..y1.nrows())
        .map(|b| {
            r_pendry_beam_y(
                y1.row(b),
                y2.row(b),
                start1[b],
                start2[b],
                len1[b],
                len2[b],
                shift,
                e_step,
            )
        })
        .collect();
    collect_beamset(beams, shift)
}

/// Parallel variant of [`r_pendry_beamset_y`]; beams are independent.
#[allow(clippy::too_many_arguments)]
pub fn r_pendry_beamset_y_par(
    y1: &Array2<f64>,
    y2: &Array2<f64>,
    start1: &[usize],
    start2: &[usize],
    len1: &[usize],
    len2: &[usize],
    shift: isize,
    e_step: f64,
) -> BeamSetR {
    let beams: Vec<BeamR> = (0..y1.nrows())
        .into_par_iter()
        .map(|b| {
            r_pendry_beam_y(
                y1.row(b),
                y2.row(b),
                start1[b],
                start2[b],
                len1[b],
                len2[b],
                shift,
                e_step,
            )
        })
        .collect();
    collect_beamset(beams, shift)
}

/// Beam-set R with per-type aggregates (for example integer vs. fractional
/// order beams), selected by an integer label per beam. Labels keep their
/// first-appearance order.
#[allow(clippy::too_many_arguments)]
pub fn r_pendry_beamtypes_y(
    y1: &Array2<f64>,
    y2: &Array2<f64>,
    start1: &[usize],
    start2: &[usize],
    len1: &[usize],
    len2: &[usize],
    labels: &[i32],
    shift: isize,
    e_step: f64,
) -> (BeamSetR, Vec<BeamTypeR>) {
    let set = r_pendry_beamset_y(y1, y2, start1, start2, len1, len2, shift, e_step);

    let mut seen: Vec<i32> = Vec::new();
    for &label in labels {
        if !seen.contains(&label) {
            seen.push(label);
        }
    }

    let groups = seen
        .into_iter()
        .map(|label| {
            let r = aggregate(&set.beams, |b| labels[b] == label);
            let n_overlap = set
                .beams
                .iter()
                .enumerate()
                .filter(|(b, _)| labels[*b] == label)
                .map(|(_, beam)| beam.n_overlap)
                .sum();
            BeamTypeR { label, r, n_overlap }
        })
        .collect();

    (set, groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rfactor::tests::{TEST_TOL, TEST_TOL_LESS_ACC};
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    const E_STEP: f64 = 0.5;
    const V0I: f64 = 5.0;

    /// Smooth bump with a baseline, sampled on the output grid.
    fn bump(e: f64) -> f64 {
        2.0 + 3.0 * (-((e - 75.0) / 6.0).powi(2) / 2.0).exp()
    }

    fn bump_deriv(e: f64) -> f64 {
        -(e - 75.0) / 12.0 * (-((e - 75.0) / 6.0).powi(2) / 2.0).exp()
    }

    fn y_of(f: impl Fn(f64) -> f64, df: impl Fn(f64) -> f64, n: usize) -> Array1<f64> {
        let i: Array1<f64> = (0..n).map(|k| f(50.0 + E_STEP * k as f64)).collect();
        let di: Array1<f64> = (0..n).map(|k| df(50.0 + E_STEP * k as f64)).collect();
        pendry_y(i.view(), di.view(), V0I)
    }

    #[test]
    fn test_pendry_y_formula() {
        let i = Array1::from_vec(vec![1.0, 2.0, 4.0]);
        let di = Array1::from_vec(vec![0.5, -0.25, 0.0]);
        let y = pendry_y(i.view(), di.view(), 2.0);
        for k in 0..3 {
            let expected = i[k] * di[k] / (i[k] * i[k] + 4.0 * di[k] * di[k]);
            assert_abs_diff_eq!(y[k], expected, epsilon = TEST_TOL);
        }
    }

    #[test]
    fn test_pendry_y_zero_denominator() {
        let i = Array1::from_vec(vec![0.0]);
        let di = Array1::from_vec(vec![0.0]);
        let y = pendry_y(i.view(), di.view(), 0.0);
        assert_eq!(y[0], 0.0);
    }

    #[test]
    fn test_identical_curves_give_zero() {
        let y = y_of(bump, bump_deriv, 101);
        let out = r_pendry_beam_y(y.view(), y.view(), 0, 0, 101, 101, 0, E_STEP);
        assert_eq!(out.r, 0.0);
        assert_eq!(out.n_overlap, 101);
    }

    #[test]
    fn test_r_is_bounded_by_two() {
        let y1 = y_of(bump, bump_deriv, 101);
        // anticorrelated curve: negated derivative flips the sign of Y
        let y2 = y_of(bump, |e| -bump_deriv(e), 101);
        let out = r_pendry_beam_y(y1.view(), y2.view(), 0, 0, 101, 101, 0, E_STEP);
        assert!(out.r >= 0.0);
        assert!(out.r <= 2.0 + TEST_TOL);
    }

    #[test]
    fn test_shift_symmetry() {
        let y1 = y_of(bump, bump_deriv, 101);
        let y2 = y_of(|e| bump(e + 3.0), |e| bump_deriv(e + 3.0), 101);

        for shift in [-4isize, -1, 0, 2, 5] {
            let fwd = r_pendry_beam_y(y1.view(), y2.view(), 0, 0, 101, 101, shift, E_STEP);
            let bwd = r_pendry_beam_y(y2.view(), y1.view(), 0, 0, 101, 101, -shift, E_STEP);
            assert_abs_diff_eq!(fwd.r, bwd.r, epsilon = TEST_TOL_LESS_ACC);
            assert_eq!(fwd.n_overlap, bwd.n_overlap);
        }
    }

    #[test]
    fn test_disjoint_supports_report_no_overlap() {
        let y1 = y_of(bump, bump_deriv, 200);
        let y2 = y1.clone();
        let out = r_pendry_beam_y(y1.view(), y2.view(), 0, 100, 20, 20, 0, E_STEP);
        assert!(out.r.is_nan());
        assert_eq!(out.numerator, 0.0);
        assert_eq!(out.denominator, 0.0);
        assert_eq!(out.n_overlap, 0);
    }

    #[test]
    fn test_translated_support_overlap_count() {
        let y1 = y_of(bump, bump_deriv, 101);
        let y2 = y1.clone();
        let out = r_pendry_beam_y(y1.view(), y2.view(), 0, 0, 101, 101, 10, E_STEP);
        assert_eq!(out.n_overlap, 91);
    }

    fn beamset_fixture(n: usize) -> (Array2<f64>, Array2<f64>) {
        let y1 = y_of(bump, bump_deriv, n);
        let y2 = y_of(|e| bump(e - 1.0), |e| bump_deriv(e - 1.0), n);
        let mut m1 = Array2::zeros((2, n));
        let mut m2 = Array2::zeros((2, n));
        m1.row_mut(0).assign(&y1);
        m1.row_mut(1).assign(&y2);
        m2.row_mut(0).assign(&y1);
        m2.row_mut(1).assign(&y1);
        (m1, m2)
    }

    #[test]
    fn test_beamset_aggregate_is_overlap_weighted() {
        let (m1, m2) = beamset_fixture(101);
        let start = [0usize, 10];
        let len = [101usize, 80];
        let out = r_pendry_beamset_y(&m1, &m2, &start, &start, &len, &len, 0, E_STEP);

        let expected = (out.beams[0].r * out.beams[0].n_overlap as f64
            + out.beams[1].r * out.beams[1].n_overlap as f64)
            / (out.beams[0].n_overlap + out.beams[1].n_overlap) as f64;
        assert_abs_diff_eq!(out.r_total, expected, epsilon = TEST_TOL);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_beamset_excludes_no_overlap_beams() {
        let (m1, m2) = beamset_fixture(200);
        let start1 = [0usize, 0];
        let start2 = [0usize, 100];
        let len1 = [200usize, 20];
        let len2 = [200usize, 20];
        let out = r_pendry_beamset_y(&m1, &m2, &start1, &start2, &len1, &len2, 0, E_STEP);

        assert!(out.beams[1].r.is_nan());
        assert_eq!(out.beams[1].n_overlap, 0);
        // beam 0 compares a curve with itself
        assert_abs_diff_eq!(out.r_total, 0.0, epsilon = TEST_TOL);
        assert!(out
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::NoOverlap { beam: 1, .. })));
    }

    #[test]
    fn test_beamset_parallel_matches_sequential() {
        let (m1, m2) = beamset_fixture(101);
        let start = [0usize, 0];
        let len = [101usize, 101];
        let seq = r_pendry_beamset_y(&m1, &m2, &start, &start, &len, &len, 2, E_STEP);
        let par = r_pendry_beamset_y_par(&m1, &m2, &start, &start, &len, &len, 2, E_STEP);
        assert_eq!(seq, par);
    }

    #[test]
    fn test_constant_offset_increases_r() {
        let y0 = y_of(bump, bump_deriv, 101);
        let mut previous = 0.0;
        for offset in [0.05, 0.2, 0.5] {
            let y = y_of(move |e| bump(e) + offset, bump_deriv, 101);
            let out = r_pendry_beam_y(y0.view(), y.view(), 0, 0, 101, 101, 0, E_STEP);
            assert!(out.r > previous);
            assert!(out.r < 2.0);
            previous = out.r;
        }
    }

    #[test]
    fn test_beamtype_groups() {
        let (m1, m2) = beamset_fixture(101);
        let start = [0usize, 0];
        let len = [101usize, 101];
        let labels = [1, 2];
        let (set, groups) =
            r_pendry_beamtypes_y(&m1, &m2, &start, &start, &len, &len, &labels, 0, E_STEP);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].label, 1);
        assert_abs_diff_eq!(groups[0].r, set.beams[0].r, epsilon = TEST_TOL);
        assert_abs_diff_eq!(groups[1].r, set.beams[1].r, epsilon = TEST_TOL);
        assert_eq!(groups[0].n_overlap, 101);
    }
}
