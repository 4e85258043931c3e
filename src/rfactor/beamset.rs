//! Beam sets and the preparation pipeline.
//!
//! Raw per-beam I(E) curves arrive as a packed matrix sharing start/length
//! support vectors. Preparation runs five ordered stages, each of which can
//! be skipped: range limiting to the output grid, averaging of
//! symmetry-equivalent beams (with reordering and discards), a smoothing
//! hook, B-spline interpolation with first derivatives onto the uniform
//! output grid, and the Pendry Y-function.

// External dependencies
use itertools::izip;
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

// load dependencies
use super::errors::{GridError, PrepError, Warning};
use super::grid::{UniformGrid, GRID_TOL};
use super::mathutils::gradient;
use super::pendry::{pendry_y, r_pendry_beamset_y, r_pendry_beamset_y_par, BeamSetR};
use super::spline::NaturalSpline;
use super::RfError;

pub const DEFAULT_V0I: f64 = 5.0;
pub const DEFAULT_DEGREE: usize = 3;

/// Which pipeline stages to skip; everything runs by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipStages {
    pub range_limit: bool,
    pub avg_reorder: bool,
    pub smoothing: bool,
    pub interpolation: bool,
    pub y_function: bool,
}

/// Parameters of the preparation pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RfactorParams {
    /// Imaginary inner potential in eV. Default = 5.0.
    pub v0i: Option<f64>,
    /// Spline degree for the interpolation stage. Default = 3.
    pub degree: Option<usize>,
    /// Stage skip flags.
    pub skip: SkipStages,
}

impl RfactorParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_v0i(&mut self, v0i: f64) -> &mut Self {
        self.v0i = Some(v0i);
        self
    }

    pub fn set_degree(&mut self, degree: usize) -> &mut Self {
        self.degree = Some(degree);
        self
    }

    pub fn set_skip(&mut self, skip: SkipStages) -> &mut Self {
        self.skip = skip;
        self
    }

    pub fn v0i(&self) -> f64 {
        self.v0i.unwrap_or(DEFAULT_V0I)
    }

    pub fn degree(&self) -> usize {
        self.degree.unwrap_or(DEFAULT_DEGREE)
    }

    /// Shortest per-beam support the spline stage can work with.
    pub fn min_support(&self) -> usize {
        2 * self.degree() + 1
    }
}

/// Grouping of input beams into averaged output beams.
///
/// Entry `b` names the 1-based output beam input beam `b` contributes to;
/// 0 discards the beam. Equal nonzero entries are averaged together, so the
/// scheme also encodes reordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AveragingScheme {
    groups: Vec<usize>,
    n_beams_out: usize,
}

impl AveragingScheme {
    pub fn new(groups: Vec<usize>, n_beams_out: usize) -> Result<Self, PrepError> {
        if let Some(&g) = groups.iter().find(|&&g| g > n_beams_out) {
            return Err(PrepError::SchemeInvalid {
                reason: format!("entry {} exceeds {} output beams", g, n_beams_out),
            });
        }
        Ok(AveragingScheme {
            groups,
            n_beams_out,
        })
    }

    /// One output beam per input beam, no averaging and no discards.
    pub fn identity(n_beams: usize) -> Self {
        AveragingScheme {
            groups: (1..=n_beams).collect(),
            n_beams_out: n_beams,
        }
    }

    pub fn groups(&self) -> &[usize] {
        &self.groups
    }

    pub fn n_beams_out(&self) -> usize {
        self.n_beams_out
    }
}

/// Immutable input curves: packed intensity matrix with one beam per row,
/// sharing the input energy grid and per-beam supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamSet {
    energies: Array1<f64>,
    intensities: Array2<f64>,
    start: Vec<usize>,
    length: Vec<usize>,
}

impl BeamSet {
    /// Beam set in which every beam spans the whole energy grid.
    pub fn new(energies: Array1<f64>, intensities: Array2<f64>) -> Result<Self, RfError> {
        let n_beams = intensities.nrows();
        let n_samples = intensities.ncols();
        Self::with_supports(
            energies,
            intensities,
            vec![0; n_beams],
            vec![n_samples; n_beams],
        )
    }

    pub fn with_supports(
        energies: Array1<f64>,
        intensities: Array2<f64>,
        start: Vec<usize>,
        length: Vec<usize>,
    ) -> Result<Self, RfError> {
        let n_beams = intensities.nrows();
        let n_samples = intensities.ncols();

        if energies.len() != n_samples {
            return Err(GridError::LengthMismatch {
                x_len: energies.len(),
                y_len: n_samples,
            }
            .into());
        }
        if let Some(i) = energies
            .to_vec()
            .windows(2)
            .position(|p| p[1] <= p[0])
        {
            return Err(GridError::NotIncreasing { index: i + 1 }.into());
        }
        if start.len() != n_beams || length.len() != n_beams {
            return Err(GridError::LengthMismatch {
                x_len: start.len(),
                y_len: n_beams,
            }
            .into());
        }
        for (b, (&s, &l)) in start.iter().zip(length.iter()).enumerate() {
            if s + l > n_samples {
                return Err(GridError::SupportOutOfBounds {
                    beam: b,
                    start: s,
                    length: l,
                    n_samples,
                }
                .into());
            }
        }

        Ok(BeamSet {
            energies,
            intensities,
            start,
            length,
        })
    }

    pub fn n_beams(&self) -> usize {
        self.intensities.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.intensities.ncols()
    }

    pub fn energies(&self) -> &Array1<f64> {
        &self.energies
    }

    pub fn intensities(&self) -> &Array2<f64> {
        &self.intensities
    }

    pub fn start(&self) -> &[usize] {
        &self.start
    }

    pub fn length(&self) -> &[usize] {
        &self.length
    }
}

/// Prepared curves on the uniform output grid: interpolated intensity, its
/// first derivative and the Pendry Y-function, one beam per row, with the
/// surviving supports. Rows outside a support are zero and never read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedBeams {
    grid: UniformGrid,
    start: Vec<usize>,
    length: Vec<usize>,
    intensity: Array2<f64>,
    derivative: Array2<f64>,
    y: Array2<f64>,
    warnings: Vec<Warning>,
}

impl PreparedBeams {
    pub fn grid(&self) -> &UniformGrid {
        &self.grid
    }

    pub fn n_beams(&self) -> usize {
        self.y.nrows()
    }

    pub fn start(&self) -> &[usize] {
        &self.start
    }

    pub fn length(&self) -> &[usize] {
        &self.length
    }

    pub fn intensity(&self) -> &Array2<f64> {
        &self.intensity
    }

    pub fn derivative(&self) -> &Array2<f64> {
        &self.derivative
    }

    pub fn y(&self) -> &Array2<f64> {
        &self.y
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub(crate) fn check_compatible(&self, other: &PreparedBeams) -> Result<(), RfError> {
        if self.grid != other.grid {
            return Err(GridError::Incompatible {
                reason: "different output grids".to_string(),
            }
            .into());
        }
        if self.n_beams() != other.n_beams() {
            return Err(GridError::Incompatible {
                reason: format!("{} beams vs {}", self.n_beams(), other.n_beams()),
            }
            .into());
        }
        Ok(())
    }

    /// Beam-set Pendry R against another prepared set at an integer shift.
    pub fn r_against(&self, theory: &PreparedBeams, shift: isize) -> Result<BeamSetR, RfError> {
        self.check_compatible(theory)?;
        Ok(r_pendry_beamset_y(
            &self.y,
            &theory.y,
            &self.start,
            &theory.start,
            &self.length,
            &theory.length,
            shift,
            self.grid.step(),
        ))
    }

    /// Parallel variant of [`PreparedBeams::r_against`].
    pub fn r_against_par(
        &self,
        theory: &PreparedBeams,
        shift: isize,
    ) -> Result<BeamSetR, RfError> {
        self.check_compatible(theory)?;
        Ok(r_pendry_beamset_y_par(
            &self.y,
            &theory.y,
            &self.start,
            &theory.start,
            &self.length,
            &theory.length,
            shift,
            self.grid.step(),
        ))
    }
}

/// Clipped and averaged samples of one output beam.
struct GroupData {
    x: Vec<f64>,
    y: Vec<f64>,
}

/// Interpolated row of the prepared matrices; empty for discarded beams.
struct PreparedRow {
    start: usize,
    intensity: Vec<f64>,
    derivative: Vec<f64>,
    y: Vec<f64>,
    warning: Option<Warning>,
}

impl PreparedRow {
    fn empty() -> Self {
        PreparedRow {
            start: 0,
            intensity: Vec::new(),
            derivative: Vec::new(),
            y: Vec::new(),
            warning: None,
        }
    }
}

/// Run the preparation pipeline sequentially.
pub fn prepare_beams(
    beams: &BeamSet,
    scheme: &AveragingScheme,
    grid: &UniformGrid,
    params: &RfactorParams,
) -> Result<PreparedBeams, RfError> {
    prepare_beams_impl(beams, scheme, grid, params, false)
}

/// Run the preparation pipeline with the interpolation stage parallelized
/// across output beams.
pub fn prepare_beams_par(
    beams: &BeamSet,
    scheme: &AveragingScheme,
    grid: &UniformGrid,
    params: &RfactorParams,
) -> Result<PreparedBeams, RfError> {
    prepare_beams_impl(beams, scheme, grid, params, true)
}

fn prepare_beams_impl(
    beams: &BeamSet,
    scheme: &AveragingScheme,
    grid: &UniformGrid,
    params: &RfactorParams,
    parallel: bool,
) -> Result<PreparedBeams, RfError> {
    let skip = params.skip;
    let min_support = params.min_support();
    let n_beams = beams.n_beams();
    let n_out = scheme.n_beams_out();
    let e_in = beams.energies().to_vec();
    let mut warnings: Vec<Warning> = Vec::new();

    if scheme.groups().len() != n_beams {
        return Err(PrepError::SchemeInvalid {
            reason: format!(
                "scheme has {} entries for {} beams",
                scheme.groups().len(),
                n_beams
            ),
        }
        .into());
    }
    if n_out > n_beams {
        return Err(PrepError::SchemeInvalid {
            reason: format!("{} output beams from {} input beams", n_out, n_beams),
        }
        .into());
    }
    if skip.avg_reorder && n_out != n_beams {
        return Err(PrepError::SchemeMismatch {
            n_out,
            n_in: n_beams,
        }
        .into());
    }
    if !skip.avg_reorder {
        for g in 1..=n_out {
            if !scheme.groups().contains(&g) {
                return Err(PrepError::SchemeInvalid {
                    reason: format!("output group {} is empty", g),
                }
                .into());
            }
        }
    }
    // the output grid must sit inside the input grid: no extrapolation
    if !grid.contained_in(e_in[0], e_in[e_in.len() - 1]) {
        return Err(GridError::OutOfRange {
            x: grid.e_min(),
            lo: e_in[0],
            hi: e_in[e_in.len() - 1],
        }
        .into());
    }

    // stage 1: clip supports to the output-grid window
    let mut scheme_vec = scheme.groups().to_vec();
    let mut start = beams.start().to_vec();
    let mut length = beams.length().to_vec();
    if !skip.range_limit {
        let (i_lo, i_hi) = grid.window_within(&e_in).ok_or(GridError::OutOfRange {
            x: grid.e_min(),
            lo: e_in[0],
            hi: e_in[e_in.len() - 1],
        })?;
        for (b, (g, s, l)) in izip!(&mut scheme_vec, &mut start, &mut length).enumerate() {
            if *g == 0 || *l == 0 {
                continue;
            }
            let lo = (*s).max(i_lo);
            let hi = (*s + *l - 1).min(i_hi);
            let clipped = if hi >= lo { hi - lo + 1 } else { 0 };
            if clipped < min_support {
                warnings.push(Warning::BeamTooShort {
                    beam: b,
                    len: clipped,
                    min: min_support,
                });
                *g = 0;
            } else {
                *s = lo;
                *l = clipped;
            }
        }
    }

    // stage 2: group membership; skipping maps beams through one-to-one
    let members_of: Vec<Vec<usize>> = if skip.avg_reorder {
        (0..n_out)
            .map(|b| if scheme_vec[b] == 0 { vec![] } else { vec![b] })
            .collect()
    } else {
        let mut members = vec![Vec::new(); n_out];
        for (b, &g) in scheme_vec.iter().enumerate() {
            if g > 0 {
                members[g - 1].push(b);
            }
        }
        members
    };

    // support intersection and arithmetic mean per surviving group
    let groups: Vec<Option<GroupData>> = members_of
        .iter()
        .enumerate()
        .map(|(g, members)| -> Result<Option<GroupData>, PrepError> {
            if members.is_empty() {
                return Ok(None);
            }
            if members.iter().any(|&b| length[b] == 0) {
                return Err(PrepError::GroupTooShort {
                    group: g + 1,
                    len: 0,
                    min: min_support,
                });
            }
            let lo = members.iter().map(|&b| start[b]).max().unwrap_or(0);
            let hi = members
                .iter()
                .map(|&b| start[b] + length[b] - 1)
                .min()
                .unwrap_or(0);
            let len = if hi >= lo { hi - lo + 1 } else { 0 };
            if len < min_support {
                return Err(PrepError::GroupTooShort {
                    group: g + 1,
                    len,
                    min: min_support,
                });
            }

            let x = e_in[lo..=hi].to_vec();
            let y = (0..len)
                .map(|j| {
                    members
                        .iter()
                        .map(|&b| beams.intensities()[(b, lo + j)])
                        .sum::<f64>()
                        / members.len() as f64
                })
                .collect();
            Ok(Some(GroupData { x, y }))
        })
        .collect::<Result<_, _>>()?;

    // stage 3 (smoothing) is a pass-through hook; the flag is accepted for
    // orchestration but there is nothing to do here

    // stages 4 and 5: interpolate onto the output grid and apply the
    // Y-function, independently per output beam
    let process = |(g, data): (usize, &Option<GroupData>)| -> Result<PreparedRow, RfError> {
        let Some(data) = data else {
            return Ok(PreparedRow::empty());
        };
        prepare_row(g, data, grid, params, min_support)
    };

    let rows: Vec<PreparedRow> = if parallel {
        groups
            .par_iter()
            .enumerate()
            .map(process)
            .collect::<Result<_, _>>()?
    } else {
        groups
            .iter()
            .enumerate()
            .map(process)
            .collect::<Result<_, _>>()?
    };

    let n_grid = grid.len();
    let mut start_out = vec![0usize; n_out];
    let mut length_out = vec![0usize; n_out];
    let mut intensity = Array2::zeros((n_out, n_grid));
    let mut derivative = Array2::zeros((n_out, n_grid));
    let mut y = Array2::zeros((n_out, n_grid));

    for (g, row) in rows.into_iter().enumerate() {
        start_out[g] = row.start;
        length_out[g] = row.intensity.len();
        for (j, (&iv, (&dv, &yv))) in row
            .intensity
            .iter()
            .zip(row.derivative.iter().zip(row.y.iter()))
            .enumerate()
        {
            intensity[(g, row.start + j)] = iv;
            derivative[(g, row.start + j)] = dv;
            y[(g, row.start + j)] = yv;
        }
        if let Some(w) = row.warning {
            warnings.push(w);
        }
    }

    Ok(PreparedBeams {
        grid: grid.clone(),
        start: start_out,
        length: length_out,
        intensity,
        derivative,
        y,
        warnings,
    })
}

fn prepare_row(
    g: usize,
    data: &GroupData,
    grid: &UniformGrid,
    params: &RfactorParams,
    min_support: usize,
) -> Result<PreparedRow, RfError> {
    let skip = params.skip;

    let Some((start, len)) = grid.project_support(data.x[0], data.x[data.x.len() - 1]) else {
        return Ok(PreparedRow {
            warning: Some(Warning::BeamTooShort {
                beam: g,
                len: 0,
                min: min_support,
            }),
            ..PreparedRow::empty()
        });
    };
    if len < min_support {
        return Ok(PreparedRow {
            warning: Some(Warning::BeamTooShort {
                beam: g,
                len,
                min: min_support,
            }),
            ..PreparedRow::empty()
        });
    }

    let (intensity, derivative) = if skip.interpolation {
        // samples must already sit on the output grid
        let tol = GRID_TOL * grid.step();
        for (j, &xj) in data.x.iter().enumerate() {
            let expected = grid.energy(start + j);
            if (xj - expected).abs() > tol {
                return Err(GridError::NotUniform {
                    index: j,
                    expected,
                    found: xj,
                }
                .into());
            }
        }
        let derivative: Vec<f64> = gradient(&data.y)
            .into_iter()
            .map(|d| d / grid.step())
            .collect();
        (data.y.clone(), derivative)
    } else {
        let spline = NaturalSpline::fit(&data.x, &data.y, params.degree())?;
        let xt: Vec<f64> = (0..len).map(|j| grid.energy(start + j)).collect();
        (spline.evaluate(&xt)?, spline.derivative(&xt)?)
    };

    let y = if skip.y_function {
        intensity.clone()
    } else {
        let i_arr = Array1::from_vec(intensity.clone());
        let d_arr = Array1::from_vec(derivative.clone());
        pendry_y(i_arr.view(), d_arr.view(), params.v0i()).to_vec()
    };

    Ok(PreparedRow {
        start,
        intensity,
        derivative,
        y,
        warning: None,
    })
}
