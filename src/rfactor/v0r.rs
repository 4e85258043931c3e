//! Inner-potential (V0r) optimization over an integer shift grid.
//!
//! The real part of the inner potential acts as a rigid energy shift of the
//! theoretical curves against the experimental ones. The optimizer walks an
//! integer grid of shifts with a least-squares parabola search and falls
//! back to exhaustive grid evaluation whenever the parabola cannot be
//! trusted. The state machine is an explicit loop so the evaluated set, the
//! window weights and the running best stay in plain sight.

// External dependencies
use ndarray::Array2;
use serde::{Deserialize, Serialize};

// load dependencies
use super::errors::{V0rError, Warning};
use super::parabola::Parabola;
use super::pendry::{r_pendry_beamset_y, BeamR, BeamSetR};
use super::RfError;

pub const DEFAULT_TOL_R: f64 = 0.95;
pub const DEFAULT_TOL_R_2: f64 = 0.8;
pub const DEFAULT_FIT_RANGE: usize = 10;
pub const MIN_GRID_POINTS: usize = 6;

// a parabola flatter than this cannot pin a minimum
const MIN_CURVATURE: f64 = 0.005;

/// Tolerances and window size of the parabola search.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct V0rParams {
    /// R-squared above which the fit is accepted. Default = 0.95.
    pub tol_r: Option<f64>,
    /// R-squared above which the window is only narrowed. Default = 0.8.
    pub tol_r_2: Option<f64>,
    /// Initial half-width of the fitting window, in grid steps. Default = 10.
    pub fit_range: Option<usize>,
    /// Use the parabola search; plain grid evaluation otherwise. Default = true.
    pub fast_search: Option<bool>,
}

impl V0rParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tol_r(&mut self, tol_r: f64) -> &mut Self {
        self.tol_r = Some(tol_r);
        self
    }

    pub fn set_tol_r_2(&mut self, tol_r_2: f64) -> &mut Self {
        self.tol_r_2 = Some(tol_r_2);
        self
    }

    pub fn set_fit_range(&mut self, fit_range: usize) -> &mut Self {
        self.fit_range = Some(fit_range);
        self
    }

    pub fn set_fast_search(&mut self, fast_search: bool) -> &mut Self {
        self.fast_search = Some(fast_search);
        self
    }

    pub fn tol_r(&self) -> f64 {
        self.tol_r.unwrap_or(DEFAULT_TOL_R)
    }

    pub fn tol_r_2(&self) -> f64 {
        self.tol_r_2.unwrap_or(DEFAULT_TOL_R_2)
    }

    pub fn fit_range(&self) -> usize {
        self.fit_range.unwrap_or(DEFAULT_FIT_RANGE)
    }

    pub fn fast_search(&self) -> bool {
        self.fast_search.unwrap_or(true)
    }
}

/// Outcome of a V0r optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct V0rResult {
    /// Best evaluated grid shift.
    pub best_shift: isize,
    /// Parabola-interpolated shift when the fit converged, otherwise the
    /// grid shift.
    pub best_shift_real: f64,
    /// Best aggregate R.
    pub best_r: f64,
    /// Per-beam R at the best grid shift.
    pub beams: Vec<BeamR>,
    /// Number of beam-set evaluations spent.
    pub n_eval: usize,
    pub warnings: Vec<Warning>,
}

/// Evaluation cache over the shift grid with the running best.
struct GridSearch<F> {
    s_min: isize,
    evals: Vec<Option<BeamSetR>>,
    /// `(index, r_total)` of the best evaluation; strictly-smaller updates
    /// keep the first-seen point on ties.
    best: Option<(usize, f64)>,
    n_eval: usize,
    eval: F,
}

impl<F: FnMut(isize) -> BeamSetR> GridSearch<F> {
    fn shift(&self, idx: usize) -> isize {
        self.s_min + idx as isize
    }

    fn ensure(&mut self, idx: usize) {
        if self.evals[idx].is_some() {
            return;
        }
        let shift = self.shift(idx);
        let result = (self.eval)(shift);
        self.n_eval += 1;
        let r = result.r_total;
        if r.is_finite() && self.best.map_or(true, |(_, best_r)| r < best_r) {
            self.best = Some((idx, r));
        }
        self.evals[idx] = Some(result);
    }

    fn evaluated_count(&self) -> usize {
        self.evals.iter().filter(|e| e.is_some()).count()
    }

    /// `(shift, r, weight)` triples of the finite evaluations inside
    /// `[w_lo, w_hi]`, weight 1 each.
    fn window_points(&self, w_lo: usize, w_hi: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for idx in w_lo..=w_hi {
            if let Some(e) = &self.evals[idx] {
                if e.r_total.is_finite() {
                    xs.push(self.shift(idx) as f64);
                    ys.push(e.r_total);
                }
            }
        }
        let ws = vec![1.0; xs.len()];
        (xs, ys, ws)
    }

    /// First unevaluated index in the window, nearest to `c_hat`, trying
    /// the lower neighbor before the upper one.
    fn next_missing(&self, c_hat: isize, w_lo: usize, w_hi: usize) -> Option<usize> {
        let c = c_hat.clamp(w_lo as isize, w_hi as isize);
        for d in 0..=(w_hi - w_lo) as isize {
            for idx in [c - d, c + d] {
                if idx >= w_lo as isize && idx <= w_hi as isize {
                    let idx = idx as usize;
                    if self.evals[idx].is_none() {
                        return Some(idx);
                    }
                }
            }
        }
        None
    }
}

enum Outcome {
    /// Parabola fit converged; carries the interpolated minimum.
    Converged { x: f64, value: f64 },
    /// Weak but usable fit; report the best grid point as-is.
    BestGridPoint,
    /// Evaluate every remaining grid point.
    Brute,
}

/// Optimize the shift over `[range.0, range.1]` with an arbitrary beam-set
/// evaluator. The three guesses seed the parabola fit.
pub fn optimize_v0r_grid<F>(
    range: (isize, isize),
    guesses: (isize, isize, isize),
    params: &V0rParams,
    eval: F,
) -> Result<V0rResult, RfError>
where
    F: FnMut(isize) -> BeamSetR,
{
    let (s_min, s_max) = range;
    let n_steps = if s_max >= s_min {
        (s_max - s_min + 1) as usize
    } else {
        0
    };
    if n_steps < MIN_GRID_POINTS {
        return Err(V0rError::RangeTooSmall {
            s_min,
            s_max,
            min: MIN_GRID_POINTS,
        }
        .into());
    }

    let mut search = GridSearch {
        s_min,
        evals: vec![None; n_steps],
        best: None,
        n_eval: 0,
        eval,
    };
    let mut warnings: Vec<Warning> = Vec::new();

    for g in [guesses.0, guesses.1, guesses.2] {
        let idx = (g.clamp(s_min, s_max) - s_min) as usize;
        search.ensure(idx);
    }

    let outcome = if params.fast_search() {
        refine(&mut search, params, n_steps, &mut warnings)?
    } else {
        Outcome::Brute
    };

    if matches!(outcome, Outcome::Brute) {
        for idx in 0..n_steps {
            search.ensure(idx);
        }
    }

    let best_idx = search
        .best
        .map(|(idx, _)| idx)
        .or_else(|| search.evals.iter().position(|e| e.is_some()))
        .unwrap_or(0);
    let chosen = search.evals[best_idx].take().unwrap_or_else(|| BeamSetR {
        r_total: f64::NAN,
        beams: Vec::new(),
        warnings: Vec::new(),
    });

    let best_shift = search.shift(best_idx);
    let (best_shift_real, best_r) = match outcome {
        // the observed grid point still wins if the interpolation overshoots
        Outcome::Converged { x, value } => (x, value.min(chosen.r_total)),
        _ => (best_shift as f64, chosen.r_total),
    };

    warnings.extend(chosen.warnings.iter().cloned());

    Ok(V0rResult {
        best_shift,
        best_shift_real,
        best_r,
        beams: chosen.beams,
        n_eval: search.n_eval,
        warnings,
    })
}

/// The Refine state: fit, widen the evaluated set, narrow the window, or
/// give up into the brute-force state.
fn refine<F>(
    search: &mut GridSearch<F>,
    params: &V0rParams,
    n_steps: usize,
    warnings: &mut Vec<Warning>,
) -> Result<Outcome, RfError>
where
    F: FnMut(isize) -> BeamSetR,
{
    if search.evaluated_count() < 3 {
        return Err(V0rError::SingularParabola {
            reason: "fewer than 3 distinct initial guesses".to_string(),
        }
        .into());
    }

    let (xs, ys, ws) = search.window_points(0, n_steps - 1);
    if xs.len() < 3 {
        // non-finite aggregates cannot seed the fit
        warnings.push(Warning::ParabolaPoor);
        return Ok(Outcome::Brute);
    }
    let fit = Parabola::fit(&xs, &ys, &ws)?;
    let mut c_hat = predicted_index(&fit, search.s_min);

    let initial_range = params.fit_range() as isize;
    let mut fit_range = initial_range;
    let min_fit_range = (initial_range - 6).max(5);

    loop {
        if c_hat - fit_range < 0 || c_hat + fit_range > n_steps as isize - 1 {
            warnings.push(Warning::OutOfRange);
            return Ok(Outcome::Brute);
        }
        let w_lo = (c_hat - fit_range) as usize;
        let w_hi = (c_hat + fit_range) as usize;
        let in_window = (w_lo..=w_hi)
            .filter(|&idx| search.evals[idx].is_some())
            .count();

        if in_window < 4 {
            match search.next_missing(c_hat, w_lo, w_hi) {
                Some(idx) => {
                    search.ensure(idx);
                    continue;
                }
                None => {
                    warnings.push(Warning::AllEvaluated);
                    return Ok(Outcome::Brute);
                }
            }
        }

        let (xs, ys, ws) = search.window_points(w_lo, w_hi);
        if xs.len() < 3 {
            warnings.push(Warning::ParabolaPoor);
            return Ok(Outcome::Brute);
        }
        let fit = Parabola::fit(&xs, &ys, &ws)?;
        let new_c = predicted_index(&fit, search.s_min);
        if fit.curvature() <= MIN_CURVATURE || new_c <= w_lo as isize || new_c >= w_hi as isize {
            warnings.push(Warning::ParabolaPoor);
            return Ok(Outcome::Brute);
        }
        c_hat = new_c;

        let r_squared = fit.r_squared(&xs, &ys, &ws);
        if r_squared > params.tol_r() {
            return Ok(Outcome::Converged {
                x: fit.minimum_x(),
                value: fit.minimum_value(),
            });
        }

        if (in_window as isize) < 2 * fit_range + 1 {
            match search.next_missing(c_hat, w_lo, w_hi) {
                Some(idx) => {
                    search.ensure(idx);
                    continue;
                }
                None => {
                    warnings.push(Warning::AllEvaluated);
                    return Ok(Outcome::Brute);
                }
            }
        }

        if r_squared > params.tol_r_2() {
            fit_range -= 1;
            if fit_range < min_fit_range {
                warnings.push(Warning::WeakMinimum);
                return Ok(Outcome::BestGridPoint);
            }
            continue;
        }

        warnings.push(Warning::ParabolaPoor);
        return Ok(Outcome::Brute);
    }
}

fn predicted_index(fit: &Parabola, s_min: isize) -> isize {
    (fit.minimum_x().round() as isize) - s_min
}

/// Optimize the shift for packed Y-matrices (one beam per row), evaluating
/// the beam-set R at each probed shift.
#[allow(clippy::too_many_arguments)]
pub fn r_pendry_v0r_opt_on_grid(
    range: (isize, isize),
    guesses: (isize, isize, isize),
    params: &V0rParams,
    y1: &Array2<f64>,
    y2: &Array2<f64>,
    start1: &[usize],
    start2: &[usize],
    len1: &[usize],
    len2: &[usize],
    e_step: f64,
) -> Result<V0rResult, RfError> {
    optimize_v0r_grid(range, guesses, params, |shift| {
        r_pendry_beamset_y(y1, y2, start1, start2, len1, len2, shift, e_step)
    })
}
