//! High-level R-factor calculation object.
//!
//! [`PendryRfactor`] bundles the two beam sets, the output grid and the
//! parameter records, runs the preparation pipeline once and then serves
//! any number of R evaluations and V0r optimizations against the cached
//! prepared curves.

use serde::{Deserialize, Serialize};

use super::beamset::{
    prepare_beams, prepare_beams_par, AveragingScheme, BeamSet, PreparedBeams, RfactorParams,
};
use super::errors::PrepError;
use super::grid::UniformGrid;
use super::pendry::{r_pendry_beamset_y, BeamSetR};
use super::v0r::{optimize_v0r_grid, V0rParams, V0rResult};
use super::RfError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendryRfactor {
    pub experiment: Option<BeamSet>,
    pub theory: Option<BeamSet>,
    pub grid: Option<UniformGrid>,
    /// Averaging of the experimental beams; identity when unset.
    pub experiment_scheme: Option<AveragingScheme>,
    /// Averaging of the theoretical beams; identity when unset.
    pub theory_scheme: Option<AveragingScheme>,
    pub params: RfactorParams,
    pub v0r_params: V0rParams,
    pub prepared_experiment: Option<PreparedBeams>,
    pub prepared_theory: Option<PreparedBeams>,
}

impl PendryRfactor {
    pub fn new() -> PendryRfactor {
        PendryRfactor::default()
    }

    pub fn set_experiment(&mut self, beams: BeamSet) -> &mut Self {
        self.experiment = Some(beams);
        self.prepared_experiment = None;
        self
    }

    pub fn set_theory(&mut self, beams: BeamSet) -> &mut Self {
        self.theory = Some(beams);
        self.prepared_theory = None;
        self
    }

    pub fn set_grid(&mut self, grid: UniformGrid) -> &mut Self {
        self.grid = Some(grid);
        self.prepared_experiment = None;
        self.prepared_theory = None;
        self
    }

    pub fn set_experiment_scheme(&mut self, scheme: AveragingScheme) -> &mut Self {
        self.experiment_scheme = Some(scheme);
        self.prepared_experiment = None;
        self
    }

    pub fn set_theory_scheme(&mut self, scheme: AveragingScheme) -> &mut Self {
        self.theory_scheme = Some(scheme);
        self.prepared_theory = None;
        self
    }

    pub fn set_params(&mut self, params: RfactorParams) -> &mut Self {
        self.params = params;
        self.prepared_experiment = None;
        self.prepared_theory = None;
        self
    }

    pub fn set_v0r_params(&mut self, v0r_params: V0rParams) -> &mut Self {
        self.v0r_params = v0r_params;
        self
    }

    /// Run the preparation pipeline on both beam sets.
    pub fn prepare(&mut self) -> Result<&mut Self, RfError> {
        self.prepare_impl(false)
    }

    /// Parallel variant of [`PendryRfactor::prepare`].
    pub fn prepare_par(&mut self) -> Result<&mut Self, RfError> {
        self.prepare_impl(true)
    }

    fn prepare_impl(&mut self, parallel: bool) -> Result<&mut Self, RfError> {
        let experiment = self.experiment.as_ref().ok_or_else(|| missing("experiment"))?;
        let theory = self.theory.as_ref().ok_or_else(|| missing("theory"))?;
        let grid = self.grid.as_ref().ok_or_else(|| missing("grid"))?;

        let experiment_scheme = self
            .experiment_scheme
            .clone()
            .unwrap_or_else(|| AveragingScheme::identity(experiment.n_beams()));
        let theory_scheme = self
            .theory_scheme
            .clone()
            .unwrap_or_else(|| AveragingScheme::identity(theory.n_beams()));

        type PrepareFn = fn(
            &BeamSet,
            &AveragingScheme,
            &UniformGrid,
            &RfactorParams,
        ) -> Result<PreparedBeams, RfError>;
        let run: PrepareFn = if parallel {
            prepare_beams_par
        } else {
            prepare_beams
        };
        self.prepared_experiment = Some(run(experiment, &experiment_scheme, grid, &self.params)?);
        self.prepared_theory = Some(run(theory, &theory_scheme, grid, &self.params)?);

        Ok(self)
    }

    fn prepared(&self) -> Result<(&PreparedBeams, &PreparedBeams), RfError> {
        let experiment = self
            .prepared_experiment
            .as_ref()
            .ok_or_else(|| missing("prepared experiment"))?;
        let theory = self
            .prepared_theory
            .as_ref()
            .ok_or_else(|| missing("prepared theory"))?;
        experiment.check_compatible(theory)?;
        Ok((experiment, theory))
    }

    /// Beam-set R at a fixed shift of the theory against the experiment.
    pub fn r_at_shift(&self, shift: isize) -> Result<BeamSetR, RfError> {
        let (experiment, theory) = self.prepared()?;
        experiment.r_against(theory, shift)
    }

    /// Optimize the inner-potential shift over `[range.0, range.1]`.
    pub fn optimize_v0r(
        &self,
        range: (isize, isize),
        guesses: (isize, isize, isize),
    ) -> Result<V0rResult, RfError> {
        let (experiment, theory) = self.prepared()?;
        let e_step = experiment.grid().step();
        optimize_v0r_grid(range, guesses, &self.v0r_params, |shift| {
            r_pendry_beamset_y(
                experiment.y(),
                theory.y(),
                experiment.start(),
                theory.start(),
                experiment.length(),
                theory.length(),
                shift,
                e_step,
            )
        })
    }
}

fn missing(field: &str) -> RfError {
    PrepError::MissingInput {
        field: field.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rfactor::tests::TEST_TOL;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};

    fn bump(e: f64) -> f64 {
        2.0 + 3.0 * (-((e - 75.0) / 6.0).powi(2) / 2.0).exp()
    }

    fn beam_set(f: impl Fn(f64) -> f64) -> BeamSet {
        let e: Array1<f64> = (0..101).map(|i| 50.0 + 0.5 * i as f64).collect();
        let mut i = Array2::zeros((1, 101));
        for (k, &ek) in e.iter().enumerate() {
            i[(0, k)] = f(ek);
        }
        BeamSet::new(e, i).unwrap()
    }

    fn grid_50_100() -> UniformGrid {
        UniformGrid::new(50.0, 0.5, 101).unwrap()
    }

    #[test]
    fn test_identical_sets_give_zero_r() {
        let mut calc = PendryRfactor::new();
        calc.set_experiment(beam_set(bump))
            .set_theory(beam_set(bump))
            .set_grid(grid_50_100());
        calc.prepare().unwrap();

        let out = calc.r_at_shift(0).unwrap();
        assert_abs_diff_eq!(out.r_total, 0.0, epsilon = TEST_TOL);
        assert_eq!(out.beams[0].n_overlap, 101);
    }

    #[test]
    fn test_optimizer_recovers_rigid_shift() {
        // the theory curve sits two eV above the experiment, four grid steps
        let mut calc = PendryRfactor::new();
        calc.set_experiment(beam_set(bump))
            .set_theory(beam_set(|e| bump(e + 2.0)))
            .set_grid(grid_50_100());
        calc.prepare().unwrap();

        let result = calc.optimize_v0r((-10, 10), (-5, 0, 5)).unwrap();
        assert_eq!(result.best_shift, 4);
        assert!(result.best_r <= 1e-6);
    }

    #[test]
    fn test_missing_input_is_reported() {
        let mut calc = PendryRfactor::new();
        let err = calc.prepare();
        assert!(matches!(
            err,
            Err(RfError::Prep(PrepError::MissingInput { .. }))
        ));
        let err = calc.r_at_shift(0);
        assert!(matches!(
            err,
            Err(RfError::Prep(PrepError::MissingInput { .. }))
        ));
    }

    #[test]
    fn test_parallel_preparation_matches_sequential() {
        let mut seq = PendryRfactor::new();
        seq.set_experiment(beam_set(bump))
            .set_theory(beam_set(|e| bump(e - 1.0)))
            .set_grid(grid_50_100());
        let mut par = seq.clone();

        seq.prepare().unwrap();
        par.prepare_par().unwrap();
        assert_eq!(seq.prepared_experiment, par.prepared_experiment);
        assert_eq!(seq.prepared_theory, par.prepared_theory);
    }

    #[test]
    fn test_params_round_trip_through_serde() {
        let mut calc = PendryRfactor::new();
        calc.params.set_v0i(4.5);
        calc.v0r_params.set_fit_range(8).set_tol_r(0.9);

        let text = serde_json::to_string(&calc).unwrap();
        let back: PendryRfactor = serde_json::from_str(&text).unwrap();
        assert_eq!(calc, back);
        assert_abs_diff_eq!(back.params.v0i(), 4.5, epsilon = TEST_TOL);
        assert_eq!(back.v0r_params.fit_range(), 8);
    }
}
