pub use crate::rfactor::beamset::{
    prepare_beams, prepare_beams_par, AveragingScheme, BeamSet, PreparedBeams, RfactorParams,
    SkipStages,
};
pub use crate::rfactor::engine::PendryRfactor;
pub use crate::rfactor::grid::UniformGrid;
pub use crate::rfactor::mathutils::{gradient, trapz_uniform};
pub use crate::rfactor::parabola::Parabola;
pub use crate::rfactor::pendry::{
    pendry_y, r_pendry_beam_y, r_pendry_beamset_y, r_pendry_beamset_y_par, r_pendry_beamtypes_y,
    BeamR, BeamSetR, BeamTypeR,
};
pub use crate::rfactor::spline::NaturalSpline;
pub use crate::rfactor::v0r::{
    optimize_v0r_grid, r_pendry_v0r_opt_on_grid, V0rParams, V0rResult,
};
pub use crate::rfactor::{GridError, PrepError, RfError, SplineError, V0rError, Warning};
