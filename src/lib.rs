//! Instrument signature removal for the Condor mosaic camera family.
//!
//! This crate is the camera-specific half of an image reduction
//! pipeline. It knows how the Condor wide-field imager and its smaller
//! siblings (Harrier, Kite) lay out their amplifiers, which readout
//! backplanes suffer a mid-frame bias jump, how crosstalk couples
//! amplifiers across the focal plane, and how to reconcile raw
//! exposures with calibration products whose edges were trimmed
//! upstream.
//!
//! The camera-agnostic arithmetic lives in [`primitives`]; camera
//! knowledge is plain data in [`profile`]; [`task::IsrTask`] runs the
//! stages in their required order: overscan, then crosstalk, then bias,
//! then flat.

pub mod crosstalk;
pub mod error;
pub mod exposure;
pub mod geometry;
pub mod overscan;
pub mod primitives;
pub mod profile;
pub mod synthetic;
pub mod task;
pub mod trim;

pub use crosstalk::{
    CrosstalkCorrector, CrosstalkSources, CrosstalkSummary, CrosstalkTable, NoSources,
    SourceUnavailable, TableError,
};
pub use error::IsrError;
pub use exposure::{Exposure, ExposureInfo, IsrStage, IsrState, MaskPlane};
pub use geometry::{Amp, AmpId, AmpRegion, CameraGeometry, DetectorGeometry, ReadoutCorner, AABB};
pub use overscan::OverscanCorrector;
pub use primitives::{FlatScaling, OverscanFit, OverscanModel};
pub use profile::{profiles, AmpLayout, BiasJumpConfig, CameraProfile};
pub use task::{Calibrations, IsrConfig, IsrReport, IsrTask};
pub use trim::{bias_correction, compute_edge_trim, flat_correction};
