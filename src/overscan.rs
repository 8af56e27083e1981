//! Overscan bias correction, including the split fit for bias-jump backplanes.
//!
//! Every amplifier's serial overscan columns trail its data columns in
//! the raw frame and see the same bias drift. The corrector fits the
//! configured [`OverscanModel`](crate::primitives::OverscanModel) to the
//! overscan and subtracts the fitted level from the data region.
//!
//! Detectors read through a bias-jump backplane show a level step a fixed
//! number of rows from the readout corner. For those exposures the data
//! and overscan regions are cut at the same absolute row and the two
//! halves are fitted independently, so the step cannot drag a single fit
//! across the discontinuity.

use tracing::debug;

use crate::error::IsrError;
use crate::exposure::{Exposure, IsrStage};
use crate::geometry::{AmpRegion, DetectorGeometry, AABB};
use crate::primitives::{self, OverscanModel};
use crate::profile::BiasJumpConfig;

/// Applies overscan correction amp by amp.
#[derive(Debug, Clone)]
pub struct OverscanCorrector {
    model: OverscanModel,
    jump: Option<BiasJumpConfig>,
}

impl OverscanCorrector {
    pub fn new(model: OverscanModel, jump: Option<BiasJumpConfig>) -> Self {
        Self { model, jump }
    }

    /// Correct every amplifier of an exposure and mark the stage done.
    pub fn correct_detector(
        &self,
        exposure: &mut Exposure,
        detector: &DetectorGeometry,
    ) -> Result<(), IsrError> {
        for amp in detector.amps() {
            self.correct_amp(exposure, amp)?;
        }
        exposure.state.mark(IsrStage::Overscan);
        Ok(())
    }

    /// Correct a single amplifier. Does not touch the exposure's stage state.
    pub fn correct_amp(&self, exposure: &mut Exposure, amp: &AmpRegion) -> Result<(), IsrError> {
        let (rows, cols) = exposure.dim();
        if !amp.data.fits_within(rows, cols) || !amp.overscan.fits_within(rows, cols) {
            return Err(IsrError::GeometryOutOfBounds {
                amp: amp.id,
                rows,
                cols,
            });
        }

        let jump = self
            .jump
            .as_ref()
            .filter(|j| j.applies_to(exposure.info.backplane.as_deref()));
        let Some(jump) = jump else {
            return self.correct_region(exposure, &amp.data, &amp.overscan);
        };

        if !amp.overscan.same_rows(&amp.data) {
            return Err(IsrError::MisalignedOverscan { amp: amp.id });
        }
        let height = amp.data.height();
        if jump.offset == 0 || jump.offset >= height {
            return Err(IsrError::JumpOffsetOutOfRange {
                amp: amp.id,
                offset: jump.offset,
                height,
            });
        }

        // Offsets count from the readout corner: up from the bottom row for
        // lower-corner amps, down from the top row for upper-corner amps.
        let split_row = if amp.readout.on_bottom_edge() {
            amp.data.min_row + jump.offset
        } else {
            amp.data.max_row + 1 - jump.offset
        };
        debug!(
            "Splitting amp {} at row {} for the bias jump ({} rows from its readout corner)",
            amp.id, split_row, jump.offset
        );

        let (data_lower, data_upper) =
            amp.data
                .split_at_row(split_row)
                .ok_or(IsrError::JumpOffsetOutOfRange {
                    amp: amp.id,
                    offset: jump.offset,
                    height,
                })?;
        let (overscan_lower, overscan_upper) = amp
            .overscan
            .split_at_row(split_row)
            .ok_or(IsrError::MisalignedOverscan { amp: amp.id })?;

        self.correct_region(exposure, &data_lower, &overscan_lower)?;
        self.correct_region(exposure, &data_upper, &overscan_upper)
    }

    fn correct_region(
        &self,
        exposure: &mut Exposure,
        data: &AABB,
        overscan: &AABB,
    ) -> Result<(), IsrError> {
        let overscan_pixels = overscan.slice(&exposure.image).to_owned();
        primitives::overscan_correction(
            &self.model,
            data.slice_mut(&mut exposure.image),
            overscan_pixels.view(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposure::ExposureInfo;
    use crate::geometry::{Amp, AmpId, ReadoutCorner};
    use ndarray::Array2;

    fn bench_amp(readout: ReadoutCorner) -> AmpRegion {
        AmpRegion {
            id: AmpId::new(1, Amp::A),
            data: AABB::from_coords(0, 0, 7, 3),
            overscan: AABB::from_coords(0, 4, 7, 5),
            readout,
        }
    }

    fn bench_exposure(backplane: Option<&str>) -> Exposure {
        let mut info = ExposureInfo::new(1, 1);
        if let Some(id) = backplane {
            info = info.with_backplane(id);
        }
        let mut exposure = Exposure::new(Array2::zeros((8, 6)), info);
        exposure.image.fill(100.0);
        exposure
    }

    fn no_clip() -> OverscanModel {
        OverscanModel {
            fit: crate::primitives::OverscanFit::Median,
            sigma_clip: None,
        }
    }

    fn jump(offset: usize) -> BiasJumpConfig {
        BiasJumpConfig {
            backplanes: vec!["BKP5".to_string()],
            offset,
        }
    }

    fn fill_overscan_rows(
        exposure: &mut Exposure,
        amp: &AmpRegion,
        rows: std::ops::Range<usize>,
        value: f32,
    ) {
        let bbox = AABB::from_coords(
            rows.start,
            amp.overscan.min_col,
            rows.end - 1,
            amp.overscan.max_col,
        );
        bbox.slice_mut(&mut exposure.image).fill(value);
    }

    #[test]
    fn test_whole_region_fit_without_jump_config() {
        let amp = bench_amp(ReadoutCorner::LowerLeft);
        let corrector = OverscanCorrector::new(no_clip(), None);
        let mut exposure = bench_exposure(Some("BKP5"));
        fill_overscan_rows(&mut exposure, &amp, 0..8, 5.0);

        corrector.correct_amp(&mut exposure, &amp).unwrap();
        let data = amp.data.slice(&exposure.image);
        assert!(data.iter().all(|&v| (v - 95.0).abs() < 1e-6));
    }

    #[test]
    fn test_unlisted_backplane_uses_whole_region_fit() {
        let amp = bench_amp(ReadoutCorner::LowerLeft);
        let corrector = OverscanCorrector::new(no_clip(), Some(jump(3)));
        let mut exposure = bench_exposure(Some("BKP1"));
        fill_overscan_rows(&mut exposure, &amp, 0..4, 10.0);
        fill_overscan_rows(&mut exposure, &amp, 4..8, 20.0);

        corrector.correct_amp(&mut exposure, &amp).unwrap();
        // One fit across the whole region: median of eight 10s and eight 20s.
        let data = amp.data.slice(&exposure.image);
        assert!(data.iter().all(|&v| (v - 85.0).abs() < 1e-6));
    }

    #[test]
    fn test_split_fit_measures_offset_from_bottom_corner() {
        let amp = bench_amp(ReadoutCorner::LowerLeft);
        let corrector = OverscanCorrector::new(no_clip(), Some(jump(3)));
        let mut exposure = bench_exposure(Some("BKP5"));
        fill_overscan_rows(&mut exposure, &amp, 0..3, 10.0);
        fill_overscan_rows(&mut exposure, &amp, 3..8, 20.0);

        corrector.correct_amp(&mut exposure, &amp).unwrap();
        let data = amp.data.slice(&exposure.image);
        for (row, lane) in data.rows().into_iter().enumerate() {
            let expected = if row < 3 { 90.0 } else { 80.0 };
            assert!(lane.iter().all(|&v| (v - expected).abs() < 1e-6), "row {}", row);
        }
    }

    #[test]
    fn test_split_fit_measures_offset_from_top_corner() {
        let amp = bench_amp(ReadoutCorner::UpperRight);
        let corrector = OverscanCorrector::new(no_clip(), Some(jump(3)));
        let mut exposure = bench_exposure(Some("BKP5"));
        // Split row is 5: bottom part rows 0..5, top part rows 5..8.
        fill_overscan_rows(&mut exposure, &amp, 0..5, 10.0);
        fill_overscan_rows(&mut exposure, &amp, 5..8, 20.0);

        corrector.correct_amp(&mut exposure, &amp).unwrap();
        let data = amp.data.slice(&exposure.image);
        for (row, lane) in data.rows().into_iter().enumerate() {
            let expected = if row < 5 { 90.0 } else { 80.0 };
            assert!(lane.iter().all(|&v| (v - expected).abs() < 1e-6), "row {}", row);
        }
    }

    #[test]
    fn test_halves_are_corrected_independently() {
        let amp = bench_amp(ReadoutCorner::LowerLeft);
        let corrector = OverscanCorrector::new(no_clip(), Some(jump(3)));

        let mut baseline = bench_exposure(Some("BKP5"));
        fill_overscan_rows(&mut baseline, &amp, 0..3, 10.0);
        fill_overscan_rows(&mut baseline, &amp, 3..8, 20.0);
        corrector.correct_amp(&mut baseline, &amp).unwrap();

        // Same exposure but with the upper overscan perturbed.
        let mut perturbed = bench_exposure(Some("BKP5"));
        fill_overscan_rows(&mut perturbed, &amp, 0..3, 10.0);
        fill_overscan_rows(&mut perturbed, &amp, 3..8, 33.0);
        corrector.correct_amp(&mut perturbed, &amp).unwrap();

        let base = amp.data.slice(&baseline.image);
        let pert = amp.data.slice(&perturbed.image);
        for row in 0..3 {
            for col in 0..4 {
                assert_eq!(base[[row, col]], pert[[row, col]]);
            }
        }
        for row in 3..8 {
            for col in 0..4 {
                assert!((base[[row, col]] - pert[[row, col]]).abs() > 1.0);
            }
        }
    }

    #[test]
    fn test_jump_offset_must_fall_inside_amp() {
        let amp = bench_amp(ReadoutCorner::LowerLeft);
        let mut exposure = bench_exposure(Some("BKP5"));
        for offset in [0, 8, 20] {
            let corrector = OverscanCorrector::new(no_clip(), Some(jump(offset)));
            let err = corrector.correct_amp(&mut exposure, &amp).unwrap_err();
            assert!(
                matches!(err, IsrError::JumpOffsetOutOfRange { offset: o, height: 8, .. } if o == offset)
            );
        }
    }

    #[test]
    fn test_split_requires_aligned_overscan_rows() {
        let mut amp = bench_amp(ReadoutCorner::LowerLeft);
        amp.overscan = AABB::from_coords(1, 4, 7, 5);
        let corrector = OverscanCorrector::new(no_clip(), Some(jump(3)));
        let mut exposure = bench_exposure(Some("BKP5"));
        let err = corrector.correct_amp(&mut exposure, &amp).unwrap_err();
        assert!(matches!(err, IsrError::MisalignedOverscan { .. }));
    }

    #[test]
    fn test_region_outside_exposure_is_rejected() {
        let mut amp = bench_amp(ReadoutCorner::LowerLeft);
        amp.overscan = AABB::from_coords(0, 4, 7, 9);
        let corrector = OverscanCorrector::new(no_clip(), None);
        let mut exposure = bench_exposure(None);
        let err = corrector.correct_amp(&mut exposure, &amp).unwrap_err();
        assert!(matches!(err, IsrError::GeometryOutOfBounds { .. }));
    }

    #[test]
    fn test_correct_detector_marks_stage() {
        let layout = crate::profile::AmpLayout {
            data_width: 3,
            data_height: 6,
            overscan_width: 2,
        };
        let det = layout.detector_geometry(1);
        let mut exposure = Exposure::new(Array2::zeros(layout.raw_dim()), ExposureInfo::new(1, 1));
        let corrector = OverscanCorrector::new(no_clip(), None);

        assert!(!exposure.state.is_done(IsrStage::Overscan));
        corrector.correct_detector(&mut exposure, &det).unwrap();
        assert!(exposure.state.is_done(IsrStage::Overscan));
    }
}
