//! In-memory exposures: pixel data, a bitmask plane, and correction state.

use ndarray::Array2;

use crate::geometry::AABB;

/// Named bits of the per-pixel mask.
///
/// Each plane occupies one bit of the `u16` mask image; a pixel may carry
/// any combination of planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskPlane {
    /// Defective pixel from the static bad pixel list.
    Bad = 0,
    /// Pixel at or above the saturation level.
    Saturated = 1,
    /// Value replaced by interpolation.
    Interpolated = 2,
    /// Border pixel left uncorrected by an edge-trimmed calibration.
    Edge = 3,
    /// Pixel whose value should not be fully trusted.
    Suspect = 4,
    /// Pixel with no usable data at all.
    NoData = 5,
}

impl MaskPlane {
    pub const fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// The corrections applied to an exposure, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsrStage {
    Overscan,
    Crosstalk,
    Bias,
    Flat,
}

/// Which correction stages have already run on an exposure.
///
/// Stages record completion here rather than in free-form metadata, so a
/// later stage can tell reliably whether its prerequisites ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IsrState {
    overscan: bool,
    crosstalk: bool,
    bias: bool,
    flat: bool,
}

impl IsrState {
    pub fn mark(&mut self, stage: IsrStage) {
        match stage {
            IsrStage::Overscan => self.overscan = true,
            IsrStage::Crosstalk => self.crosstalk = true,
            IsrStage::Bias => self.bias = true,
            IsrStage::Flat => self.flat = true,
        }
    }

    pub fn is_done(self, stage: IsrStage) -> bool {
        match stage {
            IsrStage::Overscan => self.overscan,
            IsrStage::Crosstalk => self.crosstalk,
            IsrStage::Bias => self.bias,
            IsrStage::Flat => self.flat,
        }
    }
}

/// Observation metadata that travels with an exposure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureInfo {
    /// Detector number within the focal plane.
    pub detector: u32,
    /// Observation the exposure belongs to.
    pub visit: u64,
    /// Readout backplane identifier, when the camera reports one.
    pub backplane: Option<String>,
    /// Free-form processing notes, oldest first.
    pub history: Vec<String>,
}

impl ExposureInfo {
    pub fn new(detector: u32, visit: u64) -> Self {
        Self {
            detector,
            visit,
            backplane: None,
            history: Vec::new(),
        }
    }

    pub fn with_backplane(mut self, backplane: impl Into<String>) -> Self {
        self.backplane = Some(backplane.into());
        self
    }
}

/// A single detector's image with its mask and correction state.
///
/// The image holds raw counts as `f32` so corrections can subtract and
/// divide in place without round-tripping through integer pixels. The
/// mask is a parallel bit image (see [`MaskPlane`]).
#[derive(Debug, Clone)]
pub struct Exposure {
    pub image: Array2<f32>,
    pub mask: Array2<u16>,
    pub info: ExposureInfo,
    pub state: IsrState,
}

impl Exposure {
    /// Wrap an already-floating image with a clear mask and no corrections done.
    pub fn new(image: Array2<f32>, info: ExposureInfo) -> Self {
        let mask = Array2::zeros(image.dim());
        Self {
            image,
            mask,
            info,
            state: IsrState::default(),
        }
    }

    /// Convert integer counts straight off the readout electronics.
    pub fn from_raw(raw: &Array2<u16>, info: ExposureInfo) -> Self {
        Self::new(raw.mapv(f32::from), info)
    }

    /// (rows, columns) of the image.
    pub fn dim(&self) -> (usize, usize) {
        self.image.dim()
    }

    /// Set `plane` on every pixel outside `inner`.
    ///
    /// A box covering the whole image marks nothing.
    pub fn mark_outside(&mut self, inner: &AABB, plane: MaskPlane) {
        let bit = plane.bit();
        for ((row, col), value) in self.mask.indexed_iter_mut() {
            if !inner.contains_point(row, col) {
                *value |= bit;
            }
        }
    }

    pub fn mask_has(&self, row: usize, col: usize, plane: MaskPlane) -> bool {
        self.mask[[row, col]] & plane.bit() != 0
    }

    pub fn push_history(&mut self, note: impl Into<String>) {
        self.info.history.push(note.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_mask_plane_bits_are_distinct() {
        let planes = [
            MaskPlane::Bad,
            MaskPlane::Saturated,
            MaskPlane::Interpolated,
            MaskPlane::Edge,
            MaskPlane::Suspect,
            MaskPlane::NoData,
        ];
        let mut seen = 0u16;
        for plane in planes {
            assert_eq!(seen & plane.bit(), 0);
            seen |= plane.bit();
        }
        assert_eq!(seen.count_ones(), planes.len() as u32);
    }

    #[test]
    fn test_state_starts_clear_and_marks() {
        let mut state = IsrState::default();
        for stage in [
            IsrStage::Overscan,
            IsrStage::Crosstalk,
            IsrStage::Bias,
            IsrStage::Flat,
        ] {
            assert!(!state.is_done(stage));
        }
        state.mark(IsrStage::Overscan);
        assert!(state.is_done(IsrStage::Overscan));
        assert!(!state.is_done(IsrStage::Bias));
    }

    #[test]
    fn test_from_raw_converts_counts() {
        let raw = Array2::from_elem((2, 3), 1200u16);
        let exposure = Exposure::from_raw(&raw, ExposureInfo::new(7, 99));
        assert_eq!(exposure.dim(), (2, 3));
        assert_eq!(exposure.image[[1, 2]], 1200.0);
        assert_eq!(exposure.mask[[1, 2]], 0);
        assert_eq!(exposure.info.detector, 7);
        assert_eq!(exposure.info.visit, 99);
    }

    #[test]
    fn test_mark_outside_leaves_interior_clear() {
        let mut exposure = Exposure::new(Array2::zeros((6, 6)), ExposureInfo::new(1, 1));
        let inner = AABB::from_coords(1, 1, 4, 4);
        exposure.mark_outside(&inner, MaskPlane::Edge);

        assert!(exposure.mask_has(0, 0, MaskPlane::Edge));
        assert!(exposure.mask_has(5, 5, MaskPlane::Edge));
        assert!(exposure.mask_has(0, 3, MaskPlane::Edge));
        assert!(!exposure.mask_has(1, 1, MaskPlane::Edge));
        assert!(!exposure.mask_has(3, 2, MaskPlane::Edge));
        assert!(!exposure.mask_has(0, 0, MaskPlane::Bad));
    }

    #[test]
    fn test_mark_outside_full_box_marks_nothing() {
        let mut exposure = Exposure::new(Array2::zeros((4, 4)), ExposureInfo::new(1, 1));
        let full = AABB::from_coords(0, 0, 3, 3);
        exposure.mark_outside(&full, MaskPlane::Edge);
        assert!(exposure.mask.iter().all(|&m| m == 0));
    }

    #[test]
    fn test_backplane_builder() {
        let info = ExposureInfo::new(2, 5).with_backplane("BKP3");
        assert_eq!(info.backplane.as_deref(), Some("BKP3"));
    }
}
