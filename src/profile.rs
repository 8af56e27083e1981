//! Camera profiles: everything that differs between supported cameras.
//!
//! The correction code itself is camera-agnostic. A [`CameraProfile`]
//! bundles the per-camera facts (detector count, amplifier layout,
//! coefficient key prefix, bias-jump behavior, whether calibration
//! products ship pre-trimmed) so that supporting a camera means writing
//! a profile, not new correction code. Profiles serialize to JSON and
//! the known cameras are available as statics in [`profiles`].

use std::io;
use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::geometry::{
    Amp, AmpId, AmpRegion, CameraGeometry, DetectorGeometry, ReadoutCorner, AABB,
};

/// Per-amplifier pixel layout shared by every detector of a camera.
///
/// A raw frame packs the two amplifier data regions side by side, A in
/// the left half and B in the right, followed by the two serial overscan
/// regions in the same order. Amp A reads out from the lower-left corner
/// of the frame, amp B from the upper-right.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmpLayout {
    /// Data columns per amplifier.
    pub data_width: usize,
    /// Data rows per amplifier.
    pub data_height: usize,
    /// Serial overscan columns per amplifier.
    pub overscan_width: usize,
}

impl AmpLayout {
    /// (rows, columns) of a full raw frame in this layout.
    pub fn raw_dim(&self) -> (usize, usize) {
        (
            self.data_height,
            2 * self.data_width + 2 * self.overscan_width,
        )
    }

    /// Amplifier regions for one detector in this layout.
    pub fn detector_geometry(&self, detector: u32) -> DetectorGeometry {
        assert!(
            self.data_width > 0 && self.data_height > 0 && self.overscan_width > 0,
            "amp layout must have positive dimensions"
        );
        let width = self.data_width;
        let top = self.data_height - 1;
        let overscan_start = 2 * width;
        let amp_a = AmpRegion {
            id: AmpId::new(detector, Amp::A),
            data: AABB::from_coords(0, 0, top, width - 1),
            overscan: AABB::from_coords(
                0,
                overscan_start,
                top,
                overscan_start + self.overscan_width - 1,
            ),
            readout: ReadoutCorner::LowerLeft,
        };
        let amp_b = AmpRegion {
            id: AmpId::new(detector, Amp::B),
            data: AABB::from_coords(0, width, top, 2 * width - 1),
            overscan: AABB::from_coords(
                0,
                overscan_start + self.overscan_width,
                top,
                overscan_start + 2 * self.overscan_width - 1,
            ),
            readout: ReadoutCorner::UpperRight,
        };
        DetectorGeometry::new(detector, vec![amp_a, amp_b])
    }
}

/// Mid-frame bias level discontinuity on certain readout backplanes.
///
/// Affected backplanes show a bias step a fixed number of rows from each
/// amplifier's readout corner. Exposures read through one of the listed
/// backplanes get their overscan fitted separately on each side of the
/// step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiasJumpConfig {
    /// Backplane identifiers that exhibit the jump.
    pub backplanes: Vec<String>,
    /// Rows from the readout corner to the discontinuity.
    pub offset: usize,
}

impl BiasJumpConfig {
    /// Whether an exposure read through `backplane` needs the split fit.
    pub fn applies_to(&self, backplane: Option<&str>) -> bool {
        backplane.is_some_and(|id| self.backplanes.iter().any(|b| b == id))
    }
}

/// Static description of one supported camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraProfile {
    /// Short lowercase camera name.
    pub name: String,
    /// Detector numbers present on the focal plane.
    pub detectors: Vec<u32>,
    pub amp_layout: AmpLayout,
    /// Length of the instrument prefix on coefficient-file amplifier codes.
    pub key_prefix_len: usize,
    /// Bias-jump handling, for cameras that need it.
    pub bias_jump: Option<BiasJumpConfig>,
    /// Whether this camera's calibration products ship with their edge
    /// pixels already trimmed off.
    pub trimmed_calibs: bool,
}

impl CameraProfile {
    /// Build the full focal plane geometry from the layout.
    pub fn geometry(&self) -> CameraGeometry {
        CameraGeometry::from_detectors(
            self.detectors
                .iter()
                .map(|&det| self.amp_layout.detector_geometry(det))
                .collect(),
        )
    }

    /// (rows, columns) of a raw frame from this camera.
    pub fn raw_dim(&self) -> (usize, usize) {
        self.amp_layout.raw_dim()
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Profiles for the cameras this crate knows about.
pub mod profiles {
    use super::*;

    /// Condor: the 62-detector wide-field mosaic imager.
    ///
    /// Detectors read through backplanes BKP3 and BKP5 show a bias step
    /// 2098 rows from the readout corner. Calibration products for this
    /// camera are assembled and edge-trimmed upstream.
    pub static CONDOR: Lazy<CameraProfile> = Lazy::new(|| CameraProfile {
        name: "condor".to_string(),
        detectors: (1..=62).collect(),
        amp_layout: AmpLayout {
            data_width: 1024,
            data_height: 4096,
            overscan_width: 56,
        },
        key_prefix_len: 3,
        bias_jump: Some(BiasJumpConfig {
            backplanes: vec!["BKP3".to_string(), "BKP5".to_string()],
            offset: 2098,
        }),
        trimmed_calibs: true,
    });

    /// Harrier: the retired 8-detector survey camera.
    pub static HARRIER: Lazy<CameraProfile> = Lazy::new(|| CameraProfile {
        name: "harrier".to_string(),
        detectors: (1..=8).collect(),
        amp_layout: AmpLayout {
            data_width: 1024,
            data_height: 2048,
            overscan_width: 32,
        },
        key_prefix_len: 3,
        bias_jump: None,
        trimmed_calibs: false,
    });

    /// Kite: the 4-detector test-bench camera.
    pub static KITE: Lazy<CameraProfile> = Lazy::new(|| CameraProfile {
        name: "kite".to_string(),
        detectors: (1..=4).collect(),
        amp_layout: AmpLayout {
            data_width: 512,
            data_height: 1024,
            overscan_width: 24,
        },
        key_prefix_len: 2,
        bias_jump: None,
        trimmed_calibs: false,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condor_layout_dimensions() {
        let condor = &profiles::CONDOR;
        assert_eq!(condor.detectors.len(), 62);
        assert_eq!(condor.raw_dim(), (4096, 2160));

        let geometry = condor.geometry();
        let det = geometry.detector(1).unwrap();
        let amp_a = det.amp(Amp::A).unwrap();
        let amp_b = det.amp(Amp::B).unwrap();

        assert_eq!(amp_a.data, AABB::from_coords(0, 0, 4095, 1023));
        assert_eq!(amp_b.data, AABB::from_coords(0, 1024, 4095, 2047));
        assert_eq!(amp_a.overscan, AABB::from_coords(0, 2048, 4095, 2103));
        assert_eq!(amp_b.overscan, AABB::from_coords(0, 2104, 4095, 2159));
        assert_eq!(amp_a.readout, ReadoutCorner::LowerLeft);
        assert_eq!(amp_b.readout, ReadoutCorner::UpperRight);
    }

    #[test]
    fn test_amp_regions_tile_the_raw_frame() {
        for profile in [&profiles::CONDOR, &profiles::HARRIER, &profiles::KITE] {
            let (rows, cols) = profile.raw_dim();
            let det = profile.amp_layout.detector_geometry(1);
            let mut covered = 0usize;
            for amp in det.amps() {
                assert!(amp.data.fits_within(rows, cols));
                assert!(amp.overscan.fits_within(rows, cols));
                assert!(amp.overscan.same_rows(&amp.data));
                covered += amp.data.height() * amp.data.width();
                covered += amp.overscan.height() * amp.overscan.width();
            }
            assert_eq!(covered, rows * cols);
        }
    }

    #[test]
    fn test_bias_jump_only_on_listed_backplanes() {
        let jump = profiles::CONDOR.bias_jump.as_ref().unwrap();
        assert_eq!(jump.offset, 2098);
        assert!(jump.applies_to(Some("BKP3")));
        assert!(jump.applies_to(Some("BKP5")));
        assert!(!jump.applies_to(Some("BKP4")));
        assert!(!jump.applies_to(None));
    }

    #[test]
    fn test_sibling_cameras_have_no_jump() {
        assert!(profiles::HARRIER.bias_jump.is_none());
        assert!(profiles::KITE.bias_jump.is_none());
        assert!(!profiles::HARRIER.trimmed_calibs);
        assert_eq!(profiles::KITE.key_prefix_len, 2);
    }

    #[test]
    fn test_profile_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("condor.json");
        profiles::CONDOR.save_to_file(&path).unwrap();
        let loaded = CameraProfile::load_from_file(&path).unwrap();
        assert_eq!(loaded, *profiles::CONDOR);
    }
}
