//! Synthetic frames with known signatures, for tests and bench scripts.

use ndarray::Array2;

use crate::exposure::{Exposure, ExposureInfo};
use crate::geometry::DetectorGeometry;
use crate::profile::CameraProfile;

pub fn constant_frame(rows: usize, cols: usize, value: f32) -> Array2<f32> {
    Array2::from_elem((rows, cols), value)
}

/// Frame whose rows ramp linearly from `bottom` at row 0 to `top` at the
/// last row.
pub fn vertical_gradient(rows: usize, cols: usize, bottom: f32, top: f32) -> Array2<f32> {
    let step = if rows > 1 {
        (top - bottom) / (rows - 1) as f32
    } else {
        0.0
    };
    Array2::from_shape_fn((rows, cols), |(row, _)| bottom + step * row as f32)
}

/// Frame of the given size with every amp's data region at `data_level`
/// and every overscan region at `overscan_level`. Pixels outside any
/// amp region stay zero.
pub fn detector_frame(
    dim: (usize, usize),
    detector: &DetectorGeometry,
    data_level: f32,
    overscan_level: f32,
) -> Array2<f32> {
    let mut frame = Array2::zeros(dim);
    for amp in detector.amps() {
        amp.data.slice_mut(&mut frame).fill(data_level);
        amp.overscan.slice_mut(&mut frame).fill(overscan_level);
    }
    frame
}

/// Uncorrected exposure for one detector of a camera, with flat data and
/// overscan levels.
pub fn raw_exposure(
    profile: &CameraProfile,
    detector: u32,
    data_level: f32,
    overscan_level: f32,
) -> Exposure {
    let geometry = profile.amp_layout.detector_geometry(detector);
    let frame = detector_frame(profile.raw_dim(), &geometry, data_level, overscan_level);
    Exposure::new(frame, ExposureInfo::new(detector, 1))
}
