//! Bias and flat correction against edge-trimmed calibration products.
//!
//! Some cameras ship calibration products with a uniform border of edge
//! pixels already cut off, so a raw exposure and its bias or flat do not
//! share dimensions. The reconciliation is purely geometric: the size
//! difference must be the same in y and x and even, and then the
//! calibration is applied to the centered inner region of the raw while
//! the border is flagged with the [`MaskPlane::Edge`] bit.

use tracing::debug;

use crate::error::IsrError;
use crate::exposure::{Exposure, IsrStage, MaskPlane};
use crate::geometry::AABB;
use crate::primitives::{self, FlatScaling};

/// Per-edge trim implied by a raw/calibration size difference.
///
/// Returns 0 when the dimensions already agree.
///
/// ```
/// use mosaic_isr::trim::compute_edge_trim;
/// assert_eq!(compute_edge_trim((100, 200), (90, 190)).unwrap(), 5);
/// assert_eq!(compute_edge_trim((100, 200), (100, 200)).unwrap(), 0);
/// ```
pub fn compute_edge_trim(raw: (usize, usize), calib: (usize, usize)) -> Result<usize, IsrError> {
    let (raw_rows, raw_cols) = raw;
    let (calib_rows, calib_cols) = calib;
    if calib_rows > raw_rows || calib_cols > raw_cols {
        return Err(IsrError::CalibLargerThanRaw {
            raw_rows,
            raw_cols,
            calib_rows,
            calib_cols,
        });
    }
    let row_diff = raw_rows - calib_rows;
    let col_diff = raw_cols - calib_cols;
    if row_diff != col_diff {
        return Err(IsrError::TrimAxesUnequal {
            raw_rows,
            raw_cols,
            calib_rows,
            calib_cols,
        });
    }
    if row_diff % 2 != 0 {
        return Err(IsrError::TrimUneven {
            difference: row_diff,
        });
    }
    Ok(row_diff / 2)
}

/// Subtract a (possibly trimmed) bias product from an exposure.
///
/// On success the exposure's bias stage is marked done and the trim
/// width is returned. A nonzero trim on a camera whose calibrations are
/// not supposed to be trimmed is rejected.
pub fn bias_correction(
    exposure: &mut Exposure,
    bias: &Exposure,
    trimmed_calibs: bool,
) -> Result<usize, IsrError> {
    let (n_edge, inner) = reconcile(exposure, bias, trimmed_calibs)?;
    primitives::bias_subtraction(inner.slice_mut(&mut exposure.image), bias.image.view())?;
    exposure.mark_outside(&inner, MaskPlane::Edge);
    exposure.state.mark(IsrStage::Bias);
    debug!(
        "Bias subtracted over {}x{} inner region (edge trim {})",
        inner.height(),
        inner.width(),
        n_edge
    );
    Ok(n_edge)
}

/// Divide an exposure by a (possibly trimmed) flat product.
pub fn flat_correction(
    exposure: &mut Exposure,
    flat: &Exposure,
    scaling: FlatScaling,
    trimmed_calibs: bool,
) -> Result<usize, IsrError> {
    let (n_edge, inner) = reconcile(exposure, flat, trimmed_calibs)?;
    primitives::flat_division(
        inner.slice_mut(&mut exposure.image),
        flat.image.view(),
        scaling,
    )?;
    exposure.mark_outside(&inner, MaskPlane::Edge);
    exposure.state.mark(IsrStage::Flat);
    debug!(
        "Flat divided over {}x{} inner region (edge trim {})",
        inner.height(),
        inner.width(),
        n_edge
    );
    Ok(n_edge)
}

fn reconcile(
    exposure: &Exposure,
    calib: &Exposure,
    trimmed_calibs: bool,
) -> Result<(usize, AABB), IsrError> {
    if exposure.image.is_empty() || calib.image.is_empty() {
        return Err(IsrError::EmptyExposure);
    }
    let n_edge = compute_edge_trim(exposure.dim(), calib.dim())?;
    if n_edge > 0 && !trimmed_calibs {
        return Err(IsrError::UnexpectedTrim { n_edge });
    }
    let (rows, cols) = exposure.dim();
    let inner = AABB::from_coords(n_edge, n_edge, rows - 1 - n_edge, cols - 1 - n_edge);
    Ok((n_edge, inner))
}
