//! Camera-agnostic correction arithmetic.
//!
//! These functions operate on plain array views and know nothing about
//! amplifiers or cameras; the geometry-aware correctors slice the right
//! regions out of an exposure and hand them here.

use ndarray::{ArrayView2, ArrayViewMut2, Zip};
use serde::{Deserialize, Serialize};

use crate::error::IsrError;

/// How to reduce an overscan region to a bias level per data row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OverscanFit {
    /// One clipped median over the whole region.
    Median,
    /// A clipped median per row.
    MedianPerRow,
    /// A polynomial of the given order fitted to per-row medians.
    Polynomial { order: usize },
}

/// Overscan fit selection plus its clipping parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverscanModel {
    pub fit: OverscanFit,
    /// Reject overscan values more than this many standard deviations
    /// from the running median before fitting. `None` disables clipping.
    pub sigma_clip: Option<f32>,
}

impl Default for OverscanModel {
    fn default() -> Self {
        Self {
            fit: OverscanFit::Median,
            sigma_clip: Some(3.0),
        }
    }
}

/// How to normalize a flat field before dividing by it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FlatScaling {
    /// Divide by `flat / scale` for a caller-chosen scale.
    User(f32),
    /// Scale by the mean of the flat.
    Mean,
    /// Scale by the median of the flat.
    Median,
}

/// Subtract the bias level measured from `overscan` from `data` in place.
///
/// The two views must span the same rows; each data row is corrected
/// from the overscan pixels read through the same part of the serial
/// register.
pub fn overscan_correction(
    model: &OverscanModel,
    mut data: ArrayViewMut2<'_, f32>,
    overscan: ArrayView2<'_, f32>,
) -> Result<(), IsrError> {
    if overscan.is_empty() {
        return Err(IsrError::EmptyOverscan);
    }
    if overscan.nrows() != data.nrows() {
        return Err(IsrError::OverscanRowMismatch {
            overscan_rows: overscan.nrows(),
            data_rows: data.nrows(),
        });
    }

    match model.fit {
        OverscanFit::Median => {
            let values: Vec<f32> = finite_values(overscan.iter());
            let level = clipped_level(&values, model.sigma_clip).ok_or(IsrError::EmptyOverscan)?;
            data.mapv_inplace(|v| v - level);
        }
        OverscanFit::MedianPerRow => {
            for (mut data_row, overscan_row) in data.rows_mut().into_iter().zip(overscan.rows()) {
                let values: Vec<f32> = finite_values(overscan_row.iter());
                let level =
                    clipped_level(&values, model.sigma_clip).ok_or(IsrError::EmptyOverscan)?;
                data_row.mapv_inplace(|v| v - level);
            }
        }
        OverscanFit::Polynomial { order } => {
            let rows = overscan.nrows();
            if rows < order + 1 {
                return Err(IsrError::InsufficientOverscan { rows, order });
            }
            let mut levels = Vec::with_capacity(rows);
            for overscan_row in overscan.rows() {
                let values: Vec<f32> = finite_values(overscan_row.iter());
                let level =
                    clipped_level(&values, model.sigma_clip).ok_or(IsrError::EmptyOverscan)?;
                levels.push(f64::from(level));
            }
            let coefficients = polyfit(&levels, order)?;
            for (row, mut data_row) in data.rows_mut().into_iter().enumerate() {
                let fitted = polyval(&coefficients, row as f64) as f32;
                data_row.mapv_inplace(|v| v - fitted);
            }
        }
    }
    Ok(())
}

/// Subtract a bias image from `image` in place.
pub fn bias_subtraction(
    mut image: ArrayViewMut2<'_, f32>,
    bias: ArrayView2<'_, f32>,
) -> Result<(), IsrError> {
    check_shapes(&image.view(), &bias)?;
    Zip::from(&mut image).and(&bias).for_each(|v, &b| *v -= b);
    Ok(())
}

/// Divide `image` by a normalized flat field in place.
///
/// Each pixel becomes `image * scale / flat`, where `scale` comes from
/// the chosen [`FlatScaling`]. A scale that is zero, negative, or not
/// finite is rejected rather than silently corrupting the image.
/// Individual non-positive flat pixels produce non-finite output values;
/// flagging those is defect masking's job, not this function's.
pub fn flat_division(
    mut image: ArrayViewMut2<'_, f32>,
    flat: ArrayView2<'_, f32>,
    scaling: FlatScaling,
) -> Result<(), IsrError> {
    check_shapes(&image.view(), &flat)?;
    let scale = match scaling {
        FlatScaling::User(value) => value,
        FlatScaling::Mean => flat.mean().unwrap_or(f32::NAN),
        FlatScaling::Median => {
            let values: Vec<f32> = finite_values(flat.iter());
            median_of(&values).unwrap_or(f32::NAN)
        }
    };
    if !scale.is_finite() || scale <= 0.0 {
        return Err(IsrError::BadFlatScale(scale));
    }
    Zip::from(&mut image)
        .and(&flat)
        .for_each(|v, &f| *v = *v * scale / f);
    Ok(())
}

fn check_shapes(image: &ArrayView2<'_, f32>, other: &ArrayView2<'_, f32>) -> Result<(), IsrError> {
    if image.dim() != other.dim() {
        return Err(IsrError::ShapeMismatch {
            image_rows: image.nrows(),
            image_cols: image.ncols(),
            other_rows: other.nrows(),
            other_cols: other.ncols(),
        });
    }
    Ok(())
}

fn finite_values<'a>(values: impl Iterator<Item = &'a f32>) -> Vec<f32> {
    values.copied().filter(|v| v.is_finite()).collect()
}

fn median_of(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some(0.5 * (sorted[mid - 1] + sorted[mid]))
    } else {
        Some(sorted[mid])
    }
}

/// Median with iterative sigma clipping about the running median.
fn clipped_level(values: &[f32], sigma_clip: Option<f32>) -> Option<f32> {
    let mut level = median_of(values)?;
    let Some(clip) = sigma_clip else {
        return Some(level);
    };
    let mut kept = values.to_vec();
    for _ in 0..3 {
        let spread = (kept.iter().map(|v| (v - level).powi(2)).sum::<f32>() / kept.len() as f32)
            .sqrt();
        if spread == 0.0 {
            break;
        }
        let bound = clip * spread;
        let next: Vec<f32> = kept
            .iter()
            .copied()
            .filter(|v| (v - level).abs() <= bound)
            .collect();
        if next.len() == kept.len() || next.is_empty() {
            break;
        }
        kept = next;
        level = median_of(&kept)?;
    }
    Some(level)
}

/// Least-squares polynomial fit of `levels` against their row index.
///
/// Solves the normal equations by Gaussian elimination with partial
/// pivoting; the systems are tiny (order three or four at most in
/// practice) so this stays in plain `f64` arithmetic.
fn polyfit(levels: &[f64], order: usize) -> Result<Vec<f64>, IsrError> {
    let n = order + 1;
    let mut system = vec![vec![0.0f64; n + 1]; n];
    for (row, &level) in levels.iter().enumerate() {
        let x = row as f64;
        let mut powers = vec![1.0f64; 2 * order + 1];
        for p in 1..=2 * order {
            powers[p] = powers[p - 1] * x;
        }
        for j in 0..n {
            for k in 0..n {
                system[j][k] += powers[j + k];
            }
            system[j][n] += level * powers[j];
        }
    }

    for col in 0..n {
        let mut pivot = col;
        for row in col + 1..n {
            if system[row][col].abs() > system[pivot][col].abs() {
                pivot = row;
            }
        }
        if system[pivot][col].abs() < 1e-10 {
            return Err(IsrError::DegenerateFit { order });
        }
        system.swap(col, pivot);
        for row in col + 1..n {
            let factor = system[row][col] / system[col][col];
            for k in col..=n {
                system[row][k] -= factor * system[col][k];
            }
        }
    }

    let mut coefficients = vec![0.0f64; n];
    for row in (0..n).rev() {
        let mut value = system[row][n];
        for k in row + 1..n {
            value -= system[row][k] * coefficients[k];
        }
        coefficients[row] = value / system[row][row];
    }
    Ok(coefficients)
}

fn polyval(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}
