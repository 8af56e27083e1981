use thiserror::Error;

use crate::crosstalk::TableError;
use crate::geometry::AmpId;

/// Errors raised while removing the instrument signature from an exposure.
///
/// Every variant here is a hard failure: the exposure cannot be corrected
/// and the caller should not look at partially corrected pixels. Recoverable
/// conditions (an absent crosstalk source, an exposure arriving out of
/// order) are logged and handled in place instead of surfacing here.
#[derive(Error, Debug)]
pub enum IsrError {
    /// The exposure (or a calibration product) has no pixels at all.
    #[error("exposure image is empty")]
    EmptyExposure,

    /// The camera geometry has no entry for the exposure's detector.
    #[error("no geometry for detector {0}")]
    UnknownDetector(u32),

    /// A crosstalk edge names an amplifier the camera geometry does not know.
    #[error("no geometry for amplifier {0}")]
    UnknownAmp(AmpId),

    /// An amplifier's region does not fit inside the exposure it should describe.
    #[error("amp {amp} region extends beyond the {rows}x{cols} exposure")]
    GeometryOutOfBounds { amp: AmpId, rows: usize, cols: usize },

    /// The coefficient table lists a source for a victim but holds no value for it.
    ///
    /// The field is `source_amp` rather than `source` because thiserror
    /// reserves the latter name for an error cause.
    #[error("no coefficient recorded for victim {victim} source {source_amp}")]
    MissingCoefficient { victim: AmpId, source_amp: AmpId },

    /// Victim and source data regions must be congruent for a pixelwise subtraction.
    #[error(
        "victim {victim} data region is {victim_rows}x{victim_cols} \
         but source {source_amp} is {source_rows}x{source_cols}"
    )]
    RegionShapeMismatch {
        victim: AmpId,
        victim_rows: usize,
        victim_cols: usize,
        source_amp: AmpId,
        source_rows: usize,
        source_cols: usize,
    },

    /// Crosstalk correction was requested without a coefficient table.
    #[error("crosstalk correction requested without a coefficient file")]
    CrosstalkNotConfigured,

    /// An overscan region resolved to zero usable pixels.
    #[error("overscan region is empty")]
    EmptyOverscan,

    /// Overscan and data regions must cover the same rows.
    #[error("overscan spans {overscan_rows} rows but the data region spans {data_rows}")]
    OverscanRowMismatch { overscan_rows: usize, data_rows: usize },

    /// Too few overscan rows to constrain the requested polynomial.
    #[error("{rows} overscan rows cannot constrain a polynomial of order {order}")]
    InsufficientOverscan { rows: usize, order: usize },

    /// The polynomial fit produced a singular system.
    #[error("overscan polynomial fit of order {order} is degenerate")]
    DegenerateFit { order: usize },

    /// A bias-jump split offset must fall strictly inside the amp's rows.
    #[error("bias jump offset {offset} does not fall inside amp {amp} ({height} data rows)")]
    JumpOffsetOutOfRange { amp: AmpId, offset: usize, height: usize },

    /// Splitting an amp requires its overscan rows to line up with its data rows.
    #[error("overscan rows of amp {amp} are not aligned with its data rows")]
    MisalignedOverscan { amp: AmpId },

    /// Raw and calibration dimensions differ by unequal amounts in y and x.
    #[error(
        "raw exposure {raw_rows}x{raw_cols} and calibration {calib_rows}x{calib_cols} \
         are trimmed by different amounts in y and x"
    )]
    TrimAxesUnequal {
        raw_rows: usize,
        raw_cols: usize,
        calib_rows: usize,
        calib_cols: usize,
    },

    /// The raw/calibration size difference cannot be split over two edges.
    #[error("raw/calibration dimension difference {difference} is odd")]
    TrimUneven { difference: usize },

    /// A calibration product may never be larger than the raw it corrects.
    #[error(
        "calibration product {calib_rows}x{calib_cols} is larger than \
         the raw exposure {raw_rows}x{raw_cols}"
    )]
    CalibLargerThanRaw {
        raw_rows: usize,
        raw_cols: usize,
        calib_rows: usize,
        calib_cols: usize,
    },

    /// Calibration dimensions disagree with the raw on a camera whose
    /// calibration products are not edge-trimmed.
    #[error(
        "calibration product is trimmed by {n_edge} pixels \
         but this camera does not ship trimmed calibrations"
    )]
    UnexpectedTrim { n_edge: usize },

    /// An image and the array correcting it must share dimensions.
    #[error("image is {image_rows}x{image_cols} but the correction array is {other_rows}x{other_cols}")]
    ShapeMismatch {
        image_rows: usize,
        image_cols: usize,
        other_rows: usize,
        other_cols: usize,
    },

    /// Flat scaling resolved to a value that cannot divide an image.
    #[error("flat scaling value {0} is not a positive finite number")]
    BadFlatScale(f32),

    /// The crosstalk coefficient file could not be read or parsed.
    #[error(transparent)]
    Table(#[from] TableError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Amp;
    use std::error::Error as _;

    #[test]
    fn test_messages_name_both_amplifiers() {
        let err = IsrError::MissingCoefficient {
            victim: AmpId::new(1, Amp::A),
            source_amp: AmpId::new(2, Amp::B),
        };
        assert_eq!(
            err.to_string(),
            "no coefficient recorded for victim 01A source 02B"
        );

        let err = IsrError::RegionShapeMismatch {
            victim: AmpId::new(1, Amp::A),
            victim_rows: 4,
            victim_cols: 8,
            source_amp: AmpId::new(2, Amp::B),
            source_rows: 4,
            source_cols: 6,
        };
        let message = err.to_string();
        assert!(message.contains("victim 01A"));
        assert!(message.contains("source 02B"));
        assert!(message.contains("4x8"));
        assert!(message.contains("4x6"));
    }

    #[test]
    fn test_amp_fields_are_payload_not_causes() {
        let err = IsrError::MissingCoefficient {
            victim: AmpId::new(1, Amp::A),
            source_amp: AmpId::new(2, Amp::B),
        };
        assert!(err.source().is_none());
    }
}
