//! Focal plane geometry: amplifier identities and pixel regions.
//!
//! A raw exposure from one detector carries the pixels of two amplifier
//! segments plus their serial overscan columns, all packed into a single
//! frame. The types here describe where each piece lives (inclusive
//! bounding boxes in row/column order) and which physical corner an
//! amplifier reads out from, which decides how row offsets are measured.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{s, Array2, ArrayView2, ArrayViewMut2};

/// Inclusive axis-aligned bounding box over image pixels.
///
/// Rows and columns are in array order: row 0 is the bottom of the
/// detector, column 0 the left edge. Both bounds are inclusive, so a
/// single pixel is a valid box with `min == max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AABB {
    pub min_row: usize,
    pub min_col: usize,
    pub max_row: usize,
    pub max_col: usize,
}

impl AABB {
    /// Create a box from explicit inclusive bounds.
    pub fn from_coords(min_row: usize, min_col: usize, max_row: usize, max_col: usize) -> Self {
        Self {
            min_row,
            min_col,
            max_row,
            max_col,
        }
    }

    /// Create a box from its lower-left corner and size in pixels.
    pub fn from_origin_size(row: usize, col: usize, height: usize, width: usize) -> Self {
        assert!(height > 0 && width > 0, "box must have positive size");
        Self {
            min_row: row,
            min_col: col,
            max_row: row + height - 1,
            max_col: col + width - 1,
        }
    }

    pub fn width(&self) -> usize {
        self.max_col - self.min_col + 1
    }

    pub fn height(&self) -> usize {
        self.max_row - self.min_row + 1
    }

    pub fn is_valid(&self) -> bool {
        self.min_row <= self.max_row && self.min_col <= self.max_col
    }

    pub fn contains_point(&self, row: usize, col: usize) -> bool {
        row >= self.min_row && row <= self.max_row && col >= self.min_col && col <= self.max_col
    }

    /// Whether the box lies entirely inside an image of `rows` x `cols` pixels.
    pub fn fits_within(&self, rows: usize, cols: usize) -> bool {
        self.is_valid() && self.max_row < rows && self.max_col < cols
    }

    /// True when both boxes cover exactly the same rows.
    pub fn same_rows(&self, other: &AABB) -> bool {
        self.min_row == other.min_row && self.max_row == other.max_row
    }

    /// Split the box horizontally so that `row` becomes the first row of the
    /// upper half. Returns `(lower, upper)`, or `None` if the cut would leave
    /// either half empty.
    pub fn split_at_row(&self, row: usize) -> Option<(AABB, AABB)> {
        if row <= self.min_row || row > self.max_row {
            return None;
        }
        let lower = AABB::from_coords(self.min_row, self.min_col, row - 1, self.max_col);
        let upper = AABB::from_coords(row, self.min_col, self.max_row, self.max_col);
        Some((lower, upper))
    }

    /// View of the pixels this box covers.
    ///
    /// Panics if the box does not fit inside the array; callers validate
    /// with [`AABB::fits_within`] first.
    pub fn slice<'a, T>(&self, image: &'a Array2<T>) -> ArrayView2<'a, T> {
        image.slice(s![self.min_row..=self.max_row, self.min_col..=self.max_col])
    }

    /// Mutable view of the pixels this box covers.
    pub fn slice_mut<'a, T>(&self, image: &'a mut Array2<T>) -> ArrayViewMut2<'a, T> {
        image.slice_mut(s![self.min_row..=self.max_row, self.min_col..=self.max_col])
    }
}

impl fmt::Display for AABB {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}..{}, {}..{}]",
            self.min_row, self.max_row, self.min_col, self.max_col
        )
    }
}

/// One of the two amplifier segments of a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Amp {
    A,
    B,
}

impl Amp {
    /// Parse the trailing segment letter of an amplifier code.
    pub fn from_code_char(c: char) -> Option<Amp> {
        match c {
            'A' => Some(Amp::A),
            'B' => Some(Amp::B),
            _ => None,
        }
    }
}

impl fmt::Display for Amp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amp::A => write!(f, "A"),
            Amp::B => write!(f, "B"),
        }
    }
}

/// A single amplifier anywhere on the focal plane.
///
/// Formats as the detector number followed by the segment letter,
/// `01A` for example, matching the codes used in coefficient files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AmpId {
    pub detector: u32,
    pub amp: Amp,
}

impl AmpId {
    pub fn new(detector: u32, amp: Amp) -> Self {
        Self { detector, amp }
    }
}

impl fmt::Display for AmpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{}", self.detector, self.amp)
    }
}

/// Physical corner an amplifier reads out from.
///
/// Row offsets quoted "from the readout corner" count up from the bottom
/// of the frame for the two lower corners and down from the top for the
/// two upper corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadoutCorner {
    LowerLeft,
    LowerRight,
    UpperLeft,
    UpperRight,
}

impl ReadoutCorner {
    pub fn on_bottom_edge(self) -> bool {
        matches!(self, ReadoutCorner::LowerLeft | ReadoutCorner::LowerRight)
    }
}

/// Pixel regions of one amplifier inside its detector's raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmpRegion {
    pub id: AmpId,
    /// Columns that see sky.
    pub data: AABB,
    /// Serial overscan columns read through the same chain.
    pub overscan: AABB,
    pub readout: ReadoutCorner,
}

/// All amplifier regions of a single detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorGeometry {
    detector: u32,
    amps: Vec<AmpRegion>,
}

impl DetectorGeometry {
    pub fn new(detector: u32, amps: Vec<AmpRegion>) -> Self {
        Self { detector, amps }
    }

    pub fn detector(&self) -> u32 {
        self.detector
    }

    pub fn amps(&self) -> &[AmpRegion] {
        &self.amps
    }

    pub fn amp(&self, amp: Amp) -> Option<&AmpRegion> {
        self.amps.iter().find(|region| region.id.amp == amp)
    }
}

/// Amplifier regions for every detector of a camera.
///
/// Detector iteration order is ascending by number, so corrections that
/// walk the whole focal plane are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CameraGeometry {
    detectors: BTreeMap<u32, DetectorGeometry>,
}

impl CameraGeometry {
    pub fn from_detectors(detectors: Vec<DetectorGeometry>) -> Self {
        Self {
            detectors: detectors
                .into_iter()
                .map(|geom| (geom.detector(), geom))
                .collect(),
        }
    }

    pub fn detector(&self, detector: u32) -> Option<&DetectorGeometry> {
        self.detectors.get(&detector)
    }

    pub fn amp_region(&self, id: AmpId) -> Option<&AmpRegion> {
        self.detector(id.detector).and_then(|geom| geom.amp(id.amp))
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DetectorGeometry> {
        self.detectors.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_aabb_dimensions() {
        let bbox = AABB::from_coords(2, 3, 5, 10);
        assert_eq!(bbox.height(), 4);
        assert_eq!(bbox.width(), 8);
        assert!(bbox.is_valid());
        assert!(bbox.contains_point(2, 3));
        assert!(bbox.contains_point(5, 10));
        assert!(!bbox.contains_point(6, 3));
        assert!(!bbox.contains_point(2, 11));
    }

    #[test]
    fn test_aabb_from_origin_size() {
        let bbox = AABB::from_origin_size(1, 2, 3, 4);
        assert_eq!(bbox, AABB::from_coords(1, 2, 3, 5));
    }

    #[test]
    fn test_aabb_fits_within() {
        let bbox = AABB::from_coords(0, 0, 3, 3);
        assert!(bbox.fits_within(4, 4));
        assert!(!bbox.fits_within(4, 3));
        assert!(!bbox.fits_within(3, 4));
    }

    #[test]
    fn test_split_at_row() {
        let bbox = AABB::from_coords(0, 0, 9, 4);
        let (lower, upper) = bbox.split_at_row(4).unwrap();
        assert_eq!(lower, AABB::from_coords(0, 0, 3, 4));
        assert_eq!(upper, AABB::from_coords(4, 0, 9, 4));
        assert_eq!(lower.height() + upper.height(), bbox.height());
    }

    #[test]
    fn test_split_at_row_rejects_empty_halves() {
        let bbox = AABB::from_coords(2, 0, 6, 4);
        assert!(bbox.split_at_row(2).is_none());
        assert!(bbox.split_at_row(7).is_none());
        assert!(bbox.split_at_row(3).is_some());
        assert!(bbox.split_at_row(6).is_some());
    }

    #[test]
    fn test_slice_extracts_region() {
        let image = array![
            [1.0_f32, 2.0, 3.0],
            [4.0, 5.0, 6.0],
            [7.0, 8.0, 9.0],
        ];
        let bbox = AABB::from_coords(1, 1, 2, 2);
        let view = bbox.slice(&image);
        assert_eq!(view, array![[5.0, 6.0], [8.0, 9.0]]);
    }

    #[test]
    fn test_amp_id_display() {
        assert_eq!(AmpId::new(1, Amp::A).to_string(), "01A");
        assert_eq!(AmpId::new(42, Amp::B).to_string(), "42B");
        assert_eq!(AmpId::new(104, Amp::A).to_string(), "104A");
    }

    #[test]
    fn test_amp_from_code_char() {
        assert_eq!(Amp::from_code_char('A'), Some(Amp::A));
        assert_eq!(Amp::from_code_char('B'), Some(Amp::B));
        assert_eq!(Amp::from_code_char('C'), None);
        assert_eq!(Amp::from_code_char('a'), None);
    }

    #[test]
    fn test_readout_corner_edges() {
        assert!(ReadoutCorner::LowerLeft.on_bottom_edge());
        assert!(ReadoutCorner::LowerRight.on_bottom_edge());
        assert!(!ReadoutCorner::UpperLeft.on_bottom_edge());
        assert!(!ReadoutCorner::UpperRight.on_bottom_edge());
    }

    #[test]
    fn test_camera_geometry_lookup() {
        let amp = AmpRegion {
            id: AmpId::new(3, Amp::A),
            data: AABB::from_coords(0, 0, 7, 3),
            overscan: AABB::from_coords(0, 4, 7, 5),
            readout: ReadoutCorner::LowerLeft,
        };
        let camera = CameraGeometry::from_detectors(vec![DetectorGeometry::new(3, vec![amp])]);
        assert_eq!(camera.len(), 1);
        assert!(camera.detector(3).is_some());
        assert!(camera.detector(4).is_none());
        assert!(camera.amp_region(AmpId::new(3, Amp::A)).is_some());
        assert!(camera.amp_region(AmpId::new(3, Amp::B)).is_none());
    }

    #[test]
    fn test_camera_geometry_iterates_in_detector_order() {
        let make = |det: u32| {
            DetectorGeometry::new(
                det,
                vec![AmpRegion {
                    id: AmpId::new(det, Amp::A),
                    data: AABB::from_coords(0, 0, 1, 1),
                    overscan: AABB::from_coords(0, 2, 1, 2),
                    readout: ReadoutCorner::LowerLeft,
                }],
            )
        };
        let camera = CameraGeometry::from_detectors(vec![make(5), make(1), make(3)]);
        let order: Vec<u32> = camera.iter().map(|g| g.detector()).collect();
        assert_eq!(order, vec![1, 3, 5]);
    }
}
