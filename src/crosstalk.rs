//! Electronic crosstalk correction across amplifiers.
//!
//! Every amplifier couples weakly into every other amplifier read out at
//! the same time. The correction subtracts, for each victim amplifier, a
//! scaled copy of each source amplifier's data region:
//!
//! ```text
//! victim[y][x] -= coefficient * source[y][x or mirrored x]
//! ```
//!
//! The source region is mirrored left to right when the two amplifiers'
//! data regions start at different x origins, because such pairs are read
//! out in opposite serial directions. Coefficients come from a plain-text
//! table (see [`CrosstalkTable`]) keyed by amplifier codes like `01A`.
//!
//! Overscan correction must run first so that the subtracted copy is a
//! signal, not signal plus bias. Exposures that arrive here without it
//! are corrected on the spot with a warning rather than rejected.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use ndarray::{s, Array2, ArrayView2, Zip};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::IsrError;
use crate::exposure::{Exposure, IsrStage};
use crate::geometry::{Amp, AmpId, CameraGeometry, AABB};
use crate::overscan::OverscanCorrector;

/// Errors from reading or parsing a crosstalk coefficient file.
///
/// Any malformed line is fatal; a truncated or corrupt table must never
/// silently correct with partial coefficients.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to read crosstalk coefficient file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: expected 3 whitespace-separated fields, found {found}")]
    TokenCount { line: usize, found: usize },

    #[error("line {line}: bad amplifier code {code:?}: {reason}")]
    BadCode {
        line: usize,
        code: String,
        reason: String,
    },

    #[error("line {line}: coefficient {token:?} is not a number")]
    BadCoefficient { line: usize, token: String },
}

/// Parsed crosstalk coefficients for one camera.
///
/// The file format is one edge per line, `<source> <victim> <coefficient>`,
/// with `#` comments and blank lines ignored. Amplifier codes carry a
/// fixed-length instrument prefix (`ccd01A` with a three-character prefix
/// means detector 1, amp A); the prefix length comes from the camera
/// profile.
///
/// ```
/// use mosaic_isr::crosstalk::CrosstalkTable;
/// use mosaic_isr::geometry::{Amp, AmpId};
///
/// let text = "# condor inter-chip edges\nccd02B ccd01A 1.2e-3\n";
/// let table = CrosstalkTable::parse(text, 3).unwrap();
/// let victim = AmpId::new(1, Amp::A);
/// assert_eq!(table.sources_of(victim).len(), 1);
/// assert_eq!(table.coefficient(victim, AmpId::new(2, Amp::B)), Some(1.2e-3));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CrosstalkTable {
    sources: HashMap<AmpId, Vec<AmpId>>,
    coefficients: HashMap<(AmpId, AmpId), f32>,
}

impl CrosstalkTable {
    /// Read and parse a coefficient file.
    pub fn from_file(path: &Path, prefix_len: usize) -> Result<Self, TableError> {
        let text = std::fs::read_to_string(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, prefix_len)
    }

    /// Parse coefficient-file text.
    ///
    /// Self-coupling lines and repeated edges are dropped with a warning;
    /// for a repeated edge the first coefficient wins. Anything else that
    /// does not parse is an error carrying its 1-based line number.
    pub fn parse(text: &str, prefix_len: usize) -> Result<Self, TableError> {
        let mut table = CrosstalkTable::default();
        for (index, raw_line) in text.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw_line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            if tokens.len() != 3 {
                return Err(TableError::TokenCount {
                    line,
                    found: tokens.len(),
                });
            }
            let source = parse_amp_code(tokens[0], prefix_len).map_err(|reason| {
                TableError::BadCode {
                    line,
                    code: tokens[0].to_string(),
                    reason,
                }
            })?;
            let victim = parse_amp_code(tokens[1], prefix_len).map_err(|reason| {
                TableError::BadCode {
                    line,
                    code: tokens[1].to_string(),
                    reason,
                }
            })?;
            let coefficient: f32 = tokens[2].parse().map_err(|_| TableError::BadCoefficient {
                line,
                token: tokens[2].to_string(),
            })?;

            if source == victim {
                warn!("Line {} lists {} as its own crosstalk source; dropping it", line, victim);
                continue;
            }
            if table.coefficients.contains_key(&(victim, source)) {
                warn!(
                    "Line {} repeats the edge {} <- {}; keeping the first coefficient",
                    line, victim, source
                );
                continue;
            }
            table.coefficients.insert((victim, source), coefficient);
            table.sources.entry(victim).or_default().push(source);
        }
        Ok(table)
    }

    /// Sources that couple into `victim`, in file order.
    pub fn sources_of(&self, victim: AmpId) -> &[AmpId] {
        self.sources.get(&victim).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn coefficient(&self, victim: AmpId, source: AmpId) -> Option<f32> {
        self.coefficients.get(&(victim, source)).copied()
    }

    /// Number of edges in the table.
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }
}

fn parse_amp_code(code: &str, prefix_len: usize) -> Result<AmpId, String> {
    let body = code.get(prefix_len..).ok_or_else(|| {
        format!("code is shorter than the {prefix_len}-character instrument prefix")
    })?;
    let mut chars = body.chars();
    let letter = chars
        .next_back()
        .ok_or_else(|| "code has no amplifier letter".to_string())?;
    let amp = Amp::from_code_char(letter)
        .ok_or_else(|| format!("unrecognized amplifier letter {letter:?}"))?;
    let digits = chars.as_str();
    if digits.is_empty() {
        return Err("code has no detector number".to_string());
    }
    let detector: u32 = digits
        .parse()
        .map_err(|_| format!("detector number {digits:?} is not numeric"))?;
    Ok(AmpId::new(detector, amp))
}

/// A source exposure the corrector asked for but could not get.
///
/// This is the one recoverable failure in the crosstalk path: the victim
/// still gets every contribution whose source is available.
#[derive(Debug, Error)]
#[error("no exposure for detector {detector}: {reason}")]
pub struct SourceUnavailable {
    pub detector: u32,
    pub reason: String,
}

/// Hands the corrector mutable access to sibling exposures of the same visit.
///
/// Mutable because a source that arrives without overscan correction is
/// corrected in place before its pixels are used.
pub trait CrosstalkSources {
    fn exposure_mut(&mut self, detector: u32) -> Result<&mut Exposure, SourceUnavailable>;
}

impl CrosstalkSources for HashMap<u32, Exposure> {
    fn exposure_mut(&mut self, detector: u32) -> Result<&mut Exposure, SourceUnavailable> {
        self.get_mut(&detector).ok_or_else(|| SourceUnavailable {
            detector,
            reason: "not present in this visit".to_string(),
        })
    }
}

/// Provider that never has a sibling exposure.
///
/// Useful when only intra-detector edges are expected, and in tests.
pub struct NoSources;

impl CrosstalkSources for NoSources {
    fn exposure_mut(&mut self, detector: u32) -> Result<&mut Exposure, SourceUnavailable> {
        Err(SourceUnavailable {
            detector,
            reason: "no source provider configured".to_string(),
        })
    }
}

/// Counts of crosstalk contributions applied and skipped for one victim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrosstalkSummary {
    pub applied: usize,
    pub skipped: usize,
}

impl CrosstalkSummary {
    fn absorb(&mut self, other: CrosstalkSummary) {
        self.applied += other.applied;
        self.skipped += other.skipped;
    }
}

/// Source pixels staged for subtraction.
///
/// Inter-detector sources that need no mirroring stay zero-copy views
/// into the sibling exposure. Mirrored sources and intra-detector
/// sources (which would alias the victim image) are materialized.
enum SourcePixels<'a> {
    View(ArrayView2<'a, f32>),
    Buffer(Array2<f32>),
}

impl SourcePixels<'_> {
    fn view(&self) -> ArrayView2<'_, f32> {
        match self {
            SourcePixels::View(view) => view.view(),
            SourcePixels::Buffer(buffer) => buffer.view(),
        }
    }
}

fn extract_region(image: &Array2<f32>, bbox: &AABB, mirror: bool) -> Array2<f32> {
    let region = bbox.slice(image);
    if mirror {
        region.slice(s![.., ..;-1]).to_owned()
    } else {
        region.to_owned()
    }
}

/// Applies crosstalk correction to one victim exposure at a time.
pub struct CrosstalkCorrector<'a> {
    table: &'a CrosstalkTable,
    geometry: &'a CameraGeometry,
    overscan: &'a OverscanCorrector,
}

impl<'a> CrosstalkCorrector<'a> {
    pub fn new(
        table: &'a CrosstalkTable,
        geometry: &'a CameraGeometry,
        overscan: &'a OverscanCorrector,
    ) -> Self {
        Self {
            table,
            geometry,
            overscan,
        }
    }

    /// Subtract every listed source contribution from `victim`.
    ///
    /// Sources on other detectors come from `sources`; sources on the
    /// victim's own detector come from the victim exposure itself. An
    /// unavailable source is skipped with a warning and counted in the
    /// returned summary. Everything else that goes wrong is fatal.
    pub fn correct(
        &self,
        victim: &mut Exposure,
        sources: &mut dyn CrosstalkSources,
    ) -> Result<CrosstalkSummary, IsrError> {
        let victim_detector = victim.info.detector;
        let detector = self
            .geometry
            .detector(victim_detector)
            .ok_or(IsrError::UnknownDetector(victim_detector))?;
        self.ensure_overscan(victim, "Victim")?;

        let (rows, cols) = victim.dim();
        let mut summary = CrosstalkSummary::default();
        for amp in detector.amps() {
            let victim_box = amp.data;
            if !victim_box.fits_within(rows, cols) {
                return Err(IsrError::GeometryOutOfBounds {
                    amp: amp.id,
                    rows,
                    cols,
                });
            }
            for &source_id in self.table.sources_of(amp.id) {
                let coefficient =
                    self.table
                        .coefficient(amp.id, source_id)
                        .ok_or(IsrError::MissingCoefficient {
                            victim: amp.id,
                            source_amp: source_id,
                        })?;
                let source_region = self
                    .geometry
                    .amp_region(source_id)
                    .ok_or(IsrError::UnknownAmp(source_id))?;
                let source_box = source_region.data;
                if source_box.height() != victim_box.height()
                    || source_box.width() != victim_box.width()
                {
                    return Err(IsrError::RegionShapeMismatch {
                        victim: amp.id,
                        victim_rows: victim_box.height(),
                        victim_cols: victim_box.width(),
                        source_amp: source_id,
                        source_rows: source_box.height(),
                        source_cols: source_box.width(),
                    });
                }
                // Amplifiers whose data regions start at different x origins
                // are read out in opposite serial directions, so the copy
                // appears mirrored in the victim.
                let mirror = source_box.min_col != victim_box.min_col;

                let pixels = if source_id.detector == victim_detector {
                    if !source_box.fits_within(rows, cols) {
                        return Err(IsrError::GeometryOutOfBounds {
                            amp: source_id,
                            rows,
                            cols,
                        });
                    }
                    SourcePixels::Buffer(extract_region(&victim.image, &source_box, mirror))
                } else {
                    match sources.exposure_mut(source_id.detector) {
                        Err(unavailable) => {
                            warn!(
                                "Crosstalk source {} unavailable ({}); skipping its contribution to {}",
                                source_id, unavailable, amp.id
                            );
                            summary.skipped += 1;
                            continue;
                        }
                        Ok(source_exposure) => {
                            self.ensure_overscan(source_exposure, "Source")?;
                            let (source_rows, source_cols) = source_exposure.dim();
                            if !source_box.fits_within(source_rows, source_cols) {
                                return Err(IsrError::GeometryOutOfBounds {
                                    amp: source_id,
                                    rows: source_rows,
                                    cols: source_cols,
                                });
                            }
                            if mirror {
                                SourcePixels::Buffer(extract_region(
                                    &source_exposure.image,
                                    &source_box,
                                    true,
                                ))
                            } else {
                                SourcePixels::View(source_box.slice(&source_exposure.image))
                            }
                        }
                    }
                };

                debug!(
                    "Subtracting {:.3e} x {} from {}{}",
                    coefficient,
                    source_id,
                    amp.id,
                    if mirror { " (mirrored)" } else { "" }
                );
                let mut victim_view = victim_box.slice_mut(&mut victim.image);
                Zip::from(&mut victim_view)
                    .and(pixels.view())
                    .for_each(|v, &s| *v -= coefficient * s);
                summary.applied += 1;
            }
        }
        victim.state.mark(IsrStage::Crosstalk);
        Ok(summary)
    }

    /// Correct every exposure of a visit against its siblings.
    ///
    /// Detectors are processed in ascending order; each victim is taken
    /// out of the map while the rest serve as sources, so later victims
    /// see earlier ones in their corrected state. Corrected planes get a
    /// history note with a timestamp.
    pub fn correct_mosaic(
        &self,
        planes: &mut HashMap<u32, Exposure>,
    ) -> Result<CrosstalkSummary, IsrError> {
        let mut detectors: Vec<u32> = planes.keys().copied().collect();
        detectors.sort_unstable();

        let mut totals = CrosstalkSummary::default();
        for detector in detectors {
            let Some(mut victim) = planes.remove(&detector) else {
                continue;
            };
            match self.correct(&mut victim, planes) {
                Ok(summary) => {
                    totals.absorb(summary);
                    if summary.applied > 0 {
                        victim.push_history(format!(
                            "crosstalk: subtracted {} source contributions ({} skipped) at {}",
                            summary.applied,
                            summary.skipped,
                            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
                        ));
                    }
                    planes.insert(detector, victim);
                }
                Err(error) => {
                    planes.insert(detector, victim);
                    return Err(error);
                }
            }
        }
        Ok(totals)
    }

    fn ensure_overscan(&self, exposure: &mut Exposure, role: &str) -> Result<(), IsrError> {
        if exposure.state.is_done(IsrStage::Overscan) {
            return Ok(());
        }
        warn!(
            "{} exposure for detector {} reached crosstalk before overscan correction; running it now",
            role, exposure.info.detector
        );
        let detector = self
            .geometry
            .detector(exposure.info.detector)
            .ok_or(IsrError::UnknownDetector(exposure.info.detector))?;
        self.overscan.correct_detector(exposure, detector)
    }
}
