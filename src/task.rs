//! The assembled correction pipeline for one camera.
//!
//! [`IsrTask`] holds a camera profile, a parsed coefficient table, and
//! the stage configuration, and runs the documented correction order on
//! each exposure: overscan, then crosstalk, then bias, then flat.
//! Construction is where configuration problems surface; `run` failures
//! mean the exposure itself (or its calibrations) cannot be corrected.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::crosstalk::{CrosstalkCorrector, CrosstalkSources, CrosstalkSummary, CrosstalkTable};
use crate::error::IsrError;
use crate::exposure::{Exposure, IsrStage, IsrState};
use crate::geometry::CameraGeometry;
use crate::overscan::OverscanCorrector;
use crate::primitives::{FlatScaling, OverscanModel};
use crate::profile::CameraProfile;
use crate::trim;

/// Which stages to run and how, independent of the camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsrConfig {
    pub do_overscan: bool,
    pub do_crosstalk: bool,
    pub do_bias: bool,
    pub do_flat: bool,
    pub overscan: OverscanModel,
    pub flat_scaling: FlatScaling,
    /// Coefficient file for crosstalk; required when `do_crosstalk` is set.
    pub crosstalk_coefficients: Option<PathBuf>,
}

impl Default for IsrConfig {
    fn default() -> Self {
        Self {
            do_overscan: true,
            do_crosstalk: true,
            do_bias: true,
            do_flat: true,
            overscan: OverscanModel::default(),
            flat_scaling: FlatScaling::User(1.0),
            crosstalk_coefficients: None,
        }
    }
}

impl IsrConfig {
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

/// Calibration products for the exposure being corrected.
#[derive(Debug, Clone, Default)]
pub struct Calibrations {
    pub bias: Option<Exposure>,
    pub flat: Option<Exposure>,
}

impl Calibrations {
    pub fn none() -> Self {
        Self::default()
    }
}

/// What one [`IsrTask::run`] did to an exposure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IsrReport {
    /// Amplifiers that received overscan correction in this call.
    pub overscan_amps: usize,
    /// Crosstalk contribution counts, when crosstalk ran in this call.
    pub crosstalk: Option<CrosstalkSummary>,
    /// Edge trim used for the bias product, when bias ran.
    pub bias_edge_trim: Option<usize>,
    /// Edge trim used for the flat product, when flat ran.
    pub flat_edge_trim: Option<usize>,
}

/// Instrument signature removal configured for one camera.
#[derive(Debug)]
pub struct IsrTask {
    profile: CameraProfile,
    config: IsrConfig,
    geometry: CameraGeometry,
    table: Option<CrosstalkTable>,
    overscan: OverscanCorrector,
}

impl IsrTask {
    /// Build a task, loading the coefficient table if crosstalk is enabled.
    ///
    /// A missing or malformed coefficient file fails here rather than on
    /// the first exposure.
    pub fn new(profile: &CameraProfile, config: IsrConfig) -> Result<Self, IsrError> {
        let table = if config.do_crosstalk {
            let path = config
                .crosstalk_coefficients
                .as_deref()
                .ok_or(IsrError::CrosstalkNotConfigured)?;
            let table = CrosstalkTable::from_file(path, profile.key_prefix_len)?;
            info!(
                "Loaded {} crosstalk edges for {} from {}",
                table.len(),
                profile.name,
                path.display()
            );
            Some(table)
        } else {
            None
        };
        Ok(Self::assemble(profile, config, table))
    }

    /// Build a task around an already-parsed coefficient table.
    pub fn with_table(profile: &CameraProfile, config: IsrConfig, table: CrosstalkTable) -> Self {
        Self::assemble(profile, config, Some(table))
    }

    fn assemble(
        profile: &CameraProfile,
        config: IsrConfig,
        table: Option<CrosstalkTable>,
    ) -> Self {
        let overscan = OverscanCorrector::new(config.overscan, profile.bias_jump.clone());
        Self {
            profile: profile.clone(),
            geometry: profile.geometry(),
            config,
            table,
            overscan,
        }
    }

    pub fn geometry(&self) -> &CameraGeometry {
        &self.geometry
    }

    pub fn profile(&self) -> &CameraProfile {
        &self.profile
    }

    /// Run the enabled stages on one exposure, in order.
    ///
    /// Stages the exposure's [`IsrState`] already records as done are not
    /// repeated, so an exposure that went through a whole-visit crosstalk
    /// pass can be handed here for the remaining stages.
    ///
    /// `sources` supplies sibling exposures for inter-detector crosstalk;
    /// pass [`NoSources`](crate::crosstalk::NoSources) when none are
    /// available and their contributions should be skipped.
    pub fn run(
        &self,
        exposure: &mut Exposure,
        sources: &mut dyn CrosstalkSources,
        calibrations: &Calibrations,
    ) -> Result<IsrReport, IsrError> {
        let detector = self
            .geometry
            .detector(exposure.info.detector)
            .ok_or(IsrError::UnknownDetector(exposure.info.detector))?;
        let mut report = IsrReport::default();
        let mut stages: Vec<&str> = Vec::new();
        let already_done = |stage: IsrStage, state: IsrState| {
            let done = state.is_done(stage);
            if done {
                debug!("Stage {:?} already done for this exposure; not repeating it", stage);
            }
            done
        };

        if self.config.do_overscan && !already_done(IsrStage::Overscan, exposure.state) {
            self.overscan.correct_detector(exposure, detector)?;
            report.overscan_amps = detector.amps().len();
            stages.push("overscan");
        }

        if self.config.do_crosstalk && !already_done(IsrStage::Crosstalk, exposure.state) {
            let table = self.table.as_ref().ok_or(IsrError::CrosstalkNotConfigured)?;
            let corrector = CrosstalkCorrector::new(table, &self.geometry, &self.overscan);
            report.crosstalk = Some(corrector.correct(exposure, sources)?);
            stages.push("crosstalk");
        }

        if self.config.do_bias && !already_done(IsrStage::Bias, exposure.state) {
            match &calibrations.bias {
                Some(bias) => {
                    report.bias_edge_trim =
                        Some(trim::bias_correction(exposure, bias, self.profile.trimmed_calibs)?);
                    stages.push("bias");
                }
                None => warn!(
                    "Bias correction enabled but no bias product supplied for detector {}; skipping",
                    exposure.info.detector
                ),
            }
        }

        if self.config.do_flat && !already_done(IsrStage::Flat, exposure.state) {
            match &calibrations.flat {
                Some(flat) => {
                    report.flat_edge_trim = Some(trim::flat_correction(
                        exposure,
                        flat,
                        self.config.flat_scaling,
                        self.profile.trimmed_calibs,
                    )?);
                    stages.push("flat");
                }
                None => warn!(
                    "Flat correction enabled but no flat product supplied for detector {}; skipping",
                    exposure.info.detector
                ),
            }
        }

        if !stages.is_empty() {
            exposure.push_history(format!(
                "isr ({}): {} at {}",
                self.profile.name,
                stages.join(", "),
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        info!(
            "Corrected detector {} of visit {}: {}",
            exposure.info.detector,
            exposure.info.visit,
            if stages.is_empty() { "no stages enabled".to_string() } else { stages.join(", ") }
        );
        Ok(report)
    }

    /// Crosstalk-correct a whole visit at once, each detector against the
    /// rest. Requires crosstalk to be configured.
    pub fn correct_mosaic(
        &self,
        planes: &mut HashMap<u32, Exposure>,
    ) -> Result<CrosstalkSummary, IsrError> {
        let table = self.table.as_ref().ok_or(IsrError::CrosstalkNotConfigured)?;
        CrosstalkCorrector::new(table, &self.geometry, &self.overscan).correct_mosaic(planes)
    }
}
