//! Detector construction options and their JSON representation.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tagscope_ffi::layout::ApriltagDetector;

/// Which tag families to register at construction time.
///
/// Parsed from either a single string (`"all"`, or names separated by
/// whitespace or punctuation such as `"tag36h11, tag25h9"`) or a list of
/// names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FamilySelectionRepr", into = "FamilySelectionRepr")]
pub enum FamilySelection {
    /// Every family compiled into the engine.
    All,
    Names(Vec<String>),
}

impl FamilySelection {
    /// Keyword selecting every compiled-in family.
    pub const ALL: &'static str = "all";

    pub fn parse(text: &str) -> Self {
        let names: Vec<String> = text
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|token| !token.is_empty())
            .map(str::to_owned)
            .collect();
        if names.len() == 1 && names[0].eq_ignore_ascii_case(Self::ALL) {
            Self::All
        } else {
            Self::Names(names)
        }
    }

    /// Family names to register, given what the engine has compiled in.
    ///
    /// Explicit names are returned as-is, in order, without deduplication;
    /// registration skips repeats.
    pub fn resolve(&self, available: &[String]) -> Vec<String> {
        match self {
            Self::All => available.to_vec(),
            Self::Names(names) => names.clone(),
        }
    }
}

impl Default for FamilySelection {
    fn default() -> Self {
        Self::Names(vec!["tag36h11".to_owned()])
    }
}

impl FromStr for FamilySelection {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for FamilySelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str(Self::ALL),
            Self::Names(names) => f.write_str(&names.join(" ")),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum FamilySelectionRepr {
    Text(String),
    List(Vec<String>),
}

impl From<FamilySelectionRepr> for FamilySelection {
    fn from(repr: FamilySelectionRepr) -> Self {
        match repr {
            FamilySelectionRepr::Text(text) => Self::parse(&text),
            FamilySelectionRepr::List(names) => {
                if names.len() == 1 && names[0].eq_ignore_ascii_case(Self::ALL) {
                    Self::All
                } else {
                    Self::Names(names)
                }
            }
        }
    }
}

impl From<FamilySelection> for FamilySelectionRepr {
    fn from(selection: FamilySelection) -> Self {
        match selection {
            FamilySelection::All => Self::Text(FamilySelection::ALL.to_owned()),
            FamilySelection::Names(names) => Self::List(names),
        }
    }
}

/// Options applied when a detector is constructed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorOptions {
    pub families: FamilySelection,
    /// Black border width, in bits, written into every registered family.
    pub border: u32,
    pub nthreads: u32,
    /// Downsampling factor for quad detection; `1.0` disables it.
    pub quad_decimate: f32,
    /// Gaussian blur sigma applied before quad detection; `0.0` disables it.
    pub quad_sigma: f32,
    pub refine_edges: bool,
    pub refine_decode: bool,
    pub refine_pose: bool,
    pub debug: bool,
    /// Use the contour-based quad finder.
    pub quad_contours: bool,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            families: FamilySelection::default(),
            border: 1,
            nthreads: 4,
            quad_decimate: 1.0,
            quad_sigma: 0.0,
            refine_edges: true,
            refine_decode: false,
            refine_pose: false,
            debug: false,
            quad_contours: true,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum OptionsError {
    #[error("nthreads must be at least 1")]
    NoThreads,

    #[error("nthreads {0} does not fit the engine's thread count")]
    TooManyThreads(u32),

    #[error("quad_decimate must be a finite value >= 1.0, got {0}")]
    InvalidDecimate(f32),

    #[error("quad_sigma must be finite and non-negative, got {0}")]
    InvalidSigma(f32),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DetectorOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.nthreads == 0 {
            return Err(OptionsError::NoThreads);
        }
        if i32::try_from(self.nthreads).is_err() {
            return Err(OptionsError::TooManyThreads(self.nthreads));
        }
        if !self.quad_decimate.is_finite() || self.quad_decimate < 1.0 {
            return Err(OptionsError::InvalidDecimate(self.quad_decimate));
        }
        if !self.quad_sigma.is_finite() || self.quad_sigma < 0.0 {
            return Err(OptionsError::InvalidSigma(self.quad_sigma));
        }
        Ok(())
    }

    /// The part of these options that lives on the detector handle.
    ///
    /// Call [`validate`](Self::validate) first; out-of-range thread counts
    /// saturate.
    pub fn config(&self) -> DetectorConfig {
        DetectorConfig {
            nthreads: i32::try_from(self.nthreads).unwrap_or(i32::MAX),
            quad_decimate: self.quad_decimate,
            quad_sigma: self.quad_sigma,
            refine_edges: self.refine_edges,
            refine_decode: self.refine_decode,
            refine_pose: self.refine_pose,
            debug: self.debug,
            quad_contours: self.quad_contours,
        }
    }

    /// Load options from a JSON file; missing fields take their defaults.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write these options to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Configuration fields stored on a live detector handle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub nthreads: i32,
    pub quad_decimate: f32,
    pub quad_sigma: f32,
    pub refine_edges: bool,
    pub refine_decode: bool,
    pub refine_pose: bool,
    pub debug: bool,
    pub quad_contours: bool,
}

impl DetectorConfig {
    /// Read the configuration currently stored on a handle.
    pub fn read(raw: &ApriltagDetector) -> Self {
        Self {
            nthreads: raw.nthreads,
            quad_decimate: raw.quad_decimate,
            quad_sigma: raw.quad_sigma,
            refine_edges: raw.refine_edges != 0,
            refine_decode: raw.refine_decode != 0,
            refine_pose: raw.refine_pose != 0,
            debug: raw.debug != 0,
            quad_contours: raw.quad_contours != 0,
        }
    }

    /// Write the plain configuration fields.
    ///
    /// `quad_contours` is not written here: the engine switches quad finders
    /// through its own entry point, which also sets up the finder's state.
    pub(crate) fn apply(&self, raw: &mut ApriltagDetector) {
        raw.nthreads = self.nthreads;
        raw.quad_decimate = self.quad_decimate;
        raw.quad_sigma = self.quad_sigma;
        raw.refine_edges = self.refine_edges.into();
        raw.refine_decode = self.refine_decode.into();
        raw.refine_pose = self.refine_pose.into();
        raw.debug = self.debug.into();
    }
}
