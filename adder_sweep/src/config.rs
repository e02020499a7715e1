//! Sweep configuration and the contrast threshold type.
//!
//! `SweepConfig` is built once from the CLI and never mutated while the
//! sweep runs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Thresholds swept when `--thresholds` is not given.
pub const DEFAULT_THRESHOLDS: &[u8] = &[0, 5, 10, 15, 20, 25, 30, 35, 40];

pub const DEFAULT_TRANSCODE_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_EVAL_TIMEOUT_SECS: u64 = 1800;

// ============================================================================
// Threshold
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThresholdError {
    /// 不是整数
    NotANumber(String),
    /// 超出 0..=255
    OutOfRange(String),
    /// 阈值列表为空
    EmptyList,
}

impl fmt::Display for ThresholdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdError::NotANumber(text) => {
                write!(f, "contrast threshold '{}' is not an integer", text)
            }
            ThresholdError::OutOfRange(text) => {
                write!(f, "contrast threshold {} out of range [0, 255]", text)
            }
            ThresholdError::EmptyList => write!(f, "threshold list is empty"),
        }
    }
}

impl std::error::Error for ThresholdError {}

/// ADΔER contrast threshold (0..=255).
///
/// Opaque to the harness beyond being passed to the transcoder and used to
/// name scratch regions.
///
/// ```
/// use adder_sweep::config::Threshold;
///
/// let t: Threshold = "50".parse().unwrap();
/// assert_eq!(t.value(), 50);
/// assert!("256".parse::<Threshold>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Threshold(u8);

impl Threshold {
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    #[inline]
    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Threshold {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let value: i64 = text
            .parse()
            .map_err(|_| ThresholdError::NotANumber(text.to_string()))?;
        u8::try_from(value)
            .map(Threshold)
            .map_err(|_| ThresholdError::OutOfRange(text.to_string()))
    }
}

/// Parse a comma separated list such as `0,10, 20`. Order is kept as given
/// and duplicates are allowed.
pub fn parse_threshold_list(text: &str) -> Result<Vec<Threshold>, ThresholdError> {
    let list = text
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect::<Result<Vec<Threshold>, _>>()?;
    if list.is_empty() {
        return Err(ThresholdError::EmptyList);
    }
    Ok(list)
}

pub fn default_thresholds() -> Vec<Threshold> {
    DEFAULT_THRESHOLDS.iter().copied().map(Threshold::new).collect()
}

// ============================================================================
// SweepConfig
// ============================================================================

/// What happens to a failed item's scratch region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScratchPolicy {
    #[default]
    AlwaysRemove,
    /// 失败项的临时目录保留以便排查
    KeepFailed,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub dataset_root: PathBuf,
    pub file_list: PathBuf,
    pub output_dir: PathBuf,
    pub baseline: Threshold,
    pub scratch_root: PathBuf,
    pub thresholds: Vec<Threshold>,
    /// Rewrite the JSON document after this many records (minimum 1)
    pub json_flush_every: usize,
    pub scratch_policy: ScratchPolicy,
    /// Stem of the `.log` / `.json` result files
    pub run_name: String,
}

impl SweepConfig {
    pub fn new(
        dataset_root: impl Into<PathBuf>,
        file_list: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        baseline: Threshold,
        scratch_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            dataset_root: dataset_root.into(),
            file_list: file_list.into(),
            output_dir: output_dir.into(),
            baseline,
            scratch_root: scratch_root.into(),
            thresholds: default_thresholds(),
            json_flush_every: 1,
            scratch_policy: ScratchPolicy::default(),
            run_name: default_run_name(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: Vec<Threshold>) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_json_flush_every(mut self, every: usize) -> Self {
        self.json_flush_every = every.max(1);
        self
    }

    pub fn with_scratch_policy(mut self, policy: ScratchPolicy) -> Self {
        self.scratch_policy = policy;
        self
    }

    pub fn with_run_name(mut self, run_name: impl Into<String>) -> Self {
        self.run_name = run_name.into();
        self
    }
}

/// `sweep_2026-10-16_14-03-22`
pub fn default_run_name() -> String {
    format!("sweep_{}", chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"))
}

/// `0` disables the timeout.
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
