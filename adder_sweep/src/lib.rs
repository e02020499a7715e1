//! adder-sweep - ADΔER contrast threshold sweep harness
//!
//! Runs an external ADΔER transcoder over every file in a dataset list at
//! every contrast threshold, scores each reconstruction against its
//! original with an external quality tool, and writes the results as an
//! append-only text log plus a JSON document.
//!
//! ```text
//! for threshold in thresholds:        (order given)
//!     for file in file list:          (file order)
//!         scratch region → transcode → evaluate → record → release
//! ```
//!
//! ## Library use
//! ```rust,ignore
//! use adder_sweep::{run_sweep, CommandTranscoder, SweepConfig, Threshold, VmafEvaluator};
//!
//! let config = SweepConfig::new("/data", "files.txt", "out", Threshold::new(10), "/dev/shm");
//! let report = run_sweep(&config, transcoder, evaluator)?;
//! println!("{} / {} succeeded", report.summary.succeeded(), report.summary.total);
//! ```

pub mod config;
pub mod error;
pub mod evaluator;
pub mod file_list;
pub mod report;
pub mod result_log;
pub mod scratch;
pub mod sweep;
pub mod transcoder;


// Re-exports
pub use config::{parse_threshold_list, ScratchPolicy, SweepConfig, Threshold, ThresholdError};
pub use error::{HarnessError, Result};
pub use evaluator::{EvaluationError, QualityEvaluator, QualityScore, VmafEvaluator};
pub use file_list::FileList;
pub use report::{print_summary_report, SweepSummary};
pub use result_log::{ResultLogger, RunRecord, RunStatus, SweepArtifacts, SweepDocument};
pub use scratch::{ScratchManager, ScratchRegion};
pub use sweep::{plan_work_items, run_sweep, Sweep, SweepReport, WorkItem};
pub use transcoder::{CommandTranscoder, TranscodeOutcome, TranscodeReport, Transcoder};
