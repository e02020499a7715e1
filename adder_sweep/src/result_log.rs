//! Result Logger
//!
//! Two artifacts per run, both in the output directory:
//!
//! - `<run>.log`: append-only text, one block per work item (duration +
//!   transcoder summary), flushed after every block
//! - `<run>.json`: the full [`SweepDocument`], rewritten through a temp
//!   file + rename every `flush_every` records, so the file on disk is
//!   always a complete, valid document

use crate::config::Threshold;
use crate::error::{HarnessError, Result};
use crate::evaluator::{EvaluationError, QualityScore};
use crate::sweep::WorkItem;
use crate::transcoder::TranscodeOutcome;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const TOOL_NAME: &str = "adder-sweep";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    /// Scratch region could not be created for this item
    StagingFailed,
    TranscodeFailed,
    TranscodeTimedOut,
    EvaluationFailed,
    EvaluationTimedOut,
}

impl RunStatus {
    pub const ALL: [RunStatus; 6] = [
        RunStatus::Success,
        RunStatus::StagingFailed,
        RunStatus::TranscodeFailed,
        RunStatus::TranscodeTimedOut,
        RunStatus::EvaluationFailed,
        RunStatus::EvaluationTimedOut,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "Success",
            RunStatus::StagingFailed => "StagingFailed",
            RunStatus::TranscodeFailed => "TranscodeFailed",
            RunStatus::TranscodeTimedOut => "TranscodeTimedOut",
            RunStatus::EvaluationFailed => "EvaluationFailed",
            RunStatus::EvaluationTimedOut => "EvaluationTimedOut",
        }
    }

    pub fn is_success(self) -> bool {
        self == RunStatus::Success
    }
}

/// One attempted work item. Never mutated after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub index: usize,
    pub file: String,
    pub param: Threshold,
    pub baseline: Threshold,
    pub status: RunStatus,
    pub started_at: String,
    /// Transcode wall-clock time
    pub duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_detail: Option<QualityScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_retained: Option<PathBuf>,
}

impl RunRecord {
    fn base(item: &WorkItem, started_at: &str, status: RunStatus) -> Self {
        Self {
            index: item.index,
            file: item.file.clone(),
            param: item.threshold,
            baseline: item.baseline,
            status,
            started_at: started_at.to_string(),
            duration_secs: 0.0,
            exit_code: None,
            quality: None,
            quality_detail: None,
            summary: None,
            error: None,
            scratch_retained: None,
        }
    }

    pub fn staging_failed(item: &WorkItem, started_at: &str, error: &HarnessError) -> Self {
        let mut record = Self::base(item, started_at, RunStatus::StagingFailed);
        record.error = Some(error.to_string());
        record
    }

    /// `quality` is `None` when evaluation was skipped (transcode failed).
    pub fn from_stages(
        item: &WorkItem,
        started_at: &str,
        transcode: &TranscodeOutcome,
        quality: Option<&std::result::Result<QualityScore, EvaluationError>>,
    ) -> Self {
        let status = match (transcode, quality) {
            (TranscodeOutcome::Failed { .. }, _) => RunStatus::TranscodeFailed,
            (TranscodeOutcome::TimedOut { .. }, _) => RunStatus::TranscodeTimedOut,
            (TranscodeOutcome::Success(_), Some(Ok(_))) => RunStatus::Success,
            (TranscodeOutcome::Success(_), Some(Err(EvaluationError::TimedOut { .. }))) => {
                RunStatus::EvaluationTimedOut
            }
            (TranscodeOutcome::Success(_), Some(Err(EvaluationError::Failed { .. })) | None) => {
                RunStatus::EvaluationFailed
            }
        };

        let mut record = Self::base(item, started_at, status);
        record.duration_secs = transcode.duration().as_secs_f64();
        record.exit_code = transcode.exit_code();

        match transcode {
            TranscodeOutcome::Success(report) => {
                record.summary = Some(report.summary.clone());
            }
            TranscodeOutcome::Failed { stderr, exit_code, .. } => {
                record.error = Some(transcode_error(stderr, *exit_code));
            }
            TranscodeOutcome::TimedOut { stderr, duration } => {
                let mut error = format!("transcoder timed out after {:.1}s", duration.as_secs_f64());
                if !stderr.trim().is_empty() {
                    error.push_str(&format!(": {}", stderr.trim()));
                }
                record.error = Some(error);
            }
        }

        match quality {
            Some(Ok(score)) => {
                record.quality = Some(score.mean);
                record.quality_detail = Some(score.clone());
            }
            Some(Err(e)) => record.error = Some(e.to_string()),
            None if transcode.is_success() => {
                record.error = Some("quality evaluation was not run".to_string());
            }
            None => {}
        }
        record
    }
}

fn transcode_error(stderr: &str, exit_code: Option<i32>) -> String {
    let status = match exit_code {
        Some(code) => format!("transcoder exited with code {}", code),
        None => "transcoder did not run to completion".to_string(),
    };
    let stderr = stderr.trim();
    if stderr.is_empty() {
        status
    } else {
        format!("{}: {}", status, stderr)
    }
}

/// The JSON document written for each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepDocument {
    pub tool: String,
    pub version: String,
    pub dataset: PathBuf,
    pub file_list: PathBuf,
    pub baseline: Threshold,
    pub thresholds: Vec<Threshold>,
    pub started_at: String,
    #[serde(default)]
    pub finished_at: Option<String>,
    pub records: Vec<RunRecord>,
}

impl SweepDocument {
    pub fn new(
        dataset: &Path,
        file_list: &Path,
        baseline: Threshold,
        thresholds: &[Threshold],
    ) -> Self {
        Self {
            tool: TOOL_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            dataset: dataset.to_path_buf(),
            file_list: file_list.to_path_buf(),
            baseline,
            thresholds: thresholds.to_vec(),
            started_at: now_rfc3339(),
            finished_at: None,
            records: Vec::new(),
        }
    }
}

pub fn now_rfc3339() -> String {
    chrono::Local::now().to_rfc3339()
}

/// Paths of the two artifacts of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepArtifacts {
    pub text_log: PathBuf,
    pub json: PathBuf,
}

pub struct ResultLogger {
    artifacts: SweepArtifacts,
    text: BufWriter<File>,
    document: SweepDocument,
    flush_every: usize,
    unflushed: usize,
}

impl ResultLogger {
    /// Create `<output_dir>/<run_name>.log` and `<run_name>.json` (initial,
    /// empty document). Neither file may exist yet: an earlier run's results
    /// are never appended to or overwritten.
    pub fn create(
        output_dir: &Path,
        run_name: &str,
        document: SweepDocument,
        flush_every: usize,
    ) -> Result<Self> {
        std::fs::create_dir_all(output_dir).map_err(|source| HarnessError::Output {
            path: output_dir.to_path_buf(),
            source,
        })?;

        let artifacts = SweepArtifacts {
            text_log: output_dir.join(format!("{}.log", run_name)),
            json: output_dir.join(format!("{}.json", run_name)),
        };
        if artifacts.json.exists() {
            return Err(HarnessError::RunExists {
                path: artifacts.json,
            });
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&artifacts.text_log)
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::AlreadyExists => HarnessError::RunExists {
                    path: artifacts.text_log.clone(),
                },
                _ => HarnessError::Output {
                    path: artifacts.text_log.clone(),
                    source,
                },
            })?;

        let mut logger = Self {
            artifacts,
            text: BufWriter::new(file),
            document,
            flush_every: flush_every.max(1),
            unflushed: 0,
        };
        logger.write_header()?;
        logger.write_json()?;
        Ok(logger)
    }

    pub fn artifacts(&self) -> &SweepArtifacts {
        &self.artifacts
    }

    pub fn records(&self) -> &[RunRecord] {
        &self.document.records
    }

    /// Append the record's text block (flushed immediately) and add it to
    /// the JSON document, rewriting the document when the batch is full.
    pub fn record(&mut self, record: RunRecord) -> Result<()> {
        let block = format_text_block(&record);
        self.document.records.push(record);
        self.unflushed += 1;

        self.append_text(&block)?;
        if self.unflushed >= self.flush_every {
            self.write_json()?;
        }
        Ok(())
    }

    /// Stamp `finished_at` and write the final document.
    pub fn finish(mut self) -> Result<SweepArtifacts> {
        self.document.finished_at = Some(now_rfc3339());
        let footer = format!(
            "# finished {} ({} records)\n",
            self.document.finished_at.as_deref().unwrap_or_default(),
            self.document.records.len()
        );
        self.append_text(&footer)?;
        self.write_json()?;
        Ok(self.artifacts)
    }

    fn write_header(&mut self) -> Result<()> {
        let thresholds: Vec<String> = self
            .document
            .thresholds
            .iter()
            .map(Threshold::to_string)
            .collect();
        let header = format!(
            "# {} {} started {}\n# dataset: {}\n# file list: {}\n# baseline: {}\n# thresholds: {}\n\n",
            self.document.tool,
            self.document.version,
            self.document.started_at,
            self.document.dataset.display(),
            self.document.file_list.display(),
            self.document.baseline,
            thresholds.join(",")
        );
        self.append_text(&header)
    }

    fn append_text(&mut self, text: &str) -> Result<()> {
        self.text
            .write_all(text.as_bytes())
            .and_then(|_| self.text.flush())
            .map_err(|source| HarnessError::Output {
                path: self.artifacts.text_log.clone(),
                source,
            })
    }

    fn write_json(&mut self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.document)?;
        let path = &self.artifacts.json;
        let tmp = path.with_extension("json.tmp");
        let to_output = |source| HarnessError::Output {
            path: path.clone(),
            source,
        };

        std::fs::write(&tmp, json.as_bytes()).map_err(to_output)?;
        std::fs::rename(&tmp, path).map_err(to_output)?;
        self.unflushed = 0;
        debug!(path = %path.display(), records = self.document.records.len(), "JSON results written");
        Ok(())
    }
}

/// Text log block for one record.
///
/// ```text
/// [0001] a.mp4 threshold=0 baseline=10 status=Success
/// Execution time: 12.345s
/// Quality (vmaf): 95.0000
/// Transcoder summary:
///     Dimensions
///     ...
/// ```
pub fn format_text_block(record: &RunRecord) -> String {
    let mut block = format!(
        "[{:04}] {} threshold={} baseline={} status={}\n",
        record.index,
        record.file,
        record.param,
        record.baseline,
        record.status.as_str()
    );
    block.push_str(&format!("Execution time: {:.3}s\n", record.duration_secs));
    if let Some(score) = &record.quality_detail {
        block.push_str(&format!("Quality ({}): {:.4}\n", score.metric, score.mean));
    }
    if let Some(error) = &record.error {
        block.push_str(&format!("Error: {}\n", error.trim_end()));
    }
    if let Some(retained) = &record.scratch_retained {
        block.push_str(&format!("Scratch retained: {}\n", retained.display()));
    }
    if let Some(summary) = &record.summary {
        block.push_str("Transcoder summary:\n");
        for line in summary.lines() {
            block.push_str("    ");
            block.push_str(line);
            block.push('\n');
        }
    }
    block.push('\n');
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcoder::TranscodeReport;
    use std::time::Duration;
    use tempfile::TempDir;

    fn item() -> WorkItem {
        WorkItem {
            index: 3,
            file: "a.mp4".to_string(),
            source: PathBuf::from("/data/a.mp4"),
            threshold: Threshold::new(50),
            baseline: Threshold::new(10),
        }
    }

    fn success(summary: &str) -> TranscodeOutcome {
        TranscodeOutcome::Success(TranscodeReport {
            duration: Duration::from_millis(1500),
            exit_code: Some(0),
            events: PathBuf::from("/scratch/events.adder"),
            reconstructed: PathBuf::from("/scratch/reconstructed.mp4"),
            summary: summary.to_string(),
        })
    }

    fn document() -> SweepDocument {
        SweepDocument::new(
            Path::new("/data"),
            Path::new("/data/list.txt"),
            Threshold::new(10),
            &[Threshold::new(0), Threshold::new(50)],
        )
    }

    #[test]
    fn test_status_classification() {
        let ok: std::result::Result<QualityScore, EvaluationError> =
            Ok(QualityScore::mean_only("vmaf", 90.0));
        let failed = Err(EvaluationError::Failed {
            reason: "x".to_string(),
        });
        let timed_out = Err(EvaluationError::TimedOut { secs: 1.0 });
        let transcode_failed = TranscodeOutcome::Failed {
            duration: Duration::from_secs(1),
            exit_code: Some(1),
            stderr: "boom".to_string(),
        };
        let transcode_timed_out = TranscodeOutcome::TimedOut {
            duration: Duration::from_secs(9),
            stderr: String::new(),
        };

        let status = |t: &TranscodeOutcome, q| RunRecord::from_stages(&item(), "t", t, q).status;
        assert_eq!(status(&success("OK"), Some(&ok)), RunStatus::Success);
        assert_eq!(status(&success("OK"), Some(&failed)), RunStatus::EvaluationFailed);
        assert_eq!(status(&success("OK"), Some(&timed_out)), RunStatus::EvaluationTimedOut);
        assert_eq!(status(&success("OK"), None), RunStatus::EvaluationFailed);
        assert_eq!(status(&transcode_failed, None), RunStatus::TranscodeFailed);
        assert_eq!(status(&transcode_timed_out, None), RunStatus::TranscodeTimedOut);
    }

    #[test]
    fn test_failed_record_has_no_quality_and_keeps_stderr() {
        let outcome = TranscodeOutcome::Failed {
            duration: Duration::from_secs(2),
            exit_code: Some(101),
            stderr: "panicked at 'bad header'\n".to_string(),
        };
        let record = RunRecord::from_stages(&item(), "t", &outcome, None);
        assert_eq!(record.quality, None);
        assert_eq!(record.exit_code, Some(101));
        assert_eq!(
            record.error.as_deref(),
            Some("transcoder exited with code 101: panicked at 'bad header'")
        );

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("quality").is_none());
        assert_eq!(json["status"], "TranscodeFailed");
        assert_eq!(json["param"], 50);
    }

    #[test]
    fn test_evaluation_failure_retains_transcode_result() {
        let failed = Err(EvaluationError::Failed {
            reason: "unparseable".to_string(),
        });
        let record = RunRecord::from_stages(&item(), "t", &success("events: 10"), Some(&failed));
        assert_eq!(record.status, RunStatus::EvaluationFailed);
        assert_eq!(record.summary.as_deref(), Some("events: 10"));
        assert_eq!(record.duration_secs, 1.5);
        assert!(record.error.unwrap().contains("unparseable"));
    }

    #[test]
    fn test_text_block_format() {
        let ok = Ok(QualityScore::mean_only("vmaf", 95.0));
        let record = RunRecord::from_stages(&item(), "t", &success("line one\nline two"), Some(&ok));
        assert_eq!(
            format_text_block(&record),
            "[0003] a.mp4 threshold=50 baseline=10 status=Success\n\
             Execution time: 1.500s\n\
             Quality (vmaf): 95.0000\n\
             Transcoder summary:\n    line one\n    line two\n\n"
        );
    }

    #[test]
    fn test_logger_writes_both_artifacts() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested/out");
        let mut logger = ResultLogger::create(&out, "sweep_test", document(), 1).unwrap();

        // empty but valid document before any record
        let initial: SweepDocument =
            serde_json::from_str(&std::fs::read_to_string(&logger.artifacts().json).unwrap())
                .unwrap();
        assert!(initial.records.is_empty());
        assert!(initial.finished_at.is_none());

        let ok = Ok(QualityScore::mean_only("vmaf", 95.0));
        logger
            .record(RunRecord::from_stages(&item(), "t", &success("OK"), Some(&ok)))
            .unwrap();

        let mid: SweepDocument =
            serde_json::from_str(&std::fs::read_to_string(&logger.artifacts().json).unwrap())
                .unwrap();
        assert_eq!(mid.records.len(), 1);
        let text = std::fs::read_to_string(&logger.artifacts().text_log).unwrap();
        assert!(text.contains("status=Success"));

        let artifacts = logger.finish().unwrap();
        let done: SweepDocument =
            serde_json::from_str(&std::fs::read_to_string(&artifacts.json).unwrap()).unwrap();
        assert!(done.finished_at.is_some());
        assert_eq!(done.records[0].quality, Some(95.0));
        assert!(!artifacts.json.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_json_flush_cadence() {
        let dir = TempDir::new().unwrap();
        let mut logger = ResultLogger::create(dir.path(), "sweep_batch", document(), 3).unwrap();
        let read = |logger: &ResultLogger| -> usize {
            let doc: SweepDocument =
                serde_json::from_str(&std::fs::read_to_string(&logger.artifacts().json).unwrap())
                    .unwrap();
            doc.records.len()
        };

        for expected in [0, 0, 3, 3, 3, 6] {
            logger
                .record(RunRecord::from_stages(&item(), "t", &success("OK"), None))
                .unwrap();
            assert_eq!(read(&logger), expected);
        }
        // the text log is never batched
        let text = std::fs::read_to_string(&logger.artifacts().text_log).unwrap();
        assert_eq!(text.matches("[0003]").count(), 6);
        assert_eq!(logger.records().len(), 6);
    }

    #[test]
    fn test_create_refuses_existing_run_files() {
        let dir = TempDir::new().unwrap();
        let logger = ResultLogger::create(dir.path(), "sweep_same", document(), 1).unwrap();
        let artifacts = logger.finish().unwrap();
        let text_before = std::fs::read_to_string(&artifacts.text_log).unwrap();

        let again = ResultLogger::create(dir.path(), "sweep_same", document(), 1);
        assert!(matches!(again, Err(HarnessError::RunExists { .. })));
        assert_eq!(std::fs::read_to_string(&artifacts.text_log).unwrap(), text_before);

        // either file alone is enough to refuse
        std::fs::remove_file(&artifacts.text_log).unwrap();
        let json_only = ResultLogger::create(dir.path(), "sweep_same", document(), 1);
        assert!(matches!(json_only, Err(HarnessError::RunExists { .. })));
        assert!(!artifacts.text_log.exists());

        std::fs::write(dir.path().join("sweep_log_only.log"), b"old").unwrap();
        let log_only = ResultLogger::create(dir.path(), "sweep_log_only", document(), 1);
        assert!(matches!(log_only, Err(HarnessError::RunExists { .. })));
    }

    #[test]
    fn test_create_fails_when_output_is_a_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        let result = ResultLogger::create(&file, "sweep", document(), 1);
        assert!(matches!(result, Err(HarnessError::Output { .. })));
    }
}
