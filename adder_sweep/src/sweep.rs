//! Sweep Driver
//!
//! Outer loop over thresholds in the order given, inner loop over the
//! file list in file order. Each work item runs strictly in sequence:
//!
//! ```text
//! acquire scratch → transcode → evaluate (transcode success only) → record → release
//! ```
//!
//! A failure at any stage becomes that item's `RunRecord`; the sweep always
//! moves on to the next item. Only startup problems (file list, scratch
//! root, output directory) stop the run, and they stop it before the first
//! item.

use crate::config::{ScratchPolicy, SweepConfig, Threshold};
use crate::error::Result;
use crate::evaluator::QualityEvaluator;
use crate::file_list::{resolve_source, FileList};
use crate::report::SweepSummary;
use crate::result_log::{now_rfc3339, ResultLogger, RunRecord, SweepArtifacts, SweepDocument};
use crate::scratch::ScratchManager;
use crate::transcoder::{TranscodeOutcome, Transcoder};
use shared_utils::create_progress_bar;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

/// One (file, threshold) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// 1-based position in sweep order
    pub index: usize,
    /// Entry as written in the file list
    pub file: String,
    /// Resolved against the dataset root
    pub source: PathBuf,
    pub threshold: Threshold,
    pub baseline: Threshold,
}

/// Expand thresholds × files into work items, thresholds outermost.
pub fn plan_work_items(
    thresholds: &[Threshold],
    files: &FileList,
    dataset_root: &Path,
    baseline: Threshold,
) -> Vec<WorkItem> {
    thresholds
        .iter()
        .flat_map(|&threshold| {
            files.entries().iter().map(move |file| (threshold, file))
        })
        .enumerate()
        .map(|(i, (threshold, file))| WorkItem {
            index: i + 1,
            file: file.clone(),
            source: resolve_source(dataset_root, file),
            threshold,
            baseline,
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct SweepReport {
    pub summary: SweepSummary,
    pub artifacts: SweepArtifacts,
}

/// Owns every resource of a run: scratch session, both adapters, logger.
pub struct Sweep<T, E> {
    scratch: ScratchManager,
    transcoder: T,
    evaluator: E,
    logger: ResultLogger,
    policy: ScratchPolicy,
}

impl<T: Transcoder, E: QualityEvaluator> Sweep<T, E> {
    pub fn new(
        scratch: ScratchManager,
        transcoder: T,
        evaluator: E,
        logger: ResultLogger,
        policy: ScratchPolicy,
    ) -> Self {
        Self {
            scratch,
            transcoder,
            evaluator,
            logger,
            policy,
        }
    }

    pub fn run(mut self, items: &[WorkItem]) -> Result<SweepReport> {
        let started = Instant::now();
        let mut summary = SweepSummary::new();
        let pb = create_progress_bar(items.len() as u64, "Sweep");

        for item in items {
            pb.set_message(format!("{} @ t={}", item.file, item.threshold));
            let record = self.process(item);

            if record.status.is_success() {
                info!(
                    index = item.index,
                    file = %item.file,
                    threshold = %item.threshold,
                    quality = ?record.quality,
                    duration_secs = record.duration_secs,
                    "✅ Work item done"
                );
            } else {
                warn!(
                    index = item.index,
                    file = %item.file,
                    threshold = %item.threshold,
                    status = record.status.as_str(),
                    error = record.error.as_deref().unwrap_or_default(),
                    "❌ Work item failed"
                );
            }

            summary.add(&record);
            // an unwritable result file must not stop the sweep; finish() retries the JSON
            if let Err(e) = self.logger.record(record) {
                error!(index = item.index, error = %e, "Failed to persist result record");
            }
            pb.inc(1);
        }
        pb.finish_and_clear();
        summary.duration = started.elapsed();

        if let Err(e) = self.scratch.close() {
            warn!(error = %e, "Scratch session cleanup failed");
        }
        let artifacts = self.logger.finish()?;
        Ok(SweepReport { summary, artifacts })
    }

    fn process(&self, item: &WorkItem) -> RunRecord {
        let started_at = now_rfc3339();

        let region = match self.scratch.acquire(item) {
            Ok(region) => region,
            Err(e) => return RunRecord::staging_failed(item, &started_at, &e),
        };

        let transcode = self.transcoder.transcode(item, &region);
        let quality = match &transcode {
            TranscodeOutcome::Success(report) => {
                Some(self.evaluator.evaluate(&item.source, &report.reconstructed, &region))
            }
            _ => None,
        };
        let mut record = RunRecord::from_stages(item, &started_at, &transcode, quality.as_ref());

        if record.status.is_success() || self.policy == ScratchPolicy::AlwaysRemove {
            if let Err(e) = region.release() {
                warn!(index = item.index, error = %e, "Scratch region not released");
            }
        } else {
            let kept = region.retain();
            info!(index = item.index, region = %kept.display(), "Scratch region kept for inspection");
            record.scratch_retained = Some(kept);
        }
        record
    }
}

/// Load inputs, verify scratch storage, open the result files, and run
/// every work item. Errors returned here mean the sweep never started (or
/// the final JSON could not be written).
pub fn run_sweep<T: Transcoder, E: QualityEvaluator>(
    config: &SweepConfig,
    transcoder: T,
    evaluator: E,
) -> Result<SweepReport> {
    let files = FileList::load(&config.file_list)?;
    if files.is_empty() {
        warn!(path = %config.file_list.display(), "File list has no entries");
    }
    for missing in files.missing_sources(&config.dataset_root) {
        warn!(file = missing, "Source file not found under dataset root");
    }

    let scratch = ScratchManager::open(&config.scratch_root)?;

    let items = plan_work_items(&config.thresholds, &files, &config.dataset_root, config.baseline);
    info!(
        thresholds = config.thresholds.len(),
        files = files.len(),
        work_items = items.len(),
        "Sweep planned"
    );

    let document = SweepDocument::new(
        &config.dataset_root,
        &config.file_list,
        config.baseline,
        &config.thresholds,
    );
    let logger = match ResultLogger::create(
        &config.output_dir,
        &config.run_name,
        document,
        config.json_flush_every,
    ) {
        Ok(logger) => logger,
        Err(e) => {
            // nothing ran; leave no empty session behind
            if let Err(cleanup) = scratch.close() {
                warn!(error = %cleanup, "Scratch session cleanup failed");
            }
            return Err(e);
        }
    };

    Sweep::new(scratch, transcoder, evaluator, logger, config.scratch_policy).run(&items)
}
