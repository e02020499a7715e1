//! 🔥 External Quality Evaluator Adapter - 独立 VMAF 工具集成
//!
//! Compares the original source against the transcoder's reconstruction
//! with the standalone `vmaf` tool. Standalone vmaf reads raw YUV/Y4M, so
//! both inputs are converted to Y4M with ffmpeg first (can be disabled for
//! tools that read containers directly). Y4M copies and the JSON report
//! are written into the item's scratch region.

use crate::error::Result;
use crate::scratch::ScratchRegion;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared_utils::{run_tool, CommandTemplate, Placeholders, ToolOutput, ToolProcess};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_QUALITY_CMD: &str =
    "vmaf --reference {reference} --distorted {distorted} --output {output} --json";
pub const DEFAULT_METRIC: &str = "vmaf";
pub const DEFAULT_FFMPEG: &str = "ffmpeg";

pub const QUALITY_PLACEHOLDERS: &[&str] = &["reference", "distorted", "output", "scratch"];

const REPORT_FILE: &str = "quality.json";
const REFERENCE_Y4M: &str = "reference.y4m";
const DISTORTED_Y4M: &str = "distorted.y4m";

/// Pooled score of one comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub metric: String,
    pub mean: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harmonic_mean: Option<f64>,
}

impl QualityScore {
    pub fn mean_only(metric: &str, mean: f64) -> Self {
        Self {
            metric: metric.to_string(),
            mean,
            min: None,
            max: None,
            harmonic_mean: None,
        }
    }
}

/// Kept distinct from transcode failures so the two classes stay
/// separable in the results.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("quality evaluation failed: {reason}")]
    Failed { reason: String },

    #[error("quality evaluation timed out after {secs:.1}s")]
    TimedOut { secs: f64 },
}

impl EvaluationError {
    fn failed(reason: impl Into<String>) -> Self {
        EvaluationError::Failed {
            reason: reason.into(),
        }
    }

    fn from_output(step: &str, output: &ToolOutput, budget: &EvalBudget) -> Self {
        if output.timed_out {
            budget.exhausted()
        } else {
            EvaluationError::failed(format!("{}: {}", step, output.failure_reason()))
        }
    }
}

/// One time limit shared by every subprocess of a single evaluation
/// (both Y4M conversions and the quality tool).
struct EvalBudget {
    started: Instant,
    deadline: Option<Instant>,
}

impl EvalBudget {
    fn start(timeout: Option<Duration>) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: timeout.map(|limit| started + limit),
        }
    }

    /// Time left for the next step; `None` means unlimited.
    fn remaining(&self) -> std::result::Result<Option<Duration>, EvaluationError> {
        match self.deadline {
            None => Ok(None),
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    Err(self.exhausted())
                } else {
                    Ok(Some(left))
                }
            }
        }
    }

    fn exhausted(&self) -> EvaluationError {
        EvaluationError::TimedOut {
            secs: self.started.elapsed().as_secs_f64(),
        }
    }
}

pub trait QualityEvaluator {
    fn evaluate(
        &self,
        original: &Path,
        reconstructed: &Path,
        region: &ScratchRegion,
    ) -> std::result::Result<QualityScore, EvaluationError>;
}

impl<E: QualityEvaluator + ?Sized> QualityEvaluator for &E {
    fn evaluate(
        &self,
        original: &Path,
        reconstructed: &Path,
        region: &ScratchRegion,
    ) -> std::result::Result<QualityScore, EvaluationError> {
        (**self).evaluate(original, reconstructed, region)
    }
}

#[derive(Debug, Clone)]
pub struct VmafEvaluator {
    command: CommandTemplate,
    ffmpeg: String,
    convert_to_y4m: bool,
    metric: String,
    timeout: Option<Duration>,
}

impl VmafEvaluator {
    pub fn new(command: CommandTemplate, metric: &str, timeout: Option<Duration>) -> Result<Self> {
        command.validate(QUALITY_PLACEHOLDERS)?;
        Ok(Self {
            command,
            ffmpeg: DEFAULT_FFMPEG.to_string(),
            convert_to_y4m: true,
            metric: metric.to_string(),
            timeout,
        })
    }

    pub fn with_ffmpeg(mut self, ffmpeg: &str) -> Self {
        self.ffmpeg = ffmpeg.to_string();
        self
    }

    pub fn with_y4m_conversion(mut self, enabled: bool) -> Self {
        self.convert_to_y4m = enabled;
        self
    }

    pub fn programs(&self) -> Vec<&str> {
        let mut programs = vec![self.command.program.as_str()];
        if self.convert_to_y4m {
            programs.push(self.ffmpeg.as_str());
        }
        programs
    }

    /// 转换视频为 Y4M 格式
    fn convert_to_y4m(
        &self,
        input: &Path,
        output: &Path,
        budget: &EvalBudget,
    ) -> std::result::Result<(), EvaluationError> {
        let args = [
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-f".to_string(),
            "yuv4mpegpipe".to_string(),
            output.to_string_lossy().into_owned(),
        ];
        let result = run_tool("ffmpeg", &self.ffmpeg, &args, budget.remaining()?)
            .map_err(|e| EvaluationError::failed(e.to_string()))?;
        if !result.success() {
            return Err(EvaluationError::from_output("Y4M conversion", &result, budget));
        }
        Ok(())
    }
}

impl QualityEvaluator for VmafEvaluator {
    fn evaluate(
        &self,
        original: &Path,
        reconstructed: &Path,
        region: &ScratchRegion,
    ) -> std::result::Result<QualityScore, EvaluationError> {
        let budget = EvalBudget::start(self.timeout);
        if !reconstructed.is_file() {
            return Err(EvaluationError::failed(format!(
                "reconstructed output missing: {}",
                reconstructed.display()
            )));
        }

        let (reference, distorted) = if self.convert_to_y4m {
            let reference = region.file(REFERENCE_Y4M);
            let distorted = region.file(DISTORTED_Y4M);
            self.convert_to_y4m(original, &reference, &budget)?;
            self.convert_to_y4m(reconstructed, &distorted, &budget)?;
            (reference, distorted)
        } else {
            (original.to_path_buf(), reconstructed.to_path_buf())
        };

        let report = region.file(REPORT_FILE);
        let mut values = Placeholders::new();
        values
            .insert("reference", reference.to_string_lossy())
            .insert("distorted", distorted.to_string_lossy())
            .insert("output", report.to_string_lossy())
            .insert("scratch", region.path().to_string_lossy());
        let rendered = self
            .command
            .render(&values)
            .map_err(|e| EvaluationError::failed(e.to_string()))?;

        let timeout = budget.remaining()?;
        let output = ToolProcess::spawn("quality", &mut rendered.to_command())
            .and_then(|process| process.wait_with_timeout(timeout))
            .map_err(|e| EvaluationError::failed(e.to_string()))?;
        if !output.success() {
            return Err(EvaluationError::from_output("quality tool", &output, &budget));
        }

        // the report file wins; tools that print their score use stdout
        let text = match std::fs::read_to_string(&report) {
            Ok(text) if !text.trim().is_empty() => text,
            _ => output.stdout,
        };
        let score = parse_quality_report(&text, &self.metric).map_err(EvaluationError::failed)?;
        info!(metric = %score.metric, mean = score.mean, "Quality evaluated");
        Ok(score)
    }
}

/// 解析质量工具输出
///
/// Accepts a VMAF JSON report (`pooled_metrics.<metric>.{mean,min,max,harmonic_mean}`),
/// a flat JSON object with a numeric `<metric>` or `score` field, a bare
/// JSON number, or plain text holding a single number.
pub fn parse_quality_report(text: &str, metric: &str) -> std::result::Result<QualityScore, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("quality tool produced no output".to_string());
    }

    if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
        return score_from_json(&json, metric);
    }

    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|mean| QualityScore::mean_only(metric, mean))
        .ok_or_else(|| {
            debug!(output = %trimmed, "Unrecognized quality output");
            format!("unparseable quality output: {}", first_line(trimmed))
        })
}

fn score_from_json(json: &Value, metric: &str) -> std::result::Result<QualityScore, String> {
    if let Some(mean) = json.as_f64() {
        return Ok(QualityScore::mean_only(metric, mean));
    }

    if let Some(pooled) = json.get("pooled_metrics").and_then(|p| p.get(metric)) {
        let field = |name: &str| pooled.get(name).and_then(Value::as_f64);
        let mean = field("mean").ok_or_else(|| format!("pooled_metrics.{}.mean missing", metric))?;
        return Ok(QualityScore {
            metric: metric.to_string(),
            mean,
            min: field("min"),
            max: field("max"),
            harmonic_mean: field("harmonic_mean"),
        });
    }

    json.get(metric)
        .or_else(|| json.get("score"))
        .and_then(Value::as_f64)
        .map(|mean| QualityScore::mean_only(metric, mean))
        .ok_or_else(|| format!("metric '{}' not found in quality report", metric))
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VMAF_REPORT: &str = r#"{
        "version": "2.3.1",
        "frames": [],
        "pooled_metrics": {
            "vmaf": { "min": 71.2, "max": 99.1, "mean": 95.0, "harmonic_mean": 94.7 },
            "float_ms_ssim": { "min": 0.9, "max": 1.0, "mean": 0.97, "harmonic_mean": 0.96 }
        }
    }"#;

    #[test]
    fn test_parse_vmaf_report() {
        let score = parse_quality_report(VMAF_REPORT, "vmaf").unwrap();
        assert_eq!(score.metric, "vmaf");
        assert_eq!(score.mean, 95.0);
        assert_eq!(score.min, Some(71.2));
        assert_eq!(score.max, Some(99.1));
        assert_eq!(score.harmonic_mean, Some(94.7));
    }

    #[test]
    fn test_parse_other_pooled_metric() {
        let score = parse_quality_report(VMAF_REPORT, "float_ms_ssim").unwrap();
        assert_eq!(score.mean, 0.97);
    }

    #[test]
    fn test_parse_missing_metric() {
        let err = parse_quality_report(VMAF_REPORT, "psnr").unwrap_err();
        assert!(err.contains("psnr"));
    }

    #[test]
    fn test_parse_bare_number_and_flat_json() {
        assert_eq!(parse_quality_report("80.5\n", "vmaf").unwrap().mean, 80.5);
        assert_eq!(parse_quality_report("42", "vmaf").unwrap().mean, 42.0);
        assert_eq!(
            parse_quality_report(r#"{"score": 12.5}"#, "vmaf").unwrap().mean,
            12.5
        );
        assert_eq!(
            parse_quality_report(r#"{"vmaf": 88}"#, "vmaf").unwrap().mean,
            88.0
        );
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_quality_report("", "vmaf").is_err());
        assert!(parse_quality_report("NaN", "vmaf").is_err());
        let err = parse_quality_report("segfault\nmore", "vmaf").unwrap_err();
        assert_eq!(err, "unparseable quality output: segfault");
    }

    #[test]
    fn test_quality_score_json_omits_absent_fields() {
        let json = serde_json::to_string(&QualityScore::mean_only("vmaf", 1.5)).unwrap();
        assert_eq!(json, r#"{"metric":"vmaf","mean":1.5}"#);
    }

    #[test]
    fn test_new_rejects_unknown_placeholder() {
        let t = CommandTemplate::parse("vmaf {reference} {distroted}").unwrap();
        assert!(VmafEvaluator::new(t, "vmaf", None).is_err());
    }

    #[test]
    fn test_programs() {
        let t = CommandTemplate::parse(DEFAULT_QUALITY_CMD).unwrap();
        let e = VmafEvaluator::new(t, DEFAULT_METRIC, None).unwrap();
        assert_eq!(e.programs(), vec!["vmaf", "ffmpeg"]);
        assert_eq!(e.with_y4m_conversion(false).programs(), vec!["vmaf"]);
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::config::Threshold;
        use crate::scratch::ScratchManager;
        use crate::sweep::WorkItem;
        use std::path::PathBuf;
        use tempfile::TempDir;

        fn setup(dir: &TempDir) -> (ScratchManager, PathBuf, PathBuf) {
            let original = dir.path().join("a.mp4");
            let reconstructed = dir.path().join("recon.mp4");
            std::fs::write(&original, b"orig").unwrap();
            std::fs::write(&reconstructed, b"recon").unwrap();
            let scratch = dir.path().join("scratch");
            std::fs::create_dir(&scratch).unwrap();
            (ScratchManager::open(&scratch).unwrap(), original, reconstructed)
        }

        fn region(manager: &ScratchManager) -> ScratchRegion {
            manager
                .acquire(&WorkItem {
                    index: 1,
                    file: "a.mp4".to_string(),
                    source: PathBuf::from("a.mp4"),
                    threshold: Threshold::new(0),
                    baseline: Threshold::new(0),
                })
                .unwrap()
        }

        fn sh(script: &str, args: &str) -> CommandTemplate {
            let mut t = CommandTemplate::parse(&format!("sh -c SCRIPT sh {}", args)).unwrap();
            t.args[1] = script.to_string();
            t
        }

        #[test]
        fn test_report_file_is_parsed() {
            let dir = TempDir::new().unwrap();
            let (manager, original, reconstructed) = setup(&dir);
            let region = region(&manager);
            let script = r#"echo '{"pooled_metrics":{"vmaf":{"mean":91.5}}}' > "$3""#;
            let evaluator = VmafEvaluator::new(
                sh(script, "{reference} {distorted} {output}"),
                "vmaf",
                Some(Duration::from_secs(30)),
            )
            .unwrap()
            .with_y4m_conversion(false);

            let score = evaluator.evaluate(&original, &reconstructed, &region).unwrap();
            assert_eq!(score.mean, 91.5);
        }

        #[test]
        fn test_stdout_score() {
            let dir = TempDir::new().unwrap();
            let (manager, original, reconstructed) = setup(&dir);
            let region = region(&manager);
            let evaluator = VmafEvaluator::new(sh("echo 77.25", "{reference}"), "vmaf", None)
                .unwrap()
                .with_y4m_conversion(false);

            let score = evaluator.evaluate(&original, &reconstructed, &region).unwrap();
            assert_eq!(score, QualityScore::mean_only("vmaf", 77.25));
        }

        #[test]
        fn test_missing_reconstruction() {
            let dir = TempDir::new().unwrap();
            let (manager, original, _) = setup(&dir);
            let region = region(&manager);
            let evaluator = VmafEvaluator::new(sh("echo 1", "{reference}"), "vmaf", None)
                .unwrap()
                .with_y4m_conversion(false);

            let err = evaluator
                .evaluate(&original, &dir.path().join("nope.mp4"), &region)
                .unwrap_err();
            assert!(err.to_string().contains("reconstructed output missing"));
        }

        #[test]
        fn test_tool_failure_and_timeout() {
            let dir = TempDir::new().unwrap();
            let (manager, original, reconstructed) = setup(&dir);
            let region = region(&manager);

            let failing = VmafEvaluator::new(sh("echo 'no model' >&2; exit 1", "{reference}"), "vmaf", None)
                .unwrap()
                .with_y4m_conversion(false);
            let err = failing.evaluate(&original, &reconstructed, &region).unwrap_err();
            assert_eq!(
                err,
                EvaluationError::Failed {
                    reason: "quality tool: exit code 1: no model".to_string()
                }
            );

            let hanging = VmafEvaluator::new(
                sh("exec sleep 10", "{reference}"),
                "vmaf",
                Some(Duration::from_millis(200)),
            )
            .unwrap()
            .with_y4m_conversion(false);
            let err = hanging.evaluate(&original, &reconstructed, &region).unwrap_err();
            assert!(matches!(err, EvaluationError::TimedOut { .. }));
        }

        fn slow_ffmpeg(dir: &TempDir, delay: &str) -> PathBuf {
            use std::os::unix::fs::PermissionsExt;
            let path = dir.path().join("slow_ffmpeg.sh");
            std::fs::write(
                &path,
                format!("#!/bin/sh\nsleep {}\nfor last; do :; done\ncp \"$3\" \"$last\"\n", delay),
            )
            .unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn test_one_timeout_covers_conversions_and_quality_tool() {
            let dir = TempDir::new().unwrap();
            let (manager, original, reconstructed) = setup(&dir);
            let region = region(&manager);
            let ffmpeg = slow_ffmpeg(&dir, "0.6");

            // each step alone fits in 1s; all three together do not
            let evaluator = VmafEvaluator::new(
                sh("sleep 0.6; echo 90", "{reference}"),
                "vmaf",
                Some(Duration::from_secs(1)),
            )
            .unwrap()
            .with_ffmpeg(&ffmpeg.to_string_lossy());

            let started = Instant::now();
            let err = evaluator.evaluate(&original, &reconstructed, &region).unwrap_err();
            let elapsed = started.elapsed();
            assert!(matches!(err, EvaluationError::TimedOut { .. }), "{:?}", err);
            assert!(elapsed < Duration::from_millis(1900), "took {:?}", elapsed);
            match err {
                EvaluationError::TimedOut { secs } => assert!(secs >= 0.9, "{}", secs),
                _ => unreachable!(),
            }
        }

        #[test]
        fn test_conversions_within_budget_still_score() {
            let dir = TempDir::new().unwrap();
            let (manager, original, reconstructed) = setup(&dir);
            let region = region(&manager);
            let ffmpeg = slow_ffmpeg(&dir, "0.1");

            let evaluator = VmafEvaluator::new(sh("echo 90", "{reference}"), "vmaf", Some(Duration::from_secs(30)))
                .unwrap()
                .with_ffmpeg(&ffmpeg.to_string_lossy());
            let score = evaluator.evaluate(&original, &reconstructed, &region).unwrap();
            assert_eq!(score.mean, 90.0);
        }

        #[test]
        fn test_y4m_conversion_uses_ffmpeg_program() {
            let dir = TempDir::new().unwrap();
            let (manager, original, reconstructed) = setup(&dir);
            let region = region(&manager);

            // fake ffmpeg: copies its input (arg 3) to its output (last arg)
            let fake_ffmpeg = dir.path().join("fake_ffmpeg.sh");
            std::fs::write(
                &fake_ffmpeg,
                "#!/bin/sh\nfor last; do :; done\ncp \"$3\" \"$last\"\n",
            )
            .unwrap();
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&fake_ffmpeg, std::fs::Permissions::from_mode(0o755))
                .unwrap();

            let evaluator = VmafEvaluator::new(
                sh(r#"cat "$1" "$2""#, "{reference} {distorted}"),
                "vmaf",
                None,
            )
            .unwrap()
            .with_ffmpeg(&fake_ffmpeg.to_string_lossy());

            // "origrecon" is not a number, so the scores are unparseable, but
            // both Y4M copies must exist in the region
            let err = evaluator.evaluate(&original, &reconstructed, &region).unwrap_err();
            assert!(err.to_string().contains("unparseable"));
            assert!(region.file(REFERENCE_Y4M).is_file());
            assert!(region.file(DISTORTED_Y4M).is_file());
        }
    }
}
