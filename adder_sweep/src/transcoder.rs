//! External Transcoder Adapter
//!
//! Runs the ADΔER transcoding pipeline once per work item, then (on
//! success) its info tool on the produced event stream. The info text is
//! stored verbatim as the item's summary.

use crate::error::Result;
use crate::scratch::ScratchRegion;
use crate::sweep::WorkItem;
use shared_utils::{CommandTemplate, Placeholders, ToolOutput, ToolProcess};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const DEFAULT_TRANSCODER_CMD: &str = "adder_simulproc --input {input} --output-events-path {events} --output-raw-video-path {reconstructed} --c-thresh-baseline {baseline} --c-thresh-max {threshold}";
pub const DEFAULT_INFO_CMD: &str = "adderinfo -i {events} -d";

/// Placeholders a transcoder template may use.
pub const TRANSCODER_PLACEHOLDERS: &[&str] = &[
    "input",
    "events",
    "reconstructed",
    "baseline",
    "threshold",
    "scratch",
];

/// Placeholders an info template may use.
pub const INFO_PLACEHOLDERS: &[&str] = &["input", "events", "reconstructed", "scratch"];

pub const EVENTS_FILE: &str = "events.adder";
pub const RECONSTRUCTED_FILE: &str = "reconstructed.mp4";

/// A successful transcode.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeReport {
    pub duration: Duration,
    pub exit_code: Option<i32>,
    pub events: PathBuf,
    pub reconstructed: PathBuf,
    /// Info report text, stored as-is
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranscodeOutcome {
    Success(TranscodeReport),
    /// Non-zero exit, or the pipeline could not be started at all
    Failed {
        duration: Duration,
        exit_code: Option<i32>,
        stderr: String,
    },
    TimedOut {
        duration: Duration,
        stderr: String,
    },
}

impl TranscodeOutcome {
    pub fn duration(&self) -> Duration {
        match self {
            TranscodeOutcome::Success(report) => report.duration,
            TranscodeOutcome::Failed { duration, .. } | TranscodeOutcome::TimedOut { duration, .. } => {
                *duration
            }
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TranscodeOutcome::Success(report) => report.exit_code,
            TranscodeOutcome::Failed { exit_code, .. } => *exit_code,
            TranscodeOutcome::TimedOut { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TranscodeOutcome::Success(_))
    }
}

/// Seam between the sweep driver and the real subprocess, so driver tests
/// can substitute a fake.
pub trait Transcoder {
    fn transcode(&self, item: &WorkItem, region: &ScratchRegion) -> TranscodeOutcome;
}

impl<T: Transcoder + ?Sized> Transcoder for &T {
    fn transcode(&self, item: &WorkItem, region: &ScratchRegion) -> TranscodeOutcome {
        (**self).transcode(item, region)
    }
}

/// Transcoder backed by external commands.
#[derive(Debug, Clone)]
pub struct CommandTranscoder {
    command: CommandTemplate,
    /// `None` uses the transcoder's own stdout as the summary
    info_command: Option<CommandTemplate>,
    timeout: Option<Duration>,
}

impl CommandTranscoder {
    pub fn new(
        command: CommandTemplate,
        info_command: Option<CommandTemplate>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        command.validate(TRANSCODER_PLACEHOLDERS)?;
        if let Some(info) = &info_command {
            info.validate(INFO_PLACEHOLDERS)?;
        }
        Ok(Self {
            command,
            info_command,
            timeout,
        })
    }

    /// Programs this transcoder runs, for availability checks.
    pub fn programs(&self) -> Vec<&str> {
        std::iter::once(self.command.program.as_str())
            .chain(self.info_command.iter().map(|c| c.program.as_str()))
            .collect()
    }

    fn placeholders(item: &WorkItem, region: &ScratchRegion) -> Placeholders {
        let mut values = Placeholders::new();
        values
            .insert("input", item.source.to_string_lossy())
            .insert("events", region.file(EVENTS_FILE).to_string_lossy())
            .insert(
                "reconstructed",
                region.file(RECONSTRUCTED_FILE).to_string_lossy(),
            )
            .insert("baseline", item.baseline.to_string())
            .insert("threshold", item.threshold.to_string())
            .insert("scratch", region.path().to_string_lossy());
        values
    }

    fn run(
        tool: &str,
        template: &CommandTemplate,
        values: &Placeholders,
        timeout: Option<Duration>,
    ) -> std::result::Result<ToolOutput, String> {
        let rendered = template.render(values).map_err(|e| e.to_string())?;
        ToolProcess::spawn(tool, &mut rendered.to_command())
            .and_then(|process| process.wait_with_timeout(timeout))
            .map_err(|e| e.to_string())
    }

    fn summary(&self, values: &Placeholders, transcode: &ToolOutput) -> String {
        let Some(info) = &self.info_command else {
            return transcode.stdout.clone();
        };
        match Self::run("info", info, values, self.timeout) {
            Ok(output) if output.success() => output.stdout,
            Ok(output) => {
                let reason = output.failure_reason();
                warn!(reason = %reason, "Info report failed, summary unavailable");
                format!("[info report unavailable: {}]", reason)
            }
            Err(e) => {
                warn!(error = %e, "Info tool could not be started, summary unavailable");
                format!("[info report unavailable: {}]", e)
            }
        }
    }
}

impl Transcoder for CommandTranscoder {
    fn transcode(&self, item: &WorkItem, region: &ScratchRegion) -> TranscodeOutcome {
        let values = Self::placeholders(item, region);
        let started = Instant::now();

        let output = match Self::run("transcoder", &self.command, &values, self.timeout) {
            Ok(output) => output,
            Err(e) => {
                return TranscodeOutcome::Failed {
                    duration: started.elapsed(),
                    exit_code: None,
                    stderr: e,
                }
            }
        };

        if output.timed_out {
            return TranscodeOutcome::TimedOut {
                duration: output.duration,
                stderr: output.stderr,
            };
        }
        if !output.success() {
            return TranscodeOutcome::Failed {
                duration: output.duration,
                exit_code: output.exit_code,
                stderr: output.stderr,
            };
        }

        info!(
            file = %item.file,
            threshold = %item.threshold,
            duration_secs = output.duration.as_secs_f64(),
            "Transcode finished"
        );
        TranscodeOutcome::Success(TranscodeReport {
            duration: output.duration,
            exit_code: output.exit_code,
            events: region.file(EVENTS_FILE),
            reconstructed: region.file(RECONSTRUCTED_FILE),
            summary: self.summary(&values, &output),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Threshold;
    use crate::scratch::ScratchManager;
    use tempfile::TempDir;

    fn item(source: PathBuf) -> WorkItem {
        WorkItem {
            index: 1,
            file: "a.mp4".to_string(),
            source,
            threshold: Threshold::new(50),
            baseline: Threshold::new(10),
        }
    }

    fn template(text: &str) -> CommandTemplate {
        CommandTemplate::parse(text).unwrap()
    }

    /// `sh -c <script> sh <args...>`: the script sees the rendered args as $1..$n
    fn sh(script: &str, args: &str) -> CommandTemplate {
        let mut t = template(&format!("sh -c SCRIPT sh {}", args));
        t.args[1] = script.to_string();
        t
    }

    #[test]
    fn test_new_rejects_unknown_placeholder() {
        let err = CommandTranscoder::new(template("x {inptu}"), None, None).unwrap_err();
        assert!(err.to_string().contains("inptu"));

        let err = CommandTranscoder::new(template("x {input}"), Some(template("i {threshold}")), None)
            .unwrap_err();
        assert!(err.to_string().contains("threshold"));
    }

    #[test]
    fn test_default_templates_are_valid() {
        let t = CommandTranscoder::new(
            template(DEFAULT_TRANSCODER_CMD),
            Some(template(DEFAULT_INFO_CMD)),
            None,
        )
        .unwrap();
        assert_eq!(t.programs(), vec!["adder_simulproc", "adderinfo"]);
    }

    #[test]
    fn test_success_runs_info_and_passes_parameters() {
        let dir = TempDir::new().unwrap();
        let manager = ScratchManager::open(dir.path()).unwrap();
        let region = manager.acquire(&item(dir.path().join("a.mp4"))).unwrap();

        let transcoder = CommandTranscoder::new(
            sh(
                r#"printf '%s %s' "$2" "$3" > "$1"; echo recon > "$4""#,
                "{events} {baseline} {threshold} {reconstructed}",
            ),
            Some(sh(r#"echo "events: $(cat "$1")""#, "{events}")),
            Some(Duration::from_secs(30)),
        )
        .unwrap();

        let outcome = transcoder.transcode(&item(dir.path().join("a.mp4")), &region);
        let TranscodeOutcome::Success(report) = outcome else {
            panic!("expected success, got {:?}", outcome);
        };
        assert_eq!(report.summary.trim(), "events: 10 50");
        assert_eq!(report.exit_code, Some(0));
        assert!(report.reconstructed.is_file());
        assert_eq!(report.events, region.file(EVENTS_FILE));
        region.release().unwrap();
    }

    #[test]
    fn test_failure_captures_stderr_and_skips_info() {
        let dir = TempDir::new().unwrap();
        let manager = ScratchManager::open(dir.path()).unwrap();
        let region = manager.acquire(&item(dir.path().join("a.mp4"))).unwrap();
        let marker = dir.path().join("info_ran");

        let transcoder = CommandTranscoder::new(
            sh("echo 'bad input' >&2; exit 2", "{input}"),
            Some(template(&format!("touch {}", marker.display()))),
            None,
        )
        .unwrap();

        let outcome = transcoder.transcode(&item(dir.path().join("a.mp4")), &region);
        match outcome {
            TranscodeOutcome::Failed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(2));
                assert_eq!(stderr.trim(), "bad input");
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!marker.exists());
    }

    #[test]
    fn test_missing_program_is_failure() {
        let dir = TempDir::new().unwrap();
        let manager = ScratchManager::open(dir.path()).unwrap();
        let region = manager.acquire(&item(dir.path().join("a.mp4"))).unwrap();
        let transcoder =
            CommandTranscoder::new(template("no_such_transcoder_xyz {input}"), None, None).unwrap();

        let outcome = transcoder.transcode(&item(dir.path().join("a.mp4")), &region);
        assert!(matches!(outcome, TranscodeOutcome::Failed { exit_code: None, .. }));
    }

    #[test]
    fn test_timeout() {
        let dir = TempDir::new().unwrap();
        let manager = ScratchManager::open(dir.path()).unwrap();
        let region = manager.acquire(&item(dir.path().join("a.mp4"))).unwrap();
        let transcoder = CommandTranscoder::new(
            sh("exec sleep 10", "{input}"),
            None,
            Some(Duration::from_millis(200)),
        )
        .unwrap();

        let outcome = transcoder.transcode(&item(dir.path().join("a.mp4")), &region);
        assert!(matches!(outcome, TranscodeOutcome::TimedOut { .. }));
        assert_eq!(outcome.exit_code(), None);
    }

    #[test]
    fn test_info_failure_keeps_success() {
        let dir = TempDir::new().unwrap();
        let manager = ScratchManager::open(dir.path()).unwrap();
        let region = manager.acquire(&item(dir.path().join("a.mp4"))).unwrap();
        let transcoder = CommandTranscoder::new(
            sh("exit 0", "{input}"),
            Some(sh("echo 'no header' >&2; exit 1", "{events}")),
            None,
        )
        .unwrap();

        let outcome = transcoder.transcode(&item(dir.path().join("a.mp4")), &region);
        let TranscodeOutcome::Success(report) = outcome else {
            panic!("info failure must not fail the transcode");
        };
        assert_eq!(
            report.summary,
            "[info report unavailable: exit code 1: no header]"
        );
    }

    #[test]
    fn test_without_info_uses_transcoder_stdout() {
        let dir = TempDir::new().unwrap();
        let manager = ScratchManager::open(dir.path()).unwrap();
        let region = manager.acquire(&item(dir.path().join("a.mp4"))).unwrap();
        let transcoder =
            CommandTranscoder::new(sh("echo OK", "{input}"), None, None).unwrap();

        let TranscodeOutcome::Success(report) =
            transcoder.transcode(&item(dir.path().join("a.mp4")), &region)
        else {
            panic!("expected success");
        };
        assert_eq!(report.summary, "OK\n");
    }
}
