use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn, Level};

use adder_sweep::config::{
    default_run_name, default_thresholds, parse_threshold_list, timeout_from_secs,
    DEFAULT_EVAL_TIMEOUT_SECS, DEFAULT_TRANSCODE_TIMEOUT_SECS,
};
use adder_sweep::evaluator::{DEFAULT_FFMPEG, DEFAULT_METRIC, DEFAULT_QUALITY_CMD};
use adder_sweep::transcoder::{DEFAULT_INFO_CMD, DEFAULT_TRANSCODER_CMD};
use adder_sweep::{
    print_summary_report, run_sweep, CommandTranscoder, ScratchPolicy, SweepConfig, Threshold,
    VmafEvaluator,
};
use shared_utils::{CommandTemplate, LogConfig};

#[derive(Parser)]
#[command(name = "adder-sweep")]
#[command(version, about = "ADΔER contrast threshold sweep: transcode, score quality, log results", long_about = None)]
struct Cli {
    /// Dataset root; file list entries are relative to it
    #[arg(value_name = "DATASET")]
    dataset: PathBuf,
    /// One dataset-relative path per line
    #[arg(value_name = "FILE_LIST")]
    file_list: PathBuf,
    #[arg(value_name = "OUTPUT_DIR")]
    output_dir: PathBuf,
    /// Baseline contrast threshold passed to every transcode
    #[arg(value_name = "BASELINE")]
    baseline: Threshold,
    /// Fast scratch storage root, e.g. /dev/shm
    #[arg(value_name = "SCRATCH_ROOT")]
    scratch_root: PathBuf,

    /// Comma separated thresholds, swept in the given order
    #[arg(long, value_name = "CSV")]
    thresholds: Option<String>,

    #[arg(long, value_name = "TEMPLATE", default_value = DEFAULT_TRANSCODER_CMD)]
    transcoder_cmd: String,
    #[arg(long, value_name = "TEMPLATE", default_value = DEFAULT_INFO_CMD)]
    info_cmd: String,
    /// Skip the info report and keep the transcoder's own stdout as the summary
    #[arg(long)]
    no_info: bool,

    #[arg(long, value_name = "TEMPLATE", default_value = DEFAULT_QUALITY_CMD)]
    quality_cmd: String,
    #[arg(long, value_name = "NAME", default_value = DEFAULT_METRIC)]
    quality_metric: String,
    /// Hand the original and reconstructed files to the quality tool as-is
    #[arg(long)]
    no_y4m: bool,
    #[arg(long, value_name = "PROGRAM", default_value = DEFAULT_FFMPEG)]
    ffmpeg: String,

    /// Seconds, 0 disables
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_TRANSCODE_TIMEOUT_SECS)]
    transcode_timeout: u64,
    /// Seconds, 0 disables
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_EVAL_TIMEOUT_SECS)]
    eval_timeout: u64,

    /// Rewrite the JSON document every N records
    #[arg(long, value_name = "N", default_value_t = 1)]
    json_flush_every: usize,
    /// Keep scratch regions of failed items for inspection
    #[arg(long)]
    keep_failed_scratch: bool,
    /// Result file stem (default: sweep_<timestamp>)
    #[arg(long, value_name = "NAME")]
    run_name: Option<String>,

    /// Diagnostic log directory (default: system temp dir)
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
    #[arg(short, long)]
    verbose: bool,
    /// No progress bar, only warnings on stderr
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::default().with_level(if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    });
    if cli.quiet {
        log_config = log_config.with_stderr_level(Level::WARN);
    }
    if let Some(dir) = &cli.log_dir {
        log_config = log_config.with_log_dir(dir);
    }
    if let Err(e) = shared_utils::init_logging("adder_sweep", log_config) {
        eprintln!("⚠️  Logging unavailable: {:#}", e);
    }
    if cli.quiet {
        shared_utils::enable_quiet_mode();
    }

    let thresholds = match &cli.thresholds {
        Some(text) => parse_threshold_list(text).context("Invalid --thresholds")?,
        None => default_thresholds(),
    };

    let transcoder_cmd =
        CommandTemplate::parse(&cli.transcoder_cmd).context("Invalid --transcoder-cmd")?;
    if !transcoder_cmd.uses("threshold") {
        warn!(template = %transcoder_cmd, "Transcoder template never uses {{threshold}}, every item will be identical");
    }
    let info_cmd = if cli.no_info {
        None
    } else {
        Some(CommandTemplate::parse(&cli.info_cmd).context("Invalid --info-cmd")?)
    };
    let quality_cmd = CommandTemplate::parse(&cli.quality_cmd).context("Invalid --quality-cmd")?;

    let transcoder = CommandTranscoder::new(
        transcoder_cmd,
        info_cmd,
        timeout_from_secs(cli.transcode_timeout),
    )
    .context("Invalid transcoder command")?;
    let evaluator = VmafEvaluator::new(
        quality_cmd,
        &cli.quality_metric,
        timeout_from_secs(cli.eval_timeout),
    )
    .context("Invalid quality command")?
    .with_ffmpeg(&cli.ffmpeg)
    .with_y4m_conversion(!cli.no_y4m);

    let programs: Vec<&str> = transcoder
        .programs()
        .into_iter()
        .chain(evaluator.programs())
        .collect();
    for program in shared_utils::missing_tools(&programs) {
        warn!(program, "⚠️  Tool not found, every item that needs it will fail");
    }

    let policy = if cli.keep_failed_scratch {
        ScratchPolicy::KeepFailed
    } else {
        ScratchPolicy::AlwaysRemove
    };
    let config = SweepConfig::new(
        &cli.dataset,
        &cli.file_list,
        &cli.output_dir,
        cli.baseline,
        &cli.scratch_root,
    )
    .with_thresholds(thresholds)
    .with_json_flush_every(cli.json_flush_every)
    .with_scratch_policy(policy)
    .with_run_name(cli.run_name.clone().unwrap_or_else(default_run_name));

    info!(
        dataset = %config.dataset_root.display(),
        file_list = %config.file_list.display(),
        baseline = %config.baseline,
        thresholds = config.thresholds.len(),
        scratch = %config.scratch_root.display(),
        "🚀 Starting threshold sweep"
    );

    let report = run_sweep(&config, transcoder, evaluator).context("Sweep could not run")?;
    print_summary_report(&report.summary, &report.artifacts);
    Ok(())
}
