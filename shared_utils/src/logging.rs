//! Logging Module - 统一的日志系统
//!
//! 基于 tracing 的诊断日志：
//! - stderr 输出（带颜色）
//! - 日志目录中按天轮转的文件输出
//! - 旧日志文件自动清理
//! - 外部工具调用的结构化记录
//!
//! This is the diagnostic log. The sweep's own result artifacts (text log and
//! JSON document) are written by the tool crate, not through tracing.
//!
//! # Examples
//!
//! ```no_run
//! use shared_utils::logging::{LogConfig, init_logging};
//! use tracing::info;
//!
//! let config = LogConfig::default();
//! init_logging("adder_sweep", config).expect("Failed to initialize logging");
//!
//! info!("Program started");
//! ```

use crate::tool_process::ToolOutput;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 诊断日志目录，默认系统临时目录
    pub log_dir: PathBuf,
    /// 保留最近几天的日志文件
    pub max_files: usize,
    /// 文件日志级别
    pub level: Level,
    /// stderr 上的最低级别；安静模式下只显示警告
    pub stderr_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: std::env::temp_dir(),
            max_files: 5,
            level: Level::INFO,
            stderr_level: Level::INFO,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.log_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_max_files(mut self, count: usize) -> Self {
        self.max_files = count;
        self
    }

    /// Sets both the file and the stderr level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self.stderr_level = level;
        self
    }

    pub fn with_stderr_level(mut self, level: Level) -> Self {
        self.stderr_level = level;
        self
    }
}

/// 初始化日志系统
///
/// Installs a global subscriber with an `EnvFilter` (`RUST_LOG` wins over
/// `config.level`), a daily rolling file layer named `{program_name}.log`
/// in `config.log_dir`, and a stderr layer capped at `config.stderr_level`.
/// Can only succeed once per process.
pub fn init_logging(program_name: &str, config: LogConfig) -> Result<()> {
    fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", config.log_dir))?;

    let log_file_name = format!("{}.log", program_name);
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, &log_file_name);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={level},shared_utils={level}",
            program_name,
            level = config.level
        ))
    });

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(LevelFilter::from_level(config.stderr_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Logging was already initialized")?;

    let pruned = prune_old_logs(&config.log_dir, program_name, config.max_files)?;
    tracing::debug!(
        program = program_name,
        log_dir = %config.log_dir.display(),
        level = %config.level,
        pruned,
        "Diagnostic log ready"
    );
    Ok(())
}

/// Delete all but the newest `keep` files of this program's rolling log
/// (`{program}.log.YYYY-MM-DD`). Returns how many were removed.
fn prune_old_logs(log_dir: &Path, program_name: &str, keep: usize) -> Result<usize> {
    let prefix = format!("{}.log", program_name);
    let mut logs: Vec<(SystemTime, PathBuf)> = fs::read_dir(log_dir)
        .with_context(|| format!("Failed to read log directory: {:?}", log_dir))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .filter_map(|entry| {
            let metadata = entry.metadata().ok().filter(|m| m.is_file())?;
            Some((metadata.modified().ok()?, entry.path()))
        })
        .collect();

    // newest first
    logs.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = 0;
    for (_, path) in logs.into_iter().skip(keep) {
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove old log file"),
        }
    }
    Ok(removed)
}

/// stderr lines kept in a failure event; vmaf and the transcoder can print thousands
const STDERR_TAIL_LINES: usize = 20;

/// 记录外部工具调用
///
/// One event per invocation: INFO on success (full output at DEBUG),
/// ERROR with the tail of stderr on failure, timeout, or signal.
pub fn log_external_tool(tool_name: &str, command: &str, output: &ToolOutput) {
    let duration_secs = output.duration.as_secs_f64();
    let outcome = match (output.timed_out, output.exit_code) {
        (true, _) => "timed out".to_string(),
        (false, Some(code)) => format!("exit {}", code),
        (false, None) => "killed by signal".to_string(),
    };

    if output.success() {
        tracing::info!(tool = tool_name, duration_secs, outcome = %outcome, "External tool finished");
        tracing::debug!(
            tool = tool_name,
            command = %command,
            stdout = %output.stdout,
            stderr = %output.stderr,
            "External tool output"
        );
    } else {
        tracing::error!(
            tool = tool_name,
            command = %command,
            duration_secs,
            outcome = %outcome,
            stderr = %stderr_tail(&output.stderr, STDERR_TAIL_LINES),
            "External tool did not succeed"
        );
    }
}

fn stderr_tail(stderr: &str, lines: usize) -> String {
    let all: Vec<&str> = stderr.trim_end().lines().collect();
    let skipped = all.len().saturating_sub(lines);
    let tail = all[skipped..].join("\n");
    if skipped > 0 {
        format!("[{} earlier lines omitted]\n{}", skipped, tail)
    } else {
        tail
    }
}
