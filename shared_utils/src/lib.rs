//! Shared Utilities for adder-sweep tools
//!
//! Tool-agnostic plumbing used by the sweep harness:
//! - Logging setup (stderr + rolling diagnostic file)
//! - External tool process wrapper (pipe draining, timeout, duration)
//! - Command templates with `{placeholder}` substitution
//! - External tool detection
//! - Progress bar with ETA, quiet mode

pub mod logging;
pub mod progress;
pub mod tool_command;
pub mod tool_process;
pub mod tools;

pub use logging::{init_logging, log_external_tool, LogConfig};
pub use progress::{
    create_progress_bar, enable_quiet_mode, format_duration, is_quiet_mode,
};
pub use tool_command::{CommandTemplate, Placeholders, RenderedCommand, TemplateError};
pub use tool_process::{run_tool, ToolError, ToolOutput, ToolProcess};
pub use tools::{is_tool_available, missing_tools};
