//! External tool detection
//!
//! 检测外部工具是否在 PATH 中（或为可执行的路径）

use std::path::Path;

pub fn is_tool_available(program: &str) -> bool {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file();
    }
    which::which(program).is_ok()
}

/// Programs from `programs` that cannot be found, deduplicated, in order.
pub fn missing_tools<'a>(programs: &[&'a str]) -> Vec<&'a str> {
    let mut missing: Vec<&'a str> = Vec::new();
    for &program in programs {
        if !missing.contains(&program) && !is_tool_available(program) {
            missing.push(program);
        }
    }
    missing
}
