//! File List Loader
//!
//! 一行一个数据集相对路径，顺序有意义。
//! Blank lines and lines starting with `#` are ignored; duplicates are
//! kept, each one becomes its own work item.

use crate::error::{HarnessError, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileList {
    entries: Vec<String>,
}

impl FileList {
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| HarnessError::FileList {
            path: path.to_path_buf(),
            source,
        })?;
        let list = Self::parse(&text);
        tracing::info!(path = %path.display(), entries = list.len(), "Loaded file list");
        Ok(list)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose resolved source file does not exist under `dataset_root`.
    pub fn missing_sources(&self, dataset_root: &Path) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|entry| !resolve_source(dataset_root, entry).is_file())
            .map(String::as_str)
            .collect()
    }
}

impl From<Vec<String>> for FileList {
    fn from(entries: Vec<String>) -> Self {
        Self { entries }
    }
}

/// Absolute entries are used as-is, relative ones are joined to the root.
pub fn resolve_source(dataset_root: &Path, entry: &str) -> PathBuf {
    dataset_root.join(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_skips_blank_and_comments() {
        let list = FileList::parse("a.mp4\n\n  # comment\n  sub/b.mp4  \r\na.mp4\n");
        assert_eq!(list.entries(), &["a.mp4", "sub/b.mp4", "a.mp4"]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_parse_empty() {
        assert!(FileList::parse("").is_empty());
        assert!(FileList::parse("\n# only comments\n").is_empty());
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let err = FileList::load(&dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, HarnessError::FileList { .. }));
    }

    #[test]
    fn test_load_and_missing_sources() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"x").unwrap();
        let list_path = dir.path().join("list.txt");
        std::fs::write(&list_path, "a.mp4\nb.mp4\n").unwrap();

        let list = FileList::load(&list_path).unwrap();
        assert_eq!(list.entries(), &["a.mp4", "b.mp4"]);
        assert_eq!(list.missing_sources(dir.path()), vec!["b.mp4"]);
    }

    #[test]
    fn test_resolve_source() {
        assert_eq!(
            resolve_source(Path::new("/data"), "clips/a.mp4"),
            PathBuf::from("/data/clips/a.mp4")
        );
        assert_eq!(
            resolve_source(Path::new("/data"), "/abs/a.mp4"),
            PathBuf::from("/abs/a.mp4")
        );
    }
}
