//! Glob expansion, done fresh for every connection.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::DaemonError;

/// Expands the configured pattern into an ordered list of paths.
#[derive(Debug, Clone)]
pub struct FileEnumerator {
    pattern: Arc<str>,
}

impl FileEnumerator {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: Arc::from(pattern),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Match the pattern against the filesystem as it is right now.
    ///
    /// Paths come back in sorted order. No matches is an empty list, not an
    /// error. Entries that cannot be read while walking are skipped. A
    /// malformed pattern is a `DaemonError::Pattern`, which callers treat as
    /// fatal since the pattern never changes.
    pub fn enumerate(&self) -> Result<Vec<PathBuf>, DaemonError> {
        let entries = glob::glob(&self.pattern).map_err(|source| DaemonError::Pattern {
            pattern: self.pattern.to_string(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) => paths.push(path),
                Err(e) => {
                    tracing::debug!(
                        path = %e.path().display(),
                        error = %e.error(),
                        "Skipping unreadable glob entry"
                    );
                }
            }
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.txt", "a.txt", "b.txt", "skip.log"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }

        let pattern = format!("{}/*.txt", dir.path().display());
        let paths = FileEnumerator::new(&pattern).enumerate().unwrap();

        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[test]
    fn test_no_matches_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/*.nothing", dir.path().display());

        let paths = FileEnumerator::new(&pattern).enumerate().unwrap();
        assert!(paths.is_empty());
    }

    #[test]
    fn test_reflects_filesystem_changes() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/*", dir.path().display());
        let enumerator = FileEnumerator::new(&pattern);

        std::fs::write(dir.path().join("one"), b"1").unwrap();
        assert_eq!(enumerator.enumerate().unwrap().len(), 1);

        std::fs::write(dir.path().join("two"), b"2").unwrap();
        assert_eq!(enumerator.enumerate().unwrap().len(), 2);
    }

    #[test]
    fn test_malformed_pattern() {
        let enumerator = FileEnumerator::new("/tmp/[unclosed");
        assert_eq!(enumerator.pattern(), "/tmp/[unclosed");
        assert!(matches!(
            enumerator.enumerate(),
            Err(DaemonError::Pattern { .. })
        ));
    }
}
