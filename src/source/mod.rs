//! Source reader collaborator: enumerate files by glob, return their text.

use crate::error::SourceError;
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Enumerates matching files and reads them as text
pub trait SourceReader: Send + Sync {
    /// Repository root; globs are relative to it
    fn root(&self) -> &Path;

    /// Paths (relative to the root) matching any pattern, sorted
    fn glob(&self, patterns: &[&str]) -> Result<Vec<PathBuf>, SourceError>;

    fn read(&self, path: &Path) -> Result<String, SourceError>;

    fn exists(&self, path: &Path) -> bool;

    /// Strip the root from an absolute path, leave relative paths alone
    fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(self.root()).unwrap_or(path)
    }
}

fn compile_globs(root: &Path, patterns: &[&str]) -> Result<Override, SourceError> {
    let mut builder = OverrideBuilder::new(root);
    for pattern in patterns {
        builder.add(pattern).map_err(|e| SourceError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
    }
    builder.build().map_err(|e| SourceError::Pattern {
        pattern: patterns.join(", "),
        message: e.to_string(),
    })
}

/// Literal directory prefix of a glob, e.g. `app/models` for `app/models/**/*.rb`
fn literal_base(pattern: &str) -> PathBuf {
    pattern
        .split('/')
        .take_while(|part| !part.contains(&['*', '?', '[', '{'][..]))
        .collect()
}

/// Reads from the local filesystem, honouring .gitignore
pub struct FsSourceReader {
    root: PathBuf,
    max_files: Option<usize>,
}

impl FsSourceReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_files: None,
        }
    }

    /// Bound the number of paths a single glob call may return
    pub fn with_max_files(mut self, max_files: Option<usize>) -> Self {
        self.max_files = max_files;
        self
    }
}

impl SourceReader for FsSourceReader {
    fn root(&self) -> &Path {
        &self.root
    }

    fn glob(&self, patterns: &[&str]) -> Result<Vec<PathBuf>, SourceError> {
        let matcher = compile_globs(&self.root, patterns)?;
        let mut found = BTreeSet::new();

        for pattern in patterns {
            let base = self.root.join(literal_base(pattern));
            if !base.exists() {
                continue;
            }

            let walker = WalkBuilder::new(&base)
                .standard_filters(true)
                .hidden(true) // Skip hidden files
                .build();

            for entry in walker.flatten() {
                if entry.file_type().map_or(true, |ft| !ft.is_file()) {
                    continue;
                }
                let relative = self.relative(entry.path()).to_path_buf();
                if matcher.matched(&relative, false).is_whitelist() {
                    found.insert(relative);
                }
            }
        }

        let mut paths: Vec<PathBuf> = found.into_iter().collect();
        if let Some(max) = self.max_files {
            if paths.len() > max {
                tracing::warn!(
                    "Glob {:?} matched {} files, truncating to {}",
                    patterns,
                    paths.len(),
                    max
                );
                paths.truncate(max);
            }
        }
        Ok(paths)
    }

    fn read(&self, path: &Path) -> Result<String, SourceError> {
        let full = self.root.join(path);
        std::fs::read_to_string(&full).map_err(|source| SourceError::Read { path: full, source })
    }

    fn exists(&self, path: &Path) -> bool {
        self.root.join(path).exists()
    }
}

/// In-memory file set, for tests and embedders that already hold the text
#[derive(Debug, Default, Clone)]
pub struct MemorySourceReader {
    root: PathBuf,
    files: BTreeMap<PathBuf, String>,
}

impl MemorySourceReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }
}

impl SourceReader for MemorySourceReader {
    fn root(&self) -> &Path {
        &self.root
    }

    fn glob(&self, patterns: &[&str]) -> Result<Vec<PathBuf>, SourceError> {
        let matcher = compile_globs(&self.root, patterns)?;
        Ok(self
            .files
            .keys()
            .filter(|path| matcher.matched(path, false).is_whitelist())
            .cloned()
            .collect())
    }

    fn read(&self, path: &Path) -> Result<String, SourceError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(path.to_path_buf()))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, path: &str, content: &str) {
        let full = dir.path().join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }

    #[test]
    fn test_literal_base() {
        assert_eq!(literal_base("app/models/**/*.rb"), PathBuf::from("app/models"));
        assert_eq!(literal_base("lib/tasks/*.rake"), PathBuf::from("lib/tasks"));
        assert_eq!(literal_base("**/*.rb"), PathBuf::new());
    }

    #[test]
    fn test_fs_glob_matches_nested_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "app/models/order.rb", "class Order; end");
        write(&dir, "app/models/billing/invoice.rb", "class Billing::Invoice; end");
        write(&dir, "app/models/README.md", "docs");
        write(&dir, "app/controllers/orders_controller.rb", "class OrdersController; end");

        let reader = FsSourceReader::new(dir.path());
        let paths = reader.glob(&["app/models/**/*.rb"]).unwrap();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("app/models/billing/invoice.rb"),
                PathBuf::from("app/models/order.rb"),
            ]
        );
        assert_eq!(reader.read(&paths[1]).unwrap(), "class Order; end");
    }

    #[test]
    fn test_fs_glob_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let reader = FsSourceReader::new(dir.path());
        assert!(reader.glob(&["app/jobs/**/*.rb"]).unwrap().is_empty());
    }

    #[test]
    fn test_fs_glob_respects_max_files() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            write(&dir, &format!("app/jobs/job_{}.rb", i), "");
        }
        let reader = FsSourceReader::new(dir.path()).with_max_files(Some(2));
        assert_eq!(reader.glob(&["app/jobs/*.rb"]).unwrap().len(), 2);
    }

    #[test]
    fn test_memory_reader_glob() {
        let reader = MemorySourceReader::new()
            .with_file("lib/tasks/data.rake", "task :x")
            .with_file("lib/tasks/nested/other.rake", "task :y")
            .with_file("lib/util.rb", "");

        let paths = reader.glob(&["lib/tasks/**/*.rake"]).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(reader.read(Path::new("missing.rb")).is_err());
    }
}
