//! Directory traversal for the scanner.

use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::ScanningError;

/// Enumerates candidate directories and files. Carries no plugin semantics.
pub trait DirectoryTraverser: Send + Sync {
    /// `root` and every directory below it, except subtrees whose directory
    /// name is in `excluded`. Sorted.
    fn traverse_directories(
        &self,
        root: &Path,
        excluded: &[String],
    ) -> Result<Vec<PathBuf>, ScanningError>;

    /// Files directly inside `dir` whose file name matches one of `patterns`.
    /// Sorted.
    fn traverse_files(&self, dir: &Path, patterns: &[String]) -> Result<Vec<PathBuf>, ScanningError>;
}

/// `walkdir` + `globset` traverser.
#[derive(Debug, Default, Clone)]
pub struct WalkDirTraverser {
    follow_links: bool,
}

impl WalkDirTraverser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }
}

pub(crate) fn build_globset(patterns: &[String]) -> Result<GlobSet, ScanningError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(cfg!(windows))
            .literal_separator(true)
            .build()
            .map_err(|err| ScanningError::InvalidPattern {
                pattern: pattern.clone(),
                reason: err.to_string(),
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|err| ScanningError::InvalidPattern {
        pattern: patterns.join(","),
        reason: err.to_string(),
    })
}

fn traversal_error(path: &Path, err: walkdir::Error) -> ScanningError {
    ScanningError::Traversal {
        path: err.path().unwrap_or(path).to_path_buf(),
        reason: err.to_string(),
    }
}

impl DirectoryTraverser for WalkDirTraverser {
    fn traverse_directories(
        &self,
        root: &Path,
        excluded: &[String],
    ) -> Result<Vec<PathBuf>, ScanningError> {
        let is_excluded = |name: &str| {
            excluded
                .iter()
                .any(|ex| if cfg!(windows) { ex.eq_ignore_ascii_case(name) } else { ex == name })
        };

        let mut dirs = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(self.follow_links)
            .into_iter()
            .filter_entry(|entry| {
                // never prune the root itself
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !entry.file_name().to_str().map(|name| is_excluded(name)).unwrap_or(false)
            });

        for entry in walker {
            let entry = entry.map_err(|err| traversal_error(root, err))?;
            if entry.file_type().is_dir() {
                dirs.push(entry.into_path());
            }
        }

        dirs.sort();
        Ok(dirs)
    }

    fn traverse_files(&self, dir: &Path, patterns: &[String]) -> Result<Vec<PathBuf>, ScanningError> {
        let globset = build_globset(patterns)?;

        let mut files = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(self.follow_links)
        {
            let entry = entry.map_err(|err| traversal_error(dir, err))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if globset.is_match(entry.file_name()) {
                files.push(entry.into_path());
            }
        }

        files.sort();
        Ok(files)
    }
}
