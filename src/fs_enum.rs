use anyhow::{bail, Context, Result};
use glob::Pattern;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::logger::Logger;
// Filesystem enumeration with glob filtering

/// Flat result of one tree scan: slash-separated relative paths only
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub files: HashMap<String, u64>,
    pub dirs: Vec<String>,
}

/// Include/exclude filter, matched against the slash-separated relative path
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl FileFilter {
    pub fn new(includes: &[String], excludes: &[String]) -> Result<Self> {
        Ok(Self {
            includes: compile_globs(includes)?,
            excludes: compile_globs(excludes)?,
        })
    }

    /// Excluded entries are skipped, and excluded directories are not walked
    fn is_excluded(&self, rel: &str) -> bool {
        self.excludes.iter().any(|p| p.matches(rel))
    }

    /// No include patterns means everything not excluded is included
    fn is_included(&self, rel: &str) -> bool {
        self.includes.is_empty() || self.includes.iter().any(|p| p.matches(rel))
    }
}

/// Compile glob patterns, failing on the first invalid one
pub fn compile_globs(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).with_context(|| format!("invalid glob pattern {:?}", p)))
        .collect()
}

/// Relative path of `path` under `root` with `/` separators
pub fn slash_relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Walk `root` depth-first and collect file sizes and directory paths.
///
/// Only an unusable root is an error; entries that cannot be read are
/// reported to `logger` and skipped.
pub fn scan(
    root: &Path,
    filter: &FileFilter,
    follow_symlinks: bool,
    logger: &dyn Logger,
) -> Result<ScanResult> {
    let meta = std::fs::metadata(root).with_context(|| format!("cannot scan {}", root.display()))?;
    if !meta.is_dir() {
        bail!("{} is not a directory", root.display());
    }

    let mut visited: HashSet<PathBuf> = HashSet::new();
    if follow_symlinks {
        if let Ok(canonical) = root.canonicalize() {
            visited.insert(canonical);
        }
    }

    let mut result = ScanResult::default();

    let walker = WalkDir::new(root)
        .follow_links(follow_symlinks)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let Some(rel) = slash_relative(root, e.path()) else {
                return false;
            };
            // Skip excluded entries entirely - this prevents walking into them
            if filter.is_excluded(&rel) {
                return false;
            }
            if follow_symlinks && e.file_type().is_dir() {
                return first_visit(&mut visited, e, logger);
            }
            true
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                logger.entry_skipped(&path, &e.to_string());
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }
        let Some(rel) = slash_relative(root, entry.path()) else {
            continue;
        };

        if entry.file_type().is_dir() {
            result.dirs.push(rel);
            continue;
        }

        if !filter.is_included(&rel) {
            continue;
        }

        // FIFOs, sockets and devices have no stable content to compare
        let file_type = entry.file_type();
        if !(file_type.is_file() || file_type.is_symlink()) {
            logger.entry_skipped(entry.path(), "not a regular file");
            continue;
        }

        match entry.metadata() {
            Ok(metadata) => {
                result.files.insert(rel, metadata.len());
            }
            Err(e) => logger.entry_skipped(entry.path(), &e.to_string()), // vanished or unreadable
        }
    }

    Ok(result)
}

/// Cycle guard for followed links.
///
/// Real directories are always walked and mark their canonical path as
/// seen. A symlinked directory is walked only when its target has not been
/// seen yet, so a link reached before its target never hides the target.
fn first_visit(visited: &mut HashSet<PathBuf>, entry: &DirEntry, logger: &dyn Logger) -> bool {
    let canonical = match entry.path().canonicalize() {
        Ok(canonical) => canonical,
        Err(e) if entry.path_is_symlink() => {
            logger.entry_skipped(entry.path(), &e.to_string());
            return false;
        }
        Err(_) => return true,
    };
    if visited.insert(canonical) || !entry.path_is_symlink() {
        return true;
    }
    logger.entry_skipped(entry.path(), "directory already visited");
    false
}
