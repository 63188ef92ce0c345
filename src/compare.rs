//! Cross-referencing of two scans and the concurrent content check
//!
//! Reconciliation is pure and single-threaded. The content check runs each
//! common file through three stages (size, quick hash, full hash) on a
//! bounded worker pool, stopping at the first stage that finds a difference.

use anyhow::{Context, Result};
use glob::Pattern;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::cancel::{CancelToken, Interrupted};
use crate::checksum::Checksum;
use crate::fs_enum::{compile_globs, ScanResult};
use crate::logger::Logger;
use crate::node::DirNode;
use crate::progress::Progress;

/// Full-hash pairs slower than this are reported to the logger
const SLOW_HASH: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Present only in B
    Added,
    /// Present only in A
    Removed,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffItem {
    pub path: String,
    pub kind: ChangeKind,
    pub is_dir: bool,
}

impl DiffItem {
    fn file(path: &str, kind: ChangeKind) -> Self {
        Self {
            path: path.to_string(),
            kind,
            is_dir: false,
        }
    }

    fn dir(path: &str, kind: ChangeKind) -> Self {
        Self {
            path: path.to_string(),
            kind,
            is_dir: true,
        }
    }
}

/// Settings consumed by the comparison
#[derive(Debug, Clone)]
pub struct CompareOptions {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    /// Files matching these get `fast_limit` instead of `global_limit`
    pub fast_globs: Vec<String>,
    pub fast_limit: u64,
    /// 0 hashes whole files
    pub global_limit: u64,
    pub workers: usize,
    pub show_all: bool,
    pub follow_symlinks: bool,
    pub algorithm: Checksum,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
            fast_globs: Vec::new(),
            fast_limit: 1024 * 1024,
            global_limit: 0,
            workers: num_cpus::get(),
            show_all: false,
            follow_symlinks: false,
            algorithm: Checksum::default(),
        }
    }
}

/// A file present on both sides, with the size each side recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonFile {
    pub path: String,
    pub size_a: u64,
    pub size_b: u64,
}

/// Outcome of cross-referencing two scans
#[derive(Debug, Default)]
pub struct Reconciled {
    /// Added and removed entries, in no particular order
    pub items: Vec<DiffItem>,
    /// Files to content-check, largest first
    pub common: Vec<CommonFile>,
}

/// True when some proper ancestor of `path` is in `dirs`
fn is_inside(path: &str, dirs: &HashSet<&str>) -> bool {
    let mut current = path;
    while let Some((parent, _)) = current.rsplit_once('/') {
        if dirs.contains(parent) {
            return true;
        }
        current = parent;
    }
    false
}

fn unique_dirs<'a>(side: &'a ScanResult, other: &ScanResult) -> Vec<&'a str> {
    let others: HashSet<&str> = other.dirs.iter().map(String::as_str).collect();
    let mut unique: Vec<&str> = side
        .dirs
        .iter()
        .map(String::as_str)
        .filter(|d| !others.contains(d))
        .collect();
    unique.sort_unstable();
    unique
}

/// Report directories unique to one side, hiding nested ones unless
/// `show_all`; returns the full set for the file pass
fn collect_unique_dirs<'a>(
    unique: Vec<&'a str>,
    kind: ChangeKind,
    show_all: bool,
    items: &mut Vec<DiffItem>,
) -> HashSet<&'a str> {
    let mut set = HashSet::with_capacity(unique.len());
    for dir in unique {
        if show_all || !is_inside(dir, &set) {
            items.push(DiffItem::dir(dir, kind));
        }
        set.insert(dir);
    }
    set
}

/// Split two scans into added/removed items and common files
pub fn reconcile(a: &ScanResult, b: &ScanResult, show_all: bool) -> Reconciled {
    let mut items = Vec::new();

    // Sorted order puts parents before children, so the ancestor test
    // only ever looks at directories already in the set.
    let removed_dirs =
        collect_unique_dirs(unique_dirs(a, b), ChangeKind::Removed, show_all, &mut items);
    let added_dirs =
        collect_unique_dirs(unique_dirs(b, a), ChangeKind::Added, show_all, &mut items);

    let mut common = Vec::new();
    for (path, &size_a) in &a.files {
        match b.files.get(path) {
            Some(&size_b) => common.push(CommonFile {
                path: path.clone(),
                size_a,
                size_b,
            }),
            None => {
                if show_all || !is_inside(path, &removed_dirs) {
                    items.push(DiffItem::file(path, ChangeKind::Removed));
                }
            }
        }
    }
    for path in b.files.keys() {
        if !a.files.contains_key(path) && (show_all || !is_inside(path, &added_dirs)) {
            items.push(DiffItem::file(path, ChangeKind::Added));
        }
    }

    common.sort_by(|x, y| y.size_a.cmp(&x.size_a).then_with(|| x.path.cmp(&y.path)));
    Reconciled { items, common }
}

/// Per-file hashing limit: fast globs pick `fast_limit`
struct LimitPolicy {
    fast: Vec<Pattern>,
    fast_limit: u64,
    global_limit: u64,
}

impl LimitPolicy {
    fn limit_for(&self, path: &str) -> u64 {
        if self.fast.iter().any(|p| p.matches(path)) {
            self.fast_limit
        } else {
            self.global_limit
        }
    }
}

struct Checker<'a> {
    a: &'a dyn DirNode,
    b: &'a dyn DirNode,
    limits: LimitPolicy,
    algorithm: Checksum,
    follow_symlinks: bool,
    logger: &'a dyn Logger,
}

impl Checker<'_> {
    /// True when the file differs between sides or could not be checked
    fn differs(&self, job: &CommonFile) -> bool {
        if job.size_a != job.size_b {
            return true;
        }

        let quick = (
            self.a.quick_hash(&job.path, self.follow_symlinks),
            self.b.quick_hash(&job.path, self.follow_symlinks),
        );
        match self.pair(&job.path, quick) {
            Some((x, y)) if x == y => {}
            _ => return true,
        }

        let limit = self.limits.limit_for(&job.path);
        let started = Instant::now();
        let full = (
            self.a.full_hash(&job.path, self.algorithm, limit, self.follow_symlinks),
            self.b.full_hash(&job.path, self.algorithm, limit, self.follow_symlinks),
        );
        let elapsed = started.elapsed();
        if elapsed > SLOW_HASH {
            self.logger.slow_hash(&job.path, elapsed);
        }
        !matches!(self.pair(&job.path, full), Some((x, y)) if x == y)
    }

    fn pair(
        &self,
        path: &str,
        digests: (Result<String>, Result<String>),
    ) -> Option<(String, String)> {
        match digests {
            (Ok(x), Ok(y)) => Some((x, y)),
            (Err(e), _) | (_, Err(e)) => {
                self.logger.hash_failed(path, &format!("{:#}", e));
                None
            }
        }
    }
}

/// Compare trees `a` and `b` and return every difference sorted by path.
///
/// Fails with [`Interrupted`] when `cancel` fires before all files are
/// checked.
pub fn compare(
    a: &dyn DirNode,
    b: &dyn DirNode,
    opts: &CompareOptions,
    cancel: &CancelToken,
    progress: &Progress,
    logger: &dyn Logger,
) -> Result<Vec<DiffItem>> {
    let scan_a = a
        .scan(&opts.includes, &opts.excludes, opts.follow_symlinks)
        .context("scanning A")?;
    logger.scanned("A", scan_a.files.len(), scan_a.dirs.len());
    let scan_b = b
        .scan(&opts.includes, &opts.excludes, opts.follow_symlinks)
        .context("scanning B")?;
    logger.scanned("B", scan_b.files.len(), scan_b.dirs.len());

    let Reconciled { mut items, common } = reconcile(&scan_a, &scan_b, opts.show_all);
    progress.start(common.len() as u64);

    let checker = Checker {
        a,
        b,
        limits: LimitPolicy {
            fast: compile_globs(&opts.fast_globs)?,
            fast_limit: opts.fast_limit,
            global_limit: opts.global_limit,
        },
        algorithm: opts.algorithm,
        follow_symlinks: opts.follow_symlinks,
        logger,
    };

    let workers = opts.workers.clamp(1, common.len().max(1));
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("dirdiff-worker-{}", i))
        .build()
        .context("failed to build worker pool")?;

    let cursor = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<DiffItem>();
    pool.scope(|s| {
        for _ in 0..workers {
            let tx = tx.clone();
            let (checker, cursor, common) = (&checker, &cursor, &common);
            s.spawn(move |_| loop {
                if cancel.is_cancelled() {
                    break;
                }
                let i = cursor.fetch_add(1, Ordering::Relaxed);
                let Some(job) = common.get(i) else {
                    break;
                };
                if checker.differs(job) {
                    let _ = tx.send(DiffItem::file(&job.path, ChangeKind::Modified));
                }
                progress.inc();
            });
        }
    });
    drop(tx);
    items.extend(rx);

    if cancel.is_cancelled() {
        return Err(Interrupted.into());
    }
    items.sort_by(|x, y| x.path.cmp(&y.path));
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NoopLogger;
    use crate::node::LocalNode;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn scan_of(files: &[(&str, u64)], dirs: &[&str]) -> ScanResult {
        ScanResult {
            files: files.iter().map(|(p, s)| (p.to_string(), *s)).collect(),
            dirs: dirs.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn sorted(mut items: Vec<DiffItem>) -> Vec<(String, ChangeKind, bool)> {
        items.sort_by(|x, y| x.path.cmp(&y.path));
        items.into_iter().map(|i| (i.path, i.kind, i.is_dir)).collect()
    }

    fn write(root: &Path, rel: &str, data: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    fn run(a: &Path, b: &Path, opts: &CompareOptions) -> Vec<DiffItem> {
        let logger = Arc::new(NoopLogger);
        let na = LocalNode::new(a, logger.clone()).unwrap();
        let nb = LocalNode::new(b, logger.clone()).unwrap();
        compare(&na, &nb, opts, &CancelToken::new(), &Progress::hidden(), &NoopLogger).unwrap()
    }

    #[test]
    fn test_is_inside_walks_every_ancestor() {
        let dirs: HashSet<&str> = ["a"].into_iter().collect();
        assert!(is_inside("a/b/c", &dirs));
        assert!(is_inside("a/b", &dirs));
        assert!(!is_inside("a", &dirs));
        assert!(!is_inside("ab/c", &dirs));
    }

    #[test]
    fn test_reconcile_prunes_nested_additions() {
        let a = scan_of(&[("keep", 1)], &[]);
        let b = scan_of(&[("keep", 1), ("a/b/c", 3)], &["a", "a/b"]);

        let pruned = reconcile(&a, &b, false);
        assert_eq!(sorted(pruned.items), vec![("a".to_string(), ChangeKind::Added, true)]);

        let all = reconcile(&a, &b, true);
        assert_eq!(
            sorted(all.items),
            vec![
                ("a".to_string(), ChangeKind::Added, true),
                ("a/b".to_string(), ChangeKind::Added, true),
                ("a/b/c".to_string(), ChangeKind::Added, false),
            ]
        );
    }

    #[test]
    fn test_reconcile_removed_side_and_common_order() {
        let a = scan_of(&[("gone/x", 1), ("big", 100), ("b_small", 5), ("a_small", 5)], &["gone"]);
        let b = scan_of(&[("big", 100), ("b_small", 5), ("a_small", 7)], &[]);
        let r = reconcile(&a, &b, false);
        assert_eq!(sorted(r.items), vec![("gone".to_string(), ChangeKind::Removed, true)]);
        let order: Vec<&str> = r.common.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(order, vec!["big", "a_small", "b_small"]);
        assert_eq!(r.common[1].size_b, 7);
    }

    #[test]
    fn test_file_replaced_by_directory_reports_both() {
        let a = scan_of(&[("x", 1)], &[]);
        let b = scan_of(&[("x/inner", 1)], &["x"]);
        let r = reconcile(&a, &b, false);
        assert!(r.common.is_empty());
        assert_eq!(
            sorted(r.items),
            vec![
                ("x".to_string(), ChangeKind::Added, true),
                ("x".to_string(), ChangeKind::Removed, false),
            ]
        );
    }

    #[test]
    fn test_limit_policy_prefers_fast_globs() {
        let policy = LimitPolicy {
            fast: compile_globs(&["*.iso".to_string()]).unwrap(),
            fast_limit: 4096,
            global_limit: 0,
        };
        assert_eq!(policy.limit_for("images/disk.iso"), 4096);
        assert_eq!(policy.limit_for("notes.txt"), 0);
    }

    #[test]
    fn test_compare_detects_each_stage() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        write(a.path(), "same.txt", b"identical");
        write(b.path(), "same.txt", b"identical");
        write(a.path(), "size.txt", b"short");
        write(b.path(), "size.txt", b"longer!");
        write(a.path(), "quick.txt", b"aaaa");
        write(b.path(), "quick.txt", b"bbbb");

        let items = run(a.path(), b.path(), &CompareOptions::default());
        assert_eq!(
            sorted(items),
            vec![
                ("quick.txt".to_string(), ChangeKind::Modified, false),
                ("size.txt".to_string(), ChangeKind::Modified, false),
            ]
        );
    }

    #[test]
    fn test_fast_limit_misses_unsampled_change() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let base = vec![b'z'; 64 * 1024];
        let mut changed = base.clone();
        changed[20_000] = b'!';
        write(a.path(), "blob.bin", &base);
        write(b.path(), "blob.bin", &changed);

        let sparse = CompareOptions {
            fast_globs: vec!["*.bin".to_string()],
            fast_limit: 3000,
            ..Default::default()
        };
        assert!(run(a.path(), b.path(), &sparse).is_empty());
        assert_eq!(run(a.path(), b.path(), &CompareOptions::default()).len(), 1);
    }

    #[test]
    fn test_hash_failure_counts_as_modified() {
        struct Broken(LocalNode);
        impl DirNode for Broken {
            fn scan(&self, i: &[String], e: &[String], f: bool) -> Result<ScanResult> {
                self.0.scan(i, e, f)
            }
            fn quick_hash(&self, _rel: &str, _f: bool) -> Result<String> {
                anyhow::bail!("disk on fire")
            }
            fn full_hash(&self, rel: &str, alg: Checksum, limit: u64, f: bool) -> Result<String> {
                self.0.full_hash(rel, alg, limit, f)
            }
            fn close(&mut self) -> Result<()> {
                Ok(())
            }
        }

        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        write(a.path(), "f", b"same");
        write(b.path(), "f", b"same");
        let logger = Arc::new(NoopLogger);
        let na = Broken(LocalNode::new(a.path(), logger.clone()).unwrap());
        let nb = LocalNode::new(b.path(), logger).unwrap();
        let items = compare(
            &na,
            &nb,
            &CompareOptions::default(),
            &CancelToken::new(),
            &Progress::hidden(),
            &NoopLogger,
        )
        .unwrap();
        assert_eq!(sorted(items), vec![("f".to_string(), ChangeKind::Modified, false)]);
    }

    #[test]
    fn test_cancelled_compare_is_interrupted() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        write(a.path(), "f", b"x");
        write(b.path(), "f", b"x");
        let logger = Arc::new(NoopLogger);
        let na = LocalNode::new(a.path(), logger.clone()).unwrap();
        let nb = LocalNode::new(b.path(), logger).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let opts = CompareOptions::default();
        let err = compare(&na, &nb, &opts, &cancel, &Progress::hidden(), &NoopLogger).unwrap_err();
        assert!(err.downcast_ref::<Interrupted>().is_some());
    }

    #[test]
    fn test_progress_counts_every_job() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        for i in 0..10 {
            write(a.path(), &format!("f{}", i), b"same");
            write(b.path(), &format!("f{}", i), if i % 2 == 0 { b"same" } else { b"diff" });
        }
        let logger = Arc::new(NoopLogger);
        let na = LocalNode::new(a.path(), logger.clone()).unwrap();
        let nb = LocalNode::new(b.path(), logger).unwrap();
        let bar = Progress::hidden();
        let opts = CompareOptions {
            workers: 3,
            ..Default::default()
        };
        let items = compare(&na, &nb, &opts, &CancelToken::new(), &bar, &NoopLogger).unwrap();
        assert_eq!(items.len(), 5);
        assert_eq!(bar.position(), 10);
        assert!(items.windows(2).all(|w| w[0].path <= w[1].path));
    }
}
