use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Diagnostic sink. Every event defaults to a no-op so sinks only override
/// what they care about.
pub trait Logger: Send + Sync {
    fn start(&self, _a: &str, _b: &str) {}
    fn connecting(&self, _host: &str) {}
    fn scanned(&self, _side: &str, _files: usize, _dirs: usize) {}
    fn entry_skipped(&self, _path: &Path, _msg: &str) {}
    fn hash_failed(&self, _path: &str, _msg: &str) {}
    fn slow_hash(&self, _path: &str, _elapsed: Duration) {}
    fn done(&self, _items: usize, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Human-readable diagnostics on stderr (`--verbose`)
pub struct StderrLogger;

impl Logger for StderrLogger {
    fn start(&self, a: &str, b: &str) {
        eprintln!("Comparing {} with {}", a, b);
    }
    fn connecting(&self, host: &str) {
        eprintln!("Connecting to {} via SSH...", host);
    }
    fn scanned(&self, side: &str, files: usize, dirs: usize) {
        eprintln!("Scanned {}: {} files, {} directories", side, files, dirs);
    }
    fn entry_skipped(&self, path: &Path, msg: &str) {
        eprintln!("Skipping {}: {}", path.display(), msg);
    }
    fn hash_failed(&self, path: &str, msg: &str) {
        eprintln!("Hash failed for {}: {}", path, msg);
    }
    fn slow_hash(&self, path: &str, elapsed: Duration) {
        eprintln!("SHA check for {} took {:.2?}", path, elapsed);
    }
    fn done(&self, items: usize, seconds: f64) {
        eprintln!("Compared in {:.3}s, {} differences", seconds, items);
    }
}

/// Append-only event log (`--log-file`)
pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl Logger for TextLogger {
    fn start(&self, a: &str, b: &str) {
        self.line(&format!("START a={} b={}", a, b));
    }
    fn connecting(&self, host: &str) {
        self.line(&format!("CONNECT host={}", host));
    }
    fn scanned(&self, side: &str, files: usize, dirs: usize) {
        self.line(&format!("SCAN side={} files={} dirs={}", side, files, dirs));
    }
    fn entry_skipped(&self, path: &Path, msg: &str) {
        self.line(&format!("SKIP path={} msg={}", path.display(), msg));
    }
    fn hash_failed(&self, path: &str, msg: &str) {
        self.line(&format!("ERROR ctx=hash path={} msg={}", path, msg));
    }
    fn slow_hash(&self, path: &str, elapsed: Duration) {
        self.line(&format!("SLOW path={} seconds={:.3}", path, elapsed.as_secs_f64()));
    }
    fn done(&self, items: usize, seconds: f64) {
        self.line(&format!("DONE items={items} seconds={seconds:.3}"));
    }
}

/// Forwards every event to each inner sink
pub struct FanoutLogger(pub Vec<Arc<dyn Logger>>);

impl Logger for FanoutLogger {
    fn start(&self, a: &str, b: &str) {
        self.0.iter().for_each(|l| l.start(a, b));
    }
    fn connecting(&self, host: &str) {
        self.0.iter().for_each(|l| l.connecting(host));
    }
    fn scanned(&self, side: &str, files: usize, dirs: usize) {
        self.0.iter().for_each(|l| l.scanned(side, files, dirs));
    }
    fn entry_skipped(&self, path: &Path, msg: &str) {
        self.0.iter().for_each(|l| l.entry_skipped(path, msg));
    }
    fn hash_failed(&self, path: &str, msg: &str) {
        self.0.iter().for_each(|l| l.hash_failed(path, msg));
    }
    fn slow_hash(&self, path: &str, elapsed: Duration) {
        self.0.iter().for_each(|l| l.slow_hash(path, elapsed));
    }
    fn done(&self, items: usize, seconds: f64) {
        self.0.iter().for_each(|l| l.done(items, seconds));
    }
}

/// Choose sinks once; hot paths pay nothing with `NoopLogger`
pub fn build_logger(verbose: bool, log_file: Option<&Path>) -> Result<Arc<dyn Logger>> {
    let mut sinks: Vec<Arc<dyn Logger>> = Vec::new();
    if verbose {
        sinks.push(Arc::new(StderrLogger));
    }
    if let Some(p) = log_file {
        sinks.push(Arc::new(TextLogger::new(p)?));
    }
    Ok(match sinks.len() {
        0 => Arc::new(NoopLogger),
        1 => sinks.remove(0),
        _ => Arc::new(FanoutLogger(sinks)),
    })
}
