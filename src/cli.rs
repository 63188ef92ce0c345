//! Command-line model and validation

use anyhow::{anyhow, bail, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::checksum::Checksum;
use crate::compare::CompareOptions;
use crate::location::Location;
use crate::node::RemoteOptions;

/// Compare two directories locally or over SSH.
#[derive(Parser, Debug)]
#[command(
    name = "dirdiff",
    about = "Compare two directories locally or over SSH",
    override_usage = "dirdiff [OPTIONS] <PATH_A|HOST_A:PATH_A> <PATH_B|HOST_B:PATH_B>"
)]
pub struct Args {
    /// First tree (A): local path or host:path
    #[arg(required_unless_present = "agent")]
    pub path_a: Option<String>,

    /// Second tree (B): local path or host:path
    #[arg(required_unless_present = "agent")]
    pub path_b: Option<String>,

    /// Glob patterns to include files in the comparison
    #[arg(short = 'i', long = "include", action = ArgAction::Append)]
    pub includes: Vec<String>,

    /// Glob patterns to exclude files/dirs from the comparison
    #[arg(short = 'e', long = "exclude", action = ArgAction::Append)]
    pub excludes: Vec<String>,

    /// Number of parallel workers
    #[arg(short = 'w', short_alias = 'j', long, default_value_t = num_cpus::get())]
    pub workers: usize,

    /// Glob patterns of files to hash sparsely, up to --fast-limit bytes
    #[arg(short = 'f', long = "fast", action = ArgAction::Append)]
    pub fast: Vec<String>,

    /// Byte budget for sparse hashes of --fast files (e.g. 512k, 1MB)
    #[arg(short = 'l', long, default_value = "1MB", value_parser = parse_size)]
    pub fast_limit: u64,

    /// Byte budget for all other hashes (0 = whole file)
    #[arg(short = 'g', long, default_value = "0", value_parser = parse_size)]
    pub global_limit: u64,

    /// Content hash algorithm
    #[arg(long, value_enum, default_value_t = Checksum::Sha256)]
    pub algorithm: Checksum,

    /// Follow symbolic links instead of comparing their targets
    #[arg(short = 'L', long)]
    pub follow_symlinks: bool,

    /// Disable all output except the exit code
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Print diagnostics and a summary on stderr
    #[arg(short = 'V', long)]
    pub verbose: bool,

    /// Disable the progress bar
    #[arg(short = 'P', long)]
    pub no_progressbar: bool,

    /// Disable colored output
    #[arg(short = 'C', long)]
    pub no_color: bool,

    /// Also list entries inside added/removed directories
    #[arg(short = 'a', long)]
    pub show_all: bool,

    /// Path to the dirdiff binary on the remote host (once for both, twice for A then B)
    #[arg(short = 'r', long = "remote-bin", action = ArgAction::Append)]
    pub remote_bins: Vec<String>,

    /// Run the remote agent through sudo
    #[arg(short = 's', long, action = ArgAction::Count)]
    pub sudo: u8,

    /// Explicitly disable sudo for a remote host
    #[arg(short = 'n', long, action = ArgAction::Count)]
    pub no_sudo: u8,

    /// Remote shell used to reach host:path targets
    #[arg(long, default_value = "ssh")]
    pub rsh: String,

    /// Append diagnostic events to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Run as RPC agent over stdin/stdout
    #[arg(long, hide = true)]
    pub agent: bool,
}

/// Everything a comparison run needs, validated
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub a: Location,
    pub b: Location,
    pub remote_a: RemoteOptions,
    pub remote_b: RemoteOptions,
    pub compare: CompareOptions,
    pub quiet: bool,
    pub verbose: bool,
    pub progress: bool,
    pub color: bool,
    pub log_file: Option<PathBuf>,
}

impl Args {
    /// Validate and resolve per-side settings. `argv` is the raw command
    /// line, needed because `--sudo`/`--no-sudo` apply by position.
    pub fn resolve(&self, argv: &[String]) -> Result<RunConfig> {
        let (Some(path_a), Some(path_b)) = (&self.path_a, &self.path_b) else {
            bail!("two directories are required");
        };
        let a = Location::parse(path_a);
        let b = Location::parse(path_b);

        if self.workers == 0 {
            bail!("invalid --workers: must be at least 1");
        }
        if self.fast_limit == 0 {
            bail!("invalid --fast-limit: must be greater than 0");
        }

        let (bin_a, bin_b) = assign_remote_bins(&self.remote_bins, a.is_remote(), b.is_remote())?;
        let (sudo_a, sudo_b) = assign_sudo(&sudo_sequence(argv), a.is_remote(), b.is_remote())?;
        let verbose = self.verbose && !self.quiet;

        let remote = |agent_bin: Option<String>, sudo: bool| RemoteOptions {
            rsh: self.rsh.clone(),
            agent_bin,
            sudo,
            verbose,
        };

        Ok(RunConfig {
            remote_a: remote(bin_a, sudo_a),
            remote_b: remote(bin_b, sudo_b),
            a,
            b,
            compare: CompareOptions {
                includes: self.includes.clone(),
                excludes: self.excludes.clone(),
                fast_globs: self.fast.clone(),
                fast_limit: self.fast_limit,
                global_limit: self.global_limit,
                workers: self.workers,
                show_all: self.show_all,
                follow_symlinks: self.follow_symlinks,
                algorithm: self.algorithm,
            },
            quiet: self.quiet,
            verbose,
            progress: !self.quiet && !self.no_progressbar,
            color: !self.no_color,
            log_file: self.log_file.clone(),
        })
    }
}

/// Parse a size such as `1MB`, `512k`, `2GiB` or `0` into bytes.
///
/// Units are binary multiples and case-insensitive; a fractional number is
/// truncated after scaling.
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    if number.is_empty() || number.starts_with('.') || number.ends_with('.') {
        bail!("invalid size {:?}", s);
    }
    let value: f64 = number.parse().map_err(|_| anyhow!("invalid size {:?}", s))?;

    let mut rest = unit.trim_start_matches(' ').to_ascii_lowercase();
    let shift = match rest.chars().next() {
        Some('k') => 10,
        Some('m') => 20,
        Some('g') => 30,
        Some('t') => 40,
        Some('p') => 50,
        _ => 0,
    };
    if shift > 0 {
        rest.remove(0);
    }
    let rest = rest.strip_prefix('i').unwrap_or(&rest);
    let rest = rest.strip_prefix('b').unwrap_or(rest);
    if !rest.is_empty() {
        bail!("invalid size {:?}", s);
    }

    let bytes = value * (1u64 << shift) as f64;
    if !bytes.is_finite() || bytes > u64::MAX as f64 {
        bail!("size {:?} is too large", s);
    }
    Ok(bytes as u64)
}

/// `--sudo` (true) and `--no-sudo` (false) in command-line order
pub fn sudo_sequence(argv: &[String]) -> Vec<bool> {
    argv.iter()
        .skip(1)
        .take_while(|arg| arg.as_str() != "--")
        .filter_map(|arg| match arg.as_str() {
            "--sudo" | "-s" => Some(true),
            "--no-sudo" | "-n" => Some(false),
            _ => None,
        })
        .collect()
}

/// One value applies to every remote side; two map to A and B
pub fn assign_remote_bins(
    bins: &[String],
    remote_a: bool,
    remote_b: bool,
) -> Result<(Option<String>, Option<String>)> {
    match bins {
        [] => Ok((None, None)),
        [one] => Ok((remote_a.then(|| one.clone()), remote_b.then(|| one.clone()))),
        [first, second] => Ok((Some(first.clone()), Some(second.clone()))),
        _ => bail!("too many --remote-bin arguments"),
    }
}

/// One flag applies to every remote side; two map to the remote sides in
/// order, A first when it is remote
pub fn assign_sudo(flags: &[bool], remote_a: bool, remote_b: bool) -> Result<(bool, bool)> {
    match flags {
        [] => Ok((false, false)),
        [one] => Ok((remote_a && *one, remote_b && *one)),
        [first, second] => {
            let mut next = [*first, *second].into_iter();
            let sudo_a = remote_a && next.next().unwrap_or(false);
            let sudo_b = remote_b && next.next().unwrap_or(false);
            Ok((sudo_a, sudo_b))
        }
        _ => bail!("too many --sudo or --no-sudo flags"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("1MB").unwrap(), 1 << 20);
        assert_eq!(parse_size("512k").unwrap(), 512 << 10);
        assert_eq!(parse_size("2GiB").unwrap(), 2 << 30);
        assert_eq!(parse_size("1 mb").unwrap(), 1 << 20);
        assert_eq!(parse_size("1.5K").unwrap(), 1536);
        assert_eq!(parse_size("3b").unwrap(), 3);
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        for bad in ["", "MB", "-1", "1XB", "1.2.3k", "12kbx", ".5k"] {
            assert!(parse_size(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_sudo_sequence_keeps_order() {
        let seq = sudo_sequence(&argv(&[
            "dirdiff", "--no-sudo", "h1:/a", "-s", "h2:/b", "--", "--sudo",
        ]));
        assert_eq!(seq, vec![false, true]);
    }

    #[test]
    fn test_assign_sudo() {
        assert_eq!(assign_sudo(&[true], true, false).unwrap(), (true, false));
        assert_eq!(assign_sudo(&[true], true, true).unwrap(), (true, true));
        assert_eq!(assign_sudo(&[false, true], true, true).unwrap(), (false, true));
        // A is local, so the first flag goes to B
        assert_eq!(assign_sudo(&[true, false], false, true).unwrap(), (false, true));
        assert!(assign_sudo(&[true, true, true], true, true).is_err());
    }

    #[test]
    fn test_assign_remote_bins() {
        let one = vec!["/opt/dirdiff".to_string()];
        assert_eq!(
            assign_remote_bins(&one, false, true).unwrap(),
            (None, Some("/opt/dirdiff".to_string()))
        );
        let two = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            assign_remote_bins(&two, true, true).unwrap(),
            (Some("a".to_string()), Some("b".to_string()))
        );
        let three = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert!(assign_remote_bins(&three, true, true).is_err());
    }

    #[test]
    fn test_resolve_defaults_and_validation() {
        let raw = argv(&["dirdiff", "-q", "-V", "left", "host:right"]);
        let cfg = Args::try_parse_from(&raw).unwrap().resolve(&raw).unwrap();
        assert_eq!(cfg.a, Location::Local(PathBuf::from("left")));
        assert!(cfg.b.is_remote());
        assert!(!cfg.verbose);
        assert!(!cfg.progress);
        assert_eq!(cfg.compare.fast_limit, 1 << 20);
        assert_eq!(cfg.compare.global_limit, 0);
        assert_eq!(cfg.compare.algorithm, Checksum::Sha256);
        assert_eq!(cfg.remote_b.rsh, "ssh");

        let raw = argv(&["dirdiff", "-w", "0", "a", "b"]);
        assert!(Args::try_parse_from(&raw).unwrap().resolve(&raw).is_err());
        let raw = argv(&["dirdiff", "--fast-limit", "0", "a", "b"]);
        assert!(Args::try_parse_from(&raw).unwrap().resolve(&raw).is_err());
    }

    #[test]
    fn test_cli_rejects_md5_and_accepts_blake3() {
        assert!(Args::try_parse_from(["dirdiff", "--algorithm", "md5", "a", "b"]).is_err());
        let argv = ["dirdiff", "--algorithm", "blake3", "-j", "4", "a", "b"];
        let args = Args::try_parse_from(argv).unwrap();
        assert_eq!(args.algorithm, Checksum::Blake3);
        assert_eq!(args.workers, 4);
    }

    #[test]
    fn test_agent_needs_no_paths() {
        let args = Args::try_parse_from(["dirdiff", "--agent"]).unwrap();
        assert!(args.agent);
        assert!(args.path_a.is_none());
    }
}
