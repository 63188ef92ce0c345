//! Checksum and hashing utilities
//!
//! Files are fingerprinted either whole or, past a size limit, through three
//! samples (head, middle, tail) whose combined length equals the limit.
//! Changes that fall strictly between the samples are not seen in that mode.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

/// Byte budget of the quick hash computed before any full hash
pub const QUICK_HASH_LIMIT: u64 = 1024;

/// Available checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Checksum {
    #[value(skip)]
    Md5, // quick hashes only
    Sha256,
    Blake3,
}

impl Default for Checksum {
    fn default() -> Self {
        Self::Sha256
    }
}

/// Streaming hasher over any of the supported algorithms
enum Digester {
    Md5(md5::Context),
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Digester {
    fn new(algorithm: Checksum) -> Self {
        match algorithm {
            Checksum::Md5 => Self::Md5(md5::Context::new()),
            Checksum::Sha256 => Self::Sha256(Sha256::new()),
            Checksum::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(ctx) => ctx.consume(data),
            Self::Sha256(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finish_hex(self) -> String {
        match self {
            Self::Md5(ctx) => format!("{:x}", ctx.compute()),
            Self::Sha256(h) => format!("{:x}", h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

impl Write for Digester {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hash a file, sampling it when it is larger than `limit` (0 = no limit).
///
/// With `follow_symlinks` off, a symlink is fingerprinted by its target
/// string and the target itself is never opened.
pub fn sparse_hash(
    path: &Path,
    algorithm: Checksum,
    limit: u64,
    follow_symlinks: bool,
) -> Result<String> {
    let mut digester = Digester::new(algorithm);

    if !follow_symlinks {
        let meta = fs::symlink_metadata(path)
            .with_context(|| format!("stat {}", path.display()))?;
        if meta.file_type().is_symlink() {
            let target = fs::read_link(path)
                .with_context(|| format!("read link {}", path.display()))?;
            digester.update(&target_bytes(&target));
            return Ok(digester.finish_hex());
        }
    }

    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let size = file
        .metadata()
        .with_context(|| format!("stat {}", path.display()))?
        .len();

    if limit == 0 || size <= limit {
        io::copy(&mut file, &mut digester).with_context(|| format!("read {}", path.display()))?;
        return Ok(digester.finish_hex());
    }

    let chunk = limit / 3;
    let last_chunk = limit - chunk * 2;

    copy_exact(&mut file, &mut digester, chunk)
        .with_context(|| format!("read head of {}", path.display()))?;
    file.seek(SeekFrom::Start(size / 2 - chunk / 2))
        .with_context(|| format!("seek {}", path.display()))?;
    copy_exact(&mut file, &mut digester, chunk)
        .with_context(|| format!("read middle of {}", path.display()))?;
    file.seek(SeekFrom::Start(size - last_chunk))
        .with_context(|| format!("seek {}", path.display()))?;
    copy_exact(&mut file, &mut digester, last_chunk)
        .with_context(|| format!("read tail of {}", path.display()))?;

    Ok(digester.finish_hex())
}

/// Quick hash of a path under `root`: MD5 over at most `QUICK_HASH_LIMIT` bytes
pub fn quick_hash(root: &Path, rel_path: &str, follow_symlinks: bool) -> Result<String> {
    let full = join_relative(root, rel_path)?;
    sparse_hash(&full, Checksum::Md5, QUICK_HASH_LIMIT, follow_symlinks)
}

/// Content hash of a path under `root`
pub fn full_hash(
    root: &Path,
    rel_path: &str,
    algorithm: Checksum,
    limit: u64,
    follow_symlinks: bool,
) -> Result<String> {
    let full = join_relative(root, rel_path)?;
    sparse_hash(&full, algorithm, limit, follow_symlinks)
}

/// Join a slash-separated relative path under `root`.
/// Parent, root and prefix components are rejected so a request can never
/// reach outside the compared tree.
pub fn join_relative(root: &Path, rel_path: &str) -> Result<PathBuf> {
    if rel_path.contains('\0') {
        bail!("path contains NUL byte: {:?}", rel_path);
    }
    let mut joined = root.to_path_buf();
    for component in Path::new(rel_path).components() {
        match component {
            Component::CurDir => {}
            Component::Normal(s) => joined.push(s),
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                bail!("path contains disallowed component: {:?}", rel_path);
            }
        }
    }
    Ok(joined)
}

fn copy_exact(reader: &mut File, digester: &mut Digester, len: u64) -> io::Result<()> {
    let copied = io::copy(&mut reader.take(len), digester)?;
    if copied != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, got {}", len, copied),
        ));
    }
    Ok(())
}

#[cfg(unix)]
fn target_bytes(target: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    target.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn target_bytes(target: &Path) -> Vec<u8> {
    target.to_string_lossy().replace('\\', "/").into_bytes()
}
