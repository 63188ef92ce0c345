//! The two sides of a comparison
//!
//! Everything downstream of node creation works through `DirNode` and never
//! knows whether a tree is local or behind an SSH agent.

use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::checksum::{self, Checksum};
use crate::fs_enum::{self, FileFilter, ScanResult};
use crate::location::Location;
use crate::logger::Logger;
use crate::net::{self, AgentConnection};
use crate::protocol::{HashRequest, Reply, Request, ScanRequest, DEFAULT_AGENT_BIN};

/// Capability set of one compared tree
pub trait DirNode: Send + Sync {
    fn scan(
        &self,
        includes: &[String],
        excludes: &[String],
        follow_symlinks: bool,
    ) -> Result<ScanResult>;
    fn quick_hash(&self, rel_path: &str, follow_symlinks: bool) -> Result<String>;
    fn full_hash(
        &self,
        rel_path: &str,
        algorithm: Checksum,
        limit: u64,
        follow_symlinks: bool,
    ) -> Result<String>;
    /// Orderly shutdown; waits for outstanding work
    fn close(&mut self) -> Result<()>;
    /// Stop at once, dropping outstanding work
    fn abort(&mut self) {}
}

/// How to reach one remote side
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    /// Remote shell command, split on whitespace (`ssh`, `ssh -p 2222`, ...)
    pub rsh: String,
    pub agent_bin: Option<String>,
    pub sudo: bool,
    pub verbose: bool,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            rsh: "ssh".to_string(),
            agent_bin: None,
            sudo: false,
            verbose: false,
        }
    }
}

/// Build the node for one side
pub fn create_node(
    location: &Location,
    remote: &RemoteOptions,
    cancel: &CancelToken,
    logger: Arc<dyn Logger>,
) -> Result<Box<dyn DirNode>> {
    match location {
        Location::Local(path) => Ok(Box::new(LocalNode::new(path, logger)?)),
        Location::Remote { host, path } => {
            logger.connecting(host);
            Ok(Box::new(RemoteNode::connect(host, path, remote, cancel)?))
        }
    }
}

pub struct LocalNode {
    root: PathBuf,
    logger: Arc<dyn Logger>,
}

impl LocalNode {
    pub fn new(root: &Path, logger: Arc<dyn Logger>) -> Result<Self> {
        let root = std::path::absolute(root)
            .with_context(|| format!("cannot resolve {}", root.display()))?;
        Ok(Self { root, logger })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DirNode for LocalNode {
    fn scan(
        &self,
        includes: &[String],
        excludes: &[String],
        follow_symlinks: bool,
    ) -> Result<ScanResult> {
        let filter = FileFilter::new(includes, excludes)?;
        fs_enum::scan(&self.root, &filter, follow_symlinks, &*self.logger)
    }

    fn quick_hash(&self, rel_path: &str, follow_symlinks: bool) -> Result<String> {
        checksum::quick_hash(&self.root, rel_path, follow_symlinks)
    }

    fn full_hash(
        &self,
        rel_path: &str,
        algorithm: Checksum,
        limit: u64,
        follow_symlinks: bool,
    ) -> Result<String> {
        checksum::full_hash(&self.root, rel_path, algorithm, limit, follow_symlinks)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A tree served by `dirdiff --agent` on the far end of a remote shell
pub struct RemoteNode {
    conn: Option<AgentConnection>,
    root: String,
}

impl RemoteNode {
    /// Start the agent on `host` and complete the handshake
    pub fn connect(
        host: &str,
        root: &str,
        opts: &RemoteOptions,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let agent_bin = opts.agent_bin.as_deref().unwrap_or(DEFAULT_AGENT_BIN);
        let marker = net::prompt_marker(agent_bin, host);

        let mut rsh = opts.rsh.split_whitespace();
        let program = rsh.next().ok_or_else(|| anyhow!("empty remote shell command"))?;
        let mut cmd = Command::new(program);
        cmd.args(rsh).arg(host);
        if opts.sudo {
            // the remote shell re-parses this line, so the prompt is quoted
            let quoted = format!("'{}'", marker);
            cmd.args(["sudo", "-S", "-p", quoted.as_str()]);
        }
        cmd.args([agent_bin, "--agent"]);
        if opts.verbose {
            cmd.arg("--verbose");
        }

        let prompt = opts.sudo.then_some(marker);
        Self::launch(cmd, root, prompt, cancel).with_context(|| format!("connecting to {}", host))
    }

    /// Spawn an already-built agent command and complete the handshake
    pub fn launch(
        cmd: Command,
        root: &str,
        prompt: Option<String>,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let conn = net::launch(cmd, prompt, cancel)?;
        Ok(Self {
            conn: Some(conn),
            root: root.to_string(),
        })
    }

    fn call(&self, request: Request) -> Result<Reply> {
        let conn = self.conn.as_ref().ok_or_else(|| anyhow!("remote node is closed"))?;
        conn.client.call(request)
    }

    fn hash(&self, request: Request) -> Result<String> {
        match self.call(request)? {
            Reply::Hash(reply) if reply.error.is_empty() => Ok(reply.digest),
            Reply::Hash(reply) => Err(anyhow!(reply.error)),
            other => bail!("unexpected reply to hash request: {:?}", other),
        }
    }

    fn hash_request(
        &self,
        rel_path: &str,
        algorithm: Checksum,
        limit: u64,
        follow_symlinks: bool,
    ) -> HashRequest {
        HashRequest {
            root: self.root.clone(),
            rel_path: rel_path.to_string(),
            limit,
            follow_symlinks,
            algorithm,
        }
    }
}

impl DirNode for RemoteNode {
    fn scan(
        &self,
        includes: &[String],
        excludes: &[String],
        follow_symlinks: bool,
    ) -> Result<ScanResult> {
        let request = Request::Scan(ScanRequest {
            root: self.root.clone(),
            includes: includes.to_vec(),
            excludes: excludes.to_vec(),
            follow_symlinks,
        });
        match self.call(request)? {
            Reply::Scan(reply) if reply.error.is_empty() => Ok(ScanResult {
                files: reply.files,
                dirs: reply.dirs,
            }),
            Reply::Scan(reply) => Err(anyhow!(reply.error)),
            other => bail!("unexpected reply to scan request: {:?}", other),
        }
    }

    fn quick_hash(&self, rel_path: &str, follow_symlinks: bool) -> Result<String> {
        let limit = checksum::QUICK_HASH_LIMIT;
        let req = self.hash_request(rel_path, Checksum::Md5, limit, follow_symlinks);
        self.hash(Request::QuickHash(req))
    }

    fn full_hash(
        &self,
        rel_path: &str,
        algorithm: Checksum,
        limit: u64,
        follow_symlinks: bool,
    ) -> Result<String> {
        let req = self.hash_request(rel_path, algorithm, limit, follow_symlinks);
        self.hash(Request::FullHash(req))
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        conn.client.close();
        let status = conn.child.wait().context("waiting for remote agent")?;
        if !status.success() {
            bail!("remote agent exited with {}", status);
        }
        Ok(())
    }

    fn abort(&mut self) {
        // Kill first so the reply reader sees EOF instead of waiting on replies
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.child.kill();
            conn.client.close();
            let _ = conn.child.wait();
        }
    }
}

impl Drop for RemoteNode {
    fn drop(&mut self) {
        // Never leave an agent behind when close() was skipped
        self.abort();
    }
}
