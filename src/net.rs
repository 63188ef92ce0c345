//! Agent transport: a framed RPC channel over a subprocess's stdin/stdout
//!
//! Client side: spawn the remote shell, wait for the ready sentinel while
//! answering a sudo prompt seen on stderr, then multiplex calls over the
//! remaining stdout bytes and stdin. Agent side: print the sentinel and
//! serve requests from stdin until EOF.

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::cancel::{CancelToken, Interrupted};
use crate::checksum;
use crate::fs_enum::{self, FileFilter};
use crate::logger::Logger;
use crate::protocol::{
    frame, HashReply, PingReply, PingRequest, Reply, Request, ScanReply, READY_MSG,
};
use crate::protocol_core::{decode_message, read_frame, send_message};

/// Write half of the channel, shared with the stderr watcher so it can
/// answer a password prompt. `None` once the channel is closed.
pub type SharedWriter = Arc<Mutex<Option<Box<dyn Write + Send>>>>;

// Poll interval while waiting for the agent's ready line
const HANDSHAKE_POLL_MS: u64 = 100;

/// Prompt text passed to `sudo -p`, unique per agent binary and host
pub fn prompt_marker(agent_bin: &str, host: &str) -> String {
    let name = Path::new(agent_bin)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| agent_bin.to_string());
    format!("[sudo] password for {} on {}: ", name, host)
}

/// Sliding-window matcher over a byte stream.
///
/// States are the window contents; the window never holds more than
/// `marker.len()` bytes and is emptied after a match, so one prompt fires
/// exactly once.
pub struct PromptMatcher {
    marker: Vec<u8>,
    window: VecDeque<u8>,
}

impl PromptMatcher {
    pub fn new(marker: &str) -> Self {
        let marker = marker.as_bytes().to_vec();
        Self {
            window: VecDeque::with_capacity(marker.len()),
            marker,
        }
    }

    /// Feed one byte; true when the window equals the marker
    pub fn feed(&mut self, byte: u8) -> bool {
        if self.marker.is_empty() {
            return false;
        }
        if self.window.len() == self.marker.len() {
            self.window.pop_front();
        }
        self.window.push_back(byte);
        if self.window.len() == self.marker.len() && self.window.iter().eq(self.marker.iter()) {
            self.window.clear();
            return true;
        }
        false
    }
}

struct PendingCalls {
    waiters: HashMap<u64, mpsc::Sender<Result<Reply, String>>>,
    closed: Option<String>,
}

impl PendingCalls {
    fn fail_all(&mut self, msg: String) {
        for (_, tx) in self.waiters.drain() {
            let _ = tx.send(Err(msg.clone()));
        }
        self.closed = Some(msg);
    }
}

/// Request/reply client; calls from many threads may be in flight at once
pub struct RpcClient {
    writer: SharedWriter,
    pending: Arc<Mutex<PendingCalls>>,
    next_id: AtomicU64,
    reader: Option<JoinHandle<()>>,
}

impl RpcClient {
    pub fn new<R: Read + Send + 'static>(mut reader: R, writer: SharedWriter) -> Self {
        let pending = Arc::new(Mutex::new(PendingCalls {
            waiters: HashMap::new(),
            closed: None,
        }));
        let routes = Arc::clone(&pending);
        let handle = thread::spawn(move || loop {
            match read_frame(&mut reader) {
                Ok(Some((frame::REPLY, payload))) => match decode_message::<Reply>(&payload) {
                    Ok(env) => {
                        if let Some(tx) = routes.lock().waiters.remove(&env.id) {
                            let _ = tx.send(Ok(env.body));
                        }
                    }
                    Err(e) => {
                        routes.lock().fail_all(format!("{:#}", e));
                        break;
                    }
                },
                Ok(Some((kind, _))) => {
                    routes.lock().fail_all(format!("unexpected frame kind {}", kind));
                    break;
                }
                Ok(None) => {
                    routes.lock().fail_all("agent closed the connection".to_string());
                    break;
                }
                Err(e) => {
                    routes.lock().fail_all(format!("{:#}", e));
                    break;
                }
            }
        });
        Self {
            writer,
            pending,
            next_id: AtomicU64::new(1),
            reader: Some(handle),
        }
    }

    /// One round-trip; blocks until the reply arrives or the channel breaks
    pub fn call(&self, request: Request) -> Result<Reply> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        {
            let mut pending = self.pending.lock();
            if let Some(msg) = &pending.closed {
                bail!("rpc channel closed: {}", msg);
            }
            pending.waiters.insert(id, tx);
        }

        let sent = {
            let mut writer = self.writer.lock();
            match writer.as_mut() {
                Some(w) => send_message(w, frame::REQUEST, id, &request),
                None => Err(anyhow!("rpc channel closed")),
            }
        };
        if let Err(e) = sent {
            self.pending.lock().waiters.remove(&id);
            return Err(e.context("send request"));
        }

        match rx.recv() {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(msg)) => bail!("rpc call failed: {}", msg),
            Err(_) => bail!("rpc channel closed"),
        }
    }

    /// Close the write half and wait for the reply reader to finish
    pub fn close(&mut self) {
        self.writer.lock().take();
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

/// A running agent subprocess and its RPC channel
pub struct AgentConnection {
    pub child: Child,
    pub client: RpcClient,
}

/// Spawn `cmd`, complete the ready/ping handshake and return the channel.
///
/// `prompt` is the sudo prompt to watch for on stderr, if any. The wait for
/// the ready line gives up when `cancel` fires.
pub fn launch(
    mut cmd: Command,
    prompt: Option<String>,
    cancel: &CancelToken,
) -> Result<AgentConnection> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to start {:?}", cmd.get_program()))?;

    let stdin = child.stdin.take().context("subprocess stdin not captured")?;
    let stdout = child.stdout.take().context("subprocess stdout not captured")?;
    let stderr = child.stderr.take().context("subprocess stderr not captured")?;

    let stdin: Box<dyn Write + Send> = Box::new(stdin);
    let writer: SharedWriter = Arc::new(Mutex::new(Some(stdin)));
    let captured = Arc::new(Mutex::new(Vec::new()));

    let stderr_thread = {
        let writer = Arc::clone(&writer);
        let captured = Arc::clone(&captured);
        thread::spawn(move || watch_stderr(stderr, prompt, writer, captured, read_password))
    };

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(wait_for_ready(BufReader::new(stdout)));
    });

    let reader = loop {
        match rx.recv_timeout(Duration::from_millis(HANDSHAKE_POLL_MS)) {
            Ok(Ok(reader)) => break reader,
            Ok(Err(e)) => {
                writer.lock().take();
                let _ = child.wait();
                let _ = stderr_thread.join();
                let msg = String::from_utf8_lossy(&captured.lock()).trim().to_string();
                if msg.is_empty() {
                    return Err(e);
                }
                bail!("remote agent failed to start: {} | {:#}", msg, e);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Interrupted.into());
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                let _ = child.kill();
                let _ = child.wait();
                bail!("handshake reader stopped unexpectedly");
            }
        }
    };

    // The same buffered reader carries on, so bytes already read past the
    // sentinel stay in the channel.
    let mut client = RpcClient::new(reader, writer);
    match client.call(Request::Ping(PingRequest {})) {
        Ok(Reply::Pong(_)) => Ok(AgentConnection { child, client }),
        Ok(other) => {
            client.close();
            let _ = child.kill();
            let _ = child.wait();
            bail!("remote agent RPC ping failed: unexpected reply {:?}", other)
        }
        Err(e) => {
            client.close();
            let _ = child.kill();
            let _ = child.wait();
            Err(e.context("remote agent RPC ping failed"))
        }
    }
}

/// Read lines until the ready sentinel; anything else is noise
fn wait_for_ready(mut reader: BufReader<ChildStdout>) -> Result<BufReader<ChildStdout>> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .context("disconnected before agent ready")?;
        if n == 0 {
            bail!("disconnected before agent ready: EOF");
        }
        if line.trim() == READY_MSG {
            return Ok(reader);
        }
    }
}

/// Mirror the subprocess's stderr locally, keep a copy for error reports,
/// and answer each sudo prompt with a line from `password`
fn watch_stderr<R, P>(
    mut stderr: R,
    prompt: Option<String>,
    writer: SharedWriter,
    captured: Arc<Mutex<Vec<u8>>>,
    mut password: P,
) where
    R: Read,
    P: FnMut() -> String,
{
    let mut matcher = prompt.as_deref().map(PromptMatcher::new);
    let mut buf = [0u8; 1024];
    loop {
        let n = match stderr.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let chunk = &buf[..n];
        {
            let mut out = io::stderr().lock();
            let _ = out.write_all(chunk);
            let _ = out.flush();
        }
        captured.lock().extend_from_slice(chunk);

        let Some(matcher) = matcher.as_mut() else {
            continue;
        };
        for &b in chunk {
            if matcher.feed(b) {
                let line = password();
                if let Some(w) = writer.lock().as_mut() {
                    let _ = w.write_all(line.as_bytes());
                    let _ = w.write_all(b"\n");
                    let _ = w.flush();
                }
            }
        }
    }
}

/// Read a password from the controlling terminal with echo off
fn read_password() -> String {
    let password = rpassword::read_password().unwrap_or_default();
    // keep the terminal clean
    eprintln!();
    password
}

/// Agent loop: announce readiness, then answer framed requests until EOF.
///
/// Requests run concurrently on the rayon pool; replies are written one
/// frame at a time under a lock.
pub fn serve<R, W>(mut input: R, output: W, logger: &dyn Logger) -> Result<()>
where
    R: Read,
    W: Write + Send,
{
    let output = Mutex::new(output);
    {
        let mut out = output.lock();
        writeln!(out, "{}", READY_MSG)?;
        out.flush()?;
    }

    rayon::in_place_scope(|s| -> Result<()> {
        loop {
            let (kind, payload) = match read_frame(&mut input)? {
                Some(f) => f,
                None => return Ok(()),
            };
            if kind != frame::REQUEST {
                bail!("expected REQUEST frame, got kind {}", kind);
            }
            let env = decode_message::<Request>(&payload)?;
            let output = &output;
            s.spawn(move |_| {
                let reply = handle_request(env.body, logger);
                let mut out = output.lock();
                if let Err(e) = send_message(&mut *out, frame::REPLY, env.id, &reply) {
                    logger.hash_failed("<reply>", &format!("{:#}", e));
                }
            });
        }
    })
}

/// Dispatch one request to the same scanner and hasher local nodes use
pub fn handle_request(request: Request, logger: &dyn Logger) -> Reply {
    match request {
        Request::Ping(_) => Reply::Pong(PingReply {
            status: "OK".to_string(),
        }),
        Request::Scan(r) => {
            let scanned = FileFilter::new(&r.includes, &r.excludes).and_then(|filter| {
                fs_enum::scan(Path::new(&r.root), &filter, r.follow_symlinks, logger)
            });
            match scanned {
                Ok(result) => Reply::Scan(ScanReply {
                    files: result.files,
                    dirs: result.dirs,
                    error: String::new(),
                }),
                Err(e) => Reply::Scan(ScanReply {
                    error: format!("{:#}", e),
                    ..Default::default()
                }),
            }
        }
        Request::QuickHash(r) => hash_reply(checksum::quick_hash(
            Path::new(&r.root),
            &r.rel_path,
            r.follow_symlinks,
        )),
        Request::FullHash(r) => hash_reply(checksum::full_hash(
            Path::new(&r.root),
            &r.rel_path,
            r.algorithm,
            r.limit,
            r.follow_symlinks,
        )),
    }
}

fn hash_reply(result: Result<String>) -> Reply {
    match result {
        Ok(digest) => Reply::Hash(HashReply {
            digest,
            error: String::new(),
        }),
        Err(e) => Reply::Hash(HashReply {
            digest: String::new(),
            error: format!("{:#}", e),
        }),
    }
}
