//! Transcode bridge: pipes a provider's raw audio through an external
//! transcoder and exposes the output as a chunk stream of exactly the
//! declared size.
//!
//! ```text
//! [RawAudio] --feeder task--> stdin [transcoder] stdout --poll_next--> [HTTP body]
//! ```
//!
//! Feeding and draining run concurrently so neither pipe buffer can fill up
//! while the other side waits. The output is zero-padded when the transcoder
//! stops short of the declared size and cut off when it runs past it.
//! Dropping the stream kills and reaps the process.
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::api::RawAudio;
use crate::config::TranscoderConfig;
use crate::error::{GatewayError, Result};

/// Launches transcoder processes from a configured command template.
#[derive(Debug, Clone)]
pub struct Transcoder {
    cfg: TranscoderConfig,
}

impl Transcoder {
    pub fn new(cfg: TranscoderConfig) -> Self {
        Self { cfg }
    }

    pub fn output_format(&self) -> &str {
        &self.cfg.output_format
    }

    pub fn size_offset(&self) -> u64 {
        self.cfg.size_offset
    }

    /// Expand the argument template for one invocation.
    pub fn command_args(&self, input_format: &str, bitrate_kbps: u32) -> Vec<String> {
        let bitrate = bitrate_kbps.to_string();
        self.cfg
            .args
            .iter()
            .map(|a| {
                a.replace("{input_format}", input_format)
                    .replace("{bitrate}", &bitrate)
                    .replace("{output_format}", &self.cfg.output_format)
            })
            .collect()
    }

    /// Spawn the transcoder and its feeder without waiting for output.
    pub fn spawn(
        &self,
        audio: RawAudio,
        input_format: &str,
        bitrate_kbps: u32,
        declared_size: u64,
        label: &str,
    ) -> Result<TranscodedStream> {
        let args = self.command_args(input_format, bitrate_kbps);
        debug!("[{}] spawning {} {:?}", label, self.cfg.program, args);
        let mut child = Command::new(&self.cfg.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GatewayError::Transcode(format!("failed to start {}: {}", self.cfg.program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::Transcode("transcoder stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::Transcode("transcoder stdout unavailable".into()))?;
        let pid = child.id();
        let chunk_size = self.cfg.chunk_size.max(1);
        let feeder = tokio::spawn(feed(audio, stdin, chunk_size, label.to_string()));

        Ok(TranscodedStream {
            stdout: Some(stdout),
            process: ProcessGuard {
                child: Some(child),
                feeder: Some(feeder),
                grace: Duration::from_millis(self.cfg.exit_grace_ms),
                label: label.to_string(),
            },
            buf: vec![0u8; chunk_size],
            primed: None,
            declared: declared_size,
            transmitted: 0,
            padding: 0,
            done: false,
            pid,
            label: label.to_string(),
        })
    }

    /// Spawn and wait for the first output chunk, so a transcoder that
    /// cannot produce anything fails before response headers are sent.
    pub async fn start(
        &self,
        audio: RawAudio,
        input_format: &str,
        bitrate_kbps: u32,
        declared_size: u64,
        label: &str,
    ) -> Result<TranscodedStream> {
        let mut stream = self.spawn(audio, input_format, bitrate_kbps, declared_size, label)?;
        let limit = Duration::from_secs(self.cfg.startup_timeout_secs);
        match tokio::time::timeout(limit, stream.prime()).await {
            Ok(Ok(())) => Ok(stream),
            Ok(Err(reason)) => {
                let status = stream.close().await;
                Err(GatewayError::Transcode(match status {
                    Some(s) => format!("{} ({})", reason, s),
                    None => reason,
                }))
            }
            Err(_) => {
                stream.close().await;
                Err(GatewayError::Transcode(format!(
                    "no output within {}s",
                    self.cfg.startup_timeout_secs
                )))
            }
        }
    }
}

/// Copy upstream audio into the transcoder's stdin, then close it so the
/// transcoder can flush. Errors end feeding without failing the stream.
async fn feed(mut audio: RawAudio, mut stdin: ChildStdin, chunk_size: usize, label: String) {
    let mut buf = vec![0u8; chunk_size];
    let mut fed: u64 = 0;
    loop {
        let n = match audio.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("[{}] upstream read failed after {} bytes: {}", label, fed, e);
                break;
            }
        };
        if let Err(e) = stdin.write_all(&buf[..n]).await {
            debug!("[{}] transcoder input closed after {} bytes: {}", label, fed, e);
            break;
        }
        fed += n as u64;
    }
    let _ = stdin.shutdown().await;
    debug!("[{}] fed {} bytes to transcoder", label, fed);
}

/// Owns the child process and feeder task; releasing it always ends with
/// the process reaped.
struct ProcessGuard {
    child: Option<Child>,
    feeder: Option<JoinHandle<()>>,
    grace: Duration,
    label: String,
}

impl ProcessGuard {
    /// Stop feeding and reap the process in the background. With
    /// `terminate` the process is killed first; otherwise it gets `grace`
    /// to exit on its own.
    fn release(&mut self, terminate: bool) {
        if let Some(f) = self.feeder.take() {
            f.abort();
        }
        let Some(mut child) = self.child.take() else {
            return;
        };
        if terminate {
            let _ = child.start_kill();
        }
        match child.try_wait() {
            Ok(Some(status)) => log_exit(&self.label, status, terminate),
            _ => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(reap(child, self.grace, self.label.clone(), terminate));
                }
                Err(_) => {
                    // No runtime left to wait on; kill_on_drop is the last resort.
                    let _ = child.start_kill();
                }
            },
        }
    }

    /// Kill and wait in place.
    async fn shutdown(&mut self) -> Option<ExitStatus> {
        if let Some(f) = self.feeder.take() {
            f.abort();
        }
        let mut child = self.child.take()?;
        let _ = child.start_kill();
        child.wait().await.ok()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        self.release(true);
    }
}

async fn reap(mut child: Child, grace: Duration, label: String, terminated: bool) {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => log_exit(&label, status, terminated),
        Ok(Err(e)) => warn!("[{}] waiting for transcoder failed: {}", label, e),
        Err(_) => {
            debug!("[{}] transcoder still running after {:?}, killing", label, grace);
            let _ = child.start_kill();
            match child.wait().await {
                Ok(status) => log_exit(&label, status, true),
                Err(e) => warn!("[{}] waiting for killed transcoder failed: {}", label, e),
            }
        }
    }
}

fn log_exit(label: &str, status: ExitStatus, terminated: bool) {
    if status.success() || (terminated && status.code().is_none()) {
        debug!("[{}] transcoder exited: {}", label, status);
    } else {
        warn!("[{}] transcoder exited abnormally: {}", label, status);
    }
}

/// Transcoder output as a stream of chunks summing to exactly the declared size.
pub struct TranscodedStream {
    stdout: Option<ChildStdout>,
    process: ProcessGuard,
    buf: Vec<u8>,
    primed: Option<Bytes>,
    declared: u64,
    /// Bytes taken from the transcoder so far (not counting padding).
    transmitted: u64,
    /// Zero bytes still owed after the transcoder stopped short.
    padding: u64,
    done: bool,
    pid: Option<u32>,
    label: String,
}

impl TranscodedStream {
    pub fn declared_size(&self) -> u64 {
        self.declared
    }

    /// OS pid of the transcoder process.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Read the first chunk ahead of time. It is yielded first by the stream.
    async fn prime(&mut self) -> std::result::Result<(), String> {
        if self.declared == 0 {
            return Ok(());
        }
        let want = (self.buf.len() as u64).min(self.declared) as usize;
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| "transcoder output closed".to_string())?;
        match stdout.read(&mut self.buf[..want]).await {
            Ok(0) => Err("transcoder produced no output".to_string()),
            Ok(n) => {
                self.primed = Some(Bytes::copy_from_slice(&self.buf[..n]));
                self.transmitted += n as u64;
                Ok(())
            }
            Err(e) => Err(format!("reading transcoder output: {}", e)),
        }
    }

    /// Cancel explicitly: kill the process and wait for it.
    pub async fn close(&mut self) -> Option<ExitStatus> {
        self.stdout = None;
        self.padding = 0;
        self.done = true;
        self.process.shutdown().await
    }

    /// Stop reading the transcoder and owe zeros up to the declared size.
    /// Returns the first padding chunk, if anything is missing.
    fn finish_with_padding(&mut self) -> Option<std::io::Result<Bytes>> {
        self.stdout = None;
        self.done = true;
        self.process.release(false);
        self.padding = self.declared.saturating_sub(self.transmitted);
        self.transmitted = self.declared;
        self.next_padding()
    }

    /// Next zero chunk, at most `chunk_size` long.
    fn next_padding(&mut self) -> Option<std::io::Result<Bytes>> {
        if self.padding == 0 {
            return None;
        }
        let n = (self.buf.len() as u64).min(self.padding) as usize;
        self.padding -= n as u64;
        Some(Ok(Bytes::from(vec![0u8; n])))
    }
}

impl Stream for TranscodedStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(chunk) = this.primed.take() {
            return Poll::Ready(Some(Ok(chunk)));
        }
        if this.done {
            return Poll::Ready(this.next_padding());
        }

        let remaining = this.declared.saturating_sub(this.transmitted);
        if remaining == 0 {
            // Declared size reached; anything the transcoder still has is cut off.
            debug!("[{}] declared size {} reached", this.label, this.declared);
            return Poll::Ready(this.finish_with_padding());
        }

        let Some(stdout) = this.stdout.as_mut() else {
            return Poll::Ready(this.finish_with_padding());
        };
        let want = (this.buf.len() as u64).min(remaining) as usize;
        let mut rb = ReadBuf::new(&mut this.buf[..want]);
        match Pin::new(stdout).poll_read(cx, &mut rb) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(())) => {
                let n = rb.filled().len();
                if n == 0 {
                    debug!(
                        "[{}] transcoder finished at {} of {} bytes, padding {}",
                        this.label,
                        this.transmitted,
                        this.declared,
                        remaining
                    );
                    return Poll::Ready(this.finish_with_padding());
                }
                let chunk = Bytes::copy_from_slice(rb.filled());
                this.transmitted += n as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Err(e)) => {
                // Headers are already out; the best we can do is keep the length right.
                error!(
                    "[{}] transcoder output failed at {} of {} bytes, padding {} bytes with zeros: {}",
                    this.label, this.transmitted, this.declared, remaining, e
                );
                Poll::Ready(this.finish_with_padding())
            }
        }
    }
}
