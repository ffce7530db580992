//! Process supervision for compiler and program runs.
//!
//! A [`ProcessRunner`] spawns one child with piped stdio, feeds stdin from a
//! detached task, drains stdout/stderr into tail-retaining bounded buffers and
//! enforces a wall-clock timeout.
//!
//! On unix the child leads its own process group. On timeout, and whenever
//! the run ends or its future is dropped, the whole group receives SIGKILL,
//! so helpers spawned by the child (`cc1plus` under `g++`) die with it.
//! Partial output of a timed out run is still returned.

use crate::error::{EngineError, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to keep draining pipes after the child is gone.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(250);
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Keeps only the most recent `cap` bytes written to it.
#[derive(Debug, Default)]
struct TailBuffer {
    bytes: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl TailBuffer {
    fn new(cap: usize) -> Self {
        Self {
            bytes: Vec::new(),
            cap,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        if self.bytes.len() > self.cap {
            let excess = self.bytes.len() - self.cap;
            self.bytes.drain(..excess);
            self.truncated = true;
        }
    }

    fn take(&mut self) -> (String, bool) {
        let text = String::from_utf8_lossy(&self.bytes).into_owned();
        (text, self.truncated)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// Terminating signal number when the child was killed by a signal.
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }

    /// stdout and stderr concatenated, the way a terminal would show them.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    envs: Vec<(String, PathBuf)>,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ProcessRunner {
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
            stdin: None,
            timeout: Self::DEFAULT_TIMEOUT,
            max_output_bytes: Self::DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<PathBuf>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    pub async fn run(self) -> Result<ProcessOutput> {
        let program = self.program_name();

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        #[cfg(unix)]
        command.process_group(0);

        let start = Instant::now();
        let mut child = command.spawn().map_err(|source| EngineError::Spawn {
            program: program.clone(),
            source,
        })?;
        let mut group = ProcessGroup::new(child.id());

        // Feed stdin from its own task so a child that never reads cannot block us
        if let Some(mut stdin) = child.stdin.take() {
            let input = self.stdin.unwrap_or_default();
            tokio::spawn(async move {
                if !input.is_empty() {
                    if let Err(e) = stdin.write_all(&input).await {
                        if e.kind() != std::io::ErrorKind::BrokenPipe {
                            debug!(error = %e, "Failed to write stdin");
                        }
                    }
                }
                drop(stdin);
            });
        }

        let stdout_buf = Arc::new(Mutex::new(TailBuffer::new(self.max_output_bytes)));
        let stderr_buf = Arc::new(Mutex::new(TailBuffer::new(self.max_output_bytes)));
        let stdout_task = child
            .stdout
            .take()
            .map(|pipe| spawn_reader(pipe, Arc::clone(&stdout_buf)));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| spawn_reader(pipe, Arc::clone(&stderr_buf)));

        let mut output = ProcessOutput::default();
        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                output.exit_code = status.code();
                output.signal = exit_signal(&status);
            }
            Ok(Err(e)) => return Err(EngineError::Io(e)),
            Err(_) => {
                output.timed_out = true;
                group.kill();
                if let Err(e) = child.kill().await {
                    warn!(program = %program, error = %e, "Failed to kill timed out process");
                }
            }
        }
        output.elapsed = start.elapsed();
        // Leftover group members would keep the pipes open
        group.release();

        for task in [stdout_task, stderr_task].into_iter().flatten() {
            drain(task).await;
        }

        (output.stdout, output.stdout_truncated) = lock(&stdout_buf).take();
        (output.stderr, output.stderr_truncated) = lock(&stderr_buf).take();

        debug!(
            program = %program,
            exit_code = ?output.exit_code,
            signal = ?output.signal,
            timed_out = output.timed_out,
            elapsed_ms = output.elapsed_ms(),
            "Process finished"
        );

        Ok(output)
    }
}

/// Kills the child's process group when dropped.
struct ProcessGroup {
    pgid: Option<i32>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()),
        }
    }

    /// Kill the group and stop tracking it.
    fn release(&mut self) {
        self.kill();
        self.pgid = None;
    }

    #[cfg(unix)]
    fn kill(&self) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pgid) = self.pgid {
            match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => debug!(pgid = pgid, error = %e, "Failed to kill process group"),
            }
        }
    }

    #[cfg(not(unix))]
    fn kill(&self) {}
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.release();
    }
}

fn lock(buf: &Mutex<TailBuffer>) -> std::sync::MutexGuard<'_, TailBuffer> {
    buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn spawn_reader<R>(mut pipe: R, buf: Arc<Mutex<TailBuffer>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => lock(&buf).push(&chunk[..n]),
                Err(e) => {
                    debug!(error = %e, "Pipe read failed");
                    break;
                }
            }
        }
    })
}

/// A grandchild may still hold the pipe open; give up after a short grace.
async fn drain(mut task: JoinHandle<()>) {
    if tokio::time::timeout(PIPE_DRAIN_GRACE, &mut task).await.is_err() {
        task.abort();
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
