//! Bounded child-process runner.
//!
//! Spawns one program in its own process group, feeds it stdin, and races
//! its exit against the wall-clock deadline and the stdout cap. Whichever
//! fires first wins; on a deadline or overflow the whole group gets SIGKILL
//! and is reaped before returning. Output is captured concurrently so a
//! chatty program never blocks on a full pipe.

use capsule_common::types::{STDERR_CAP_CHARS, STDOUT_CAP_CHARS};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const READ_CHUNK: usize = 8 * 1024;

/// How long capture tasks may take to hit EOF once the group is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Never visible to submitted programs
const SCRUBBED_ENV: &[&str] = &["JUDGE_SECRET", "REDIS_URL"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLimits {
    pub stdout_chars: usize,
    pub stderr_chars: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            stdout_chars: STDOUT_CAP_CHARS,
            stderr_chars: STDERR_CAP_CHARS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub stdin: String,
    pub time_limit: Duration,
    pub limits: OutputLimits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exit code, or 128 + signal number when killed by a signal
    Exited(i32),
    TimedOut,
    OutputOverflow,
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub termination: Termination,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub elapsed: Duration,
}

struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    overflowed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// UTF-8 aware: counts lead bytes, so a character split across two reads is counted once
fn count_chars(bytes: &[u8]) -> usize {
    bytes.iter().filter(|b| (**b & 0xC0) != 0x80).count()
}

fn spawn_capture<R>(mut reader: R, cap_chars: usize, on_overflow: Option<Arc<Notify>>) -> Capture
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf = Arc::new(Mutex::new(Vec::new()));
    let overflowed = Arc::new(AtomicBool::new(false));

    let task = tokio::spawn({
        let buf = Arc::clone(&buf);
        let overflowed = Arc::clone(&overflowed);
        async move {
            let mut chunk = vec![0u8; READ_CHUNK];
            let mut seen = 0usize;
            loop {
                let n = match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                // past the cap: keep reading, stop storing
                if overflowed.load(Ordering::Relaxed) {
                    continue;
                }
                seen += count_chars(&chunk[..n]);
                if let Ok(mut stored) = buf.lock() {
                    stored.extend_from_slice(&chunk[..n]);
                }
                if seen > cap_chars {
                    overflowed.store(true, Ordering::Relaxed);
                    if let Some(notify) = &on_overflow {
                        notify.notify_one();
                    }
                }
            }
        }
    });

    Capture {
        buf,
        overflowed,
        task,
    }
}

async fn finish_capture(capture: Capture, cap_chars: usize) -> (String, bool) {
    let Capture {
        buf,
        overflowed,
        mut task,
    } = capture;

    if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
        warn!("Output reader did not reach EOF, abandoning it");
        task.abort();
    }

    let bytes = buf
        .lock()
        .map(|mut stored| std::mem::take(&mut *stored))
        .unwrap_or_default();
    let text = String::from_utf8_lossy(&bytes);
    let truncated = overflowed.load(Ordering::Relaxed) || text.chars().count() > cap_chars;
    (text.chars().take(cap_chars).collect(), truncated)
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

/// Run one program to completion under the given bounds.
///
/// Only failures to start or wait for the process are errors; everything the
/// program itself does comes back in `ProcessOutcome`.
pub async fn run_bounded(spec: RunSpec) -> io::Result<ProcessOutcome> {
    let RunSpec {
        program,
        args,
        cwd,
        env,
        stdin,
        time_limit,
        limits,
    } = spec;

    let mut cmd = Command::new(&program);
    cmd.args(&args)
        .current_dir(&cwd)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .process_group(0);
    for key in SCRUBBED_ENV {
        cmd.env_remove(key);
    }

    let started = Instant::now();
    let mut child = cmd.spawn()?;
    // leader of its own group, so pgid == pid
    let group = child.id().map(|id| Pid::from_raw(id as i32));

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child stderr not captured"))?;

    if let Some(mut pipe) = child.stdin.take() {
        tokio::spawn(async move {
            if !stdin.is_empty() {
                if let Err(e) = pipe.write_all(stdin.as_bytes()).await {
                    // programs that never read their input close the pipe early
                    debug!(error = %e, "stdin write stopped");
                }
            }
            let _ = pipe.shutdown().await;
        });
    }

    let overflow = Arc::new(Notify::new());
    let out = spawn_capture(stdout, limits.stdout_chars, Some(Arc::clone(&overflow)));
    let err = spawn_capture(stderr, limits.stderr_chars, None);

    let (status, timed_out) = tokio::select! {
        status = child.wait() => (Some(status?), false),
        _ = tokio::time::sleep(time_limit) => (None, true),
        _ = overflow.notified() => (None, false),
    };
    let elapsed = started.elapsed();

    // also sweeps up anything the program left running in the background
    if let Some(group) = group {
        let _ = killpg(group, Signal::SIGKILL);
    }
    let status = match status {
        Some(status) => status,
        None => {
            let _ = child.start_kill();
            child.wait().await?
        }
    };

    let (stdout, stdout_truncated) = finish_capture(out, limits.stdout_chars).await;
    let (stderr, stderr_truncated) = finish_capture(err, limits.stderr_chars).await;

    let termination = if timed_out {
        Termination::TimedOut
    } else if stdout_truncated {
        Termination::OutputOverflow
    } else {
        Termination::Exited(exit_code(status))
    };

    debug!(
        program = %program,
        termination = ?termination,
        elapsed_ms = elapsed.as_millis() as u64,
        "Process finished"
    );

    Ok(ProcessOutcome {
        termination,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        elapsed,
    })
}
