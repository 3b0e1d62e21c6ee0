//! # Solver: External Kangaroo Process Adapter
//!
//! Launches JeanLucPons' Kangaroo for one worker's sub-range and exposes its
//! combined stdout/stderr as a forward-only line stream.
//!
//! ## Invocation
//!
//! ```text
//! kangaroo -t <threads> -d <dp_bits> [-i <work>] -w <work> -wi <secs> <input>
//! kangaroo -gpu -g <device> -d <dp_bits> [-i <work>] -w <work> -wi <secs> <input>
//! ```
//!
//! The input descriptor holds three lines: range start and end as uppercase
//! hex without prefix, then the target public key. It is rewritten on every
//! launch. `-i` is passed only when the work file already exists; the file is
//! never parsed here.
//!
//! ## Output
//!
//! One reader thread per pipe splits bytes on `\n` or `\r` (Kangaroo redraws
//! its status line with carriage returns) and feeds a channel. The consumer
//! polls with a timeout so it can notice cancellation between lines.
//!
//! ## Termination
//!
//! [`SolverProcess::terminate`] sends SIGTERM, polls for exit for the grace
//! period, then kills. Dropping a running process kills it outright.

use crate::bigint;
use crate::config::{DeviceMode, PuzzleConfig, SolverSettings};
use crate::error::{PouchError, Result};
use crate::range::WorkerRange;
use crate::store::{keys, FsStore, Store};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Time a child gets to exit after SIGTERM before it is killed.
pub const TERMINATION_GRACE: Duration = Duration::from_secs(10);

const EXIT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub resumed: bool,
}

impl Invocation {
    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

pub fn build_invocation(
    settings: &SolverSettings,
    work_file: &Path,
    input_file: &Path,
    resume: bool,
) -> Invocation {
    let mut args: Vec<String> = Vec::new();
    match settings.mode {
        DeviceMode::Gpu { device } => {
            args.push("-gpu".into());
            args.push("-g".into());
            args.push(device.to_string());
        }
        DeviceMode::Cpu { threads } => {
            args.push("-t".into());
            args.push(threads.to_string());
        }
    }
    args.push("-d".into());
    args.push(settings.dp_bits.to_string());
    if resume {
        args.push("-i".into());
        args.push(work_file.display().to_string());
    }
    args.push("-w".into());
    args.push(work_file.display().to_string());
    args.push("-wi".into());
    args.push(settings.save_interval.as_secs().to_string());
    args.push(input_file.display().to_string());

    Invocation {
        program: settings.binary.clone(),
        args,
        resumed: resume,
    }
}

/// Contents of the solver's input file.
pub fn input_descriptor(range: &WorkerRange, target_public_key: &str) -> String {
    format!(
        "{}\n{}\n{}\n",
        bigint::to_solver_hex(range.low()),
        bigint::to_solver_hex(range.high()),
        target_public_key
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextLine {
    Line(String),
    /// Nothing arrived within the timeout; the process may still be running.
    Idle,
    /// Both output pipes are closed.
    Closed,
}

/// A running solver and its output stream.
pub struct SolverProcess {
    child: Child,
    lines: Receiver<String>,
    invocation: Invocation,
}

impl SolverProcess {
    /// Check the binary, write the input descriptor, decide on resume, and
    /// spawn the solver for `range`.
    pub fn launch(
        store: &FsStore,
        settings: &SolverSettings,
        puzzle: &PuzzleConfig,
        range: &WorkerRange,
    ) -> Result<SolverProcess> {
        if !settings.binary.is_file() {
            return Err(PouchError::MissingDependency {
                path: settings.binary.clone(),
            });
        }

        let worker = range.worker_id;
        let input_key = keys::input_file(worker);
        let work_key = keys::work_file(worker);
        store.write(
            &input_key,
            input_descriptor(range, &puzzle.target_public_key).as_bytes(),
        )?;

        let resume = store.exists(&work_key)?;
        if resume {
            info!(worker, "Resuming from existing work file");
        } else {
            info!(worker, "Starting fresh (no existing work file)");
        }

        let invocation = build_invocation(
            settings,
            &store.path(&work_key),
            &store.path(&input_key),
            resume,
        );
        info!(worker, command = %invocation.display(), "Launching solver");
        Self::spawn(invocation)
    }

    /// Spawn an already-built invocation.
    pub fn spawn(invocation: Invocation) -> Result<SolverProcess> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let (tx, rx) = mpsc::channel();
        if let Some(out) = child.stdout.take() {
            spawn_reader(out, tx.clone());
        }
        if let Some(err) = child.stderr.take() {
            spawn_reader(err, tx);
        }

        Ok(SolverProcess {
            child,
            lines: rx,
            invocation,
        })
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn next_line(&mut self, timeout: Duration) -> NextLine {
        match self.lines.recv_timeout(timeout) {
            Ok(line) => NextLine::Line(line),
            Err(RecvTimeoutError::Timeout) => NextLine::Idle,
            Err(RecvTimeoutError::Disconnected) => NextLine::Closed,
        }
    }

    /// Wait for exit and return the exit code (`None` if killed by a signal).
    pub fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.wait()?.code())
    }

    /// Exit status if the process has already exited.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// SIGTERM, wait up to `grace`, then kill.
    pub fn terminate(&mut self, grace: Duration) -> io::Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }
        send_sigterm(&self.child);

        let start = Instant::now();
        while start.elapsed() < grace {
            if let Some(status) = self.child.try_wait()? {
                debug!(pid = self.child.id(), "Solver exited after SIGTERM");
                return Ok(status);
            }
            thread::sleep(EXIT_POLL);
        }

        warn!(
            pid = self.child.id(),
            grace_secs = grace.as_secs(),
            "Solver ignored SIGTERM, killing"
        );
        self.child.kill()?;
        self.child.wait()
    }
}

impl Iterator for SolverProcess {
    type Item = String;

    /// Blocks until the next line; ends when both pipes close.
    fn next(&mut self) -> Option<String> {
        self.lines.recv().ok()
    }
}

impl Drop for SolverProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    // SAFETY: kill(2) with a pid we own and a valid signal number.
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        debug!(pid = child.id(), error = %io::Error::last_os_error(), "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) {}

fn spawn_reader<R: Read + Send + 'static>(reader: R, tx: Sender<String>) {
    thread::spawn(move || pump_lines(reader, &tx));
}

/// Split a byte stream into lines on `\n` or `\r`, dropping empty pieces.
/// Stops at EOF, on a read error, or when the receiver is gone.
fn pump_lines<R: Read>(mut reader: R, tx: &Sender<String>) {
    let mut buf = [0u8; 8192];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        for &b in &buf[..n] {
            if b == b'\n' || b == b'\r' {
                if !pending.is_empty() {
                    let line = String::from_utf8_lossy(&pending).into_owned();
                    pending.clear();
                    if tx.send(line).is_err() {
                        return;
                    }
                }
            } else {
                pending.push(b);
            }
        }
    }
    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
    }
}
