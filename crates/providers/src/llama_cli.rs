//! `llama-cli` process runner.
//!
//! Each turn gets a fresh worker thread that writes the prompt to a temporary
//! file, launches the executable against it and streams the answer back over
//! a bounded channel. The control thread never blocks on the process.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use shared::events::RunnerEvent;
use shared::settings::{InferenceSettings, StreamSettings};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

use crate::stream::{pump, ResponseScanner};

/// How often the worker checks whether the process has exited
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Lifecycle of a runner as seen from the control thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
    Completed,
    Terminated,
}

/// Something that can run one inference turn in the background.
pub trait InferenceRunner: Send + Sync {
    /// Start a turn. Events for this turn, and only this turn, go to `events`.
    fn start(&self, prompt: String, events: SyncSender<RunnerEvent>) -> Result<RunnerHandle>;
}

/// Owned handle to one running turn
pub struct RunnerHandle {
    id: Uuid,
    cancelled: Arc<AtomicBool>,
    child: Arc<Mutex<Option<Child>>>,
    worker: Option<JoinHandle<()>>,
}

impl RunnerHandle {
    /// Wrap a worker thread. `child` is filled in by the worker once the process exists.
    pub fn new(
        cancelled: Arc<AtomicBool>,
        child: Arc<Mutex<Option<Child>>>,
        worker: JoinHandle<()>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            cancelled,
            child,
            worker: Some(worker),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> RunnerState {
        if self.cancelled.load(Ordering::SeqCst) {
            return RunnerState::Terminated;
        }
        match &self.worker {
            Some(worker) if !worker.is_finished() => RunnerState::Running,
            _ => RunnerState::Completed,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunnerState::Running
    }

    /// Best-effort stop: flags the worker and kills the process if it is up.
    /// Does not wait for the worker to drain.
    pub fn terminate(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(child) = self.child.lock().as_mut() {
            if let Err(e) = child.kill() {
                tracing::debug!("kill on finished process: {}", e);
            }
        }
        tracing::info!("terminated runner {}", self.id);
    }

    /// Block until the worker thread has exited.
    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("runner {} worker panicked", self.id);
            }
        }
    }
}

/// Runs the llama.cpp CLI with a file-injected prompt and a reverse-prompt stop string.
#[derive(Debug, Clone)]
pub struct LlamaCliRunner {
    inference: InferenceSettings,
    stream: StreamSettings,
}

impl LlamaCliRunner {
    pub fn new(inference: InferenceSettings, stream: StreamSettings) -> Self {
        Self { inference, stream }
    }

    /// Arguments passed to the executable for a prompt stored at `prompt_file`
    pub fn command_args(&self, prompt_file: &Path) -> Vec<String> {
        vec![
            "-m".into(),
            self.inference.model_path.clone(),
            "-t".into(),
            self.inference.threads.to_string(),
            "-ngl".into(),
            self.inference.gpu_layers.to_string(),
            "--n-predict".into(),
            self.inference.n_predict.to_string(),
            "--file".into(),
            prompt_file.display().to_string(),
            "--reverse-prompt".into(),
            self.inference.reverse_prompt.clone(),
        ]
    }

    fn command(&self, prompt_file: &Path) -> Command {
        let mut cmd = Command::new(&self.inference.executable);
        cmd.args(self.command_args(prompt_file))
            // Closed stdin lets llama-cli exit at the reverse prompt instead of waiting for input
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl InferenceRunner for LlamaCliRunner {
    fn start(&self, prompt: String, events: SyncSender<RunnerEvent>) -> Result<RunnerHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let child = Arc::new(Mutex::new(None));
        let runner = self.clone();

        let worker = std::thread::Builder::new()
            .name("llama-runner".into())
            .spawn({
                let cancelled = cancelled.clone();
                let child = child.clone();
                move || runner.run_turn(prompt, events, cancelled, child)
            })
            .context("failed to spawn runner thread")?;

        Ok(RunnerHandle::new(cancelled, child, worker))
    }
}

impl LlamaCliRunner {
    fn run_turn(
        &self,
        prompt: String,
        events: SyncSender<RunnerEvent>,
        cancelled: Arc<AtomicBool>,
        slot: Arc<Mutex<Option<Child>>>,
    ) {
        tracing::info!("launching {}", self.inference.executable);
        let executable = self.inference.executable.clone();

        // Removed from disk when this guard drops, unless the turn is cancelled
        let prompt_file = match write_prompt_file(&prompt) {
            Ok(file) => file,
            Err(e) => {
                let _ = events.send(RunnerEvent::LaunchFailed {
                    executable,
                    message: format!("{:#}", e),
                });
                let _ = events.send(RunnerEvent::Exited {
                    code: None,
                    saw_end_marker: false,
                });
                return;
            }
        };

        let mut cmd = self.command(prompt_file.path());
        tracing::debug!("launch: {:?}", cmd);

        let mut process = match cmd.spawn() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("failed to launch {}: {}", executable, e);
                let _ = events.send(RunnerEvent::LaunchFailed {
                    executable,
                    message: e.to_string(),
                });
                let _ = events.send(RunnerEvent::Exited {
                    code: None,
                    saw_end_marker: false,
                });
                return;
            }
        };

        let stdout = process.stdout.take();
        let stderr = process.stderr.take();
        *slot.lock() = Some(process);

        // terminate() may have run before the child was stored
        if cancelled.load(Ordering::SeqCst) {
            if let Some(p) = slot.lock().as_mut() {
                let _ = p.kill();
            }
        }

        if let Some(stderr) = stderr {
            drain_stderr(stderr);
        }

        let mut scanner = ResponseScanner::for_prompt(&self.stream, &prompt);
        let summary = match stdout {
            Some(out) => pump(BufReader::new(out), &mut scanner, |fragment| {
                !cancelled.load(Ordering::SeqCst)
                    && events.send(RunnerEvent::Fragment(fragment)).is_ok()
            }),
            None => Default::default(),
        };
        tracing::debug!(
            "read {} lines, {} fragments, {} banners",
            summary.lines_read,
            summary.fragments,
            summary.banners
        );

        let code = wait_for_exit(&slot, &executable);

        if cancelled.load(Ordering::SeqCst) {
            tracing::info!("runner cancelled after {} fragments", summary.fragments);
            match prompt_file.keep() {
                Ok((_, path)) => tracing::debug!("prompt file left at {}", path.display()),
                Err(e) => tracing::warn!("could not keep prompt file: {}", e),
            }
            return;
        }

        let _ = events.send(RunnerEvent::Separator);
        let _ = events.send(RunnerEvent::Exited {
            code,
            saw_end_marker: summary.saw_end_marker,
        });
    }
}

/// Wait for the process in `slot` while leaving it there, so `terminate` can
/// still kill it.
fn wait_for_exit(slot: &Mutex<Option<Child>>, executable: &str) -> Option<i32> {
    loop {
        {
            let mut guard = slot.lock();
            let process = guard.as_mut()?;
            match process.try_wait() {
                Ok(Some(status)) => {
                    guard.take();
                    return status.code();
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("waiting on {} failed: {}", executable, e);
                    guard.take();
                    return None;
                }
            }
        }
        std::thread::sleep(EXIT_POLL);
    }
}

fn write_prompt_file(prompt: &str) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("llama_prompt_")
        .suffix(".txt")
        .tempfile()
        .context("failed to create prompt file")?;
    file.write_all(prompt.as_bytes())
        .context("failed to write prompt file")?;
    file.flush()?;
    Ok(file)
}

/// llama.cpp writes its load log to stderr; keep it out of the transcript.
fn drain_stderr(stderr: std::process::ChildStderr) {
    let spawned = std::thread::Builder::new()
        .name("llama-stderr".into())
        .spawn(move || {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            while matches!(reader.read_until(b'\n', &mut buf), Ok(n) if n > 0) {
                tracing::debug!("llama-cli: {}", String::from_utf8_lossy(&buf).trim_end());
                buf.clear();
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("could not spawn stderr reader: {}", e);
    }
}
