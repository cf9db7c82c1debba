/// Sandbox Executor - Serialized, Timeout-Bounded Invocation
///
/// **Core Responsibility:**
/// Run a compiled entry point on a single long-lived worker thread and
/// return its captured output, or a classified failure.
///
/// ## Execution Semantics:
/// - Requests are processed **one at a time**, in arrival order
/// - Each request gets a fresh capture buffer, dropped on every exit path
/// - The caller waits at most `timeout`; on expiry the request is
///   cancelled and reported as `Timeout`
/// - A worker that ignores cancellation for longer than `cancel_grace` is
///   counted as leaked and replaced, so later requests still run
///
/// Leaked workers keep running until their program returns; they are not
/// killed. `leaked_workers()` exposes how many there have been.

use crate::engine::{CancelToken, Loader};
use gradekit_common::{ExecutionFailure, ExecutionOutcome};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time;
use tracing::{debug, error, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(500);

struct ExecutionRequest {
    dir: PathBuf,
    name: String,
    args: Vec<String>,
    cancel: CancelToken,
    reply: oneshot::Sender<ExecutionOutcome>,
}

struct Worker {
    id: usize,
    sender: mpsc::UnboundedSender<ExecutionRequest>,
}

pub struct SandboxExecutor {
    loader: Arc<dyn Loader>,
    timeout: Duration,
    cancel_grace: Duration,
    worker: Mutex<Worker>,
    spawned: AtomicUsize,
    leaked: AtomicUsize,
}

impl SandboxExecutor {
    pub fn new(loader: Arc<dyn Loader>) -> io::Result<Self> {
        Self::with_limits(loader, DEFAULT_TIMEOUT, DEFAULT_CANCEL_GRACE)
    }

    pub fn with_limits(
        loader: Arc<dyn Loader>,
        timeout: Duration,
        cancel_grace: Duration,
    ) -> io::Result<Self> {
        let worker = spawn_worker(0, Arc::clone(&loader))?;

        Ok(SandboxExecutor {
            loader,
            timeout,
            cancel_grace,
            worker: Mutex::new(worker),
            spawned: AtomicUsize::new(1),
            leaked: AtomicUsize::new(0),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Workers abandoned because they did not stop after cancellation
    pub fn leaked_workers(&self) -> usize {
        self.leaked.load(Ordering::SeqCst)
    }

    /// Execute `name` from the artifact directory `dir` with `args`
    pub async fn execute(&self, dir: &Path, name: &str, args: &[String]) -> ExecutionOutcome {
        // Held for the whole request: one capture in flight at a time
        let mut worker = self.worker.lock().await;

        let cancel = CancelToken::new();
        let (reply, mut outcome) = oneshot::channel();
        let request = ExecutionRequest {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            args: args.to_vec(),
            cancel: cancel.clone(),
            reply,
        };

        if worker.sender.send(request).is_err() {
            error!(worker = worker.id, "execution worker is gone");
            self.replace_worker(&mut worker);
            return Err(ExecutionFailure::Interrupted);
        }

        match time::timeout(self.timeout, &mut outcome).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ExecutionFailure::Interrupted),
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                warn!(worker = worker.id, entry_point = name, timeout_ms, "execution timed out, cancelling");
                cancel.cancel();

                if time::timeout(self.cancel_grace, &mut outcome).await.is_err() {
                    let leaked = self.leaked.fetch_add(1, Ordering::SeqCst) + 1;
                    warn!(worker = worker.id, leaked, "worker ignored cancellation, replacing it");
                    self.replace_worker(&mut worker);
                }

                Err(ExecutionFailure::Timeout(timeout_ms))
            }
        }
    }

    fn replace_worker(&self, worker: &mut Worker) {
        let id = self.spawned.fetch_add(1, Ordering::SeqCst);
        match spawn_worker(id, Arc::clone(&self.loader)) {
            Ok(fresh) => *worker = fresh,
            Err(e) => error!(error = %e, "failed to spawn replacement worker"),
        }
    }
}

fn spawn_worker(id: usize, loader: Arc<dyn Loader>) -> io::Result<Worker> {
    let (sender, mut receiver) = mpsc::unbounded_channel::<ExecutionRequest>();

    thread::Builder::new()
        .name(format!("gradekit-exec-{}", id))
        .spawn(move || {
            debug!(worker = id, "execution worker started");
            while let Some(request) = receiver.blocking_recv() {
                let outcome = run_request(loader.as_ref(), &request);
                // The caller may have stopped waiting already
                let _ = request.reply.send(outcome);
            }
            debug!(worker = id, "execution worker stopped");
        })?;

    Ok(Worker { id, sender })
}

fn run_request(loader: &dyn Loader, request: &ExecutionRequest) -> ExecutionOutcome {
    let invoked = panic::catch_unwind(AssertUnwindSafe(|| -> ExecutionOutcome {
        let entry = loader.load_entry_point(&request.dir, &request.name)?;
        let mut capture = Vec::new();
        entry.invoke(&request.args, &mut capture, &request.cancel)?;
        Ok(normalize_output(&capture))
    }));

    invoked.unwrap_or_else(|payload| Err(ExecutionFailure::Invocation(panic_message(payload.as_ref()))))
}

/// Captured text with line breaks removed
fn normalize_output(captured: &[u8]) -> String {
    String::from_utf8_lossy(captured)
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}
