/// Execution Engine - Loader and Entry Point Ports
///
/// **Core Responsibility:**
/// Locate a compiled program's entry point and invoke it with an explicit
/// output channel.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to start a program (JVM process, in-memory fake, ...)
/// - Engine does NOT know about timeouts or worker threads
/// - Engine does NOT evaluate correctness
/// - Engine writes raw output for the Evaluator to judge
///
/// Output goes to the `out` channel handed to each invocation, never to the
/// process-wide stdout, so captures cannot bleed into each other.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

use gradekit_common::ExecutionFailure;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Cancellation Control
/// Shared flag for cooperative shutdown of one invocation
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("malformed artifact reference: {0}")]
    MalformedArtifact(String),

    #[error("entry point not found: {0}")]
    NotFound(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    #[error("invocation failed: {0}")]
    Failed(String),

    #[error("invocation interrupted")]
    Interrupted,
}

impl From<LoadError> for ExecutionFailure {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::MalformedArtifact(reason) => ExecutionFailure::MalformedArtifact(reason),
            LoadError::NotFound(name) => ExecutionFailure::EntryPointNotFound(name),
        }
    }
}

impl From<InvocationError> for ExecutionFailure {
    fn from(err: InvocationError) -> Self {
        match err {
            InvocationError::Failed(reason) => ExecutionFailure::Invocation(reason),
            InvocationError::Interrupted => ExecutionFailure::Interrupted,
        }
    }
}

/// A loaded program's start routine
///
/// Implementations should poll `cancel` and return
/// `InvocationError::Interrupted` once it is set. Nothing forces them to.
pub trait EntryPoint {
    fn invoke(
        &self,
        args: &[String],
        out: &mut dyn Write,
        cancel: &CancelToken,
    ) -> Result<(), InvocationError>;
}

/// Loader trait
/// Resolves `name` inside the compiled artifact directory `dir`
pub trait Loader: Send + Sync {
    fn load_entry_point(&self, dir: &Path, name: &str) -> Result<Box<dyn EntryPoint>, LoadError>;
}

/// Runs compiled classes on a JVM child process
pub struct JavaLoader {
    java: PathBuf,
}

impl JavaLoader {
    pub fn new(java: impl Into<PathBuf>) -> Self {
        JavaLoader { java: java.into() }
    }
}

impl Loader for JavaLoader {
    fn load_entry_point(&self, dir: &Path, name: &str) -> Result<Box<dyn EntryPoint>, LoadError> {
        if !dir.is_dir() {
            return Err(LoadError::MalformedArtifact(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        if name.is_empty() || name.contains(|c| c == '/' || c == '\\') {
            return Err(LoadError::MalformedArtifact(format!("invalid entry point name {:?}", name)));
        }
        if !dir.join(format!("{}.class", name)).is_file() {
            return Err(LoadError::NotFound(name.to_string()));
        }

        Ok(Box::new(JavaEntryPoint {
            java: self.java.clone(),
            classpath: dir.to_path_buf(),
            class: name.to_string(),
        }))
    }
}

struct JavaEntryPoint {
    java: PathBuf,
    classpath: PathBuf,
    class: String,
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).map(|_| buf)
    })
}

fn stop(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl EntryPoint for JavaEntryPoint {
    fn invoke(
        &self,
        args: &[String],
        out: &mut dyn Write,
        cancel: &CancelToken,
    ) -> Result<(), InvocationError> {
        let mut child = Command::new(&self.java)
            .arg("-cp")
            .arg(&self.classpath)
            .arg(&self.class)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| InvocationError::Failed(format!("failed to start {}: {}", self.java.display(), e)))?;

        let stdout = child
            .stdout
            .take()
            .map(drain)
            .ok_or_else(|| InvocationError::Failed("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .map(drain)
            .ok_or_else(|| InvocationError::Failed("stderr not captured".to_string()))?;

        let status = loop {
            if cancel.is_cancelled() {
                stop(&mut child);
                return Err(InvocationError::Interrupted);
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    stop(&mut child);
                    return Err(InvocationError::Failed(e.to_string()));
                }
            }
        };

        let captured = stdout
            .join()
            .map_err(|_| InvocationError::Failed("stdout reader panicked".to_string()))?
            .map_err(|e| InvocationError::Failed(e.to_string()))?;
        out.write_all(&captured)
            .map_err(|e| InvocationError::Failed(e.to_string()))?;

        if !status.success() {
            let errors = stderr.join().ok().and_then(Result::ok).unwrap_or_default();
            let first = String::from_utf8_lossy(&errors)
                .lines()
                .next()
                .unwrap_or_default()
                .to_string();
            return Err(InvocationError::Failed(format!("{}: {}", status, first)));
        }

        Ok(())
    }
}
