use crate::naming;
use std::io;
use thiserror::Error;

/// Why a single execution produced no captured output
///
/// Variants are mutually exclusive; each maps to one short report code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFailure {
    #[error("malformed artifact reference: {0}")]
    MalformedArtifact(String),

    #[error("entry point not found: {0}")]
    EntryPointNotFound(String),

    #[error("invocation failed: {0}")]
    Invocation(String),

    #[error("execution interrupted")]
    Interrupted,

    #[error("execution exceeded {0}ms")]
    Timeout(u64),
}

impl ExecutionFailure {
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionFailure::MalformedArtifact(_) => "E.ART",
            ExecutionFailure::EntryPointNotFound(_) => "E.CNF",
            ExecutionFailure::Invocation(_) => "E.INV",
            ExecutionFailure::Interrupted => "E.INT",
            ExecutionFailure::Timeout(_) => "E.TMO",
        }
    }
}

/// Outcome of one execution: captured output or a classified failure
pub type ExecutionOutcome = Result<String, ExecutionFailure>;

/// Errors that end the pipeline of one submission
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("failed to compose source: {0}")]
    ComposeIo(#[source] io::Error),

    #[error("failed to run compiler: {0}")]
    Toolchain(String),

    #[error("compilation failed at line {line}")]
    Compile { line: u64 },

    #[error(transparent)]
    Execution(#[from] ExecutionFailure),

    #[error("invalid expectation pattern: {0}")]
    InvalidPattern(String),

    #[error("expected {expected} captured outputs, got {actual}")]
    RunCount { expected: usize, actual: usize },
}

impl HarnessError {
    /// Short code recorded in the report
    pub fn code(&self) -> String {
        match self {
            HarnessError::ComposeIo(_) | HarnessError::Toolchain(_) => "E.IO".to_string(),
            HarnessError::Compile { line } => naming::compile_failure_code(*line),
            HarnessError::Execution(failure) => failure.code().to_string(),
            HarnessError::InvalidPattern(_) => "E.PAT".to_string(),
            HarnessError::RunCount { .. } => "E.RUN".to_string(),
        }
    }
}
