/// Compiler Port - Turns a Composed Source Into a Loadable Artifact
///
/// The pipeline only needs a success flag and, on failure, the line of
/// the first diagnostic. Toolchain specifics stay behind this trait.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// One compiler message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: u64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutcome {
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileOutcome {
    pub fn succeeded() -> Self {
        CompileOutcome {
            success: true,
            diagnostics: Vec::new(),
        }
    }

    pub fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        CompileOutcome {
            success: false,
            diagnostics,
        }
    }

    /// Line of the first diagnostic, 0 when the toolchain reported none
    pub fn failure_line(&self) -> u64 {
        self.diagnostics.first().map_or(0, |d| d.line)
    }
}

/// Compiler trait
///
/// `Err` means the toolchain itself could not run; a source that does not
/// compile is an `Ok` outcome with `success == false`.
pub trait Compiler: Send + Sync {
    fn compile(&self, source: &Path, output_dir: &Path) -> Result<CompileOutcome>;
}

/// `javac` driven as an external process
pub struct JavacCompiler {
    javac: PathBuf,
    diagnostic_line: Regex,
}

impl JavacCompiler {
    pub fn new(javac: impl Into<PathBuf>) -> Self {
        JavacCompiler {
            javac: javac.into(),
            diagnostic_line: Regex::new(r"^.+?:(\d+): (?:error|warning): (.*)$")
                .expect("diagnostic pattern is a valid regex"),
        }
    }

    /// Parse `<file>:<line>: error: <message>` lines in emission order
    fn parse_diagnostics(&self, stderr: &str) -> Vec<Diagnostic> {
        stderr
            .lines()
            .filter_map(|line| self.diagnostic_line.captures(line))
            .filter_map(|caps| {
                let line = caps.get(1)?.as_str().parse().ok()?;
                let message = caps.get(2)?.as_str().to_string();
                Some(Diagnostic { line, message })
            })
            .collect()
    }
}

impl Compiler for JavacCompiler {
    fn compile(&self, source: &Path, output_dir: &Path) -> Result<CompileOutcome> {
        let output = Command::new(&self.javac)
            .arg("-d")
            .arg(output_dir)
            .arg(source)
            .output()
            .with_context(|| format!("Failed to run {}", self.javac.display()))?;

        if output.status.success() {
            return Ok(CompileOutcome::succeeded());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostics = self.parse_diagnostics(&stderr);
        debug!(
            source = %source.display(),
            count = diagnostics.len(),
            "compilation failed"
        );

        Ok(CompileOutcome::failed(diagnostics))
    }
}
