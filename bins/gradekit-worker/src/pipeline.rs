/// Grading Pipeline - Prepare → Compile → Execute → Verify
///
/// This module:
/// 1. Resolves each registration's submissions folder
/// 2. Composes, compiles and runs every parseable submission
/// 3. Evaluates the captured outputs against the expectation
/// 4. Records exactly one report entry per attempted submission
///
/// A failing submission never stops the batch; its failure code is recorded
/// instead. Configuration problems (missing folder, unreadable expectation)
/// abort the run before anything is graded.

use crate::compiler::Compiler;
use crate::composer::SourceComposer;
use crate::evaluator;
use crate::executor::SandboxExecutor;
use anyhow::{bail, Context, Result};
use gradekit_common::naming;
use gradekit_common::{HarnessError, Registration, Report, ReportEntry, Submission};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A registration bound to its on-disk inputs
struct ResolvedRegistration<'a> {
    registration: &'a Registration,
    folder: PathBuf,
    expected: String,
}

pub struct Harness {
    submissions_dir: PathBuf,
    expectations_dir: PathBuf,
    composer: SourceComposer,
    compiler: Box<dyn Compiler>,
    executor: SandboxExecutor,
    submission_pattern: Regex,
    args: Vec<String>,
}

impl Harness {
    pub fn new(
        submissions_dir: impl Into<PathBuf>,
        expectations_dir: impl Into<PathBuf>,
        composer: SourceComposer,
        compiler: Box<dyn Compiler>,
        executor: SandboxExecutor,
    ) -> Self {
        Harness {
            submissions_dir: submissions_dir.into(),
            expectations_dir: expectations_dir.into(),
            composer,
            compiler,
            executor,
            submission_pattern: naming::submission_pattern(naming::SOURCE_EXTENSION),
            args: Vec::new(),
        }
    }

    /// Arguments handed to every entry point invocation
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn executor(&self) -> &SandboxExecutor {
        &self.executor
    }

    /// Grade every registration and return the report
    pub async fn run(&self, registrations: &[Registration]) -> Result<Report> {
        let resolved = registrations
            .iter()
            .map(|registration| self.resolve(registration))
            .collect::<Result<Vec<_>>>()?;

        let mut report = Report::new();
        for entry in &resolved {
            self.grade_registration(entry, &mut report).await?;
        }

        if self.executor.leaked_workers() > 0 {
            warn!(
                leaked = self.executor.leaked_workers(),
                "execution workers were abandoned after ignoring cancellation"
            );
        }

        Ok(report)
    }

    fn resolve<'a>(&self, registration: &'a Registration) -> Result<ResolvedRegistration<'a>> {
        let folder = find_step_folder(&self.submissions_dir, &registration.step)?;

        let expectation_path = self.expectations_dir.join(&registration.expectation.file);
        let expected = fs::read_to_string(&expectation_path)
            .with_context(|| format!("Failed to read expectation {}", expectation_path.display()))?
            .replace('\n', "")
            .replace('\r', "");

        debug!(step = %registration.step, folder = %folder.display(), "registration resolved");
        Ok(ResolvedRegistration {
            registration,
            folder,
            expected,
        })
    }

    async fn grade_registration(&self, resolved: &ResolvedRegistration<'_>, report: &mut Report) -> Result<()> {
        let step = &resolved.registration.step;
        let files = sorted_entries(&resolved.folder)?;

        info!(step = %step, submissions = files.len(), "grading registration");

        for path in files.iter().filter(|path| path.is_file()) {
            let Some(submission) = naming::submission_from_path(&self.submission_pattern, path) else {
                debug!(file = %path.display(), "skipping unparseable submission name");
                continue;
            };

            let entry = self.grade_submission(resolved, &submission).await;
            info!(step = %step, participant = %submission.participant, result = %entry, "submission graded");

            if !report.record(&submission.participant, step, entry) {
                warn!(
                    step = %step,
                    participant = %submission.participant,
                    "participant already graded for this step, keeping first result"
                );
            }
        }

        Ok(())
    }

    async fn grade_submission(&self, resolved: &ResolvedRegistration<'_>, submission: &Submission) -> ReportEntry {
        match self.verdict(resolved, submission).await {
            Ok(verdict) => ReportEntry::Verdict(verdict),
            Err(err) => {
                warn!(participant = %submission.participant, error = %err, "submission failed");
                ReportEntry::failure(err.code())
            }
        }
    }

    async fn verdict(&self, resolved: &ResolvedRegistration<'_>, submission: &Submission) -> Result<bool, HarnessError> {
        let registration = resolved.registration;
        let workspace = naming::workspace_dir(&self.submissions_dir, &registration.step, &submission.participant);

        let source = self
            .composer
            .write_artifact(registration, submission, &workspace)
            .map_err(HarnessError::ComposeIo)?;

        let compiled = self
            .compiler
            .compile(&source, &workspace)
            .map_err(|e| HarnessError::Toolchain(format!("{:#}", e)))?;
        if !compiled.success {
            return Err(HarnessError::Compile {
                line: compiled.failure_line(),
            });
        }

        let entry_point = naming::base_name(&registration.executor);
        let runs = registration.expectation.required_runs();
        let mut captured = Vec::with_capacity(runs);

        for run in 0..runs {
            let output = self.executor.execute(&workspace, entry_point, &self.args).await?;
            debug!(participant = %submission.participant, run, bytes = output.len(), "run captured");
            captured.push(output);
        }

        evaluator::is_result_expected(registration.expectation.kind, &resolved.expected, &captured)
    }
}

/// Entries of `dir` sorted by name
fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Failed to list {}", dir.display()))?;
    entries.sort();
    Ok(entries)
}

/// First directory of `root`, by name, whose name ends with `step`
///
/// `root/step` is also the working area of the step, so it is only picked
/// when no other folder matches.
fn find_step_folder(root: &Path, step: &str) -> Result<PathBuf> {
    let working_area = root.join(step);
    let mut fallback = None;

    for path in sorted_entries(root)? {
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.ends_with(step));

        if !matches || !path.is_dir() {
            continue;
        }
        if path == working_area {
            fallback = Some(path);
        } else {
            return Ok(path);
        }
    }

    match fallback {
        Some(path) => Ok(path),
        None => bail!("No submissions folder ending with '{}' in {}", step, root.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompileOutcome, Diagnostic};
    use crate::engine::fakes::hang_until_cancelled;
    use crate::engine::{CancelToken, EntryPoint, InvocationError, LoadError, Loader};
    use gradekit_common::{Expectation, ExpectationKind};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Fails on any composed source containing `SYNTAX_ERROR`, reporting
    /// the line it sits on
    struct FakeCompiler;

    impl Compiler for FakeCompiler {
        fn compile(&self, source: &Path, _output_dir: &Path) -> anyhow::Result<CompileOutcome> {
            let text = fs::read_to_string(source)?;
            match text.lines().position(|line| line.contains("SYNTAX_ERROR")) {
                Some(index) => Ok(CompileOutcome::failed(vec![Diagnostic {
                    line: index as u64 + 1,
                    message: "not a statement".to_string(),
                }])),
                None => Ok(CompileOutcome::succeeded()),
            }
        }
    }

    /// Loader whose `Main` program reads the composed source in the
    /// artifact directory: `OUT<text>` prints text, `HANG` never returns
    struct WorkspaceLoader {
        calls: Arc<AtomicUsize>,
    }

    struct WorkspaceEntry {
        dir: PathBuf,
        calls: Arc<AtomicUsize>,
    }

    impl EntryPoint for WorkspaceEntry {
        fn invoke(&self, _args: &[String], out: &mut dyn Write, cancel: &CancelToken) -> Result<(), InvocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let source = fs::read_to_string(self.dir.join("Main.java"))
                .map_err(|e| InvocationError::Failed(e.to_string()))?;

            if source.contains("HANG") {
                return hang_until_cancelled(&[], out, cancel);
            }
            if let Some(start) = source.find("OUT<") {
                let text = &source[start + 4..];
                let end = text.find('>').unwrap_or(text.len());
                writeln!(out, "{}", &text[..end]).map_err(|e| InvocationError::Failed(e.to_string()))?;
            }
            Ok(())
        }
    }

    impl Loader for WorkspaceLoader {
        fn load_entry_point(&self, dir: &Path, name: &str) -> Result<Box<dyn EntryPoint>, LoadError> {
            if name != "Main" {
                return Err(LoadError::NotFound(name.to_string()));
            }
            Ok(Box::new(WorkspaceEntry {
                dir: dir.to_path_buf(),
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    struct Fixture {
        dir: TempDir,
        calls: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            for sub in ["submissions/2024-tp1", "expectations", "environment"] {
                fs::create_dir_all(dir.path().join(sub)).unwrap();
            }
            fs::write(
                dir.path().join("environment/Main.java"),
                "package tp;\npublic class Main {\n  public static void main(String[] a) { Answer.print(); }\n}\n",
            )
            .unwrap();
            fs::write(dir.path().join("environment/Answer.java"), "public class Answer {}\n").unwrap();
            fs::write(dir.path().join("expectations/Answer"), "42\n").unwrap();

            Fixture {
                dir,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn root(&self) -> &Path {
            self.dir.path()
        }

        fn submit(&self, file_name: &str, body: &str) {
            fs::write(self.root().join("submissions/2024-tp1").join(file_name), body).unwrap();
        }

        fn harness(&self, timeout_ms: u64) -> Harness {
            let loader = WorkspaceLoader {
                calls: Arc::clone(&self.calls),
            };
            let executor = SandboxExecutor::with_limits(
                Arc::new(loader),
                Duration::from_millis(timeout_ms),
                Duration::from_millis(200),
            )
            .unwrap();

            Harness::new(
                self.root().join("submissions"),
                self.root().join("expectations"),
                SourceComposer::new(self.root().join("environment")),
                Box::new(FakeCompiler),
                executor,
            )
        }
    }

    fn registration(kind: ExpectationKind) -> Registration {
        Registration {
            step: "tp1".to_string(),
            executor: "Main.java".to_string(),
            expectation: Expectation {
                kind,
                file: "Answer".to_string(),
            },
            environment: vec!["Answer.java".to_string()],
            strip_diagnostics: false,
        }
    }

    #[tokio::test]
    async fn test_report_has_one_entry_per_attempted_submission() {
        let fixture = Fixture::new();
        fixture.submit("fr.dupont.1.a.b.Answer.java", "public class Answer { /* OUT<42> */ }");
        fixture.submit("fr.martin.1.a.b.Answer.java", "public class Answer { /* OUT<43> */ }");
        fixture.submit("fr.durand.1.a.b.Answer.java", "public class Answer {\n SYNTAX_ERROR\n}");
        fixture.submit("fr.petit.1.a.b.Answer.java", "public class Answer { /* HANG */ }");
        fixture.submit("fr.roux.1.a.b.Answer.java", "public class Answer { /* OUT<42> */ }");
        fixture.submit("README.md", "not a submission");

        let harness = fixture.harness(200);
        let report = harness.run(&[registration(ExpectationKind::StrictEquals)]).await.unwrap();

        assert_eq!(report.len(), 5);
        assert_eq!(report.get("dupont", "tp1"), Some(&ReportEntry::Verdict(true)));
        assert_eq!(report.get("martin", "tp1"), Some(&ReportEntry::Verdict(false)));
        assert_eq!(report.get("durand", "tp1"), Some(&ReportEntry::failure("L.2")));
        assert_eq!(report.get("petit", "tp1"), Some(&ReportEntry::failure("E.TMO")));
        // Graded after the timeout on the same worker
        assert_eq!(report.get("roux", "tp1"), Some(&ReportEntry::Verdict(true)));
        assert_eq!(harness.executor().leaked_workers(), 0);
    }

    #[tokio::test]
    async fn test_artifact_written_to_participant_workspace() {
        let fixture = Fixture::new();
        fixture.submit("fr.dupont.1.a.b.Answer2.java", "package me;\npublic class Answer2 { /* OUT<42> */ }");

        let harness = fixture.harness(1000);
        harness.run(&[registration(ExpectationKind::StrictEquals)]).await.unwrap();

        let artifact = fixture.root().join("submissions/tp1/dupont/Main.java");
        let composed = fs::read_to_string(artifact).unwrap();
        assert!(composed.contains("class Answer { /* OUT<42> */ }"));
        assert!(!composed.contains("public class Answer"));
        assert!(composed.contains("public class Main"));
    }

    #[tokio::test]
    async fn test_runs_required_number_of_times() {
        let fixture = Fixture::new();
        fs::write(fixture.root().join("expectations/Answer"), "(4)(2)").unwrap();
        fixture.submit("fr.dupont.1.a.b.Answer.java", "public class Answer { /* OUT<42> */ }");

        let harness = fixture.harness(1000);
        let report = harness
            .run(&[registration(ExpectationKind::AtLeastOneOccurrence)])
            .await
            .unwrap();

        assert_eq!(report.get("dupont", "tp1"), Some(&ReportEntry::Verdict(true)));
        assert_eq!(fixture.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_first_failing_run_voids_verdict() {
        let fixture = Fixture::new();
        fixture.submit("fr.dupont.1.a.b.Answer.java", "public class Answer { /* HANG */ }");

        let harness = fixture.harness(100);
        let report = harness
            .run(&[registration(ExpectationKind::AtLeastOneOccurrence)])
            .await
            .unwrap();

        assert_eq!(report.get("dupont", "tp1"), Some(&ReportEntry::failure("E.TMO")));
        // Remaining runs are not attempted once one fails
        assert_eq!(fixture.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_pattern_recorded() {
        let fixture = Fixture::new();
        fs::write(fixture.root().join("expectations/Answer"), "(4").unwrap();
        fixture.submit("fr.dupont.1.a.b.Answer.java", "public class Answer { /* OUT<42> */ }");

        let report = fixture
            .harness(1000)
            .run(&[registration(ExpectationKind::RegexMatch)])
            .await
            .unwrap();
        assert_eq!(report.get("dupont", "tp1"), Some(&ReportEntry::failure("E.PAT")));
    }

    #[tokio::test]
    async fn test_missing_step_folder_aborts_before_grading() {
        let fixture = Fixture::new();
        fixture.submit("fr.dupont.1.a.b.Answer.java", "public class Answer { /* OUT<42> */ }");

        let mut missing = registration(ExpectationKind::StrictEquals);
        missing.step = "tp9".to_string();

        let harness = fixture.harness(1000);
        let result = harness
            .run(&[registration(ExpectationKind::StrictEquals), missing])
            .await;

        assert!(result.is_err());
        assert_eq!(fixture.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_expectation_file_is_error() {
        let fixture = Fixture::new();
        fs::remove_file(fixture.root().join("expectations/Answer")).unwrap();

        let result = fixture.harness(1000).run(&[registration(ExpectationKind::StrictEquals)]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_rerun_ignores_working_area() {
        let fixture = Fixture::new();
        fs::rename(
            fixture.root().join("submissions/2024-tp1"),
            fixture.root().join("submissions/x-tp1"),
        )
        .unwrap();
        fs::write(
            fixture.root().join("submissions/x-tp1/fr.dupont.1.a.b.Answer.java"),
            "public class Answer { /* OUT<42> */ }",
        )
        .unwrap();

        let harness = fixture.harness(1000);
        let registrations = [registration(ExpectationKind::StrictEquals)];

        let first = harness.run(&registrations).await.unwrap();
        assert!(fixture.root().join("submissions/tp1/dupont").is_dir());

        // `tp1` now exists and sorts before `x-tp1`
        let second = harness.run(&registrations).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.get("dupont", "tp1"), Some(&ReportEntry::Verdict(true)));
    }

    #[test]
    fn test_find_step_folder_falls_back_to_bare_step_name() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("tp1")).unwrap();
        assert_eq!(find_step_folder(dir.path(), "tp1").unwrap(), dir.path().join("tp1"));

        fs::create_dir_all(dir.path().join("x-tp1")).unwrap();
        assert_eq!(find_step_folder(dir.path(), "tp1").unwrap(), dir.path().join("x-tp1"));
    }

    #[test]
    fn test_find_step_folder_prefers_first_by_name() {
        let dir = TempDir::new().unwrap();
        for sub in ["b-tp1", "a-tp1", "tp10"] {
            fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        fs::write(dir.path().join("0-tp1"), "a file, not a folder").unwrap();

        let folder = find_step_folder(dir.path(), "tp1").unwrap();
        assert_eq!(folder, dir.path().join("a-tp1"));
    }

    #[test]
    fn test_sorted_entries_is_deterministic() {
        let dir = TempDir::new().unwrap();
        for name in ["c", "a", "b"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let names: Vec<_> = sorted_entries(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
