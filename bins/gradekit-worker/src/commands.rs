// Worker commands: grade a batch, validate a registration file
use crate::compiler::JavacCompiler;
use crate::composer::SourceComposer;
use crate::engine::JavaLoader;
use crate::executor::SandboxExecutor;
use crate::pipeline::Harness;
use anyhow::{bail, Context, Result};
use gradekit_common::{Config, ExpectationKind, Registration, RegistrationFile, Report};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Load the registration list
pub fn load_registrations(path: &Path) -> Result<Vec<Registration>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: RegistrationFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(file.registrations)
}

/// Grade every registration and write the JSON report
pub async fn run(config: &Config, args: Vec<String>, output: Option<&Path>) -> Result<Report> {
    let registrations = load_registrations(&config.registrations_path)?;
    info!(
        registrations = registrations.len(),
        submissions = %config.submissions_dir.display(),
        timeout_ms = config.execution_timeout_ms,
        "starting grading run"
    );

    let executor = SandboxExecutor::with_limits(
        Arc::new(JavaLoader::new(&config.java_bin)),
        config.execution_timeout(),
        config.cancel_grace(),
    )
    .context("Failed to start execution worker")?;

    let harness = Harness::new(
        &config.submissions_dir,
        &config.expectations_dir,
        SourceComposer::new(&config.environment_dir),
        Box::new(JavacCompiler::new(&config.javac_bin)),
        executor,
    )
    .with_args(args);

    debug!(timeout_ms = harness.executor().timeout().as_millis() as u64, "execution worker ready");

    let report = harness.run(&registrations).await?;
    if report.is_empty() {
        warn!("no submission was graded");
    }
    let json = serde_json::to_string_pretty(&report)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, &json).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✓ Report written to {}", path.display());
        }
        None => println!("{}", json),
    }

    info!(
        participants = report.participants().count(),
        entries = report.len(),
        passed = report.passed(),
        leaked_workers = harness.executor().leaked_workers(),
        "grading run complete"
    );
    Ok(report)
}

/// Problems found in one registration, empty when it is usable
fn registration_problems(config: &Config, registration: &Registration) -> Vec<String> {
    let mut problems = Vec::new();

    for module in registration.modules() {
        if !config.environment_dir.join(module).is_file() {
            problems.push(format!("scaffold module {} not found", module));
        }
    }

    let expectation_path = config.expectations_dir.join(&registration.expectation.file);
    match fs::read_to_string(&expectation_path) {
        Ok(text) if registration.expectation.kind.uses_pattern() => {
            let pattern = text.replace('\n', "").replace('\r', "");
            if let Err(e) = Regex::new(&pattern) {
                problems.push(format!("expectation pattern does not compile: {}", e));
            }
        }
        Ok(_) => {}
        Err(_) => problems.push(format!("expectation file {} not found", expectation_path.display())),
    }

    problems
}

/// Validate the registration file against the configured directories
pub fn check(config: &Config) -> Result<()> {
    let registrations = load_registrations(&config.registrations_path)?;
    let mut invalid = 0;

    println!("Checking {} registrations", registrations.len());
    println!();

    for registration in &registrations {
        let problems = registration_problems(config, registration);
        if problems.is_empty() {
            println!(
                "  ✓ {} ({}, {} run(s))",
                registration.step,
                registration.expectation.kind,
                registration.expectation.required_runs()
            );
        } else {
            invalid += 1;
            println!("  ✗ {}", registration.step);
            for problem in problems {
                println!("      {}", problem);
            }
        }
    }

    println!();
    for kind in ExpectationKind::all_variants() {
        let count = registrations
            .iter()
            .filter(|registration| registration.expectation.kind == *kind)
            .count();
        if count > 0 {
            println!("  {}: {} registration(s)", kind, count);
        }
    }

    if invalid > 0 {
        bail!("{} invalid registration(s)", invalid);
    }
    Ok(())
}
