/// Source Composer - Merges Scaffold and Submission Into One Unit
///
/// **Core Responsibility:**
/// Produce a single compilable source text from the registration's
/// scaffold modules, with the participant's file substituted in.
///
/// **Rewriting Rules (applied per module, in order):**
/// 1. Strip diagnostic print statements (non-executor modules, opt-in)
/// 2. Remove namespace declarations
/// 3. Remove imports, hoisting standard-library ones to the top
/// 4. Rename the submission symbol to the expectation's stable name
/// 5. Demote public type declarations (non-executor modules)
///
/// **Known Fragility:**
/// Renaming is a plain substring replacement and also rewrites longer
/// identifiers containing the symbol name.

use gradekit_common::naming;
use gradekit_common::types::{Registration, Submission};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Textual conventions of the composed language
#[derive(Debug, Clone, Copy)]
pub struct Dialect {
    pub namespace_keyword: &'static str,
    pub import_keyword: &'static str,
    pub terminator: char,
    /// Imports containing this marker are kept and hoisted
    pub std_import_marker: &'static str,
    pub diagnostic_call: &'static str,
    pub public_keyword: &'static str,
    /// Declaration starts that lose `public` outside the executor
    pub type_intros: &'static [&'static str],
}

pub const JAVA: Dialect = Dialect {
    namespace_keyword: "package",
    import_keyword: "import",
    terminator: ';',
    std_import_marker: "java.",
    diagnostic_call: "System.out.print",
    public_keyword: "public",
    type_intros: &[
        "class ",
        "interface ",
        "enum ",
        "record ",
        "abstract class ",
        "final class ",
    ],
};

pub struct SourceComposer {
    dialect: Dialect,
    environment_dir: PathBuf,
}

impl SourceComposer {
    pub fn new(environment_dir: impl Into<PathBuf>) -> Self {
        Self::with_dialect(JAVA, environment_dir)
    }

    pub fn with_dialect(dialect: Dialect, environment_dir: impl Into<PathBuf>) -> Self {
        SourceComposer {
            dialect,
            environment_dir: environment_dir.into(),
        }
    }

    /// Compose the registration's modules with the submission substituted
    ///
    /// Fails only if one of the module files cannot be read.
    pub fn compose(&self, registration: &Registration, submission: &Submission) -> io::Result<String> {
        let stable_name = registration.expectation.stable_name();
        let mut composed = String::new();

        for module in registration.modules() {
            let is_executor = registration.is_executor(module);
            let substituted = submission.symbol.starts_with(naming::base_name(module));
            let path = if substituted {
                submission.path.clone()
            } else {
                self.environment_dir.join(module)
            };

            debug!(module, substituted, path = %path.display(), "composing module");
            let mut content = fs::read_to_string(&path)?;

            if registration.strip_diagnostics && !is_executor {
                content = strip_diagnostics(&content, &self.dialect);
            }

            let (content, _) = take_statements(&content, self.dialect.namespace_keyword, self.dialect.terminator);
            let (content, imports) = take_statements(&content, self.dialect.import_keyword, self.dialect.terminator);

            for import in imports {
                if import.contains(self.dialect.std_import_marker) {
                    composed.insert_str(0, &import);
                }
            }

            let mut content = content.replace(&submission.symbol, stable_name);

            if !is_executor {
                content = demote_public_types(&content, &self.dialect);
            }

            composed.push_str(&content);
        }

        Ok(composed)
    }

    /// Compose and write the artifact as `<workspace>/<executor>`
    pub fn write_artifact(
        &self,
        registration: &Registration,
        submission: &Submission,
        workspace: &Path,
    ) -> io::Result<PathBuf> {
        let composed = self.compose(registration, submission)?;
        fs::create_dir_all(workspace)?;

        let path = workspace.join(&registration.executor);
        fs::write(&path, composed)?;
        Ok(path)
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Find `keyword` used as a statement keyword: not inside a longer
/// identifier and followed by whitespace
fn find_keyword(text: &str, keyword: &str) -> Option<usize> {
    let mut offset = 0;

    while let Some(found) = text[offset..].find(keyword) {
        let start = offset + found;
        let end = start + keyword.len();
        let before_ok = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !is_identifier_char(c));
        let after_ok = text[end..]
            .chars()
            .next()
            .map_or(false, char::is_whitespace);

        if before_ok && after_ok {
            return Some(start);
        }
        offset = end;
    }

    None
}

/// Remove every `keyword ... terminator` statement
///
/// Returns the remaining text and the removed statements in discovery
/// order. A statement with no terminator is left in place.
fn take_statements(text: &str, keyword: &str, terminator: char) -> (String, Vec<String>) {
    let mut kept = String::with_capacity(text.len());
    let mut taken = Vec::new();
    let mut rest = text;

    while let Some(start) = find_keyword(rest, keyword) {
        let Some(length) = rest[start..].find(terminator) else {
            break;
        };
        let end = start + length + terminator.len_utf8();

        kept.push_str(&rest[..start]);
        taken.push(rest[start..end].to_string());
        rest = &rest[end..];
    }

    kept.push_str(rest);
    (kept, taken)
}

/// End index (exclusive) of the parenthesised argument list opening at
/// `open`, skipping string and character literals
fn closing_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (index, c) in text[open..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + index + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Replace each diagnostic print statement with an empty statement
///
/// The empty statement keeps constructs such as `if (x) print(..);`
/// syntactically valid.
fn strip_diagnostics(text: &str, dialect: &Dialect) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(dialect.diagnostic_call) {
        let after_call = start + dialect.diagnostic_call.len();
        let statement_end = rest[after_call..]
            .find('(')
            .map(|open| after_call + open)
            .and_then(|open| closing_paren(rest, open))
            .and_then(|close| {
                rest[close..]
                    .find(dialect.terminator)
                    .map(|semi| close + semi + dialect.terminator.len_utf8())
            });

        match statement_end {
            Some(end) => {
                out.push_str(&rest[..start]);
                out.push(dialect.terminator);
                rest = &rest[end..];
            }
            None => {
                out.push_str(&rest[..after_call]);
                rest = &rest[after_call..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn demote_public_types(text: &str, dialect: &Dialect) -> String {
    dialect
        .type_intros
        .iter()
        .fold(text.to_string(), |acc, intro| {
            acc.replace(&format!("{} {}", dialect.public_keyword, intro), intro)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradekit_common::types::{Expectation, ExpectationKind};
    use tempfile::TempDir;

    const MAIN: &str = "package tp;\n\
        \n\
        import java.util.Arrays;\n\
        import tp.util.Helper;\n\
        \n\
        public class Main {\n\
        \x20   public static void main(String[] args) {\n\
        \x20       System.out.println(Sorter.sort(args));\n\
        \x20   }\n\
        }\n";

    const SUBMISSION: &str = "package student;\n\
        \n\
        import java.util.List;\n\
        \n\
        public class Sorter2 {\n\
        \x20   static String sort(String[] a) {\n\
        \x20       System.out.println(\"debug (\" + a.length + \");\");\n\
        \x20       return Sorter2Helper.NAME;\n\
        \x20   }\n\
        }\n";

    fn fixture(strip: bool) -> (TempDir, SourceComposer, Registration, Submission) {
        let dir = TempDir::new().unwrap();
        let env = dir.path().join("environment");
        fs::create_dir_all(&env).unwrap();
        fs::write(env.join("Main.java"), MAIN).unwrap();
        fs::write(env.join("Sorter.java"), "public class Sorter {}\n").unwrap();

        let submission_path = dir.path().join("fr.dupont.1.a.b.Sorter2.java");
        fs::write(&submission_path, SUBMISSION).unwrap();

        let registration = Registration {
            step: "tp1".to_string(),
            executor: "Main.java".to_string(),
            expectation: Expectation {
                kind: ExpectationKind::StrictEquals,
                file: "Sorter".to_string(),
            },
            environment: vec!["Sorter.java".to_string()],
            strip_diagnostics: strip,
        };
        let submission = Submission {
            participant: "dupont".to_string(),
            symbol: "Sorter2".to_string(),
            path: submission_path,
        };

        (dir, SourceComposer::new(env), registration, submission)
    }

    #[test]
    fn test_compose_rewrites_modules() {
        let (_dir, composer, registration, submission) = fixture(true);
        let composed = composer.compose(&registration, &submission).unwrap();

        // Standard imports hoisted in reverse discovery order
        assert!(composed.starts_with("import java.util.Arrays;import java.util.List;"));
        assert!(!composed.contains("package"));
        assert!(!composed.contains("Helper;"));

        // Submission substituted, renamed and demoted
        assert!(composed.contains("class Sorter {"));
        assert!(!composed.contains("public class Sorter"));
        assert!(!composed.contains("Sorter2"));

        // Executor keeps its visibility and its print statement
        assert!(composed.contains("public class Main {"));
        assert!(composed.contains("System.out.println(Sorter.sort(args));"));

        // Diagnostic print stripped despite parentheses inside the literal
        assert!(!composed.contains("debug"));
    }

    #[test]
    fn test_rename_overmatches_longer_identifiers() {
        let (_dir, composer, registration, submission) = fixture(false);
        let composed = composer.compose(&registration, &submission).unwrap();

        assert!(composed.contains("return SorterHelper.NAME;"));
        assert!(composed.contains("debug"));
    }

    #[test]
    fn test_compose_is_deterministic() {
        let (_dir, composer, registration, submission) = fixture(true);
        let first = composer.compose(&registration, &submission).unwrap();
        let second = composer.compose(&registration, &submission).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_write_artifact_creates_workspace() {
        let (dir, composer, registration, submission) = fixture(true);
        let workspace = dir.path().join("tp1").join("dupont");

        let path = composer.write_artifact(&registration, &submission, &workspace).unwrap();
        assert_eq!(path, workspace.join("Main.java"));

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, composer.compose(&registration, &submission).unwrap());
    }

    #[test]
    fn test_missing_module_is_io_error() {
        let (_dir, composer, mut registration, submission) = fixture(true);
        registration.environment.push("Missing.java".to_string());
        let err = composer.compose(&registration, &submission).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_take_statements_respects_identifier_boundaries() {
        let text = "int important = 1;\nimport java.io.File;\nString packageName;";
        let (kept, taken) = take_statements(text, "import", ';');
        assert_eq!(taken, vec!["import java.io.File;".to_string()]);
        assert_eq!(kept, "int important = 1;\n\nString packageName;");

        let (kept, taken) = take_statements(&kept, "package", ';');
        assert!(taken.is_empty());
        assert!(kept.contains("packageName"));
    }

    #[test]
    fn test_take_statements_without_terminator() {
        let (kept, taken) = take_statements("import java.util.List", "import", ';');
        assert!(taken.is_empty());
        assert_eq!(kept, "import java.util.List");
    }

    #[test]
    fn test_strip_keeps_statement_shape() {
        let text = "if (x) System.out.println(f(a, g(b)));\nint y = 2;";
        assert_eq!(strip_diagnostics(text, &JAVA), "if (x) ;\nint y = 2;");
    }

    #[test]
    fn test_strip_handles_printf_and_char_literals() {
        let text = "System.out.printf(\"%c\", ')');done();";
        assert_eq!(strip_diagnostics(text, &JAVA), ";done();");
    }

    #[test]
    fn test_strip_leaves_unbalanced_call() {
        let text = "System.out.println(\"oops\";";
        assert_eq!(strip_diagnostics(text, &JAVA), text);
    }

    #[test]
    fn test_demote_public_types() {
        let text = "public abstract class A {}\npublic interface B {}\npublic enum C {}\npublic static void m() {}";
        let demoted = demote_public_types(text, &JAVA);
        assert_eq!(
            demoted,
            "abstract class A {}\ninterface B {}\nenum C {}\npublic static void m() {}"
        );
    }
}
