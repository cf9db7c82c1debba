use crate::types::Submission;
use regex::Regex;
use std::path::{Path, PathBuf};

/// File naming semantics - defines only naming, not runtime logic
/// Ensures the composer, the compiler and the executor agree on where a
/// participant's artifacts live and what they are called

pub const SOURCE_EXTENSION: &str = ".java";

/// Token pattern of a submission file name:
/// `<locale>.?<participant>.?<variant digits>.?<free>.?<free>.?<symbol><extension>`
///
/// Group 2 is the participant id, group 7 the symbol name.
pub fn submission_pattern(extension: &str) -> Regex {
    let pattern = format!(
        r"([a-zA-Z]*).?([a-zA-Z]*).?(\d*?).?([a-zA-Z]*).?([a-zA-Z]*).?(([a-zA-Z0-9]*)({}))",
        regex::escape(extension)
    );
    Regex::new(&pattern).expect("submission pattern is a valid regex")
}

/// Parse a submission file name into (participant, symbol)
///
/// Names without a participant id or a symbol are treated as unparseable.
pub fn parse_submission_name(pattern: &Regex, file_name: &str) -> Option<(String, String)> {
    let caps = pattern.captures(file_name)?;
    let participant = caps.get(2)?.as_str();
    let symbol = caps.get(7)?.as_str();

    if participant.is_empty() || symbol.is_empty() {
        return None;
    }

    Some((participant.to_string(), symbol.to_string()))
}

/// Build a submission from a path, `None` when the file name does not parse
pub fn submission_from_path(pattern: &Regex, path: &Path) -> Option<Submission> {
    let file_name = path.file_name()?.to_str()?;
    let (participant, symbol) = parse_submission_name(pattern, file_name)?;

    Some(Submission {
        participant,
        symbol,
        path: path.to_path_buf(),
    })
}

/// Module name without its extension (`Main.java` → `Main`)
pub fn base_name(module: &str) -> &str {
    match module.rfind('.') {
        Some(index) => &module[..index],
        None => module,
    }
}

/// Deterministic working area of one participant for one step
pub fn workspace_dir(submissions_root: &Path, step: &str, participant: &str) -> PathBuf {
    submissions_root.join(step).join(participant)
}

/// Failure code of a compilation error at `line`
pub fn compile_failure_code(line: u64) -> String {
    format!("L.{}", line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotted_name() {
        let pattern = submission_pattern(SOURCE_EXTENSION);
        let parsed = parse_submission_name(&pattern, "fr.dupont.1.a.b.Sorter.java");
        assert_eq!(parsed, Some(("dupont".to_string(), "Sorter".to_string())));
    }

    #[test]
    fn test_parse_underscored_name_with_digits_in_symbol() {
        let pattern = submission_pattern(SOURCE_EXTENSION);
        let parsed = parse_submission_name(&pattern, "fr_martin_2_tp_a_Sorter2.java");
        assert_eq!(parsed, Some(("martin".to_string(), "Sorter2".to_string())));
    }

    #[test]
    fn test_unparseable_names() {
        let pattern = submission_pattern(SOURCE_EXTENSION);
        assert_eq!(parse_submission_name(&pattern, "README.md"), None);
        assert_eq!(parse_submission_name(&pattern, "notes"), None);
        // Symbol only, no participant token
        assert_eq!(parse_submission_name(&pattern, "Sorter.java"), None);
    }

    #[test]
    fn test_custom_extension_is_escaped() {
        let pattern = submission_pattern(".kt");
        let parsed = parse_submission_name(&pattern, "fr.dupont.1.a.b.Sorter.kt");
        assert_eq!(parsed, Some(("dupont".to_string(), "Sorter".to_string())));
        assert_eq!(parse_submission_name(&pattern, "fr.dupont.1.a.b.Sorter.java"), None);
    }

    #[test]
    fn test_submission_from_path() {
        let pattern = submission_pattern(SOURCE_EXTENSION);
        let path = Path::new("/subs/2024-tp1/fr.dupont.1.a.b.Sorter.java");
        let submission = submission_from_path(&pattern, path).unwrap();
        assert_eq!(submission.participant, "dupont");
        assert_eq!(submission.symbol, "Sorter");
        assert_eq!(submission.path, path);
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("Main.java"), "Main");
        assert_eq!(base_name("archive.tar.gz"), "archive.tar");
        assert_eq!(base_name("Main"), "Main");
    }

    #[test]
    fn test_workspace_dir_deterministic() {
        let root = Path::new("/subs");
        let first = workspace_dir(root, "tp1", "dupont");
        let second = workspace_dir(root, "tp1", "dupont");
        assert_eq!(first, second);
        assert_eq!(first, PathBuf::from("/subs/tp1/dupont"));
    }

    #[test]
    fn test_compile_failure_code() {
        assert_eq!(compile_failure_code(12), "L.12");
        assert_eq!(compile_failure_code(0), "L.0");
    }
}
