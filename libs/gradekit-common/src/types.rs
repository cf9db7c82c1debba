use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Strongly-typed expectation strategy
/// The set is closed: every strategy carries its own edge-case policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectationKind {
    StrictEquals,
    RegexMatch,
    AtLeastOneOccurrence,
    IncrementalArray,
    RandomOrderArray,
    CombinationOfTwoArrays,
}

impl ExpectationKind {
    /// Returns all strategy variants
    pub fn all_variants() -> &'static [ExpectationKind] {
        &[
            ExpectationKind::StrictEquals,
            ExpectationKind::RegexMatch,
            ExpectationKind::AtLeastOneOccurrence,
            ExpectationKind::IncrementalArray,
            ExpectationKind::RandomOrderArray,
            ExpectationKind::CombinationOfTwoArrays,
        ]
    }

    /// Number of independent executions the strategy needs for one verdict
    pub fn required_runs(&self) -> usize {
        match self {
            ExpectationKind::AtLeastOneOccurrence => 10,
            _ => 1,
        }
    }

    /// Whether the expectation text is a regular expression
    pub fn uses_pattern(&self) -> bool {
        !matches!(self, ExpectationKind::StrictEquals)
    }
}

impl fmt::Display for ExpectationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExpectationKind::StrictEquals => "strict_equals",
            ExpectationKind::RegexMatch => "regex_match",
            ExpectationKind::AtLeastOneOccurrence => "at_least_one_occurrence",
            ExpectationKind::IncrementalArray => "incremental_array",
            ExpectationKind::RandomOrderArray => "random_order_array",
            ExpectationKind::CombinationOfTwoArrays => "combination_of_two_arrays",
        };
        write!(f, "{}", name)
    }
}

/// Expectation of one registration
///
/// `file` names the expectation file and doubles as the stable symbol
/// name every composed artifact is rewritten to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectation {
    pub kind: ExpectationKind,
    pub file: String,
}

impl Expectation {
    pub fn stable_name(&self) -> &str {
        &self.file
    }

    pub fn required_runs(&self) -> usize {
        self.kind.required_runs()
    }
}

/// Registration (Immutable Exercise Configuration)
///
/// ## Composition Semantics:
/// - Modules are composed in order: `environment` first, `executor` last
/// - `step` selects the submissions folder whose name ends with it
/// - `strip_diagnostics` removes print statements outside the executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub step: String,
    pub executor: String,
    pub expectation: Expectation,
    #[serde(default)]
    pub environment: Vec<String>,
    #[serde(default)]
    pub strip_diagnostics: bool,
}

impl Registration {
    /// Scaffold modules in composition order, executor last
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.environment
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.executor.as_str()))
    }

    pub fn is_executor(&self, module: &str) -> bool {
        self.executor == module
    }
}

/// On-disk registration list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrationFile {
    pub registrations: Vec<Registration>,
}

/// One participant's candidate file for a registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub participant: String,
    /// Symbol name taken from the file name, without extension
    pub symbol: String,
    pub path: PathBuf,
}

/// Final entry recorded for a (participant, registration) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportEntry {
    Verdict(bool),
    Failure(String),
}

impl ReportEntry {
    pub fn failure(code: impl Into<String>) -> Self {
        ReportEntry::Failure(code.into())
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, ReportEntry::Verdict(true))
    }
}

impl fmt::Display for ReportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportEntry::Verdict(verdict) => write!(f, "{}", verdict),
            ReportEntry::Failure(code) => write!(f, "{}", code),
        }
    }
}

/// Grading Report
///
/// participant → registration step → entry.
/// Entries are append-only: recording an already present pair keeps the
/// first entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Report {
    entries: BTreeMap<String, BTreeMap<String, ReportEntry>>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an entry, returns `false` if the pair already had one
    pub fn record(&mut self, participant: &str, step: &str, entry: ReportEntry) -> bool {
        let line = self.entries.entry(participant.to_string()).or_default();
        match line.entry(step.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn get(&self, participant: &str, step: &str) -> Option<&ReportEntry> {
        self.entries.get(participant).and_then(|line| line.get(step))
    }

    pub fn participants(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of recorded (participant, registration) entries
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries holding a `true` verdict
    pub fn passed(&self) -> usize {
        self.entries
            .values()
            .flat_map(BTreeMap::values)
            .filter(|entry| entry.is_pass())
            .count()
    }
}
