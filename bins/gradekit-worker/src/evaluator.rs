/// Expectation Evaluator - Verdicts Over Captured Output
///
/// **Core Responsibility:**
/// Decide whether the captured outputs of one submission satisfy the
/// registration's expectation text.
///
/// **Critical Properties:**
/// - Knows nothing about worker threads or timeouts
/// - Knows nothing about compilers or loaders
/// - Pure function: (strategy, expectation text, captured outputs) → verdict
///
/// ## Strategy Semantics:
/// - `StrictEquals`: exact equality with the single output
/// - `RegexMatch`: the whole output matches the pattern
/// - `AtLeastOneOccurrence`: across all runs concatenated, at least one
///   match and no match with an unset capturing group
/// - `IncrementalArray`: group 1 of every match is a non-decreasing list
/// - `RandomOrderArray`: no match shows a run of `len / 10` equal
///   consecutive differences; needs at least one match
/// - `CombinationOfTwoArrays`: groups 1, 2, 3 of the first match are two
///   lists and their combination
///
/// Lists are `", "`-separated integers. An element that is not an integer
/// makes the verdict false.

use gradekit_common::{ExpectationKind, HarnessError};
use regex::Regex;
use tracing::debug;

const LIST_SEPARATOR: &str = ", ";

/// Evaluate `results` against `expected` with the strategy `kind`
///
/// `results` must hold exactly `kind.required_runs()` outputs.
pub fn is_result_expected(
    kind: ExpectationKind,
    expected: &str,
    results: &[String],
) -> Result<bool, HarnessError> {
    if results.len() != kind.required_runs() {
        return Err(HarnessError::RunCount {
            expected: kind.required_runs(),
            actual: results.len(),
        });
    }

    let verdict = match kind {
        ExpectationKind::StrictEquals => results[0] == expected,
        ExpectationKind::RegexMatch => full_match(expected, &results[0])?,
        ExpectationKind::AtLeastOneOccurrence => at_least_one_occurrence(&compile(expected)?, results),
        ExpectationKind::IncrementalArray => incremental_array(&compile(expected)?, &results[0]),
        ExpectationKind::RandomOrderArray => random_order_array(&compile(expected)?, &results[0]),
        ExpectationKind::CombinationOfTwoArrays => {
            combination_of_two_arrays(&compile(expected)?, &results[0])
        }
    };

    debug!(%kind, verdict, "expectation evaluated");
    Ok(verdict)
}

fn compile(pattern: &str) -> Result<Regex, HarnessError> {
    Regex::new(pattern).map_err(|e| HarnessError::InvalidPattern(e.to_string()))
}

fn full_match(pattern: &str, result: &str) -> Result<bool, HarnessError> {
    let anchored = compile(&format!("^(?:{})$", pattern))?;
    Ok(anchored.is_match(result))
}

/// Split a list the way the exercises print it
///
/// Trailing empty items are dropped when the separator occurs; a text
/// without separator is a single item, even when empty.
fn split_list(text: &str) -> Vec<&str> {
    let mut items: Vec<&str> = text.split(LIST_SEPARATOR).collect();
    if text.contains(LIST_SEPARATOR) {
        while items.last() == Some(&"") {
            items.pop();
        }
    }
    items
}

fn parse_item(item: &str) -> Option<i64> {
    item.parse().ok()
}

fn at_least_one_occurrence(pattern: &Regex, results: &[String]) -> bool {
    let haystack = results.concat();
    let mut matched = false;

    for caps in pattern.captures_iter(&haystack) {
        matched = true;

        // Group 0 is always set; every numbered group must be
        if (1..caps.len()).any(|group| caps.get(group).is_none()) {
            return false;
        }
    }

    matched
}

fn incremental_array(pattern: &Regex, result: &str) -> bool {
    for caps in pattern.captures_iter(result) {
        let Some(list) = caps.get(1) else {
            return false;
        };
        let items = split_list(list.as_str());
        if items.len() < 2 {
            continue;
        }

        let Some(values) = items.iter().map(|item| parse_item(item)).collect::<Option<Vec<_>>>() else {
            return false;
        };
        if values.windows(2).any(|pair| pair[1] < pair[0]) {
            return false;
        }
    }

    true
}

fn random_order_array(pattern: &Regex, result: &str) -> bool {
    let mut matched = false;

    for caps in pattern.captures_iter(result) {
        matched = true;
        let Some(list) = caps.get(1) else {
            return false;
        };

        let items = split_list(list.as_str());
        let max_sequence = items.len() / 10;
        let mut diff = 0i64;
        let mut sequence = 0usize;
        let mut index = 1;

        while index < items.len() && sequence < max_sequence {
            let (Some(current), Some(previous)) = (parse_item(items[index]), parse_item(items[index - 1])) else {
                return false;
            };

            let Some(step) = current.checked_sub(previous) else {
                return false;
            };
            if step == diff {
                sequence += 1;
            } else {
                diff = step;
                sequence = 0;
            }
            index += 1;
        }

        if sequence >= max_sequence {
            return false;
        }
    }

    matched
}

fn combination_of_two_arrays(pattern: &Regex, result: &str) -> bool {
    let Some(caps) = pattern.captures(result) else {
        return false;
    };
    let (Some(first), Some(second), Some(combined)) = (caps.get(1), caps.get(2), caps.get(3)) else {
        return false;
    };

    let first = split_list(first.as_str());
    let second = split_list(second.as_str());
    let combined = split_list(combined.as_str());

    if first.len() + second.len() != combined.len() {
        return false;
    }

    combined.iter().all(|item| {
        first.iter().any(|f| item == f) || second.iter().any(|s| item.ends_with(s))
    })
}
