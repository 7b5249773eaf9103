//! Pass/fail extraction from free-form review output.
//!
//! An explicit `## Verdict: PASS` / `## Verdict: FAIL` line always wins.
//! Without one, the review fails when any bullet line opens with a
//! severity keyword (`- High — ...`) and passes otherwise.

use crate::types::Verdict;
use regex::Regex;
use std::sync::LazyLock;

static VERDICT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s#>*_]*verdict[\s*_]*:[\s*_]*(pass|fail)\b").unwrap()
});

pub const DEFAULT_FAIL_SEVERITIES: [&str; 4] = ["critical", "high", "medium", "low"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerdictParser {
    fail_severities: Vec<String>,
}

impl Default for VerdictParser {
    fn default() -> Self {
        Self::new(DEFAULT_FAIL_SEVERITIES.iter().map(ToString::to_string))
    }
}

impl VerdictParser {
    pub fn new<I, S>(fail_severities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fail_severities = fail_severities
            .into_iter()
            .map(|value| value.into().trim().to_lowercase())
            .filter(|value| !value.is_empty())
            .collect();
        Self { fail_severities }
    }

    pub fn fail_severities(&self) -> &[String] {
        &self.fail_severities
    }

    pub fn parse(&self, output: &str) -> Verdict {
        if let Some(explicit) = explicit_verdict(output) {
            return explicit;
        }
        if output.lines().any(|line| self.is_finding(line)) {
            Verdict::Fail
        } else {
            Verdict::Pass
        }
    }

    fn is_finding(&self, line: &str) -> bool {
        let Some(rest) = strip_bullet(line.trim_start()) else {
            return false;
        };
        let rest = rest
            .trim_start_matches(|c: char| c == '*' || c == '_' || c == '[' || c.is_whitespace())
            .to_lowercase();
        self.fail_severities.iter().any(|severity| {
            rest.strip_prefix(severity.as_str())
                .is_some_and(|tail| !tail.starts_with(|c: char| c.is_alphanumeric()))
        })
    }
}

fn explicit_verdict(output: &str) -> Option<Verdict> {
    let captures = VERDICT_LINE.captures(output)?;
    let word = captures.get(1)?.as_str();
    Some(Verdict::from_pass(word.eq_ignore_ascii_case("pass")))
}

fn strip_bullet(line: &str) -> Option<&str> {
    if let Some(rest) = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("• "))
    {
        return Some(rest);
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        return line[digits..]
            .strip_prefix(". ")
            .or_else(|| line[digits..].strip_prefix(") "));
    }
    None
}
