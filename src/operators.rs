//! Clause operator semantics.
//!
//! Each operator is a pure predicate over a context value and one clause value. Operands that are
//! expensive to interpret (regexes, timestamps, semantic versions) are parsed into an [`Operand`],
//! either ahead of time by preprocessing or on the fly.
use std::borrow::Cow;

use chrono::{DateTime, Utc};
use regex::Regex;
use semver::{BuildMetadata, Version};
use serde_json::Value;

use crate::model::Operator;

/// A clause value prepared for a specific operator.
#[derive(Debug, Clone)]
pub(crate) enum Operand {
    Regex(Regex),
    Time(DateTime<Utc>),
    Version(Version),
    /// The clause value cannot be used with the operator, so it never matches.
    Invalid,
    /// The operator uses the clause value as is.
    Raw,
}

impl Operand {
    pub(crate) fn parse(op: Operator, clause_value: &Value) -> Operand {
        match op {
            Operator::Matches => match clause_value {
                Value::String(s) => Regex::new(s).map_or(Operand::Invalid, Operand::Regex),
                _ => Operand::Invalid,
            },
            Operator::Before | Operator::After => {
                parse_time(clause_value).map_or(Operand::Invalid, Operand::Time)
            }
            Operator::SemVerEqual | Operator::SemVerLessThan | Operator::SemVerGreaterThan => {
                parse_semver(clause_value).map_or(Operand::Invalid, Operand::Version)
            }
            _ => Operand::Raw,
        }
    }
}

impl Operator {
    /// Apply the operator to a single (non-array) context value and a single clause value.
    ///
    /// `prepared` is the preprocessed form of `clause_value`, if available. Returns `false` if the
    /// operator cannot be applied to these value types. `SegmentMatch` and `Unknown` never match
    /// here.
    pub(crate) fn apply(
        self,
        context_value: &Value,
        clause_value: &Value,
        prepared: Option<&Operand>,
    ) -> bool {
        let operand = match prepared {
            Some(operand) => Cow::Borrowed(operand),
            None => Cow::Owned(Operand::parse(self, clause_value)),
        };

        match (self, &*operand) {
            (Operator::In, _) => values_equal(context_value, clause_value),

            (Operator::StartsWith, _) => {
                string_op(context_value, clause_value, |s, prefix| s.starts_with(prefix))
            }
            (Operator::EndsWith, _) => {
                string_op(context_value, clause_value, |s, suffix| s.ends_with(suffix))
            }
            (Operator::Contains, _) => {
                string_op(context_value, clause_value, |s, needle| s.contains(needle))
            }
            (Operator::Matches, Operand::Regex(regex)) => match context_value {
                Value::String(s) => regex.is_match(s),
                _ => false,
            },

            (Operator::LessThan, _) => numeric_op(context_value, clause_value, |a, b| a < b),
            (Operator::LessThanOrEqual, _) => {
                numeric_op(context_value, clause_value, |a, b| a <= b)
            }
            (Operator::GreaterThan, _) => numeric_op(context_value, clause_value, |a, b| a > b),
            (Operator::GreaterThanOrEqual, _) => {
                numeric_op(context_value, clause_value, |a, b| a >= b)
            }

            (Operator::Before, Operand::Time(t)) => parse_time(context_value).is_some_and(|c| c < *t),
            (Operator::After, Operand::Time(t)) => parse_time(context_value).is_some_and(|c| c > *t),

            (Operator::SemVerEqual, Operand::Version(v)) => {
                parse_semver(context_value).is_some_and(|c| c == *v)
            }
            (Operator::SemVerLessThan, Operand::Version(v)) => {
                parse_semver(context_value).is_some_and(|c| c < *v)
            }
            (Operator::SemVerGreaterThan, Operand::Version(v)) => {
                parse_semver(context_value).is_some_and(|c| c > *v)
            }

            // Invalid operands, segment matching (handled by the rule evaluator), and unknown
            // operators.
            _ => false,
        }
    }
}

/// JSON equality where numbers compare by numeric value (`1 == 1.0`).
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => a == b,
    }
}

fn string_op(context_value: &Value, clause_value: &Value, f: impl Fn(&str, &str) -> bool) -> bool {
    match (context_value, clause_value) {
        (Value::String(a), Value::String(b)) => f(a, b),
        _ => false,
    }
}

fn numeric_op(context_value: &Value, clause_value: &Value, f: impl Fn(f64, f64) -> bool) -> bool {
    match (context_value.as_f64(), clause_value.as_f64()) {
        (Some(a), Some(b)) => f(a, b),
        _ => false,
    }
}

/// Interpret a value as a timestamp: an RFC 3339 string or a number of Unix milliseconds.
pub(crate) fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => {
            let millis = n.as_f64()?;
            if !millis.is_finite() {
                return None;
            }
            let secs = (millis / 1000.0).floor();
            let nanos = ((millis - secs * 1000.0) * 1_000_000.0).round();
            DateTime::<Utc>::from_timestamp(secs as i64, (nanos as u32).min(999_999_999))
        }
        _ => None,
    }
}

/// Parse a semantic version, tolerating a missing minor and/or patch component (`"2"` and `"2.1"`
/// are read as `"2.0.0"` and `"2.1.0"`). Build metadata is dropped, as it does not participate in
/// precedence.
pub(crate) fn parse_semver(value: &Value) -> Option<Version> {
    let Value::String(s) = value else {
        return None;
    };
    let mut version = Version::parse(s)
        .ok()
        .or_else(|| Version::parse(&complete_version(s)?).ok())?;
    version.build = BuildMetadata::EMPTY;
    Some(version)
}

/// Pad `major[.minor]` with zero components, keeping any prerelease/build suffix.
fn complete_version(s: &str) -> Option<String> {
    let numeric_end = s.find(['-', '+']).unwrap_or(s.len());
    let (numbers, suffix) = s.split_at(numeric_end);
    let components: Vec<&str> = numbers.split('.').collect();
    if components.len() >= 3
        || components
            .iter()
            .any(|c| c.is_empty() || !c.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }
    let mut completed = components.join(".");
    for _ in components.len()..3 {
        completed.push_str(".0");
    }
    completed.push_str(suffix);
    Some(completed)
}
