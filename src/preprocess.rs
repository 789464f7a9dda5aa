//! Lookup structures derived from flags and segments ahead of evaluation.
//!
//! Flags and segments stay immutable. Their derived data lives in a [`Preprocessed`] side table
//! that is built once, before the data is shared between threads, and then only read. Every lookup
//! is optional: the evaluator computes the same thing on the fly when an entry is missing, so
//! preprocessing never changes results.
//!
//! Entries are tied to the exact `Arc` they were built from. A flag or segment that merely shares
//! a key and version with a stored one never sees the stored entry.
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde_json::Value;

use crate::{
    attr_ref::AttrRef,
    model::{Clause, Flag, Operator, Segment},
    operators::Operand,
};

/// Side table of preprocessed flags and segments, keyed by item key and item identity.
#[derive(Debug, Default)]
pub struct Preprocessed {
    flags: HashMap<String, (Arc<Flag>, FlagIndex)>,
    segments: HashMap<String, (Arc<Segment>, SegmentIndex)>,
}

/// Lookup structures for one flag. Vectors run parallel to the corresponding flag fields.
#[derive(Debug)]
pub(crate) struct FlagIndex {
    pub targets: Vec<HashSet<String>>,
    pub context_targets: Vec<HashSet<String>>,
    pub rules: Vec<Vec<ClauseIndex>>,
}

/// Lookup structures for one segment.
#[derive(Debug)]
pub(crate) struct SegmentIndex {
    pub included: HashSet<String>,
    pub excluded: HashSet<String>,
    pub included_contexts: Vec<HashSet<String>>,
    pub excluded_contexts: Vec<HashSet<String>>,
    pub rules: Vec<Vec<ClauseIndex>>,
}

#[derive(Debug)]
pub(crate) struct ClauseIndex {
    pub attr: AttrRef,
    /// Set of clause values for `in` clauses whose values are all scalars.
    pub in_set: Option<HashSet<ScalarKey>>,
    /// One operand per clause value.
    pub operands: Vec<Operand>,
}

/// Hashable form of a scalar JSON value, with numbers compared by numeric value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ScalarKey {
    Null,
    Bool(bool),
    Number(u64),
    String(String),
}

impl ScalarKey {
    pub(crate) fn from_value(value: &Value) -> Option<ScalarKey> {
        let key = match value {
            Value::Null => ScalarKey::Null,
            Value::Bool(b) => ScalarKey::Bool(*b),
            Value::Number(n) => {
                let f = n.as_f64()?;
                // -0.0 == 0.0
                ScalarKey::Number(if f == 0.0 { 0 } else { f.to_bits() })
            }
            Value::String(s) => ScalarKey::String(s.clone()),
            Value::Array(_) | Value::Object(_) => return None,
        };
        Some(key)
    }
}

impl Preprocessed {
    pub fn new() -> Preprocessed {
        Preprocessed::default()
    }

    /// Build and store the lookup structures for `flag`, replacing any previous entry for its key.
    pub fn insert_flag(&mut self, flag: Arc<Flag>) {
        let index = FlagIndex {
            targets: flag.targets.iter().map(|t| key_set(&t.values)).collect(),
            context_targets: flag
                .context_targets
                .iter()
                .map(|t| key_set(&t.values))
                .collect(),
            rules: flag
                .rules
                .iter()
                .map(|rule| rule.clauses.iter().map(ClauseIndex::new).collect())
                .collect(),
        };
        self.flags.insert(flag.key.clone(), (flag, index));
    }

    /// Build and store the lookup structures for `segment`, replacing any previous entry for its
    /// key.
    pub fn insert_segment(&mut self, segment: Arc<Segment>) {
        let index = SegmentIndex {
            included: key_set(&segment.included),
            excluded: key_set(&segment.excluded),
            included_contexts: segment
                .included_contexts
                .iter()
                .map(|t| key_set(&t.values))
                .collect(),
            excluded_contexts: segment
                .excluded_contexts
                .iter()
                .map(|t| key_set(&t.values))
                .collect(),
            rules: segment
                .rules
                .iter()
                .map(|rule| rule.clauses.iter().map(ClauseIndex::new).collect())
                .collect(),
        };
        self.segments
            .insert(segment.key.clone(), (segment, index));
    }

    pub fn len(&self) -> usize {
        self.flags.len() + self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index built from this very flag, if present.
    pub(crate) fn flag(&self, flag: &Flag) -> Option<&FlagIndex> {
        match self.flags.get(&flag.key) {
            Some((stored, index)) if std::ptr::eq(Arc::as_ptr(stored), flag) => Some(index),
            _ => None,
        }
    }

    /// Index built from this very segment, if present.
    pub(crate) fn segment(&self, segment: &Segment) -> Option<&SegmentIndex> {
        match self.segments.get(&segment.key) {
            Some((stored, index)) if std::ptr::eq(Arc::as_ptr(stored), segment) => Some(index),
            _ => None,
        }
    }
}

fn key_set(values: &[String]) -> HashSet<String> {
    values.iter().cloned().collect()
}

/// Return `true` if `key` is among `values`, using the prebuilt set when available.
pub(crate) fn contains_key(set: Option<&HashSet<String>>, values: &[String], key: &str) -> bool {
    match set {
        Some(set) => set.contains(key),
        None => values.iter().any(|v| v == key),
    }
}

impl ClauseIndex {
    fn new(clause: &Clause) -> ClauseIndex {
        let in_set = if clause.op == Operator::In {
            clause.values.iter().map(ScalarKey::from_value).collect()
        } else {
            None
        };
        ClauseIndex {
            attr: clause.attr_ref(),
            in_set,
            operands: clause
                .values
                .iter()
                .map(|value| Operand::parse(clause.op, value))
                .collect(),
        }
    }
}

impl Clause {
    /// Attribute reference of this clause. Path syntax applies only when a context kind is set.
    pub(crate) fn attr_ref(&self) -> AttrRef {
        AttrRef::for_data(&self.attribute, self.context_kind.as_deref())
    }
}
