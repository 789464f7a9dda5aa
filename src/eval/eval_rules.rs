use std::borrow::Cow;

use serde_json::Value;

use crate::{
    error::EvalError,
    model::{Clause, Operator},
    preprocess::{ClauseIndex, ScalarKey},
    Context,
};

use super::evaluator::EvalState;

impl<'a, 'r> EvalState<'a, 'r> {
    /// Return `true` if all clauses match the current context. `index` runs parallel to `clauses`
    /// when present.
    pub(super) fn clauses_match(
        &mut self,
        clauses: &'a [Clause],
        index: Option<&'a [ClauseIndex]>,
    ) -> Result<bool, EvalError> {
        for (i, clause) in clauses.iter().enumerate() {
            let clause_index = index.and_then(|ix| ix.get(i));
            let matched = if clause.op == Operator::SegmentMatch {
                self.segment_match_clause(clause)?
            } else {
                clause_matches_context(clause, clause_index, self.context)?
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// A segment-match clause matches if the context is in any of the named segments. Segments
    /// that do not exist never contain anybody.
    fn segment_match_clause(&mut self, clause: &'a Clause) -> Result<bool, EvalError> {
        let mut matched = false;
        for value in &clause.values {
            let Value::String(segment_key) = value else {
                continue;
            };
            let Some(segment) = self.data.get_segment(segment_key) else {
                continue;
            };
            if self.segment_contains(segment)? {
                matched = true;
                break;
            }
        }
        Ok(matched != clause.negate)
    }
}

/// Match a non-segment clause against the context.
///
/// A missing attribute, a `null` value, or a context without the clause's kind is a non-match
/// regardless of `negate`.
pub(super) fn clause_matches_context(
    clause: &Clause,
    index: Option<&ClauseIndex>,
    context: &Context,
) -> Result<bool, EvalError> {
    let attr = match index {
        Some(index) => Cow::Borrowed(&index.attr),
        None => Cow::Owned(clause.attr_ref()),
    };
    if let Some(err) = attr.error() {
        return Err(EvalError::from_attr_ref(attr.as_str(), err));
    }

    if attr.is_kind() {
        let matched = context
            .kinds()
            .any(|kind| clause_matches_value(clause, index, &Value::String(kind.to_owned())));
        return Ok(matched != clause.negate);
    }

    let Some(individual) = context.individual(clause.context_kind.as_deref()) else {
        return Ok(false);
    };
    let value = match individual.get_value(&attr) {
        None => return Ok(false),
        Some(value) if value.is_null() => return Ok(false),
        Some(value) => value,
    };

    let matched = match &*value {
        Value::Array(items) => items
            .iter()
            .any(|item| clause_matches_value(clause, index, item)),
        value => clause_matches_value(clause, index, value),
    };
    Ok(matched != clause.negate)
}

/// Return `true` if the operator holds for `value` and any clause value.
fn clause_matches_value(clause: &Clause, index: Option<&ClauseIndex>, value: &Value) -> bool {
    if let Some(set) = index.and_then(|ix| ix.in_set.as_ref()) {
        return ScalarKey::from_value(value).is_some_and(|key| set.contains(&key));
    }
    clause
        .values
        .iter()
        .enumerate()
        .any(|(i, clause_value)| {
            let operand = index.and_then(|ix| ix.operands.get(i));
            clause.op.apply(value, clause_value, operand)
        })
}
