//! Consistent bucketing for percentage rollouts, experiments, and segment rules.
//!
//! The hashing scheme is shared with other SDK implementations and must be reproduced exactly:
//! SHA-1 of `"{prefix}.{id}"`, first 60 bits of the digest, divided by the maximum 60-bit value.

use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::{
    attr_ref::AttrRef,
    error::EvalError,
    model::{Rollout, RolloutKind, WEIGHT_SCALE},
    Context,
};

/// Maximum value of the 60-bit hash prefix.
const LONG_SCALE: f64 = 0x0FFF_FFFF_FFFF_FFFF_u64 as f64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Bucket {
    /// Fraction in `[0, 1)`.
    pub value: f64,
    /// `false` if the context has no individual context of the requested kind.
    pub context_kind_found: bool,
}

/// Compute the bucket of `context` for the flag or segment identified by `key`.
///
/// `seed`, if set, replaces `"{key}.{salt}"` as the hash prefix. A bucket-by value that is neither
/// a string nor an integer puts the context in bucket 0.
pub(crate) fn compute_bucket_value(
    seed: Option<i64>,
    key: &str,
    context: &Context,
    context_kind: Option<&str>,
    bucket_by: &AttrRef,
    salt: &str,
) -> Result<Bucket, EvalError> {
    if let Some(err) = bucket_by.error() {
        return Err(EvalError::from_attr_ref(bucket_by.as_str(), err));
    }

    let Some(individual) = context.individual(context_kind) else {
        return Ok(Bucket {
            value: 0.0,
            context_kind_found: false,
        });
    };

    let id = individual
        .get_value(bucket_by)
        .and_then(|value| bucketable_string(&value));
    let Some(mut id) = id else {
        return Ok(Bucket {
            value: 0.0,
            context_kind_found: true,
        });
    };

    if let Some(secondary) = individual.secondary() {
        id = format!("{id}.{secondary}");
    }

    let prefix = match seed {
        Some(seed) => seed.to_string(),
        None => format!("{key}.{salt}"),
    };

    Ok(Bucket {
        value: hash_fraction(&format!("{prefix}.{id}")),
        context_kind_found: true,
    })
}

fn bucketable_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(i.to_string());
            }
            let f = n.as_f64()?;
            (f.fract() == 0.0 && f.abs() < i64::MAX as f64).then(|| (f as i64).to_string())
        }
        _ => None,
    }
}

fn hash_fraction(input: &str) -> f64 {
    let digest = Sha1::digest(input.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    // 15 hex characters == the top 60 bits.
    let value = u64::from_be_bytes(prefix) >> 4;
    value as f64 / LONG_SCALE
}

/// Variation picked by a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RolloutResult {
    pub variation: usize,
    pub in_experiment: bool,
}

impl Rollout {
    /// Pick the variation for `context`.
    ///
    /// Weights are accumulated in order; the first bucket whose cumulative weight exceeds the
    /// context's bucket value wins. If weights sum to less than 100000 and the value falls past
    /// the end, the last bucket is used.
    pub(crate) fn resolve(
        &self,
        key: &str,
        salt: &str,
        context: &Context,
    ) -> Result<RolloutResult, EvalError> {
        let Some(last) = self.variations.last() else {
            return Err(EvalError::EmptyRollout);
        };

        let is_experiment = self.kind == RolloutKind::Experiment;
        let bucket_by = match &self.bucket_by {
            Some(attr) if !is_experiment => AttrRef::for_data(attr, self.context_kind.as_deref()),
            _ => AttrRef::literal("key"),
        };

        let bucket = compute_bucket_value(
            self.seed,
            key,
            context,
            self.context_kind.as_deref(),
            &bucket_by,
            salt,
        )?;

        let mut sum = 0.0;
        let chosen = self
            .variations
            .iter()
            .find(|wv| {
                sum += wv.weight as f64 / WEIGHT_SCALE;
                bucket.value < sum
            })
            .unwrap_or(last);

        Ok(RolloutResult {
            variation: chosen.variation,
            in_experiment: is_experiment && !chosen.untracked && bucket.context_kind_found,
        })
    }
}
