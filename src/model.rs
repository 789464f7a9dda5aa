//! Flag and segment data model.
//!
//! These are immutable value descriptions. The evaluator never mutates them; lookup structures
//! derived from them live in a separate [`Preprocessed`](crate::preprocess::Preprocessed) table.
use derive_more::From;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rollout weights are expressed in units of 1/100000.
pub const WEIGHT_SCALE: f64 = 100_000.0;

/// A feature flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
    pub key: String,
    /// Together with `key`, identifies this exact flag content.
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub on: bool,
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    /// Individual targets for the default context kind.
    #[serde(default)]
    pub targets: Vec<Target>,
    /// Individual targets scoped by context kind. When non-empty, takes precedence over
    /// `targets`.
    #[serde(default)]
    pub context_targets: Vec<Target>,
    #[serde(default)]
    pub rules: Vec<FlagRule>,
    pub fallthrough: VariationOrRollout,
    #[serde(default)]
    pub off_variation: Option<usize>,
    #[serde(default)]
    pub variations: Vec<Value>,
    /// Hash seed used for bucketing.
    #[serde(default)]
    pub salt: String,

    // Analytics metadata. Opaque to the evaluator.
    #[serde(default)]
    pub track_events: bool,
    #[serde(default)]
    pub track_events_fallthrough: bool,
    #[serde(default)]
    pub debug_events_until_date: Option<u64>,
    #[serde(default)]
    pub sampling_ratio: Option<u32>,
    #[serde(default)]
    pub exclude_from_summaries: bool,

    /// Tombstone marker. Deleted flags are reported as not found by data providers.
    #[serde(default)]
    pub deleted: bool,
}

/// Another flag that must evaluate to a specific variation for this flag to be evaluated
/// normally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prerequisite {
    pub key: String,
    pub variation: usize,
}

/// A list of context keys that receive a fixed variation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Context kind the keys belong to. Absent means the default kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_kind: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
    pub variation: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRule {
    /// Stable identifier reported in `RULE_MATCH` reasons.
    #[serde(default)]
    pub id: String,
    /// All clauses must match for the rule to match.
    #[serde(default)]
    pub clauses: Vec<Clause>,
    #[serde(flatten)]
    pub variation_or_rollout: VariationOrRollout,
    #[serde(default)]
    pub track_events: bool,
}

/// Either a fixed variation or a percentage rollout.
///
/// Serialized as `{"variation": 1}` or `{"rollout": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(rename_all = "camelCase")]
pub enum VariationOrRollout {
    Variation(usize),
    Rollout(Rollout),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    #[serde(default)]
    pub kind: RolloutKind,
    /// Context kind to bucket by. Absent means the default kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_kind: Option<String>,
    pub variations: Vec<WeightedVariation>,
    /// Attribute to bucket by. Absent means the context key. Ignored for experiments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_by: Option<String>,
    /// Replaces the flag key and salt as the hash prefix when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RolloutKind {
    #[default]
    Rollout,
    Experiment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedVariation {
    pub variation: usize,
    /// Out of 100000.
    pub weight: i64,
    /// Experiment buckets marked untracked do not count as experiment participation.
    #[serde(default)]
    pub untracked: bool,
}

/// `Clause` checks a context attribute against a list of values under `op`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clause {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_kind: Option<String>,
    /// Attribute reference. Path syntax is only honored when `context_kind` is set.
    #[serde(default)]
    pub attribute: String,
    pub op: Operator,
    #[serde(default)]
    pub values: Vec<Value>,
    #[serde(default)]
    pub negate: bool,
}

/// Clause operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    /// Equality with any clause value.
    In,
    EndsWith,
    StartsWith,
    /// Regular expression search. Clause value must be a regex string.
    Matches,
    Contains,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    /// Timestamp comparison. Values are RFC 3339 strings or Unix milliseconds.
    Before,
    After,
    SemVerEqual,
    SemVerLessThan,
    SemVerGreaterThan,
    /// Membership in any of the segments named by the clause values. The attribute is ignored.
    SegmentMatch,
    /// Any operator this library does not know about. Never matches.
    #[serde(other)]
    Unknown,
}

/// A reusable set of contexts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub key: String,
    #[serde(default)]
    pub version: u64,
    /// Keys of default-kind contexts that are always members.
    #[serde(default)]
    pub included: Vec<String>,
    /// Keys of default-kind contexts that are never members (unless included).
    #[serde(default)]
    pub excluded: Vec<String>,
    #[serde(default)]
    pub included_contexts: Vec<SegmentTarget>,
    #[serde(default)]
    pub excluded_contexts: Vec<SegmentTarget>,
    #[serde(default)]
    pub rules: Vec<SegmentRule>,
    #[serde(default)]
    pub salt: String,
    /// Big segment: membership comes from an external store.
    #[serde(default)]
    pub unbounded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unbounded_context_kind: Option<String>,
    /// Big segment generation. A big segment without a generation never matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_kind: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub clauses: Vec<Clause>,
    /// Percentage of matching contexts (out of 100000) included. Absent means all of them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_context_kind: Option<String>,
}
