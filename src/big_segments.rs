//! Segments whose membership is kept in an external store.
use std::collections::HashMap;

use serde::Serialize;

/// Health of the big segment store as observed during an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BigSegmentsStatus {
    /// Membership was queried and the store is up to date.
    Healthy,
    /// Membership was queried but the store has not been updated recently.
    Stale,
    /// The store could not be queried.
    StoreError,
    /// A big segment was referenced but no store is configured, or the segment has no generation.
    NotConfigured,
}

impl BigSegmentsStatus {
    fn severity(self) -> u8 {
        match self {
            BigSegmentsStatus::Healthy => 0,
            BigSegmentsStatus::Stale => 1,
            BigSegmentsStatus::StoreError => 2,
            BigSegmentsStatus::NotConfigured => 3,
        }
    }

    /// Combine two observations, keeping the more severe one.
    pub fn merge(self, other: BigSegmentsStatus) -> BigSegmentsStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

/// Source of big segment membership.
///
/// The evaluator calls [`get_membership`](BigSegmentProvider::get_membership) at most once per
/// context key per evaluation, synchronously. Timeouts and caching across evaluations are up to the
/// implementation.
pub trait BigSegmentProvider: Send + Sync {
    /// Fetch all big segment memberships for the given context key.
    ///
    /// Returns `None` membership if the key is unknown to the store or the store failed, together
    /// with the store status.
    fn get_membership(
        &self,
        context_key: &str,
    ) -> (Option<Box<dyn BigSegmentMembership>>, BigSegmentsStatus);
}

/// Membership answers for a single context key.
pub trait BigSegmentMembership: Send + Sync {
    /// Return `Some(true)` if explicitly included, `Some(false)` if explicitly excluded, or `None`
    /// if the store has no answer for `segment_ref`.
    fn check_membership(&self, segment_ref: &str) -> Option<bool>;
}

/// Reference under which a big segment's membership is stored. Changes whenever the segment is
/// regenerated, which invalidates previously stored membership.
pub fn segment_ref(segment_key: &str, generation: i64) -> String {
    format!("{segment_key}.g{generation}")
}

/// [`BigSegmentMembership`] backed by a map of segment references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryBigSegmentMembership {
    memberships: HashMap<String, bool>,
}

impl MemoryBigSegmentMembership {
    pub fn new() -> MemoryBigSegmentMembership {
        MemoryBigSegmentMembership::default()
    }

    /// Build a membership from included and excluded segment references. An included reference
    /// wins if it appears in both lists.
    pub fn from_refs<I, E>(included: I, excluded: E) -> MemoryBigSegmentMembership
    where
        I: IntoIterator,
        I::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        let mut memberships: HashMap<String, bool> =
            excluded.into_iter().map(|r| (r.into(), false)).collect();
        memberships.extend(included.into_iter().map(|r| (r.into(), true)));
        MemoryBigSegmentMembership { memberships }
    }

    pub fn include(&mut self, segment_ref: impl Into<String>) {
        self.memberships.insert(segment_ref.into(), true);
    }

    pub fn exclude(&mut self, segment_ref: impl Into<String>) {
        self.memberships.insert(segment_ref.into(), false);
    }
}

impl BigSegmentMembership for MemoryBigSegmentMembership {
    fn check_membership(&self, segment_ref: &str) -> Option<bool> {
        self.memberships.get(segment_ref).copied()
    }
}
