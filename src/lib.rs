//! A feature flag targeting evaluator.
//!
//! # Overview
//!
//! Given a [`Flag`], the data it refers to, and a [`Context`], the [`Evaluator`] decides which
//! variation the context receives and why. Evaluation is deterministic, makes no network calls,
//! and never fails: malformed data is reported inside the returned [`EvaluationDetail`] as
//! [`Reason::Error`].
//!
//! Flags and segments referenced by prerequisites and segment-match clauses are looked up through
//! a [`DataProvider`]. [`FlagData`] is an in-memory snapshot that preprocesses everything it holds,
//! and [`DataStore`] lets a host swap snapshots while other threads evaluate.
//!
//! Segments with external membership ("big segments") are resolved through an optional
//! [`BigSegmentProvider`]. The health of that store is reported in
//! [`EvaluationDetail::big_segments_status`].
//!
//! Evaluations of prerequisite flags are reported to a [`PrerequisiteRecorder`], so the host can
//! produce analytics events for them.
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate with target `"flageval"`.
//! Malformed flags are logged at `warn` level and unexpected failures at `error` level; both can be
//! disabled through [`EvaluatorConfig::log_evaluation_errors`].

#![warn(rustdoc::missing_crate_level_docs)]

mod attr_ref;
mod big_segments;
mod bucketer;
mod context;
mod data_store;
mod error;
mod eval;
mod model;
mod operators;
mod preprocess;
mod prerequisite_recorder;

pub use attr_ref::{AttrRef, AttrRefError};
pub use big_segments::{
    segment_ref, BigSegmentMembership, BigSegmentProvider, BigSegmentsStatus,
    MemoryBigSegmentMembership,
};
pub use context::{Context, ContextBuilder, IndividualContext, DEFAULT_KIND};
pub use data_store::{DataProvider, DataStore, FlagData};
pub use error::{ContextError, Error, ErrorKind, Result};
pub use eval::eval_details::{EvaluationDetail, Reason};
pub use eval::{Evaluator, EvaluatorConfig};
pub use model::{
    Clause, Flag, FlagRule, Operator, Prerequisite, Rollout, RolloutKind, Segment, SegmentRule,
    SegmentTarget, Target, VariationOrRollout, WeightedVariation, WEIGHT_SCALE,
};
pub use preprocess::Preprocessed;
pub use prerequisite_recorder::{
    NoopPrerequisiteRecorder, PrerequisiteEvent, PrerequisiteRecorder,
};
