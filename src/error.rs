use serde::{Deserialize, Serialize};

use crate::attr_ref::AttrRefError;

/// Represents a result type for fallible operations of this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors returned by the public API.
///
/// Note that flag evaluation itself never returns `Error`: evaluation problems are reported inside
/// [`EvaluationDetail`](crate::EvaluationDetail) as [`Reason::Error`](crate::Reason::Error).
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// Context could not be constructed.
    #[error(transparent)]
    InvalidContext(#[from] ContextError),
}

/// Reasons a [`Context`](crate::Context) cannot be built.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContextError {
    #[error("context key must not be empty")]
    EmptyKey,
    #[error("invalid context kind {0:?}")]
    InvalidKind(String),
    #[error("multi-kind context must contain at least one context")]
    EmptyMultiKind,
    #[error("context kind {0:?} appears more than once in a multi-kind context")]
    DuplicateKind(String),
}

/// Malformed data encountered during evaluation.
///
/// Any of these aborts the whole evaluation: the caller gets a null value with
/// `Reason::Error { error_kind: ErrorKind::MalformedFlag }`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum EvalError {
    #[error("variation index {0} is out of range")]
    BadVariation(usize),
    #[error("clause or rollout has an empty attribute reference")]
    EmptyAttributeRef,
    #[error("invalid attribute reference {0:?}")]
    BadAttributeRef(String),
    #[error("rollout or experiment has no variations")]
    EmptyRollout,
    #[error("prerequisite relationship to {0:?} caused a circular reference")]
    CircularPrerequisiteReference(String),
    #[error("segment rule referencing segment {0:?} caused a circular reference")]
    CircularSegmentReference(String),
    #[error("prerequisite chain is deeper than {0} flags")]
    PrerequisiteDepthExceeded(usize),
    #[error("segment references are nested deeper than {0} segments")]
    SegmentDepthExceeded(usize),
}

impl EvalError {
    pub(crate) fn from_attr_ref(raw: &str, err: AttrRefError) -> EvalError {
        match err {
            AttrRefError::Empty => EvalError::EmptyAttributeRef,
            AttrRefError::Invalid => EvalError::BadAttributeRef(raw.to_owned()),
        }
    }

    pub(crate) fn error_kind(&self) -> ErrorKind {
        // Every variant describes bad input data.
        ErrorKind::MalformedFlag
    }
}

/// Error category reported in [`Reason::Error`](crate::Reason::Error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Flag or segment data is invalid (bad variation index, bad attribute reference, empty
    /// rollout, circular reference). Should be investigated as bad configuration.
    MalformedFlag,
    /// The requested flag key does not exist or has been deleted.
    FlagNotFound,
    /// Unexpected internal failure, e.g., a caller-supplied provider panicked.
    Exception,
}
