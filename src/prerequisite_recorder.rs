use serde::Serialize;

use crate::{model::Flag, Context, EvaluationDetail};

/// A prerequisite flag was evaluated on the way to evaluating another flag.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerequisiteEvent<'a> {
    /// Key of the flag that declared the prerequisite.
    pub target_flag_key: &'a str,
    #[serde(skip)]
    pub context: &'a Context,
    pub prerequisite_flag: &'a Flag,
    /// Result of evaluating the prerequisite flag itself.
    pub result: &'a EvaluationDetail,
}

/// Receives an event for every prerequisite evaluation, deepest prerequisites first.
///
/// Hosts use this to produce analytics events for prerequisite flags.
pub trait PrerequisiteRecorder {
    fn record(&mut self, event: PrerequisiteEvent<'_>);
}

/// Discards all events.
pub struct NoopPrerequisiteRecorder;
impl PrerequisiteRecorder for NoopPrerequisiteRecorder {
    fn record(&mut self, _event: PrerequisiteEvent<'_>) {}
}

impl<T: FnMut(PrerequisiteEvent<'_>)> PrerequisiteRecorder for T {
    fn record(&mut self, event: PrerequisiteEvent<'_>) {
        self(event);
    }
}
