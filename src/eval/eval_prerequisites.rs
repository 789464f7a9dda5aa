use crate::{
    error::EvalError,
    model::Flag,
    prerequisite_recorder::PrerequisiteEvent,
};

use super::evaluator::EvalState;

impl<'a, 'r> EvalState<'a, 'r> {
    /// Evaluate the prerequisites of `flag` in order, stopping at the first one that is not met.
    ///
    /// Returns the key of the failed prerequisite, or `None` if all are met. Malformed prerequisite
    /// flags, circular references, and chains deeper than the configured limit abort the whole
    /// evaluation without recording an event for the failed branch.
    pub(super) fn check_prerequisites(
        &mut self,
        flag: &'a Flag,
    ) -> Result<Option<String>, EvalError> {
        if flag.prerequisites.is_empty() {
            return Ok(None);
        }
        if self.prerequisite_chain.len() >= self.max_prerequisite_depth {
            return Err(EvalError::PrerequisiteDepthExceeded(
                self.max_prerequisite_depth,
            ));
        }

        self.prerequisite_chain.push(&flag.key);
        let result = self.check_prerequisites_in_chain(flag);
        self.prerequisite_chain.pop();
        result
    }

    fn check_prerequisites_in_chain(
        &mut self,
        flag: &'a Flag,
    ) -> Result<Option<String>, EvalError> {
        for prerequisite in &flag.prerequisites {
            if self.prerequisite_chain.contains(&prerequisite.key.as_str()) {
                return Err(EvalError::CircularPrerequisiteReference(
                    prerequisite.key.clone(),
                ));
            }

            let Some(prerequisite_flag) = self.data.get_flag(&prerequisite.key) else {
                return Ok(Some(prerequisite.key.clone()));
            };

            // Any malformed data below this point aborts the whole evaluation.
            let detail = self.eval_flag(prerequisite_flag)?;

            let met = prerequisite_flag.on && detail.variation_index == Some(prerequisite.variation);

            self.recorder.record(PrerequisiteEvent {
                target_flag_key: &flag.key,
                context: self.context,
                prerequisite_flag,
                result: &detail,
            });

            if !met {
                return Ok(Some(prerequisite.key.clone()));
            }
        }
        Ok(None)
    }
}
