use serde_json::Value;

use crate::{
    context::DEFAULT_KIND,
    error::EvalError,
    model::{Flag, VariationOrRollout},
    preprocess::{contains_key, FlagIndex},
};

use super::{
    eval_details::{EvaluationDetail, Reason},
    evaluator::EvalState,
};

impl<'a, 'r> EvalState<'a, 'r> {
    /// Evaluate `flag` for the current context.
    pub(super) fn eval_flag(&mut self, flag: &'a Flag) -> Result<EvaluationDetail, EvalError> {
        if !flag.on {
            return flag.off_detail(Reason::Off);
        }

        if let Some(prerequisite_key) = self.check_prerequisites(flag)? {
            return flag.off_detail(Reason::PrerequisiteFailed { prerequisite_key });
        }

        let index = self.preprocessed.and_then(|p| p.flag(flag));

        if let Some(variation) = self.matching_target(flag, index) {
            return flag.variation_detail(variation, Reason::TargetMatch);
        }

        for (rule_index, rule) in flag.rules.iter().enumerate() {
            let clauses = index.and_then(|ix| ix.rules.get(rule_index));
            if self.clauses_match(&rule.clauses, clauses.map(Vec::as_slice))? {
                let (variation, in_experiment) =
                    self.resolve_variation(flag, &rule.variation_or_rollout)?;
                return flag.variation_detail(
                    variation,
                    Reason::RuleMatch {
                        rule_index,
                        rule_id: rule.id.clone(),
                        in_experiment,
                    },
                );
            }
        }

        let (variation, in_experiment) = self.resolve_variation(flag, &flag.fallthrough)?;
        flag.variation_detail(variation, Reason::Fallthrough { in_experiment })
    }

    /// Find the variation of the first target listing the context.
    ///
    /// Kind-scoped targets are checked in order when present. A default-kind entry with no
    /// values stands for the legacy target list with the same variation.
    fn matching_target(&self, flag: &Flag, index: Option<&FlagIndex>) -> Option<usize> {
        let legacy_target_matches = |variation: usize| -> bool {
            let Some(user) = self.context.individual(None) else {
                return false;
            };
            flag.targets
                .iter()
                .enumerate()
                .filter(|(_, target)| target.variation == variation)
                .any(|(i, target)| {
                    let set = index.and_then(|ix| ix.targets.get(i));
                    contains_key(set, &target.values, user.key())
                })
        };

        if flag.context_targets.is_empty() {
            return flag
                .targets
                .iter()
                .map(|target| target.variation)
                .find(|&variation| legacy_target_matches(variation));
        }

        flag.context_targets
            .iter()
            .enumerate()
            .find(|(i, target)| {
                let kind = target
                    .context_kind
                    .as_deref()
                    .filter(|kind| !kind.is_empty())
                    .unwrap_or(DEFAULT_KIND);
                if kind == DEFAULT_KIND && target.values.is_empty() {
                    return legacy_target_matches(target.variation);
                }
                match self.context.individual(Some(kind)) {
                    Some(individual) => {
                        let set = index.and_then(|ix| ix.context_targets.get(*i));
                        contains_key(set, &target.values, individual.key())
                    }
                    None => false,
                }
            })
            .map(|(_, target)| target.variation)
    }

    /// Returns the variation index and whether the context takes part in an experiment.
    fn resolve_variation(
        &self,
        flag: &Flag,
        variation_or_rollout: &VariationOrRollout,
    ) -> Result<(usize, bool), EvalError> {
        match variation_or_rollout {
            VariationOrRollout::Variation(variation) => Ok((*variation, false)),
            VariationOrRollout::Rollout(rollout) => {
                let result = rollout.resolve(&flag.key, &flag.salt, self.context)?;
                Ok((result.variation, result.in_experiment))
            }
        }
    }
}

impl Flag {
    fn variation_detail(
        &self,
        variation: usize,
        reason: Reason,
    ) -> Result<EvaluationDetail, EvalError> {
        let value = self
            .variations
            .get(variation)
            .ok_or(EvalError::BadVariation(variation))?;
        Ok(EvaluationDetail::new(value.clone(), Some(variation), reason))
    }

    /// Serve the off variation, or no value if the flag has none.
    fn off_detail(&self, reason: Reason) -> Result<EvaluationDetail, EvalError> {
        match self.off_variation {
            Some(variation) => self.variation_detail(variation, reason),
            None => Ok(EvaluationDetail::new(Value::Null, None, reason)),
        }
    }
}
