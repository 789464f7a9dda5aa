use std::{
    any::Any,
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
};

use crate::{
    big_segments::{BigSegmentMembership, BigSegmentProvider, BigSegmentsStatus},
    data_store::DataProvider,
    error::ErrorKind,
    model::Flag,
    preprocess::Preprocessed,
    prerequisite_recorder::PrerequisiteRecorder,
    Context,
};

use super::eval_details::EvaluationDetail;

/// Evaluator settings.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Log malformed flags (at `warn`) and internal failures (at `error`). Defaults to `true`.
    pub log_evaluation_errors: bool,
    /// Longest allowed chain of flags with prerequisites. Deeper chains are reported as malformed.
    /// Defaults to 100.
    pub max_prerequisite_depth: usize,
    /// Longest allowed chain of segments referencing other segments. Deeper chains are reported as
    /// malformed. Defaults to 100.
    pub max_segment_depth: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig {
            log_evaluation_errors: true,
            max_prerequisite_depth: 100,
            max_segment_depth: 100,
        }
    }
}

/// Evaluates flags against contexts.
///
/// Prerequisite flags and segments referenced by a flag are looked up through the
/// [`DataProvider`]. Evaluation never fails: problems are reported in the returned
/// [`EvaluationDetail`].
///
/// ```
/// # use flageval::{Context, Evaluator, FlagData, NoopPrerequisiteRecorder, Reason};
/// let flag = serde_json::from_value(serde_json::json!({
///     "key": "new-checkout",
///     "on": true,
///     "fallthrough": {"variation": 1},
///     "offVariation": 0,
///     "variations": [false, true]
/// }))
/// .unwrap();
/// let data = FlagData::new([flag], []);
/// let evaluator = Evaluator::new(&data);
///
/// let context = Context::new("user-1").unwrap();
/// let detail = evaluator.evaluate_key("new-checkout", &context, &mut NoopPrerequisiteRecorder);
/// assert_eq!(detail.value, serde_json::json!(true));
/// assert_eq!(detail.reason, Reason::Fallthrough { in_experiment: false });
/// ```
#[derive(Clone)]
pub struct Evaluator<'a> {
    data: &'a dyn DataProvider,
    big_segments: Option<&'a dyn BigSegmentProvider>,
    config: EvaluatorConfig,
}

impl<'a> Evaluator<'a> {
    pub fn new(data: &'a dyn DataProvider) -> Evaluator<'a> {
        Evaluator {
            data,
            big_segments: None,
            config: EvaluatorConfig::default(),
        }
    }

    pub fn with_big_segments(mut self, provider: &'a dyn BigSegmentProvider) -> Evaluator<'a> {
        self.big_segments = Some(provider);
        self
    }

    pub fn with_config(mut self, config: EvaluatorConfig) -> Evaluator<'a> {
        self.config = config;
        self
    }

    /// Evaluate `flag` for `context`, reporting every prerequisite evaluation to `recorder`.
    pub fn evaluate(
        &self,
        flag: &Flag,
        context: &Context,
        recorder: &mut dyn PrerequisiteRecorder,
    ) -> EvaluationDetail {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut state = EvalState {
                data: self.data,
                preprocessed: self.data.preprocessed(),
                big_segment_provider: self.big_segments,
                max_prerequisite_depth: self.config.max_prerequisite_depth,
                max_segment_depth: self.config.max_segment_depth,
                context,
                recorder,
                prerequisite_chain: Vec::new(),
                segment_chain: Vec::new(),
                big_segment_memberships: HashMap::new(),
                big_segments_status: None,
            };
            let result = state.eval_flag(flag);
            (result, state.big_segments_status)
        }));

        let flag_key = flag.key.as_str();
        match result {
            Ok((Ok(mut detail), big_segments_status)) => {
                detail.big_segments_status = big_segments_status;
                log::trace!(target: "flageval",
                            flag_key,
                            context_key:display = context.fully_qualified_key(),
                            variation_index:serde = detail.variation_index,
                            reason:serde = detail.reason;
                            "evaluated a flag");
                detail
            }

            Ok((Err(err), _)) => {
                if self.config.log_evaluation_errors {
                    log::warn!(target: "flageval",
                               flag_key,
                               context_key:display = context.fully_qualified_key();
                               "invalid flag configuration: {err}");
                }
                EvaluationDetail::error(err.error_kind())
            }

            Err(payload) => {
                self.log_panic(flag_key, payload.as_ref());
                EvaluationDetail::error(ErrorKind::Exception)
            }
        }
    }

    /// Look up the flag by key and evaluate it. Unknown and deleted flags produce
    /// `ERROR(FLAG_NOT_FOUND)`.
    pub fn evaluate_key(
        &self,
        flag_key: &str,
        context: &Context,
        recorder: &mut dyn PrerequisiteRecorder,
    ) -> EvaluationDetail {
        match panic::catch_unwind(AssertUnwindSafe(|| self.data.get_flag(flag_key))) {
            Ok(Some(flag)) => self.evaluate(flag, context, recorder),
            Ok(None) => {
                log::debug!(target: "flageval", flag_key; "unknown flag");
                EvaluationDetail::error(ErrorKind::FlagNotFound)
            }
            Err(payload) => {
                self.log_panic(flag_key, payload.as_ref());
                EvaluationDetail::error(ErrorKind::Exception)
            }
        }
    }

    fn log_panic(&self, flag_key: &str, payload: &(dyn Any + Send)) {
        if !self.config.log_evaluation_errors {
            return;
        }
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("unknown panic");
        log::error!(target: "flageval",
                    flag_key;
                    "unexpected failure while evaluating a flag: {message}");
    }
}

/// Working state of one top-level evaluation. Never shared between evaluations.
pub(super) struct EvalState<'a, 'r> {
    pub data: &'a dyn DataProvider,
    pub preprocessed: Option<&'a Preprocessed>,
    pub big_segment_provider: Option<&'a dyn BigSegmentProvider>,
    pub max_prerequisite_depth: usize,
    pub max_segment_depth: usize,
    pub context: &'a Context,
    pub recorder: &'r mut dyn PrerequisiteRecorder,
    /// Keys of the flags whose prerequisites are being evaluated, outermost first.
    pub prerequisite_chain: Vec<&'a str>,
    /// Keys of the segments being evaluated, outermost first.
    pub segment_chain: Vec<&'a str>,
    /// Big segment memberships fetched so far, by context key.
    pub big_segment_memberships: HashMap<String, Option<Box<dyn BigSegmentMembership>>>,
    pub big_segments_status: Option<BigSegmentsStatus>,
}
