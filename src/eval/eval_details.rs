use serde::Serialize;
use serde_json::Value;

use crate::{big_segments::BigSegmentsStatus, error::ErrorKind};

/// Why a flag evaluated to its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(
    tag = "kind",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Reason {
    /// The flag is off.
    Off,
    /// The context key is in one of the flag's target lists.
    TargetMatch,
    /// The context matched the rule at `rule_index`.
    RuleMatch {
        rule_index: usize,
        rule_id: String,
        /// The value was picked by an experiment and the context counts as a participant.
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        in_experiment: bool,
    },
    /// A prerequisite was not met, so the off variation is served.
    PrerequisiteFailed { prerequisite_key: String },
    /// No target or rule matched.
    Fallthrough {
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        in_experiment: bool,
    },
    /// The flag could not be evaluated. The value is null.
    Error { error_kind: ErrorKind },
}

impl Reason {
    pub fn is_in_experiment(&self) -> bool {
        matches!(
            self,
            Reason::RuleMatch {
                in_experiment: true,
                ..
            } | Reason::Fallthrough {
                in_experiment: true
            }
        )
    }
}

/// Result of evaluating a flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDetail {
    /// Value of the selected variation, or `Null` if none was selected.
    pub value: Value,
    pub variation_index: Option<usize>,
    pub reason: Reason,
    /// Set if any big segment was consulted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub big_segments_status: Option<BigSegmentsStatus>,
}

impl EvaluationDetail {
    pub(crate) fn new(value: Value, variation_index: Option<usize>, reason: Reason) -> Self {
        EvaluationDetail {
            value,
            variation_index,
            reason,
            big_segments_status: None,
        }
    }

    pub(crate) fn error(error_kind: ErrorKind) -> Self {
        EvaluationDetail::new(Value::Null, None, Reason::Error { error_kind })
    }

    /// Return `true` if no variation was selected and the caller's default should be served.
    pub fn is_default_value(&self) -> bool {
        self.variation_index.is_none()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{EvaluationDetail, Reason};
    use crate::{big_segments::BigSegmentsStatus, error::ErrorKind};

    #[test]
    fn reason_serialization() {
        assert_eq!(serde_json::to_value(Reason::Off).unwrap(), json!({"kind": "OFF"}));
        assert_eq!(
            serde_json::to_value(Reason::RuleMatch {
                rule_index: 1,
                rule_id: "r".into(),
                in_experiment: true
            })
            .unwrap(),
            json!({"kind": "RULE_MATCH", "ruleIndex": 1, "ruleId": "r", "inExperiment": true})
        );
        assert_eq!(
            serde_json::to_value(Reason::Fallthrough {
                in_experiment: false
            })
            .unwrap(),
            json!({"kind": "FALLTHROUGH"})
        );
        assert_eq!(
            serde_json::to_value(Reason::PrerequisiteFailed {
                prerequisite_key: "p".into()
            })
            .unwrap(),
            json!({"kind": "PREREQUISITE_FAILED", "prerequisiteKey": "p"})
        );
        assert_eq!(
            serde_json::to_value(Reason::Error {
                error_kind: ErrorKind::MalformedFlag
            })
            .unwrap(),
            json!({"kind": "ERROR", "errorKind": "MALFORMED_FLAG"})
        );
    }

    #[test]
    fn detail_serialization() {
        let mut detail = EvaluationDetail::new(json!("on"), Some(2), Reason::TargetMatch);
        assert_eq!(
            serde_json::to_value(&detail).unwrap(),
            json!({"value": "on", "variationIndex": 2, "reason": {"kind": "TARGET_MATCH"}})
        );
        detail.big_segments_status = Some(BigSegmentsStatus::Stale);
        assert_eq!(
            serde_json::to_value(&detail).unwrap()["bigSegmentsStatus"],
            json!("STALE")
        );
    }

    #[test]
    fn error_detail_is_default_value() {
        let detail = EvaluationDetail::error(ErrorKind::Exception);
        assert!(detail.is_default_value());
        assert_eq!(detail.value, json!(null));
        assert!(!detail.reason.is_in_experiment());
    }
}
