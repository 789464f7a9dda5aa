use std::collections::HashSet;

use crate::{
    attr_ref::AttrRef,
    big_segments::{segment_ref, BigSegmentsStatus},
    bucketer::compute_bucket_value,
    error::EvalError,
    model::{Segment, SegmentRule, SegmentTarget, WEIGHT_SCALE},
    preprocess::{contains_key, ClauseIndex, SegmentIndex},
};

use super::evaluator::EvalState;

impl<'a, 'r> EvalState<'a, 'r> {
    /// Return `true` if the current context is a member of `segment`.
    pub(super) fn segment_contains(&mut self, segment: &'a Segment) -> Result<bool, EvalError> {
        if self.segment_chain.contains(&segment.key.as_str()) {
            return Err(EvalError::CircularSegmentReference(segment.key.clone()));
        }
        if self.segment_chain.len() >= self.max_segment_depth {
            return Err(EvalError::SegmentDepthExceeded(self.max_segment_depth));
        }

        self.segment_chain.push(&segment.key);
        let index = self.preprocessed.and_then(|p| p.segment(segment));
        let result = if segment.unbounded {
            self.big_segment_contains(segment, index)
        } else {
            self.standard_segment_contains(segment, index)
        };
        self.segment_chain.pop();
        result
    }

    fn standard_segment_contains(
        &mut self,
        segment: &'a Segment,
        index: Option<&'a SegmentIndex>,
    ) -> Result<bool, EvalError> {
        if let Some(user) = self.context.individual(None) {
            if contains_key(index.map(|ix| &ix.included), &segment.included, user.key()) {
                return Ok(true);
            }
        }
        if self.any_target_contains(
            &segment.included_contexts,
            index.map(|ix| ix.included_contexts.as_slice()),
        ) {
            return Ok(true);
        }

        if let Some(user) = self.context.individual(None) {
            if contains_key(index.map(|ix| &ix.excluded), &segment.excluded, user.key()) {
                return Ok(false);
            }
        }
        if self.any_target_contains(
            &segment.excluded_contexts,
            index.map(|ix| ix.excluded_contexts.as_slice()),
        ) {
            return Ok(false);
        }

        self.segment_rules_match(segment, index)
    }

    fn any_target_contains(
        &self,
        targets: &[SegmentTarget],
        sets: Option<&[HashSet<String>]>,
    ) -> bool {
        targets.iter().enumerate().any(|(i, target)| {
            let Some(individual) = self.context.individual(target.context_kind.as_deref()) else {
                return false;
            };
            let set = sets.and_then(|sets| sets.get(i));
            contains_key(set, &target.values, individual.key())
        })
    }

    /// Membership comes from the big segment store; rules apply only when the store has no
    /// answer. Include and exclude lists are ignored.
    fn big_segment_contains(
        &mut self,
        segment: &'a Segment,
        index: Option<&'a SegmentIndex>,
    ) -> Result<bool, EvalError> {
        let Some(generation) = segment.generation else {
            self.merge_big_segments_status(BigSegmentsStatus::NotConfigured);
            return Ok(false);
        };
        let Some(individual) = self
            .context
            .individual(segment.unbounded_context_kind.as_deref())
        else {
            return Ok(false);
        };

        let segment_ref = segment_ref(&segment.key, generation);
        match self.check_big_segment_membership(individual.key(), &segment_ref) {
            Some(included) => Ok(included),
            None => self.segment_rules_match(segment, index),
        }
    }

    /// Query the store once per context key and evaluation; later checks reuse the answer.
    fn check_big_segment_membership(
        &mut self,
        context_key: &str,
        segment_ref: &str,
    ) -> Option<bool> {
        if !self.big_segment_memberships.contains_key(context_key) {
            let (membership, status) = match self.big_segment_provider {
                Some(provider) => provider.get_membership(context_key),
                None => (None, BigSegmentsStatus::NotConfigured),
            };
            self.merge_big_segments_status(status);
            self.big_segment_memberships
                .insert(context_key.to_owned(), membership);
        }

        self.big_segment_memberships
            .get(context_key)?
            .as_ref()?
            .check_membership(segment_ref)
    }

    fn merge_big_segments_status(&mut self, status: BigSegmentsStatus) {
        self.big_segments_status = Some(match self.big_segments_status {
            Some(previous) => previous.merge(status),
            None => status,
        });
    }

    fn segment_rules_match(
        &mut self,
        segment: &'a Segment,
        index: Option<&'a SegmentIndex>,
    ) -> Result<bool, EvalError> {
        for (i, rule) in segment.rules.iter().enumerate() {
            let clauses = index.and_then(|ix| ix.rules.get(i));
            if self.segment_rule_matches(segment, rule, clauses.map(Vec::as_slice))? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn segment_rule_matches(
        &mut self,
        segment: &'a Segment,
        rule: &'a SegmentRule,
        clauses: Option<&'a [ClauseIndex]>,
    ) -> Result<bool, EvalError> {
        if !self.clauses_match(&rule.clauses, clauses)? {
            return Ok(false);
        }
        let Some(weight) = rule.weight else {
            return Ok(true);
        };

        let context_kind = rule.rollout_context_kind.as_deref();
        let bucket_by = match &rule.bucket_by {
            Some(attr) => AttrRef::for_data(attr, context_kind),
            None => AttrRef::literal("key"),
        };
        let bucket = compute_bucket_value(
            None,
            &segment.key,
            self.context,
            context_kind,
            &bucket_by,
            &segment.salt,
        )?;
        Ok(bucket.value < weight as f64 / WEIGHT_SCALE)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use serde_json::{json, Value};

    use crate::{
        big_segments::{
            BigSegmentMembership, BigSegmentProvider, BigSegmentsStatus,
            MemoryBigSegmentMembership,
        },
        data_store::FlagData,
        error::ErrorKind,
        model::{Flag, Segment},
        prerequisite_recorder::NoopPrerequisiteRecorder,
        Context, EvaluationDetail, Evaluator, EvaluatorConfig, Reason,
    };

    struct TestStore {
        memberships: HashMap<String, MemoryBigSegmentMembership>,
        status: BigSegmentsStatus,
        queries: AtomicUsize,
    }

    impl TestStore {
        fn new(status: BigSegmentsStatus) -> TestStore {
            TestStore {
                memberships: HashMap::new(),
                status,
                queries: AtomicUsize::new(0),
            }
        }

        fn with(mut self, context_key: &str, membership: MemoryBigSegmentMembership) -> Self {
            self.memberships.insert(context_key.to_owned(), membership);
            self
        }
    }

    impl BigSegmentProvider for TestStore {
        fn get_membership(
            &self,
            context_key: &str,
        ) -> (Option<Box<dyn BigSegmentMembership>>, BigSegmentsStatus) {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let membership = self
                .memberships
                .get(context_key)
                .map(|m| Box::new(m.clone()) as Box<dyn BigSegmentMembership>);
            (membership, self.status)
        }
    }

    fn segment(value: Value) -> Segment {
        serde_json::from_value(value).unwrap()
    }

    /// Flag serving `true` to members of any of `segment_keys`.
    fn segment_flag(segment_keys: &[&str]) -> Flag {
        serde_json::from_value(json!({
            "key": "f",
            "on": true,
            "rules": [{
                "id": "in-segment",
                "clauses": [{"attribute": "", "op": "segmentMatch", "values": segment_keys}],
                "variation": 1
            }],
            "fallthrough": {"variation": 0},
            "variations": [false, true]
        }))
        .unwrap()
    }

    fn evaluate(
        segments: Vec<Segment>,
        segment_keys: &[&str],
        context: &Context,
        store: Option<&TestStore>,
    ) -> EvaluationDetail {
        let data = FlagData::new([], segments);
        let mut evaluator = Evaluator::new(&data);
        if let Some(store) = store {
            evaluator = evaluator.with_big_segments(store);
        }
        evaluator.evaluate(
            &segment_flag(segment_keys),
            context,
            &mut NoopPrerequisiteRecorder,
        )
    }

    fn user(key: &str) -> Context {
        Context::new(key).unwrap()
    }

    #[test]
    fn included_overrides_excluded() {
        let s = segment(json!({"key": "s", "included": ["u"], "excluded": ["u"]}));
        assert_eq!(evaluate(vec![s], &["s"], &user("u"), None).value, json!(true));
    }

    #[test]
    fn kind_scoped_lists() {
        let s = segment(json!({
            "key": "s",
            "includedContexts": [{"contextKind": "org", "values": ["acme"]}],
            "excludedContexts": [{"contextKind": "user", "values": ["u"]}],
            "rules": [{"clauses": []}]
        }));
        let org = Context::builder("acme").kind("org").build().unwrap();
        let multi = Context::multi([user("u"), org.clone()]).unwrap();
        assert_eq!(evaluate(vec![s.clone()], &["s"], &org, None).value, json!(true));
        assert_eq!(evaluate(vec![s.clone()], &["s"], &multi, None).value, json!(true));
        // Excluded wins over the catch-all rule.
        assert_eq!(evaluate(vec![s.clone()], &["s"], &user("u"), None).value, json!(false));
        assert_eq!(evaluate(vec![s], &["s"], &user("v"), None).value, json!(true));
    }

    #[test]
    fn weighted_rule_buckets_by_segment_key_and_salt() {
        // segkey.salty.userKeyA => 0.1457, segkey.salty.userKeyC => 0.6423
        let s = segment(json!({
            "key": "segkey",
            "salt": "salty",
            "rules": [{"clauses": [], "weight": 50000}]
        }));
        assert_eq!(evaluate(vec![s.clone()], &["segkey"], &user("userKeyA"), None).value, json!(true));
        assert_eq!(evaluate(vec![s], &["segkey"], &user("userKeyC"), None).value, json!(false));
    }

    #[test]
    fn weighted_rule_with_bucket_by_and_kind() {
        // The org key is what gets bucketed: segkey.salty.userKeyC => 0.6423
        let s = segment(json!({
            "key": "segkey",
            "salt": "salty",
            "rules": [{
                "clauses": [],
                "weight": 60000,
                "bucketBy": "/id",
                "rolloutContextKind": "org"
            }]
        }));
        let org = Context::builder("o")
            .kind("org")
            .set("id", "userKeyC")
            .build()
            .unwrap();
        let multi = Context::multi([user("userKeyA"), org]).unwrap();
        assert_eq!(evaluate(vec![s.clone()], &["segkey"], &multi, None).value, json!(false));
        // No org context: bucket 0, always inside the weight.
        assert_eq!(evaluate(vec![s], &["segkey"], &user("userKeyC"), None).value, json!(true));
    }

    #[test]
    fn negated_segment_match() {
        let s = segment(json!({"key": "s", "included": ["u"]}));
        let mut flag = segment_flag(&["s"]);
        flag.rules[0].clauses[0].negate = true;
        let data = FlagData::new([], [s]);
        let evaluator = Evaluator::new(&data);
        let detail = evaluator.evaluate(&flag, &user("u"), &mut NoopPrerequisiteRecorder);
        assert_eq!(detail.value, json!(false));
        let detail = evaluator.evaluate(&flag, &user("v"), &mut NoopPrerequisiteRecorder);
        assert_eq!(detail.value, json!(true));
    }

    #[test]
    fn nested_segments() {
        let outer = segment(json!({
            "key": "outer",
            "rules": [{"clauses": [{"attribute": "", "op": "segmentMatch", "values": ["inner"]}]}]
        }));
        let inner = segment(json!({"key": "inner", "included": ["u"]}));
        let segments = vec![outer, inner];
        assert_eq!(evaluate(segments.clone(), &["outer"], &user("u"), None).value, json!(true));
        assert_eq!(evaluate(segments, &["outer"], &user("v"), None).value, json!(false));
    }

    #[test]
    fn circular_segments_are_malformed() {
        let a = segment(json!({
            "key": "a",
            "rules": [{"clauses": [{"attribute": "", "op": "segmentMatch", "values": ["b"]}]}]
        }));
        let b = segment(json!({
            "key": "b",
            "rules": [{"clauses": [{"attribute": "", "op": "segmentMatch", "values": ["a"]}]}]
        }));
        let detail = evaluate(vec![a, b], &["a"], &user("u"), None);
        assert_eq!(
            detail.reason,
            Reason::Error {
                error_kind: ErrorKind::MalformedFlag
            }
        );
    }

    /// `s0` refers to `s1`, and so on; the last segment includes `u`.
    fn segment_chain(length: usize) -> Vec<Segment> {
        (0..length)
            .map(|i| {
                if i + 1 < length {
                    segment(json!({
                        "key": format!("s{i}"),
                        "rules": [{"clauses": [{
                            "attribute": "",
                            "op": "segmentMatch",
                            "values": [format!("s{}", i + 1)]
                        }]}]
                    }))
                } else {
                    segment(json!({"key": format!("s{i}"), "included": ["u"]}))
                }
            })
            .collect()
    }

    #[test]
    fn deep_segment_chains_are_bounded() {
        let malformed = Reason::Error {
            error_kind: ErrorKind::MalformedFlag,
        };
        assert_eq!(evaluate(segment_chain(4), &["s0"], &user("u"), None).value, json!(true));

        let data = FlagData::new([], segment_chain(4));
        let config = EvaluatorConfig {
            max_segment_depth: 2,
            log_evaluation_errors: false,
            ..EvaluatorConfig::default()
        };
        let detail = Evaluator::new(&data).with_config(config).evaluate(
            &segment_flag(&["s0"]),
            &user("u"),
            &mut NoopPrerequisiteRecorder,
        );
        assert_eq!(detail.reason, malformed);

        let detail = evaluate(segment_chain(500), &["s0"], &user("u"), None);
        assert_eq!(detail.reason, malformed);
    }

    #[test]
    fn big_segment_without_generation_is_not_configured() {
        let s = segment(json!({"key": "big", "unbounded": true, "rules": [{"clauses": []}]}));
        let store = TestStore::new(BigSegmentsStatus::Healthy)
            .with("u", MemoryBigSegmentMembership::from_refs(["big.g1"], Vec::<String>::new()));
        let detail = evaluate(vec![s], &["big"], &user("u"), Some(&store));
        assert_eq!(detail.value, json!(false));
        assert_eq!(detail.big_segments_status, Some(BigSegmentsStatus::NotConfigured));
        assert_eq!(store.queries.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn big_segment_store_answer_wins() {
        let s = segment(json!({
            "key": "big",
            "unbounded": true,
            "generation": 2,
            "included": ["u"],
            "rules": [{"clauses": []}]
        }));
        let store = TestStore::new(BigSegmentsStatus::Healthy)
            .with("u", MemoryBigSegmentMembership::from_refs(Vec::<String>::new(), ["big.g2"]))
            .with("v", MemoryBigSegmentMembership::from_refs(["big.g2"], Vec::<String>::new()));

        // Explicitly excluded despite the include list and the catch-all rule.
        let detail = evaluate(vec![s.clone()], &["big"], &user("u"), Some(&store));
        assert_eq!(detail.value, json!(false));
        assert_eq!(detail.big_segments_status, Some(BigSegmentsStatus::Healthy));

        let detail = evaluate(vec![s], &["big"], &user("v"), Some(&store));
        assert_eq!(detail.value, json!(true));
    }

    #[test]
    fn big_segment_falls_back_to_rules() {
        let s = segment(json!({
            "key": "big",
            "unbounded": true,
            "generation": 1,
            "rules": [{"clauses": [{"attribute": "plan", "op": "in", "values": ["pro"]}]}]
        }));
        let store = TestStore::new(BigSegmentsStatus::Stale)
            .with("u", MemoryBigSegmentMembership::from_refs(["big.g0"], Vec::<String>::new()));
        let pro = Context::builder("u").set("plan", "pro").build().unwrap();

        let detail = evaluate(vec![s.clone()], &["big"], &pro, Some(&store));
        assert_eq!(detail.value, json!(true));
        assert_eq!(detail.big_segments_status, Some(BigSegmentsStatus::Stale));

        // Unknown context key.
        let detail = evaluate(vec![s.clone()], &["big"], &user("w"), Some(&store));
        assert_eq!(detail.value, json!(false));

        // No store configured at all.
        let detail = evaluate(vec![s], &["big"], &pro, None);
        assert_eq!(detail.value, json!(true));
        assert_eq!(detail.big_segments_status, Some(BigSegmentsStatus::NotConfigured));
    }

    #[test]
    fn big_segment_store_queried_once_per_evaluation() {
        let first = segment(json!({"key": "first", "unbounded": true, "generation": 1}));
        let second = segment(json!({"key": "second", "unbounded": true, "generation": 1}));
        let store = TestStore::new(BigSegmentsStatus::Healthy)
            .with("u", MemoryBigSegmentMembership::from_refs(["second.g1"], Vec::<String>::new()));

        let detail = evaluate(vec![first, second], &["first", "second"], &user("u"), Some(&store));
        assert_eq!(detail.value, json!(true));
        assert_eq!(store.queries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn big_segment_context_kind() {
        let s = segment(json!({
            "key": "big",
            "unbounded": true,
            "unboundedContextKind": "org",
            "generation": 1
        }));
        let store = TestStore::new(BigSegmentsStatus::Healthy)
            .with("acme", MemoryBigSegmentMembership::from_refs(["big.g1"], Vec::<String>::new()));
        let org = Context::builder("acme").kind("org").build().unwrap();

        assert_eq!(evaluate(vec![s.clone()], &["big"], &org, Some(&store)).value, json!(true));
        let detail = evaluate(vec![s], &["big"], &user("acme"), Some(&store));
        assert_eq!(detail.value, json!(false));
        assert_eq!(detail.big_segments_status, None);
    }

    #[test]
    fn status_is_merged_across_segments() {
        let configured = segment(json!({"key": "configured", "unbounded": true, "generation": 1}));
        let unconfigured = segment(json!({"key": "unconfigured", "unbounded": true}));
        let store = TestStore::new(BigSegmentsStatus::Stale);
        let detail = evaluate(
            vec![configured, unconfigured],
            &["configured", "unconfigured"],
            &user("u"),
            Some(&store),
        );
        assert_eq!(detail.big_segments_status, Some(BigSegmentsStatus::NotConfigured));
    }
}
