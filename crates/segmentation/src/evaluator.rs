//! Predicate evaluator: decides whether a record belongs to a rule tree.
//!
//! Two fixed fallbacks apply and must not be conflated:
//! * a record without the referenced field never satisfies the condition
//!   (`false`), since missing data cannot match;
//! * an engine-side anomaly (unknown operator, uncoercible operand) resolves
//!   the condition to `true` so an engine defect never silently drops a
//!   customer from an audience. Anomalies go to an [`AnomalySink`].

use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use crm_core::{EmptyGroupPolicy, SegmentationConfig};
use serde_json::Value;
use tracing::{debug, warn};

use crate::operators::{Operator, OperatorKind};
use crate::records::Record;
use crate::rules::{Condition, ConditionValue, Group, Logic, RuleNode};
use crate::value::{self, Uncoercible};

#[derive(Debug, Clone, PartialEq)]
pub enum AnomalyKind {
    MissingField,
    UnknownOperator(String),
    Coercion(String),
    MalformedRange,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::UnknownOperator(_) => "unknown_operator",
            Self::Coercion(_) => "coercion",
            Self::MalformedRange => "malformed_range",
        }
    }

    /// Value the affected condition resolves to.
    pub fn outcome(&self) -> bool {
        match self {
            Self::MissingField | Self::MalformedRange => false,
            Self::UnknownOperator(_) | Self::Coercion(_) => true,
        }
    }
}

/// Data-quality signal raised while evaluating one condition.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationAnomaly {
    pub condition_id: String,
    pub field: String,
    pub kind: AnomalyKind,
}

/// Observability sink for evaluation anomalies.
pub trait AnomalySink: Send + Sync {
    fn report(&self, anomaly: EvaluationAnomaly);
}

/// Logs anomalies and counts them by kind.
pub struct TracingSink;

impl AnomalySink for TracingSink {
    fn report(&self, anomaly: EvaluationAnomaly) {
        metrics::counter!("segmentation.anomalies", "kind" => anomaly.kind.as_str()).increment(1);
        match &anomaly.kind {
            AnomalyKind::MissingField => debug!(
                condition_id = %anomaly.condition_id,
                field = %anomaly.field,
                "record has no value for field"
            ),
            other => warn!(
                condition_id = %anomaly.condition_id,
                field = %anomaly.field,
                kind = other.as_str(),
                detail = ?other,
                "rule evaluation anomaly"
            ),
        }
    }
}

/// In-memory sink that captures anomalies for testing.
#[derive(Default)]
pub struct CaptureSink {
    anomalies: Mutex<Vec<EvaluationAnomaly>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn anomalies(&self) -> Vec<EvaluationAnomaly> {
        self.captured().clone()
    }

    /// A panic while the lock was held leaves the captured list intact.
    fn captured(&self) -> MutexGuard<'_, Vec<EvaluationAnomaly>> {
        self.anomalies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.captured()
            .iter()
            .filter(|a| a.kind.as_str() == kind)
            .count()
    }
}

impl AnomalySink for CaptureSink {
    fn report(&self, anomaly: EvaluationAnomaly) {
        self.captured().push(anomaly);
    }
}

pub(crate) fn empty_group_outcome(policy: EmptyGroupPolicy, logic: Logic) -> bool {
    match (policy, logic) {
        (EmptyGroupPolicy::Inclusive, _) | (EmptyGroupPolicy::Vacuous, Logic::And) => true,
        (EmptyGroupPolicy::Vacuous, Logic::Or) => false,
    }
}

/// Evaluates rule trees against records. Holds no per-call state.
#[derive(Clone)]
pub struct Evaluator {
    sink: Arc<dyn AnomalySink>,
    empty_group: EmptyGroupPolicy,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl Evaluator {
    pub fn new(sink: Arc<dyn AnomalySink>) -> Self {
        Self {
            sink,
            empty_group: EmptyGroupPolicy::default(),
        }
    }

    pub fn from_config(config: &SegmentationConfig, sink: Arc<dyn AnomalySink>) -> Self {
        Self::new(sink).with_empty_group_policy(config.empty_group_policy)
    }

    pub fn with_empty_group_policy(mut self, policy: EmptyGroupPolicy) -> Self {
        self.empty_group = policy;
        self
    }

    pub fn empty_group_policy(&self) -> EmptyGroupPolicy {
        self.empty_group
    }

    pub fn evaluate(&self, tree: &Group, record: &Record) -> bool {
        if tree.children.is_empty() {
            return empty_group_outcome(self.empty_group, tree.logic);
        }
        match tree.logic {
            Logic::And => tree.children.iter().all(|c| self.evaluate_node(c, record)),
            Logic::Or => tree.children.iter().any(|c| self.evaluate_node(c, record)),
        }
    }

    pub fn evaluate_node(&self, node: &RuleNode, record: &Record) -> bool {
        match node {
            RuleNode::Group(g) => self.evaluate(g, record),
            RuleNode::Condition(c) => self.evaluate_condition(c, record),
        }
    }

    pub fn evaluate_condition(&self, condition: &Condition, record: &Record) -> bool {
        let outcome = match record.get(&condition.field) {
            None => Err(AnomalyKind::MissingField),
            Some(actual) => compare(&condition.operator, &condition.value, actual),
        };
        outcome.unwrap_or_else(|kind| {
            let resolved = kind.outcome();
            self.sink.report(EvaluationAnomaly {
                condition_id: condition.id.clone(),
                field: condition.field.clone(),
                kind,
            });
            resolved
        })
    }

    /// Records matching `tree`, in input order.
    pub fn filter<'a, I>(&self, tree: &Group, records: I) -> Vec<&'a Record>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        records
            .into_iter()
            .filter(|r| self.evaluate(tree, r))
            .collect()
    }
}

/// Evaluate with the default policy, reporting anomalies through `tracing`.
pub fn evaluate(tree: &Group, record: &Record) -> bool {
    Evaluator::default().evaluate(tree, record)
}

impl From<Uncoercible> for AnomalyKind {
    fn from(err: Uncoercible) -> Self {
        Self::Coercion(err.0)
    }
}

/// Apply `op` to a present record value.
pub(crate) fn compare(
    op: &Operator,
    expected: &ConditionValue,
    actual: &Value,
) -> Result<bool, AnomalyKind> {
    match op.kind() {
        OperatorKind::Unknown => Err(AnomalyKind::UnknownOperator(op.to_string())),
        OperatorKind::Text => {
            let actual = value::folded_text(actual)?;
            let expected = expected.folded_text()?;
            Ok(text_matches(op, &actual, &expected))
        }
        OperatorKind::Numeric => {
            let actual = value::json_number(actual)?;
            let expected = expected.number()?;
            Ok(match (actual, expected) {
                (Some(a), Some(e)) => ordering_matches(op, a.partial_cmp(&e)),
                _ => false,
            })
        }
        OperatorKind::Date => {
            let actual = value::json_date(actual)?;
            let expected = expected.date()?;
            Ok(match (actual, expected) {
                (Some(a), Some(e)) => ordering_matches(op, Some(a.cmp(&e))),
                _ => false,
            })
        }
        OperatorKind::Range => {
            let (start, end) = expected.range_bounds().ok_or(AnomalyKind::MalformedRange)?;
            let actual = value::json_date(actual)?;
            Ok(within(actual, value::parse_date(&start), value::parse_date(&end)))
        }
    }
}

pub(crate) fn text_matches(op: &Operator, actual: &str, expected: &str) -> bool {
    match op {
        Operator::Equals => actual == expected,
        Operator::NotEquals => actual != expected,
        Operator::Contains => actual.contains(expected),
        Operator::StartsWith => actual.starts_with(expected),
        Operator::EndsWith => actual.ends_with(expected),
        _ => false,
    }
}

pub(crate) fn ordering_matches(op: &Operator, ord: Option<Ordering>) -> bool {
    let Some(ord) = ord else {
        return false;
    };
    match op {
        Operator::GreaterThan | Operator::After => ord == Ordering::Greater,
        Operator::LessThan | Operator::Before => ord == Ordering::Less,
        Operator::GreaterEqual => ord != Ordering::Less,
        Operator::LessEqual => ord != Ordering::Greater,
        _ => false,
    }
}

/// Inclusive at both ends; any unparseable date fails the match.
pub(crate) fn within(
    actual: Option<DateTime<Utc>>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> bool {
    match (actual, start, end) {
        (Some(d), Some(s), Some(e)) => s <= d && d <= e,
        _ => false,
    }
}
