//! Condition evaluation and candidate filtering.
//!
//! A candidate matches when every one of its conditions holds. Evaluation
//! errors never escape: the offending condition simply does not hold.

use crate::error::EvaluationError;
use crate::model::{Condition, ConditionSource, Operator, ParsedCondition, ResponseCandidate};
use crate::regex_cache::RegexCache;
use crate::request::RequestView;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::debug;

/// Evaluates conditions against a [`RequestView`].
#[derive(Clone)]
pub struct ConditionEvaluator {
    regexes: Arc<RegexCache>,
}

impl ConditionEvaluator {
    pub fn new(regexes: Arc<RegexCache>) -> Self {
        Self { regexes }
    }

    /// Evaluate one condition. Errors count as "does not match".
    pub fn evaluate(&self, condition: &Condition, view: &RequestView) -> bool {
        match self.try_evaluate(condition, view) {
            Ok(matched) => matched,
            Err(e) => {
                debug!(
                    source = ?condition.source,
                    field = %condition.field,
                    error = %e,
                    "Condition evaluation failed"
                );
                false
            }
        }
    }

    /// Evaluate one condition, surfacing evaluation errors.
    pub fn try_evaluate(
        &self,
        condition: &Condition,
        view: &RequestView,
    ) -> Result<bool, EvaluationError> {
        let subject = match resolve_subject(condition, view) {
            Some(subject) => subject,
            None => return Ok(false),
        };

        match condition.operator {
            Operator::Equals => Ok(subject == condition.value),
            Operator::Contains => Ok(subject.contains(condition.value.as_str())),
            Operator::Regex => self.regexes.is_match(&condition.value, &subject),
        }
    }

    fn evaluate_slot(&self, slot: &ParsedCondition, view: &RequestView) -> bool {
        match slot {
            ParsedCondition::Valid(condition) => self.evaluate(condition, view),
            ParsedCondition::Malformed(reason) => {
                debug!(
                    error = %EvaluationError::MalformedCondition(reason.clone()),
                    "Skipping candidate with malformed condition"
                );
                false
            }
        }
    }

    /// Whether all of a candidate's conditions hold. Stops at the first
    /// failing condition; an empty list always matches.
    pub fn matches_candidate(&self, candidate: &ResponseCandidate, view: &RequestView) -> bool {
        candidate
            .conditions
            .iter()
            .all(|slot| self.evaluate_slot(slot, view))
    }

    /// Candidates whose conditions all hold, in their original order.
    pub fn filter_matching<'a>(
        &self,
        candidates: &'a [ResponseCandidate],
        view: &RequestView,
    ) -> Vec<&'a ResponseCandidate> {
        candidates
            .iter()
            .filter(|candidate| self.matches_candidate(candidate, view))
            .collect()
    }
}

/// Resolve the request value a condition talks about. `None` means the field
/// is absent, which fails the condition regardless of operator.
fn resolve_subject<'v>(condition: &Condition, view: &'v RequestView) -> Option<Cow<'v, str>> {
    match condition.source {
        ConditionSource::Header => view.header(&condition.field).map(Cow::Borrowed),
        ConditionSource::Query => view.query_param(&condition.field).map(Cow::Borrowed),
        ConditionSource::Path => view.path_param(&condition.field).map(Cow::Borrowed),
        ConditionSource::Body => resolve_body_field(&condition.field, view),
    }
}

/// JSON bodies are addressed by dot-path (`user.id`, `items.0.sku`); anything
/// else, or an empty field, compares against the raw body text.
fn resolve_body_field<'v>(field: &str, view: &'v RequestView) -> Option<Cow<'v, str>> {
    let field = field.trim();
    let json = match view.json() {
        Some(json) if !field.is_empty() => json,
        _ => return Some(Cow::Borrowed(view.body_text())),
    };

    match json.pointer(&dot_path_to_pointer(field))? {
        serde_json::Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        other => Some(Cow::Owned(other.to_string())),
    }
}

/// Convert `a.b.0` into the JSON pointer `/a/b/0`.
fn dot_path_to_pointer(path: &str) -> String {
    path.split('.')
        .map(|segment| segment.replace('~', "~0").replace('/', "~1"))
        .fold(String::new(), |mut pointer, segment| {
            pointer.push('/');
            pointer.push_str(&segment);
            pointer
        })
}
