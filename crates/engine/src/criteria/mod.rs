//! # Criteria Evaluation
//!
//! Evaluates structured conditions (`field` / `operator` / `value`) and
//! free-form expressions against a variable map, and extracts values for
//! captures and payloads.
//!
//! Structured conditions resolve `field` as a dotted path. A missing field
//! never matches, except under `greaterThan`/`lessThan`, which require numbers
//! and report an error instead.

pub mod expression;

use adapter_types::{ConditionOperator, ConditionSpec};
use serde_json::{Map, Value};
use thiserror::Error;

pub use expression::{Expression, ExpressionError, compare, type_name, values_equal};

use crate::{context::FieldEvaluation, field_paths};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CriteriaError {
    #[error("condition on '{field}' ({operator}): {reason}")]
    Condition { field: String, operator: String, reason: String },

    #[error("expression '{expression}' failed: {source}")]
    Expression {
        expression: String,
        #[source]
        source: ExpressionError,
    },
}

impl CriteriaError {
    fn condition(condition: &ConditionSpec, reason: impl Into<String>) -> Self {
        CriteriaError::Condition {
            field: condition.field.clone(),
            operator: condition.operator.as_str().to_string(),
            reason: reason.into(),
        }
    }
}

/// Outcome of evaluating a list of structured conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionsOutcome {
    /// True when every condition matched (vacuously true for an empty list).
    pub matched: bool,
    pub results: Vec<FieldEvaluation>,
}

/// Outcome of evaluating a boolean expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionOutcome {
    pub matched: bool,
    pub value: Value,
}

/// Evaluates criteria against a borrowed variable map.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    vars: &'a Map<String, Value>,
}

impl<'a> Evaluator<'a> {
    pub fn new(vars: &'a Map<String, Value>) -> Self {
        Self { vars }
    }

    pub fn vars(&self) -> &'a Map<String, Value> {
        self.vars
    }

    /// Resolves a dotted field path; `None` when any segment is missing.
    pub fn lookup(&self, path: &str) -> Option<&'a Value> {
        field_paths::lookup_in(self.vars, path)
    }

    /// Evaluates every condition; all must match.
    pub fn evaluate_conditions(&self, conditions: &[ConditionSpec]) -> Result<ConditionsOutcome, CriteriaError> {
        let mut results = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let actual = self.lookup(&condition.field);
            let matched = evaluate_operator(condition, actual)?;
            results.push(FieldEvaluation {
                field: condition.field.clone(),
                operator: condition.operator,
                expected: condition.value.clone(),
                actual: actual.cloned(),
                matched,
            });
        }
        Ok(ConditionsOutcome {
            matched: results.iter().all(|result| result.matched),
            results,
        })
    }

    /// Evaluates an expression; a result matches only when it is exactly `true`.
    pub fn evaluate_expression(&self, source: &str) -> Result<ExpressionOutcome, CriteriaError> {
        let value = self.evaluate_value(source)?;
        Ok(ExpressionOutcome {
            matched: value == Value::Bool(true),
            value,
        })
    }

    /// Evaluates an expression and returns its raw value.
    pub fn evaluate_value(&self, source: &str) -> Result<Value, CriteriaError> {
        expression::evaluate(source, self.vars).map_err(|source_error| CriteriaError::Expression {
            expression: source.to_string(),
            source: source_error,
        })
    }

    /// Extracts a value by plain field path, falling back to expression evaluation for anything else.
    ///
    /// A missing path yields `Ok(None)`; a failing expression yields an error.
    pub fn extract(&self, path_or_expression: &str) -> Result<Option<Value>, CriteriaError> {
        if field_paths::is_field_path(path_or_expression) {
            return Ok(self.lookup(path_or_expression).cloned());
        }
        self.evaluate_value(path_or_expression).map(Some)
    }
}

/// Applies a structured operator to the resolved field value.
pub fn evaluate_operator(condition: &ConditionSpec, actual: Option<&Value>) -> Result<bool, CriteriaError> {
    let expected = &condition.value;
    match condition.operator {
        ConditionOperator::Equals => Ok(actual.is_some_and(|value| values_equal(value, expected))),
        ConditionOperator::NotEquals => Ok(!actual.is_some_and(|value| values_equal(value, expected))),
        ConditionOperator::In => {
            let options = expected_list(condition)?;
            Ok(actual.is_some_and(|value| options.iter().any(|option| values_equal(value, option))))
        }
        ConditionOperator::NotIn => {
            let options = expected_list(condition)?;
            Ok(!actual.is_some_and(|value| options.iter().any(|option| values_equal(value, option))))
        }
        ConditionOperator::Contains => match actual {
            None | Some(Value::Null) => Ok(false),
            Some(Value::String(text)) => match expected {
                Value::String(needle) => Ok(text.contains(needle.as_str())),
                other => Err(CriteriaError::condition(condition, format!("cannot search a string for {}", type_name(other)))),
            },
            Some(Value::Array(items)) => Ok(items.iter().any(|item| values_equal(item, expected))),
            Some(Value::Object(map)) => match expected {
                Value::String(key) => Ok(map.contains_key(key)),
                other => Err(CriteriaError::condition(condition, format!("map keys are strings, got {}", type_name(other)))),
            },
            Some(other) => Err(CriteriaError::condition(condition, format!("{} is not a container", type_name(other)))),
        },
        ConditionOperator::GreaterThan | ConditionOperator::LessThan => {
            let Some(actual) = actual else {
                return Err(CriteriaError::condition(condition, "field is missing"));
            };
            if !actual.is_number() || !expected.is_number() {
                return Err(CriteriaError::condition(
                    condition,
                    format!("numeric comparison needs numbers, got {} and {}", type_name(actual), type_name(expected)),
                ));
            }
            let ordering = compare(actual, expected).ok_or_else(|| CriteriaError::condition(condition, "values are not comparable"))?;
            Ok(match condition.operator {
                ConditionOperator::GreaterThan => ordering.is_gt(),
                _ => ordering.is_lt(),
            })
        }
        ConditionOperator::Exists => Ok(actual.is_some_and(is_present)),
    }
}

/// A value "exists" when it is present and not empty.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn expected_list(condition: &ConditionSpec) -> Result<&[Value], CriteriaError> {
    match &condition.value {
        Value::Array(items) => Ok(items.as_slice()),
        other => Err(CriteriaError::condition(condition, format!("expected a list value, got {}", type_name(other)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Map<String, Value> {
        let Value::Object(map) = json!({
            "clusterStatus": {"phase": "Ready", "nodes": 5, "tags": ["gpu", "spot"], "labels": {"env": "prod"}, "note": ""},
            "provider": "aws"
        }) else {
            unreachable!()
        };
        map
    }

    fn condition(field: &str, operator: ConditionOperator, value: Value) -> ConditionSpec {
        ConditionSpec {
            field: field.into(),
            operator,
            value,
        }
    }

    fn check(field: &str, operator: ConditionOperator, value: Value) -> Result<bool, CriteriaError> {
        let vars = vars();
        let evaluator = Evaluator::new(&vars);
        evaluator
            .evaluate_conditions(&[condition(field, operator, value)])
            .map(|outcome| outcome.matched)
    }

    #[test]
    fn equality_operators() {
        assert!(check("clusterStatus.phase", ConditionOperator::Equals, json!("Ready")).unwrap());
        assert!(check("clusterStatus.nodes", ConditionOperator::Equals, json!(5.0)).unwrap());
        assert!(!check("clusterStatus.missing", ConditionOperator::Equals, json!("Ready")).unwrap());
        assert!(check("clusterStatus.missing", ConditionOperator::NotEquals, json!("Ready")).unwrap());
    }

    #[test]
    fn membership_operators() {
        assert!(check("provider", ConditionOperator::In, json!(["aws", "gcp"])).unwrap());
        assert!(check("provider", ConditionOperator::NotIn, json!(["azure"])).unwrap());
        assert!(check("provider", ConditionOperator::In, json!("aws")).is_err());
    }

    #[test]
    fn contains_works_on_strings_lists_and_maps() {
        assert!(check("clusterStatus.phase", ConditionOperator::Contains, json!("ead")).unwrap());
        assert!(check("clusterStatus.tags", ConditionOperator::Contains, json!("gpu")).unwrap());
        assert!(check("clusterStatus.labels", ConditionOperator::Contains, json!("env")).unwrap());
        assert!(!check("clusterStatus.missing", ConditionOperator::Contains, json!("x")).unwrap());
        assert!(check("clusterStatus.nodes", ConditionOperator::Contains, json!(1)).is_err());
    }

    #[test]
    fn numeric_comparisons_require_numbers() {
        assert!(check("clusterStatus.nodes", ConditionOperator::GreaterThan, json!(3)).unwrap());
        assert!(!check("clusterStatus.nodes", ConditionOperator::LessThan, json!(3)).unwrap());
        assert!(check("clusterStatus.phase", ConditionOperator::GreaterThan, json!(3)).is_err());
        assert!(check("clusterStatus.missing", ConditionOperator::LessThan, json!(3)).is_err());
    }

    #[test]
    fn exists_rejects_missing_and_empty() {
        assert!(check("clusterStatus.phase", ConditionOperator::Exists, Value::Null).unwrap());
        assert!(!check("clusterStatus.note", ConditionOperator::Exists, Value::Null).unwrap());
        assert!(!check("clusterStatus.missing", ConditionOperator::Exists, Value::Null).unwrap());
    }

    #[test]
    fn all_conditions_must_match_and_results_are_recorded() {
        let vars = vars();
        let evaluator = Evaluator::new(&vars);
        let outcome = evaluator
            .evaluate_conditions(&[
                condition("clusterStatus.phase", ConditionOperator::Equals, json!("Ready")),
                condition("provider", ConditionOperator::Equals, json!("gcp")),
            ])
            .unwrap();
        assert!(!outcome.matched);
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results[0].matched);
        assert_eq!(outcome.results[1].actual, Some(json!("aws")));
        assert!(evaluator.evaluate_conditions(&[]).unwrap().matched);
    }

    #[test]
    fn expressions_match_only_on_true() {
        let vars = vars();
        let evaluator = Evaluator::new(&vars);
        assert!(evaluator.evaluate_expression("clusterStatus.nodes > 3").unwrap().matched);
        let outcome = evaluator.evaluate_expression("clusterStatus.phase").unwrap();
        assert!(!outcome.matched);
        assert_eq!(outcome.value, json!("Ready"));
        assert!(evaluator.evaluate_expression("clusterStatus.nope == 1").is_err());
    }

    #[test]
    fn extract_prefers_paths_then_expressions() {
        let vars = vars();
        let evaluator = Evaluator::new(&vars);
        assert_eq!(evaluator.extract("clusterStatus.tags[1]").unwrap(), Some(json!("spot")));
        assert_eq!(evaluator.extract("clusterStatus.missing").unwrap(), None);
        assert_eq!(evaluator.extract("size(clusterStatus.tags)").unwrap(), Some(json!(2)));
        assert!(evaluator.extract("clusterStatus.missing + 1").is_err());
    }
}
