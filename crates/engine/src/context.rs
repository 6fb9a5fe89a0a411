//! Mutable state threaded through the phases of one execution.
//!
//! Precondition responses, captured fields, and built payloads are all stored
//! in `params`, so later phases can reference them by name. Variables exposed
//! to templates and expressions are the params at top level, plus:
//!
//! - `adapter`: execution status and error details (see [`AdapterState`])
//! - `resources`: reconciled resource documents keyed by resource name

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use adapter_types::ConditionOperator;

use crate::{
    error::{ExecutionErrorInfo, ExecutorError},
    result::{ExecutionPhase, ExecutionStatus},
    scope::Correlation,
};

/// Result of one structured condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldEvaluation {
    pub field: String,
    pub operator: ConditionOperator,
    pub expected: Value,
    pub actual: Option<Value>,
    pub matched: bool,
}

/// Audit record of a precondition evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRecord {
    pub phase: ExecutionPhase,
    pub name: String,
    pub matched: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub field_results: Vec<FieldEvaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

/// Execution status snapshot exposed to templates and expressions as `adapter`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterState {
    pub name: String,
    pub execution_status: ExecutionStatus,
    pub resources_skipped: bool,
    pub skip_reason: Option<String>,
    pub error_reason: Option<String>,
    pub error_message: Option<String>,
    pub execution_error: Option<ExecutionErrorInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub event: Value,
    pub correlation: Correlation,
    pub params: Map<String, Value>,
    pub resources: Map<String, Value>,
    pub adapter: AdapterState,
    pub evaluations: Vec<EvaluationRecord>,
}

impl ExecutionContext {
    pub fn new(adapter_name: impl Into<String>, event: Value, correlation: Correlation) -> Self {
        Self {
            event,
            correlation,
            adapter: AdapterState {
                name: adapter_name.into(),
                ..AdapterState::default()
            },
            ..Self::default()
        }
    }

    /// Variables for templates and expressions.
    ///
    /// `adapter` and `resources` are added after params and therefore win on a name clash.
    pub fn evaluation_vars(&self) -> Map<String, Value> {
        let mut vars = self.params.clone();
        vars.insert("adapter".into(), serde_json::to_value(&self.adapter).unwrap_or(Value::Null));
        vars.insert("resources".into(), Value::Object(self.resources.clone()));
        vars
    }

    /// Stores a resource document. Each name is written once; a second write is rejected.
    pub fn record_resource(&mut self, name: &str, document: Value) -> bool {
        if self.resources.contains_key(name) {
            return false;
        }
        self.resources.insert(name.to_string(), document);
        true
    }

    /// Marks the execution failed and exposes the failure through `adapter.*`.
    pub fn record_failure(&mut self, error: &ExecutorError) {
        self.adapter.execution_status = ExecutionStatus::Failed;
        self.adapter.error_reason = Some(error.phase.error_reason().to_string());
        self.adapter.error_message = Some(error.message.clone());
        self.adapter.execution_error = Some(error.info());
    }

    pub fn skip_resources(&mut self, reason: impl Into<String>) {
        self.adapter.resources_skipped = true;
        self.adapter.skip_reason = Some(reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn evaluation_vars_expose_params_adapter_and_resources() {
        let mut context = ExecutionContext::new("cluster-adapter", json!({"id": "c1"}), Correlation::default());
        context.params.insert("clusterId".into(), json!("c1"));
        assert!(context.record_resource("ns", json!({"metadata": {"name": "ns-c1"}})));

        let vars = context.evaluation_vars();
        assert_eq!(vars["clusterId"], "c1");
        assert_eq!(vars["adapter"]["name"], "cluster-adapter");
        assert_eq!(vars["adapter"]["executionStatus"], "success");
        assert_eq!(vars["adapter"]["resourcesSkipped"], false);
        assert_eq!(vars["resources"]["ns"]["metadata"]["name"], "ns-c1");
    }

    #[test]
    fn resources_are_write_once() {
        let mut context = ExecutionContext::default();
        assert!(context.record_resource("ns", json!(1)));
        assert!(!context.record_resource("ns", json!(2)));
        assert_eq!(context.resources["ns"], json!(1));
    }

    #[test]
    fn failures_surface_through_adapter_state() {
        let mut context = ExecutionContext::default();
        let error = ExecutorError::new(ExecutionPhase::Resources, "ns", ErrorKind::Transport, "refused");
        context.record_failure(&error);
        context.skip_resources("not needed");

        let vars = context.evaluation_vars();
        assert_eq!(vars["adapter"]["executionStatus"], "failed");
        assert_eq!(vars["adapter"]["errorReason"], "ResourceReconciliationFailed");
        assert_eq!(vars["adapter"]["errorMessage"], "refused");
        assert_eq!(vars["adapter"]["executionError"]["step"], "ns");
        assert_eq!(vars["adapter"]["skipReason"], "not needed");
    }
}
