//! Execution results returned to the caller.
//!
//! Outcome is reported on two axes: [`ExecutionStatus`] says whether the run
//! itself succeeded, while [`ExecutionResult::resources_skipped`] says whether
//! the resources phase was bypassed (for example because a precondition was
//! not met). A skipped run can still be a successful one.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{context::FieldEvaluation, error::ExecutionErrorInfo};

/// Phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    ParamExtraction,
    Preconditions,
    Resources,
    PostActions,
}

impl ExecutionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPhase::ParamExtraction => "param_extraction",
            ExecutionPhase::Preconditions => "preconditions",
            ExecutionPhase::Resources => "resources",
            ExecutionPhase::PostActions => "post_actions",
        }
    }

    /// Reason code exposed as `adapter.errorReason` when this phase fails.
    pub fn error_reason(&self) -> &'static str {
        match self {
            ExecutionPhase::ParamExtraction => "ParameterExtractionFailed",
            ExecutionPhase::Preconditions => "PreconditionEvaluationFailed",
            ExecutionPhase::Resources => "ResourceReconciliationFailed",
            ExecutionPhase::PostActions => "PostActionFailed",
        }
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action chosen for a resource after comparing generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceOperation {
    Create,
    Update,
    Recreate,
    Skip,
}

impl fmt::Display for ResourceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResourceOperation::Create => "create",
            ResourceOperation::Update => "update",
            ResourceOperation::Recreate => "recreate",
            ResourceOperation::Skip => "skip",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreconditionResult {
    pub name: String,
    pub status: ExecutionStatus,
    pub matched: bool,
    pub api_call_made: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_response: Option<Value>,
    pub captured_fields: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub condition_results: Vec<FieldEvaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression_result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceResult {
    pub name: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub resource_name: String,
    pub status: ExecutionStatus,
    /// `None` when the resource failed before an operation was decided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<ResourceOperation>,
    pub operation_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostActionResult {
    pub name: String,
    pub status: ExecutionStatus,
    pub api_call_made: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full outcome of processing one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    /// Phase of the first failure, or the last phase entered when nothing failed.
    pub phase: ExecutionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub params: Map<String, Value>,
    pub precondition_results: Vec<PreconditionResult>,
    pub resource_results: Vec<ResourceResult>,
    pub post_action_results: Vec<PostActionResult>,
    pub errors: IndexMap<ExecutionPhase, ExecutionErrorInfo>,
    pub resources_skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl ExecutionResult {
    pub(crate) fn new() -> Self {
        Self {
            status: ExecutionStatus::Success,
            phase: ExecutionPhase::ParamExtraction,
            event_id: None,
            params: Map::new(),
            precondition_results: Vec::new(),
            resource_results: Vec::new(),
            post_action_results: Vec::new(),
            errors: IndexMap::new(),
            resources_skipped: false,
            skip_reason: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn error_for(&self, phase: ExecutionPhase) -> Option<&ExecutionErrorInfo> {
        self.errors.get(&phase)
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceResult> {
        self.resource_results.iter().find(|result| result.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn serializes_errors_keyed_by_phase() {
        let mut result = ExecutionResult::new();
        result.status = ExecutionStatus::Failed;
        result.errors.insert(
            ExecutionPhase::Resources,
            ExecutionErrorInfo {
                phase: ExecutionPhase::Resources,
                step: "ns".into(),
                kind: ErrorKind::Transport,
                message: "boom".into(),
            },
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["errors"]["resources"]["step"], "ns");
        assert_eq!(json["resourcesSkipped"], false);
        assert!(json.get("skipReason").is_none());
    }

    #[test]
    fn phases_are_ordered() {
        assert!(ExecutionPhase::ParamExtraction < ExecutionPhase::Preconditions);
        assert!(ExecutionPhase::Resources < ExecutionPhase::PostActions);
        assert_eq!(ExecutionPhase::PostActions.error_reason(), "PostActionFailed");
    }
}
