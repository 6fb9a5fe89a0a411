//! Engine error types.

use std::{error::Error as StdError, fmt};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::result::ExecutionPhase;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Broad category of an execution failure, used for reporting and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// The raw event could not be decoded.
    Parse,
    /// A required parameter was missing or could not be converted.
    Parameter,
    /// A template failed to render.
    Template,
    /// A condition, expression, or capture could not be evaluated.
    Evaluation,
    /// An outbound HTTP call failed or returned a non-2xx status.
    Http,
    /// A rendered manifest was invalid.
    Manifest,
    /// A transport operation failed.
    Transport,
    /// The execution scope was cancelled or its deadline passed.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Parse => "parse",
            ErrorKind::Parameter => "parameter",
            ErrorKind::Template => "template",
            ErrorKind::Evaluation => "evaluation",
            ErrorKind::Http => "http",
            ErrorKind::Manifest => "manifest",
            ErrorKind::Transport => "transport",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Failure of a single step within an execution phase.
#[derive(Debug, Error)]
#[error("{phase} step '{step}' failed: {message}")]
pub struct ExecutorError {
    pub phase: ExecutionPhase,
    pub step: String,
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<BoxError>,
}

impl ExecutorError {
    pub fn new(phase: ExecutionPhase, step: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            phase,
            step: step.into(),
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Builds an error whose message is taken from `source`.
    pub fn from_source<E>(phase: ExecutionPhase, step: impl Into<String>, kind: ErrorKind, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            phase,
            step: step.into(),
            kind,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Serializable summary recorded in results and in the `adapter` state.
    pub fn info(&self) -> ExecutionErrorInfo {
        ExecutionErrorInfo {
            phase: self.phase,
            step: self.step.clone(),
            kind: self.kind,
            message: self.message.clone(),
        }
    }
}

/// Serializable record of a phase failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionErrorInfo {
    pub phase: ExecutionPhase,
    pub step: String,
    pub kind: ErrorKind,
    pub message: String,
}
