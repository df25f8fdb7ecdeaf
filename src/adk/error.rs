// SPDX-License-Identifier: MIT

//! Typed error handling for kinetic-runs
//!
//! Every fallible core operation returns [`RunError`]. Callers branch on
//! [`RunError::kind`] to decide whether a retry makes sense.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::kinetic::lifecycle::NodeStatus;

pub type Result<T> = std::result::Result<T, RunError>;

/// Top-level error type for kinetic-runs
#[derive(Debug, Error)]
pub enum RunError {
    /// The submitted plan does not form a valid DAG
    #[error("Plan invalid: {0}")]
    PlanInvalid(#[from] PlanError),

    /// Malformed control action or payload, rejected before any state change
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown node or run
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Illegal lifecycle transition
    #[error("Cannot {action} node '{node_id}' while it is {status}")]
    Conflict {
        node_id: String,
        status: NodeStatus,
        action: String,
    },

    /// Recruitment endpoint unreachable, rejected the call, or exhausted retries
    #[error("Dependency error{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Dependency {
        status: Option<u16>,
        message: String,
    },

    /// Recruitment exceeded its overall time budget
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration errors (missing env vars, invalid URLs)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP transport errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Plan compilation failures
#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    /// A node references a dependency that is not declared in the plan
    #[error("node '{node}' depends on unknown node '{dependency}'")]
    UnknownDependency { node: String, dependency: String },

    /// The dependency relation contains a cycle
    #[error("circular dependency detected: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    /// Two nodes share an identifier
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    /// A node has an empty identifier
    #[error("node at position {0} has an empty id")]
    EmptyId(usize),

    /// A node declares a type outside manage/execute
    #[error("node '{node}' has unknown type '{kind}'")]
    UnknownKind { node: String, kind: String },

    /// The document could not be parsed as a plan
    #[error("malformed plan document: {0}")]
    Malformed(String),
}

/// Coarse classification of [`RunError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PlanInvalid,
    Validation,
    NotFound,
    Conflict,
    Dependency,
    Timeout,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::PlanInvalid => "plan_invalid",
            ErrorKind::Validation => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Dependency => "dependency_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl RunError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error for a node key
    pub fn node_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "node",
            id: id.into(),
        }
    }

    /// Create a dependency error
    pub fn dependency(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Dependency {
            status,
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RunError::PlanInvalid(_) => ErrorKind::PlanInvalid,
            RunError::Validation(_) => ErrorKind::Validation,
            RunError::NotFound { .. } => ErrorKind::NotFound,
            RunError::Conflict { .. } => ErrorKind::Conflict,
            RunError::Dependency { .. } => ErrorKind::Dependency,
            RunError::Timeout(_) => ErrorKind::Timeout,
            RunError::Config(_)
            | RunError::Io(_)
            | RunError::Json(_)
            | RunError::Yaml(_)
            | RunError::Http(_) => ErrorKind::Internal,
        }
    }

    /// Whether a caller may reasonably retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Conflict | ErrorKind::Timeout | ErrorKind::Dependency
        )
    }
}
